use std::collections::HashMap;

use super::osm::TagId;

/// Interns strings to dense ids in first-seen order.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct StringTable {
    strings: Vec<String>,
    ids: HashMap<String, TagId>,
}

impl StringTable {
    pub fn intern(&mut self, value: &str) -> TagId {
        if let Some(id) = self.ids.get(value) {
            return *id;
        }
        let id = self.strings.len() as TagId;
        self.strings.push(value.to_string());
        self.ids.insert(value.to_string(), id);
        id
    }

    pub fn get(&self, value: &str) -> Option<TagId> {
        self.ids.get(value).copied()
    }

    pub fn resolve(&self, id: TagId) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
