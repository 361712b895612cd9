use self::osm::RawEntity;
use self::tags::StringTable;

pub mod osm;
pub mod tags;

/// Full edit history as read from an .osh file. Versions are kept without any
/// processing apart from interning tag strings.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct OsmHistory {
    pub nodes: Vec<RawEntity>,
    pub ways: Vec<RawEntity>,
    pub relations: Vec<RawEntity>,
    pub keys: StringTable,
    pub values: StringTable,
    pub roles: StringTable,
}

impl OsmHistory {
    pub fn entity_count(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }
}
