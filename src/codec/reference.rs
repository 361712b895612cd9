use std::collections::BTreeMap;

use crate::data::osm::{EntityKey, OsmId, OsmType, TagId};

/// Where a member points: a byte offset inside the container being decoded,
/// or an id to be looked up somewhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedRef {
    Local { offset: usize },
    External { osm_type: OsmType, id: OsmId },
}

impl ResolvedRef {
    pub fn is_local(&self) -> bool {
        matches!(self, ResolvedRef::Local { .. })
    }
}

/// A decoded way node or relation member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub osm_type: OsmType,
    pub reference: ResolvedRef,
    /// Always 0 for way nodes.
    pub role: TagId,
    /// Layout generation of the container the member was read from. Local
    /// offsets are only meaningful within that generation.
    pub generation: u32,
}

/// Turns member ids into references while a container is being written.
pub trait ReferenceResolver {
    fn resolve(&self, osm_type: OsmType, id: OsmId) -> ResolvedRef;
}

/// Resolves nothing locally. Used when encoding a history on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalOnly;

impl ReferenceResolver for ExternalOnly {
    fn resolve(&self, osm_type: OsmType, id: OsmId) -> ResolvedRef {
        ResolvedRef::External { osm_type, id }
    }
}

/// The in-progress index of a container: only entities already written
/// resolve to an offset.
impl ReferenceResolver for BTreeMap<EntityKey, usize> {
    fn resolve(&self, osm_type: OsmType, id: OsmId) -> ResolvedRef {
        match self.get(&EntityKey::new(osm_type, id)) {
            Some(&offset) => ResolvedRef::Local { offset },
            None => ResolvedRef::External { osm_type, id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_resolves_written_entities_only() {
        let mut index = BTreeMap::new();
        index.insert(EntityKey::new(OsmType::Node, 7), 0);
        index.insert(EntityKey::new(OsmType::Node, 9), 31);

        assert_eq!(index.resolve(OsmType::Node, 9), ResolvedRef::Local { offset: 31 });
        assert_eq!(
            index.resolve(OsmType::Node, 8),
            ResolvedRef::External { osm_type: OsmType::Node, id: 8 }
        );
        // same id, other type
        assert!(!index.resolve(OsmType::Way, 7).is_local());
        assert!(!ExternalOnly.resolve(OsmType::Node, 7).is_local());
    }
}
