//! Per-cell containers of delta-coded entity histories.
//!
//! A container holds every entity assigned to one grid cell for one primary
//! type, plus whatever members were embedded next to them. Entities are kept
//! sorted by [`EntityKey`], so embedded nodes come before the ways that use
//! them and can be referenced by offset.

pub mod builder;
pub mod entity;
pub mod layout;

use std::ops::Range;

use crate::codec::record::BaseValues;
use crate::codec::reference::{Member, ResolvedRef};
use crate::data::osm::{EntityKey, OsmId, OsmType};
use crate::errors::Result;
use crate::grid::CellId;

pub use self::builder::ContainerBuilder;
pub use self::entity::{EncodedEntity, EntityFlags};

/// Where an entity starts in the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: EntityKey,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridContainer {
    cell: CellId,
    osm_type: OsmType,
    base: BaseValues,
    index: Vec<IndexEntry>,
    data: Vec<u8>,
    /// Index of every earlier generation, oldest first. Its length is the
    /// current generation.
    relocations: Vec<Vec<IndexEntry>>,
}

/// Result of following a member reference.
#[derive(Debug, Clone)]
pub enum MemberTarget<'a> {
    Entity(EncodedEntity<'a>),
    /// Neither this container nor the external lookup had it.
    Unresolved(ResolvedRef),
}

impl<'a> MemberTarget<'a> {
    pub fn entity(self) -> Option<EncodedEntity<'a>> {
        match self {
            MemberTarget::Entity(entity) => Some(entity),
            MemberTarget::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, MemberTarget::Entity(_))
    }
}

impl GridContainer {
    /// Index must be sorted by key with strictly increasing offsets inside `data`.
    pub(crate) fn from_parts(cell: CellId, osm_type: OsmType, base: BaseValues, index: Vec<IndexEntry>, data: Vec<u8>) -> Self {
        GridContainer { cell, osm_type, base, index, data, relocations: Vec::new() }
    }

    /// Same index rules as [`from_parts`](Self::from_parts), for each earlier generation.
    pub(crate) fn with_relocations(mut self, relocations: Vec<Vec<IndexEntry>>) -> Self {
        self.relocations = relocations;
        self
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    /// Type of the entities this container was built for. Embedded members may
    /// have other types.
    pub fn osm_type(&self) -> OsmType {
        self.osm_type
    }

    pub fn base(&self) -> BaseValues {
        self.base
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of compactions this container went through. Members decoded
    /// from an earlier generation still resolve against this one.
    pub fn generation(&self) -> u32 {
        self.relocations.len() as u32
    }

    pub fn relocations(&self) -> &[Vec<IndexEntry>] {
        &self.relocations
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn range_of(&self, position: usize) -> Range<usize> {
        let start = self.index[position].offset;
        let end = self.index.get(position + 1).map_or(self.data.len(), |next| next.offset);
        start..end
    }

    /// Entity at `position` in the index, `None` past the end.
    pub fn entity_at(&self, position: usize) -> Result<Option<EncodedEntity<'_>>> {
        match self.index.get(position) {
            Some(_) => self.parse_at(position).map(Some),
            None => Ok(None),
        }
    }

    fn parse_at(&self, position: usize) -> Result<EncodedEntity<'_>> {
        EncodedEntity::parse(self, self.index[position].key, self.range_of(position))
    }

    /// Looks up an entity of the container's own type.
    pub fn get(&self, id: OsmId) -> Result<Option<EncodedEntity<'_>>> {
        self.get_typed(self.osm_type, id)
    }

    pub fn get_typed(&self, osm_type: OsmType, id: OsmId) -> Result<Option<EncodedEntity<'_>>> {
        match self.index.binary_search_by_key(&EntityKey::new(osm_type, id), |entry| entry.key) {
            Ok(position) => self.parse_at(position).map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn contains(&self, osm_type: OsmType, id: OsmId) -> bool {
        self.index.binary_search_by_key(&EntityKey::new(osm_type, id), |entry| entry.key).is_ok()
    }

    /// All entities in index order. A corrupt entity yields an error without
    /// stopping the iteration.
    pub fn iter(&self) -> impl Iterator<Item = Result<EncodedEntity<'_>>> + '_ {
        (0..self.index.len()).map(move |position| self.parse_at(position))
    }

    pub fn entities_of(&self, osm_type: OsmType) -> impl Iterator<Item = Result<EncodedEntity<'_>>> + '_ {
        let start = self.index.partition_point(|entry| entry.key.osm_type < osm_type);
        let end = self.index.partition_point(|entry| entry.key.osm_type <= osm_type);
        (start..end).map(move |position| self.parse_at(position))
    }

    /// Index position of the entity starting at `offset`.
    pub fn position_of_offset(&self, offset: usize) -> Option<usize> {
        self.index.binary_search_by_key(&offset, |entry| entry.offset).ok()
    }

    /// Key of the entity that started at `offset` in the given generation.
    pub fn key_at_offset(&self, offset: usize, generation: u32) -> Option<EntityKey> {
        let index = if generation == self.generation() {
            &self.index
        } else {
            self.relocations.get(generation as usize)?
        };
        let position = index.binary_search_by_key(&offset, |entry| entry.offset).ok()?;
        Some(index[position].key)
    }

    fn local_key(&self, member: &Member, offset: usize) -> Option<EntityKey> {
        self.key_at_offset(offset, member.generation)
            .filter(|key| key.osm_type == member.osm_type)
    }

    /// Follows a member reference. Local references are read from this
    /// container; external ones go through `external`.
    pub fn lookup<'s, F>(&'s self, member: &Member, external: F) -> MemberTarget<'s>
    where
        F: FnOnce(OsmType, OsmId) -> Option<EncodedEntity<'s>>,
    {
        let target = match member.reference {
            ResolvedRef::Local { offset } => self
                .local_key(member, offset)
                .and_then(|key| self.get_typed(key.osm_type, key.id).ok().flatten()),
            ResolvedRef::External { osm_type, id } => external(osm_type, id),
        };
        match target {
            Some(entity) => MemberTarget::Entity(entity),
            None => MemberTarget::Unresolved(member.reference),
        }
    }

    /// [`lookup`](Self::lookup) that also searches this container for
    /// external ids, which covers members written after their owner.
    pub fn resolve(&self, member: &Member) -> MemberTarget<'_> {
        self.lookup(member, |osm_type, id| self.get_typed(osm_type, id).ok().flatten())
    }

    /// Id of the member's target, without decoding it.
    pub fn member_id(&self, member: &Member) -> Option<OsmId> {
        match member.reference {
            ResolvedRef::Local { offset } => self.local_key(member, offset).map(|key| key.id),
            ResolvedRef::External { id, .. } => Some(id),
        }
    }

    /// Rebuilds with base values picked from the data and starts a new
    /// generation; see [`builder::compact`].
    pub fn compact(&self) -> Result<GridContainer> {
        builder::compact(self)
    }
}
