//! Per-entity blob inside a container's data section.
//!
//! ```text
//! u8      flags
//! varint  key count
//! varint* key ids, ascending, delta coded
//! varint  version count
//! ...     versions, see codec::record
//! ```

use std::ops::Range;

use crate::codec::record::{BaseValues, KeySet, VersionDecoder, VersionEncoder, VersionRecord};
use crate::codec::reference::ReferenceResolver;
use crate::codec::varint::{write_uvarint, ByteReader};
use crate::data::osm::{EntityKey, OsmId, OsmType, RawEntity, TagId};
use crate::errors::{Error, Result};

use super::GridContainer;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u8 {
        /// The latest version is visible.
        const VISIBLE = 1;
        /// Some version carries tags.
        const HAS_TAGS = 1 << 1;
        /// Some member could not be resolved to an offset at build time.
        const EXTERNAL_REFS = 1 << 2;
    }
}

/// Writes the header and versions of `entity`. Versions must already be
/// sorted oldest first.
pub(crate) fn encode_entity<R>(entity: &RawEntity, base: BaseValues, resolver: &R) -> Result<(Vec<u8>, usize)>
where
    R: ReferenceResolver + ?Sized,
{
    let encoded = VersionEncoder::new(entity.osm_type, base, resolver).encode(entity.id, &entity.versions, KeySet::default())?;

    let mut flags = EntityFlags::empty();
    flags.set(EntityFlags::VISIBLE, entity.versions.last().is_some_and(|v| v.visible));
    flags.set(EntityFlags::HAS_TAGS, !encoded.key_set.is_empty());
    flags.set(EntityFlags::EXTERNAL_REFS, encoded.external_refs > 0);

    let mut bytes = Vec::with_capacity(encoded.bytes.len() + 8);
    bytes.push(flags.bits());
    write_uvarint(&mut bytes, encoded.key_set.len() as u64);
    let mut last_key = 0;
    for key in encoded.key_set.iter() {
        write_uvarint(&mut bytes, u64::from(key - last_key));
        last_key = key;
    }
    write_uvarint(&mut bytes, entity.versions.len() as u64);
    bytes.extend_from_slice(&encoded.bytes);
    Ok((bytes, encoded.external_refs))
}

/// Read-only view of one entity inside a container.
#[derive(Debug, Clone)]
pub struct EncodedEntity<'a> {
    container: &'a GridContainer,
    key: EntityKey,
    range: Range<usize>,
    flags: EntityFlags,
    key_set: KeySet,
    versions_start: usize,
    version_count: usize,
}

impl<'a> EncodedEntity<'a> {
    /// Parses the header only; versions stay encoded until asked for.
    pub(crate) fn parse(container: &'a GridContainer, key: EntityKey, range: Range<usize>) -> Result<Self> {
        let bytes = &container.data()[range.clone()];
        let mut reader = ByteReader::new(bytes);

        let bits = reader.read_u8()?;
        let flags = EntityFlags::from_bits(bits)
            .ok_or_else(|| Error::CorruptContainer(format!("unknown entity flags {:#04x} on {} {}", bits, key.osm_type, key.id)))?;

        let key_count = reader.read_count()?;
        let mut key_set = KeySet::default();
        let mut last_key: u64 = 0;
        for _ in 0..key_count {
            let offset = reader.position();
            last_key += reader.read_uvarint()?;
            key_set.insert(TagId::try_from(last_key).map_err(|_| Error::MalformedVarint { offset })?);
        }
        let version_count = reader.read_count()?;

        Ok(EncodedEntity {
            container,
            key,
            versions_start: range.start + reader.position(),
            range,
            flags,
            key_set,
            version_count,
        })
    }

    pub fn id(&self) -> OsmId {
        self.key.id
    }

    pub fn osm_type(&self) -> OsmType {
        self.key.osm_type
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn flags(&self) -> EntityFlags {
        self.flags
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(EntityFlags::VISIBLE)
    }

    pub fn key_set(&self) -> &KeySet {
        &self.key_set
    }

    /// Whether any version ever used the tag key, without decoding versions.
    pub fn has_key(&self, key: TagId) -> bool {
        self.key_set.contains(key)
    }

    pub fn byte_range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn version_count(&self) -> usize {
        self.version_count
    }

    pub fn container(&self) -> &'a GridContainer {
        self.container
    }

    /// Versions oldest first.
    pub fn versions(&self) -> VersionDecoder<'a> {
        let bytes = &self.container.data()[self.versions_start..self.range.end];
        VersionDecoder::new(bytes, self.key.osm_type, self.key.id, self.container.base(), self.version_count)
            .with_generation(self.container.generation())
    }

    /// The version valid at `timestamp`, if the entity existed by then.
    pub fn version_at(&self, timestamp: i64) -> Result<Option<VersionRecord>> {
        let mut current = None;
        for record in self.versions() {
            let record = record?;
            if record.timestamp > timestamp {
                break;
            }
            current = Some(record);
        }
        Ok(current)
    }

    pub fn modification_timestamps(&self) -> Result<Vec<i64>> {
        self.versions().map(|record| record.map(|r| r.timestamp)).collect()
    }

    /// Decodes the full history with member references turned back into ids.
    pub fn to_raw(&self) -> Result<RawEntity> {
        let mut versions = Vec::with_capacity(self.version_count);
        for record in self.versions() {
            versions.push(record?.to_raw(|member| self.container.member_id(member))?);
        }
        Ok(RawEntity::new(self.key.osm_type, self.key.id, versions))
    }
}
