//! Delta coding of one entity's version history.
//!
//! Versions are written oldest first. Each one is compared with the version
//! before it (the first with an empty version at the container base):
//!
//! ```text
//! varint  signed version delta    (negative version = deleted)
//! varint  timestamp delta
//! varint  changeset delta
//! u8      changed bits            (user | tags | payload)
//! [varint user delta]             if user changed
//! [count, (key, value)*]          if tags changed
//! [payload]                       if payload changed
//! ```
//!
//! Node payloads are lon/lat deltas against the previous coordinate. Way and
//! relation payloads are a member count followed by, per member, a type tag
//! (negated for external ids), the delta to the previous offset or external
//! id, and for relations the role.

use std::collections::BTreeSet;

use crate::data::osm::{OsmId, OsmType, Payload, RawMember, RawVersion, TagId};
use crate::errors::{Error, Result};
use crate::grid::coords::Coordinate;

use super::reference::{Member, ReferenceResolver, ResolvedRef};
use super::varint::{write_uvarint, write_varint, ByteReader};

bitflags::bitflags! {
    /// Parts of a version that differ from the previous version.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Changed: u8 {
        const USER = 1;
        const TAGS = 1 << 1;
        const PAYLOAD = 1 << 2;
    }
}

/// Values shared by every entity of a container; records only store
/// differences from them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BaseValues {
    pub id: OsmId,
    pub timestamp: i64,
    pub lon: i64,
    pub lat: i64,
}

impl BaseValues {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lon, self.lat)
    }
}

/// Tag keys used by any version of an entity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeySet(BTreeSet<TagId>);

impl KeySet {
    pub fn insert(&mut self, key: TagId) {
        self.0.insert(key);
    }

    pub fn contains(&self, key: TagId) -> bool {
        self.0.contains(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = TagId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<TagId> for KeySet {
    fn from_iter<I: IntoIterator<Item = TagId>>(iter: I) -> Self {
        KeySet(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    Node(Coordinate),
    Members(Vec<Member>),
}

/// One decoded version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub id: OsmId,
    /// Negative if this version deleted the entity.
    pub version: i64,
    pub timestamp: i64,
    pub changeset: i64,
    pub user_id: i64,
    pub tags: Vec<(TagId, TagId)>,
    pub payload: RecordPayload,
    pub changed: Changed,
}

impl VersionRecord {
    pub fn is_visible(&self) -> bool {
        self.version > 0
    }

    pub fn version_number(&self) -> u32 {
        self.version.unsigned_abs() as u32
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self.payload {
            RecordPayload::Node(coordinate) => Some(coordinate),
            RecordPayload::Members(_) => None,
        }
    }

    pub fn members(&self) -> &[Member] {
        match &self.payload {
            RecordPayload::Node(_) => &[],
            RecordPayload::Members(members) => members,
        }
    }

    /// Back to the ingestion form, with member references turned into ids by
    /// `resolve_id`.
    pub fn to_raw<F>(&self, mut resolve_id: F) -> Result<RawVersion>
    where
        F: FnMut(&Member) -> Option<OsmId>,
    {
        let payload = match &self.payload {
            RecordPayload::Node(coordinate) => Payload::Node(*coordinate),
            RecordPayload::Members(members) => {
                let mut raw_members = Vec::with_capacity(members.len());
                for member in members {
                    let id = resolve_id(member).ok_or(Error::UnresolvedMember {
                        osm_type: member.osm_type,
                        owner: self.id,
                    })?;
                    raw_members.push(RawMember { osm_type: member.osm_type, id, role: member.role });
                }
                Payload::Members(raw_members)
            }
        };
        Ok(RawVersion {
            version: self.version_number(),
            visible: self.is_visible(),
            timestamp: self.timestamp,
            changeset: self.changeset,
            user_id: self.user_id,
            tags: self.tags.clone(),
            payload,
        })
    }
}

/// Output of [`VersionEncoder::encode`].
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    /// The key set passed in, extended with every key of the history.
    pub key_set: KeySet,
    /// Number of member references written as external ids.
    pub external_refs: usize,
}

pub struct VersionEncoder<'r, R: ?Sized> {
    osm_type: OsmType,
    base: BaseValues,
    resolver: &'r R,
}

impl<'r, R: ReferenceResolver + ?Sized> VersionEncoder<'r, R> {
    pub fn new(osm_type: OsmType, base: BaseValues, resolver: &'r R) -> Self {
        VersionEncoder { osm_type, base, resolver }
    }

    /// Encodes `versions` in the order given, which must be oldest first.
    pub fn encode(&self, id: OsmId, versions: &[RawVersion], mut key_set: KeySet) -> Result<Encoded> {
        let mut bytes = Vec::new();
        let mut external_refs = 0;
        let mut previous: Option<&RawVersion> = None;

        for version in versions {
            self.check(id, version)?;

            let prev_version = previous.map_or(0, RawVersion::signed_version);
            let prev_timestamp = previous.map_or(self.base.timestamp, |p| p.timestamp);
            let prev_changeset = previous.map_or(0, |p| p.changeset);
            write_varint(&mut bytes, version.signed_version().wrapping_sub(prev_version));
            write_varint(&mut bytes, version.timestamp.wrapping_sub(prev_timestamp));
            write_varint(&mut bytes, version.changeset.wrapping_sub(prev_changeset));

            let prev_user = previous.map_or(0, |p| p.user_id);
            let prev_tags = previous.map_or(&[][..], |p| p.tags.as_slice());
            let payload_changed = match previous {
                Some(p) => p.payload != version.payload,
                None => match &version.payload {
                    Payload::Node(coordinate) => *coordinate != self.base.coordinate(),
                    Payload::Members(members) => !members.is_empty(),
                },
            };

            let mut changed = Changed::empty();
            changed.set(Changed::USER, version.user_id != prev_user);
            changed.set(Changed::TAGS, version.tags.as_slice() != prev_tags);
            changed.set(Changed::PAYLOAD, payload_changed);
            bytes.push(changed.bits());

            if changed.contains(Changed::USER) {
                write_varint(&mut bytes, version.user_id.wrapping_sub(prev_user));
            }
            if changed.contains(Changed::TAGS) {
                write_uvarint(&mut bytes, version.tags.len() as u64);
                for &(key, value) in &version.tags {
                    write_uvarint(&mut bytes, u64::from(key));
                    write_uvarint(&mut bytes, u64::from(value));
                }
            }
            for &(key, _) in &version.tags {
                key_set.insert(key);
            }
            if changed.contains(Changed::PAYLOAD) {
                match &version.payload {
                    Payload::Node(coordinate) => {
                        let prev = match previous.map(|p| &p.payload) {
                            Some(Payload::Node(prev)) => *prev,
                            _ => self.base.coordinate(),
                        };
                        write_varint(&mut bytes, coordinate.lon.wrapping_sub(prev.lon));
                        write_varint(&mut bytes, coordinate.lat.wrapping_sub(prev.lat));
                    }
                    Payload::Members(members) => {
                        external_refs += self.write_members(&mut bytes, members);
                    }
                }
            }
            previous = Some(version);
        }

        Ok(Encoded { bytes, key_set, external_refs })
    }

    fn check(&self, id: OsmId, version: &RawVersion) -> Result<()> {
        if version.version == 0 {
            return Err(Error::InvalidVersion { osm_type: self.osm_type, id, version: 0 });
        }
        let matches = matches!(
            (self.osm_type, &version.payload),
            (OsmType::Node, Payload::Node(_)) | (OsmType::Way | OsmType::Relation, Payload::Members(_))
        );
        if !matches {
            return Err(Error::PayloadMismatch { osm_type: self.osm_type, id });
        }
        Ok(())
    }

    fn write_members(&self, bytes: &mut Vec<u8>, members: &[RawMember]) -> usize {
        let mut external_refs = 0;
        let mut last_offset: i64 = 0;
        let mut last_external = self.base.id;

        write_uvarint(bytes, members.len() as u64);
        for member in members {
            let tag = i64::from(member.osm_type.tag());
            match self.resolver.resolve(member.osm_type, member.id) {
                ResolvedRef::Local { offset } => {
                    write_varint(bytes, tag);
                    write_varint(bytes, (offset as i64).wrapping_sub(last_offset));
                    last_offset = offset as i64;
                }
                ResolvedRef::External { id, .. } => {
                    write_varint(bytes, -tag);
                    write_varint(bytes, id.wrapping_sub(last_external));
                    last_external = id;
                    external_refs += 1;
                }
            }
            if self.osm_type == OsmType::Relation {
                write_uvarint(bytes, u64::from(member.role));
            }
        }
        external_refs
    }
}

/// Lazily decodes the versions written by [`VersionEncoder`].
///
/// Every call to `next` reads exactly one version. Cloning the decoder gives
/// an independent stream from the same position. After an error the decoder
/// yields nothing more.
#[derive(Debug, Clone)]
pub struct VersionDecoder<'a> {
    reader: ByteReader<'a>,
    osm_type: OsmType,
    id: OsmId,
    base: BaseValues,
    remaining: usize,
    previous: Option<VersionRecord>,
    generation: u32,
    failed: bool,
}

impl<'a> VersionDecoder<'a> {
    pub fn new(bytes: &'a [u8], osm_type: OsmType, id: OsmId, base: BaseValues, count: usize) -> Self {
        VersionDecoder {
            reader: ByteReader::new(bytes),
            osm_type,
            id,
            base,
            remaining: count,
            previous: None,
            generation: 0,
            failed: false,
        }
    }

    /// Tags decoded members with the layout generation of their container.
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    fn decode_next(&mut self) -> Result<VersionRecord> {
        let previous = self.previous.as_ref();
        let version = previous.map_or(0, |p| p.version).wrapping_add(self.reader.read_varint()?);
        if version == 0 {
            return Err(Error::InvalidVersion { osm_type: self.osm_type, id: self.id, version });
        }
        let timestamp = previous.map_or(self.base.timestamp, |p| p.timestamp).wrapping_add(self.reader.read_varint()?);
        let changeset = previous.map_or(0, |p| p.changeset).wrapping_add(self.reader.read_varint()?);

        let bits = self.reader.read_u8()?;
        let changed = Changed::from_bits(bits)
            .ok_or_else(|| Error::CorruptContainer(format!("unknown change bits {:#04x} in {} {}", bits, self.osm_type, self.id)))?;

        let prev_user = previous.map_or(0, |p| p.user_id);
        let user_id = if changed.contains(Changed::USER) {
            prev_user.wrapping_add(self.reader.read_varint()?)
        } else {
            prev_user
        };

        let tags = if changed.contains(Changed::TAGS) {
            let count = self.reader.read_count()?;
            let mut tags = Vec::with_capacity(count);
            for _ in 0..count {
                let key = read_tag_id(&mut self.reader)?;
                let value = read_tag_id(&mut self.reader)?;
                tags.push((key, value));
            }
            tags
        } else {
            previous.map(|p| p.tags.clone()).unwrap_or_default()
        };

        let prev_payload = match previous {
            Some(p) => p.payload.clone(),
            None if self.osm_type == OsmType::Node => RecordPayload::Node(self.base.coordinate()),
            None => RecordPayload::Members(Vec::new()),
        };
        let payload = if changed.contains(Changed::PAYLOAD) {
            match prev_payload {
                RecordPayload::Node(prev) => {
                    let lon = prev.lon.wrapping_add(self.reader.read_varint()?);
                    let lat = prev.lat.wrapping_add(self.reader.read_varint()?);
                    RecordPayload::Node(Coordinate::new(lon, lat))
                }
                RecordPayload::Members(_) => RecordPayload::Members(self.read_members()?),
            }
        } else {
            prev_payload
        };

        Ok(VersionRecord {
            id: self.id,
            version,
            timestamp,
            changeset,
            user_id,
            tags,
            payload,
            changed,
        })
    }

    fn read_members(&mut self) -> Result<Vec<Member>> {
        let count = self.reader.read_count()?;
        let mut members = Vec::with_capacity(count);
        let mut last_offset: i64 = 0;
        let mut last_external = self.base.id;

        for _ in 0..count {
            let tag = self.reader.read_varint()?;
            let osm_type = OsmType::from_tag(tag.wrapping_abs())?;
            let delta = self.reader.read_varint()?;
            let reference = if tag > 0 {
                last_offset = last_offset.wrapping_add(delta);
                let offset = usize::try_from(last_offset)
                    .map_err(|_| Error::CorruptContainer(format!("negative member offset in {} {}", self.osm_type, self.id)))?;
                ResolvedRef::Local { offset }
            } else {
                last_external = last_external.wrapping_add(delta);
                ResolvedRef::External { osm_type, id: last_external }
            };
            let role = if self.osm_type == OsmType::Relation {
                read_tag_id(&mut self.reader)?
            } else {
                0
            };
            members.push(Member { osm_type, reference, role, generation: self.generation });
        }
        Ok(members)
    }
}

fn read_tag_id(reader: &mut ByteReader<'_>) -> Result<TagId> {
    let offset = reader.position();
    TagId::try_from(reader.read_uvarint()?).map_err(|_| Error::MalformedVarint { offset })
}

impl Iterator for VersionDecoder<'_> {
    type Item = Result<VersionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        match self.decode_next() {
            Ok(record) => {
                self.remaining -= 1;
                self.previous = Some(record.clone());
                Some(Ok(record))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.remaining))
        }
    }
}
