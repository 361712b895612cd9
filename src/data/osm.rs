use std::fmt;

use crate::errors::{Error, Result};
use crate::grid::coords::Coordinate;

pub type OsmId = i64;

/// Key or value id from one of the [`StringTable`](super::tags::StringTable)s.
pub type TagId = u32;

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[archive(check_bytes)]
pub enum OsmType {
    Node,
    Way,
    Relation,
}

impl OsmType {
    pub const ALL: [OsmType; 3] = [OsmType::Node, OsmType::Way, OsmType::Relation];

    /// Non-zero tag used on disk, so that its negation stays distinguishable.
    pub const fn tag(self) -> u8 {
        match self {
            OsmType::Node => 1,
            OsmType::Way => 2,
            OsmType::Relation => 3,
        }
    }

    pub fn from_tag(tag: i64) -> Result<OsmType> {
        match tag {
            1 => Ok(OsmType::Node),
            2 => Ok(OsmType::Way),
            3 => Ok(OsmType::Relation),
            other => Err(Error::UnknownOsmType(other)),
        }
    }

    pub fn from_name(name: &[u8]) -> Option<OsmType> {
        match name {
            b"node" => Some(OsmType::Node),
            b"way" => Some(OsmType::Way),
            b"relation" => Some(OsmType::Relation),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            OsmType::Node => "node",
            OsmType::Way => "way",
            OsmType::Relation => "relation",
        }
    }
}

impl fmt::Display for OsmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of an entity. Sorts nodes before ways before relations, then by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub osm_type: OsmType,
    pub id: OsmId,
}

impl EntityKey {
    pub const fn new(osm_type: OsmType, id: OsmId) -> Self {
        EntityKey { osm_type, id }
    }
}

/// Reference from a way or relation to another entity, by id.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct RawMember {
    pub osm_type: OsmType,
    pub id: OsmId,
    /// Role id for relation members, always 0 for way nodes.
    pub role: TagId,
}

impl RawMember {
    pub fn node(id: OsmId) -> Self {
        RawMember { osm_type: OsmType::Node, id, role: 0 }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum Payload {
    Node(Coordinate),
    Members(Vec<RawMember>),
}

/// One historical state of an entity, as handed over by ingestion.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct RawVersion {
    pub version: u32,
    pub visible: bool,
    /// Seconds since the unix epoch.
    pub timestamp: i64,
    pub changeset: i64,
    pub user_id: i64,
    pub tags: Vec<(TagId, TagId)>,
    pub payload: Payload,
}

impl RawVersion {
    /// Version number with visibility folded into its sign.
    pub fn signed_version(&self) -> i64 {
        let version = i64::from(self.version);
        if self.visible { version } else { -version }
    }
}

/// Every version of one entity.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct RawEntity {
    pub osm_type: OsmType,
    pub id: OsmId,
    pub versions: Vec<RawVersion>,
}

impl RawEntity {
    pub fn new(osm_type: OsmType, id: OsmId, versions: Vec<RawVersion>) -> Self {
        RawEntity { osm_type, id, versions }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.osm_type, self.id)
    }

    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.versions.iter().filter_map(|version| match version.payload {
            Payload::Node(coordinate) => Some(coordinate),
            Payload::Members(_) => None,
        })
    }

    pub fn members(&self) -> impl Iterator<Item = &RawMember> + '_ {
        self.versions.iter().flat_map(|version| match &version.payload {
            Payload::Node(_) => [].iter(),
            Payload::Members(members) => members.iter(),
        })
    }
}
