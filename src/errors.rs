use std::{io, num::{ParseFloatError, ParseIntError}, str::Utf8Error};
use quick_xml::events::attributes::AttrError;
use thiserror::Error;

use crate::data::osm::OsmType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("inverted bounding box on {axis} axis: min {min} > max {max}")]
    InvertedBoundingBox { axis: &'static str, min: i64, max: i64 },

    #[error("{axis} coordinate {value} is out of range")]
    CoordinateOutOfRange { axis: &'static str, value: i64 },

    #[error("zoom level {0} is out of range")]
    ZoomOutOfRange(u8),

    #[error("cell {id} is not a valid cell at zoom {zoom}")]
    InvalidCell { zoom: u8, id: i64 },

    #[error("version number {version} of {osm_type:?} {id} cannot carry visibility")]
    InvalidVersion { osm_type: OsmType, id: i64, version: i64 },

    #[error("payload of {osm_type:?} {id} does not match its type")]
    PayloadMismatch { osm_type: OsmType, id: i64 },

    #[error("{osm_type:?} {id} appears twice in one container")]
    DuplicateEntity { osm_type: OsmType, id: i64 },

    #[error("{osm_type:?} {id} has no versions")]
    EmptyHistory { osm_type: OsmType, id: i64 },

    #[error("member {osm_type:?} of entity {owner} could not be resolved")]
    UnresolvedMember { osm_type: OsmType, owner: i64 },

    #[error("read past end of byte range at offset {offset}")]
    Truncated { offset: usize },

    #[error("malformed varint at offset {offset}")]
    MalformedVarint { offset: usize },

    #[error("unknown osm type tag {0}")]
    UnknownOsmType(i64),

    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("xml attribute error: {0}")]
    XmlAttr(#[from] AttrError),

    #[error("config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error(transparent)]
    ParseInt(#[from] ParseIntError),

    #[error(transparent)]
    ParseFloat(#[from] ParseFloatError),

    #[error(transparent)]
    Utf8(#[from] Utf8Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("{0}")]
    Message(String),
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
