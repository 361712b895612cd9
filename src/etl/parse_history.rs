use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str;

use chrono::DateTime;
use log::{info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::config::UserConfig;
use crate::data::osm::{EntityKey, OsmId, OsmType, Payload, RawEntity, RawMember, RawVersion};
use crate::data::OsmHistory;
use crate::errors::{Error, Result};
use crate::grid::Coordinate;

use super::Etl;

pub const ETL_NAME: &str = "parse_history";
pub const OUTPUT_FILE_NAME: &str = "osm_history.rkyv";

/// Reads an OSM full-history file into [`OsmHistory`] and caches it.
pub struct ParseHistoryEtl<'a> {
    config: &'a UserConfig,
}

/// Version whose child elements are still being read.
struct PendingVersion {
    osm_type: OsmType,
    id: OsmId,
    version: u32,
    visible: bool,
    timestamp: i64,
    changeset: i64,
    user_id: i64,
    coordinate: Option<Coordinate>,
    tags: Vec<(u32, u32)>,
    members: Vec<RawMember>,
}

enum ParserState {
    Top,
    Entity(PendingVersion),
}

#[derive(Default)]
struct HistoryCollector {
    history: OsmHistory,
    versions: BTreeMap<EntityKey, Vec<RawVersion>>,
}

impl HistoryCollector {
    fn push(&mut self, pending: PendingVersion) {
        let key = EntityKey::new(pending.osm_type, pending.id);
        let versions = self.versions.entry(key).or_default();
        let payload = match pending.osm_type {
            OsmType::Node => {
                let previous = versions.iter().rev().find_map(|version| match version.payload {
                    Payload::Node(coordinate) => Some(coordinate),
                    Payload::Members(_) => None,
                });
                let coordinate = pending.coordinate.or(previous).unwrap_or_else(|| {
                    warn!(id = pending.id, version = pending.version; "Node version without coordinate and no earlier one");
                    Coordinate::default()
                });
                Payload::Node(coordinate)
            }
            OsmType::Way | OsmType::Relation => Payload::Members(pending.members),
        };
        versions.push(RawVersion {
            version: pending.version,
            visible: pending.visible,
            timestamp: pending.timestamp,
            changeset: pending.changeset,
            user_id: pending.user_id,
            tags: pending.tags,
            payload,
        });
    }

    fn finish(mut self) -> OsmHistory {
        for (key, mut versions) in self.versions {
            versions.sort_by_key(|version| version.version);
            let entity = RawEntity::new(key.osm_type, key.id, versions);
            match key.osm_type {
                OsmType::Node => self.history.nodes.push(entity),
                OsmType::Way => self.history.ways.push(entity),
                OsmType::Relation => self.history.relations.push(entity),
            }
        }
        self.history
    }
}

impl ParseHistoryEtl<'_> {
    pub fn new(config: &UserConfig) -> ParseHistoryEtl {
        ParseHistoryEtl { config }
    }

    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    fn create_osm_reader(&self) -> Result<Reader<Box<dyn BufRead>>> {
        let path = Path::new(&self.config.data_path);
        let file_reader = BufReader::new(File::open(path)?);
        let input: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "xz") {
            Box::new(BufReader::new(XzDecoder::new(file_reader)))
        } else {
            Box::new(file_reader)
        };
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);
        Ok(reader)
    }

    fn parse_header(osm_type: OsmType, el: &BytesStart) -> Result<PendingVersion> {
        let mut id: Option<OsmId> = None;
        let mut version: Option<u32> = None;
        let mut lat = None;
        let mut lon = None;
        let mut pending = PendingVersion {
            osm_type,
            id: 0,
            version: 0,
            visible: true,
            timestamp: 0,
            changeset: 0,
            user_id: 0,
            coordinate: None,
            tags: Vec::new(),
            members: Vec::new(),
        };

        for attribute in el.attributes() {
            let attribute = attribute?;
            let value = str::from_utf8(&attribute.value)?;
            match attribute.key.as_ref() {
                b"id" => id = Some(value.parse()?),
                b"version" => version = Some(value.parse()?),
                b"visible" => pending.visible = value != "false",
                b"timestamp" => pending.timestamp = DateTime::parse_from_rfc3339(value)?.timestamp(),
                b"changeset" => pending.changeset = value.parse()?,
                b"uid" => pending.user_id = value.parse()?,
                b"lat" => lat = Some(value.parse::<f64>()?),
                b"lon" => lon = Some(value.parse::<f64>()?),
                _ => (),
            }
        }

        pending.id = id.ok_or_else(|| format!("{} without id", osm_type))?;
        pending.version = version.ok_or_else(|| format!("{} {} without version", osm_type, pending.id))?;
        if let (Some(lon), Some(lat)) = (lon, lat) {
            pending.coordinate = Some(Coordinate::from_degrees(lon, lat));
        }
        Ok(pending)
    }

    fn parse_tag(history: &mut OsmHistory, el: &BytesStart) -> Result<(u32, u32)> {
        let mut key = None;
        let mut value = None;
        for attribute in el.attributes() {
            let attribute = attribute?;
            match attribute.key.as_ref() {
                b"k" => key = Some(history.keys.intern(&attribute.unescape_value()?)),
                b"v" => value = Some(history.values.intern(&attribute.unescape_value()?)),
                _ => (),
            }
        }
        Ok((key.ok_or("tag without key")?, value.ok_or("tag without value")?))
    }

    fn parse_member(history: &mut OsmHistory, el: &BytesStart) -> Result<RawMember> {
        let mut osm_type = None;
        let mut id: Option<OsmId> = None;
        let mut role = 0;
        for attribute in el.attributes() {
            let attribute = attribute?;
            match attribute.key.as_ref() {
                b"type" => osm_type = OsmType::from_name(&attribute.value),
                b"ref" => id = Some(str::from_utf8(&attribute.value)?.parse()?),
                b"role" => role = history.roles.intern(&attribute.unescape_value()?),
                _ => (),
            }
        }
        Ok(RawMember {
            osm_type: osm_type.ok_or("member without known type")?,
            id: id.ok_or("member without ref")?,
            role,
        })
    }

    fn parse_node_ref(el: &BytesStart) -> Result<RawMember> {
        let id = el
            .try_get_attribute("ref")?
            .ok_or("nd without ref")?;
        Ok(RawMember::node(str::from_utf8(&id.value)?.parse()?))
    }

    /// Handles an element nested in an entity. Unknown elements are skipped.
    fn parse_child(collector: &mut HistoryCollector, pending: &mut PendingVersion, el: &BytesStart) -> Result<()> {
        match (pending.osm_type, el.name().as_ref()) {
            (_, b"tag") => {
                let tag = Self::parse_tag(&mut collector.history, el)?;
                pending.tags.push(tag);
            }
            (OsmType::Way, b"nd") => pending.members.push(Self::parse_node_ref(el)?),
            (OsmType::Relation, b"member") => {
                let member = Self::parse_member(&mut collector.history, el)?;
                pending.members.push(member);
            }
            _ => (),
        }
        Ok(())
    }

    pub fn parse<R: BufRead>(reader: &mut Reader<R>) -> Result<OsmHistory> {
        let mut buf = Vec::new();
        let mut collector = HistoryCollector::default();
        let mut state = ParserState::Top;

        loop {
            let event = reader.read_event_into(&mut buf)?;
            if let Event::Eof = event {
                break;
            }
            state = match (state, event) {
                (ParserState::Top, Event::Start(e)) => match OsmType::from_name(e.name().as_ref()) {
                    Some(osm_type) => ParserState::Entity(Self::parse_header(osm_type, &e)?),
                    None => ParserState::Top,
                },
                (ParserState::Top, Event::Empty(e)) => {
                    if let Some(osm_type) = OsmType::from_name(e.name().as_ref()) {
                        collector.push(Self::parse_header(osm_type, &e)?);
                    }
                    ParserState::Top
                }
                (ParserState::Entity(mut pending), Event::Empty(e) | Event::Start(e)) => {
                    Self::parse_child(&mut collector, &mut pending, &e)?;
                    ParserState::Entity(pending)
                }
                (ParserState::Entity(pending), Event::End(e)) => {
                    if e.name().as_ref() == pending.osm_type.name().as_bytes() {
                        collector.push(pending);
                        ParserState::Top
                    } else {
                        ParserState::Entity(pending)
                    }
                }
                (state, _) => state,
            };
            buf.clear();
        }

        if let ParserState::Entity(pending) = state {
            return Err(format!("input ends inside {} {}", pending.osm_type, pending.id).into());
        }
        Ok(collector.finish())
    }
}

impl Etl for ParseHistoryEtl<'_> {
    type Input = Reader<Box<dyn BufRead>>;
    type Output = OsmHistory;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(Self::output_path(dir).exists())
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        fs::remove_file(Self::output_path(dir))?;
        Ok(())
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        self.create_osm_reader()
    }

    fn transform(&mut self, mut input: Self::Input) -> Result<Self::Output> {
        let history = Self::parse(&mut input)?;
        info!(
            etl_name = ETL_NAME,
            nodes = history.nodes.len(),
            ways = history.ways.len(),
            relations = history.relations.len(),
            keys = history.keys.len();
            "Parsed history"
        );
        Ok(history)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let bytes = rkyv::to_bytes::<_, 1024>(&output).map_err(|err| Error::Cache(err.to_string()))?;
        let mut output_file = File::create(Self::output_path(dir))?;
        output_file.write_all(&bytes)?;
        Ok(())
    }
}

/// Reads the cache written by [`ParseHistoryEtl`], validating it first.
pub fn load_history(dir: &Path) -> Result<OsmHistory> {
    let mut file = File::open(dir.join(OUTPUT_FILE_NAME))?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    let mut bytes = rkyv::AlignedVec::with_capacity(raw.len());
    bytes.extend_from_slice(&raw);
    rkyv::from_bytes::<OsmHistory>(&bytes).map_err(|err| Error::Cache(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <node id="1" version="1" timestamp="2010-01-01T00:00:00Z" changeset="10" uid="7" user="a" visible="true" lat="51.5" lon="-0.1">
    <tag k="amenity" v="pub"/>
  </node>
  <node id="1" version="2" timestamp="2011-01-01T00:00:00Z" changeset="11" uid="7" user="a" visible="false"/>
  <node id="2" version="1" timestamp="2010-01-01T00:00:00Z" changeset="10" uid="7" user="a" lat="51.6" lon="-0.2"/>
  <way id="5" version="1" timestamp="2012-01-01T00:00:00Z" changeset="12" uid="8" user="b">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
    <tag k="name" v="Fish &amp; Chips Lane"/>
  </way>
  <relation id="9" version="1" timestamp="2013-01-01T00:00:00Z" changeset="13" uid="8" user="b">
    <member type="way" ref="5" role="outer"/>
    <member type="node" ref="2" role=""/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>
"#;

    fn parse(text: &str) -> Result<OsmHistory> {
        let mut reader = Reader::from_reader(text.as_bytes());
        reader.trim_text(true);
        ParseHistoryEtl::parse(&mut reader)
    }

    #[test]
    fn test_parse_groups_versions() {
        let history = parse(HISTORY).unwrap();
        assert_eq!(history.entity_count(), 4);

        let node = &history.nodes[0];
        assert_eq!(node.versions.len(), 2);
        assert_eq!(node.versions[0].timestamp, 1_262_304_000);
        assert!(!node.versions[1].visible);
        // deleted version keeps the last known position
        assert_eq!(node.versions[1].payload, Payload::Node(Coordinate::from_degrees(-0.1, 51.5)));
        assert_eq!(history.keys.resolve(node.versions[0].tags[0].0), Some("amenity"));
        assert!(node.versions[1].tags.is_empty());

        let way = &history.ways[0];
        assert_eq!(way.members().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
        let name = history.keys.get("name").unwrap();
        let (_, value) = way.versions[0].tags.iter().find(|(k, _)| *k == name).unwrap();
        assert_eq!(history.values.resolve(*value), Some("Fish & Chips Lane"));

        let relation = &history.relations[0];
        let members: Vec<_> = relation.members().collect();
        assert_eq!(members[0].osm_type, OsmType::Way);
        assert_eq!(history.roles.resolve(members[0].role), Some("outer"));
        assert_eq!(history.roles.resolve(members[1].role), Some(""));
    }

    #[test]
    fn test_parse_rejects_broken_input() {
        assert!(parse(r#"<osm><node version="1" lat="1" lon="1"/></osm>"#).is_err());
        assert!(parse(r#"<osm><node id="1" version="1" timestamp="yesterday"/></osm>"#).is_err());
        assert!(parse(r#"<osm><way id="1" version="1"><nd ref="1"/>"#).is_err());
    }

    #[test]
    fn test_duplicate_attribute_is_an_attribute_error() {
        let err = parse(r#"<osm><node id="1" id="2" version="1" timestamp="2010-01-01T00:00:00Z" lat="1" lon="1"/></osm>"#).unwrap_err();
        assert!(matches!(err, Error::XmlAttr(_)), "{:?}", err);
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let history = parse(HISTORY).unwrap();
        let config = UserConfig {
            data_path: String::new(),
            dest_path: dir.path().to_string_lossy().into_owned(),
            max_zoom: 15,
            max_cells_per_axis: 2,
            embed_members: true,
            compact: false,
        };
        let mut etl = ParseHistoryEtl::new(&config);
        assert!(!etl.is_cached(dir.path()).unwrap());
        etl.load(dir.path(), history.clone()).unwrap();
        assert!(etl.is_cached(dir.path()).unwrap());

        let loaded = load_history(dir.path()).unwrap();
        assert_eq!(loaded.nodes, history.nodes);
        assert_eq!(loaded.relations, history.relations);
        assert_eq!(loaded.values.get("pub"), history.values.get("pub"));

        etl.clean(dir.path()).unwrap();
        assert!(!etl.is_cached(dir.path()).unwrap());
    }
}
