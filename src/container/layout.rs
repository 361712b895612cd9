//! On-disk form of a container.
//!
//! ```text
//! [4]  magic "OSHG"
//! u8   format version
//! u8   zoom
//! i64  cell id                       little endian, like every fixed field
//! u8   primary type tag
//! i64  base id, timestamp, lon, lat
//! u32  generation
//! u32  entity count
//! per entity:
//!   u8      type tag
//!   varint  id delta to the previous entry (the first against base id)
//!   varint  offset delta to the previous entry
//! per earlier generation, oldest first:
//!   varint  entity count
//!   entries as above
//! data section
//! ```

use crate::codec::record::BaseValues;
use crate::codec::varint::{write_uvarint, write_varint, ByteReader};
use crate::data::osm::{EntityKey, OsmType};
use crate::errors::{Error, Result};
use crate::grid::CellId;

use super::{GridContainer, IndexEntry};

pub const MAGIC: [u8; 4] = *b"OSHG";
pub const FORMAT_VERSION: u8 = 1;

impl GridContainer {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(56 + self.index.len() * 4 + self.data.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.push(FORMAT_VERSION);
        bytes.push(self.cell.zoom());
        bytes.extend_from_slice(&self.cell.id().to_le_bytes());
        bytes.push(self.osm_type.tag());
        for value in [self.base.id, self.base.timestamp, self.base.lon, self.base.lat] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&self.generation().to_le_bytes());
        bytes.extend_from_slice(&(self.index.len() as u32).to_le_bytes());
        write_entries(&mut bytes, &self.index, self.base.id);
        for index in &self.relocations {
            write_uvarint(&mut bytes, index.len() as u64);
            write_entries(&mut bytes, index, self.base.id);
        }
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Parses and checks the header and index. Entity blobs are only checked
    /// when read, so one damaged entity does not hide the others.
    pub fn from_bytes(bytes: &[u8]) -> Result<GridContainer> {
        let mut reader = ByteReader::new(bytes);
        let magic: [u8; 4] = reader.read_array().map_err(corrupt)?;
        if magic != MAGIC {
            return Err(Error::CorruptContainer(format!("bad magic {:02x?}", magic)));
        }
        let version = reader.read_u8().map_err(corrupt)?;
        if version != FORMAT_VERSION {
            return Err(Error::CorruptContainer(format!("unsupported format version {}", version)));
        }

        let zoom = reader.read_u8().map_err(corrupt)?;
        let cell = CellId::new(zoom, reader.read_i64_le().map_err(corrupt)?);
        if !cell.is_valid() {
            return Err(Error::CorruptContainer(format!("invalid cell {}", cell)));
        }
        let osm_type = OsmType::from_tag(i64::from(reader.read_u8().map_err(corrupt)?)).map_err(corrupt)?;
        let base = BaseValues {
            id: reader.read_i64_le().map_err(corrupt)?,
            timestamp: reader.read_i64_le().map_err(corrupt)?,
            lon: reader.read_i64_le().map_err(corrupt)?,
            lat: reader.read_i64_le().map_err(corrupt)?,
        };

        let generation = reader.read_u32_le().map_err(corrupt)?;
        let count = reader.read_u32_le().map_err(corrupt)? as usize;
        let index = read_entries(&mut reader, count, base.id)?;
        // each earlier generation takes at least one byte
        if generation as usize > reader.remaining() {
            return Err(Error::CorruptContainer(format!("{} relocation tables do not fit", generation)));
        }
        let mut relocations = Vec::with_capacity(generation as usize);
        for _ in 0..generation {
            let count = reader.read_count().map_err(corrupt)?;
            relocations.push(read_entries(&mut reader, count, base.id)?);
        }

        let data = bytes[reader.position()..].to_vec();
        if let Some(last) = index.last() {
            if last.offset >= data.len() {
                return Err(Error::CorruptContainer(format!("last entity starts at {} past data of {} bytes", last.offset, data.len())));
            }
        }
        Ok(GridContainer::from_parts(cell, osm_type, base, index, data).with_relocations(relocations))
    }
}

fn write_entries(bytes: &mut Vec<u8>, index: &[IndexEntry], base_id: i64) {
    let mut last_id = base_id;
    let mut last_offset = 0;
    for entry in index {
        bytes.push(entry.key.osm_type.tag());
        write_varint(bytes, entry.key.id.wrapping_sub(last_id));
        write_uvarint(bytes, (entry.offset - last_offset) as u64);
        last_id = entry.key.id;
        last_offset = entry.offset;
    }
}

fn read_entries(reader: &mut ByteReader<'_>, count: usize, base_id: i64) -> Result<Vec<IndexEntry>> {
    // every entry takes at least three bytes
    if count > reader.remaining() / 3 {
        return Err(Error::CorruptContainer(format!("{} index entries do not fit", count)));
    }
    let mut index = Vec::with_capacity(count);
    let mut last_id = base_id;
    let mut last_offset: usize = 0;
    for position in 0..count {
        let osm_type = OsmType::from_tag(i64::from(reader.read_u8().map_err(corrupt)?)).map_err(corrupt)?;
        let id = last_id.wrapping_add(reader.read_varint().map_err(corrupt)?);
        let delta = reader.read_uvarint().map_err(corrupt)?;
        let offset = usize::try_from(delta)
            .ok()
            .and_then(|delta| last_offset.checked_add(delta))
            .ok_or_else(|| Error::CorruptContainer(format!("index entry {} has offset out of range", position)))?;

        let entry = IndexEntry { key: EntityKey::new(osm_type, id), offset };
        if let Some(previous) = index.last() {
            check_order(previous, &entry, position)?;
        } else if offset != 0 {
            return Err(Error::CorruptContainer(format!("first entity starts at {} instead of 0", offset)));
        }
        last_id = id;
        last_offset = offset;
        index.push(entry);
    }
    Ok(index)
}

fn check_order(previous: &IndexEntry, entry: &IndexEntry, position: usize) -> Result<()> {
    if previous.key >= entry.key {
        return Err(Error::CorruptContainer(format!(
            "index entry {} ({} {}) is not after {} {}",
            position, entry.key.osm_type, entry.key.id, previous.key.osm_type, previous.key.id
        )));
    }
    if previous.offset >= entry.offset {
        return Err(Error::CorruptContainer(format!("index entry {} has non-increasing offset {}", position, entry.offset)));
    }
    Ok(())
}

fn corrupt(err: Error) -> Error {
    match err {
        Error::CorruptContainer(_) => err,
        other => Error::CorruptContainer(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerBuilder;
    use crate::data::osm::{Payload, RawEntity, RawMember, RawVersion};
    use crate::grid::Coordinate;

    fn container() -> GridContainer {
        let node = |id, lon, lat| {
            RawEntity::new(
                OsmType::Node,
                id,
                vec![RawVersion {
                    version: 1,
                    visible: true,
                    timestamp: 1_400_000_000,
                    changeset: 10,
                    user_id: 4,
                    tags: vec![],
                    payload: Payload::Node(Coordinate::new(lon, lat)),
                }],
            )
        };
        let way = RawEntity::new(
            OsmType::Way,
            300,
            vec![RawVersion {
                version: 3,
                visible: true,
                timestamp: 1_500_000_000,
                changeset: 11,
                user_id: 4,
                tags: vec![(2, 9)],
                payload: Payload::Members(vec![RawMember::node(17), RawMember::node(12), RawMember::node(17)]),
            }],
        );
        ContainerBuilder::new(CellId::new(10, 700_000), OsmType::Way)
            .build(vec![way, node(12, -5, 5), node(17, -6, 7)])
            .unwrap()
    }

    #[test]
    fn test_bytes_round_trip() {
        let container = container();
        let bytes = container.to_bytes();
        assert_eq!(&bytes[..4], b"OSHG");

        let parsed = GridContainer::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, container);
        let way = parsed.get(300).unwrap().unwrap();
        assert!(way.has_key(2));
        let record = way.versions().next().unwrap().unwrap();
        let ids: Vec<_> = record.members().iter().map(|m| parsed.resolve(m).entity().unwrap().id()).collect();
        assert_eq!(ids, vec![17, 12, 17]);
    }

    #[test]
    fn test_rejects_damaged_header() {
        let bytes = container().to_bytes();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(GridContainer::from_bytes(&bad_magic), Err(Error::CorruptContainer(_))));

        let mut bad_cell = bytes.clone();
        bad_cell[5] = 2;
        assert!(matches!(GridContainer::from_bytes(&bad_cell), Err(Error::CorruptContainer(_))));

        assert!(matches!(GridContainer::from_bytes(&bytes[..20]), Err(Error::CorruptContainer(_))));
        assert!(GridContainer::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_rejects_unsorted_index() {
        let container = container();
        let mut index = container.index().to_vec();
        index.swap(0, 1);
        index[0].offset = 0;
        index[1].offset = container.index()[0].offset.max(1);
        let shuffled = GridContainer::from_parts(container.cell(), container.osm_type(), container.base(), index, container.data().to_vec());
        assert!(matches!(GridContainer::from_bytes(&shuffled.to_bytes()), Err(Error::CorruptContainer(_))));
    }

    #[test]
    fn test_rejects_count_beyond_input() {
        let mut bytes = container().to_bytes();
        // entity count follows 4 + 1 + 1 + 8 + 1 + 32 + 4 header bytes
        bytes[51..55].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(GridContainer::from_bytes(&bytes), Err(Error::CorruptContainer(_))));
    }

    #[test]
    fn test_relocation_tables_round_trip() {
        let original = container();
        let compacted = original.compact().unwrap().compact().unwrap();
        let parsed = GridContainer::from_bytes(&compacted.to_bytes()).unwrap();
        assert_eq!(parsed, compacted);
        assert_eq!(parsed.generation(), 2);
        assert_eq!(parsed.relocations()[0], original.index());

        // members decoded from the first layout still find their nodes
        let record = original.get(300).unwrap().unwrap().versions().next().unwrap().unwrap();
        let ids: Vec<_> = record.members().iter().map(|m| parsed.member_id(m)).collect();
        assert_eq!(ids, vec![Some(17), Some(12), Some(17)]);
    }

    #[test]
    fn test_rejects_generation_without_tables() {
        let mut bytes = container().to_bytes();
        bytes[47..51].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(GridContainer::from_bytes(&bytes), Err(Error::CorruptContainer(_))));
    }

    #[test]
    fn test_empty_container_round_trips() {
        let empty = ContainerBuilder::new(CellId::new(0, 0), OsmType::Node).build(vec![]).unwrap();
        let parsed = GridContainer::from_bytes(&empty.to_bytes()).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.cell(), CellId::new(0, 0));
    }
}
