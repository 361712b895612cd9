use std::collections::BTreeMap;

use log::debug;

use crate::codec::record::BaseValues;
use crate::data::osm::{EntityKey, OsmType, RawEntity};
use crate::errors::{Error, Result};
use crate::grid::{CellId, Coordinate, Grid};

use super::entity::encode_entity;
use super::{GridContainer, IndexEntry};

/// Writes a set of entity histories into one [`GridContainer`].
///
/// Entities are written in [`EntityKey`] order and each one only sees the
/// entities written before it, so a member that sorts later than its owner
/// is stored as an external id.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    cell: CellId,
    osm_type: OsmType,
    base: Option<BaseValues>,
}

impl ContainerBuilder {
    pub fn new(cell: CellId, osm_type: OsmType) -> Self {
        ContainerBuilder { cell, osm_type, base: None }
    }

    /// Fixes the base values instead of deriving them from the first entity.
    pub fn with_base(mut self, base: BaseValues) -> Self {
        self.base = Some(base);
        self
    }

    pub fn build(&self, mut entities: Vec<RawEntity>) -> Result<GridContainer> {
        entities.sort_by_key(RawEntity::key);
        if let Some(pair) = entities.windows(2).find(|pair| pair[0].key() == pair[1].key()) {
            return Err(Error::DuplicateEntity { osm_type: pair[0].osm_type, id: pair[0].id });
        }
        for entity in &mut entities {
            if entity.versions.is_empty() {
                return Err(Error::EmptyHistory { osm_type: entity.osm_type, id: entity.id });
            }
            entity.versions.sort_by_key(|version| version.version);
        }

        let base = self.base.unwrap_or_else(|| self.default_base(&entities));
        let mut offsets: BTreeMap<EntityKey, usize> = BTreeMap::new();
        let mut index = Vec::with_capacity(entities.len());
        let mut data = Vec::new();
        let mut external_refs = 0;

        for entity in &entities {
            let offset = data.len();
            let (bytes, external) = encode_entity(entity, base, &offsets)?;
            data.extend_from_slice(&bytes);
            external_refs += external;
            offsets.insert(entity.key(), offset);
            index.push(IndexEntry { key: entity.key(), offset });
        }

        debug!(
            cell = self.cell.to_string().as_str(),
            osm_type = self.osm_type.name(),
            entities = index.len(),
            bytes = data.len(),
            external_refs = external_refs;
            "Built grid container"
        );
        Ok(GridContainer::from_parts(self.cell, self.osm_type, base, index, data))
    }

    /// First entity's id and first timestamp, and the first coordinate seen.
    /// Containers without nodes fall back to the cell's south-west corner.
    fn default_base(&self, entities: &[RawEntity]) -> BaseValues {
        let first = entities.first();
        let coordinate = entities
            .iter()
            .find_map(|entity| entity.coordinates().next())
            .or_else(|| self.cell_corner())
            .unwrap_or_default();
        BaseValues {
            id: first.map_or(0, |entity| entity.id),
            timestamp: first.and_then(|entity| entity.versions.first()).map_or(0, |version| version.timestamp),
            lon: coordinate.lon,
            lat: coordinate.lat,
        }
    }

    fn cell_corner(&self) -> Option<Coordinate> {
        let bounds = Grid::new(self.cell.zoom()).and_then(|grid| grid.bounds_of(self.cell)).ok()?;
        Some(bounds.south_west())
    }
}

/// Decodes every entity and rebuilds the container around median base
/// values. Ids, histories and member targets are preserved. Offsets move,
/// so the old index is kept as a relocation table: a member decoded before
/// compaction still resolves to the entity it referenced.
pub fn compact(container: &GridContainer) -> Result<GridContainer> {
    let mut entities = Vec::with_capacity(container.len());
    for entity in container.iter() {
        entities.push(entity?.to_raw()?);
    }

    let fallback = container.base();
    let coordinates: Vec<Coordinate> = entities.iter().filter_map(|entity| entity.coordinates().next()).collect();
    let base = BaseValues {
        id: median(entities.iter().map(|entity| entity.id).collect()).unwrap_or(fallback.id),
        timestamp: median(entities.iter().filter_map(|entity| entity.versions.first()).map(|v| v.timestamp).collect())
            .unwrap_or(fallback.timestamp),
        lon: median(coordinates.iter().map(|c| c.lon).collect()).unwrap_or(fallback.lon),
        lat: median(coordinates.iter().map(|c| c.lat).collect()).unwrap_or(fallback.lat),
    };

    let mut relocations = container.relocations().to_vec();
    relocations.push(container.index().to_vec());
    let compacted = ContainerBuilder::new(container.cell(), container.osm_type())
        .with_base(base)
        .build(entities)?
        .with_relocations(relocations);
    debug!(
        cell = container.cell().to_string().as_str(),
        generation = compacted.generation(),
        before = container.data().len(),
        after = compacted.data().len();
        "Compacted grid container"
    );
    Ok(compacted)
}

fn median(mut values: Vec<i64>) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    Some(values[values.len() / 2])
}
