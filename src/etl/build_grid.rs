use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::UserConfig;
use crate::container::{ContainerBuilder, GridContainer};
use crate::data::osm::{EntityKey, OsmType, RawEntity};
use crate::data::OsmHistory;
use crate::errors::Result;
use crate::grid::{BoundingBox, CellAssigner, CellId};

use super::parse_history;
use super::Etl;

pub const ETL_NAME: &str = "build_grid";
pub const SUMMARY_FILE_NAME: &str = "grid_summary.json";
pub const GRID_DIR_NAME: &str = "grid";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub cell: CellId,
    pub osm_type: String,
    pub file: String,
    pub entities: usize,
    pub bytes: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GridSummary {
    pub max_zoom: u8,
    pub max_cells_per_axis: i64,
    /// Entities without any position, left out of the grid.
    pub skipped: usize,
    pub containers: Vec<ContainerSummary>,
}

/// Containers ready to be written, in (cell, type) order.
pub struct BuiltGrid {
    pub containers: Vec<GridContainer>,
    pub skipped: usize,
}

/// Entities per container, before encoding.
pub type GridPlan = BTreeMap<(CellId, OsmType), BTreeSet<EntityKey>>;

/// Turns the cached history into one container file per (cell, type).
pub struct BuildGridEtl<'a> {
    config: &'a UserConfig,
}

pub fn container_file_name(cell: CellId, osm_type: OsmType) -> String {
    format!("{}_{}_{}.grid", cell.zoom(), cell.id(), osm_type.name())
}

pub fn grid_dir(dir: &Path) -> PathBuf {
    dir.join(GRID_DIR_NAME)
}

/// Reads one container written by [`BuildGridEtl`], if there is one for the
/// cell and type.
pub fn load_container(dir: &Path, cell: CellId, osm_type: OsmType) -> Result<Option<GridContainer>> {
    let path = grid_dir(dir).join(container_file_name(cell, osm_type));
    if !path.exists() {
        return Ok(None);
    }
    GridContainer::from_bytes(&fs::read(path)?).map(Some)
}

/// Bounding box of every entity over its whole history. Ways take the boxes
/// of their nodes and relations those of their node and way members, so
/// nodes are handled before ways before relations.
pub fn entity_bounds(history: &OsmHistory) -> HashMap<EntityKey, BoundingBox> {
    let mut bounds: HashMap<EntityKey, BoundingBox> = HashMap::with_capacity(history.entity_count());

    for node in &history.nodes {
        let bbox = node
            .coordinates()
            .filter_map(|coordinate| BoundingBox::point(coordinate).ok())
            .reduce(|a, b| a.union_shortest(&b));
        if let Some(bbox) = bbox {
            bounds.insert(node.key(), bbox);
        }
    }
    for entity in history.ways.iter().chain(&history.relations) {
        let bbox = entity
            .members()
            .filter(|member| member.osm_type != OsmType::Relation)
            .filter_map(|member| bounds.get(&EntityKey::new(member.osm_type, member.id)))
            .copied()
            .reduce(|a, b| a.union_shortest(&b));
        if let Some(bbox) = bbox {
            bounds.insert(entity.key(), bbox);
        }
    }
    bounds
}

/// Groups entities by assigned cell. With `embed_members`, ways also carry
/// their nodes, and relations their node and way members.
pub fn plan_grid(history: &OsmHistory, bounds: &HashMap<EntityKey, BoundingBox>, assigner: &CellAssigner, embed_members: bool) -> GridPlan {
    let known: BTreeSet<EntityKey> = bounds.keys().copied().collect();
    let mut plan = GridPlan::new();

    for entity in history.nodes.iter().chain(&history.ways).chain(&history.relations) {
        let Some(bbox) = bounds.get(&entity.key()) else { continue };
        let keys = plan.entry((assigner.assign(bbox), entity.osm_type)).or_default();
        keys.insert(entity.key());
        if embed_members {
            keys.extend(
                entity
                    .members()
                    .map(|member| EntityKey::new(member.osm_type, member.id))
                    .filter(|key| key.osm_type != OsmType::Relation && known.contains(key)),
            );
        }
    }
    plan
}

/// Encodes every planned container in parallel.
pub fn build_containers(history: &OsmHistory, plan: GridPlan, compact: bool) -> Result<Vec<GridContainer>> {
    let entities: HashMap<EntityKey, &RawEntity> = history
        .nodes
        .iter()
        .chain(&history.ways)
        .chain(&history.relations)
        .map(|entity| (entity.key(), entity))
        .collect();

    plan.into_par_iter()
        .map(|((cell, osm_type), keys)| {
            let members = keys
                .iter()
                .filter_map(|key| entities.get(key).map(|entity| (*entity).clone()))
                .collect();
            let container = ContainerBuilder::new(cell, osm_type).build(members)?;
            if compact {
                container.compact()
            } else {
                Ok(container)
            }
        })
        .collect()
}

impl BuildGridEtl<'_> {
    pub fn new(config: &UserConfig) -> BuildGridEtl {
        BuildGridEtl { config }
    }

    fn summary_path(dir: &Path) -> PathBuf {
        dir.join(SUMMARY_FILE_NAME)
    }
}

impl Etl for BuildGridEtl<'_> {
    type Input = OsmHistory;
    type Output = BuiltGrid;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(Self::summary_path(dir).exists())
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        if Self::summary_path(dir).exists() {
            fs::remove_file(Self::summary_path(dir))?;
        }
        if grid_dir(dir).exists() {
            fs::remove_dir_all(grid_dir(dir))?;
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        parse_history::load_history(dir)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let assigner = self.config.assigner()?;
        let bounds = entity_bounds(&input);
        let skipped = input.entity_count() - bounds.len();
        if skipped > 0 {
            warn!(etl_name = ETL_NAME, skipped = skipped; "Entities without position left out of the grid");
        }

        let plan = plan_grid(&input, &bounds, &assigner, self.config.embed_members);
        info!(etl_name = ETL_NAME, containers = plan.len(), entities = bounds.len(); "Planned grid");
        let containers = build_containers(&input, plan, self.config.compact)?;
        Ok(BuiltGrid { containers, skipped })
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let grid_dir = grid_dir(dir);
        fs::create_dir_all(&grid_dir)?;

        let mut summaries = Vec::with_capacity(output.containers.len());
        for container in tqdm::tqdm(output.containers.iter()) {
            let file = container_file_name(container.cell(), container.osm_type());
            let bytes = container.to_bytes();
            File::create(grid_dir.join(&file))?.write_all(&bytes)?;
            summaries.push(ContainerSummary {
                cell: container.cell(),
                osm_type: container.osm_type().name().to_string(),
                file,
                entities: container.len(),
                bytes: bytes.len(),
            });
        }

        let summary = GridSummary {
            max_zoom: self.config.max_zoom,
            max_cells_per_axis: self.config.max_cells_per_axis,
            skipped: output.skipped,
            containers: summaries,
        };
        let mut writer = BufWriter::new(File::create(Self::summary_path(dir))?);
        serde_json::to_writer_pretty(&mut writer, &summary)?;
        writer.flush()?;
        Ok(())
    }
}
