use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::Result;
use crate::grid::assign::{DEFAULT_MAX_CELLS_PER_AXIS, DEFAULT_MAX_ZOOM};
use crate::grid::CellAssigner;

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// OSM full-history XML, optionally xz compressed.
    pub data_path: String,
    /// Directory receiving the cache and the grid files.
    pub dest_path: String,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default = "default_max_cells_per_axis")]
    pub max_cells_per_axis: i64,
    /// Store copies of member histories next to the ways and relations using them.
    #[serde(default = "default_true")]
    pub embed_members: bool,
    #[serde(default)]
    pub compact: bool,
}

fn default_max_zoom() -> u8 {
    DEFAULT_MAX_ZOOM
}

fn default_max_cells_per_axis() -> i64 {
    DEFAULT_MAX_CELLS_PER_AXIS
}

fn default_true() -> bool {
    true
}

impl UserConfig {
    pub fn load(path: &Path) -> Result<UserConfig> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn assigner(&self) -> Result<CellAssigner> {
        CellAssigner::new(self.max_zoom, self.max_cells_per_axis)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.dest_path)
    }
}
