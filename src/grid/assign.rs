use crate::errors::{Error, Result};

use super::cell_id::{CellId, MAX_ZOOM};
use super::coords::BoundingBox;
use super::zgrid::Grid;

pub const DEFAULT_MAX_ZOOM: u8 = 15;
pub const DEFAULT_MAX_CELLS_PER_AXIS: i64 = 2;

/// Picks the storage cell of an entity from its bounding box.
///
/// Small entities go to the finest zoom, large ones climb until the box
/// touches at most `max_cells_per_axis` columns and rows. The entity is
/// stored in the cell of its south-west corner, which is why queries
/// enlarge their covering towards the south-west.
#[derive(Debug, Clone, Copy)]
pub struct CellAssigner {
    max_zoom: u8,
    max_cells_per_axis: i64,
}

impl CellAssigner {
    pub fn new(max_zoom: u8, max_cells_per_axis: i64) -> Result<Self> {
        if max_zoom > MAX_ZOOM {
            return Err(Error::ZoomOutOfRange(max_zoom));
        }
        if max_cells_per_axis < 1 {
            return Err(format!("cell budget must be at least 1, got {}", max_cells_per_axis).into());
        }
        Ok(CellAssigner { max_zoom, max_cells_per_axis })
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn assign(&self, bbox: &BoundingBox) -> CellId {
        let corner = bbox.south_west();
        for zoom in (0..=self.max_zoom).rev() {
            let Ok(grid) = Grid::new(zoom) else { continue };
            let (columns, rows) = grid.span(bbox);
            if columns <= self.max_cells_per_axis && rows <= self.max_cells_per_axis {
                return grid.cell_for(corner);
            }
        }
        CellId::new(0, 0)
    }
}

impl Default for CellAssigner {
    fn default() -> Self {
        CellAssigner {
            max_zoom: DEFAULT_MAX_ZOOM,
            max_cells_per_axis: DEFAULT_MAX_CELLS_PER_AXIS,
        }
    }
}
