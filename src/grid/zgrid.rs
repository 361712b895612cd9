//! Equal-angle grid with Z-order cell ids.
//!
//! Zoom `z` splits longitude [-180, 180] and latitude [-90, 90] into `2^z`
//! columns and `2^z` rows each:
//!
//! ```text
//!   row 1 | 2 3       zoom 1, ids are Morton codes of (column, row)
//!   row 0 | 0 1
//!         +----
//!          col 0 1
//! ```
//!
//! A point on a northern or eastern border belongs to the next cell up or
//! right. Longitude +180 wraps around to column 0 and latitude +90 stays in
//! the top row, so every valid coordinate has exactly one cell.

use std::collections::BTreeSet;

use crate::errors::{Error, Result};

use super::cell_id::{CellId, MAX_ZOOM};
use super::coords::{BoundingBox, Coordinate, LAT_SPAN, LON_SPAN, MAX_LAT, MAX_LON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    zoom: u8,
    cells_per_axis: i64,
}

impl Grid {
    pub fn new(zoom: u8) -> Result<Grid> {
        if zoom > MAX_ZOOM {
            return Err(Error::ZoomOutOfRange(zoom));
        }
        Ok(Grid { zoom, cells_per_axis: 1 << zoom })
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn cells_per_axis(&self) -> i64 {
        self.cells_per_axis
    }

    /// Column without wrapping; +180 yields `cells_per_axis`.
    fn column(&self, lon: i64) -> i64 {
        (i128::from(lon + MAX_LON) * i128::from(self.cells_per_axis)).div_euclid(i128::from(LON_SPAN)) as i64
    }

    /// Row clamped into the grid, so +90 lands in the top row.
    fn row(&self, lat: i64) -> i64 {
        let row = (i128::from(lat + MAX_LAT) * i128::from(self.cells_per_axis)).div_euclid(i128::from(LAT_SPAN)) as i64;
        row.clamp(0, self.cells_per_axis - 1)
    }

    /// Cell of a point, or the sentinel cell if the point is off the map.
    pub fn cell_for(&self, coordinate: Coordinate) -> CellId {
        if !coordinate.is_valid() {
            return CellId::sentinel(self.zoom);
        }
        let column = self.column(coordinate.lon).rem_euclid(self.cells_per_axis);
        let row = self.row(coordinate.lat);
        CellId::from_column_row(self.zoom, column as u32, row as u32)
    }

    /// Inclusive bounds of a cell. Every coordinate inside maps back to it.
    pub fn bounds_of(&self, cell: CellId) -> Result<BoundingBox> {
        let invalid = Error::InvalidCell { zoom: cell.zoom(), id: cell.id() };
        if cell.zoom() != self.zoom {
            return Err(invalid);
        }
        let (column, row) = cell.column_row().ok_or(invalid)?;
        let (column, row) = (i64::from(column), i64::from(row));

        let lon_edge = |column: i64| ceil_div(column * LON_SPAN, self.cells_per_axis) - MAX_LON;
        let lat_edge = |row: i64| ceil_div(row * LAT_SPAN, self.cells_per_axis) - MAX_LAT;

        let max_lat = if row == self.cells_per_axis - 1 {
            MAX_LAT
        } else {
            lat_edge(row + 1) - 1
        };
        BoundingBox::new(lon_edge(column), lat_edge(row), lon_edge(column + 1) - 1, max_lat)
    }

    /// Cells intersecting `bbox`. With `enlarge`, one more column to the west
    /// and one more row to the south are added, which is where entities
    /// reaching into the box from outside are stored.
    pub fn cells_covering(&self, bbox: &BoundingBox, enlarge: bool) -> BTreeSet<CellId> {
        let mut cells = BTreeSet::new();
        for part in bbox.split_antimeridian() {
            let first_column = self.column(part.min_lon());
            let last_column = self.column(part.max_lon());
            let mut columns: BTreeSet<i64> = (first_column..=last_column)
                .map(|column| column.rem_euclid(self.cells_per_axis))
                .collect();

            let mut first_row = self.row(part.min_lat());
            let last_row = self.row(part.max_lat());
            if enlarge {
                columns.insert((first_column - 1).rem_euclid(self.cells_per_axis));
                first_row = (first_row - 1).max(0);
            }

            for row in first_row..=last_row {
                for &column in &columns {
                    cells.insert(CellId::from_column_row(self.zoom, column as u32, row as u32));
                }
            }
        }
        cells
    }

    /// The up to eight cells around `cell`. Columns wrap around the
    /// antimeridian; rows stop at the poles.
    pub fn neighbors_of(&self, cell: CellId) -> BTreeSet<CellId> {
        let mut neighbors = BTreeSet::new();
        let Some((column, row)) = cell.column_row().filter(|_| cell.zoom() == self.zoom) else {
            return neighbors;
        };
        let (column, row) = (i64::from(column), i64::from(row));
        for d_row in -1..=1 {
            let neighbor_row = row + d_row;
            if !(0..self.cells_per_axis).contains(&neighbor_row) {
                continue;
            }
            for d_column in -1..=1 {
                let neighbor_column = (column + d_column).rem_euclid(self.cells_per_axis);
                if (neighbor_column, neighbor_row) != (column, row) {
                    neighbors.insert(CellId::from_column_row(self.zoom, neighbor_column as u32, neighbor_row as u32));
                }
            }
        }
        neighbors
    }

    /// Number of columns and rows `bbox` touches, without splitting it at the
    /// antimeridian.
    pub(crate) fn span(&self, bbox: &BoundingBox) -> (i64, i64) {
        let columns = self.column(bbox.max_lon()) - self.column(bbox.min_lon()) + 1;
        let rows = self.row(bbox.max_lat()) - self.row(bbox.min_lat()) + 1;
        (columns, rows)
    }
}

fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1).div_euclid(denominator)
}
