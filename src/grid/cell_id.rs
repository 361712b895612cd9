use std::fmt;

use serde::{Deserialize, Serialize};

/// Finest supported zoom; column and row need 30 bits each.
pub const MAX_ZOOM: u8 = 30;

/// Finest zoom whose id still fits below the zoom byte of a packed id.
pub const MAX_PACKED_ZOOM: u8 = 28;

const PACKED_ID_BITS: u32 = 56;
const PACKED_ID_MASK: u64 = (1 << PACKED_ID_BITS) - 1;

/// A grid cell: Morton code of (column, row) at a zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId {
    zoom: u8,
    id: i64,
}

impl CellId {
    /// Id of the cell out-of-range coordinates are sent to.
    pub const SENTINEL: i64 = -1;

    pub const fn new(zoom: u8, id: i64) -> Self {
        CellId { zoom, id }
    }

    pub const fn sentinel(zoom: u8) -> Self {
        CellId { zoom, id: Self::SENTINEL }
    }

    pub fn from_column_row(zoom: u8, column: u32, row: u32) -> Self {
        CellId { zoom, id: interleave(column, row) as i64 }
    }

    pub const fn zoom(&self) -> u8 {
        self.zoom
    }

    pub const fn id(&self) -> i64 {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.zoom <= MAX_ZOOM && self.id >= 0 && (self.id as u64) < 1u64 << (2 * u32::from(self.zoom))
    }

    pub fn column_row(&self) -> Option<(u32, u32)> {
        self.is_valid().then(|| deinterleave(self.id as u64))
    }

    /// The cell one zoom level up that contains this one.
    pub fn parent(&self) -> Option<CellId> {
        if !self.is_valid() || self.zoom == 0 {
            return None;
        }
        Some(CellId { zoom: self.zoom - 1, id: self.id >> 2 })
    }

    /// Single-word form with the zoom in the top byte.
    pub fn to_packed(&self) -> Option<u64> {
        if !self.is_valid() || self.zoom > MAX_PACKED_ZOOM {
            return None;
        }
        Some(u64::from(self.zoom) << PACKED_ID_BITS | self.id as u64)
    }

    pub fn from_packed(packed: u64) -> CellId {
        CellId {
            zoom: (packed >> PACKED_ID_BITS) as u8,
            id: (packed & PACKED_ID_MASK) as i64,
        }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zoom, self.id)
    }
}

fn spread(value: u32) -> u64 {
    let mut x = u64::from(value);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    (x | (x << 1)) & 0x5555_5555_5555_5555
}

fn squash(value: u64) -> u32 {
    let mut x = value & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    ((x | (x >> 16)) & 0x0000_0000_FFFF_FFFF) as u32
}

/// Column bits land on even positions, row bits on odd ones.
pub fn interleave(column: u32, row: u32) -> u64 {
    spread(column) | (spread(row) << 1)
}

pub fn deinterleave(code: u64) -> (u32, u32) {
    (squash(code), squash(code >> 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_bit_layout() {
        assert_eq!(interleave(0, 0), 0);
        assert_eq!(interleave(1, 0), 0b01);
        assert_eq!(interleave(0, 1), 0b10);
        assert_eq!(interleave(0b11, 0b10), 0b1101);
        assert_eq!(deinterleave(0b1101), (0b11, 0b10));
    }

    #[test]
    fn test_interleave_inverse_at_limits() {
        let edge = (1u32 << MAX_ZOOM) - 1;
        for (column, row) in [(edge, 0), (0, edge), (edge, edge), (12345, 987654), (u32::MAX, u32::MAX)] {
            assert_eq!(deinterleave(interleave(column, row)), (column, row));
        }
    }

    #[test]
    fn test_parent_halves_column_and_row() {
        let cell = CellId::from_column_row(5, 13, 22);
        let parent = cell.parent().unwrap();
        assert_eq!(parent.zoom(), 4);
        assert_eq!(parent.column_row(), Some((6, 11)));
        assert_eq!(CellId::new(0, 0).parent(), None);
        assert_eq!(CellId::sentinel(3).parent(), None);
    }

    #[test]
    fn test_validity() {
        assert!(CellId::new(0, 0).is_valid());
        assert!(!CellId::new(0, 1).is_valid());
        assert!(CellId::new(2, 15).is_valid());
        assert!(!CellId::new(2, 16).is_valid());
        assert!(!CellId::sentinel(2).is_valid());
        assert!(!CellId::new(MAX_ZOOM + 1, 0).is_valid());
    }

    #[test]
    fn test_packed_form() {
        let cell = CellId::from_column_row(MAX_PACKED_ZOOM, (1 << 28) - 1, 77);
        let packed = cell.to_packed().unwrap();
        assert_eq!(packed >> 56, u64::from(MAX_PACKED_ZOOM));
        assert_eq!(CellId::from_packed(packed), cell);
        assert_eq!(CellId::new(MAX_ZOOM, 0).to_packed(), None);
        assert_eq!(CellId::sentinel(4).to_packed(), None);
    }
}
