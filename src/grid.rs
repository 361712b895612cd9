pub mod assign;
pub mod cell_id;
pub mod coords;
pub mod zgrid;

pub use self::assign::CellAssigner;
pub use self::cell_id::{CellId, MAX_ZOOM};
pub use self::coords::{BoundingBox, Coordinate};
pub use self::zgrid::Grid;
