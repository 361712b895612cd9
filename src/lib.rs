//! Spatially partitioned, delta-compressed storage for OpenStreetMap edit
//! histories.
//!
//! Entities are assigned to cells of a hierarchical equal-angle grid
//! ([`grid`]), their version histories are delta coded ([`codec`]) and the
//! entities of one cell are packed into a [`container::GridContainer`].

pub mod codec;
pub mod config;
pub mod container;
pub mod data;
pub mod errors;
pub mod etl;
pub mod grid;
