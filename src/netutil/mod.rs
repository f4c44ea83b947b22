//! Shared netlist/graph services: a generic typed graph layered on
//! `petgraph`, plus min-cut and multiway-cut, used by the clock assigner.
//! The only contract is determinism — tie-break by id — so the synthesized
//! output is reproducible bit-for-bit.

pub mod graph;
pub mod mincut;

pub use graph::{connected_components, dijkstra};
pub use mincut::{min_cut, multiway_cut};
