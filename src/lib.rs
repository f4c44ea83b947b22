//! `interconnect-compile`: elaborates a component/link/topology
//! description into a point-to-point netlist with assigned clock domains,
//! inserted converters/registers, and packed wire protocols.
//!
//! The pipeline is a fixed sequence of passes over a single mutable
//! [`ir::system::System`], driven by [`driver::compile`]. Each pass module
//! under [`passes`] corresponds to one lettered stage of the pipeline.

pub mod dot;
pub mod driver;
pub mod error;
pub mod expr;
pub mod ir;
pub mod netutil;
pub mod passes;
pub mod primitives;
pub mod query;
pub mod spec_source;
