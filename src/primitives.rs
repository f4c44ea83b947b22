//! The library primitive catalog: interface contracts for arb, merge,
//! split, reg, clock-cross and flow-converter. The catalog is explicit
//! data handed to the compile driver — no static initializers or hidden
//! global registration, unlike the original system's macro-time
//! registration pattern.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ir::netlist::NodeKind;

/// Area/usage metrics a primitive may optionally report, summed across the
/// nodes instantiated from it: lookup tables, registers, and distributed
/// RAM usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaMetrics {
    pub luts: u64,
    pub regs: u64,
    pub dist_ram: u64,
}

impl std::ops::Add for AreaMetrics {
    type Output = AreaMetrics;
    fn add(self, rhs: AreaMetrics) -> AreaMetrics {
        AreaMetrics {
            luts: self.luts + rhs.luts,
            regs: self.regs + rhs.regs,
            dist_ram: self.dist_ram + rhs.dist_ram,
        }
    }
}

impl std::ops::AddAssign for AreaMetrics {
    fn add_assign(&mut self, rhs: AreaMetrics) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for AreaMetrics {
    fn sum<I: Iterator<Item = AreaMetrics>>(iter: I) -> Self {
        iter.fold(AreaMetrics::default(), |a, b| a + b)
    }
}

/// One entry in the catalog: the contract the topology realizer and
/// register inserter check node construction against, plus optional
/// per-instance metrics.
#[derive(Debug, Clone)]
pub struct PrimitiveSpec {
    pub kind: NodeKind,
    pub name: &'static str,
    /// Fixed port arity for this kind, or `None` for variable fan-in/out
    /// (`Split`, `Merge`).
    pub fixed_arity: Option<usize>,
    pub metrics: Option<AreaMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<PrimitiveSpec>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog every driver uses unless the caller supplies a custom
    /// one: no metrics, the arity contracts fixed by this compiler's own
    /// node-kind conventions.
    pub fn builtin() -> Self {
        let mut c = Catalog::new();
        c.register(PrimitiveSpec { kind: NodeKind::Split, name: "split", fixed_arity: None, metrics: None });
        c.register(PrimitiveSpec { kind: NodeKind::Merge, name: "merge", fixed_arity: None, metrics: None });
        c.register(PrimitiveSpec { kind: NodeKind::Register, name: "reg", fixed_arity: Some(2), metrics: None });
        c.register(PrimitiveSpec { kind: NodeKind::ClockCross, name: "clock_cross", fixed_arity: Some(2), metrics: None });
        c.register(PrimitiveSpec { kind: NodeKind::FlowConvert, name: "flow_convert", fixed_arity: Some(2), metrics: None });
        c
    }

    pub fn register(&mut self, spec: PrimitiveSpec) {
        self.entries.push(spec);
    }

    pub fn get(&self, kind: NodeKind) -> Option<&PrimitiveSpec> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Check a just-constructed node's port count against its catalog
    /// entry's `fixed_arity`, if the kind has one and is even registered
    /// (an unregistered kind, or one with variable arity, has nothing to
    /// violate). Returns that entry's `AreaMetrics` so the caller can
    /// accumulate it onto `System::area_metrics`.
    pub fn validate_arity(&self, kind: NodeKind, node_name: &str, port_count: usize) -> Result<Option<AreaMetrics>> {
        let Some(entry) = self.get(kind) else {
            return Ok(None);
        };
        if let Some(arity) = entry.fixed_arity {
            if port_count != arity {
                return Err(crate::error::CompileError::topology(format!(
                    "node `{node_name}` ({}) has {port_count} ports, catalog entry requires {arity}",
                    entry.name
                )));
            }
        }
        Ok(entry.metrics)
    }
}
