//! The compile driver: runs the fixed pass pipeline
//! B -> C -> D -> E -> F -> G -> H, then answers latency queries (I), and
//! hands the finalized `System` to an optional external emitter. This is
//! the only place that knows the pass order; individual passes never call
//! each other.

use std::path::{Path, PathBuf};

use crate::dot;
use crate::error::{CompileError, Result};
use crate::ir::component::ComponentRegistry;
use crate::ir::system::System;
use crate::passes::{carriage, clock_assign, convert, defaults, elaborate, register_insert, topology};
use crate::primitives::Catalog;
use crate::query;

/// Options that change pipeline behavior without changing its shape.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Guards pass F: pipeline every Merge output.
    pub register_merge: bool,
    /// Guards pass H's `ProtocolError`: when set, a field a sink requires
    /// that is neither produced nor defaulted is a hard error instead of
    /// being left unconnected for the emitter.
    pub strict_fields: bool,
    /// When set, write the finalized point-to-point netlist as a Graphviz
    /// `.dot` file once the pipeline finishes.
    pub emit_p2p_dot: Option<PathBuf>,
    /// When set, write the input topology graph as a Graphviz `.dot` file
    /// once the pipeline finishes.
    pub emit_topo_dot: Option<PathBuf>,
}

/// The out-of-scope input parser: consumes some external representation
/// and produces a populated `System` plus the component registry it
/// references. The core ships one trivial implementation,
/// [`crate::spec_source::JsonSpecSource`]; this trait exists so the core
/// can be driven and tested without depending on any particular
/// hardware description language.
pub trait SpecSource {
    fn load(&self, path: &Path) -> Result<(ComponentRegistry, System)>;
}

/// The out-of-scope RTL emitter: consumes the finalized netlist and
/// produces source text. No implementation ships; `compile` accepts
/// `Option<&dyn NetlistEmitter>` and simply skips emission when absent,
/// since the finalized `System` is itself a complete, useful return value
/// for library callers and tests.
pub trait NetlistEmitter {
    fn emit(&self, system: &System) -> Result<String>;
}

/// Run the full pipeline over an already-populated `System`, in place,
/// then return it. Stops at the first error: no errors are recovered
/// from inside a pass. `catalog` is consulted by `passes::topology` and
/// `passes::register_insert` to validate the port arity of every node
/// they construct and, where it supplies `AreaMetrics`, accumulate them
/// onto `system.area_metrics`; pass [`Catalog::builtin`] for the stock
/// arity contracts with no metrics.
pub fn compile(
    mut system: System,
    registry: &ComponentRegistry,
    catalog: &Catalog,
    options: &CompileOptions,
) -> Result<System> {
    elaborate::elaborate(&mut system, registry)?;
    topology::realize_topology(&mut system, catalog)?;
    convert::insert_converters(&mut system, registry)?;
    clock_assign::assign_clocks(&mut system)?;
    register_insert::insert_registers(&mut system, catalog, options.register_merge)?;
    carriage::propagate_and_pack(&mut system)?;
    defaults::resolve_defaults(&mut system, options.strict_fields)?;
    query::run_latency_queries(&mut system)?;

    if let Some(path) = &options.emit_p2p_dot {
        write_dot(path, dot::netlist_to_dot(&system))?;
    }
    if let Some(path) = &options.emit_topo_dot {
        write_dot(path, dot::topology_to_dot(&system))?;
    }

    Ok(system)
}

fn write_dot(path: &Path, contents: String) -> Result<()> {
    std::fs::write(path, contents)
        .map_err(|e| CompileError::spec(format!("writing `{}`: {e}", path.display())))
}
