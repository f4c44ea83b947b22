//! Pass H: assign constant drivers for fields a sink requires that its
//! source does not produce. Runs after carriage propagation and bit
//! packing, so every logical field that will ever need a constant is
//! already present (as a non-local, non-const passthrough) on the sink.

use tracing::instrument;

use crate::error::{CompileError, Result};
use crate::ir::netlist::{ConnectionId, PortId};
use crate::ir::system::System;

const READY: &str = "ready";
const FLOW_ID: &str = "flow_id";

#[instrument(level = "debug", skip_all)]
pub fn resolve_defaults(system: &mut System, strict: bool) -> Result<()> {
    for conn_id in system.netlist.data_connections() {
        resolve_connection(system, conn_id, strict)?;
    }
    Ok(())
}

fn resolve_connection(system: &mut System, conn_id: ConnectionId, strict: bool) -> Result<()> {
    let src = system.netlist.connections[conn_id].src;
    let sinks = system.netlist.connections[conn_id].sinks.clone();
    for sink in sinks {
        let sink_fields: Vec<String> = system.netlist.ports[sink].protocol.logical.keys().cloned().collect();
        for f in &sink_fields {
            if f == READY {
                continue; // ready is handled from the source side below.
            }
            if system.netlist.ports[src].protocol.logical.contains_key(f) {
                continue; // produced upstream: nothing to default.
            }
            match f.as_str() {
                "valid" | "sop" | "eop" => set_const(system, sink, f, 1),
                _ if f == FLOW_ID => {
                    let incoming = system.netlist.ports[sink].flows.clone();
                    if incoming.len() == 1 {
                        let id_num = system.netlist.flows[incoming[0]].id_num as i64;
                        set_const(system, sink, f, id_num);
                    }
                    // Otherwise leave non-const: more than one Flow reaches
                    // this sink and there is no single id to default to.
                }
                _ if strict => {
                    return Err(CompileError::protocol(format!(
                        "field `{f}` required by sink port is neither produced upstream nor defaulted"
                    )));
                }
                _ => {} // left is_const=false; the emitter treats it as unconnected.
            }
        }
        if sink_fields.iter().any(|f| f == READY) && !system.netlist.ports[src].protocol.logical.contains_key(READY) {
            set_const(system, src, READY, 1);
        }
    }
    Ok(())
}

fn set_const(system: &mut System, port: PortId, field: &str, value: i64) {
    if let Some(state) = system.netlist.ports[port].protocol.state.get_mut(field) {
        state.is_const = true;
        state.const_value = Some(value);
    }
}
