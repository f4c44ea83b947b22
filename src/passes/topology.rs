//! Pass C: instantiate `Split`/`Merge` nodes from the topology graph, splice
//! the netlist connections between them, and attach each edge's flows and
//! links to both endpoint ports.

use std::collections::BTreeMap;

use tracing::instrument;

use crate::error::{CompileError, Result};
use crate::ir::component::{Direction, InterfaceType};
use crate::ir::netlist::{Node, NodeId, NodeKind, Port, PortId};
use crate::ir::system::{System, TopoNodeId, TopoNodeKind};
use crate::primitives::Catalog;

/// Ports are fully pre-allocated from the topology node's known fan-out
/// (`Split`) or fan-in (`Merge`) before any edge is resolved: a Split gets
/// k output data ports, a Merge gets k input data ports. Edge processing
/// then just claims the next free slot, in edge enumeration order, which
/// is what makes port allocation deterministic.
struct Realized {
    node_id: NodeId,
    /// Next unclaimed port index. For `Split` this walks `output_ports()`;
    /// for `Merge`, `merge_inputs()`.
    next_free: usize,
}

#[instrument(level = "debug", skip_all)]
pub fn realize_topology(system: &mut System, catalog: &Catalog) -> Result<()> {
    let topo_ids: Vec<TopoNodeId> = system.topology.nodes.keys().collect();
    let mut realized: BTreeMap<TopoNodeId, Realized> = BTreeMap::new();
    let mut split_count = 0u32;
    let mut merge_count = 0u32;

    for topo_id in &topo_ids {
        let kind = system.topology.nodes[*topo_id].kind;
        match kind {
            TopoNodeKind::Source => continue,
            TopoNodeKind::Split => {
                let fan_out = system.topology.fan_out(*topo_id);
                let name = format!("split_{split_count}");
                split_count += 1;
                let node_id = new_interconnect_node(system, name, NodeKind::Split);
                add_clock_port(system, node_id);
                add_data_port(system, node_id, "in", Direction::In);
                for i in 0..fan_out {
                    add_data_port(system, node_id, format!("out_{i}"), Direction::Out);
                }
                check_arity(system, catalog, node_id)?;
                realized.insert(*topo_id, Realized { node_id, next_free: 0 });
            }
            TopoNodeKind::Merge => {
                let fan_in = system.topology.fan_in(*topo_id);
                let name = format!("merge_{merge_count}");
                merge_count += 1;
                let node_id = new_interconnect_node(system, name, NodeKind::Merge);
                add_clock_port(system, node_id);
                for i in 0..fan_in {
                    add_data_port(system, node_id, format!("in_{i}"), Direction::In);
                }
                add_data_port(system, node_id, "out", Direction::Out);
                check_arity(system, catalog, node_id)?;
                realized.insert(*topo_id, Realized { node_id, next_free: 0 });
            }
        }
    }

    let edges = system.topology.edges_in_order().to_vec();
    for edge in &edges {
        let src_port = claim_source_port(system, &mut realized, edge.from)?;
        let sink_port = claim_sink_port(system, &mut realized, edge.to)?;
        system.netlist.connect(src_port, sink_port)?;

        for &link_idx in &edge.links {
            let flow_id = system.link_flows[link_idx];
            let src_target = system.links[link_idx].src.clone();
            let dst_target = system.links[link_idx].dst.clone();
            attach(system, src_port, flow_id, src_target);
            attach(system, sink_port, flow_id, dst_target);
        }
    }

    propagate_interconnect_port_types(system);
    seed_interconnect_widths(system);

    Ok(())
}

/// Every `Split`/`Merge` port is pre-allocated as `InterfaceType::Data`
/// (see `add_data_port`) since the real type isn't known until edges are
/// resolved. Correct it here by propagating each terminal's actual
/// interface type onto the interconnect ports that route it, the same
/// fixpoint shape as `seed_interconnect_widths`: a `Data` port is treated
/// as still-undetermined and only ever overwritten, never downgraded back
/// from whatever non-`Data` type (e.g. `Conduit`) is discovered — `Data`
/// is also the correct final answer for most ports, so there's nothing to
/// converge to beyond the first non-`Data` type found. This is what keeps
/// conduit traffic routed through a Split/Merge out of
/// `Netlist::data_connections()`, and so out of clock-crossing insertion,
/// converter insertion and default resolution, all of which iterate that
/// list.
fn propagate_interconnect_port_types(system: &mut System) {
    let conn_ids: Vec<_> = system.netlist.connections.keys().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for &conn_id in &conn_ids {
            let src = system.netlist.connections[conn_id].src;
            let src_ty = system.netlist.ports[src].ty;
            if src_ty == InterfaceType::Data {
                continue;
            }
            let sinks = system.netlist.connections[conn_id].sinks.clone();
            for sink in sinks {
                if system.netlist.nodes[system.netlist.node_of(sink)].kind.is_interconnect()
                    && system.netlist.ports[sink].ty != src_ty
                {
                    system.netlist.ports[sink].ty = src_ty;
                    changed = true;
                }
            }
        }
        for node_id in system.netlist.nodes.keys().collect::<Vec<_>>() {
            match system.netlist.nodes[node_id].kind {
                NodeKind::Split => {
                    let Some(input) = system.netlist.nodes[node_id].input_port() else { continue };
                    let outputs = system.netlist.nodes[node_id].output_ports().to_vec();
                    let known = [input]
                        .into_iter()
                        .chain(outputs.iter().copied())
                        .map(|p| system.netlist.ports[p].ty)
                        .find(|&ty| ty != InterfaceType::Data);
                    if let Some(ty) = known {
                        for p in [input].into_iter().chain(outputs) {
                            if system.netlist.ports[p].ty != ty {
                                system.netlist.ports[p].ty = ty;
                                changed = true;
                            }
                        }
                    }
                }
                NodeKind::Merge => {
                    let Some(output) = system.netlist.nodes[node_id].merge_output() else { continue };
                    let inputs = system.netlist.nodes[node_id].merge_inputs().to_vec();
                    let known = [output]
                        .into_iter()
                        .chain(inputs.iter().copied())
                        .map(|p| system.netlist.ports[p].ty)
                        .find(|&ty| ty != InterfaceType::Data);
                    if let Some(ty) = known {
                        for p in [output].into_iter().chain(inputs) {
                            if system.netlist.ports[p].ty != ty {
                                system.netlist.ports[p].ty = ty;
                                changed = true;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Seed every `Split`/`Merge` port's physical-field *names and widths*
/// (never bit offsets) by propagating forward from the connections just
/// made, so that clock assignment (Pass E, which runs before carriage
/// propagation actually packs bits) has real width data to weight its cut
/// graph by: edges are weighted by the physical fields they already
/// share. Terminal `Instance`/`Export` ports are never written here —
/// elaboration already finalized their protocol. Iterates to a fixpoint
/// since a chain of several Split/Merge hops needs more than one pass over
/// `edges_in_order`'s declaration order to fully propagate, and since
/// `adopt_physical_from` widens an already-adopted field's width in place
/// a field already present can still change on a later round.
fn seed_interconnect_widths(system: &mut System) {
    let conn_ids: Vec<_> = system.netlist.connections.keys().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for &conn_id in &conn_ids {
            let src = system.netlist.connections[conn_id].src;
            let sinks = system.netlist.connections[conn_id].sinks.clone();
            for sink in sinks {
                if !system.netlist.nodes[system.netlist.node_of(sink)].kind.is_interconnect() {
                    continue;
                }
                let before = physical_widths_snapshot(system, sink);
                let src_protocol = system.netlist.ports[src].protocol.clone();
                system.netlist.ports[sink].protocol.adopt_physical_from(&src_protocol);
                if physical_widths_snapshot(system, sink) != before {
                    changed = true;
                }
            }
        }
        // A Split's outputs see whatever its input has adopted so far; a
        // Merge's output sees the union of whatever its inputs have
        // adopted. Both run every round alongside the connection walk
        // above since a single `Split -> Merge -> Split` chain needs both
        // directions to stabilize.
        for node_id in system.netlist.nodes.keys().collect::<Vec<_>>() {
            match system.netlist.nodes[node_id].kind {
                NodeKind::Split => {
                    let Some(input) = system.netlist.nodes[node_id].input_port() else { continue };
                    let input_protocol = system.netlist.ports[input].protocol.clone();
                    for &out in system.netlist.nodes[node_id].output_ports().to_vec().iter() {
                        let before = physical_widths_snapshot(system, out);
                        system.netlist.ports[out].protocol.adopt_physical_from(&input_protocol);
                        if physical_widths_snapshot(system, out) != before {
                            changed = true;
                        }
                    }
                }
                NodeKind::Merge => {
                    let Some(output) = system.netlist.nodes[node_id].merge_output() else { continue };
                    for &inp in system.netlist.nodes[node_id].merge_inputs().to_vec().iter() {
                        let before = physical_widths_snapshot(system, output);
                        let in_protocol = system.netlist.ports[inp].protocol.clone();
                        system.netlist.ports[output].protocol.adopt_physical_from(&in_protocol);
                        if physical_widths_snapshot(system, output) != before {
                            changed = true;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// `(name -> width)` for a port's adopted physical fields, used to detect
/// whether a fixpoint round actually widened or added anything — field
/// count alone misses a later round just widening an already-present name.
fn physical_widths_snapshot(system: &System, port: PortId) -> BTreeMap<String, i64> {
    system.netlist.ports[port]
        .protocol
        .physical
        .iter()
        .map(|(name, pf)| (name.clone(), pf.width))
        .collect()
}

/// Validate a freshly-built `Split`/`Merge` node's port count against the
/// catalog's arity contract for its kind, and accumulate any per-instance
/// `AreaMetrics` the catalog supplies onto `System::area_metrics`. Both
/// kinds register with `fixed_arity: None` in `Catalog::builtin`, so this
/// is a no-op arity-wise against the built-in catalog; a caller-supplied
/// catalog that does fix an arity still gets enforced.
fn check_arity(system: &mut System, catalog: &Catalog, node_id: NodeId) -> Result<()> {
    let node = &system.netlist.nodes[node_id];
    if let Some(metrics) = catalog.validate_arity(node.kind, &node.name, node.ports.len())? {
        system.area_metrics += metrics;
    }
    Ok(())
}

fn new_interconnect_node(system: &mut System, name: String, kind: NodeKind) -> NodeId {
    system.netlist.add_node(Node {
        name,
        kind,
        component: None,
        ports: Vec::new(),
        clock_ports: Vec::new(),
        cycles: 1,
    })
}

fn add_clock_port(system: &mut System, node_id: NodeId) -> PortId {
    let port = Port::new("clock", InterfaceType::Clock, Direction::In, node_id);
    system.netlist.add_clock_port(node_id, port)
}

/// Pre-allocated as `InterfaceType::Data` regardless of what will
/// eventually route through this slot; `propagate_interconnect_port_types`
/// corrects it once edges are resolved.
fn add_data_port(system: &mut System, node_id: NodeId, name: impl Into<String>, direction: Direction) -> PortId {
    let port = Port::new(name, InterfaceType::Data, direction, node_id);
    let port_id = system.netlist.add_port(node_id, port);
    let clock_port = system.netlist.nodes[node_id].clock_port();
    system.netlist.ports[port_id].clock_port = clock_port;
    port_id
}

fn attach(system: &mut System, port: PortId, flow_id: crate::ir::netlist::FlowId, link: crate::ir::system::LinkTarget) {
    let p = &mut system.netlist.ports[port];
    if !p.flows.contains(&flow_id) {
        p.flows.push(flow_id);
    }
    if !p.links.contains(&link) {
        p.links.push(link);
    }
}

/// Claim the next free outbound port for a topology edge's `from` endpoint:
/// a `Source` resolves directly to a declared `(instance, interface)` port
/// (always the same one, regardless of fan-out); `Split`/`Merge` claim the
/// next pre-allocated output slot in edge-encounter order.
fn claim_source_port(
    system: &System,
    realized: &mut BTreeMap<TopoNodeId, Realized>,
    topo_id: TopoNodeId,
) -> Result<PortId> {
    match system.topology.nodes[topo_id].kind {
        TopoNodeKind::Source => resolve_source_label(system, &system.topology.nodes[topo_id].label),
        TopoNodeKind::Split => {
            let r = realized.get_mut(&topo_id).expect("split node pre-allocated above");
            let outputs = system.netlist.nodes[r.node_id].output_ports();
            let port_id = *outputs.get(r.next_free).ok_or_else(|| {
                CompileError::internal("split node has no free output port for this edge")
            })?;
            r.next_free += 1;
            Ok(port_id)
        }
        TopoNodeKind::Merge => {
            let r = realized.get(&topo_id).expect("merge node pre-allocated above");
            system.netlist.nodes[r.node_id]
                .merge_output()
                .ok_or_else(|| CompileError::internal("merge node has no output port"))
        }
    }
}

/// Claim the next free inbound port for a topology edge's `to` endpoint.
/// A `Source` topology node resolves to the same declared `(instance,
/// interface)` port whether it plays the driving or driven role in a given
/// edge — e.g. a plain point-to-point link with no split/merge in between
/// has its sink modeled as a `Source` node too: topology nodes are the
/// declared endpoints plus the interconnect inserted between them, and a
/// direct link has no interconnect at all.
fn claim_sink_port(
    system: &System,
    realized: &mut BTreeMap<TopoNodeId, Realized>,
    topo_id: TopoNodeId,
) -> Result<PortId> {
    match system.topology.nodes[topo_id].kind {
        TopoNodeKind::Source => resolve_source_label(system, &system.topology.nodes[topo_id].label),
        TopoNodeKind::Split => {
            let r = realized.get(&topo_id).expect("split node pre-allocated above");
            system.netlist.nodes[r.node_id]
                .input_port()
                .ok_or_else(|| CompileError::internal("split node has no input port"))
        }
        TopoNodeKind::Merge => {
            let r = realized.get_mut(&topo_id).expect("merge node pre-allocated above");
            let inputs = system.netlist.nodes[r.node_id].merge_inputs();
            let port_id = *inputs.get(r.next_free).ok_or_else(|| {
                CompileError::internal("merge node has no free input port for this edge")
            })?;
            r.next_free += 1;
            Ok(port_id)
        }
    }
}

/// Resolve a `Source` topology node's label (`"instance.interface"`, per
/// `LinkTarget::path()`) back to the concrete port the elaborator already
/// created on the owning `Instance`/`Export` node.
fn resolve_source_label(system: &System, label: &str) -> Result<PortId> {
    let (node_name, iface_name) = label
        .split_once('.')
        .ok_or_else(|| CompileError::internal("Source topology node label is not `instance.interface`"))?;
    let node_id = system
        .netlist
        .find_node_by_name(node_name)
        .ok_or_else(|| CompileError::topology(format!("topology source `{label}` names unknown node")))?;
    system
        .netlist
        .find_port_by_name(node_id, iface_name)
        .ok_or_else(|| CompileError::topology(format!("topology source `{label}` names unknown port")))
}
