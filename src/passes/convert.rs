//! Pass D: splice `FlowConvert` nodes onto connections that cross the
//! flow-id/linkpoint-id boundary.

use std::collections::BTreeSet;

use tracing::instrument;

use crate::error::Result;
use crate::ir::component::{ComponentRegistry, Direction, InterfaceType, SignalRole};
use crate::ir::netlist::{ConnectionId, Node, NodeKind, Port};
use crate::ir::system::System;

const LINKPOINT_ID: &str = "linkpoint_id";
const FLOW_ID: &str = "flow_id";

#[instrument(level = "debug", skip_all)]
pub fn insert_converters(system: &mut System, registry: &ComponentRegistry) -> Result<()> {
    for conn_id in system.netlist.data_connections() {
        splice_if_needed(system, registry, conn_id)?;
    }
    Ok(())
}

fn splice_if_needed(system: &mut System, registry: &ComponentRegistry, conn_id: ConnectionId) -> Result<()> {
    let src = system.netlist.connections[conn_id].src;
    let sinks = system.netlist.connections[conn_id].sinks.clone();
    for sink in sinks {
        let src_has = system.netlist.ports[src].protocol.logical.contains_key(LINKPOINT_ID);
        let sink_has = system.netlist.ports[sink].protocol.logical.contains_key(LINKPOINT_ID);
        if src_has == sink_has {
            // Both or neither: no converter. A compatible passthrough is
            // assumed when both carry linkpoint_id; neither carrying it is
            // simply nothing to convert.
            continue;
        }
        if src_has {
            splice_lp_to_flow(system, registry, sink)?;
        } else {
            splice_flow_to_lp(system, registry, src, sink)?;
        }
    }
    Ok(())
}

/// Source carries `linkpoint-id`, sink expects `flow_id`: splice a
/// `FlowConvert` immediately upstream of `sink`.
fn splice_lp_to_flow(system: &mut System, registry: &ComponentRegistry, sink: crate::ir::netlist::PortId) -> Result<()> {
    let upstream = system
        .netlist
        .upstream_of(sink)
        .expect("sink is the sink end of the connection being spliced");
    let table = conversion_table(system, registry, upstream);

    let lp_width = width_of(system, upstream, LINKPOINT_ID);
    let flow_width = flow_id_width(&table);

    let node_id = new_convert_node(system);
    let in_port = new_convert_port(system, node_id, "in", Direction::In);
    let out_port = new_convert_port(system, node_id, "out", Direction::Out);

    system.netlist.ports[in_port]
        .protocol
        .declare_local_field(LINKPOINT_ID, lp_width, SignalRole::LinkpointId.sense(), LINKPOINT_ID);
    system.netlist.ports[out_port]
        .protocol
        .declare_local_field(FLOW_ID, flow_width, SignalRole::LinkId.sense(), FLOW_ID);
    system.netlist.ports[in_port].protocol.ensure_xdata();
    system.netlist.ports[out_port].protocol.ensure_xdata();
    let upstream_protocol = system.netlist.ports[upstream].protocol.clone();
    system.netlist.ports[out_port].protocol.adopt_physical_from(&upstream_protocol);

    system.netlist.nodes[node_id].component = Some(format!("flow_convert_lp2flow[{}]", table.len()));
    system.netlist.splice_before(sink, in_port, out_port)?;
    Ok(())
}

/// Source carries `flow_id` (implicitly, via its Flow membership), sink
/// expects `linkpoint-id`: splice a `FlowConvert` immediately downstream of
/// `src`, spliced onto the sink side of the connection it's already driving.
fn splice_flow_to_lp(
    system: &mut System,
    registry: &ComponentRegistry,
    src: crate::ir::netlist::PortId,
    sink: crate::ir::netlist::PortId,
) -> Result<()> {
    let table = conversion_table(system, registry, src);

    let flow_width = flow_id_width(&table);
    let lp_width = width_of(system, sink, LINKPOINT_ID);

    let node_id = new_convert_node(system);
    let in_port = new_convert_port(system, node_id, "in", Direction::In);
    let out_port = new_convert_port(system, node_id, "out", Direction::Out);

    system.netlist.ports[in_port]
        .protocol
        .declare_local_field(FLOW_ID, flow_width, SignalRole::LinkId.sense(), FLOW_ID);
    system.netlist.ports[out_port]
        .protocol
        .declare_local_field(LINKPOINT_ID, lp_width, SignalRole::LinkpointId.sense(), LINKPOINT_ID);
    system.netlist.ports[in_port].protocol.ensure_xdata();
    system.netlist.ports[out_port].protocol.ensure_xdata();
    let src_protocol = system.netlist.ports[src].protocol.clone();
    system.netlist.ports[in_port].protocol.adopt_physical_from(&src_protocol);

    system.netlist.nodes[node_id].component = Some(format!("flow_convert_flow2lp[{}]", table.len()));
    system.netlist.splice_before(sink, in_port, out_port)?;
    Ok(())
}

fn new_convert_node(system: &mut System) -> crate::ir::netlist::NodeId {
    let idx = system
        .netlist
        .nodes
        .iter()
        .filter(|(_, n)| n.kind == NodeKind::FlowConvert)
        .count();
    system.netlist.add_node(Node {
        name: format!("flowconvert_{idx}"),
        kind: NodeKind::FlowConvert,
        component: None,
        ports: Vec::new(),
        clock_ports: Vec::new(),
        cycles: 1,
    })
}

fn new_convert_port(
    system: &mut System,
    node_id: crate::ir::netlist::NodeId,
    name: &str,
    direction: Direction,
) -> crate::ir::netlist::PortId {
    let clock = Port::new("clock", InterfaceType::Clock, Direction::In, node_id);
    // A FlowConvert's clock-sink vertex is created once, on its first port.
    if system.netlist.nodes[node_id].clock_port().is_none() {
        system.netlist.add_clock_port(node_id, clock);
    }
    let port = Port::new(name, InterfaceType::Data, direction, node_id);
    let port_id = system.netlist.add_port(node_id, port);
    let clock_port = system.netlist.nodes[node_id].clock_port();
    system.netlist.ports[port_id].clock_port = clock_port;
    port_id
}

fn width_of(system: &System, port: crate::ir::netlist::PortId, field: &str) -> i64 {
    system.netlist.ports[port]
        .protocol
        .logical
        .get(field)
        .map(|lf| lf.width)
        .unwrap_or(0)
}

/// `(linkpoint-encoding, flow-id)` pairs for every Flow currently
/// traversing `port`. Deduplicated and sorted by encoding for determinism.
fn conversion_table(system: &System, registry: &ComponentRegistry, port: crate::ir::netlist::PortId) -> Vec<(i64, u32)> {
    let mut rows: BTreeSet<(i64, u32)> = BTreeSet::new();
    for &flow_id in &system.netlist.ports[port].flows {
        let flow = &system.netlist.flows[flow_id];
        if let Some(encoding) = linkpoint_encoding(system, registry, &flow.source.link) {
            rows.insert((encoding, flow.id_num));
        }
    }
    rows.into_iter().collect()
}

fn linkpoint_encoding(system: &System, registry: &ComponentRegistry, target: &crate::ir::system::LinkTarget) -> Option<i64> {
    let iface = if target.instance == crate::ir::system::EXPORT_PSEUDO_INSTANCE {
        &system.export(&target.interface)?.interface
    } else {
        let inst = system.instance(&target.instance)?;
        let comp = registry.get(&inst.component)?;
        comp.interface(&target.interface)?
    };
    iface.linkpoint(&target.linkpoint).map(|lp| lp.encoding)
}

fn flow_id_width(table: &[(i64, u32)]) -> i64 {
    let max_id = table.iter().map(|&(_, f)| f).max().unwrap_or(0);
    ceil_log2(max_id as i64 + 1).max(1)
}

fn ceil_log2(n: i64) -> i64 {
    if n <= 1 {
        return 0;
    }
    let mut bits = 0;
    let mut v = 1i64;
    while v < n {
        v <<= 1;
        bits += 1;
    }
    bits
}
