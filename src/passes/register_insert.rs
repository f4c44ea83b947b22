//! Pass F: optionally splice a `Register` onto every outbound connection of
//! a `Merge` node, guarded by the `register_merge` option.

use tracing::instrument;

use crate::error::Result;
use crate::ir::component::{Direction, InterfaceType};
use crate::ir::netlist::{ConnectionId, Node, NodeId, NodeKind, Port, PortId};
use crate::ir::system::System;
use crate::primitives::Catalog;

#[instrument(level = "debug", skip(system, catalog))]
pub fn insert_registers(system: &mut System, catalog: &Catalog, register_merge: bool) -> Result<()> {
    if !register_merge {
        return Ok(());
    }
    let merge_outputs: Vec<PortId> = system
        .netlist
        .nodes
        .iter()
        .filter(|(_, n)| n.kind == NodeKind::Merge)
        .filter_map(|(_, n)| n.merge_output())
        .collect();

    for merge_out in merge_outputs {
        let Some(conn_id) = system.netlist.driving_connection(merge_out) else {
            continue;
        };
        splice_registers(system, catalog, merge_out, conn_id)?;
    }
    Ok(())
}

fn splice_registers(system: &mut System, catalog: &Catalog, merge_out: PortId, conn_id: ConnectionId) -> Result<()> {
    let merge_node = system.netlist.node_of(merge_out);
    let clock_port = system.netlist.nodes[merge_node].clock_port();
    let sinks = system.netlist.connections[conn_id].sinks.clone();
    for sink in sinks {
        let node_id = new_register_node(system);
        let in_id = new_register_port(system, node_id, "in", Direction::In, clock_port);
        let out_id = new_register_port(system, node_id, "out", Direction::Out, clock_port);

        let sink_protocol = system.netlist.ports[sink].protocol.clone();
        system.netlist.ports[in_id].protocol.adopt_physical_from(&sink_protocol);
        system.netlist.ports[out_id].protocol.adopt_physical_from(&sink_protocol);

        let node = &system.netlist.nodes[node_id];
        if let Some(metrics) = catalog.validate_arity(node.kind, &node.name, node.ports.len())? {
            system.area_metrics += metrics;
        }

        system.netlist.splice_before(sink, in_id, out_id)?;
    }
    Ok(())
}

fn new_register_node(system: &mut System) -> NodeId {
    let idx = system
        .netlist
        .nodes
        .values()
        .filter(|n| n.kind == NodeKind::Register)
        .count();
    system.netlist.add_node(Node {
        name: format!("register_{idx}"),
        kind: NodeKind::Register,
        component: None,
        ports: Vec::new(),
        clock_ports: Vec::new(),
        cycles: 1,
    })
}

fn new_register_port(
    system: &mut System,
    node_id: NodeId,
    name: &str,
    direction: Direction,
    merge_clock: Option<PortId>,
) -> PortId {
    if system.netlist.nodes[node_id].clock_port().is_none() {
        let clock = Port::new("clock", InterfaceType::Clock, Direction::In, node_id);
        let clock_id = system.netlist.add_clock_port(node_id, clock);
        if let Some(merge_clock) = merge_clock {
            let domain = system.netlist.ports[merge_clock].clock_domain.clone();
            system.netlist.ports[clock_id].clock_domain = domain;
        }
    }
    let port = Port::new(name, InterfaceType::Data, direction, node_id);
    let port_id = system.netlist.add_port(node_id, port);
    let clock_port = system.netlist.nodes[node_id].clock_port();
    system.netlist.ports[port_id].clock_port = clock_port;
    port_id
}
