//! Pass E: assign every interconnect node's clock-sink port to a concrete
//! clock source by multiway cut, then splice `ClockCross` nodes onto any
//! data connection left spanning two domains.

use std::collections::BTreeMap;

use petgraph::graph::{NodeIndex, UnGraph};
use tracing::instrument;

use crate::error::{CompileError, Result};
use crate::ir::component::{Direction, InterfaceType};
use crate::ir::netlist::{ConnectionId, Node, NodeKind, Port, PortId};
use crate::ir::system::System;
use crate::netutil::mincut::multiway_cut;

#[instrument(level = "debug", skip_all)]
pub fn assign_clocks(system: &mut System) -> Result<()> {
    let clock_ports: Vec<PortId> = system
        .netlist
        .nodes
        .values()
        .flat_map(|n| n.clock_ports.iter().copied())
        .collect();
    let mut sorted_ports = clock_ports.clone();
    sorted_ports.sort_by_key(|&p| port_sort_key(system, p));

    let mut vertex_of: BTreeMap<PortId, NodeIndex> = BTreeMap::new();
    let mut graph: UnGraph<(), i64> = UnGraph::new_undirected();

    // One vertex per clock-sink port, except that every port already driven
    // by the same concrete clock domain collapses onto one shared terminal
    // vertex: merge all terminals driven by the same clock source into one.
    let mut terminal_vertex: BTreeMap<String, NodeIndex> = BTreeMap::new();
    let mut terminals: Vec<NodeIndex> = Vec::new();
    for &port in &sorted_ports {
        if let Some(domain) = system.netlist.ports[port].clock_domain.clone() {
            let v = *terminal_vertex.entry(domain).or_insert_with(|| {
                let v = graph.add_node(());
                terminals.push(v);
                v
            });
            vertex_of.insert(port, v);
        } else {
            let v = graph.add_node(());
            vertex_of.insert(port, v);
        }
    }

    // Edge per data connection whose endpoints' clock sinks differ, weighted
    // by the physical fields they already share (adopted ahead of packing
    // via `adopt_physical_from`, so real width data exists at this stage).
    let mut edge_weight: BTreeMap<(NodeIndex, NodeIndex), i64> = BTreeMap::new();
    for conn_id in system.netlist.data_connections() {
        let src = system.netlist.connections[conn_id].src;
        let Some(src_clock) = system.netlist.ports[src].clock_port else {
            continue;
        };
        for &sink in &system.netlist.connections[conn_id].sinks {
            let Some(sink_clock) = system.netlist.ports[sink].clock_port else {
                continue;
            };
            let va = vertex_of[&src_clock];
            let vb = vertex_of[&sink_clock];
            if va == vb {
                continue; // self-loop, elided
            }
            let weight = shared_physical_width(system, src, sink);
            let key = if va.index() < vb.index() { (va, vb) } else { (vb, va) };
            *edge_weight.entry(key).or_insert(0) += weight;
        }
    }
    for (&(a, b), &w) in &edge_weight {
        if w > 0 {
            graph.add_edge(a, b, w);
        }
    }

    if terminals.is_empty() {
        return Err(CompileError::clock(
            "no clock-sink port in the netlist is driven by a concrete clock source",
        ));
    }

    let assignment = if terminals.len() == 1 {
        graph
            .node_indices()
            .map(|v| (v, terminals[0]))
            .collect::<BTreeMap<_, _>>()
    } else {
        multiway_cut(&graph, &terminals).into_iter().collect()
    };

    let domain_of_terminal: BTreeMap<NodeIndex, String> =
        terminal_vertex.iter().map(|(d, &v)| (v, d.clone())).collect();

    for &port in &sorted_ports {
        if system.netlist.ports[port].clock_domain.is_some() {
            continue;
        }
        let v = vertex_of[&port];
        let terminal = assignment.get(&v).copied().ok_or_else(|| {
            CompileError::clock(format!(
                "clock-sink port on node `{}` was not reached by any terminal",
                system.netlist.nodes[system.netlist.node_of(port)].name
            ))
        })?;
        let domain = domain_of_terminal
            .get(&terminal)
            .cloned()
            .ok_or_else(|| CompileError::internal("multiway_cut assigned an unlabeled terminal"))?;
        system.netlist.ports[port].clock_domain = Some(domain);
    }

    insert_clock_crossings(system)?;
    Ok(())
}

fn port_sort_key(system: &System, port: PortId) -> (String, String) {
    let node = system.netlist.node_of(port);
    (system.netlist.nodes[node].name.clone(), system.netlist.ports[port].name.clone())
}

fn shared_physical_width(system: &System, a: PortId, b: PortId) -> i64 {
    let pa = &system.netlist.ports[a].protocol;
    let pb = &system.netlist.ports[b].protocol;
    pa.physical
        .keys()
        .filter(|name| pb.physical.contains_key(*name))
        .map(|name| pa.physical[name].width.max(pb.physical[name].width))
        .sum()
}

/// Splice a `ClockCross` onto every data connection whose endpoints ended
/// up in different clock domains after assignment.
fn insert_clock_crossings(system: &mut System) -> Result<()> {
    for conn_id in system.netlist.data_connections() {
        splice_if_crossing(system, conn_id)?;
    }
    Ok(())
}

fn splice_if_crossing(system: &mut System, conn_id: ConnectionId) -> Result<()> {
    let src = system.netlist.connections[conn_id].src;
    let src_domain = domain_of(system, src)?;
    let sinks = system.netlist.connections[conn_id].sinks.clone();
    for sink in sinks {
        let sink_domain = domain_of(system, sink)?;
        if src_domain == sink_domain {
            continue;
        }
        splice_clock_cross(system, sink, &src_domain, &sink_domain)?;
    }
    Ok(())
}

fn domain_of(system: &System, port: PortId) -> Result<String> {
    let clock_port = system.netlist.ports[port].clock_port.ok_or_else(|| {
        CompileError::internal("data port has no associated clock-sink port")
    })?;
    system.netlist.ports[clock_port]
        .clock_domain
        .clone()
        .ok_or_else(|| CompileError::internal("clock-sink port left unassigned after clock_assign"))
}

fn splice_clock_cross(system: &mut System, sink: PortId, in_clock: &str, out_clock: &str) -> Result<()> {
    let node_id = system.netlist.add_node(Node {
        name: format!(
            "clockcross_{}",
            system
                .netlist
                .nodes
                .values()
                .filter(|n| n.kind == NodeKind::ClockCross)
                .count()
        ),
        kind: NodeKind::ClockCross,
        component: None,
        ports: Vec::new(),
        clock_ports: Vec::new(),
        cycles: 1,
    });

    let in_clock_port = Port::new("in_clock", InterfaceType::Clock, Direction::In, node_id);
    let in_clock_id = system.netlist.add_clock_port(node_id, in_clock_port);
    system.netlist.ports[in_clock_id].clock_domain = Some(in_clock.to_string());
    let out_clock_port = Port::new("out_clock", InterfaceType::Clock, Direction::In, node_id);
    let out_clock_id = system.netlist.add_clock_port(node_id, out_clock_port);
    system.netlist.ports[out_clock_id].clock_domain = Some(out_clock.to_string());

    let in_port = Port::new("in", InterfaceType::Data, Direction::In, node_id);
    let in_id = system.netlist.add_port(node_id, in_port);
    system.netlist.ports[in_id].clock_port = Some(in_clock_id);
    let out_port = Port::new("out", InterfaceType::Data, Direction::Out, node_id);
    let out_id = system.netlist.add_port(node_id, out_port);
    system.netlist.ports[out_id].clock_port = Some(out_clock_id);

    let sink_protocol = system.netlist.ports[sink].protocol.clone();
    system.netlist.ports[in_id].protocol.adopt_physical_from(&sink_protocol);
    let upstream = system
        .netlist
        .upstream_of(sink)
        .expect("sink is the sink end of the connection being spliced");
    let upstream_protocol = system.netlist.ports[upstream].protocol.clone();
    system.netlist.ports[out_id].protocol.adopt_physical_from(&upstream_protocol);

    system.netlist.splice_before(sink, in_id, out_id)?;
    Ok(())
}
