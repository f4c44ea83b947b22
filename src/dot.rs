//! Graphviz `.dot` dumps: node names mirror instance names. Two views: the
//! finalized point-to-point netlist (`--p2p-dot`) and the input topology
//! graph (`--topo-dot`).

use std::fmt::Write as _;

use itertools::Itertools;

use crate::ir::system::{System, TopoNodeKind};

/// Render the finalized netlist: one node per `Node`, one edge per
/// `Connection`, labeled with the connection's driving port name.
pub fn netlist_to_dot(system: &System) -> String {
    let mut out = String::new();
    writeln!(out, "digraph netlist {{").unwrap();
    writeln!(out, "    rankdir=LR;").unwrap();

    let node_ids = system
        .netlist
        .nodes
        .keys()
        .sorted_by_key(|&id| system.netlist.nodes[id].name.clone())
        .collect_vec();
    for id in &node_ids {
        let node = &system.netlist.nodes[*id];
        writeln!(out, "    \"{}\" [label=\"{}\\n({:?})\"];", node.name, node.name, node.kind).unwrap();
    }

    let conn_ids = system
        .netlist
        .connections
        .keys()
        .sorted_by_key(|&id| {
            let src = system.netlist.connections[id].src;
            system.netlist.ports[src].name.clone()
        })
        .collect_vec();
    for id in conn_ids {
        let conn = &system.netlist.connections[id];
        let src_port = &system.netlist.ports[conn.src];
        let src_node = &system.netlist.nodes[system.netlist.node_of(conn.src)];
        for &sink in &conn.sinks {
            let sink_port = &system.netlist.ports[sink];
            let sink_node = &system.netlist.nodes[system.netlist.node_of(sink)];
            writeln!(
                out,
                "    \"{}\" -> \"{}\" [label=\"{}.{} -> {}.{}\"];",
                src_node.name, sink_node.name, src_node.name, src_port.name, sink_node.name, sink_port.name
            )
            .unwrap();
        }
    }

    writeln!(out, "}}").unwrap();
    out
}

/// Render the input topology graph: source/split/merge nodes and the
/// declarative edges between them.
pub fn topology_to_dot(system: &System) -> String {
    let mut out = String::new();
    writeln!(out, "digraph topology {{").unwrap();
    writeln!(out, "    rankdir=LR;").unwrap();

    let node_ids = system
        .topology
        .nodes
        .keys()
        .sorted_by_key(|&id| system.topology.nodes[id].label.clone())
        .collect_vec();
    for id in &node_ids {
        let node = &system.topology.nodes[*id];
        let shape = match node.kind {
            TopoNodeKind::Source => "box",
            TopoNodeKind::Split => "invtriangle",
            TopoNodeKind::Merge => "triangle",
        };
        writeln!(
            out,
            "    \"{}\" [label=\"{}\\n({:?})\", shape={}];",
            node.label, node.label, node.kind, shape
        )
        .unwrap();
    }

    for edge in system.topology.edges_in_order() {
        let from = &system.topology.nodes[edge.from].label;
        let to = &system.topology.nodes[edge.to].label;
        writeln!(out, "    \"{from}\" -> \"{to}\" [label=\"{} link(s)\"];", edge.links.len()).unwrap();
    }

    writeln!(out, "}}").unwrap();
    out
}
