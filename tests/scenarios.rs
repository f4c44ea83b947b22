//! End-to-end scenarios covering the full compile pipeline, built
//! directly against the IR constructors rather than through `JsonSpecSource`
//! (the JSON front end has no public conversion entry point for test
//! fixtures to call).

use std::collections::BTreeMap;

use slotmap::SlotMap;

use interconnect_compile::driver::{self, CompileOptions};
use interconnect_compile::expr::Expr;
use interconnect_compile::ir::component::{
    Component, ComponentRegistry, Direction, Interface, InterfaceType, Linkpoint, LinkpointType, Signal, SignalRole,
};
use interconnect_compile::ir::netlist::NodeKind;
use interconnect_compile::ir::system::{
    Instance, Link, LinkTarget, System, TopoEdge, TopoNode, TopoNodeId, TopoNodeKind, TopologyGraph,
};
use interconnect_compile::primitives::Catalog;

fn clock_interface(name: &str) -> Interface {
    Interface {
        name: name.to_string(),
        ty: InterfaceType::Clock,
        direction: Direction::In,
        clock_interface: None,
        signals: Vec::new(),
        linkpoints: Vec::new(),
    }
}

fn sig(role: SignalRole, width: i64) -> Signal {
    Signal { role, subtype: String::new(), width: Expr::lit(width) }
}

fn basic_signals(width: i64) -> Vec<Signal> {
    vec![sig(SignalRole::Data, width), sig(SignalRole::Valid, 1), sig(SignalRole::Ready, 1)]
}

fn data_interface(name: &str, direction: Direction, signals: Vec<Signal>, linkpoints: Vec<Linkpoint>) -> Interface {
    Interface {
        name: name.to_string(),
        ty: InterfaceType::Data,
        direction,
        clock_interface: Some("clk".to_string()),
        signals,
        linkpoints,
    }
}

fn unicast(name: &str, encoding: i64) -> Linkpoint {
    Linkpoint { name: name.to_string(), ty: LinkpointType::Unicast, encoding }
}

fn broadcast(name: &str, encoding: i64) -> Linkpoint {
    Linkpoint { name: name.to_string(), ty: LinkpointType::Broadcast, encoding }
}

/// A sender component: one output data interface "o" carrying `data` at
/// `width` bits, fanning through the given linkpoints.
fn sender_component(name: &str, width: i64, linkpoints: Vec<Linkpoint>) -> Component {
    Component {
        name: name.to_string(),
        interfaces: vec![clock_interface("clk"), data_interface("o", Direction::Out, basic_signals(width), linkpoints)],
        parameters: Vec::new(),
    }
}

/// A receiver component: one input data interface "i", with optional extra
/// signals (e.g. a declared `flow_id`/`linkpoint_id` wire) beyond the basics.
fn receiver_component(name: &str, width: i64, extra: Vec<Signal>) -> Component {
    let mut signals = basic_signals(width);
    signals.extend(extra);
    Component {
        name: name.to_string(),
        interfaces: vec![clock_interface("clk"), data_interface("i", Direction::In, signals, Vec::new())],
        parameters: Vec::new(),
    }
}

fn instance(name: &str, component: &str) -> Instance {
    Instance { name: name.to_string(), component: component.to_string(), params: BTreeMap::new() }
}

fn link(label: &str, src_inst: &str, src_iface: &str, src_lp: &str, dst_inst: &str, dst_iface: &str) -> Link {
    Link {
        label: Some(label.to_string()),
        src: LinkTarget { instance: src_inst.into(), interface: src_iface.into(), linkpoint: src_lp.into() },
        dst: LinkTarget { instance: dst_inst.into(), interface: dst_iface.into(), linkpoint: String::new() },
    }
}

fn clock_binding(owner: &str, system: &mut System, domain: &str) {
    system.clock_bindings.insert((owner.to_string(), "clk".to_string()), domain.to_string());
}

/// S1: a single unicast link with no Split/Merge in between. The topology is
/// two `Source` nodes joined by one edge: a direct link has no interconnect
/// at all.
#[test]
fn s1_single_unicast() {
    let mut registry = ComponentRegistry::new();
    registry.insert(sender_component("Sender", 8, vec![unicast("lp0", 0)])).unwrap();
    registry.insert(receiver_component("Receiver", 8, Vec::new())).unwrap();

    let mut system = System {
        instances: vec![instance("s", "Sender"), instance("r", "Receiver")],
        links: vec![link("L0", "s", "o", "lp0", "r", "i")],
        ..System::default()
    };
    clock_binding("s", &mut system, "clk0");
    clock_binding("r", &mut system, "clk0");

    let mut nodes: SlotMap<TopoNodeId, TopoNode> = SlotMap::with_key();
    let n_s = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s.o".to_string() });
    let n_r = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r.i".to_string() });
    system.topology = TopologyGraph { nodes, edges: vec![TopoEdge { from: n_s, to: n_r, links: vec![0] }] };

    let system = driver::compile(system, &registry, &Catalog::builtin(), &CompileOptions::default()).expect("compile");

    // No interconnect nodes at all: just the two instances and the (empty) export node.
    assert_eq!(system.netlist.nodes.len(), 3);
    assert_eq!(system.netlist.data_connections().len(), 1);
    assert!(system.netlist.nodes.values().all(|n| !n.kind.is_interconnect()));

    let conn_id = system.netlist.data_connections()[0];
    let conn = &system.netlist.connections[conn_id];
    assert_eq!(system.netlist.ports[conn.src].name, "o");
    assert_eq!(conn.sinks.len(), 1);
    assert_eq!(system.netlist.ports[conn.sinks[0]].name, "i");

    // Both sides declare `valid` directly, so it's never defaulted to a const.
    assert!(!system.netlist.ports[conn.sinks[0]].protocol.state["valid"].is_const);
    assert_eq!(system.netlist.ports[conn.sinks[0]].protocol.physical[interconnect_compile::ir::protocol::XDATA].width, 8);
}

/// S2: one broadcast link fanning out to three receivers through a Split.
#[test]
fn s2_broadcast_fan_out() {
    let mut registry = ComponentRegistry::new();
    registry.insert(sender_component("Sender", 8, vec![broadcast("lp0", 0)])).unwrap();
    registry.insert(receiver_component("Receiver", 8, Vec::new())).unwrap();

    let mut system = System {
        instances: vec![
            instance("s", "Sender"),
            instance("r0", "Receiver"),
            instance("r1", "Receiver"),
            instance("r2", "Receiver"),
        ],
        links: vec![
            link("L0", "s", "o", "lp0", "r0", "i"),
            link("L1", "s", "o", "lp0", "r1", "i"),
            link("L2", "s", "o", "lp0", "r2", "i"),
        ],
        ..System::default()
    };
    for owner in ["s", "r0", "r1", "r2"] {
        clock_binding(owner, &mut system, "clk0");
    }

    let mut nodes: SlotMap<TopoNodeId, TopoNode> = SlotMap::with_key();
    let n_s = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s.o".to_string() });
    let n_split = nodes.insert(TopoNode { kind: TopoNodeKind::Split, label: "split".to_string() });
    let n_r0 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r0.i".to_string() });
    let n_r1 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r1.i".to_string() });
    let n_r2 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r2.i".to_string() });
    system.topology = TopologyGraph {
        nodes,
        edges: vec![
            TopoEdge { from: n_s, to: n_split, links: vec![0, 1, 2] },
            TopoEdge { from: n_split, to: n_r0, links: vec![0] },
            TopoEdge { from: n_split, to: n_r1, links: vec![1] },
            TopoEdge { from: n_split, to: n_r2, links: vec![2] },
        ],
    };

    let system = driver::compile(system, &registry, &Catalog::builtin(), &CompileOptions::default()).expect("compile");

    let splits: Vec<_> = system.netlist.nodes.values().filter(|n| n.kind == NodeKind::Split).collect();
    assert_eq!(splits.len(), 1);
    let split = splits[0];
    assert_eq!(split.output_ports().len(), 3);
    for &out in split.output_ports() {
        assert_eq!(system.netlist.ports[out].protocol.physical[interconnect_compile::ir::protocol::XDATA].width, 8);
    }
}

/// S3: three distinct flows merged into one sink that declares its own
/// `flow_id` wire (width 2, wide enough for 3 flows).
#[test]
fn s3_merge_distinct_flows() {
    let mut registry = ComponentRegistry::new();
    registry.insert(sender_component("Sender", 8, vec![unicast("lp0", 0)])).unwrap();
    registry
        .insert(receiver_component("Receiver", 8, vec![sig(SignalRole::LinkId, 2)]))
        .unwrap();

    let mut system = System {
        instances: vec![instance("s0", "Sender"), instance("s1", "Sender"), instance("s2", "Sender"), instance("r", "Receiver")],
        links: vec![
            link("L0", "s0", "o", "lp0", "r", "i"),
            link("L1", "s1", "o", "lp0", "r", "i"),
            link("L2", "s2", "o", "lp0", "r", "i"),
        ],
        ..System::default()
    };
    for owner in ["s0", "s1", "s2", "r"] {
        clock_binding(owner, &mut system, "clk0");
    }

    let mut nodes: SlotMap<TopoNodeId, TopoNode> = SlotMap::with_key();
    let n_s0 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s0.o".to_string() });
    let n_s1 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s1.o".to_string() });
    let n_s2 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s2.o".to_string() });
    let n_merge = nodes.insert(TopoNode { kind: TopoNodeKind::Merge, label: "merge".to_string() });
    let n_r = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r.i".to_string() });
    system.topology = TopologyGraph {
        nodes,
        edges: vec![
            TopoEdge { from: n_s0, to: n_merge, links: vec![0] },
            TopoEdge { from: n_s1, to: n_merge, links: vec![1] },
            TopoEdge { from: n_s2, to: n_merge, links: vec![2] },
            TopoEdge { from: n_merge, to: n_r, links: vec![0, 1, 2] },
        ],
    };

    let system = driver::compile(system, &registry, &Catalog::builtin(), &CompileOptions::default()).expect("compile");

    let merges: Vec<_> = system.netlist.nodes.values().filter(|n| n.kind == NodeKind::Merge).collect();
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].merge_inputs().len(), 3);

    let r_port = system
        .resolve_target_port(&LinkTarget { instance: "r".into(), interface: "i".into(), linkpoint: String::new() })
        .unwrap();
    let flow_id_state = &system.netlist.ports[r_port].protocol.state["flow_id"];
    assert!(!flow_id_state.is_const);
    assert_eq!(system.netlist.ports[r_port].protocol.logical["flow_id"].width, 2);
}

/// S4: a Merge straddling two clock domains, two senders on the wide domain
/// and one on the narrow domain; the Merge must land on the wide domain and
/// exactly one `ClockCross` must be spliced on the narrow branch.
#[test]
fn s4_mixed_clock_domains() {
    let mut registry = ComponentRegistry::new();
    registry.insert(sender_component("SenderWide", 32, vec![unicast("lp0", 0)])).unwrap();
    registry.insert(sender_component("SenderNarrow", 8, vec![unicast("lp0", 0)])).unwrap();
    registry.insert(receiver_component("ReceiverWide", 32, Vec::new())).unwrap();

    let mut system = System {
        instances: vec![
            instance("sa1", "SenderWide"),
            instance("sa2", "SenderWide"),
            instance("sb", "SenderNarrow"),
            instance("r", "ReceiverWide"),
        ],
        links: vec![
            link("L0", "sa1", "o", "lp0", "r", "i"),
            link("L1", "sa2", "o", "lp0", "r", "i"),
            link("L2", "sb", "o", "lp0", "r", "i"),
        ],
        ..System::default()
    };
    clock_binding("sa1", &mut system, "clkA");
    clock_binding("sa2", &mut system, "clkA");
    clock_binding("sb", &mut system, "clkB");
    clock_binding("r", &mut system, "clkA");

    let mut nodes: SlotMap<TopoNodeId, TopoNode> = SlotMap::with_key();
    let n_a1 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "sa1.o".to_string() });
    let n_a2 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "sa2.o".to_string() });
    let n_b = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "sb.o".to_string() });
    let n_merge = nodes.insert(TopoNode { kind: TopoNodeKind::Merge, label: "merge".to_string() });
    let n_r = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r.i".to_string() });
    system.topology = TopologyGraph {
        nodes,
        edges: vec![
            TopoEdge { from: n_a1, to: n_merge, links: vec![0] },
            TopoEdge { from: n_a2, to: n_merge, links: vec![1] },
            TopoEdge { from: n_b, to: n_merge, links: vec![2] },
            TopoEdge { from: n_merge, to: n_r, links: vec![0, 1, 2] },
        ],
    };

    let system = driver::compile(system, &registry, &Catalog::builtin(), &CompileOptions::default()).expect("compile");

    let (_, merge_node) = system.netlist.nodes.iter().find(|(_, n)| n.kind == NodeKind::Merge).expect("one merge");
    let merge_clock = merge_node.clock_port().expect("merge has a clock-sink port");
    assert_eq!(system.netlist.ports[merge_clock].clock_domain.as_deref(), Some("clkA"));

    let crossings: Vec<_> = system.netlist.nodes.values().filter(|n| n.kind == NodeKind::ClockCross).collect();
    assert_eq!(crossings.len(), 1);
    let cc = crossings[0];
    let in_clock = cc.clock_port_in().unwrap();
    let out_clock = cc.clock_port_out().unwrap();
    assert_eq!(system.netlist.ports[in_clock].clock_domain.as_deref(), Some("clkB"));
    assert_eq!(system.netlist.ports[out_clock].clock_domain.as_deref(), Some("clkA"));
}

/// S5: a latency query through two Merges in series with
/// `register_merge: true`; each Merge output gets exactly one Register,
/// so the query returns 2.
#[test]
fn s5_latency_through_two_merges() {
    let mut registry = ComponentRegistry::new();
    registry.insert(sender_component("Sender", 8, vec![unicast("lp0", 0)])).unwrap();
    registry.insert(receiver_component("Receiver", 8, Vec::new())).unwrap();

    let mut system = System {
        instances: vec![instance("s0", "Sender"), instance("s1", "Sender"), instance("s2", "Sender"), instance("r", "Receiver")],
        links: vec![
            link("L0", "s0", "o", "lp0", "r", "i"),
            link("L1", "s1", "o", "lp0", "r", "i"),
            link("L2", "s2", "o", "lp0", "r", "i"),
        ],
        latency_queries: vec![interconnect_compile::ir::system::LatencyQuery {
            link_label: "L0".to_string(),
            param_name: "lat0".to_string(),
        }],
        ..System::default()
    };
    for owner in ["s0", "s1", "s2", "r"] {
        clock_binding(owner, &mut system, "clk0");
    }

    let mut nodes: SlotMap<TopoNodeId, TopoNode> = SlotMap::with_key();
    let n_s0 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s0.o".to_string() });
    let n_s1 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s1.o".to_string() });
    let n_s2 = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s2.o".to_string() });
    let n_merge1 = nodes.insert(TopoNode { kind: TopoNodeKind::Merge, label: "merge1".to_string() });
    let n_merge2 = nodes.insert(TopoNode { kind: TopoNodeKind::Merge, label: "merge2".to_string() });
    let n_r = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r.i".to_string() });
    system.topology = TopologyGraph {
        nodes,
        edges: vec![
            TopoEdge { from: n_s0, to: n_merge1, links: vec![0] },
            TopoEdge { from: n_s1, to: n_merge1, links: vec![1] },
            TopoEdge { from: n_merge1, to: n_merge2, links: vec![0, 1] },
            TopoEdge { from: n_s2, to: n_merge2, links: vec![2] },
            TopoEdge { from: n_merge2, to: n_r, links: vec![0, 1, 2] },
        ],
    };

    let options = CompileOptions { register_merge: true, ..Default::default() };
    let system = driver::compile(system, &registry, &Catalog::builtin(), &options).expect("compile");

    let registers = system.netlist.nodes.values().filter(|n| n.kind == NodeKind::Register).count();
    assert_eq!(registers, 2);
    assert_eq!(system.resolved_params.get("lat0"), Some(&2));
}

/// S6: a source exposing `linkpoint-id` feeding a sink that expects
/// `flow_id`; exactly one `FlowConvert` is spliced, with one conversion
/// table row per Flow traversing the connection.
#[test]
fn s6_linkpoint_to_flow_conversion() {
    // The sender's "o" interface exposes a raw `linkpoint-id` wire directly
    // (declared alongside its linkpoint catalog), which is what makes the
    // converter insertion trigger on the connection to the receiver.
    let mut registry = ComponentRegistry::new();
    let mut sender = sender_component("Sender", 8, vec![unicast("lpA", 5), unicast("lpB", 9)]);
    sender.interfaces[1].signals.push(sig(SignalRole::LinkpointId, 4));
    registry.insert(sender).unwrap();
    registry
        .insert(receiver_component("Receiver", 8, vec![sig(SignalRole::LinkId, 4)]))
        .unwrap();

    let mut system = System {
        instances: vec![instance("s", "Sender"), instance("r", "Receiver")],
        links: vec![link("L0", "s", "o", "lpA", "r", "i"), link("L1", "s", "o", "lpB", "r", "i")],
        ..System::default()
    };
    clock_binding("s", &mut system, "clk0");
    clock_binding("r", &mut system, "clk0");

    let mut nodes: SlotMap<TopoNodeId, TopoNode> = SlotMap::with_key();
    let n_s = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "s.o".to_string() });
    let n_r = nodes.insert(TopoNode { kind: TopoNodeKind::Source, label: "r.i".to_string() });
    system.topology = TopologyGraph { nodes, edges: vec![TopoEdge { from: n_s, to: n_r, links: vec![0, 1] }] };

    let system = driver::compile(system, &registry, &Catalog::builtin(), &CompileOptions::default()).expect("compile");

    let converters: Vec<_> = system.netlist.nodes.values().filter(|n| n.kind == NodeKind::FlowConvert).collect();
    assert_eq!(converters.len(), 1);
    assert_eq!(converters[0].component.as_deref(), Some("flow_convert_lp2flow[2]"));

    let out_port = converters[0].single_output().unwrap();
    assert_eq!(system.netlist.ports[out_port].protocol.logical["flow_id"].width, 1);
}
