//! The netlist: nodes, ports, connections and flows, owned by arenas on
//! `System` with typed-index cross references — arena ownership replaces
//! the original system's cyclic back-pointers.

use std::collections::BTreeMap;

use slotmap::{SecondaryMap, SlotMap, new_key_type};

use crate::error::{CompileError, Result};
use crate::ir::component::{Direction, InterfaceType, Sense, Signal};
use crate::ir::protocol::Protocol;
use crate::ir::system::LinkTarget;

new_key_type! {
    pub struct NodeId;
    pub struct PortId;
    pub struct ConnectionId;
    pub struct FlowId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Instance,
    Export,
    Split,
    Merge,
    FlowConvert,
    ClockCross,
    Register,
}

impl NodeKind {
    pub fn is_interconnect(self) -> bool {
        !matches!(self, NodeKind::Instance | NodeKind::Export)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// For `Instance` nodes, the component this instance is of.
    pub component: Option<String>,
    /// Ports in a kind-specific, fixed convention:
    /// - `Split`: `[input, output_0, .., output_{k-1}]`
    /// - `Merge`: `[input_0, .., input_{k-1}, output]`
    /// - `Register`, `ClockCross`, `FlowConvert`: `[input, output]`
    /// - `Instance`, `Export`: one port per declared interface, insertion order.
    ///
    /// Clock-type ports are tracked separately in `clock_ports`, not here.
    pub ports: Vec<PortId>,
    /// The node's own clock-sink port(s): the vertex/vertices this node
    /// contributes to the clock-assignment graph. Every kind
    /// has exactly one except `ClockCross`, which straddles two domains
    /// (`[in, out]`). For `Instance`/`Export`, one entry per declared clock
    /// interface, in interface order.
    pub clock_ports: Vec<PortId>,
    /// `Register`-only: pipeline depth. Always `1` unless constructed
    /// directly with a different value.
    pub cycles: u32,
}

impl Node {
    /// The single clock-sink port for kinds with exactly one (everything
    /// but `ClockCross`, and the first one created on `Instance`/`Export`).
    pub fn clock_port(&self) -> Option<PortId> {
        self.clock_ports.first().copied()
    }

    pub fn clock_port_in(&self) -> Option<PortId> {
        self.clock_ports.first().copied()
    }

    pub fn clock_port_out(&self) -> Option<PortId> {
        match self.kind {
            NodeKind::ClockCross => self.clock_ports.get(1).copied(),
            _ => self.clock_ports.first().copied(),
        }
    }

    pub fn input_port(&self) -> Option<PortId> {
        match self.kind {
            NodeKind::Split => self.ports.first().copied(),
            NodeKind::Register | NodeKind::ClockCross | NodeKind::FlowConvert => {
                self.ports.first().copied()
            }
            _ => None,
        }
    }

    pub fn output_ports(&self) -> &[PortId] {
        match self.kind {
            NodeKind::Split => &self.ports[1.min(self.ports.len())..],
            _ => &[],
        }
    }

    pub fn merge_inputs(&self) -> &[PortId] {
        match self.kind {
            NodeKind::Merge if !self.ports.is_empty() => &self.ports[..self.ports.len() - 1],
            _ => &[],
        }
    }

    pub fn merge_output(&self) -> Option<PortId> {
        match self.kind {
            NodeKind::Merge => self.ports.last().copied(),
            _ => None,
        }
    }

    pub fn single_output(&self) -> Option<PortId> {
        match self.kind {
            NodeKind::Register | NodeKind::ClockCross | NodeKind::FlowConvert => {
                self.ports.get(1).copied()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub ty: InterfaceType,
    pub direction: Direction,
    pub node: NodeId,
    /// For data ports, the clock-sink port on the same node.
    pub clock_port: Option<PortId>,
    /// Resolved clock domain id, set once on terminals (Instance/Export) at
    /// elaboration, and by the clock assigner for interconnect nodes.
    pub clock_domain: Option<String>,
    pub protocol: Protocol,
    /// The outgoing signal list inherited from the component `Interface`
    /// (empty for synthetic interconnect ports).
    pub signals: Vec<Signal>,
    /// The single connection this port participates in: as source if it
    /// drives one, as a sink otherwise. A port never appears as a sink in
    /// more than one connection.
    pub connection: Option<ConnectionId>,
    /// Declarative `Link`s that traverse this port, recorded by the
    /// topology realizer to support latency queries.
    pub links: Vec<LinkTarget>,
    pub flows: Vec<FlowId>,
}

impl Port {
    pub fn new(name: impl Into<String>, ty: InterfaceType, direction: Direction, node: NodeId) -> Self {
        Port {
            name: name.into(),
            ty,
            direction,
            node,
            clock_port: None,
            clock_domain: None,
            protocol: Protocol::default(),
            signals: Vec::new(),
            connection: None,
            links: Vec::new(),
            flows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub src: PortId,
    pub sinks: Vec<PortId>,
}

#[derive(Debug, Clone)]
pub struct FlowTarget {
    pub port: PortId,
    pub link: LinkTarget,
}

#[derive(Debug, Clone)]
pub struct Flow {
    /// Globally unique per system, stable for the life of the `Flow`
    /// (assigned in creation order by the elaborator).
    pub id_num: u32,
    pub source: FlowTarget,
    pub sinks: Vec<FlowTarget>,
}

/// The mutable netlist under construction/transformation. Owned by
/// `System`; every pass after elaboration mutates this in place.
#[derive(Debug, Default)]
pub struct Netlist {
    pub nodes: SlotMap<NodeId, Node>,
    pub ports: SlotMap<PortId, Port>,
    pub connections: SlotMap<ConnectionId, Connection>,
    pub flows: SlotMap<FlowId, Flow>,

    /// `sink port -> connection` reverse index, maintained by `connect`
    /// and `splice_replace_sink`, enforcing the at-most-one-inbound-
    /// connection rule.
    sink_index: SecondaryMap<PortId, ConnectionId>,
    /// `source port -> connection` reverse index.
    src_index: SecondaryMap<PortId, ConnectionId>,
}

impl Netlist {
    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    pub fn add_port(&mut self, node: NodeId, port: Port) -> PortId {
        let id = self.ports.insert(port);
        self.nodes[node].ports.push(id);
        id
    }

    /// Add a clock-type port that exists only as a clock-assignment vertex
    /// (interconnect nodes: no backing declared interface), distinct from
    /// the data-port convention list (see [`Node::clock_ports`]).
    pub fn add_clock_port(&mut self, node: NodeId, port: Port) -> PortId {
        let id = self.ports.insert(port);
        self.nodes[node].clock_ports.push(id);
        id
    }

    /// Record that an already-created port (e.g. one of `Instance`/`Export`'s
    /// per-interface ports) also serves as a clock-assignment vertex.
    pub fn mark_clock_port(&mut self, node: NodeId, port: PortId) {
        self.nodes[node].clock_ports.push(port);
    }

    /// Connection feeding `port` as a sink, if any.
    pub fn feeding_connection(&self, port: PortId) -> Option<ConnectionId> {
        self.sink_index.get(port).copied()
    }

    /// Connection driven by `port` as a source, if any.
    pub fn driving_connection(&self, port: PortId) -> Option<ConnectionId> {
        self.src_index.get(port).copied()
    }

    pub fn upstream_of(&self, sink: PortId) -> Option<PortId> {
        self.feeding_connection(sink)
            .map(|c| self.connections[c].src)
    }

    pub fn downstream_of(&self, src: PortId) -> Vec<PortId> {
        self.driving_connection(src)
            .map(|c| self.connections[c].sinks.clone())
            .unwrap_or_default()
    }

    /// Connect `src -> sink`, creating a new `Connection` or extending an
    /// existing fan-out from `src`: if the source port has no outbound
    /// connection yet, create one; otherwise append the new sink.
    pub fn connect(&mut self, src: PortId, sink: PortId) -> Result<ConnectionId> {
        if self.sink_index.contains_key(sink) {
            return Err(CompileError::internal(
                "connect: sink port already has an inbound connection",
            ));
        }
        let conn_id = if let Some(&existing) = self.src_index.get(src) {
            self.connections[existing].sinks.push(sink);
            existing
        } else {
            let id = self.connections.insert(Connection {
                src,
                sinks: vec![sink],
            });
            self.src_index.insert(src, id);
            id
        };
        self.sink_index.insert(sink, conn_id);
        self.ports[sink].connection = Some(conn_id);
        if self.ports[src].connection.is_none() {
            self.ports[src].connection = Some(conn_id);
        }
        Ok(conn_id)
    }

    /// Splice a new node with single input/output ports into the connection
    /// feeding `old_sink`, so that `upstream -> new_input` and
    /// `new_output -> old_sink` replace `upstream -> old_sink`. Used by the
    /// converter inserter, clock-crossing insertion, and register insertion.
    pub fn splice_before(
        &mut self,
        old_sink: PortId,
        new_input: PortId,
        new_output: PortId,
    ) -> Result<()> {
        let conn_id = self
            .feeding_connection(old_sink)
            .ok_or_else(|| CompileError::routing("splice_before: sink has no driving connection"))?;
        let upstream = self.connections[conn_id].src;
        // Detach old_sink from its old connection, rewire it onto new_output.
        if let Some(pos) = self.connections[conn_id].sinks.iter().position(|&p| p == old_sink) {
            self.connections[conn_id].sinks.remove(pos);
        }
        self.sink_index.remove(old_sink);
        self.connect(upstream, new_input)?;
        self.connect(new_output, old_sink)?;
        Ok(())
    }

    pub fn node_of(&self, port: PortId) -> NodeId {
        self.ports[port].node
    }

    /// Look up a node by its (unique) name — `Instance` nodes are named
    /// after the instance, the single `Export` node is named `"$export"`.
    pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|(_, n)| n.name == name).map(|(id, _)| id)
    }

    /// Look up a data/clock/reset/conduit port on `node` by its declared
    /// interface name.
    pub fn find_port_by_name(&self, node: NodeId, name: &str) -> Option<PortId> {
        self.nodes[node]
            .ports
            .iter()
            .chain(self.nodes[node].clock_ports.iter())
            .copied()
            .find(|&p| self.ports[p].name == name)
    }

    /// All data ports in deterministic (insertion) order.
    pub fn data_ports(&self) -> Vec<PortId> {
        let mut ports: Vec<PortId> = self
            .ports
            .iter()
            .filter(|(_, p)| p.ty == InterfaceType::Data)
            .map(|(id, _)| id)
            .collect();
        ports.sort_by_key(|id| self.ports[*id].name.clone());
        ports
    }

    /// All data connections, ordered by the source port's name for
    /// determinism.
    pub fn data_connections(&self) -> Vec<ConnectionId> {
        let mut conns: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| self.ports[c.src].ty == InterfaceType::Data)
            .map(|(id, _)| id)
            .collect();
        conns.sort_by_key(|id| self.ports[self.connections[*id].src].name.clone());
        conns
    }

    pub fn widths_for(&self, ports: &[PortId]) -> BTreeMap<String, (i64, Sense)> {
        let mut out = BTreeMap::new();
        for &p in ports {
            out.extend(self.ports[p].protocol.widths());
        }
        out
    }
}
