//! The in-memory intermediate representation: components, instances,
//! linkpoints, signals, links, instances, and the topology graph. Mutable
//! throughout the compile pipeline.

pub mod component;
pub mod netlist;
pub mod protocol;
pub mod resolver;
pub mod system;

pub use component::{Component, ComponentRegistry, Direction, Interface, InterfaceType, Linkpoint, LinkpointType, Sense, Signal, SignalRole};
pub use netlist::{Connection, ConnectionId, Flow, FlowId, FlowTarget, Netlist, Node, NodeId, NodeKind, Port, PortId};
pub use protocol::{FieldState, LogicalField, PhysicalField, Protocol, XDATA};
pub use system::{Export, ExclusionGroup, Instance, LatencyQuery, Link, LinkTarget, System, TopoEdge, TopoNode, TopoNodeId, TopoNodeKind, TopologyGraph};
