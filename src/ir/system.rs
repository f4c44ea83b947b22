//! The system description: instances, exports, declarative links,
//! topology graph, exclusion groups and latency queries, plus the netlist
//! being built out of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

use crate::expr::Expr;
use crate::ir::component::Interface;
use crate::ir::netlist::Netlist;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub component: String,
    pub params: BTreeMap<String, Expr>,
}

/// A top-level port of the system. Carries a full interface definition
/// (signals, clock-interface reference, linkpoints) rather than just a
/// name and type, since the system boundary has no component instance to
/// borrow those from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    pub interface: Interface,
}

impl Export {
    pub fn name(&self) -> &str {
        &self.interface.name
    }
}

/// `(instance, interface, linkpoint)`. `linkpoint` is empty for links that
/// target a non-data interface (e.g. conduits), which have no linkpoints.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkTarget {
    pub instance: String,
    pub interface: String,
    pub linkpoint: String,
}

impl LinkTarget {
    pub fn path(&self) -> String {
        format!("{}.{}", self.instance, self.interface)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub label: Option<String>,
    pub src: LinkTarget,
    pub dst: LinkTarget,
}

new_key_type! { pub struct TopoNodeId; }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopoNodeKind {
    /// A declared endpoint: `label` is a `LinkTarget::path()`.
    Source,
    Split,
    Merge,
}

#[derive(Debug, Clone)]
pub struct TopoNode {
    pub kind: TopoNodeKind,
    pub label: String,
}

/// An edge carries the set of declarative `Link`s (by index into
/// `System::links`) routed over it.
#[derive(Debug, Clone)]
pub struct TopoEdge {
    pub from: TopoNodeId,
    pub to: TopoNodeId,
    pub links: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct TopologyGraph {
    pub nodes: SlotMap<TopoNodeId, TopoNode>,
    pub edges: Vec<TopoEdge>,
}

impl TopologyGraph {
    /// Edges in a fixed, reproducible enumeration order (insertion order).
    pub fn edges_in_order(&self) -> &[TopoEdge] {
        &self.edges
    }

    pub fn fan_out(&self, node: TopoNodeId) -> usize {
        self.edges.iter().filter(|e| e.from == node).count()
    }

    pub fn fan_in(&self, node: TopoNodeId) -> usize {
        self.edges.iter().filter(|e| e.to == node).count()
    }
}

#[derive(Debug, Clone)]
pub struct ExclusionGroup {
    /// Indices into `System::links` that never simultaneously carry
    /// traffic. Recorded but not yet exploited by the packer.
    pub links: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct LatencyQuery {
    pub link_label: String,
    pub param_name: String,
}

/// Identifies the clock net driving a clock-type interface on an instance
/// or export, resolved ahead of time by the populated input system (the
/// interconnect nodes inserted by passes C–F still need clock assignment
/// to resolve their own domains).
pub type ClockBindingKey = (String, String);

/// Reserved pseudo-instance name used to key export clock bindings in the
/// same map as instance clock bindings.
pub const EXPORT_PSEUDO_INSTANCE: &str = "$export";

#[derive(Debug, Default)]
pub struct System {
    pub instances: Vec<Instance>,
    pub exports: Vec<Export>,
    pub links: Vec<Link>,
    pub global_params: BTreeMap<String, Expr>,
    pub topology: TopologyGraph,
    pub exclusion_groups: Vec<ExclusionGroup>,
    pub latency_queries: Vec<LatencyQuery>,
    /// `(instance_or_"$export", clock_interface_name) -> canonical clock domain id`.
    pub clock_bindings: BTreeMap<ClockBindingKey, String>,
    /// Parameters bound by completed passes (e.g. latency query results).
    pub resolved_params: BTreeMap<String, i64>,

    pub netlist: Netlist,
    /// Flow ids in creation order, for deterministic iteration.
    pub flow_order: Vec<crate::ir::netlist::FlowId>,
    /// `System.links[i]`'s owning flow, populated by the elaborator. Every
    /// link belongs to exactly one flow.
    pub link_flows: Vec<crate::ir::netlist::FlowId>,
    /// Accumulated from the primitive catalog's per-entry `AreaMetrics` as
    /// `passes::topology` and `passes::register_insert` instantiate nodes;
    /// stays zero if the catalog supplies no metrics for a kind.
    pub area_metrics: crate::primitives::AreaMetrics,
}

impl System {
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name() == name)
    }

    pub fn link_by_label(&self, label: &str) -> Option<(usize, &Link)> {
        self.links
            .iter()
            .enumerate()
            .find(|(_, l)| l.label.as_deref() == Some(label))
    }

    /// Resolve a `LinkTarget`'s `(instance, interface)` pair to the
    /// concrete port it currently names, whether that's an `Instance`,
    /// `Export`, or (after topology realization) a `Split`/`Merge` port.
    pub fn resolve_target_port(&self, target: &LinkTarget) -> Option<crate::ir::netlist::PortId> {
        let node_name = if target.instance == EXPORT_PSEUDO_INSTANCE {
            "$export"
        } else {
            &target.instance
        };
        let node = self.netlist.find_node_by_name(node_name)?;
        self.netlist.find_port_by_name(node, &target.interface)
    }
}
