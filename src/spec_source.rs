//! The one `SpecSource` this crate ships: a `serde_json`-backed fixture
//! format for driving the CLI and integration tests end-to-end in this
//! repository. It is not a reimplementation of any upstream hardware
//! description language, which stays out of scope.
//!
//! DTOs here are plain, `serde`-derived structs distinct from the core IR
//! types; `load` converts between the two so the IR itself never needs to
//! be `Deserialize` — it stays pure data with explicit parent/child
//! relations, not something meant to round-trip through an external wire
//! format.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::driver::SpecSource;
use crate::error::{CompileError, Result};
use crate::expr::Expr;
use crate::ir::component::{
    Component, ComponentRegistry, Direction, Interface, InterfaceType, Linkpoint, LinkpointType, Signal, SignalRole,
};
use crate::ir::system::{
    ExclusionGroup, Export, LatencyQuery, Link, LinkTarget, System, TopoEdge, TopoNode, TopoNodeId, TopoNodeKind,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDoc {
    pub role: String,
    #[serde(default)]
    pub subtype: String,
    pub width: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkpointDoc {
    pub name: String,
    pub ty: String,
    pub encoding: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDoc {
    pub name: String,
    pub ty: String,
    pub direction: String,
    #[serde(default)]
    pub clock_interface: Option<String>,
    #[serde(default)]
    pub signals: Vec<SignalDoc>,
    #[serde(default)]
    pub linkpoints: Vec<LinkpointDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDoc {
    pub name: String,
    pub interfaces: Vec<InterfaceDoc>,
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDoc {
    pub name: String,
    pub component: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDoc {
    pub interface: InterfaceDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkTargetDoc {
    pub instance: String,
    pub interface: String,
    #[serde(default)]
    pub linkpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDoc {
    #[serde(default)]
    pub label: Option<String>,
    pub src: LinkTargetDoc,
    pub dst: LinkTargetDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopoNodeDoc {
    pub id: String,
    pub kind: String,
    /// Required for `kind: "source"`: the `instance.interface` path this
    /// topology node resolves to.
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopoEdgeDoc {
    pub from: String,
    pub to: String,
    /// Indices into the top-level `links` array.
    #[serde(default)]
    pub links: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionGroupDoc {
    pub links: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyQueryDoc {
    pub link_label: String,
    pub param_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockBindingDoc {
    pub instance: String,
    pub clock_interface: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecDoc {
    #[serde(default)]
    pub components: Vec<ComponentDoc>,
    #[serde(default)]
    pub instances: Vec<InstanceDoc>,
    #[serde(default)]
    pub exports: Vec<ExportDoc>,
    #[serde(default)]
    pub links: Vec<LinkDoc>,
    #[serde(default)]
    pub global_params: BTreeMap<String, String>,
    #[serde(default)]
    pub topology_nodes: Vec<TopoNodeDoc>,
    #[serde(default)]
    pub topology_edges: Vec<TopoEdgeDoc>,
    #[serde(default)]
    pub exclusion_groups: Vec<ExclusionGroupDoc>,
    #[serde(default)]
    pub latency_queries: Vec<LatencyQueryDoc>,
    #[serde(default)]
    pub clock_bindings: Vec<ClockBindingDoc>,
}

pub struct JsonSpecSource;

impl SpecSource for JsonSpecSource {
    fn load(&self, path: &Path) -> Result<(ComponentRegistry, System)> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CompileError::spec(format!("reading `{}`: {e}", path.display())))?;
        let doc: SpecDoc = serde_json::from_str(&text)
            .map_err(|e| CompileError::spec(format!("parsing `{}`: {e}", path.display())))?;
        build_system(doc)
    }
}

fn parse_interface_type(s: &str) -> Result<InterfaceType> {
    match s {
        "clock" => Ok(InterfaceType::Clock),
        "reset" => Ok(InterfaceType::Reset),
        "data" => Ok(InterfaceType::Data),
        "conduit" => Ok(InterfaceType::Conduit),
        other => Err(CompileError::spec(format!("unknown interface type `{other}`"))),
    }
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "in" => Ok(Direction::In),
        "out" => Ok(Direction::Out),
        other => Err(CompileError::spec(format!("unknown direction `{other}`"))),
    }
}

fn parse_role(s: &str) -> Result<SignalRole> {
    match s {
        "clock" => Ok(SignalRole::Clock),
        "reset" => Ok(SignalRole::Reset),
        "data" => Ok(SignalRole::Data),
        "header" => Ok(SignalRole::Header),
        "valid" => Ok(SignalRole::Valid),
        "ready" => Ok(SignalRole::Ready),
        "sop" => Ok(SignalRole::Sop),
        "eop" => Ok(SignalRole::Eop),
        "linkpoint-id" => Ok(SignalRole::LinkpointId),
        "link-id" => Ok(SignalRole::LinkId),
        "conduit-in" => Ok(SignalRole::ConduitIn),
        "conduit-out" => Ok(SignalRole::ConduitOut),
        other => Err(CompileError::spec(format!("unknown signal role `{other}`"))),
    }
}

fn parse_linkpoint_type(s: &str) -> Result<LinkpointType> {
    match s {
        "unicast" => Ok(LinkpointType::Unicast),
        "broadcast" => Ok(LinkpointType::Broadcast),
        other => Err(CompileError::spec(format!("unknown linkpoint type `{other}`"))),
    }
}

fn convert_signal(doc: &SignalDoc) -> Result<Signal> {
    Ok(Signal {
        role: parse_role(&doc.role)?,
        subtype: doc.subtype.clone(),
        width: Expr::parse(&doc.width)?,
    })
}

fn convert_linkpoint(doc: &LinkpointDoc) -> Result<Linkpoint> {
    Ok(Linkpoint {
        name: doc.name.clone(),
        ty: parse_linkpoint_type(&doc.ty)?,
        encoding: doc.encoding,
    })
}

fn convert_interface(doc: &InterfaceDoc) -> Result<Interface> {
    Ok(Interface {
        name: doc.name.clone(),
        ty: parse_interface_type(&doc.ty)?,
        direction: parse_direction(&doc.direction)?,
        clock_interface: doc.clock_interface.clone(),
        signals: doc.signals.iter().map(convert_signal).collect::<Result<_>>()?,
        linkpoints: doc.linkpoints.iter().map(convert_linkpoint).collect::<Result<_>>()?,
    })
}

fn convert_component(doc: &ComponentDoc) -> Result<Component> {
    Ok(Component {
        name: doc.name.clone(),
        interfaces: doc.interfaces.iter().map(convert_interface).collect::<Result<_>>()?,
        parameters: doc.parameters.clone(),
    })
}

fn convert_params(doc: &BTreeMap<String, String>) -> Result<BTreeMap<String, Expr>> {
    doc.iter()
        .map(|(k, v)| Ok((crate::expr::canonical_param_name(k), Expr::parse(v)?)))
        .collect()
}

fn convert_link_target(doc: &LinkTargetDoc) -> LinkTarget {
    LinkTarget {
        instance: doc.instance.clone(),
        interface: doc.interface.clone(),
        linkpoint: doc.linkpoint.clone(),
    }
}

fn build_system(doc: SpecDoc) -> Result<(ComponentRegistry, System)> {
    let mut registry = ComponentRegistry::new();
    for comp_doc in &doc.components {
        registry.insert(convert_component(comp_doc)?)?;
    }

    let mut system = System {
        global_params: convert_params(&doc.global_params)?,
        ..System::default()
    };

    for inst in &doc.instances {
        system.instances.push(crate::ir::system::Instance {
            name: inst.name.clone(),
            component: inst.component.clone(),
            params: convert_params(&inst.params)?,
        });
    }
    for export in &doc.exports {
        system.exports.push(Export {
            interface: convert_interface(&export.interface)?,
        });
    }
    for link in &doc.links {
        system.links.push(Link {
            label: link.label.clone(),
            src: convert_link_target(&link.src),
            dst: convert_link_target(&link.dst),
        });
    }
    for group in &doc.exclusion_groups {
        system.exclusion_groups.push(ExclusionGroup {
            links: group.links.clone(),
        });
    }
    for q in &doc.latency_queries {
        system.latency_queries.push(LatencyQuery {
            link_label: q.link_label.clone(),
            param_name: q.param_name.clone(),
        });
    }
    for binding in &doc.clock_bindings {
        system
            .clock_bindings
            .insert((binding.instance.clone(), binding.clock_interface.clone()), binding.domain.clone());
    }

    let mut topo_nodes: SlotMap<TopoNodeId, TopoNode> = SlotMap::with_key();
    let mut id_of: BTreeMap<String, TopoNodeId> = BTreeMap::new();
    for node_doc in &doc.topology_nodes {
        let kind = match node_doc.kind.as_str() {
            "source" => TopoNodeKind::Source,
            "split" => TopoNodeKind::Split,
            "merge" => TopoNodeKind::Merge,
            other => return Err(CompileError::topology(format!("unknown topology node kind `{other}`"))),
        };
        if kind == TopoNodeKind::Source && node_doc.label.is_none() {
            return Err(CompileError::topology(format!(
                "topology source node `{}` is missing its `label`",
                node_doc.id
            )));
        }
        let label = node_doc.label.clone().unwrap_or_else(|| node_doc.id.clone());
        let id = topo_nodes.insert(TopoNode { kind, label });
        id_of.insert(node_doc.id.clone(), id);
    }
    let mut edges = Vec::with_capacity(doc.topology_edges.len());
    for edge_doc in &doc.topology_edges {
        let from = *id_of
            .get(&edge_doc.from)
            .ok_or_else(|| CompileError::topology(format!("topology edge names unknown node `{}`", edge_doc.from)))?;
        let to = *id_of
            .get(&edge_doc.to)
            .ok_or_else(|| CompileError::topology(format!("topology edge names unknown node `{}`", edge_doc.to)))?;
        edges.push(TopoEdge {
            from,
            to,
            links: edge_doc.links.clone(),
        });
    }
    system.topology.nodes = topo_nodes;
    system.topology.edges = edges;

    Ok((registry, system))
}
