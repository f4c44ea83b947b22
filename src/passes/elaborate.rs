//! Pass B: expand the system description into an initial netlist of
//! `Instance`/`Export` nodes and the `Flow`s derived from declarative
//! `Link`s.

use std::collections::BTreeMap;

use tracing::instrument;

use crate::error::{CompileError, Result};
use crate::ir::component::{Component, ComponentRegistry, Interface, InterfaceType, Linkpoint, LinkpointType};
use crate::ir::netlist::{Flow, FlowId, FlowTarget, Node, NodeId, NodeKind, Port, PortId};
use crate::ir::resolver::{GlobalScope, InstanceScope};
use crate::ir::system::{LinkTarget, System, EXPORT_PSEUDO_INSTANCE};

struct ResolvedSignal {
    role_name: String,
    width: i64,
    sense: crate::ir::component::Sense,
}

struct ResolvedIface<'a> {
    iface: &'a Interface,
    direction: crate::ir::component::Direction,
    signals: Vec<ResolvedSignal>,
}

#[instrument(level = "debug", skip_all)]
pub fn elaborate(system: &mut System, registry: &ComponentRegistry) -> Result<()> {
    // --- Instances -------------------------------------------------------
    let instances = system.instances.clone();
    for inst in &instances {
        let comp = registry.get(&inst.component).ok_or_else(|| {
            CompileError::spec(format!(
                "instance `{}` references unknown component `{}`",
                inst.name, inst.component
            ))
        })?;
        let resolved = resolve_interfaces(comp, &InstanceScope::new(inst, system))?;

        let node_id = system.netlist.add_node(Node {
            name: inst.name.clone(),
            kind: NodeKind::Instance,
            component: Some(inst.component.clone()),
            ports: Vec::new(),
            clock_ports: Vec::new(),
            cycles: 1,
        });
        build_ports(system, node_id, &inst.name, &resolved)?;
        bind_clock_domains(system, node_id, &inst.name, &resolved);
    }

    // --- Export node -------------------------------------------------------
    let export_node = system.netlist.add_node(Node {
        name: "$export".to_string(),
        kind: NodeKind::Export,
        component: None,
        ports: Vec::new(),
        clock_ports: Vec::new(),
        cycles: 1,
    });
    let exports = system.exports.clone();
    let mut export_resolved = Vec::with_capacity(exports.len());
    for export in &exports {
        let global = GlobalScope { system };
        let mut signals = Vec::new();
        for sig in &export.interface.signals {
            let w = sig.width.eval(&global)?;
            check_control_width(&export.interface.name, sig, w)?;
            signals.push(ResolvedSignal {
                role_name: sig.field_name(),
                width: w,
                sense: sig.sense(),
            });
        }
        export_resolved.push(ResolvedIface {
            iface: &export.interface,
            // The export node faces inward: reverse the declared direction.
            direction: export.interface.direction.reversed(),
            signals,
        });
    }
    build_ports(system, export_node, EXPORT_PSEUDO_INSTANCE, &export_resolved)?;
    bind_clock_domains(system, export_node, EXPORT_PSEUDO_INSTANCE, &export_resolved);

    // --- Flows: bin links by (instance, interface, linkpoint) of the source.
    system.link_flows = vec![Default::default(); system.links.len()];
    let mut bins: BTreeMap<(String, String, String), Vec<usize>> = BTreeMap::new();
    for (idx, link) in system.links.iter().enumerate() {
        bins.entry((
            link.src.instance.clone(),
            link.src.interface.clone(),
            link.src.linkpoint.clone(),
        ))
        .or_default()
        .push(idx);
    }

    let mut next_flow_id: u32 = 0;
    for (_, link_indices) in bins {
        let src_target = system.links[link_indices[0]].src.clone();
        let lp = lookup_linkpoint(system, registry, &src_target)?;
        match lp.ty {
            LinkpointType::Broadcast => {
                let source_port = resolve_port(system, &src_target)?;
                let mut sinks = Vec::new();
                for &idx in &link_indices {
                    let dst_target = system.links[idx].dst.clone();
                    let sink_port = resolve_port(system, &dst_target)?;
                    sinks.push(FlowTarget {
                        port: sink_port,
                        link: dst_target,
                    });
                }
                let flow_id = create_flow(system, &mut next_flow_id, source_port, src_target, sinks)?;
                for &idx in &link_indices {
                    system.link_flows[idx] = flow_id;
                }
            }
            LinkpointType::Unicast => {
                if link_indices.len() > 1 {
                    return Err(CompileError::topology(format!(
                        "unicast linkpoint `{}` on `{}.{}` drives {} links",
                        src_target.linkpoint,
                        src_target.instance,
                        src_target.interface,
                        link_indices.len()
                    )));
                }
                let idx = link_indices[0];
                let source_port = resolve_port(system, &src_target)?;
                let dst_target = system.links[idx].dst.clone();
                let sink_port = resolve_port(system, &dst_target)?;
                let flow_id = create_flow(
                    system,
                    &mut next_flow_id,
                    source_port,
                    src_target,
                    vec![FlowTarget {
                        port: sink_port,
                        link: dst_target,
                    }],
                )?;
                system.link_flows[idx] = flow_id;
            }
        }
    }

    Ok(())
}

fn create_flow(
    system: &mut System,
    next_flow_id: &mut u32,
    source_port: PortId,
    source_link: LinkTarget,
    sinks: Vec<FlowTarget>,
) -> Result<FlowId> {
    let id_num = *next_flow_id;
    *next_flow_id += 1;
    let flow_id = system.netlist.flows.insert(Flow {
        id_num,
        source: FlowTarget {
            port: source_port,
            link: source_link,
        },
        sinks,
    });
    system.netlist.ports[source_port].flows.push(flow_id);
    let sink_ports: Vec<PortId> = system.netlist.flows[flow_id]
        .sinks
        .iter()
        .map(|t| t.port)
        .collect();
    for p in sink_ports {
        system.netlist.ports[p].flows.push(flow_id);
    }
    system.flow_order.push(flow_id);
    Ok(flow_id)
}

fn resolve_port(system: &System, target: &LinkTarget) -> Result<PortId> {
    system.resolve_target_port(target).ok_or_else(|| {
        CompileError::spec(format!(
            "link target `{}.{}` does not resolve to a port",
            target.instance, target.interface
        ))
    })
}

fn lookup_linkpoint<'a>(
    system: &'a System,
    registry: &'a ComponentRegistry,
    target: &LinkTarget,
) -> Result<&'a Linkpoint> {
    let iface = if target.instance == EXPORT_PSEUDO_INSTANCE {
        &system
            .export(&target.interface)
            .ok_or_else(|| {
                CompileError::spec(format!("link references unknown export `{}`", target.interface))
            })?
            .interface
    } else {
        let inst = system.instance(&target.instance).ok_or_else(|| {
            CompileError::spec(format!("link references unknown instance `{}`", target.instance))
        })?;
        let comp = registry.get(&inst.component).ok_or_else(|| {
            CompileError::spec(format!("instance `{}` references unknown component", inst.name))
        })?;
        comp.interface(&target.interface).ok_or_else(|| {
            CompileError::spec(format!(
                "instance `{}` has no interface `{}`",
                target.instance, target.interface
            ))
        })?
    };
    iface.linkpoint(&target.linkpoint).ok_or_else(|| {
        CompileError::spec(format!(
            "interface `{}.{}` has no linkpoint `{}`",
            target.instance, target.interface, target.linkpoint
        ))
    })
}

fn resolve_interfaces<'a>(comp: &'a Component, resolver: &InstanceScope) -> Result<Vec<ResolvedIface<'a>>> {
    let mut out = Vec::new();
    for iface in &comp.interfaces {
        let mut signals = Vec::new();
        for sig in &iface.signals {
            let w = sig.width.eval(resolver)?;
            check_control_width(&iface.name, sig, w)?;
            signals.push(ResolvedSignal {
                role_name: sig.field_name(),
                width: w,
                sense: sig.sense(),
            });
        }
        out.push(ResolvedIface {
            iface,
            direction: iface.direction,
            signals,
        });
    }
    Ok(out)
}

fn check_control_width(iface_name: &str, sig: &crate::ir::component::Signal, w: i64) -> Result<()> {
    if sig.role.is_control() && w != 1 {
        return Err(CompileError::spec(format!(
            "interface `{}` signal `{}` is control-role but resolved width {} != 1",
            iface_name,
            sig.field_name(),
            w
        )));
    }
    Ok(())
}

/// Data and header signals share the `xdata` physical field from the start
/// (so multi-bundle interfaces get the same greedy packing as anything the
/// carriage pass adds later); every other role keeps its own 1:1 physical
/// field, since control/addressing signals are never bit-packed together.
fn build_one_port(node_id: NodeId, resolved: &ResolvedIface) -> Result<Port> {
    let mut port = Port::new(resolved.iface.name.clone(), resolved.iface.ty, resolved.direction, node_id);
    let mut xdata_fields = std::collections::BTreeSet::new();
    for (sig, rs) in resolved.iface.signals.iter().zip(&resolved.signals) {
        let phys_field = match sig.role {
            crate::ir::component::SignalRole::Data | crate::ir::component::SignalRole::Header => {
                xdata_fields.insert(rs.role_name.clone());
                crate::ir::protocol::XDATA
            }
            _ => &rs.role_name,
        };
        port.protocol
            .declare_local_field(&rs.role_name, rs.width, rs.sense, phys_field);
    }
    port.protocol.ensure_xdata();
    port.protocol.note_concurrent_fields(crate::ir::protocol::XDATA, &xdata_fields);
    port.protocol.pack_physical_field(crate::ir::protocol::XDATA)?;
    port.signals = resolved.iface.signals.clone();
    Ok(port)
}

/// Create one port per resolved interface on `node_id`, wiring each data
/// port's `clock_port` to the port for its declared clock interface.
fn build_ports(system: &mut System, node_id: NodeId, owner_name: &str, resolved: &[ResolvedIface]) -> Result<()> {
    for ri in resolved {
        let port = build_one_port(node_id, ri)?;
        let port_id = system.netlist.add_port(node_id, port);
        if ri.iface.ty == InterfaceType::Clock {
            system.netlist.mark_clock_port(node_id, port_id);
        }
    }
    for ri in resolved {
        if let Some(clock_name) = &ri.iface.clock_interface {
            let data_port = system
                .netlist
                .find_port_by_name(node_id, &ri.iface.name)
                .expect("port just inserted above");
            let clock_port = system.netlist.find_port_by_name(node_id, clock_name).ok_or_else(|| {
                CompileError::spec(format!(
                    "`{}` interface `{}` names unknown clock interface `{}`",
                    owner_name, ri.iface.name, clock_name
                ))
            })?;
            system.netlist.ports[data_port].clock_port = Some(clock_port);
        }
    }
    Ok(())
}

/// Bind each clock-type port's `clock_domain` from `System.clock_bindings`,
/// pre-resolved by the populated input system ahead of elaboration.
fn bind_clock_domains(system: &mut System, node_id: NodeId, owner_name: &str, resolved: &[ResolvedIface]) {
    for ri in resolved {
        if ri.iface.ty != InterfaceType::Clock {
            continue;
        }
        let port_id = system
            .netlist
            .find_port_by_name(node_id, &ri.iface.name)
            .expect("clock port just inserted above");
        if let Some(domain) = system
            .clock_bindings
            .get(&(owner_name.to_string(), ri.iface.name.clone()))
        {
            system.netlist.ports[port_id].clock_domain = Some(domain.clone());
        }
    }
}
