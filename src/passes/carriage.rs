//! Pass G: carriage propagation and bit packing. This is the algorithmic
//! core of the compiler.
//!
//! For every `Flow`, every sink is walked backward to the source,
//! accumulating the set of logical fields that must be carried across each
//! hop (forward-sense fields: data, header, valid, sop, eop, flow_id,
//! linkpoint_id). A symmetric pass walks the same route the other way for
//! reverse-sense fields (`ready`), since those physically travel from sink
//! to source. Each interconnect node's ports record the carriage sets they
//! saw; once every flow has been walked, every physical field is bit-packed
//! and pass-through nodes copy their packed layout to the port that didn't
//! do the packing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::instrument;

use crate::error::{CompileError, Result};
use crate::ir::component::Sense;
use crate::ir::netlist::{FlowId, NodeKind, PortId};
use crate::ir::protocol::XDATA;
use crate::ir::system::System;

#[instrument(level = "debug", skip_all)]
pub fn propagate_and_pack(system: &mut System) -> Result<()> {
    let widths = collect_widths(system);

    let flow_ids = system.flow_order.clone();
    for flow_id in flow_ids {
        let sinks: Vec<PortId> = system.netlist.flows[flow_id].sinks.iter().map(|t| t.port).collect();
        for sink_port in sinks {
            let hops = trace_hops(system, flow_id, sink_port)?;
            propagate_forward(system, &hops, &widths)?;
            propagate_reverse(system, &hops, &widths)?;
        }
    }

    finalize_split_merge(system, &widths)?;
    finalize_pass_through(system)?;
    pack_terminal_ports(system)?;
    Ok(())
}

/// Width/sense lookup across every port's directly-declared logical
/// fields, used when [`crate::ir::protocol::Protocol::carry_on`] sees a
/// field it hasn't recorded locally yet.
fn collect_widths(system: &System) -> BTreeMap<String, (i64, Sense)> {
    let mut widths = BTreeMap::new();
    for (_, port) in system.netlist.ports.iter() {
        widths.extend(port.protocol.widths());
    }
    widths
}

/// One connection hop, `(driving port, driven port)`, in the order
/// encountered while walking backward from a flow's sink to its source:
/// `hops[0]` is nearest the sink, `hops.last()` is nearest the source.
type Hop = (PortId, PortId);

/// Walk backward from `sink_port` to `flow_id`'s source, one connection at
/// a time. At each interconnect node the walk continues from the node's
/// own input port (or, for `Merge`, whichever input carries this flow).
fn trace_hops(system: &System, flow_id: FlowId, sink_port: PortId) -> Result<Vec<Hop>> {
    let mut hops = Vec::new();
    let mut cur = sink_port;
    let limit = system.netlist.nodes.len() + system.netlist.ports.len() + 1;
    loop {
        let src = system.netlist.upstream_of(cur).ok_or_else(|| {
            CompileError::routing("flow route hit a disconnected port while tracing carriage")
        })?;
        hops.push((src, cur));
        if hops.len() > limit {
            return Err(CompileError::routing("cycle detected while tracing flow route"));
        }
        let node_id = system.netlist.node_of(src);
        let node = &system.netlist.nodes[node_id];
        if !node.kind.is_interconnect() {
            return Ok(hops);
        }
        cur = match node.kind {
            NodeKind::Split => node
                .input_port()
                .ok_or_else(|| CompileError::internal("split node missing input port"))?,
            NodeKind::Merge => *node
                .merge_inputs()
                .iter()
                .find(|&&p| system.netlist.ports[p].flows.contains(&flow_id))
                .ok_or_else(|| CompileError::internal("merge node has no input carrying this flow"))?,
            NodeKind::Register | NodeKind::ClockCross | NodeKind::FlowConvert => node
                .input_port()
                .ok_or_else(|| CompileError::internal("pass-through node missing input port"))?,
            NodeKind::Instance | NodeKind::Export => unreachable!("checked above"),
        };
    }
}

/// Physical field a logical field packs into: `data`/`header` (and
/// subtyped variants) share `xdata`; every other role gets its own
/// dedicated, 1:1 physical field named after itself, matching the
/// port-construction convention used during elaboration.
fn target_phys_field(name: &str) -> String {
    if name == "data" || name.starts_with("data_") || name == "header" || name.starts_with("header_") {
        XDATA.to_string()
    } else {
        name.to_string()
    }
}

fn carry_grouped(
    system: &mut System,
    port: PortId,
    fields: &BTreeSet<String>,
    widths: &BTreeMap<String, (i64, Sense)>,
) -> Result<()> {
    if fields.is_empty() {
        return Ok(());
    }
    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for f in fields {
        groups.entry(target_phys_field(f)).or_default().insert(f.clone());
    }
    for (phys, set) in groups {
        system.netlist.ports[port].protocol.carry_on(&phys, &set, widths)?;
    }
    Ok(())
}

/// Forward-sense propagation: walk the hops from
/// sink to source, growing `carriage_set` with what the downstream side of
/// each hop locally requires, shrinking it by what the upstream side
/// locally produces, and recording the remainder on the upstream
/// (interconnect) port.
fn propagate_forward(
    system: &mut System,
    hops: &[Hop],
    widths: &BTreeMap<String, (i64, Sense)>,
) -> Result<()> {
    let mut carriage: BTreeSet<String> = BTreeSet::new();
    for &(src, dst) in hops {
        carriage.extend(system.netlist.ports[dst].protocol.local_fields(Sense::Forward));
        for f in system.netlist.ports[src].protocol.local_fields(Sense::Forward) {
            carriage.remove(&f);
        }
        if system.netlist.nodes[system.netlist.node_of(src)].kind.is_interconnect() {
            carry_grouped(system, src, &carriage, widths)?;
        }
    }
    Ok(())
}

/// Reverse-sense propagation: the symmetric pass for `ready` et al.
/// Reverse-sense information physically travels from sink to source, so
/// relative to the hops (ordered sink -> source) the roles of driving and
/// driven side swap, and the walk runs from source to sink (`hops.rev()`).
fn propagate_reverse(
    system: &mut System,
    hops: &[Hop],
    widths: &BTreeMap<String, (i64, Sense)>,
) -> Result<()> {
    let mut carriage: BTreeSet<String> = BTreeSet::new();
    for &(src, dst) in hops.iter().rev() {
        carriage.extend(system.netlist.ports[src].protocol.local_fields(Sense::Reverse));
        for f in system.netlist.ports[dst].protocol.local_fields(Sense::Reverse) {
            carriage.remove(&f);
        }
        if system.netlist.nodes[system.netlist.node_of(dst)].kind.is_interconnect() {
            carry_grouped(system, dst, &carriage, widths)?;
        }
    }
    Ok(())
}

fn pack_all_physical(system: &mut System, port: PortId) -> Result<()> {
    let names: Vec<String> = system.netlist.ports[port].protocol.physical.keys().cloned().collect();
    for name in names {
        system.netlist.ports[port].protocol.pack_physical_field(&name)?;
    }
    Ok(())
}

/// Split: the single input is the canonical side (it must be wide enough
/// for the union of every output branch's requirements); each output
/// copies the input's packed layout. Merge: the single output is already
/// canonical (every flow's hop calls `carry_on` on it directly); each
/// input copies the output's packed layout.
fn finalize_split_merge(system: &mut System, widths: &BTreeMap<String, (i64, Sense)>) -> Result<()> {
    let nodes: Vec<(crate::ir::netlist::NodeId, NodeKind)> =
        system.netlist.nodes.iter().map(|(id, n)| (id, n.kind)).collect();

    for (node_id, kind) in nodes {
        match kind {
            NodeKind::Split => {
                let input = system.netlist.nodes[node_id]
                    .input_port()
                    .ok_or_else(|| CompileError::internal("split node missing input port"))?;
                let outputs = system.netlist.nodes[node_id].output_ports().to_vec();

                let mut union_by_phys: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
                for &out in &outputs {
                    for (name, state) in &system.netlist.ports[out].protocol.state {
                        if let Some(pf) = &state.phys_field {
                            union_by_phys.entry(pf.clone()).or_default().insert(name.clone());
                        }
                    }
                }
                for (phys, set) in &union_by_phys {
                    system.netlist.ports[input].protocol.carry_on(phys, set, widths)?;
                }
                pack_all_physical(system, input)?;

                let input_protocol = system.netlist.ports[input].protocol.clone();
                let phys_names: Vec<String> = input_protocol.physical.keys().cloned().collect();
                for &out in &outputs {
                    for pf in &phys_names {
                        system.netlist.ports[out].protocol.copy_carriage_from(&input_protocol, pf);
                    }
                }
            }
            NodeKind::Merge => {
                let output = system.netlist.nodes[node_id]
                    .merge_output()
                    .ok_or_else(|| CompileError::internal("merge node missing output port"))?;
                let inputs = system.netlist.nodes[node_id].merge_inputs().to_vec();

                pack_all_physical(system, output)?;
                let output_protocol = system.netlist.ports[output].protocol.clone();
                let phys_names: Vec<String> = output_protocol.physical.keys().cloned().collect();
                for &inp in &inputs {
                    for pf in &phys_names {
                        system.netlist.ports[inp].protocol.copy_carriage_from(&output_protocol, pf);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Register, ClockCross, FlowConvert: one input, one output, identical
/// carriage on both sides for every field neither side locally owns.
/// FlowConvert adds flow_id on the flow side and linkpoint_id on the
/// linkpoint side; otherwise it carries data/header pass-through.
fn finalize_pass_through(system: &mut System) -> Result<()> {
    let nodes: Vec<(crate::ir::netlist::NodeId, NodeKind)> =
        system.netlist.nodes.iter().map(|(id, n)| (id, n.kind)).collect();

    for (node_id, kind) in nodes {
        let (input, output, local_names): (PortId, PortId, &[&str]) = match kind {
            NodeKind::Register | NodeKind::ClockCross => {
                let input = system.netlist.nodes[node_id]
                    .input_port()
                    .ok_or_else(|| CompileError::internal("pass-through node missing input port"))?;
                let output = system.netlist.nodes[node_id]
                    .single_output()
                    .ok_or_else(|| CompileError::internal("pass-through node missing output port"))?;
                (input, output, &[][..])
            }
            NodeKind::FlowConvert => {
                let input = system.netlist.nodes[node_id]
                    .input_port()
                    .ok_or_else(|| CompileError::internal("flow-convert node missing input port"))?;
                let output = system.netlist.nodes[node_id]
                    .single_output()
                    .ok_or_else(|| CompileError::internal("flow-convert node missing output port"))?;
                (input, output, &["flow_id", "linkpoint_id"][..])
            }
            _ => continue,
        };
        sync_pass_through(system, input, output, local_names)?;
    }
    Ok(())
}

/// Pack whichever side recorded a field's carriage (`Sense::Forward`
/// fields land on `output` via the forward pass; `Sense::Reverse` fields
/// land on `input` via the reverse pass) and copy that packed layout to
/// the other side, skipping fields the node itself locally owns on one
/// side only.
fn sync_pass_through(system: &mut System, input: PortId, output: PortId, local_names: &[&str]) -> Result<()> {
    pack_all_physical(system, input)?;
    pack_all_physical(system, output)?;

    let names: BTreeSet<String> = system.netlist.ports[input]
        .protocol
        .physical
        .keys()
        .chain(system.netlist.ports[output].protocol.physical.keys())
        .cloned()
        .collect();

    for name in &names {
        if local_names.contains(&name.as_str()) {
            continue;
        }
        let sense = system.netlist.ports[output]
            .protocol
            .physical
            .get(name)
            .map(|pf| pf.sense.0)
            .or_else(|| system.netlist.ports[input].protocol.physical.get(name).map(|pf| pf.sense.0));
        match sense {
            Some(Sense::Forward) => {
                let out_protocol = system.netlist.ports[output].protocol.clone();
                system.netlist.ports[input].protocol.copy_carriage_from(&out_protocol, name);
            }
            Some(Sense::Reverse) => {
                let in_protocol = system.netlist.ports[input].protocol.clone();
                system.netlist.ports[output].protocol.copy_carriage_from(&in_protocol, name);
            }
            None => {}
        }
    }
    Ok(())
}

/// Terminal (`Instance`/`Export`) ports never receive `carry_on` calls —
/// only interconnect ports do — but pack unconditionally anyway so a
/// terminal whose only fields are its own directly-declared signals still
/// ends up with a finalized, non-negative `phys_field_lo` (elaboration
/// already packs `xdata` once; this repacks after any default/const
/// bookkeeping nothing here touches widths, so it is idempotent).
fn pack_terminal_ports(system: &mut System) -> Result<()> {
    let ports: Vec<PortId> = system
        .netlist
        .ports
        .iter()
        .filter(|(_, p)| !system.netlist.nodes[p.node].kind.is_interconnect())
        .map(|(id, _)| id)
        .collect();
    for port in ports {
        pack_all_physical(system, port)?;
    }
    Ok(())
}
