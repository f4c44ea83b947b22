//! Pass I: the query processor. Currently the only query
//! kind is `latency(link_label -> parameter_name)`: walk forward from a
//! Link's source port, following the outgoing port whose recorded `links`
//! carry that Link at every branch point, counting `Register` nodes along
//! the way.

use std::collections::HashSet;

use tracing::instrument;

use crate::error::{CompileError, Result};
use crate::expr::canonical_param_name;
use crate::ir::netlist::{NodeKind, PortId};
use crate::ir::system::{LatencyQuery, System};

#[instrument(level = "debug", skip_all)]
pub fn run_latency_queries(system: &mut System) -> Result<()> {
    let queries = system.latency_queries.clone();
    for q in &queries {
        let value = latency(system, q)?;
        system
            .resolved_params
            .insert(canonical_param_name(&q.param_name), value);
    }
    Ok(())
}

fn latency(system: &System, query: &LatencyQuery) -> Result<i64> {
    let (link_idx, link) = system.link_by_label(&query.link_label).ok_or_else(|| {
        CompileError::routing(format!("latency query references unknown link `{}`", query.link_label))
    })?;
    let flow_id = system.link_flows[link_idx];
    let mut cur = system.netlist.flows[flow_id].source.port;
    let mut count = 0i64;
    let mut visited: HashSet<PortId> = HashSet::new();

    loop {
        if !visited.insert(cur) {
            return Err(CompileError::routing("cycle detected while answering a latency query"));
        }
        let sinks = system.netlist.downstream_of(cur);
        let next_sink = pick_port_for_link(system, &sinks, &link.src, &link.dst)?;

        let node_id = system.netlist.node_of(next_sink);
        let kind = system.netlist.nodes[node_id].kind;
        if kind == NodeKind::Register {
            count += system.netlist.nodes[node_id].cycles as i64;
        }
        match kind {
            NodeKind::Instance | NodeKind::Export => return Ok(count),
            NodeKind::Split => {
                let outputs = system.netlist.nodes[node_id].output_ports();
                cur = pick_port_for_link(system, outputs, &link.src, &link.dst)?;
            }
            NodeKind::Merge => {
                cur = system.netlist.nodes[node_id]
                    .merge_output()
                    .ok_or_else(|| CompileError::internal("merge node missing output port"))?;
            }
            NodeKind::Register | NodeKind::ClockCross | NodeKind::FlowConvert => {
                cur = system.netlist.nodes[node_id]
                    .single_output()
                    .ok_or_else(|| CompileError::internal("pass-through node missing output port"))?;
            }
        }
    }
}

/// Pick the single port in `candidates` whose recorded `links` carry this
/// Link's source or destination target. With exactly one candidate there
/// is nothing to disambiguate.
fn pick_port_for_link(
    system: &System,
    candidates: &[PortId],
    src_target: &crate::ir::system::LinkTarget,
    dst_target: &crate::ir::system::LinkTarget,
) -> Result<PortId> {
    if candidates.len() == 1 {
        return Ok(candidates[0]);
    }
    candidates
        .iter()
        .copied()
        .find(|&p| {
            let links = &system.netlist.ports[p].links;
            links.contains(src_target) || links.contains(dst_target)
        })
        .ok_or_else(|| CompileError::routing("latency query: no outgoing port carries this link"))
}
