//! Generic graph utilities shared by the passes that need them: connected
//! components and shortest paths, built directly on `petgraph` rather than
//! hand-rolled (the min-cut/multiway-cut algorithms in
//! [`crate::netutil::mincut`] are the only graph services `petgraph`
//! doesn't already provide).

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences, NodeIndexable};
use petgraph::Graph;

/// Number of connected components of an undirected graph, ignoring edge
/// weights. Used by the clock assigner to detect a vertex with no path to
/// any terminal before running the (otherwise silent) multiway-cut solver.
pub fn connected_components<N, E, Ty, Ix>(graph: &Graph<N, E, Ty, Ix>) -> usize
where
    Ty: petgraph::EdgeType,
    Ix: petgraph::graph::IndexType,
{
    petgraph::algo::connected_components(graph)
}

/// Dijkstra shortest-path distances from `start`, with `i64` edge costs.
/// Determinism comes from `petgraph`'s binary-heap implementation breaking
/// ties by insertion order of edges, which in turn follows this crate's
/// deterministic graph-construction order.
pub fn dijkstra<N, Ty, Ix>(
    graph: &Graph<N, i64, Ty, Ix>,
    start: NodeIndex<Ix>,
    goal: Option<NodeIndex<Ix>>,
) -> HashMap<NodeIndex<Ix>, i64>
where
    Ty: petgraph::EdgeType,
    Ix: petgraph::graph::IndexType,
{
    petgraph::algo::dijkstra(graph, start, goal, |e| *e.weight())
}

/// Reorders `graph`'s node indices are left untouched; this just exposes
/// the node bound for callers building parallel `Vec`-indexed side tables.
pub fn node_bound<N, E, Ty, Ix>(graph: &Graph<N, E, Ty, Ix>) -> usize
where
    Ty: petgraph::EdgeType,
    Ix: petgraph::graph::IndexType,
{
    graph.node_bound()
}

/// Sum of edge weights incident to `node`, used when building terminal
/// merge weights for the multiway-cut construction.
pub fn incident_weight<N, Ty, Ix>(graph: &Graph<N, i64, Ty, Ix>, node: NodeIndex<Ix>) -> i64
where
    Ty: petgraph::EdgeType,
    Ix: petgraph::graph::IndexType,
{
    graph
        .edge_references()
        .filter(|e| e.source() == node || e.target() == node)
        .map(|e| *e.weight())
        .sum()
}
