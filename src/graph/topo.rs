//! Topological grouping of the task graph.
use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

/// Groups the nodes of `dag` in layers such that every node only depends on
/// nodes of strictly earlier layers.
///
/// This is Kahn's algorithm peeling one layer at a time. Nodes within a
/// layer are ordered by `key` so the grouping is deterministic.
///
/// On failure, returns the nodes which take part in a cycle.
pub(crate) fn layers<N, E, K, F>(
    dag: &DiGraph<N, E>,
    key: F,
) -> Result<Vec<Vec<NodeIndex>>, Vec<NodeIndex>>
where
    K: Ord,
    F: Fn(&N) -> K,
{
    let mut pending: HashMap<NodeIndex, usize> = dag
        .node_indices()
        .map(|i| (i, dag.neighbors_directed(i, Direction::Incoming).count()))
        .collect();

    let mut ready: Vec<NodeIndex> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(index, _)| *index)
        .collect();

    let mut layers = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
        ready.sort_by_key(|&i| key(&dag[i]));
        placed += ready.len();

        let mut next = Vec::new();
        for &index in &ready {
            pending.remove(&index);
            for child in dag.neighbors_directed(index, Direction::Outgoing) {
                if let Some(count) = pending.get_mut(&child) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(child);
                    }
                }
            }
        }

        layers.push(std::mem::replace(&mut ready, next));
    }

    if placed < dag.node_count() {
        return Err(cyclic(dag));
    }

    Ok(layers)
}

fn cyclic<N, E>(dag: &DiGraph<N, E>) -> Vec<NodeIndex> {
    let mut nodes: Vec<NodeIndex> = tarjan_scc(dag)
        .into_iter()
        .filter(|scc| scc.len() > 1 || dag.contains_edge(scc[0], scc[0]))
        .flatten()
        .collect();

    nodes.sort();
    nodes
}
