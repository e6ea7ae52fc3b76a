//! DAG validation.
//!
//! Runs before every execution: a run either starts from a fully validated
//! DAG or is rejected before any node leaves `idle`.

use cybercore::{Edge, NodeId, NodeSpec, WorkflowError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Nodes in dependency order plus the graph's start nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoOrder {
    order: Vec<NodeId>,
    start_nodes: Vec<NodeId>,
}

impl TopoOrder {
    /// Every node appears after all of its transitive dependencies.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Nodes without incoming edges.
    pub fn start_nodes(&self) -> &[NodeId] {
        &self.start_nodes
    }

    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|n| *n == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Compute a topological order, or fail on the first cycle found.
///
/// Depth-first traversal marking nodes unvisited → in-progress → done;
/// reaching an in-progress node means a back edge. The result is the reverse
/// postorder. A graph without start nodes (including an empty one) is
/// rejected as well.
pub fn validate(nodes: &[NodeSpec], edges: &[Edge]) -> Result<TopoOrder, WorkflowError> {
    let graph = build_graph(nodes, edges)?;

    let mut marks = vec![Mark::Unvisited; graph.node_count()];
    let mut postorder = Vec::with_capacity(graph.node_count());

    for root in graph.node_indices() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }
        marks[root.index()] = Mark::InProgress;
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(root, successors(&graph, root))];

        while let Some(frame) = stack.last_mut() {
            let current = frame.0;
            match frame.1.pop() {
                Some(child) => match marks[child.index()] {
                    Mark::InProgress => {
                        tracing::warn!("Cycle detected at node {}", graph[child]);
                        return Err(WorkflowError::CyclicDependency { node: graph[child] });
                    }
                    Mark::Done => {}
                    Mark::Unvisited => {
                        marks[child.index()] = Mark::InProgress;
                        stack.push((child, successors(&graph, child)));
                    }
                },
                None => {
                    marks[current.index()] = Mark::Done;
                    postorder.push(graph[current]);
                    stack.pop();
                }
            }
        }
    }

    postorder.reverse();

    let start_nodes: Vec<NodeId> = graph
        .node_indices()
        .filter(|idx| {
            graph
                .neighbors_directed(*idx, Direction::Incoming)
                .next()
                .is_none()
        })
        .map(|idx| graph[idx])
        .collect();

    if start_nodes.is_empty() {
        return Err(WorkflowError::NoStartNodes);
    }

    Ok(TopoOrder {
        order: postorder,
        start_nodes,
    })
}

/// Build a dependency graph from the workflow
fn build_graph(nodes: &[NodeSpec], edges: &[Edge]) -> Result<DiGraph<NodeId, ()>, WorkflowError> {
    let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
    let mut node_to_index = HashMap::with_capacity(nodes.len());

    for node in nodes {
        let idx = graph.add_node(node.id);
        if node_to_index.insert(node.id, idx).is_some() {
            return Err(WorkflowError::Invalid(format!("duplicate node id {}", node.id)));
        }
    }

    for edge in edges {
        let from = node_to_index
            .get(&edge.source)
            .ok_or(WorkflowError::NodeNotFound(edge.source))?;
        let to = node_to_index
            .get(&edge.target)
            .ok_or(WorkflowError::NodeNotFound(edge.target))?;
        graph.add_edge(*from, *to, ());
    }

    Ok(graph)
}

/// Children in edge insertion order once popped off the back.
fn successors(graph: &DiGraph<NodeId, ()>, idx: NodeIndex) -> Vec<NodeIndex> {
    // petgraph yields outgoing neighbours newest first.
    graph.neighbors_directed(idx, Direction::Outgoing).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cybercore::NodeType;

    fn nodes(n: usize) -> Vec<NodeSpec> {
        (0..n).map(|_| NodeSpec::new(NodeType::PinnedInput)).collect()
    }

    #[test]
    fn diamond_orders_dependencies_first() {
        let n = nodes(4);
        let edges = vec![
            Edge::new(n[0].id, n[1].id),
            Edge::new(n[0].id, n[2].id),
            Edge::new(n[1].id, n[3].id),
            Edge::new(n[2].id, n[3].id),
        ];

        let topo = validate(&n, &edges).unwrap();

        assert_eq!(topo.len(), 4);
        assert_eq!(topo.start_nodes(), &[n[0].id]);
        for edge in &edges {
            assert!(topo.position(edge.source) < topo.position(edge.target));
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let n = nodes(2);
        let edges = vec![Edge::new(n[0].id, n[1].id), Edge::new(n[1].id, n[1].id)];

        let err = validate(&n, &edges).unwrap_err();
        assert_eq!(err, WorkflowError::CyclicDependency { node: n[1].id });
    }
}
