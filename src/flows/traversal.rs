//! Traversal resolver: which step a client sees next.
//!
//! Edges drive the order only when they form a well-shaped graph: acyclic,
//! weakly connected, and touching every node. The walk is then a
//! topological order with ties broken by `order_index`. Any other shape
//! (no edges, partial wiring, cycles) falls back to plain `order_index`
//! order. Nodes with `required = false` are never reported.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::{connected_components, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use uuid::Uuid;

use super::model::{FlowGraph, Node};

/// How the step order was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Edges,
    OrderIndex,
}

struct StepGraph {
    graph: DiGraph<usize, ()>,
    indices: Vec<NodeIndex>,
}

impl StepGraph {
    /// Build over `nodes` (positions into the slice). Edges that reference
    /// unknown nodes are dropped and reported through the second value.
    fn build(flow: &FlowGraph) -> (Self, bool) {
        let mut graph = DiGraph::new();
        let mut by_id = HashMap::new();
        let mut indices = Vec::with_capacity(flow.nodes.len());

        for (pos, node) in flow.nodes.iter().enumerate() {
            let idx = graph.add_node(pos);
            by_id.insert(node.id, idx);
            indices.push(idx);
        }

        let mut dangling = false;
        for edge in &flow.edges {
            match (by_id.get(&edge.source), by_id.get(&edge.target)) {
                (Some(&s), Some(&t)) => {
                    graph.add_edge(s, t, ());
                }
                _ => dangling = true,
            }
        }

        (Self { graph, indices }, dangling)
    }

    fn every_node_touched(&self) -> bool {
        self.indices.iter().all(|&idx| {
            self.graph.neighbors_undirected(idx).next().is_some()
        })
    }

    /// Kahn's algorithm, always releasing the ready node with the lowest
    /// `order_index` first.
    fn topological(&self, nodes: &[Node]) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self
            .indices
            .iter()
            .map(|&idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready = BinaryHeap::new();
        for (pos, &deg) in in_degree.iter().enumerate() {
            if deg == 0 {
                ready.push(Reverse((nodes[pos].order_index, pos)));
            }
        }

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(Reverse((_, pos))) = ready.pop() {
            order.push(pos);
            for next in self.graph.neighbors_directed(self.indices[pos], Direction::Outgoing) {
                let next_pos = self.graph[next];
                in_degree[next_pos] -= 1;
                if in_degree[next_pos] == 0 {
                    ready.push(Reverse((nodes[next_pos].order_index, next_pos)));
                }
            }
        }
        order
    }
}

/// The full step order for a flow.
#[derive(Debug, Clone, Serialize)]
pub struct StepPlan {
    pub strategy: Strategy,
    /// Every node, in presentation order.
    pub order: Vec<Uuid>,
}

/// Decide the strategy and compute the order of every node in the flow.
pub fn plan(flow: &FlowGraph) -> StepPlan {
    let (steps, dangling) = StepGraph::build(flow);

    let use_edges = !flow.edges.is_empty()
        && !dangling
        && steps.every_node_touched()
        && connected_components(&steps.graph) == 1
        && !is_cyclic_directed(&steps.graph);

    if use_edges {
        let order = steps
            .topological(&flow.nodes)
            .into_iter()
            .map(|pos| flow.nodes[pos].id)
            .collect();
        return StepPlan {
            strategy: Strategy::Edges,
            order,
        };
    }

    let mut sorted: Vec<&Node> = flow.nodes.iter().collect();
    sorted.sort_by_key(|n| n.order_index);
    StepPlan {
        strategy: Strategy::OrderIndex,
        order: sorted.into_iter().map(|n| n.id).collect(),
    }
}

/// The first required node not yet completed, or `None` when every required
/// node is done.
pub fn next_step<'a>(flow: &'a FlowGraph, completed: &HashSet<Uuid>) -> Option<&'a Node> {
    plan(flow)
        .order
        .into_iter()
        .filter_map(|id| flow.node(id))
        .find(|n| n.required && !completed.contains(&n.id))
}

/// Required nodes in presentation order.
pub fn required_steps(flow: &FlowGraph) -> Vec<&Node> {
    plan(flow)
        .order
        .into_iter()
        .filter_map(|id| flow.node(id))
        .filter(|n| n.required)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::model::{Edge, Flow, NewNode, NodeType};
    use serde_json::json;

    fn graph(nodes: Vec<Node>, pairs: &[(usize, usize)]) -> FlowGraph {
        let flow = Flow::new_draft(Uuid::new_v4(), "org-1");
        let edges = pairs
            .iter()
            .map(|&(s, t)| Edge::new(flow.id, nodes[s].id, nodes[t].id))
            .collect();
        let nodes = nodes
            .into_iter()
            .map(|mut n| {
                n.flow_id = flow.id;
                n
            })
            .collect();
        FlowGraph { flow, nodes, edges }
    }

    fn calls(n: u32) -> Vec<Node> {
        (0..n)
            .map(|i| NewNode::new(NodeType::Call, format!("step {i}")).into_node(Uuid::nil(), i))
            .collect()
    }

    fn ids(flow: &FlowGraph, positions: &[usize]) -> Vec<Uuid> {
        positions.iter().map(|&p| flow.nodes[p].id).collect()
    }

    #[test]
    fn no_edges_walks_order_index() {
        let nodes = vec![
            NewNode::new(NodeType::Welcome, "Welcome")
                .with_config("document_file", json!({"url": "https://f/w.pdf"}))
                .into_node(Uuid::nil(), 0),
            NewNode::new(NodeType::Payment, "Deposit")
                .with_config("stripe_url", json!("https://buy.stripe.com/x"))
                .into_node(Uuid::nil(), 1),
            NewNode::new(NodeType::Consent, "Consent")
                .with_config("terms_url", json!("https://t"))
                .with_config("privacy_url", json!("https://p"))
                .into_node(Uuid::nil(), 2),
        ];
        let flow = graph(nodes, &[]);
        let (welcome, payment, consent) = (flow.nodes[0].id, flow.nodes[1].id, flow.nodes[2].id);

        let mut done = HashSet::new();
        assert_eq!(next_step(&flow, &done).map(|n| n.id), Some(welcome));
        done.insert(welcome);
        assert_eq!(next_step(&flow, &done).map(|n| n.id), Some(payment));
        done.insert(payment);
        done.insert(consent);
        assert!(next_step(&flow, &done).is_none());
        assert_eq!(plan(&flow).strategy, Strategy::OrderIndex);
    }

    #[test]
    fn chain_overrides_order_index() {
        // Wired 2 -> 0 -> 1.
        let flow = graph(calls(3), &[(2, 0), (0, 1)]);
        let plan = plan(&flow);
        assert_eq!(plan.strategy, Strategy::Edges);
        assert_eq!(plan.order, ids(&flow, &[2, 0, 1]));
        assert_eq!(next_step(&flow, &HashSet::new()).unwrap().id, flow.nodes[2].id);
    }

    #[test]
    fn branches_break_ties_by_order_index() {
        // 0 -> {3, 1}, both -> 2
        let flow = graph(calls(4), &[(0, 3), (0, 1), (3, 2), (1, 2)]);
        assert_eq!(plan(&flow).order, ids(&flow, &[0, 1, 3, 2]));
    }

    #[test]
    fn cycle_falls_back_to_order_index() {
        let flow = graph(calls(3), &[(2, 0), (0, 1), (1, 2)]);
        let plan = plan(&flow);
        assert_eq!(plan.strategy, Strategy::OrderIndex);
        assert_eq!(plan.order, ids(&flow, &[0, 1, 2]));
    }

    #[test]
    fn self_loop_falls_back() {
        let flow = graph(calls(2), &[(1, 0), (0, 0)]);
        assert_eq!(plan(&flow).strategy, Strategy::OrderIndex);
    }

    #[test]
    fn partial_wiring_falls_back() {
        // Node 2 is not touched by any edge.
        let flow = graph(calls(3), &[(1, 0)]);
        assert_eq!(plan(&flow).strategy, Strategy::OrderIndex);

        // Two disconnected pairs.
        let flow = graph(calls(4), &[(1, 0), (3, 2)]);
        assert_eq!(plan(&flow).strategy, Strategy::OrderIndex);
    }

    #[test]
    fn optional_nodes_are_skipped() {
        let mut nodes = calls(3);
        nodes[0].required = false;
        let flow = graph(nodes, &[]);
        assert_eq!(next_step(&flow, &HashSet::new()).unwrap().id, flow.nodes[1].id);

        let done: HashSet<Uuid> = [flow.nodes[1].id, flow.nodes[2].id].into();
        assert!(next_step(&flow, &done).is_none());
        assert_eq!(required_steps(&flow).len(), 2);
    }

    #[test]
    fn empty_flow_has_no_next_step() {
        let flow = graph(Vec::new(), &[]);
        assert!(next_step(&flow, &HashSet::new()).is_none());
    }
}
