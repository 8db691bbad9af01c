use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::stats::CountEntry;

/// Type of node in the interaction graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    Role,
    Actor,
}

/// A node in the interaction graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub label: String,
}

/// Type of edge in the interaction graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    /// Consecutive events authored by different roles.
    RoleSwitch,
    /// Consecutive events authored by different actors.
    ActorHandoff,
}

/// A weighted, directed edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    pub count: usize,
}

/// Who hands work to whom within a session, plus event-type transition pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub top_actor_handoffs: Vec<CountEntry>,
    pub top_role_transitions: Vec<CountEntry>,
    pub transition_pairs: Vec<CountEntry>,
}

impl InteractionGraph {
    /// Nodes within `depth` hops of `center_id`, edges treated as undirected,
    /// with the edges among them. Rankings are not carried over.
    pub fn subgraph(&self, center_id: &str, depth: usize) -> InteractionGraph {
        let mut adjacent: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacent.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            adjacent.entry(edge.to.as_str()).or_default().push(edge.from.as_str());
        }

        let mut reached: HashSet<&str> = HashSet::from([center_id]);
        let mut frontier = vec![center_id];
        for _ in 0..depth {
            frontier = frontier
                .iter()
                .flat_map(|id| adjacent.get(id).into_iter().flatten().copied())
                .filter(|id| reached.insert(*id))
                .collect();
            if frontier.is_empty() {
                break;
            }
        }

        InteractionGraph {
            nodes: self
                .nodes
                .iter()
                .filter(|n| reached.contains(n.id.as_str()))
                .cloned()
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| reached.contains(e.from.as_str()) && reached.contains(e.to.as_str()))
                .cloned()
                .collect(),
            ..Default::default()
        }
    }

    /// Graphviz DOT. Roles are boxes, actors ellipses; actor handoffs are
    /// dashed and edge labels carry the transition count.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph baton {\n  rankdir=LR;\n");
        for node in &self.nodes {
            let shape = match node.node_type {
                NodeType::Role => "box",
                NodeType::Actor => "ellipse",
            };
            dot.push_str(&format!(
                "  {} [label={} shape={shape}];\n",
                quoted(&node.id),
                quoted(&node.label)
            ));
        }
        for edge in &self.edges {
            let style = match edge.edge_type {
                EdgeType::RoleSwitch => "solid",
                EdgeType::ActorHandoff => "dashed",
            };
            dot.push_str(&format!(
                "  {} -> {} [label=\"{}\" style={style}];\n",
                quoted(&edge.from),
                quoted(&edge.to),
                edge.count
            ));
        }
        dot.push_str("}\n");
        dot
    }
}

fn quoted(id: &str) -> String {
    format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\""))
}
