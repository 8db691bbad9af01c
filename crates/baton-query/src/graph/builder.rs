use std::collections::{BTreeMap, BTreeSet};

use baton_core::model::LedgerRecord;

use super::model::*;
use crate::patterns::transition_counts;
use crate::stats::{increment, top_counter, Counter};

/// Build the interaction graph of one ordered record stream.
pub fn build_interaction_graph(records: &[&LedgerRecord], top_n: usize) -> InteractionGraph {
    let mut graph = InteractionGraph::default();
    let mut roles = BTreeSet::new();
    let mut actors = BTreeSet::new();
    let mut role_edges: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut actor_edges: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut role_transitions = Counter::new();
    let mut actor_handoffs = Counter::new();

    for record in records {
        roles.insert(record.envelope.actor_role.as_str().to_string());
        actors.insert(record.envelope.actor_id.clone());
    }

    for pair in records.windows(2) {
        let (prev, next) = (&pair[0].envelope, &pair[1].envelope);
        if prev.actor_role != next.actor_role {
            let from = prev.actor_role.as_str().to_string();
            let to = next.actor_role.as_str().to_string();
            increment(&mut role_transitions, format!("{from}->{to}"));
            *role_edges.entry((from, to)).or_default() += 1;
        }
        if prev.actor_id != next.actor_id {
            increment(
                &mut actor_handoffs,
                format!("{}->{}", prev.actor_id, next.actor_id),
            );
            *actor_edges
                .entry((prev.actor_id.clone(), next.actor_id.clone()))
                .or_default() += 1;
        }
    }

    for role in roles {
        graph.nodes.push(GraphNode {
            id: format!("role:{role}"),
            node_type: NodeType::Role,
            label: role,
        });
    }
    for actor in actors {
        graph.nodes.push(GraphNode {
            id: format!("actor:{actor}"),
            node_type: NodeType::Actor,
            label: actor,
        });
    }
    for ((from, to), count) in role_edges {
        graph.edges.push(GraphEdge {
            from: format!("role:{from}"),
            to: format!("role:{to}"),
            edge_type: EdgeType::RoleSwitch,
            count,
        });
    }
    for ((from, to), count) in actor_edges {
        graph.edges.push(GraphEdge {
            from: format!("actor:{from}"),
            to: format!("actor:{to}"),
            edge_type: EdgeType::ActorHandoff,
            count,
        });
    }

    let event_types: Vec<&str> = records.iter().map(|r| r.event_type()).collect();
    graph.top_actor_handoffs = top_counter(&actor_handoffs, top_n);
    graph.top_role_transitions = top_counter(&role_transitions, top_n);
    graph.transition_pairs = top_counter(&transition_counts(&event_types), top_n);
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{ActorRole, EventEnvelope};

    fn rec(actor: &str, role: ActorRole, event_type: &str) -> LedgerRecord {
        LedgerRecord {
            sequence: 0,
            envelope: EventEnvelope::new("s".into(), actor, role, event_type),
        }
    }

    #[test]
    fn test_graph_counts_switches() {
        let records = [
            rec("lead", ActorRole::Lead, "PLAN"),
            rec("dev-1", ActorRole::Worker, "CODE"),
            rec("dev-2", ActorRole::Worker, "CODE"),
            rec("lead", ActorRole::Lead, "REVIEW"),
            rec("dev-1", ActorRole::Worker, "CODE"),
        ];
        let refs: Vec<&LedgerRecord> = records.iter().collect();
        let graph = build_interaction_graph(&refs, 10);

        assert_eq!(graph.nodes.len(), 2 + 3);
        let lead_to_worker = graph
            .edges
            .iter()
            .find(|e| e.from == "role:LEAD" && e.to == "role:WORKER")
            .unwrap();
        assert_eq!(lead_to_worker.count, 2);
        assert_eq!(graph.top_role_transitions[0].key, "LEAD->WORKER");
        assert_eq!(graph.top_actor_handoffs[0].key, "lead->dev-1");
        assert_eq!(graph.top_actor_handoffs[0].count, 2);
        assert_eq!(graph.transition_pairs[0].key, "CODE->CODE");

        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph baton {"));
        assert!(dot.contains("\"role:LEAD\" -> \"role:WORKER\" [label=\"2\" style=solid];"));

        let sub = graph.subgraph("role:LEAD", 1);
        assert_eq!(sub.nodes.len(), 2);
    }
}
