// src/core/builder.rs
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use super::classifier::{NodeRegistry, Resolution};
use super::extractor::{Candidate, Direction};
use super::model::{
    ArchitectureGraph, Diagnostic, DiagnosticKind, Edge, FlowKind, Group, GroupId, Node, NodeId, NodeKind,
};

/// Resolves candidate edges against the node registry and enforces graph invariants
pub struct GraphBuilder {
    registry: NodeRegistry,
    edges: Vec<Edge>,
    seen: HashSet<Edge>,
    diagnostics: Vec<Diagnostic>,
}

impl GraphBuilder {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
            edges: Vec::new(),
            seen: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Resolve every candidate, in order.
    ///
    /// Events need the whole candidate list: a publication fans out to every
    /// subscriber of the same payload, wherever that subscriber was found.
    pub fn add_candidates(&mut self, candidates: &[Candidate]) {
        let mut subscribers: HashMap<&str, Vec<&NodeId>> = HashMap::new();
        let mut publishers: HashMap<&str, Vec<&NodeId>> = HashMap::new();
        for candidate in candidates {
            match candidate {
                Candidate::Subscribe { to, payload } => subscribers.entry(payload.as_str()).or_default().push(to),
                Candidate::Publish { from, payload } => publishers.entry(payload.as_str()).or_default().push(from),
                Candidate::Reference { .. } => {}
            }
        }

        for candidate in candidates {
            match candidate {
                Candidate::Reference { node, target, flow_kind, label, direction } => {
                    match lookup(&self.registry, candidate, target) {
                        Ok(resolved) => {
                            let (from, to) = match direction {
                                Direction::Outgoing => (node.clone(), resolved),
                                Direction::Incoming => (resolved, node.clone()),
                            };
                            self.add_edge(from, to, *flow_kind, label.clone());
                        }
                        Err(diagnostic) => self.discard(diagnostic),
                    }
                }
                Candidate::Publish { from, payload } => {
                    let fan_out: Vec<&NodeId> = subscribers.get(payload.as_str())
                        .map(|subs| subs.iter().copied().filter(|sub| *sub != from).collect())
                        .unwrap_or_default();

                    if fan_out.is_empty() {
                        self.resolve_event(candidate, payload, from, Direction::Outgoing);
                    } else {
                        for subscriber in fan_out {
                            self.add_edge(from.clone(), subscriber.clone(), FlowKind::AsyncEvent, payload.clone());
                        }
                    }
                }
                Candidate::Subscribe { to, payload } => {
                    let published_elsewhere = publishers.get(payload.as_str())
                        .map(|pubs| pubs.iter().any(|publisher| *publisher != to))
                        .unwrap_or(false);

                    // Already covered by the publisher's fan-out
                    if !published_elsewhere {
                        self.resolve_event(candidate, payload, to, Direction::Incoming);
                    }
                }
            }
        }

        debug!("Resolved {} edges, {} candidates discarded", self.edges.len(), self.diagnostics.len());
    }

    /// Event without a counterpart: fall back to the payload type's own node
    fn resolve_event(&mut self, candidate: &Candidate, payload: &str, node: &NodeId, direction: Direction) {
        match lookup(&self.registry, candidate, payload) {
            Ok(resolved) if resolved != *node => {
                let (from, to) = match direction {
                    Direction::Outgoing => (node.clone(), resolved),
                    Direction::Incoming => (resolved, node.clone()),
                };
                self.add_edge(from, to, FlowKind::AsyncEvent, payload.to_string());
            }
            Ok(_) => self.discard(Diagnostic::new(
                DiagnosticKind::UnresolvedReference,
                candidate.describe(),
                "no counterpart; payload is the node itself",
            )),
            Err(diagnostic) => self.discard(diagnostic),
        }
    }

    fn discard(&mut self, diagnostic: Diagnostic) {
        debug!("Discarding {}: {}", diagnostic.subject, diagnostic.message);
        self.diagnostics.push(diagnostic);
    }

    /// Self-loops are dropped and exact duplicates merged
    fn add_edge(&mut self, from: NodeId, to: NodeId, flow_kind: FlowKind, label: String) {
        if from == to {
            return;
        }
        let edge = Edge { from, to, flow_kind, label };
        if self.seen.insert(edge.clone()) {
            self.edges.push(edge);
        }
    }

    /// Grouping is the only mutation allowed between resolution and `finish`
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        self.registry.nodes_mut()
    }

    /// Enforce DataStore ownership and freeze the graph.
    ///
    /// The first group whose process touches a DataStore owns it. Later edges
    /// between that store and another group's processes are removed and reported.
    pub fn finish(self, groups: Vec<Group>) -> (ArchitectureGraph, Vec<Diagnostic>) {
        let Self { registry, edges, mut diagnostics, .. } = self;
        let (nodes, _) = registry.into_parts();

        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut owners: BTreeMap<NodeId, GroupId> = BTreeMap::new();
        let mut kept = Vec::with_capacity(edges.len());

        for edge in edges {
            let from = by_id.get(edge.from.as_str());
            let to = by_id.get(edge.to.as_str());
            let (store, process) = match (from, to) {
                (Some(f), Some(t)) if f.kind == NodeKind::DataStore && t.kind == NodeKind::Process => (*f, *t),
                (Some(f), Some(t)) if t.kind == NodeKind::DataStore && f.kind == NodeKind::Process => (*t, *f),
                _ => {
                    kept.push(edge);
                    continue;
                }
            };

            let Some(group) = process.group_id.clone() else {
                kept.push(edge);
                continue;
            };

            let owner = owners.entry(store.id.clone()).or_insert_with(|| group.clone());
            if *owner == group {
                kept.push(edge);
            } else {
                warn!("⚠️ {} is owned by {}, dropping {} edge from {}", store.id, owner, edge.flow_kind, group);
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::OwnershipViolation,
                    format!("{} -> {} ({})", edge.from, edge.to, edge.flow_kind),
                    format!("{} is owned by group {}, not {}", store.id, owner, group),
                ));
            }
        }

        let data_store_owners = nodes.iter()
            .filter(|n| n.kind == NodeKind::DataStore)
            .filter_map(|n| owners.get(&n.id).map(|g| (n.id.clone(), g.clone())))
            .collect();

        (ArchitectureGraph::new(nodes, kept, groups, data_store_owners), diagnostics)
    }
}

/// Unique node id for `name`, or the diagnostic explaining why there is none
fn lookup(registry: &NodeRegistry, candidate: &Candidate, name: &str) -> Result<NodeId, Diagnostic> {
    match registry.resolve(name) {
        Resolution::Unique(node) => Ok(node.id.clone()),
        Resolution::Ambiguous(ids) => Err(Diagnostic::new(
            DiagnosticKind::AmbiguousReference,
            candidate.describe(),
            format!("{} matches {} nodes: {}", name, ids.len(), ids.join(", ")),
        )),
        Resolution::Missing => Err(Diagnostic::new(
            DiagnosticKind::UnresolvedReference,
            candidate.describe(),
            format!("no node named {}", name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::Classification;
    use std::collections::BTreeSet;

    fn classification(id: &str, kind: NodeKind) -> Classification {
        named(id, id, kind)
    }

    /// Node `id` declared as type `name`
    fn named(id: &str, name: &str, kind: NodeKind) -> Classification {
        Classification {
            node: Node {
                id: id.to_string(),
                kind,
                name: name.to_string(),
                tags: BTreeSet::new(),
                source_path: format!("{}.java", id.replace('.', "/")),
                group_id: None,
            },
            declared_name: name.to_string(),
            logical_name: name.to_string(),
            rule: "test",
        }
    }

    fn builder(nodes: &[(&str, NodeKind)]) -> GraphBuilder {
        let registry = NodeRegistry::build(nodes.iter().map(|(id, kind)| classification(id, *kind)).collect());
        GraphBuilder::new(registry)
    }

    fn call(from: &str, to: &str) -> Candidate {
        Candidate::Reference {
            node: from.to_string(),
            target: to.to_string(),
            flow_kind: FlowKind::SyncCall,
            label: "invokes".to_string(),
            direction: Direction::Outgoing,
        }
    }

    fn group_all(builder: &mut GraphBuilder, assignment: &[(&str, &str)]) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        for node in builder.nodes_mut() {
            if let Some((_, group)) = assignment.iter().find(|(id, _)| *id == node.id) {
                node.group_id = Some(group.to_string());
                match groups.iter_mut().find(|g| g.id == *group) {
                    Some(g) => g.member_node_ids.push(node.id.clone()),
                    None => groups.push(Group {
                        id: group.to_string(),
                        name: group.to_string(),
                        member_node_ids: vec![node.id.clone()],
                    }),
                }
            }
        }
        groups
    }

    #[test]
    fn test_duplicates_merge_and_unresolved_are_dropped() {
        let mut b = builder(&[("A", NodeKind::Process), ("B", NodeKind::Process)]);
        b.add_candidates(&[call("A", "B"), call("A", "B"), call("A", "Ghost"), call("A", "A")]);
        let (graph, diagnostics) = b.finish(vec![]);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnresolvedReference);
    }

    #[test]
    fn test_ambiguous_simple_name_is_discarded_with_diagnostic() {
        let registry = NodeRegistry::build(vec![
            classification("Checkout", NodeKind::Process),
            named("billing.AuditService", "AuditService", NodeKind::Process),
            named("shipping.AuditService", "AuditService", NodeKind::Process),
        ]);
        let mut b = GraphBuilder::new(registry);
        b.add_candidates(&[
            call("Checkout", "AuditService"),
            call("Checkout", "billing.AuditService"),
        ]);
        let (graph, diagnostics) = b.finish(vec![]);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].to, "billing.AuditService");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::AmbiguousReference);
        assert!(diagnostics[0].message.contains("billing.AuditService, shipping.AuditService"));
        assert_eq!(diagnostics[0].subject, "Checkout -> AuditService (SyncCall)");
    }

    #[test]
    fn test_distinct_labels_between_same_pair_are_kept() {
        let mut b = builder(&[("Repo", NodeKind::Process), ("Order", NodeKind::DataStore)]);
        let persist = |label: &str, direction| Candidate::Reference {
            node: "Repo".to_string(),
            target: "Order".to_string(),
            flow_kind: FlowKind::Persistence,
            label: label.to_string(),
            direction,
        };
        b.add_candidates(&[persist("read", Direction::Incoming), persist("write", Direction::Outgoing)]);
        let (graph, _) = b.finish(vec![]);

        assert_eq!(graph.edges[0].from, "Order");
        assert_eq!(graph.edges[1].from, "Repo");
    }

    #[test]
    fn test_publication_fans_out_to_all_subscribers() {
        let mut b = builder(&[
            ("Orders", NodeKind::Process),
            ("Billing", NodeKind::Process),
            ("Shipping", NodeKind::Process),
        ]);
        b.add_candidates(&[
            Candidate::Publish { from: "Orders".to_string(), payload: "OrderPlaced".to_string() },
            Candidate::Subscribe { to: "Billing".to_string(), payload: "OrderPlaced".to_string() },
            Candidate::Subscribe { to: "Shipping".to_string(), payload: "OrderPlaced".to_string() },
        ]);
        let (graph, diagnostics) = b.finish(vec![]);

        let targets: Vec<&str> = graph.edges.iter().map(|e| e.to.as_str()).collect();
        assert_eq!(targets, vec!["Billing", "Shipping"]);
        assert!(graph.edges.iter().all(|e| e.flow_kind == FlowKind::AsyncEvent && e.label == "OrderPlaced"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_unmatched_publication_is_discarded() {
        let mut b = builder(&[("Orders", NodeKind::Process)]);
        b.add_candidates(&[Candidate::Publish { from: "Orders".to_string(), payload: "OrderPlaced".to_string() }]);
        let (graph, diagnostics) = b.finish(vec![]);

        assert!(graph.edges.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_discarded_candidate());
    }

    #[test]
    fn test_subscription_without_publisher_uses_payload_node() {
        let mut b = builder(&[("Inventory", NodeKind::Process), ("StockLevel", NodeKind::DataStore)]);
        b.add_candidates(&[Candidate::Subscribe { to: "Inventory".to_string(), payload: "StockLevel".to_string() }]);
        let (graph, _) = b.finish(vec![]);

        assert_eq!(graph.edges[0].from, "StockLevel");
        assert_eq!(graph.edges[0].flow_kind, FlowKind::AsyncEvent);
    }

    #[test]
    fn test_second_group_touching_store_is_a_violation() {
        let mut b = builder(&[
            ("OrderRepo", NodeKind::Process),
            ("Reports", NodeKind::Process),
            ("Order", NodeKind::DataStore),
        ]);
        let read = |node: &str| Candidate::Reference {
            node: node.to_string(),
            target: "Order".to_string(),
            flow_kind: FlowKind::Persistence,
            label: "read".to_string(),
            direction: Direction::Incoming,
        };
        b.add_candidates(&[read("OrderRepo"), read("Reports")]);
        let groups = group_all(&mut b, &[("OrderRepo", "ordering"), ("Reports", "reporting")]);
        let (graph, diagnostics) = b.finish(groups);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].to, "OrderRepo");
        assert_eq!(graph.owner_of("Order").map(String::as_str), Some("ordering"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::OwnershipViolation);
    }
}
