// src/core/grouping.rs
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::model::{Group, GroupId, Node, NodeKind};

/// Name and id of the synthetic group for processes with no other signal
pub const UNGROUPED_NAME: &str = "Ungrouped";
pub const UNGROUPED_ID: &str = "ungrouped";

/// Partitions Process nodes into bounded contexts.
///
/// Precedence: explicit `group:` tag from the source text, then the longest
/// configured path prefix, then directory locality below the common source root.
#[derive(Debug, Clone, Default)]
pub struct GroupingResolver {
    overrides: BTreeMap<String, Vec<String>>,
}

impl GroupingResolver {
    pub fn new(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            overrides: overrides.clone(),
        }
    }

    /// Set `group_id` on every node and return the groups in first-member order.
    ///
    /// Only tags and paths are read, never a previous `group_id`, so running it
    /// again over the same nodes gives the same assignment.
    pub fn assign(&self, nodes: &mut [Node]) -> Vec<Group> {
        let root = common_root(nodes);
        debug!("Grouping below common source root {:?}", root.join("/"));

        let mut groups: Vec<Group> = Vec::new();
        for node in nodes.iter_mut() {
            if node.kind != NodeKind::Process {
                node.group_id = None;
                continue;
            }

            let name = self.group_name(node, &root);
            let id = slug(&name);
            node.group_id = Some(id.clone());

            match groups.iter_mut().find(|group| group.id == id) {
                Some(group) => group.member_node_ids.push(node.id.clone()),
                None => groups.push(Group {
                    id,
                    name,
                    member_node_ids: vec![node.id.clone()],
                }),
            }
        }

        info!("📦 Resolved {} groups", groups.len());
        groups
    }

    fn group_name(&self, node: &Node, root: &[String]) -> String {
        if let Some(explicit) = node.tag_value("group") {
            return explicit.to_string();
        }
        if let Some(name) = self.override_for(&node.source_path) {
            return name.to_string();
        }
        locality_group(&node.source_path, root)
    }

    /// Longest matching prefix; equal lengths go to the first name in order
    fn override_for(&self, path: &str) -> Option<&str> {
        let path = path.trim_start_matches("./");
        let mut best: Option<(&str, usize)> = None;

        for (name, prefixes) in &self.overrides {
            for prefix in prefixes {
                let prefix = prefix.trim_start_matches("./");
                if !path.starts_with(prefix) {
                    continue;
                }
                if best.map(|(_, len)| prefix.len() > len).unwrap_or(true) {
                    best = Some((name.as_str(), prefix.len()));
                }
            }
        }
        best.map(|(name, _)| name)
    }
}

/// Directory components shared by every Process node's parent directory
fn common_root(nodes: &[Node]) -> Vec<String> {
    let mut dirs = nodes.iter()
        .filter(|node| node.kind == NodeKind::Process)
        .map(|node| parent_components(&node.source_path));

    let Some(mut root) = dirs.next() else {
        return Vec::new();
    };
    for dir in dirs {
        let shared = root.iter().zip(dir.iter()).take_while(|(a, b)| a == b).count();
        root.truncate(shared);
    }
    root.into_iter().map(String::from).collect()
}

fn parent_components(path: &str) -> Vec<&str> {
    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    components.pop();
    components
}

/// First directory below the root, or the root's own name for files sitting in it
fn locality_group(path: &str, root: &[String]) -> String {
    let dir = parent_components(path);
    let component = dir.get(root.len()).copied().or_else(|| root.last().map(String::as_str));
    match component {
        Some(component) => capitalize(component),
        None => UNGROUPED_NAME.to_string(),
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Stable group id: lowercase, non-alphanumerics collapsed to `-`
pub fn slug(name: &str) -> GroupId {
    let mut id = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            id.extend(c.to_lowercase());
        } else if !id.is_empty() && !id.ends_with('-') {
            id.push('-');
        }
    }
    let id = id.trim_end_matches('-');
    if id.is_empty() {
        UNGROUPED_ID.to_string()
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn node(id: &str, kind: NodeKind, path: &str, tags: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            kind,
            name: id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            source_path: path.to_string(),
            group_id: None,
        }
    }

    #[test]
    fn test_locality_below_common_root() {
        let mut nodes = vec![
            node("a", NodeKind::Process, "src/main/java/shop/order/web/OrderController.java", &[]),
            node("b", NodeKind::Process, "src/main/java/shop/order/OrderService.java", &[]),
            node("c", NodeKind::Process, "src/main/java/shop/billing/InvoiceService.java", &[]),
            node("d", NodeKind::DataStore, "src/main/java/shop/order/Order.java", &[]),
        ];
        let groups = GroupingResolver::default().assign(&mut nodes);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, "order");
        assert_eq!(groups[0].name, "Order");
        assert_eq!(groups[0].member_node_ids, vec!["a", "b"]);
        assert_eq!(groups[1].id, "billing");
        assert_eq!(nodes[3].group_id, None);
    }

    #[test]
    fn test_explicit_marker_beats_override_beats_locality() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Payments".to_string(), vec!["shop/billing/pay".to_string()]);
        overrides.insert("Finance".to_string(), vec!["shop/billing/".to_string()]);

        let mut nodes = vec![
            node("a", NodeKind::Process, "shop/billing/payment/Charge.java", &[]),
            node("b", NodeKind::Process, "shop/billing/Invoice.java", &[]),
            node("c", NodeKind::Process, "shop/billing/Audit.java", &["group:Compliance Office"]),
            node("d", NodeKind::Process, "shop/order/Order.java", &[]),
        ];
        let groups = GroupingResolver::new(&overrides).assign(&mut nodes);

        assert_eq!(nodes[0].group_id.as_deref(), Some("payments"));
        assert_eq!(nodes[1].group_id.as_deref(), Some("finance"));
        assert_eq!(nodes[2].group_id.as_deref(), Some("compliance-office"));
        assert_eq!(nodes[3].group_id.as_deref(), Some("order"));
        assert_eq!(groups[2].name, "Compliance Office");
    }

    #[test]
    fn test_flat_tree_is_ungrouped_and_single_dir_uses_its_name() {
        let mut flat = vec![
            node("a", NodeKind::Process, "A.java", &[]),
            node("b", NodeKind::Process, "B.java", &[]),
        ];
        let groups = GroupingResolver::default().assign(&mut flat);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, UNGROUPED_ID);

        let mut single = vec![node("a", NodeKind::Process, "shop/A.java", &[])];
        GroupingResolver::default().assign(&mut single);
        assert_eq!(single[0].group_id.as_deref(), Some("shop"));
    }

    #[test]
    fn test_grouping_twice_is_idempotent() {
        let mut nodes = vec![
            node("a", NodeKind::Process, "order/A.java", &[]),
            node("b", NodeKind::Process, "billing/B.java", &["group:Finance"]),
            node("s", NodeKind::DataStore, "order/S.java", &[]),
        ];
        let resolver = GroupingResolver::default();

        let first_groups = resolver.assign(&mut nodes);
        let first: Vec<_> = nodes.iter().map(|n| n.group_id.clone()).collect();

        let second_groups = resolver.assign(&mut nodes);
        let second: Vec<_> = nodes.iter().map(|n| n.group_id.clone()).collect();

        assert_eq!(first, second);
        assert_eq!(first_groups, second_groups);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Order Management"), "order-management");
        assert_eq!(slug("  --"), UNGROUPED_ID);
        assert_eq!(slug("Billing/API"), "billing-api");
    }
}
