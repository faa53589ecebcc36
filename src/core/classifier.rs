// src/core/classifier.rs
use std::collections::{BTreeMap, HashMap};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use super::model::{Diagnostic, DiagnosticKind, Node, NodeId, SourceUnit};
use super::rules::{Rule, RuleTable};

/// Result of classifying one source unit
#[derive(Debug, Clone)]
pub struct Classification {
    pub node: Node,
    /// Name as written in the first type declaration (or the file stem)
    pub declared_name: String,
    /// Name used for identity; `Impl` suffix and C#-style `I` prefix removed
    pub logical_name: String,
    /// Name of the rule that matched
    pub rule: &'static str,
}

/// Turns source units into typed nodes using a first-match rule table
pub struct Classifier {
    table: RuleTable,
    declaration: Regex,
    package: Regex,
    namespace: Regex,
}

impl Classifier {
    pub fn new(table: RuleTable) -> Result<Self> {
        Ok(Self {
            table,
            declaration: Regex::new(
                r"(?m)^\s*(?:@\w+(?:\([^)]*\))?\s+|\[[^\]]*\]\s*)*(?:(?:public|private|protected|internal|abstract|final|sealed|static|partial|open|data|inline|value)\s+)*(class|interface|record|enum|struct|object)\s+([A-Za-z_]\w*)",
            )?,
            package: Regex::new(r"(?m)^\s*package\s+([A-Za-z_][\w.]*)")?,
            namespace: Regex::new(r"(?m)^\s*namespace\s+([A-Za-z_][\w.]*)")?,
        })
    }

    pub fn with_default_rules() -> Result<Self> {
        Self::new(RuleTable::default_table()?)
    }

    /// Classify one unit. Units matching no rule produce nothing.
    pub fn classify(&self, unit: &SourceUnit) -> Option<Classification> {
        let rule = self.table.first_match(&unit.path, &unit.raw_text)?;
        Some(self.build(unit, rule))
    }

    fn build(&self, unit: &SourceUnit, rule: &Rule) -> Classification {
        let (declared_name, is_interface) = match self.declaration.captures(&unit.raw_text) {
            Some(caps) => (caps[2].to_string(), &caps[1] == "interface"),
            None => (unit.file_stem().to_string(), false),
        };
        let logical_name = logical_name(&declared_name, is_interface);

        let scope = self.scope_of(unit);
        let id = if scope.is_empty() {
            logical_name.clone()
        } else {
            format!("{}.{}", scope, logical_name)
        };

        debug!("{} -> {} {} via {}", unit.path, rule.kind, id, rule.name);

        Classification {
            node: Node {
                id,
                kind: rule.kind,
                name: logical_name.clone(),
                tags: rule.tags(&unit.raw_text),
                source_path: unit.path.clone(),
                group_id: None,
            },
            declared_name,
            logical_name,
            rule: rule.name,
        }
    }

    /// Declared package or namespace, else the parent directory joined with dots
    fn scope_of(&self, unit: &SourceUnit) -> String {
        if let Some(caps) = self.package.captures(&unit.raw_text) {
            return caps[1].to_string();
        }
        if let Some(caps) = self.namespace.captures(&unit.raw_text) {
            return caps[1].to_string();
        }
        unit.parent_dir().replace('/', ".")
    }
}

/// Identity name for a declared type
pub fn logical_name(declared: &str, is_interface: bool) -> String {
    let mut name = declared;
    if let Some(stripped) = name.strip_suffix("Impl") {
        if !stripped.is_empty() {
            name = stripped;
        }
    }
    if is_interface && has_interface_prefix(name) {
        name = &name[1..];
    }
    name.to_string()
}

fn has_interface_prefix(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some('I'), Some(second), Some(_)) if second.is_ascii_uppercase()
    )
}

/// Outcome of looking a referenced type name up in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    Unique(&'a Node),
    Ambiguous(Vec<NodeId>),
    Missing,
}

/// Immutable set of classified nodes handed from classification to extraction
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    /// Declared and logical type names -> node ids, in node order
    aliases: BTreeMap<String, Vec<NodeId>>,
    collisions: Vec<Diagnostic>,
}

impl NodeRegistry {
    /// Build from classifications already in enumeration order.
    ///
    /// On an id collision the first unit keeps the node; later units only
    /// contribute tags and a diagnostic.
    pub fn build(classifications: Vec<Classification>) -> Self {
        let mut registry = Self::default();

        for classification in classifications {
            let Classification { node, declared_name, logical_name, .. } = classification;

            if let Some(&existing) = registry.index.get(&node.id) {
                let first = &mut registry.nodes[existing];
                warn!("⚠️ {} collapses onto {} (from {})", node.source_path, first.id, first.source_path);
                let message = if first.kind == node.kind {
                    format!("merged into {}", first.source_path)
                } else {
                    format!("merged into {}; {} classification ignored", first.source_path, node.kind)
                };
                registry.collisions.push(Diagnostic::new(
                    DiagnosticKind::IdCollision,
                    &node.source_path,
                    message,
                ));
                first.tags.extend(node.tags);
                let id = first.id.clone();
                registry.alias(&declared_name, &id);
                registry.alias(&logical_name, &id);
                continue;
            }

            let id = node.id.clone();
            registry.index.insert(id.clone(), registry.nodes.len());
            registry.nodes.push(node);
            registry.alias(&declared_name, &id);
            registry.alias(&logical_name, &id);
        }

        registry
    }

    fn alias(&mut self, name: &str, id: &str) {
        let ids = self.aliases.entry(name.to_string()).or_default();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    /// Resolve a type name as written at a reference site
    pub fn resolve(&self, name: &str) -> Resolution<'_> {
        // A fully qualified id is never ambiguous
        if let Some(node) = self.node(name) {
            return Resolution::Unique(node);
        }
        let simple = simple_name(name);
        let ids = self.aliases.get(simple)
            .or_else(|| self.aliases.get(&logical_name(simple, has_interface_prefix(simple))));

        match ids.map(|ids| ids.as_slice()) {
            Some([id]) => match self.node(id) {
                Some(node) => Resolution::Unique(node),
                None => Resolution::Missing,
            },
            Some(ids) if ids.len() > 1 => Resolution::Ambiguous(ids.to_vec()),
            _ => Resolution::Missing,
        }
    }

    /// Whether the name refers to any classified node, unique or not
    pub fn is_known(&self, name: &str) -> bool {
        !matches!(self.resolve(name), Resolution::Missing)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Only tags and `group_id` may change; ids stay fixed
    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn collisions(&self) -> &[Diagnostic] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Hand the nodes on to the graph builder
    pub fn into_parts(self) -> (Vec<Node>, Vec<Diagnostic>) {
        (self.nodes, self.collisions)
    }
}

/// `com.acme.Order<T>` -> `Order`
fn simple_name(name: &str) -> &str {
    let name = name.split('<').next().unwrap_or(name).trim();
    name.rsplit('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::with_default_rules().unwrap()
    }

    use crate::core::model::NodeKind;

    #[test]
    fn test_id_uses_package_and_declared_name() {
        let unit = SourceUnit::new(
            "src/main/java/com/acme/order/OrderService.java",
            "package com.acme.order;\n\n@Service\npublic class OrderService {}",
        );
        let c = classifier().classify(&unit).unwrap();
        assert_eq!(c.node.id, "com.acme.order.OrderService");
        assert_eq!(c.node.kind, NodeKind::Process);
        assert_eq!(c.rule, "spring-service");
    }

    #[test]
    fn test_renaming_file_keeps_id_renaming_type_changes_it() {
        let text = "package shop;\n@Service\npublic class Billing {}";
        let a = classifier().classify(&SourceUnit::new("shop/Billing.java", text)).unwrap();
        let b = classifier().classify(&SourceUnit::new("shop/Renamed.java", text)).unwrap();
        assert_eq!(a.node.id, b.node.id);

        let renamed = "package shop;\n@Service\npublic class Invoicing {}";
        let c = classifier().classify(&SourceUnit::new("shop/Billing.java", renamed)).unwrap();
        assert_ne!(a.node.id, c.node.id);
    }

    #[test]
    fn test_same_line_annotations_keep_declared_name() {
        let text = "package shop;\n@Service public class OrderService {}";
        let a = classifier().classify(&SourceUnit::new("shop/OrderService.java", text)).unwrap();
        let b = classifier().classify(&SourceUnit::new("shop/Renamed.java", text)).unwrap();
        assert_eq!(a.node.id, "shop.OrderService");
        assert_eq!(b.node.id, "shop.OrderService");

        let text = "namespace Shop.Api;\n[ApiController] [Route(\"api/orders\")] public class OrdersController : ControllerBase {}";
        let c = classifier().classify(&SourceUnit::new("Api/Handlers.cs", text)).unwrap();
        assert_eq!(c.declared_name, "OrdersController");
        assert_eq!(c.node.id, "Shop.Api.OrdersController");
    }

    #[test]
    fn test_scope_falls_back_to_parent_directory() {
        let unit = SourceUnit::new("billing/app/InvoiceService.cs", "public class InvoiceService {}");
        let c = classifier().classify(&unit).unwrap();
        assert_eq!(c.node.id, "billing.app.InvoiceService");
    }

    #[test]
    fn test_generic_parameters_are_stripped() {
        let unit = SourceUnit::new(
            "Cache.java",
            "@Component\npublic class Cache<K, V> {}",
        );
        assert_eq!(classifier().classify(&unit).unwrap().declared_name, "Cache");
    }

    #[test]
    fn test_file_stem_used_without_declaration() {
        let unit = SourceUnit::new("app/Wiring.kt", "@Component\nfun wiring() = Unit");
        let c = classifier().classify(&unit).unwrap();
        assert_eq!(c.node.name, "Wiring");
    }

    #[test]
    fn test_unmatched_unit_produces_no_node() {
        let unit = SourceUnit::new("Util.java", "public final class Util {}");
        assert!(classifier().classify(&unit).is_none());
    }

    #[test]
    fn test_logical_name_rules() {
        assert_eq!(logical_name("OrderServiceImpl", false), "OrderService");
        assert_eq!(logical_name("IOrderService", true), "OrderService");
        assert_eq!(logical_name("IOrderService", false), "IOrderService");
        assert_eq!(logical_name("Impl", false), "Impl");
        assert_eq!(logical_name("IO", true), "IO");
    }

    #[test]
    fn test_interface_and_impl_collapse_first_in_order_wins() {
        let c = classifier();
        let iface = c.classify(&SourceUnit::new(
            "shop/OrderRepository.java",
            "package shop;\n@Repository\npublic interface OrderRepository {}",
        )).unwrap();
        let imp = c.classify(&SourceUnit::new(
            "shop/OrderRepositoryImpl.java",
            "package shop;\n@Repository\n@Transactional\npublic class OrderRepositoryImpl implements OrderRepository {}",
        )).unwrap();

        let registry = NodeRegistry::build(vec![iface, imp]);
        assert_eq!(registry.len(), 1);
        let node = &registry.nodes()[0];
        assert_eq!(node.source_path, "shop/OrderRepository.java");
        assert!(node.has_tag("transactional"));
        assert_eq!(registry.collisions().len(), 1);
        assert_eq!(registry.collisions()[0].subject, "shop/OrderRepositoryImpl.java");

        assert!(matches!(registry.resolve("OrderRepositoryImpl"), Resolution::Unique(_)));
    }

    #[test]
    fn test_resolution_reports_ambiguity() {
        let c = classifier();
        let a = c.classify(&SourceUnit::new("billing/AuditService.java", "@Service\nclass AuditService {}")).unwrap();
        let b = c.classify(&SourceUnit::new("shipping/AuditService.java", "@Service\nclass AuditService {}")).unwrap();
        let registry = NodeRegistry::build(vec![a, b]);

        assert_eq!(registry.len(), 2);
        assert!(matches!(registry.resolve("AuditService"), Resolution::Ambiguous(ids) if ids.len() == 2));
        assert_eq!(registry.resolve("Nope"), Resolution::Missing);
        assert!(registry.is_known("com.acme.AuditService"));
    }
}
