// src/core/rules/aspnet.rs
use std::collections::BTreeSet;

use crate::error::Result;
use crate::core::model::NodeKind;
use super::{endpoint_tag, secondary_tags, CapturePattern, Matcher, MarkerVocabulary, Rule};

/// ASP.NET Core / EF Core vocabulary for C# sources
pub struct AspNetVocabulary;

impl MarkerVocabulary for AspNetVocabulary {
    fn rules(&self) -> Result<Vec<Rule>> {
        Ok(vec![
            Rule::new(
                "aspnet-api-controller",
                1,
                NodeKind::Process,
                Matcher::Attribute(&["ApiController"]),
                &["inbound", "boundary", "http"],
                controller_tags,
            )?,
            Rule::new(
                "aspnet-controller-base",
                1,
                NodeKind::Process,
                Matcher::Supertype(&["ControllerBase", "Controller"]),
                &["inbound", "boundary", "http"],
                controller_tags,
            )?,
            Rule::new(
                "refit-client",
                1,
                NodeKind::ExternalEntity,
                Matcher::Pattern(r#"\[(?:Get|Post|Put|Delete|Patch)\(\s*""#),
                &["outbound", "remote"],
                refit_tags,
            )?,
            Rule::new(
                "remote-client-attribute",
                1,
                NodeKind::ExternalEntity,
                Matcher::Attribute(&["RemoteClient"]),
                &["outbound", "remote"],
                secondary_tags,
            )?,
            Rule::new(
                "message-consumer",
                1,
                NodeKind::Process,
                Matcher::Supertype(&["IConsumer", "IHandleMessages", "IHandle"]),
                &["inbound", "boundary", "async"],
                secondary_tags,
            )?,
            Rule::new(
                "service-attribute",
                2,
                NodeKind::Process,
                Matcher::Attribute(&["Service"]),
                &[],
                secondary_tags,
            )?,
            Rule::new(
                "service-by-name",
                2,
                NodeKind::Process,
                Matcher::Pattern(r"\bclass\s+\w+Service\b"),
                &[],
                secondary_tags,
            )?,
            Rule::new(
                "ef-db-context",
                3,
                NodeKind::Process,
                Matcher::Supertype(&["DbContext"]),
                &["persistence"],
                secondary_tags,
            )?,
            Rule::new(
                "repository-attribute",
                3,
                NodeKind::Process,
                Matcher::Attribute(&["Repository"]),
                &["persistence"],
                secondary_tags,
            )?,
            Rule::new(
                "repository-by-name",
                3,
                NodeKind::Process,
                Matcher::Pattern(r"\bclass\s+\w+Repository\b"),
                &["persistence"],
                secondary_tags,
            )?,
            Rule::new(
                "ef-table",
                4,
                NodeKind::DataStore,
                Matcher::Attribute(&["Table"]),
                &[],
                table_tags,
            )?,
            Rule::new(
                "cache-entry",
                5,
                NodeKind::DataStore,
                Matcher::Attribute(&["CacheEntry"]),
                &["cache"],
                secondary_tags,
            )?,
        ])
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["cs"]
    }

    fn vocabulary_name(&self) -> &str {
        "aspnet"
    }
}

static CLASS_DECLARATION: CapturePattern = CapturePattern::new(r"\bclass\s+(\w+)");
static ROUTE_ATTRIBUTE: CapturePattern = CapturePattern::new(r#"\[Route\(\s*"([^"]*)""#);
static HTTP_ATTRIBUTE: CapturePattern = CapturePattern::new(
    r#"\[Http(Get|Post|Put|Delete|Patch)\b(?:\(\s*(?:template\s*:\s*)?"([^"]*)")?"#,
);
static REFIT_ROUTE: CapturePattern = CapturePattern::new(r#"\[(?:Get|Post|Put|Delete|Patch)\(\s*"/?([\w-]+)"#);
static TABLE_NAME: CapturePattern = CapturePattern::new(r#"\[Table\(\s*"(\w+)""#);

/// `[HttpGet("...")]` style actions under the class-level `[Route]`
fn controller_tags(text: &str) -> BTreeSet<String> {
    let mut tags = secondary_tags(text);

    let (declaration, class_name) = match CLASS_DECLARATION.regex().and_then(|re| re.captures(text)) {
        Some(caps) => (caps.get(0).map_or(text.len(), |m| m.start()), caps[1].to_string()),
        None => (text.len(), String::new()),
    };
    let controller = class_name.strip_suffix("Controller").unwrap_or(&class_name);
    let prefix = ROUTE_ATTRIBUTE.capture(&text[..declaration])
        .unwrap_or_default()
        .replace("[controller]", controller);

    if let Some(actions) = HTTP_ATTRIBUTE.regex() {
        for caps in actions.captures_iter(&text[declaration..]) {
            let route = caps.get(2).map_or("", |m| m.as_str());
            tags.insert(endpoint_tag(&caps[1], &prefix, route));
        }
    }
    tags
}

fn refit_tags(text: &str) -> BTreeSet<String> {
    let mut tags = secondary_tags(text);
    // Refit interfaces have no service name; fall back to the first route prefix
    if let Some(route) = REFIT_ROUTE.capture(text) {
        tags.insert(format!("remote:{}", route));
    }
    tags
}

fn table_tags(text: &str) -> BTreeSet<String> {
    let mut tags = secondary_tags(text);
    if let Some(table) = TABLE_NAME.capture(text) {
        tags.insert(format!("table:{}", table));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::RuleTable;

    fn classify(path: &str, text: &str) -> Option<(&'static str, NodeKind, BTreeSet<String>)> {
        let table = RuleTable::default_table().unwrap();
        table.first_match(path, text)
            .map(|rule| (rule.name, rule.kind, rule.tags(text)))
    }

    #[test]
    fn test_api_controller_is_boundary() {
        let (name, kind, tags) = classify(
            "Orders/OrdersController.cs",
            "[ApiController]\n[Route(\"api/orders\")]\npublic class OrdersController : ControllerBase {}",
        ).unwrap();
        assert_eq!(name, "aspnet-api-controller");
        assert_eq!(kind, NodeKind::Process);
        assert!(tags.contains("boundary"));
    }

    #[test]
    fn test_controller_actions_become_endpoints() {
        let (_, _, tags) = classify(
            "Orders/OrdersController.cs",
            "[ApiController]\n[Route(\"api/[controller]\")]\npublic class OrdersController : ControllerBase\n{\n    [HttpGet(\"{id}\")]\n    public Order Get(int id) => null;\n\n    [HttpPost]\n    public IActionResult Place(Order order) => Ok();\n}",
        ).unwrap();
        assert!(tags.contains("endpoint:GET /api/Orders/{id}"));
        assert!(tags.contains("endpoint:POST /api/Orders"));
    }

    #[test]
    fn test_refit_interface_is_external() {
        let (_, kind, tags) = classify(
            "Clients/IPaymentApi.cs",
            "public interface IPaymentApi\n{\n    [Post(\"/payments\")]\n    Task<Receipt> Charge(Payment p);\n}",
        ).unwrap();
        assert_eq!(kind, NodeKind::ExternalEntity);
        assert!(tags.contains("remote:payments"));
    }

    #[test]
    fn test_masstransit_consumer_is_async() {
        let (name, _, tags) = classify(
            "Shipping/ShipmentConsumer.cs",
            "public class ShipmentConsumer : IConsumer<ShipmentRequested> {}",
        ).unwrap();
        assert_eq!(name, "message-consumer");
        assert!(tags.contains("async"));
    }

    #[test]
    fn test_db_context_is_persistence() {
        let (name, kind, tags) = classify(
            "Data/ShopContext.cs",
            "public class ShopContext : DbContext\n{\n    public DbSet<Order> Orders { get; set; }\n}",
        ).unwrap();
        assert_eq!(name, "ef-db-context");
        assert_eq!(kind, NodeKind::Process);
        assert!(tags.contains("persistence"));
    }

    #[test]
    fn test_table_attribute_is_data_store() {
        let (_, kind, tags) = classify(
            "Data/Order.cs",
            "[Table(\"orders\")]\npublic class Order { public int Id { get; set; } }",
        ).unwrap();
        assert_eq!(kind, NodeKind::DataStore);
        assert!(tags.contains("table:orders"));
    }

    #[test]
    fn test_spring_markers_do_not_apply_to_csharp() {
        assert!(classify("Odd.cs", "// @Service\npublic class Odd {}").is_none());
    }
}
