// src/core/extractor.rs
use regex::Regex;

use crate::error::Result;
use super::classifier::{NodeRegistry, Resolution};
use super::model::{FlowKind, Node, NodeId, NodeKind, SourceUnit};

/// Which way a resolved reference points relative to the scanning node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// scanning node -> target
    Outgoing,
    /// target -> scanning node
    Incoming,
}

/// A provisional edge, not yet resolved against the node set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    /// Named dependency on another type
    Reference {
        node: NodeId,
        target: String,
        flow_kind: FlowKind,
        label: String,
        direction: Direction,
    },
    /// Event or message sent by `from`
    Publish { from: NodeId, payload: String },
    /// Event or message consumed by `to`
    Subscribe { to: NodeId, payload: String },
}

impl Candidate {
    /// Short description used as a diagnostic subject
    pub fn describe(&self) -> String {
        match self {
            Candidate::Reference { node, target, flow_kind, direction: Direction::Outgoing, .. } => {
                format!("{} -> {} ({})", node, target, flow_kind)
            }
            Candidate::Reference { node, target, flow_kind, direction: Direction::Incoming, .. } => {
                format!("{} -> {} ({})", target, node, flow_kind)
            }
            Candidate::Publish { from, payload } => format!("{} publishes {}", from, payload),
            Candidate::Subscribe { to, payload } => format!("{} subscribes to {}", to, payload),
        }
    }
}

/// Types that never name a domain event or stored record
const PLATFORM_TYPES: &[&str] = &[
    "String", "Object", "Integer", "Long", "Boolean", "Double", "UUID", "Guid", "Void",
    "Map", "HashMap", "Acknowledgment", "Headers", "MessageHeaders", "Channel",
    "CancellationToken", "Exception",
];

/// Wrappers whose last generic argument is the interesting type
const WRAPPER_TYPES: &[&str] = &[
    "Optional", "List", "Set", "Collection", "Iterable", "Page", "Slice", "Stream",
    "Mono", "Flux", "Task", "ValueTask", "IEnumerable", "IQueryable", "IList",
    "ICollection", "ConsumerRecord", "Message", "ConsumeContext", "ResponseEntity",
];

/// Modifiers that may precede an injected field's type
const FIELD_MODIFIERS: &str = "private|protected|public|internal|final|readonly|static|lateinit|transient|volatile";

/// Scans classified units for references to other nodes
pub struct ReferenceExtractor {
    field: Regex,
    parameter_list: Regex,
    property: Regex,
    parameter: Regex,
    publish: Regex,
    listener: Regex,
    listener_class: Regex,
    java_signature: Regex,
    kotlin_signature: Regex,
    handler_supertype: Regex,
    repository_generic: Regex,
    write_call: Regex,
    read_call: Regex,
    kotlin_read_call: Regex,
}

impl ReferenceExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // Annotated fields may be package-private; bare ones need a modifier
            field: Regex::new(&format!(
                r"(?m)^\s*(?:(?:@\w+(?:\([^)]*\))?\s+)+(?:(?:{m})\s+)*|(?:(?:{m})\s+)+)([A-Z]\w*)(?:<[^>;=]*>)?\??\s+_?[a-z]\w*\s*[;=]",
                m = FIELD_MODIFIERS
            ))?,
            parameter_list: Regex::new(r"^\s*\(([^)]*)\)")?,
            property: Regex::new(r"\b(?:val|var)\s+\w+\s*:\s*([A-Z]\w*)")?,
            parameter: Regex::new(r"(?:@\w+\s+)*(?:final\s+)?([A-Z]\w*)(?:<[^>]*>)?\??\s+_?[a-z]\w*\s*$")?,
            publish: Regex::new(
                r"\b(?:publishEvent|publish|emit|send|convertAndSend|Publish|PublishAsync|Send|SendAsync)\s*\([^;]*?\b(?:new\s+)?([A-Z]\w*)\s*[({]",
            )?,
            listener: Regex::new(
                r"@(?:EventListener|TransactionalEventListener|KafkaListener|RabbitListener|JmsListener|SqsListener|StreamListener)\b",
            )?,
            listener_class: Regex::new(
                r"(?:classes\s*=\s*\{?\s*|@(?:Transactional)?EventListener\(\s*)([A-Z]\w*)(?:\.class|::class)",
            )?,
            java_signature: Regex::new(
                r"\b\w+\s*\(\s*(?:@\w+(?:\([^)]*\))?\s+)*(?:final\s+)?([A-Z]\w*)(?:<([^>]*)>)?\s+\w+\s*[,)]",
            )?,
            kotlin_signature: Regex::new(r"\bfun\s+\w+\s*\(\s*\w+\s*:\s*([A-Z]\w*)(?:<([^>]*)>)?")?,
            handler_supertype: Regex::new(
                r"\b(?:IConsumer|IHandleMessages|IHandle|INotificationHandler|IEventHandler|IIntegrationEventHandler)\s*<\s*([A-Z]\w*)",
            )?,
            repository_generic: Regex::new(
                r"\b(?:JpaRepository|CrudRepository|MongoRepository|PagingAndSortingRepository|ReactiveCrudRepository|ListCrudRepository|IRepository|Repository|DbSet)\s*<\s*([A-Z]\w*)",
            )?,
            write_call: Regex::new(
                r"\b(?i:save|update|delete|insert|persist|remove|merge|add|store)\w*\s*\(\s*(?:new\s+|\w+\s*:\s*)?([A-Z]\w*)",
            )?,
            read_call: Regex::new(
                r"\b([A-Z]\w*)(?:<([^>]*)>)?\??\s+(?i:find|query|get|load|select|read|fetch|search)\w*\s*\(",
            )?,
            kotlin_read_call: Regex::new(
                r"\bfun\s+(?i:find|query|get|load|select|read|fetch|search)\w*\s*\([^)]*\)\s*:\s*([A-Z]\w*)(?:<([^>]*)>)?",
            )?,
        })
    }

    /// Candidate edges for one unit.
    ///
    /// `node` is the registry node the unit classified into, which after an id
    /// collision may have been contributed by an earlier unit.
    pub fn extract(
        &self,
        unit: &SourceUnit,
        declared_name: &str,
        node: &Node,
        registry: &NodeRegistry,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if node.kind != NodeKind::Process {
            return candidates;
        }

        let text = unit.raw_text.as_str();
        self.dependencies(text, declared_name, node, registry, &mut candidates);
        self.publications(text, node, &mut candidates);
        self.subscriptions(text, node, &mut candidates);
        if node.has_tag("persistence") {
            self.persistence(text, node, registry, &mut candidates);
        }

        candidates
    }

    /// Field, property and constructor injection -> SyncCall
    fn dependencies(
        &self,
        text: &str,
        declared_name: &str,
        node: &Node,
        registry: &NodeRegistry,
        candidates: &mut Vec<Candidate>,
    ) {
        let mut names: Vec<String> = Vec::new();

        for caps in self.field.captures_iter(text) {
            names.push(caps[1].to_string());
        }
        for caps in self.property.captures_iter(text) {
            names.push(caps[1].to_string());
        }

        for parameters in self.constructor_parameters(text, declared_name) {
            for param in parameters.split(',') {
                if let Some(param_caps) = self.parameter.captures(param.trim()) {
                    names.push(param_caps[1].to_string());
                }
            }
        }

        for name in names {
            let label = match registry.resolve(&name) {
                Resolution::Unique(target) if target.id == node.id => continue,
                Resolution::Unique(target) if target.kind == NodeKind::DataStore => continue,
                Resolution::Unique(target) => sync_verb(target),
                Resolution::Ambiguous(_) => "invokes",
                Resolution::Missing => continue,
            };
            push_unique(candidates, Candidate::Reference {
                node: node.id.clone(),
                target: name,
                flow_kind: FlowKind::SyncCall,
                label: label.to_string(),
                direction: Direction::Outgoing,
            });
        }
    }

    /// Parameter list after every whole-word occurrence of `name(`
    fn constructor_parameters<'t>(&self, text: &'t str, name: &str) -> Vec<&'t str> {
        text.match_indices(name)
            .filter(|(start, _)| !text[..*start].ends_with(|c: char| c.is_alphanumeric() || c == '_'))
            .filter_map(|(start, _)| self.parameter_list.captures(&text[start + name.len()..]))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    fn publications(&self, text: &str, node: &Node, candidates: &mut Vec<Candidate>) {
        for caps in self.publish.captures_iter(text) {
            let payload = &caps[1];
            if is_platform_type(payload) {
                continue;
            }
            push_unique(candidates, Candidate::Publish {
                from: node.id.clone(),
                payload: payload.to_string(),
            });
        }
    }

    fn subscriptions(&self, text: &str, node: &Node, candidates: &mut Vec<Candidate>) {
        let lines: Vec<&str> = text.lines().collect();

        for (i, line) in lines.iter().enumerate() {
            if !self.listener.is_match(line) {
                continue;
            }
            let payload = match self.listener_class.captures(line) {
                Some(caps) => Some(caps[1].to_string()),
                None => self.listener_parameter(&lines[i + 1..]),
            };
            if let Some(payload) = payload {
                push_unique(candidates, Candidate::Subscribe {
                    to: node.id.clone(),
                    payload,
                });
            }
        }

        for caps in self.handler_supertype.captures_iter(text) {
            push_unique(candidates, Candidate::Subscribe {
                to: node.id.clone(),
                payload: caps[1].to_string(),
            });
        }
    }

    /// Payload type of the first method parameter after a listener annotation
    fn listener_parameter(&self, following: &[&str]) -> Option<String> {
        let signature: Vec<&str> = following.iter()
            .take(10)
            .map(|line| line.trim())
            .skip_while(|line| line.starts_with('@') || line.is_empty())
            .take(3)
            .collect();
        let signature = signature.join(" ");

        let caps = self.java_signature.captures(&signature)
            .or_else(|| self.kotlin_signature.captures(&signature))?;
        let payload = payload_type(&caps[1], caps.get(2).map(|m| m.as_str()));
        payload.filter(|p| !is_platform_type(p))
    }

    /// Repository generics and read/write calls against DataStore types
    fn persistence(&self, text: &str, node: &Node, registry: &NodeRegistry, candidates: &mut Vec<Candidate>) {
        let mut reads: Vec<String> = Vec::new();
        let mut writes: Vec<String> = Vec::new();

        for caps in self.repository_generic.captures_iter(text) {
            reads.push(caps[1].to_string());
            writes.push(caps[1].to_string());
        }
        for caps in self.write_call.captures_iter(text) {
            writes.push(caps[1].to_string());
        }
        for caps in self.read_call.captures_iter(text).chain(self.kotlin_read_call.captures_iter(text)) {
            if let Some(name) = payload_type(&caps[1], caps.get(2).map(|m| m.as_str())) {
                reads.push(name);
            }
        }

        let operations = reads.into_iter()
            .map(|name| (name, "read", Direction::Incoming))
            .chain(writes.into_iter().map(|name| (name, "write", Direction::Outgoing)));

        for (name, verb, direction) in operations {
            let relevant = match registry.resolve(&name) {
                Resolution::Unique(target) => target.kind == NodeKind::DataStore,
                Resolution::Ambiguous(ids) => ids.iter()
                    .any(|id| registry.node(id).map(|n| n.kind == NodeKind::DataStore).unwrap_or(false)),
                Resolution::Missing => false,
            };
            if !relevant {
                continue;
            }
            push_unique(candidates, Candidate::Reference {
                node: node.id.clone(),
                target: name,
                flow_kind: FlowKind::Persistence,
                label: verb.to_string(),
                direction,
            });
        }
    }
}

fn sync_verb(target: &Node) -> &'static str {
    match target.kind {
        NodeKind::ExternalEntity => "requests",
        _ if target.has_tag("persistence") => "accesses",
        _ => "invokes",
    }
}

/// Unwrap `Optional<Order>` style wrappers to the inner type name
fn payload_type(ty: &str, generic: Option<&str>) -> Option<String> {
    if WRAPPER_TYPES.contains(&ty) {
        let inner = generic?.rsplit(',').next()?.trim();
        let inner = inner.split('<').next().unwrap_or(inner).trim_end_matches('?');
        let inner = inner.rsplit('.').next().unwrap_or(inner);
        return inner.starts_with(|c: char| c.is_ascii_uppercase()).then(|| inner.to_string());
    }
    Some(ty.to_string())
}

fn is_platform_type(name: &str) -> bool {
    PLATFORM_TYPES.contains(&name) || WRAPPER_TYPES.contains(&name)
}

fn push_unique(candidates: &mut Vec<Candidate>, candidate: Candidate) {
    if !candidates.contains(&candidate) {
        candidates.push(candidate);
    }
}
