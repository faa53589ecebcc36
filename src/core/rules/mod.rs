//! Marker vocabularies for heuristic classification
//!
//! Each vocabulary contributes an ordered list of independent rules. A rule pairs a
//! textual matcher with the node kind it produces and a tag extractor. Rules from all
//! vocabularies are merged into one table ordered by priority; classification takes
//! the first matching rule.

mod aspnet;
mod spring;

pub use aspnet::AspNetVocabulary;
pub use spring::SpringVocabulary;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use super::model::NodeKind;

/// Trait that all marker vocabularies must implement
pub trait MarkerVocabulary {
    /// Build this vocabulary's rules
    fn rules(&self) -> Result<Vec<Rule>>;

    /// File extensions the vocabulary applies to
    fn file_extensions(&self) -> &'static [&'static str];

    /// Vocabulary name, e.g. "spring"
    fn vocabulary_name(&self) -> &str;
}

/// Extracts secondary tags from a unit's text
pub type TagExtractor = fn(&str) -> BTreeSet<String>;

/// How a rule recognises a unit
#[derive(Debug, Clone)]
pub enum Matcher {
    /// JVM annotation such as `@Service`
    Annotation(&'static [&'static str]),
    /// .NET attribute such as `[ApiController]`
    Attribute(&'static [&'static str]),
    /// Declared supertype, e.g. `extends JpaRepository` or `: DbContext`
    Supertype(&'static [&'static str]),
    /// Free-form pattern
    Pattern(&'static str),
}

impl Matcher {
    fn compile(&self) -> Result<Regex> {
        let pattern = match self {
            Matcher::Annotation(names) => format!(r"@(?:{})\b", names.join("|")),
            Matcher::Attribute(names) => format!(
                r"\[\s*(?:{})(?:Attribute)?\s*[\](,]",
                names.join("|")
            ),
            Matcher::Supertype(names) => format!(
                r"\b(?:class|interface|record|object)\s+\w+[^{{;]*?(?:extends|implements|:)[^{{;]*?\b(?:{})\b",
                names.join("|")
            ),
            Matcher::Pattern(pattern) => pattern.to_string(),
        };
        Ok(Regex::new(&pattern)?)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Annotation(names) => {
                let names: Vec<String> = names.iter().map(|n| format!("@{}", n)).collect();
                f.write_str(&names.join(" "))
            }
            Matcher::Attribute(names) => {
                let names: Vec<String> = names.iter().map(|n| format!("[{}]", n)).collect();
                f.write_str(&names.join(" "))
            }
            Matcher::Supertype(names) => write!(f, "extends/implements {}", names.join("|")),
            Matcher::Pattern(pattern) => write!(f, "/{}/", pattern),
        }
    }
}

/// One classification rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    /// Lower numbers are tried first
    pub priority: u8,
    pub kind: NodeKind,
    pub matcher: Matcher,
    /// Tags every match receives
    pub base_tags: &'static [&'static str],
    /// Extensions the rule applies to; filled in from the vocabulary
    pub extensions: &'static [&'static str],
    pattern: Regex,
    extractor: TagExtractor,
}

impl Rule {
    pub fn new(
        name: &'static str,
        priority: u8,
        kind: NodeKind,
        matcher: Matcher,
        base_tags: &'static [&'static str],
        extractor: TagExtractor,
    ) -> Result<Self> {
        let pattern = matcher.compile()?;
        Ok(Self {
            name,
            priority,
            kind,
            matcher,
            base_tags,
            extensions: &[],
            pattern,
            extractor,
        })
    }

    fn for_extensions(mut self, extensions: &'static [&'static str]) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn applies_to(&self, path: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let extension = path.rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        self.extensions.iter().any(|e| *e == extension)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Base tags plus whatever the extractor finds
    pub fn tags(&self, text: &str) -> BTreeSet<String> {
        let mut tags: BTreeSet<String> = self.base_tags.iter().map(|t| t.to_string()).collect();
        tags.extend((self.extractor)(text));
        tags
    }
}

/// Ordered rule table; first match wins
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Merge vocabularies, ordering by priority and keeping vocabulary order on ties
    pub fn from_vocabularies(vocabularies: &[&dyn MarkerVocabulary]) -> Result<Self> {
        let mut rules = Vec::new();
        for vocabulary in vocabularies {
            let extensions = vocabulary.file_extensions();
            let vocabulary_rules = vocabulary.rules()?;
            debug!("Loaded {} {} rules for .{}", vocabulary_rules.len(), vocabulary.vocabulary_name(), extensions.join("/."));
            rules.extend(vocabulary_rules.into_iter().map(|rule| rule.for_extensions(extensions)));
        }
        Ok(Self::new(rules))
    }

    pub fn new(mut rules: Vec<Rule>) -> Self {
        // Stable sort keeps declaration order within one priority
        rules.sort_by_key(|rule| rule.priority);
        Self { rules }
    }

    /// Spring vocabulary followed by ASP.NET
    pub fn default_table() -> Result<Self> {
        Self::from_vocabularies(&[&SpringVocabulary, &AspNetVocabulary])
    }

    pub fn first_match(&self, path: &str, text: &str) -> Option<&Rule> {
        self.rules.iter()
            .find(|rule| rule.applies_to(path) && rule.matches(text))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Tags shared by every vocabulary: async, caching, transactions, listeners, groups
pub fn secondary_tags(text: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();

    if text.contains("@Async") {
        tags.insert("async".to_string());
    }
    if text.contains("@Cacheable") || text.contains("@CachePut") || text.contains("@CacheEvict") {
        tags.insert("cached".to_string());
    }
    // "@Transactional" is also a prefix of the listener annotation
    if text.matches("@Transactional").count() > text.matches("@TransactionalEventListener").count() {
        tags.insert("transactional".to_string());
    }
    if text.contains("@EventListener") || text.contains("@TransactionalEventListener") {
        tags.insert("listener".to_string());
    }
    if let Some(phase) = TX_PHASE.capture(text) {
        tags.insert(format!("tx-phase:{}", phase));
    }
    if let Some(group) = explicit_group(text) {
        tags.insert(format!("group:{}", group));
    }

    tags
}

static TX_PHASE: CapturePattern = CapturePattern::new(r"TransactionPhase\.(\w+)");
static GROUP_ANNOTATION: CapturePattern =
    CapturePattern::new(r#"@BoundedContext\(\s*(?:value\s*=\s*)?"([^"]+)"\s*\)"#);
static GROUP_ATTRIBUTE: CapturePattern = CapturePattern::new(r#"\[BoundedContext\(\s*"([^"]+)"\s*\)\]"#);
static GROUP_COMMENT: CapturePattern = CapturePattern::new(r"//\s*@group\s+(\S+)");

/// Explicit bounded-context marker, overriding directory locality
pub fn explicit_group(text: &str) -> Option<String> {
    GROUP_ANNOTATION.capture(text)
        .or_else(|| GROUP_ATTRIBUTE.capture(text))
        .or_else(|| GROUP_COMMENT.capture(text))
        .map(|group| group.trim().to_string())
        .filter(|group| !group.is_empty())
}

/// Regex compiled on first use and shared by every later call
pub(crate) struct CapturePattern {
    source: &'static str,
    compiled: OnceLock<Option<Regex>>,
}

impl CapturePattern {
    pub(crate) const fn new(source: &'static str) -> Self {
        Self {
            source,
            compiled: OnceLock::new(),
        }
    }

    pub(crate) fn regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| {
                Regex::new(self.source)
                    .inspect_err(|e| warn!("Disabled tag pattern {}: {}", self.source, e))
                    .ok()
            })
            .as_ref()
    }

    /// First capture group in `text`
    pub(crate) fn capture(&self, text: &str) -> Option<String> {
        self.regex()?
            .captures(text)?
            .get(1)
            .map(|m| m.as_str().to_string())
    }
}

/// `endpoint:<VERB> <path>` tag; prefix and route are joined with single slashes
pub(crate) fn endpoint_tag(verb: &str, prefix: &str, route: &str) -> String {
    let segments: Vec<&str> = prefix.split('/')
        .chain(route.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("endpoint:{} /{}", verb.to_uppercase(), segments.join("/"))
}
