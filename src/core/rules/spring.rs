// src/core/rules/spring.rs
use std::collections::BTreeSet;

use crate::error::Result;
use crate::core::model::NodeKind;
use super::{endpoint_tag, secondary_tags, CapturePattern, Matcher, MarkerVocabulary, Rule};

/// Spring / Spring Data vocabulary for Java and Kotlin sources
pub struct SpringVocabulary;

const REPOSITORY_SUPERTYPES: &[&str] = &[
    "JpaRepository",
    "CrudRepository",
    "MongoRepository",
    "PagingAndSortingRepository",
    "ReactiveCrudRepository",
    "ListCrudRepository",
];

impl MarkerVocabulary for SpringVocabulary {
    fn rules(&self) -> Result<Vec<Rule>> {
        Ok(vec![
            Rule::new(
                "spring-http-handler",
                1,
                NodeKind::Process,
                Matcher::Annotation(&["RestController", "Controller"]),
                &["inbound", "boundary", "http"],
                handler_tags,
            )?,
            Rule::new(
                "spring-remote-client",
                1,
                NodeKind::ExternalEntity,
                Matcher::Annotation(&["FeignClient", "HttpExchange"]),
                &["outbound", "remote"],
                remote_client_tags,
            )?,
            Rule::new(
                "spring-message-consumer",
                1,
                NodeKind::Process,
                Matcher::Annotation(&["KafkaListener", "RabbitListener", "JmsListener", "SqsListener", "StreamListener"]),
                &["inbound", "boundary", "async"],
                secondary_tags,
            )?,
            Rule::new(
                "spring-service",
                2,
                NodeKind::Process,
                Matcher::Annotation(&["Service", "Component"]),
                &[],
                secondary_tags,
            )?,
            Rule::new(
                "spring-repository",
                3,
                NodeKind::Process,
                Matcher::Annotation(&["Repository"]),
                &["persistence"],
                secondary_tags,
            )?,
            Rule::new(
                "spring-data-repository",
                3,
                NodeKind::Process,
                Matcher::Supertype(REPOSITORY_SUPERTYPES),
                &["persistence"],
                secondary_tags,
            )?,
            Rule::new(
                "jpa-entity",
                4,
                NodeKind::DataStore,
                Matcher::Annotation(&["Entity", "Table", "Document"]),
                &[],
                record_tags,
            )?,
            Rule::new(
                "redis-hash",
                5,
                NodeKind::DataStore,
                Matcher::Annotation(&["RedisHash"]),
                &["cache"],
                record_tags,
            )?,
        ])
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["java", "kt"]
    }

    fn vocabulary_name(&self) -> &str {
        "spring"
    }
}

static TYPE_DECLARATION: CapturePattern = CapturePattern::new(r"\b(?:class|interface)\s+(\w+)");
static REQUEST_MAPPING: CapturePattern =
    CapturePattern::new(r#"@RequestMapping\(\s*(?:(?:value|path)\s*=\s*)?\{?\s*"([^"]*)""#);
static VERB_MAPPING: CapturePattern = CapturePattern::new(
    r#"@(Get|Post|Put|Delete|Patch)Mapping\b(?:\(\s*(?:(?:value|path)\s*=\s*)?\{?\s*"([^"]*)")?"#,
);

static FEIGN_NAME: CapturePattern = CapturePattern::new(r#"@FeignClient\([^)]*?\bname\s*=\s*"([^"]+)""#);
static FEIGN_VALUE: CapturePattern = CapturePattern::new(r#"@FeignClient\([^)]*?\bvalue\s*=\s*"([^"]+)""#);
static FEIGN_POSITIONAL: CapturePattern = CapturePattern::new(r#"@FeignClient\(\s*"([^"]+)""#);
static FEIGN_URL: CapturePattern = CapturePattern::new(r#"@FeignClient\([^)]*?\burl\s*=\s*"([^"]+)""#);

static TABLE_NAME: CapturePattern = CapturePattern::new(r#"@Table\([^)]*?\bname\s*=\s*"(\w+)""#);
static COLLECTION_NAME: CapturePattern = CapturePattern::new(r#"@Document\([^)]*?\bcollection\s*=\s*"(\w+)""#);
static KEYSPACE: CapturePattern = CapturePattern::new(r#"@RedisHash\(\s*(?:value\s*=\s*)?"([^"]+)""#);

/// Handlers that also carry a service marker keep that fact as a tag
fn handler_tags(text: &str) -> BTreeSet<String> {
    let mut tags = secondary_tags(text);
    if text.contains("@Service") {
        tags.insert("service".to_string());
    }
    tags.extend(endpoint_tags(text));
    tags
}

/// Verb mappings below the type declaration, under the type-level `@RequestMapping`
fn endpoint_tags(text: &str) -> BTreeSet<String> {
    let declaration = TYPE_DECLARATION.regex()
        .and_then(|re| re.find(text))
        .map_or(text.len(), |m| m.start());
    let prefix = REQUEST_MAPPING.capture(&text[..declaration]).unwrap_or_default();

    let Some(mappings) = VERB_MAPPING.regex() else {
        return BTreeSet::new();
    };
    mappings.captures_iter(&text[declaration..])
        .map(|caps| endpoint_tag(&caps[1], &prefix, caps.get(2).map_or("", |m| m.as_str())))
        .collect()
}

fn remote_client_tags(text: &str) -> BTreeSet<String> {
    let mut tags = secondary_tags(text);
    let remote = FEIGN_NAME.capture(text)
        .or_else(|| FEIGN_VALUE.capture(text))
        .or_else(|| FEIGN_POSITIONAL.capture(text))
        .or_else(|| FEIGN_URL.capture(text));
    if let Some(remote) = remote {
        tags.insert(format!("remote:{}", remote));
    }
    tags
}

fn record_tags(text: &str) -> BTreeSet<String> {
    let mut tags = secondary_tags(text);
    if let Some(table) = TABLE_NAME.capture(text) {
        tags.insert(format!("table:{}", table));
    }
    if let Some(collection) = COLLECTION_NAME.capture(text) {
        tags.insert(format!("collection:{}", collection));
    }
    if let Some(hash) = KEYSPACE.capture(text) {
        tags.insert(format!("keyspace:{}", hash));
    }
    tags
}
