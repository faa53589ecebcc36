// src/core/renderer.rs
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::RenderingConfig;
use super::model::FlowKind;
use super::projector::{Level, Projection, Shape, ViewNode};

/// One rendered diagram plus the fingerprint of its text
#[derive(Debug, Clone, Serialize)]
pub struct RenderedDiagram {
    pub level: Level,
    pub file_name: String,
    #[serde(skip)]
    pub text: String,
    /// SHA-256 of `text`, hex encoded
    pub fingerprint: String,
}

/// Serializes projections as Mermaid flowcharts
#[derive(Debug, Clone)]
pub struct DiagramRenderer {
    direction: String,
    include_styles: bool,
}

impl DiagramRenderer {
    pub fn new(config: &RenderingConfig) -> Self {
        Self {
            direction: config.direction.clone(),
            include_styles: config.include_styles,
        }
    }

    /// Deterministic: nodes and edges are written in projection order, never re-sorted
    pub fn render(&self, projection: &Projection) -> RenderedDiagram {
        let ids = MermaidIds::assign(projection);
        let mut out = String::new();

        let _ = writeln!(out, "%% {}", projection.title);
        let _ = writeln!(out, "flowchart {}", self.direction);

        for cluster in &projection.clusters {
            let _ = writeln!(out, "    subgraph {}[\"{}\"]", ids.cluster(&cluster.id), escape(&cluster.name));
            for node in projection.nodes.iter().filter(|n| n.cluster.as_deref() == Some(cluster.id.as_str())) {
                let _ = writeln!(out, "        {}", node_statement(ids.node(&node.id), node));
            }
            let _ = writeln!(out, "    end");
        }

        let known: HashSet<&str> = projection.clusters.iter().map(|c| c.id.as_str()).collect();
        for node in &projection.nodes {
            let clustered = node.cluster.as_deref().map(|c| known.contains(c)).unwrap_or(false);
            if !clustered {
                let _ = writeln!(out, "    {}", node_statement(ids.node(&node.id), node));
            }
        }

        for edge in &projection.edges {
            let connector = match edge.flow_kind {
                FlowKind::AsyncEvent => "-.->",
                FlowKind::SyncCall | FlowKind::Persistence => "-->",
            };
            let label = edge.label();
            if label.is_empty() {
                let _ = writeln!(out, "    {} {} {}", ids.node(&edge.from), connector, ids.node(&edge.to));
            } else {
                let _ = writeln!(
                    out,
                    "    {} {}|\"{}\"| {}",
                    ids.node(&edge.from),
                    connector,
                    escape(&label),
                    ids.node(&edge.to)
                );
            }
        }

        if self.include_styles {
            self.write_styles(&mut out, projection, &ids);
        }

        let fingerprint = fingerprint(&out);
        RenderedDiagram {
            level: projection.level.clone(),
            file_name: projection.level.file_name(),
            text: out,
            fingerprint,
        }
    }

    fn write_styles(&self, out: &mut String, projection: &Projection, ids: &MermaidIds) {
        let classes = [
            (Shape::ExternalEntity, "external", "fill:#e1f5fe,stroke:#01579b"),
            (Shape::Process, "process", "fill:#e8f5e9,stroke:#1b5e20"),
            (Shape::DataStore, "datastore", "fill:#fff3e0,stroke:#e65100"),
            (Shape::System, "system", "fill:#f3e5f5,stroke:#4a148c"),
        ];

        for (shape, class, style) in classes {
            let members: Vec<&str> = projection.nodes.iter()
                .filter(|n| n.shape == shape)
                .map(|n| ids.node(&n.id))
                .collect();
            if members.is_empty() {
                continue;
            }
            let _ = writeln!(out, "    classDef {} {}", class, style);
            let _ = writeln!(out, "    class {} {}", members.join(","), class);
        }
    }
}

fn node_statement(id: &str, node: &ViewNode) -> String {
    let name = escape(&node.name);
    match node.shape {
        Shape::ExternalEntity => format!("{}[[\"{}\"]]", id, name),
        Shape::Process => format!("{}(\"{}\")", id, name),
        Shape::DataStore => format!("{}[(\"{}\")]", id, name),
        Shape::System => format!("{}((\"{}\"))", id, name),
    }
}

/// Quotes inside labels break the Mermaid lexer
fn escape(text: &str) -> String {
    text.replace('"', "#quot;")
}

/// SHA-256 hex digest of rendered text
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mermaid-safe identifiers, unique within one diagram
struct MermaidIds {
    nodes: HashMap<String, String>,
    clusters: HashMap<String, String>,
}

impl MermaidIds {
    fn assign(projection: &Projection) -> Self {
        let mut used = HashSet::new();
        let mut nodes = HashMap::new();
        let mut clusters = HashMap::new();

        for cluster in &projection.clusters {
            let id = unique(format!("cluster_{}", sanitize_identifier(&cluster.id)), &mut used);
            clusters.insert(cluster.id.clone(), id);
        }
        for node in &projection.nodes {
            let id = unique(sanitize_identifier(&node.id), &mut used);
            nodes.insert(node.id.clone(), id);
        }

        Self { nodes, clusters }
    }

    fn node<'a>(&'a self, id: &'a str) -> &'a str {
        self.nodes.get(id).map(String::as_str).unwrap_or(id)
    }

    fn cluster<'a>(&'a self, id: &'a str) -> &'a str {
        self.clusters.get(id).map(String::as_str).unwrap_or(id)
    }
}

fn unique(base: String, used: &mut HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// `[A-Za-z0-9_]` only, never starting with a digit or clashing with `end`
fn sanitize_identifier(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('_');
    if cleaned.is_empty() {
        "node".to_string()
    } else if cleaned.starts_with(|c: char| c.is_ascii_digit()) || cleaned.eq_ignore_ascii_case("end") {
        format!("n_{}", cleaned)
    } else {
        cleaned.to_string()
    }
}
