// src/core/projector.rs
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use serde::Serialize;

use crate::error::{AtlasError, Result};
use super::model::{ArchitectureGraph, FlowKind, GroupId, Node, NodeKind};

const SYSTEM_ID: &str = "@system";
const CALLERS_ID: &str = "@callers";
const CALLERS_NAME: &str = "Callers";

/// Requested level of detail
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Level {
    /// Level 0: the system against its external actors
    Context,
    /// Level 1: one node per bounded context
    Groups,
    /// Level 2: one bounded context in full
    Detail(GroupId),
}

impl Level {
    /// Output file name for the rendered diagram
    pub fn file_name(&self) -> String {
        match self {
            Level::Context => "context.mmd".to_string(),
            Level::Groups => "groups.mmd".to_string(),
            Level::Detail(group) => format!("detail-{}.mmd", group),
        }
    }
}

impl FromStr for Level {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "context" => Ok(Level::Context),
            "groups" => Ok(Level::Groups),
            other => match other.strip_prefix("detail:") {
                Some(group) if !group.trim().is_empty() => Ok(Level::Detail(group.trim().to_string())),
                _ => Err(AtlasError::InvalidLevel(other.to_string())),
            },
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Context => f.write_str("context"),
            Level::Groups => f.write_str("groups"),
            Level::Detail(group) => write!(f, "detail:{}", group),
        }
    }
}

/// Shape token family for a projected node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Shape {
    ExternalEntity,
    Process,
    DataStore,
    /// The whole system collapsed to one node
    System,
}

impl From<NodeKind> for Shape {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::ExternalEntity => Shape::ExternalEntity,
            NodeKind::Process => Shape::Process,
            NodeKind::DataStore => Shape::DataStore,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewNode {
    pub id: String,
    pub name: String,
    pub shape: Shape,
    /// Cluster the node is drawn inside, if any
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEdge {
    pub from: String,
    pub to: String,
    pub flow_kind: FlowKind,
    /// Contributing labels in first-seen order
    pub labels: Vec<String>,
}

impl ViewEdge {
    pub fn label(&self) -> String {
        self.labels.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
}

/// Level-specific subgraph ready for rendering
#[derive(Debug, Clone, Serialize)]
pub struct Projection {
    pub level: Level,
    pub title: String,
    pub nodes: Vec<ViewNode>,
    pub edges: Vec<ViewEdge>,
    pub clusters: Vec<Cluster>,
}

impl Projection {
    pub fn node(&self, id: &str) -> Option<&ViewNode> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

/// Collapses parallel edges, keeping every contributing label
#[derive(Default)]
struct EdgeMerger {
    edges: Vec<ViewEdge>,
    index: HashMap<(String, String, FlowKind, Option<String>), usize>,
}

impl EdgeMerger {
    /// Merge with any edge sharing endpoints and flow kind
    fn merge(&mut self, from: &str, to: &str, flow_kind: FlowKind, label: &str) {
        self.push((from.to_string(), to.to_string(), flow_kind, None), label);
    }

    /// Keep as its own edge unless identical to one already present
    fn keep(&mut self, from: &str, to: &str, flow_kind: FlowKind, label: &str) {
        self.push((from.to_string(), to.to_string(), flow_kind, Some(label.to_string())), label);
    }

    fn push(&mut self, key: (String, String, FlowKind, Option<String>), label: &str) {
        if key.0 == key.1 {
            return;
        }
        match self.index.get(&key) {
            Some(&i) => {
                let labels = &mut self.edges[i].labels;
                if !label.is_empty() && !labels.iter().any(|l| l == label) {
                    labels.push(label.to_string());
                }
            }
            None => {
                self.index.insert(key.clone(), self.edges.len());
                self.edges.push(ViewEdge {
                    from: key.0,
                    to: key.1,
                    flow_kind: key.2,
                    labels: if label.is_empty() { Vec::new() } else { vec![label.to_string()] },
                });
            }
        }
    }

    fn touched(&self) -> HashSet<&str> {
        self.edges.iter()
            .flat_map(|edge| [edge.from.as_str(), edge.to.as_str()])
            .collect()
    }

    fn into_edges(self) -> Vec<ViewEdge> {
        self.edges
    }
}

fn group_node_id(group: &str) -> String {
    format!("group:{}", group)
}

/// Pure function from the full graph to one level's view
pub struct LevelProjector<'a> {
    graph: &'a ArchitectureGraph,
    system_name: String,
}

impl<'a> LevelProjector<'a> {
    pub fn new(graph: &'a ArchitectureGraph, system_name: impl Into<String>) -> Self {
        Self {
            graph,
            system_name: system_name.into(),
        }
    }

    pub fn project(&self, level: &Level) -> Result<Projection> {
        match level {
            Level::Context => Ok(self.context()),
            Level::Groups => Ok(self.groups()),
            Level::Detail(group) => self.detail(group),
        }
    }

    /// Every level the graph supports: context, groups, then detail per group
    pub fn all_levels(&self) -> Vec<Level> {
        let mut levels = vec![Level::Context, Level::Groups];
        levels.extend(self.graph.groups.iter().map(|group| Level::Detail(group.id.clone())));
        levels
    }

    fn view(node: &Node, cluster: Option<String>) -> ViewNode {
        ViewNode {
            id: node.id.clone(),
            name: node.name.clone(),
            shape: node.kind.into(),
            cluster,
        }
    }

    /// Level 0.
    ///
    /// Boundary processes become one "callers" actor pointing at the system,
    /// labelled with their endpoints or else their names.
    /// External edges are re-pointed to the system; Process-only traffic vanishes.
    fn context(&self) -> Projection {
        let mut merger = EdgeMerger::default();

        for node in self.graph.nodes.iter().filter(|n| n.is_boundary()) {
            let flow_kind = if node.has_tag("async") { FlowKind::AsyncEvent } else { FlowKind::SyncCall };
            let mut endpoints = node.tag_values("endpoint").peekable();
            if endpoints.peek().is_none() {
                merger.merge(CALLERS_ID, SYSTEM_ID, flow_kind, &node.name);
            }
            for endpoint in endpoints {
                merger.merge(CALLERS_ID, SYSTEM_ID, flow_kind, endpoint);
            }
        }

        for edge in &self.graph.edges {
            let (Some(from), Some(to)) = (self.graph.node(&edge.from), self.graph.node(&edge.to)) else {
                continue;
            };
            let endpoint = |node: &Node| match node.kind {
                NodeKind::Process => SYSTEM_ID.to_string(),
                _ => node.id.clone(),
            };
            match (from.kind, to.kind) {
                (NodeKind::Process, NodeKind::Process) => {}
                // Stores behind a process belong to some group and stay hidden
                (NodeKind::Process, NodeKind::DataStore) | (NodeKind::DataStore, NodeKind::Process) => {}
                _ => merger.merge(&endpoint(from), &endpoint(to), edge.flow_kind, &edge.label),
            }
        }

        let touched = merger.touched();
        let mut nodes = Vec::new();
        if touched.contains(CALLERS_ID) {
            nodes.push(ViewNode {
                id: CALLERS_ID.to_string(),
                name: CALLERS_NAME.to_string(),
                shape: Shape::ExternalEntity,
                cluster: None,
            });
        }
        nodes.push(ViewNode {
            id: SYSTEM_ID.to_string(),
            name: self.system_name.clone(),
            shape: Shape::System,
            cluster: None,
        });
        for node in &self.graph.nodes {
            let keep = match node.kind {
                NodeKind::ExternalEntity => true,
                NodeKind::DataStore => touched.contains(node.id.as_str()),
                NodeKind::Process => false,
            };
            if keep {
                nodes.push(Self::view(node, None));
            }
        }

        Projection {
            level: Level::Context,
            title: format!("{} - system context", self.system_name),
            nodes,
            edges: merger.into_edges(),
            clusters: Vec::new(),
        }
    }

    /// Level 1: one Process node per group, owned stores nested inside it
    fn groups(&self) -> Projection {
        let mut nodes = Vec::new();
        let mut clusters = Vec::new();

        for group in &self.graph.groups {
            clusters.push(Cluster {
                id: group.id.clone(),
                name: group.name.clone(),
            });
            nodes.push(ViewNode {
                id: group_node_id(&group.id),
                name: group.name.clone(),
                shape: Shape::Process,
                cluster: Some(group.id.clone()),
            });
            for node in &self.graph.nodes {
                if node.kind == NodeKind::DataStore && self.graph.owner_of(&node.id) == Some(&group.id) {
                    nodes.push(Self::view(node, Some(group.id.clone())));
                }
            }
        }
        for node in &self.graph.nodes {
            let top_level = match node.kind {
                NodeKind::ExternalEntity => true,
                NodeKind::DataStore => self.graph.owner_of(&node.id).is_none(),
                NodeKind::Process => false,
            };
            if top_level {
                nodes.push(Self::view(node, None));
            }
        }

        let mut merger = EdgeMerger::default();
        for edge in &self.graph.edges {
            let (Some(from), Some(to)) = (self.graph.node(&edge.from), self.graph.node(&edge.to)) else {
                continue;
            };
            let (from_id, to_id) = (self.collapse(from), self.collapse(to));
            // Intra-group process traffic disappears; the merger drops same-endpoint edges
            merger.merge(&from_id, &to_id, edge.flow_kind, &edge.label);
        }

        Projection {
            level: Level::Groups,
            title: format!("{} - bounded contexts", self.system_name),
            nodes,
            edges: merger.into_edges(),
            clusters,
        }
    }

    /// Process -> its group node; everything else keeps its identity
    fn collapse(&self, node: &Node) -> String {
        match (&node.kind, &node.group_id) {
            (NodeKind::Process, Some(group)) => group_node_id(group),
            _ => node.id.clone(),
        }
    }

    /// Level 2: the selected group in full, its neighbours collapsed per Level 1
    fn detail(&self, group_id: &str) -> Result<Projection> {
        let group = self.graph.group(group_id)
            .ok_or_else(|| AtlasError::GroupNotFound(group_id.to_string()))?;

        let inside = |node: &Node| match node.kind {
            NodeKind::Process => node.group_id.as_deref() == Some(group_id),
            NodeKind::DataStore => self.graph.owner_of(&node.id).map(String::as_str) == Some(group_id),
            NodeKind::ExternalEntity => false,
        };

        let mut merger = EdgeMerger::default();
        for edge in &self.graph.edges {
            let (Some(from), Some(to)) = (self.graph.node(&edge.from), self.graph.node(&edge.to)) else {
                continue;
            };
            match (inside(from), inside(to)) {
                (true, true) => merger.keep(&from.id, &to.id, edge.flow_kind, &edge.label),
                (true, false) => merger.merge(&from.id, &self.collapse(to), edge.flow_kind, &edge.label),
                (false, true) => merger.merge(&self.collapse(from), &to.id, edge.flow_kind, &edge.label),
                (false, false) => {}
            }
        }

        let touched = merger.touched();
        let mut nodes: Vec<ViewNode> = self.graph.nodes.iter()
            .filter(|&node| inside(node))
            .map(|node| Self::view(node, Some(group.id.clone())))
            .collect();
        for other in self.graph.groups.iter().filter(|g| g.id != group.id) {
            let id = group_node_id(&other.id);
            if touched.contains(id.as_str()) {
                nodes.push(ViewNode {
                    id,
                    name: other.name.clone(),
                    shape: Shape::Process,
                    cluster: None,
                });
            }
        }
        for node in &self.graph.nodes {
            if node.kind != NodeKind::Process && !inside(node) && touched.contains(node.id.as_str()) {
                nodes.push(Self::view(node, None));
            }
        }

        Ok(Projection {
            level: Level::Detail(group.id.clone()),
            title: format!("{} - {}", self.system_name, group.name),
            nodes,
            edges: merger.into_edges(),
            clusters: vec![Cluster {
                id: group.id.clone(),
                name: group.name.clone(),
            }],
        })
    }
}
