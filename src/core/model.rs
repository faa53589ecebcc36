// src/core/model.rs
//! Graph data model shared by every pipeline stage.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use serde::{Serialize, Deserialize};

/// One scanned source file, treated as an opaque text blob
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// Path relative to the scan root, `/`-separated
    pub path: String,
    pub raw_text: String,
}

impl SourceUnit {
    pub fn new(path: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            raw_text: raw_text.into(),
        }
    }

    /// File name without extension
    pub fn file_stem(&self) -> &str {
        let file_name = self.path.rsplit('/').next().unwrap_or(&self.path);
        match file_name.rfind('.') {
            Some(0) | None => file_name,
            Some(idx) => &file_name[..idx],
        }
    }

    /// Parent directory of the unit, empty at the root
    pub fn parent_dir(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }
}

pub type NodeId = String;
pub type GroupId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    ExternalEntity,
    Process,
    DataStore,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::ExternalEntity => f.write_str("ExternalEntity"),
            NodeKind::Process => f.write_str("Process"),
            NodeKind::DataStore => f.write_str("DataStore"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub source_path: String,
    pub group_id: Option<GroupId>,
}

impl Node {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Value of the first `prefix:value` tag, e.g. `group:Billing`
    pub fn tag_value(&self, prefix: &str) -> Option<&str> {
        self.tags.iter().find_map(|tag| {
            tag.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }

    /// Values of every `prefix:value` tag, in tag order
    pub fn tag_values<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags.iter().filter_map(move |tag| {
            tag.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }

    pub fn is_boundary(&self) -> bool {
        self.kind == NodeKind::Process && self.has_tag("boundary")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    SyncCall,
    AsyncEvent,
    Persistence,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKind::SyncCall => f.write_str("SyncCall"),
            FlowKind::AsyncEvent => f.write_str("AsyncEvent"),
            FlowKind::Persistence => f.write_str("Persistence"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub flow_kind: FlowKind,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Process members in node insertion order
    pub member_node_ids: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// File could not be read or exceeded the size limit
    UnreadableFile,
    /// Two units collapsed onto one node id
    IdCollision,
    /// Candidate edge with no matching node
    UnresolvedReference,
    /// Candidate edge whose name matched more than one node
    AmbiguousReference,
    /// DataStore touched by a second group's processes
    OwnershipViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// File path, node id or edge description the diagnostic is about
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Unresolved and ambiguous references are both discarded candidates
    pub fn is_discarded_candidate(&self) -> bool {
        matches!(
            self.kind,
            DiagnosticKind::UnresolvedReference | DiagnosticKind::AmbiguousReference
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub units_scanned: usize,
    pub units_classified: usize,
    pub nodes: usize,
    pub edges: usize,
    pub groups: usize,
    pub candidates_discarded: usize,
    pub ownership_violations: usize,
}

/// The complete, immutable architecture graph produced by one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchitectureGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub groups: Vec<Group>,
    /// DataStore id -> owning group id, in DataStore insertion order
    pub data_store_owners: Vec<(NodeId, GroupId)>,
    #[serde(skip)]
    node_index: HashMap<NodeId, usize>,
}

impl ArchitectureGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, groups: Vec<Group>, data_store_owners: Vec<(NodeId, GroupId)>) -> Self {
        let node_index = nodes.iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        Self {
            nodes,
            edges,
            groups,
            data_store_owners,
            node_index,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn owner_of(&self, data_store: &str) -> Option<&GroupId> {
        self.data_store_owners.iter()
            .find(|(store, _)| store == data_store)
            .map(|(_, group)| group)
    }
}

/// Output of a full run: the graph plus everything recoverable that went wrong
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub graph: ArchitectureGraph,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: GraphStats,
}
