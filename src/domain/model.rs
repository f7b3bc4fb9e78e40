//! Domain types (C5): projects, notes, flows, and nodes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A source file, addressed by URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileId {
    pub uri: String,
}

/// A point (or range) within a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    #[serde(rename = "fileId")]
    pub file_id: FileId,
    pub line: i64,
    #[serde(rename = "startColumn", skip_serializing_if = "Option::is_none")]
    pub start_column: Option<i64>,
    #[serde(rename = "endColumn", skip_serializing_if = "Option::is_none")]
    pub end_column: Option<i64>,
}

/// A free-text annotation pinned to a `(file URI, line)` pair.
///
/// Identity within a project is the pair `(location.fileId.uri, location.line)`;
/// `author`/`modifiedBy` are always server-stamped, never client-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub location: Location,
    pub text: String,
    #[serde(default)]
    pub author: String,
    #[serde(rename = "modifiedBy", default)]
    pub modified_by: String,
    #[serde(rename = "createdDate", default)]
    pub created_date: String,
    #[serde(rename = "modifiedDate", default)]
    pub modified_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphaned: Option<Value>,
}

impl Note {
    pub(crate) fn key(&self) -> (String, i64) {
        (self.location.file_id.uri.clone(), self.location.line)
    }
}

/// A vertex of a flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub location: Location,
    pub note: String,
    pub color: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "inEdges", default)]
    pub in_edges: Vec<u64>,
    #[serde(rename = "outEdges", default)]
    pub out_edges: Vec<u64>,
}

/// Metadata describing a flow, independent of its node graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowInfo {
    #[serde(rename = "infoId")]
    pub info_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub author: String,
    #[serde(rename = "modifiedBy")]
    pub modified_by: String,
    #[serde(rename = "createdDate")]
    pub created_date: String,
    #[serde(rename = "modifiedDate")]
    pub modified_date: String,
}

/// A directed graph of annotated code locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub info: FlowInfo,
    pub nodes: HashMap<u64, Node>,
}

/// A named collection of notes and flows shared by reviewers.
#[derive(Debug, Clone)]
pub struct Project {
    pub repository: String,
    pub owner_identity: String,
    pub notes: HashMap<(String, i64), Note>,
    pub flows: HashMap<u64, Flow>,
    pub next_flow_id: u64,
    pub next_node_id: HashMap<u64, u64>,
}

impl Project {
    pub fn new(repository: String, owner_identity: String) -> Self {
        Self {
            repository,
            owner_identity,
            notes: HashMap::new(),
            flows: HashMap::new(),
            next_flow_id: 1,
            next_node_id: HashMap::new(),
        }
    }
}

/// Histogram entry for `notes/tag/count` and `notes/search/tags` support.
#[derive(Debug, Clone, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

static HASHTAG: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"#(\w+)").expect("static hashtag pattern"));

/// Extract the set of lowercase hashtags present in `text`.
///
/// Hashtags are derived on read and never stored (§3 invariants).
pub fn extract_hashtags(text: &str) -> std::collections::HashSet<String> {
    HASHTAG
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .collect()
}
