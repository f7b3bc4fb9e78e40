//! In-memory project store and the operations the dispatcher drives (C5).

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;

use crate::core::DomainError;

use super::model::{extract_hashtags, Flow, FlowInfo, Location, Node, Note, Project, TagCount};

/// Returns the current instant as an ISO-8601 string with timezone.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

/// `{index, size}` pagination request; defaults mirror the reference server.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 {
    100
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { index: 0, size: default_page_size() }
    }
}

/// Apply offset/limit pagination, returning the page and `maxPage`.
pub fn paginate<T: Clone>(items: &[T], page: PageRequest) -> (Vec<T>, u32) {
    if page.size == 0 {
        return (Vec::new(), 0);
    }
    let start = (page.index as usize) * (page.size as usize);
    let end = (start + page.size as usize).min(items.len());
    let slice = if start < items.len() { items[start..end].to_vec() } else { Vec::new() };
    let max_page = if items.is_empty() {
        0
    } else {
        ((items.len() as u32) + page.size - 1) / page.size - 1
    };
    (slice, max_page)
}

/// Ordering requested by `notes/search/columns`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum OrderField {
    #[serde(rename = "createdDate")]
    CreatedDate,
    #[serde(rename = "modifiedDate")]
    ModifiedDate,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub enum OrderDirection {
    #[serde(rename = "ascending")]
    Ascending,
    #[serde(rename = "descending")]
    Descending,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Order {
    pub by: OrderField,
    pub ordering: OrderDirection,
}

/// All live projects, keyed by name.
#[derive(Default)]
pub struct Store {
    projects: HashMap<String, Project>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_projects(&self) -> Vec<(&str, &str, &str)> {
        self.projects
            .iter()
            .map(|(name, p)| (name.as_str(), p.repository.as_str(), p.owner_identity.as_str()))
            .collect()
    }

    pub fn create_project(&mut self, name: String, repository: String, owner_identity: String) {
        self.projects.insert(name, Project::new(repository, owner_identity));
    }

    /// Returns true if a project with that name existed and was removed.
    pub fn remove_project(&mut self, name: &str) -> bool {
        self.projects.remove(name).is_some()
    }

    pub fn project_exists(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    fn project(&self, name: &str) -> Result<&Project, DomainError> {
        self.projects.get(name).ok_or_else(|| DomainError::ProjectNotFound(name.to_string()))
    }

    fn project_mut(&mut self, name: &str) -> Result<&mut Project, DomainError> {
        self.projects.get_mut(name).ok_or_else(|| DomainError::ProjectNotFound(name.to_string()))
    }

    // --- notes -----------------------------------------------------------

    pub fn set_note(
        &mut self,
        project: &str,
        mut note: Note,
        identity: &str,
    ) -> Result<(Note, Vec<TagCount>), DomainError> {
        let now = now_iso8601();
        let proj = self.project_mut(project)?;
        note.author = identity.to_string();
        note.modified_by = identity.to_string();
        if note.created_date.is_empty() {
            note.created_date = now.clone();
        }
        note.modified_date = now;
        proj.notes.insert(note.key(), note.clone());
        Ok((note, tag_histogram(proj)))
    }

    pub fn notes_for_file(&self, project: &str, uri: &str, page: PageRequest) -> Result<(Vec<Note>, u32), DomainError> {
        let proj = self.project(project)?;
        let mut notes: Vec<Note> = proj.notes.values().filter(|n| n.location.file_id.uri == uri).cloned().collect();
        notes.sort_by_key(|n| n.location.line);
        Ok(paginate(&notes, page))
    }

    pub fn remove_note(&mut self, project: &str, uri: &str, line: i64) -> Result<Vec<TagCount>, DomainError> {
        let proj = self.project_mut(project)?;
        proj.notes.remove(&(uri.to_string(), line));
        Ok(tag_histogram(proj))
    }

    pub fn search_notes(&self, project: &str, query: &str, page: PageRequest) -> Result<(Vec<Note>, u32), DomainError> {
        let proj = self.project(project)?;
        let needle = query.to_lowercase();
        let notes: Vec<Note> = proj.notes.values().filter(|n| n.text.to_lowercase().contains(&needle)).cloned().collect();
        Ok(paginate(&notes, page))
    }

    pub fn search_notes_tags(&self, project: &str, tag: &str, page: PageRequest) -> Result<(Vec<Note>, u32), DomainError> {
        let proj = self.project(project)?;
        let needle = tag.to_lowercase();
        let notes: Vec<Note> = proj
            .notes
            .values()
            .filter(|n| extract_hashtags(&n.text).contains(&needle))
            .cloned()
            .collect();
        Ok(paginate(&notes, page))
    }

    pub fn search_notes_columns(
        &self,
        project: &str,
        author: Option<&str>,
        order: Option<Order>,
        page: PageRequest,
    ) -> Result<(Vec<Note>, u32), DomainError> {
        let proj = self.project(project)?;
        let mut notes: Vec<Note> = proj.notes.values().cloned().collect();
        if let Some(author) = author {
            notes.retain(|n| n.author == author);
        }
        if let Some(order) = order {
            notes.sort_by(|a, b| {
                let (ka, kb) = match order.by {
                    OrderField::CreatedDate => (&a.created_date, &b.created_date),
                    OrderField::ModifiedDate => (&a.modified_date, &b.modified_date),
                };
                match order.ordering {
                    OrderDirection::Ascending => ka.cmp(kb),
                    OrderDirection::Descending => kb.cmp(ka),
                }
            });
        }
        Ok(paginate(&notes, page))
    }

    pub fn tag_count(&self, project: &str) -> Result<Vec<TagCount>, DomainError> {
        Ok(tag_histogram(self.project(project)?))
    }

    // --- flows -------------------------------------------------------------

    pub fn create_flow(&mut self, project: &str, name: String, description: String, identity: &str) -> Result<Flow, DomainError> {
        let now = now_iso8601();
        let proj = self.project_mut(project)?;
        let fid = proj.next_flow_id;
        proj.next_flow_id += 1;
        let info = FlowInfo {
            info_id: fid,
            name,
            description,
            author: identity.to_string(),
            modified_by: identity.to_string(),
            created_date: now.clone(),
            modified_date: now,
        };
        let flow = Flow { info, nodes: HashMap::new() };
        proj.flows.insert(fid, flow.clone());
        proj.next_node_id.insert(fid, 1);
        Ok(flow)
    }

    pub fn flow_infos(&self, project: &str) -> Result<Vec<FlowInfo>, DomainError> {
        Ok(self.project(project)?.flows.values().map(|f| f.info.clone()).collect())
    }

    pub fn get_flow(&self, project: &str, flow_id: u64) -> Result<Flow, DomainError> {
        self.project(project)?.flows.get(&flow_id).cloned().ok_or(DomainError::FlowNotFound(flow_id))
    }

    pub fn remove_flow(&mut self, project: &str, flow_id: u64) -> Result<(), DomainError> {
        let proj = self.project_mut(project)?;
        proj.flows.remove(&flow_id);
        Ok(())
    }

    /// Replace an existing flow's nodes wholesale and refresh its info,
    /// distinct from `set_flow_info` (which only touches name/description).
    pub fn set_flow(
        &mut self,
        project: &str,
        flow_id: u64,
        nodes: HashMap<u64, Node>,
        name: Option<String>,
        description: Option<String>,
        identity: &str,
    ) -> Result<Flow, DomainError> {
        let now = now_iso8601();
        let proj = self.project_mut(project)?;
        let flow = proj.flows.get_mut(&flow_id).ok_or(DomainError::FlowNotFound(flow_id))?;
        flow.nodes = nodes;
        if let Some(name) = name {
            flow.info.name = name;
        }
        if let Some(description) = description {
            flow.info.description = description;
        }
        flow.info.modified_date = now;
        flow.info.modified_by = identity.to_string();
        Ok(flow.clone())
    }

    pub fn set_flow_info(
        &mut self,
        project: &str,
        flow_id: u64,
        name: String,
        description: String,
        identity: &str,
    ) -> Result<Option<FlowInfo>, DomainError> {
        let now = now_iso8601();
        let proj = self.project_mut(project)?;
        let Some(flow) = proj.flows.get_mut(&flow_id) else {
            return Ok(None);
        };
        flow.info.name = name;
        flow.info.description = description;
        flow.info.modified_date = now;
        flow.info.modified_by = identity.to_string();
        Ok(Some(flow.info.clone()))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_node(
        &mut self,
        project: &str,
        flow_id: Option<u64>,
        location: Location,
        note: String,
        color: String,
        name: String,
        parent_id: Option<u64>,
        child_id: Option<u64>,
    ) -> Result<(u64, u64), DomainError> {
        let proj = self.project_mut(project)?;
        let fid = match flow_id {
            Some(fid) => fid,
            None => *proj.flows.keys().next().ok_or(DomainError::FlowNotFound(0))?,
        };
        if !proj.flows.contains_key(&fid) {
            return Err(DomainError::FlowNotFound(fid));
        }
        let nid = *proj.next_node_id.entry(fid).or_insert(1);
        proj.next_node_id.insert(fid, nid + 1);

        let mut node = Node {
            location,
            note,
            color,
            name,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
        };
        if let Some(parent_id) = parent_id {
            node.in_edges = vec![parent_id];
        }
        if let Some(child_id) = child_id {
            node.out_edges = vec![child_id];
        }

        let flow = proj.flows.get_mut(&fid).expect("checked above");
        if let Some(parent_id) = parent_id {
            if let Some(parent) = flow.nodes.get_mut(&parent_id) {
                parent.out_edges.push(nid);
            }
        }
        flow.nodes.insert(nid, node);
        Ok((fid, nid))
    }

    pub fn fork_node(
        &mut self,
        project: &str,
        parent_id: u64,
        location: Location,
        note: String,
        color: String,
        name: String,
    ) -> Result<(u64, u64), DomainError> {
        let proj = self.project_mut(project)?;
        let fid = proj
            .flows
            .iter()
            .find(|(_, flow)| flow.nodes.contains_key(&parent_id))
            .map(|(fid, _)| *fid)
            .ok_or(DomainError::NodeNotFound(parent_id))?;

        let nid = *proj.next_node_id.entry(fid).or_insert(1);
        proj.next_node_id.insert(fid, nid + 1);

        let node = Node {
            location,
            note,
            color,
            name,
            in_edges: vec![parent_id],
            out_edges: Vec::new(),
        };
        let flow = proj.flows.get_mut(&fid).expect("checked above");
        flow.nodes.get_mut(&parent_id).expect("checked above").out_edges.push(nid);
        flow.nodes.insert(nid, node);
        Ok((fid, nid))
    }

    pub fn set_node(
        &mut self,
        project: &str,
        node_id: u64,
        patch: NodePatch,
    ) -> Result<u64, DomainError> {
        let proj = self.project_mut(project)?;
        let (fid, flow) = proj
            .flows
            .iter_mut()
            .find(|(_, flow)| flow.nodes.contains_key(&node_id))
            .ok_or(DomainError::NodeNotFound(node_id))?;
        let node = flow.nodes.get_mut(&node_id).expect("checked above");
        if let Some(location) = patch.location {
            node.location = location;
        }
        if let Some(note) = patch.note {
            node.note = note;
        }
        if let Some(color) = patch.color {
            node.color = color;
        }
        if let Some(name) = patch.name {
            node.name = name;
        }
        if let Some(in_edges) = patch.in_edges {
            node.in_edges = in_edges;
        }
        if let Some(out_edges) = patch.out_edges {
            node.out_edges = out_edges;
        }
        Ok(*fid)
    }

    pub fn remove_node(&mut self, project: &str, node_id: u64) -> Result<u64, DomainError> {
        let proj = self.project_mut(project)?;
        let fid = proj
            .flows
            .iter()
            .find(|(_, flow)| flow.nodes.contains_key(&node_id))
            .map(|(fid, _)| *fid)
            .ok_or(DomainError::NodeNotFound(node_id))?;
        proj.flows.get_mut(&fid).expect("checked above").nodes.remove(&node_id);
        Ok(fid)
    }
}

/// Partial update for `flow/set/node`; `None` fields leave the node unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePatch {
    pub location: Option<Location>,
    pub note: Option<String>,
    pub color: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "inEdges")]
    pub in_edges: Option<Vec<u64>>,
    #[serde(rename = "outEdges")]
    pub out_edges: Option<Vec<u64>>,
}

fn tag_histogram(project: &Project) -> Vec<TagCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for note in project.notes.values() {
        for tag in extract_hashtags(&note.text) {
            *counts.entry(tag).or_insert(0) += 1;
        }
    }
    counts.into_iter().map(|(tag, count)| TagCount { tag, count }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FileId;

    fn loc(uri: &str, line: i64) -> Location {
        Location { file_id: FileId { uri: uri.to_string() }, line, start_column: None, end_column: None }
    }

    fn note(uri: &str, line: i64, text: &str) -> Note {
        Note {
            location: loc(uri, line),
            text: text.to_string(),
            author: "ignored".into(),
            modified_by: "ignored".into(),
            created_date: String::new(),
            modified_date: String::new(),
            orphaned: None,
        }
    }

    #[test]
    fn set_note_stamps_identity_regardless_of_input() {
        let mut store = Store::new();
        store.create_project("p1".into(), "/tmp/p1".into(), "alice".into());
        let (saved, _) = store.set_note("p1", note("file:///a.py", 10, "todo #x"), "alice").unwrap();
        assert_eq!(saved.author, "alice");
        assert_eq!(saved.modified_by, "alice");
    }

    #[test]
    fn re_setting_same_key_replaces_value() {
        let mut store = Store::new();
        store.create_project("p1".into(), "/tmp/p1".into(), "alice".into());
        store.set_note("p1", note("file:///a.py", 10, "first"), "alice").unwrap();
        store.set_note("p1", note("file:///a.py", 10, "second"), "alice").unwrap();
        let (notes, _) = store.notes_for_file("p1", "file:///a.py", PageRequest::default()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "second");
    }

    #[test]
    fn tag_histogram_counts_across_notes() {
        let mut store = Store::new();
        store.create_project("p1".into(), "/tmp/p1".into(), "alice".into());
        store.set_note("p1", note("file:///a.py", 1, "#alpha #beta"), "alice").unwrap();
        store.set_note("p1", note("file:///a.py", 2, "#alpha"), "alice").unwrap();
        let tags = store.tag_count("p1").unwrap();
        let alpha = tags.iter().find(|t| t.tag == "alpha").unwrap();
        let beta = tags.iter().find(|t| t.tag == "beta").unwrap();
        assert_eq!(alpha.count, 2);
        assert_eq!(beta.count, 1);
    }

    #[test]
    fn add_node_links_parent_out_edge_and_child_in_edge() {
        let mut store = Store::new();
        store.create_project("p1".into(), "/tmp/p1".into(), "alice".into());
        store.create_flow("p1", "F".into(), "".into(), "alice").unwrap();
        let (fid, parent) = store.add_node("p1", Some(1), loc("file:///a.py", 1), "n1".into(), "#f00".into(), "".into(), None, None).unwrap();
        let (_, child) = store.fork_node("p1", parent, loc("file:///a.py", 2), "n2".into(), "#f00".into(), "".into()).unwrap();

        let flow = store.get_flow("p1", fid).unwrap();
        assert_eq!(flow.nodes[&parent].out_edges, vec![child]);
        assert_eq!(flow.nodes[&child].in_edges, vec![parent]);
    }

    #[test]
    fn remove_note_is_idempotent() {
        let mut store = Store::new();
        store.create_project("p1".into(), "/tmp/p1".into(), "alice".into());
        store.set_note("p1", note("file:///a.py", 1, "x"), "alice").unwrap();
        store.remove_note("p1", "file:///a.py", 1).unwrap();
        store.remove_note("p1", "file:///a.py", 1).unwrap();
        let (notes, _) = store.notes_for_file("p1", "file:///a.py", PageRequest::default()).unwrap();
        assert!(notes.is_empty());
    }
}
