//! The code-review domain model and its in-memory store (C5).

mod model;
mod store;

pub use model::{extract_hashtags, FileId, Flow, FlowInfo, Location, Node, Note, Project, TagCount};
pub use store::{now_iso8601, Order, OrderDirection, OrderField, PageRequest, Store, NodePatch};
