//! RPC method table and dispatch rules (C6).

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::core::{DispatchError, DomainError};
use crate::domain::{Location, NodePatch, Note, Order, PageRequest, Store};

use super::message::{Request, Response};

const NO_ACTIVE_PROJECT: &str = "no active project";

/// Translate a domain-level error into a `control/error` response (§7).
fn domain_error_response(id: u64, err: DomainError) -> Response {
    let dispatch_err: DispatchError = err.into();
    Response::error(id, dispatch_err.reason)
}

fn requires_active_project(method: &str) -> bool {
    // `control/change/project`, `control/subscribe` and `control/unsubscribe` are
    // grouped with the gated methods in the method table, but requiring an
    // already-active project to *select* a project is unsatisfiable (it would
    // make the very first project switch impossible). The reference server
    // gates none of the control/* family; this implementation follows that
    // behavior — see the dispatcher entry in the design notes.
    method.starts_with("notes/") || method.starts_with("flow/")
}

/// Dispatch one already-decrypted request against the shared project store.
///
/// `identity` is the session's authenticated peer name; `active_project` is
/// the session's own cursor (per §9 design notes, never process-global).
pub async fn dispatch(
    store: &Mutex<Store>,
    identity: &str,
    active_project: &mut Option<String>,
    request: Request,
) -> Response {
    let Request { id, method, params } = request;

    if requires_active_project(&method) && active_project.is_none() {
        return Response::error(id, NO_ACTIVE_PROJECT);
    }

    match method.as_str() {
        "control/list/project" => {
            let store = store.lock().await;
            let projects: Vec<Value> = store
                .list_projects()
                .into_iter()
                .map(|(name, repository, owner)| {
                    json!({ "name": name, "repository": repository, "ownerIdentity": owner })
                })
                .collect();
            Response::result(id, method, json!({ "projects": projects }))
        }
        "control/create/project" => {
            let name = str_field(&params, "name");
            let repository = str_field(&params, "repository");
            let owner_identity = str_field(&params, "ownerIdentity");
            store.lock().await.create_project(name, repository, owner_identity);
            Response::result(id, method, json!({}))
        }
        "control/change/project" => {
            let name = params.get("name").and_then(|v| v.as_str()).map(str::to_string);
            *active_project = name.clone();
            Response::result(id, method, json!({ "name": name }))
        }
        "control/remove/project" => {
            let name = str_field(&params, "name");
            store.lock().await.remove_project(&name);
            if active_project.as_deref() == Some(name.as_str()) {
                *active_project = None;
            }
            Response::result(id, method, json!({}))
        }
        "control/subscribe" | "control/unsubscribe" => {
            let channels = params.get("channels").cloned().unwrap_or_else(|| json!([]));
            Response::result(id, method, json!({ "channels": channels }))
        }
        "control/add/user/server" | "control/add/user/project" => {
            // Permission schema is opaque at the protocol level; pass it through.
            let permissions = params.get("permissions").cloned().unwrap_or_else(|| json!(null));
            Response::result(id, method, json!({ "identity": params.get("identity"), "permissions": permissions }))
        }
        "control/exit" => Response::result(id, method, json!({})),

        "notes/set" => handle_notes_set(store, identity, active_project_name(active_project), id, method, params).await,
        "notes/for/file" => handle_notes_for_file(store, active_project_name(active_project), id, method, params).await,
        "notes/remove" => handle_notes_remove(store, active_project_name(active_project), id, method, params).await,
        "notes/search" => handle_notes_search(store, active_project_name(active_project), id, method, params).await,
        "notes/search/tags" => handle_notes_search_tags(store, active_project_name(active_project), id, method, params).await,
        "notes/search/columns" => handle_notes_search_columns(store, active_project_name(active_project), id, method, params).await,
        "notes/tag/count" => handle_notes_tag_count(store, active_project_name(active_project), id, method).await,

        "flow/create" => handle_flow_create(store, identity, active_project_name(active_project), id, method, params).await,
        "flow/get/all" => handle_flow_get_all(store, active_project_name(active_project), id, method).await,
        "flow/get" => handle_flow_get(store, active_project_name(active_project), id, method, params).await,
        "flow/add/node" => handle_flow_add_node(store, active_project_name(active_project), id, method, params).await,
        "flow/fork/node" => handle_flow_fork_node(store, active_project_name(active_project), id, method, params).await,
        "flow/set/node" => handle_flow_set_node(store, active_project_name(active_project), id, method, params).await,
        "flow/remove/node" => handle_flow_remove_node(store, active_project_name(active_project), id, method, params).await,
        "flow/remove" => handle_flow_remove(store, active_project_name(active_project), id, method, params).await,
        "flow/set/info" => handle_flow_set_info(store, identity, active_project_name(active_project), id, method, params).await,
        "flow/linked/to" => Response::result(id, method, json!({ "flowIds": [] })),
        "flow/unlock" => Response::result(id, method, json!({ "flowId": params.get("flowId") })),
        "flow/set" => handle_flow_set(store, identity, active_project_name(active_project), id, method, params).await,

        other => Response::error(id, format!("unknown method: {other}")),
    }
}

fn active_project_name(active_project: &Option<String>) -> &str {
    active_project.as_deref().expect("requires_active_project gated this call")
}

fn str_field(params: &Value, field: &str) -> String {
    params.get(field).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

async fn handle_notes_set(
    store: &Mutex<Store>,
    identity: &str,
    project: &str,
    id: u64,
    method: String,
    params: Value,
) -> Response {
    let Some(note_value) = params.get("note").cloned() else {
        return Response::error(id, "missing note");
    };
    let note: Note = match serde_json::from_value(note_value) {
        Ok(n) => n,
        Err(e) => return Response::error(id, format!("invalid note: {e}")),
    };
    let mut store = store.lock().await;
    match store.set_note(project, note, identity) {
        Ok((saved, tags)) => Response::result(id, method, json!({ "note": saved, "tagCount": tags })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_notes_for_file(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let uri = params.get("fileId").and_then(|f| f.get("uri")).and_then(|v| v.as_str()).unwrap_or_default();
    let page: PageRequest = params.get("page").and_then(|p| serde_json::from_value(p.clone()).ok()).unwrap_or_default();
    let store = store.lock().await;
    match store.notes_for_file(project, uri, page) {
        Ok((notes, max_page)) => {
            Response::result(id, method, json!({ "fileId": { "uri": uri }, "notes": notes, "maxPage": max_page }))
        }
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_notes_remove(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let location = params.get("location").cloned().unwrap_or_else(|| json!({}));
    let uri = location.get("fileId").and_then(|f| f.get("uri")).and_then(|v| v.as_str()).unwrap_or_default();
    let line = location.get("line").and_then(|v| v.as_i64()).unwrap_or(0);
    let mut store = store.lock().await;
    match store.remove_note(project, uri, line) {
        Ok(tags) => Response::result(id, method, json!({ "location": location, "tagCount": tags })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_notes_search(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let text = str_field(&params, "text");
    let page: PageRequest = params.get("page").and_then(|p| serde_json::from_value(p.clone()).ok()).unwrap_or_default();
    let store = store.lock().await;
    match store.search_notes(project, &text, page) {
        Ok((notes, max_page)) => Response::result(id, method, json!({ "notes": notes, "maxPage": max_page })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_notes_search_tags(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let text = str_field(&params, "text").to_lowercase();
    let page: PageRequest = params.get("page").and_then(|p| serde_json::from_value(p.clone()).ok()).unwrap_or_default();
    let store = store.lock().await;
    match store.search_notes_tags(project, &text, page) {
        Ok((notes, max_page)) => Response::result(id, method, json!({ "notes": notes, "maxPage": max_page })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_notes_search_columns(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let filter = params.get("filter").cloned().unwrap_or_else(|| json!({}));
    let author = filter.get("author").and_then(|v| v.as_str());
    let order: Option<Order> = params.get("order").and_then(|o| serde_json::from_value(o.clone()).ok());
    let page: PageRequest = params.get("page").and_then(|p| serde_json::from_value(p.clone()).ok()).unwrap_or_default();
    let store = store.lock().await;
    match store.search_notes_columns(project, author, order, page) {
        Ok((notes, max_page)) => Response::result(id, method, json!({ "notes": notes, "maxPage": max_page })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_notes_tag_count(store: &Mutex<Store>, project: &str, id: u64, method: String) -> Response {
    let store = store.lock().await;
    match store.tag_count(project) {
        Ok(tags) => Response::result(id, method, json!({ "tags": tags })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_flow_create(store: &Mutex<Store>, identity: &str, project: &str, id: u64, method: String, params: Value) -> Response {
    let name = str_field(&params, "name");
    let description = str_field(&params, "description");
    let mut store = store.lock().await;
    match store.create_flow(project, name, description, identity) {
        Ok(flow) => Response::result(id, method, json!({ "flow": flow })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_flow_get_all(store: &Mutex<Store>, project: &str, id: u64, method: String) -> Response {
    let store = store.lock().await;
    match store.flow_infos(project) {
        Ok(infos) => Response::result(id, method, json!({ "flowInfos": infos })),
        Err(e) => domain_error_response(id, e),
    }
}

async fn handle_flow_get(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let Some(flow_id) = params.get("flowId").and_then(|v| v.as_u64()) else {
        return Response::error(id, "missing flowId");
    };
    let store = store.lock().await;
    match store.get_flow(project, flow_id) {
        Ok(flow) => Response::result(id, method, json!({ "flow": flow })),
        Err(_) => Response::error(id, "flow not found"),
    }
}

fn parse_location(params: &Value) -> Location {
    serde_json::from_value(params.get("location").cloned().unwrap_or_else(|| json!({})))
        .unwrap_or(Location { file_id: crate::domain::FileId { uri: String::new() }, line: 0, start_column: None, end_column: None })
}

async fn handle_flow_add_node(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let location = parse_location(&params);
    let note = str_field(&params, "note");
    let color = params.get("color").and_then(|v| v.as_str()).unwrap_or("#888").to_string();
    let name = str_field(&params, "name");
    let flow_id = params.get("flowId").and_then(|v| v.as_u64());
    let parent_id = params.get("parentId").and_then(|v| v.as_u64());
    let child_id = params.get("childId").and_then(|v| v.as_u64());

    let mut store = store.lock().await;
    match store.add_node(project, flow_id, location, note, color, name, parent_id, child_id) {
        Ok((fid, nid)) => Response::result(id, method, json!({ "flowId": fid, "nodeId": nid })),
        Err(_) => Response::error(id, "no flow"),
    }
}

async fn handle_flow_fork_node(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let Some(parent_id) = params.get("parentId").and_then(|v| v.as_u64()) else {
        return Response::error(id, "missing parentId");
    };
    let location = parse_location(&params);
    let note = str_field(&params, "note");
    let color = params.get("color").and_then(|v| v.as_str()).unwrap_or("#888").to_string();
    let name = str_field(&params, "name");

    let mut store = store.lock().await;
    match store.fork_node(project, parent_id, location, note, color, name) {
        Ok((fid, nid)) => Response::result(id, method, json!({ "flowId": fid, "nodeId": nid })),
        Err(_) => Response::error(id, "parent not found"),
    }
}

async fn handle_flow_set_node(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let Some(node_id) = params.get("nodeId").and_then(|v| v.as_u64()) else {
        return Response::error(id, "missing nodeId");
    };
    let patch: NodePatch = params.get("node").and_then(|n| serde_json::from_value(n.clone()).ok()).unwrap_or_default();
    let mut store = store.lock().await;
    match store.set_node(project, node_id, patch) {
        Ok(fid) => Response::result(id, method, json!({ "flowId": fid, "nodeId": node_id })),
        Err(_) => Response::error(id, "node not found"),
    }
}

async fn handle_flow_remove_node(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let Some(node_id) = params.get("nodeId").and_then(|v| v.as_u64()) else {
        return Response::error(id, "missing nodeId");
    };
    let mut store = store.lock().await;
    match store.remove_node(project, node_id) {
        Ok(fid) => Response::result(id, method, json!({ "flowId": fid, "nodeId": node_id })),
        Err(_) => Response::error(id, "node not found"),
    }
}

async fn handle_flow_remove(store: &Mutex<Store>, project: &str, id: u64, method: String, params: Value) -> Response {
    let flow_id = params.get("flowId").and_then(|v| v.as_u64()).unwrap_or_default();
    let mut store = store.lock().await;
    let _ = store.remove_flow(project, flow_id);
    Response::result(id, method, json!({ "flowId": flow_id, "linkedFlows": [] }))
}

async fn handle_flow_set(store: &Mutex<Store>, identity: &str, project: &str, id: u64, method: String, params: Value) -> Response {
    let Some(flow_id) = params.get("flowId").and_then(|v| v.as_u64()) else {
        return Response::error(id, "missing flowId");
    };
    let flow_value = params.get("flow").cloned().unwrap_or_else(|| json!({}));
    let nodes: std::collections::HashMap<u64, crate::domain::Node> = flow_value
        .get("nodes")
        .and_then(|n| serde_json::from_value(n.clone()).ok())
        .unwrap_or_default();
    let name = flow_value.get("info").and_then(|i| i.get("name")).and_then(|v| v.as_str()).map(str::to_string);
    let description = flow_value.get("info").and_then(|i| i.get("description")).and_then(|v| v.as_str()).map(str::to_string);

    let mut store = store.lock().await;
    match store.set_flow(project, flow_id, nodes, name, description, identity) {
        Ok(flow) => Response::result(id, method, json!({ "flow": flow })),
        Err(_) => Response::error(id, "flow not found"),
    }
}

async fn handle_flow_set_info(store: &Mutex<Store>, identity: &str, project: &str, id: u64, method: String, params: Value) -> Response {
    let flow_id = params.get("flowId").and_then(|v| v.as_u64()).unwrap_or_default();
    let name = str_field(&params, "name");
    let description = str_field(&params, "description");
    let mut store = store.lock().await;
    match store.set_flow_info(project, flow_id, name, description, identity) {
        Ok(Some(info)) => Response::result(id, method, json!({ "info": info })),
        Ok(None) => Response::result(id, method, json!({ "info": {} })),
        Err(e) => domain_error_response(id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    fn req(id: u64, method: &str, params: Value) -> Request {
        Request { id, method: method.to_string(), params }
    }

    #[tokio::test]
    async fn unknown_method_returns_control_error_without_closing() {
        let store = Mutex::new(Store::new());
        let mut active = None;
        let resp = dispatch(&store, "alice", &mut active, req(1, "bogus/method", json!({}))).await;
        assert_eq!(resp.method, "control/error");
    }

    #[tokio::test]
    async fn gated_method_without_project_surfaces_control_error() {
        let store = Mutex::new(Store::new());
        let mut active = None;
        let resp = dispatch(&store, "alice", &mut active, req(1, "notes/tag/count", json!({}))).await;
        assert_eq!(resp.method, "control/error");
    }

    #[tokio::test]
    async fn project_lifecycle_scenario() {
        let store = Mutex::new(Store::new());
        let mut active = None;
        dispatch(&store, "alice", &mut active, req(1, "control/create/project", json!({"name": "p1", "repository": "/tmp/p1", "ownerIdentity": "alice"}))).await;
        dispatch(&store, "alice", &mut active, req(2, "control/change/project", json!({"name": "p1"}))).await;
        assert_eq!(active.as_deref(), Some("p1"));
        let resp = dispatch(&store, "alice", &mut active, req(3, "control/list/project", json!({}))).await;
        let projects = resp_value(&resp)["projects"].clone();
        assert_eq!(projects.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notes_set_strips_client_identity_claims() {
        let store = Mutex::new(Store::new());
        let mut active = Some("p1".to_string());
        store.lock().await.create_project("p1".into(), "/tmp/p1".into(), "alice".into());
        let note = json!({
            "location": {"fileId": {"uri": "file:///a.py"}, "line": 10},
            "text": "todo #alpha #beta",
            "author": "bogus",
        });
        let resp = dispatch(&store, "alice", &mut active, req(1, "notes/set", json!({"note": note}))).await;
        let value = resp_value(&resp);
        assert_eq!(value["note"]["author"], "alice");
    }

    fn resp_value(resp: &Response) -> Value {
        serde_json::to_value(resp).unwrap()["result"].clone()
    }
}
