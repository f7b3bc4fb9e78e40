//! Client library (C7): connect, authenticate, and issue RPCs.
//!
//! A connected client owns its `TcpStream` directly, so the ordinary `Drop`
//! for the socket already guarantees closure on every exit path — the
//! scoped-session design note is satisfied by Rust's ownership model rather
//! than a bespoke guard type.

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::core::{HandshakeError, SessionError, DEFAULT_CLIENT_PORT, KEY_LEN};
use crate::crypto::{EncryptedChannel, Keypair};
use crate::handshake::client_handshake;
use crate::transport::{recv_plaintext, send_plaintext};

/// Errors a client call can surface.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] std::io::Error),

    /// The handshake (`control/init` + ephemeral exchange) failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A fatal transport/crypto failure occurred after the handshake.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The server's response did not deserialize into the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// A connection to a Numscull server, authenticated and ready to issue RPCs.
///
/// Generic over the stream type so tests can run the client against an
/// in-memory duplex pipe instead of a real socket.
pub struct Client<S> {
    stream: S,
    channel: EncryptedChannel,
    next_id: u64,
}

impl Client<TcpStream> {
    /// Connect to `host:port`, complete the handshake as `identity`, and
    /// return a ready-to-use client.
    pub async fn connect(
        host: &str,
        port: u16,
        identity: &str,
        static_keys: &Keypair,
    ) -> Result<Self, ClientError> {
        let mut stream = TcpStream::connect((host, port)).await.map_err(ClientError::Connect)?;
        let (channel, _server_pk) = client_handshake(&mut stream, identity, static_keys).await?;
        Ok(Self { stream, channel, next_id: 1 })
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send one request and await its response, bypassing the typed helpers below.
    pub async fn send_raw(&mut self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id();
        let request = json!({ "id": id, "method": method, "params": params });
        self.channel.send(&mut self.stream, &request).await?;
        let response: Value = self.channel.recv(&mut self.stream).await?;
        Ok(response)
    }

    fn result_of(response: Value) -> Result<Value, ClientError> {
        response
            .get("result")
            .cloned()
            .ok_or_else(|| ClientError::MalformedResponse(response.to_string()))
    }

    // ── Control module ──────────────────────────────────────────────

    pub async fn list_projects(&mut self) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("control/list/project", json!({})).await?)
    }

    pub async fn create_project(&mut self, name: &str, repository: &str, owner_identity: &str) -> Result<Value, ClientError> {
        Self::result_of(
            self.send_raw(
                "control/create/project",
                json!({ "name": name, "repository": repository, "ownerIdentity": owner_identity }),
            )
            .await?,
        )
    }

    pub async fn change_project(&mut self, name: &str) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("control/change/project", json!({ "name": name })).await?)
    }

    pub async fn remove_project(&mut self, name: &str) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("control/remove/project", json!({ "name": name })).await?)
    }

    pub async fn subscribe(&mut self, channels: &[u64]) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("control/subscribe", json!({ "channels": channels })).await?)
    }

    pub async fn unsubscribe(&mut self, channels: &[u64]) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("control/unsubscribe", json!({ "channels": channels })).await?)
    }

    pub async fn add_user_server(&mut self, identity: &str, public_key: &[u8; KEY_LEN]) -> Result<Value, ClientError> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;
        Self::result_of(
            self.send_raw(
                "control/add/user/server",
                json!({ "identity": identity, "publicKey": { "bytes": BASE64.encode(public_key) } }),
            )
            .await?,
        )
    }

    pub async fn add_user_project(&mut self, project: &str, identity: &str, permissions: Option<Value>) -> Result<Value, ClientError> {
        let mut params = json!({ "project": project, "identity": identity });
        if let Some(permissions) = permissions {
            params["permissions"] = permissions;
        }
        Self::result_of(self.send_raw("control/add/user/project", params).await?)
    }

    /// Send `control/exit`; the server closes its side after replying.
    pub async fn exit(mut self) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("control/exit", json!({})).await?)
    }

    // ── Notes module ─────────────────────────────────────────────────

    pub async fn notes_set(&mut self, note: Value) -> Result<Value, ClientError> {
        let mut clean = note;
        if let Some(obj) = clean.as_object_mut() {
            obj.remove("author");
            obj.remove("modifiedBy");
        }
        Self::result_of(self.send_raw("notes/set", json!({ "note": clean })).await?)
    }

    pub async fn notes_for_file(&mut self, uri: &str, page: Option<Value>) -> Result<Value, ClientError> {
        let mut params = json!({ "fileId": { "uri": uri } });
        if let Some(page) = page {
            params["page"] = page;
        }
        Self::result_of(self.send_raw("notes/for/file", params).await?)
    }

    pub async fn notes_remove(&mut self, uri: &str, line: i64) -> Result<Value, ClientError> {
        Self::result_of(
            self.send_raw("notes/remove", json!({ "location": { "fileId": { "uri": uri }, "line": line } }))
                .await?,
        )
    }

    pub async fn notes_tag_count(&mut self) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("notes/tag/count", json!({})).await?)
    }

    pub async fn notes_search(&mut self, text: &str, page: Option<Value>) -> Result<Value, ClientError> {
        let mut params = json!({ "text": text });
        if let Some(page) = page {
            params["page"] = page;
        }
        Self::result_of(self.send_raw("notes/search", params).await?)
    }

    pub async fn notes_search_tags(&mut self, text: &str, page: Option<Value>) -> Result<Value, ClientError> {
        let mut params = json!({ "text": text });
        if let Some(page) = page {
            params["page"] = page;
        }
        Self::result_of(self.send_raw("notes/search/tags", params).await?)
    }

    pub async fn notes_search_columns(&mut self, filter: Value, order: Option<Value>, page: Option<Value>) -> Result<Value, ClientError> {
        let mut params = json!({ "filter": filter });
        if let Some(order) = order {
            params["order"] = order;
        }
        if let Some(page) = page {
            params["page"] = page;
        }
        Self::result_of(self.send_raw("notes/search/columns", params).await?)
    }

    // ── Flow module ──────────────────────────────────────────────────

    pub async fn flow_get_all(&mut self) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/get/all", json!({})).await?)
    }

    pub async fn flow_create(&mut self, name: &str, description: &str) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/create", json!({ "name": name, "description": description })).await?)
    }

    pub async fn flow_get(&mut self, flow_id: u64) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/get", json!({ "flowId": flow_id })).await?)
    }

    pub async fn flow_set(&mut self, flow: Value) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/set", json!({ "flow": flow })).await?)
    }

    pub async fn flow_set_info(&mut self, flow_id: u64, name: &str, description: &str) -> Result<Value, ClientError> {
        Self::result_of(
            self.send_raw("flow/set/info", json!({ "flowId": flow_id, "name": name, "description": description }))
                .await?,
        )
    }

    pub async fn flow_remove(&mut self, flow_id: u64) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/remove", json!({ "flowId": flow_id })).await?)
    }

    pub async fn flow_linked_to(&mut self, flow_id: u64) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/linked/to", json!({ "flowId": flow_id })).await?)
    }

    pub async fn flow_unlock(&mut self, flow_id: u64) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/unlock", json!({ "flowId": flow_id })).await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn flow_add_node(
        &mut self,
        location: Value,
        note: &str,
        color: &str,
        flow_id: Option<u64>,
        parent_id: Option<u64>,
        child_id: Option<u64>,
    ) -> Result<Value, ClientError> {
        let mut params = json!({ "location": location, "note": note, "color": color });
        if let Some(flow_id) = flow_id {
            params["flowId"] = json!(flow_id);
        }
        if let Some(parent_id) = parent_id {
            params["parentId"] = json!(parent_id);
        }
        if let Some(child_id) = child_id {
            params["childId"] = json!(child_id);
        }
        Self::result_of(self.send_raw("flow/add/node", params).await?)
    }

    pub async fn flow_fork_node(&mut self, location: Value, note: &str, color: &str, parent_id: u64) -> Result<Value, ClientError> {
        Self::result_of(
            self.send_raw(
                "flow/fork/node",
                json!({ "location": location, "note": note, "color": color, "parentId": parent_id }),
            )
            .await?,
        )
    }

    pub async fn flow_set_node(&mut self, node_id: u64, node: Value) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/set/node", json!({ "nodeId": node_id, "node": node })).await?)
    }

    pub async fn flow_remove_node(&mut self, node_id: u64) -> Result<Value, ClientError> {
        Self::result_of(self.send_raw("flow/remove/node", json!({ "nodeId": node_id })).await?)
    }
}

/// Default port assumed by the client library when unconfigured, overridable
/// by the `NUMSCULL_PORT` environment variable at the call site.
pub const DEFAULT_PORT: u16 = DEFAULT_CLIENT_PORT;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::server_handshake;
    use tokio::io::duplex;

    async fn connected_pair() -> (Client<tokio::io::DuplexStream>, Client<tokio::io::DuplexStream>) {
        let server_static = Keypair::generate();
        let client_static = Keypair::generate();
        let client_pub = *client_static.public();

        let (mut client_io, mut server_io) = duplex(256 * 1024);

        let server_task = tokio::spawn(async move {
            server_handshake(&mut server_io, &server_static, move |_| Some(client_pub)).await.map(|(ch, _)| (server_io, ch))
        });
        let (channel, _server_pk) = client_handshake(&mut client_io, "alice", &client_static).await.unwrap();
        let (server_io, server_channel) = server_task.await.unwrap().unwrap();

        (
            Client { stream: client_io, channel, next_id: 1 },
            Client { stream: server_io, channel: server_channel, next_id: 1 },
        )
    }

    #[tokio::test]
    async fn send_raw_round_trips_over_a_duplex_pipe() {
        let (mut client, mut server) = connected_pair().await;
        let client_call = tokio::spawn(async move { client.send_raw("control/list/project", json!({})).await });
        let request: Value = server.channel.recv(&mut server.stream).await.unwrap();
        assert_eq!(request["method"], "control/list/project");
        let response = json!({ "id": request["id"], "method": "control/list/project", "result": { "projects": [] } });
        server.channel.send(&mut server.stream, &response).await.unwrap();
        let got = client_call.await.unwrap().unwrap();
        assert_eq!(got["result"]["projects"], json!([]));
    }
}
