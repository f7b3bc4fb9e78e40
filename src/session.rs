//! Per-connection session state machine (C4).
//!
//! One task services one TCP connection end to end: plaintext init, the
//! ephemeral key exchange, then strict request/response lockstep until
//! `control/exit` or a fatal transport/crypto error.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::core::{KEY_LEN, SessionError};
use crate::crypto::Keypair;
use crate::domain::Store;
use crate::handshake::server_handshake;
use crate::rpc::dispatch;

/// Looks up a known peer's static public key by identity name (C8).
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, identity: &str) -> Option<[u8; KEY_LEN]>;
}

impl<F> IdentityResolver for F
where
    F: Fn(&str) -> Option<[u8; KEY_LEN]> + Send + Sync,
{
    fn resolve(&self, identity: &str) -> Option<[u8; KEY_LEN]> {
        self(identity)
    }
}

/// Run one session to completion on an already-accepted stream.
///
/// Returns `Ok(())` on a clean `control/exit` or a handshake rejection
/// (both are expected outcomes, not failures); returns `Err` for any fatal
/// transport or crypto failure encountered mid-session, which the caller
/// should log and then drop the connection.
#[instrument(skip_all, fields(identity))]
pub async fn run_session<S>(
    mut stream: S,
    static_keys: Arc<Keypair>,
    identities: Arc<dyn IdentityResolver>,
    store: Arc<Mutex<Store>>,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake_result = server_handshake(&mut stream, &static_keys, |name| identities.resolve(name)).await;

    let (mut channel, identity) = match handshake_result {
        Ok(ok) => ok,
        Err(crate::core::HandshakeError::UnknownIdentity(name)) => {
            warn!(identity = %name, "rejected handshake for unknown identity");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::Span::current().record("identity", &identity.as_str());
    info!("session established");

    let mut active_project: Option<String> = None;

    loop {
        let request: crate::rpc::Request = channel.recv(&mut stream).await?;
        let method = request.method.clone();
        let response = dispatch(&store, &identity, &mut active_project, request).await;
        let exit = response.method == "control/exit" && method == "control/exit";
        channel.send(&mut stream, &response).await?;
        if exit {
            info!("session closed by control/exit");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::client_handshake;
    use tokio::io::duplex;

    struct StaticMap(std::collections::HashMap<String, [u8; KEY_LEN]>);

    impl IdentityResolver for StaticMap {
        fn resolve(&self, identity: &str) -> Option<[u8; KEY_LEN]> {
            self.0.get(identity).copied()
        }
    }

    #[tokio::test]
    async fn full_session_handles_control_init_and_exit() {
        let server_static = Arc::new(Keypair::generate());
        let client_static = Keypair::generate();
        let mut identities = std::collections::HashMap::new();
        identities.insert("alice".to_string(), *client_static.public());
        let resolver: Arc<dyn IdentityResolver> = Arc::new(StaticMap(identities));
        let store = Arc::new(Mutex::new(Store::new()));

        let (mut client_io, server_io) = duplex(128 * 1024);

        let server_task = tokio::spawn(run_session(server_io, server_static, resolver, store));

        let (mut channel, _server_pk) = client_handshake(&mut client_io, "alice", &client_static).await.unwrap();

        let list_req = serde_json::json!({"id": 2, "method": "control/list/project", "params": {}});
        channel.send(&mut client_io, &list_req).await.unwrap();
        let resp: serde_json::Value = channel.recv(&mut client_io).await.unwrap();
        assert_eq!(resp["method"], "control/list/project");
        assert_eq!(resp["result"]["projects"], serde_json::json!([]));

        let exit_req = serde_json::json!({"id": 3, "method": "control/exit", "params": {}});
        channel.send(&mut client_io, &exit_req).await.unwrap();
        let resp: serde_json::Value = channel.recv(&mut client_io).await.unwrap();
        assert_eq!(resp["method"], "control/exit");

        server_task.await.unwrap().unwrap();
    }
}
