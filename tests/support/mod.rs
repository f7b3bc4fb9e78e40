//! Shared end-to-end test scaffolding (§8.1): an ephemeral in-process
//! server and a keypair fixture generator backed by `tempfile::TempDir`.

use std::collections::HashMap;
use std::sync::Arc;

use numscull_protocol::crypto::Keypair;
use numscull_protocol::domain::Store;
use numscull_protocol::session::{run_session, IdentityResolver};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

struct MapResolver(HashMap<String, [u8; 32]>);

impl IdentityResolver for MapResolver {
    fn resolve(&self, identity: &str) -> Option<[u8; 32]> {
        self.0.get(identity).copied()
    }
}

/// A running in-process server bound to an ephemeral localhost port.
pub struct TestServer {
    pub port: u16,
    pub server_static: Keypair,
}

/// Bind to `127.0.0.1:0`, accept connections in the background for the
/// lifetime of the test process, and return the bound port.
pub async fn spawn_test_server(known_identities: HashMap<String, [u8; 32]>) -> TestServer {
    let server_static = Keypair::generate();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let port = listener.local_addr().unwrap().port();

    let static_keys = Arc::new(server_static.clone());
    let resolver: Arc<dyn IdentityResolver> = Arc::new(MapResolver(known_identities));
    let store = Arc::new(Mutex::new(Store::new()));

    tokio::spawn(async move {
        loop {
            let Ok((stream, _addr)) = listener.accept().await else { break };
            let static_keys = static_keys.clone();
            let resolver = resolver.clone();
            let store = store.clone();
            tokio::spawn(async move {
                let _ = run_session(stream, static_keys, resolver, store).await;
            });
        }
    });

    TestServer { port, server_static }
}

/// Generate a fresh identity and write `identities/<name>` + `users/<name>.pub`
/// under `dir`, mirroring the `create-keypair` CLI subcommand.
pub fn keypair_fixture(name: &str, dir: &std::path::Path) -> Keypair {
    numscull_protocol::server::identity::create_keypair(name, dir).expect("write keypair fixture");
    numscull_protocol::server::identity::load_identity(name, dir).expect("load keypair fixture")
}
