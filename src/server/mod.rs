//! Server accept loop, configuration, and identity storage (C8/C9 + accept loop).

pub mod config;
pub mod identity;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::core::{ConfigError, KEY_LEN};
use crate::crypto::Keypair;
use crate::domain::Store;
use crate::session::{run_session, IdentityResolver};

pub use config::{Cli, ServerConfig};

struct MapResolver(HashMap<String, [u8; KEY_LEN]>);

impl IdentityResolver for MapResolver {
    fn resolve(&self, identity: &str) -> Option<[u8; KEY_LEN]> {
        self.0.get(identity).copied()
    }
}

/// Bind a listener and serve connections until the process is signalled to stop.
///
/// Each accepted connection gets its own `tokio` task (§5); all tasks share
/// one project [`Store`] behind a `tokio::sync::Mutex`.
pub async fn serve(config: &ServerConfig) -> Result<(), ConfigError> {
    let static_keys = Arc::new(identity::load_or_generate_server_keypair(&config.config_dir)?);
    let identities = identity::load_all_user_public_keys(&config.config_dir)?;
    info!(known_identities = identities.len(), "loaded identity map");
    let resolver: Arc<dyn IdentityResolver> = Arc::new(MapResolver(identities));
    let store = Arc::new(Mutex::new(Store::new()));

    let listener = TcpListener::bind((config.host, config.port))
        .await
        .map_err(ConfigError::Io)?;
    info!(host = %config.host, port = config.port, "listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let static_keys = static_keys.clone();
        let resolver = resolver.clone();
        let store = store.clone();
        tokio::spawn(async move {
            accept_one(stream, peer_addr, static_keys, resolver, store).await;
        });
    }
}

#[instrument(skip_all, fields(peer = %peer_addr))]
async fn accept_one(
    stream: TcpStream,
    peer_addr: std::net::SocketAddr,
    static_keys: Arc<Keypair>,
    resolver: Arc<dyn IdentityResolver>,
    store: Arc<Mutex<Store>>,
) {
    info!("accepted connection");
    if let Err(e) = run_session(stream, static_keys, resolver, store).await {
        error!(error = %e, "session ended with a fatal error");
    }
}
