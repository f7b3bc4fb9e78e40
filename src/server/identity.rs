//! Identity and key storage (C8).
//!
//! Grounded in the reference server's `load_keypair`/`MockServer.__init__`:
//! two narrow byte-reading calls (`load_identity`, `load_user_public_key`)
//! are the disk-facing surface; everything else here is scaffolding around
//! them (generation, persistence, the `create-keypair` CLI subcommand).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::{ConfigError, KEY_LEN};
use crate::crypto::Keypair;

fn identities_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("identities")
}

fn users_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("users")
}

fn server_keypair_path(config_dir: &Path) -> PathBuf {
    config_dir.join("server.keypair")
}

fn read_fixed<const N: usize>(path: &Path) -> Result<[u8; N], ConfigError> {
    let bytes = std::fs::read(path)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| ConfigError::InvalidKeyFile {
        path: path.display().to_string(),
        reason: format!("expected {N} bytes, found {}", bytes.len()),
    })
}

/// Load a full identity keypair (`pub‖sec`, 64 bytes) from `<config_dir>/identities/<name>`.
pub fn load_identity(name: &str, config_dir: &Path) -> Result<Keypair, ConfigError> {
    let path = identities_dir(config_dir).join(name);
    let raw: [u8; 2 * KEY_LEN] = read_fixed(&path)?;
    let mut public = [0u8; KEY_LEN];
    let mut secret = [0u8; KEY_LEN];
    public.copy_from_slice(&raw[..KEY_LEN]);
    secret.copy_from_slice(&raw[KEY_LEN..]);
    Ok(Keypair::from_bytes(public, secret))
}

/// Load a peer's public key only, from `<config_dir>/users/<name>.pub`.
pub fn load_user_public_key(name: &str, config_dir: &Path) -> Result<[u8; KEY_LEN], ConfigError> {
    let path = users_dir(config_dir).join(format!("{name}.pub"));
    read_fixed(&path)
}

/// Load every `*.pub` file under `<config_dir>/users/` into an in-memory map,
/// used by the server to resolve `control/init` identities without touching
/// disk on every handshake.
pub fn load_all_user_public_keys(config_dir: &Path) -> Result<HashMap<String, [u8; KEY_LEN]>, ConfigError> {
    let dir = users_dir(config_dir);
    if !dir.exists() {
        return Ok(HashMap::new());
    }
    let mut map = HashMap::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pub") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let key = read_fixed(&path)?;
        map.insert(name.to_string(), key);
    }
    Ok(map)
}

/// Load the server's static keypair, generating and persisting a fresh one
/// on first run.
pub fn load_or_generate_server_keypair(config_dir: &Path) -> Result<Keypair, ConfigError> {
    let path = server_keypair_path(config_dir);
    if path.exists() {
        let raw: [u8; 2 * KEY_LEN] = read_fixed(&path)?;
        let mut public = [0u8; KEY_LEN];
        let mut secret = [0u8; KEY_LEN];
        public.copy_from_slice(&raw[..KEY_LEN]);
        secret.copy_from_slice(&raw[KEY_LEN..]);
        return Ok(Keypair::from_bytes(public, secret));
    }
    std::fs::create_dir_all(config_dir)?;
    let keypair = Keypair::generate();
    let mut raw = Vec::with_capacity(2 * KEY_LEN);
    raw.extend_from_slice(keypair.public());
    raw.extend_from_slice(keypair.secret());
    std::fs::write(&path, &raw)?;
    info!(path = %path.display(), "generated new server static keypair");
    Ok(keypair)
}

/// Generate a fresh identity and write both `identities/<name>` and
/// `users/<name>.pub`, as the `create-keypair` CLI subcommand does.
pub fn create_keypair(name: &str, config_dir: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(identities_dir(config_dir))?;
    std::fs::create_dir_all(users_dir(config_dir))?;

    let keypair = Keypair::generate();
    let mut raw = Vec::with_capacity(2 * KEY_LEN);
    raw.extend_from_slice(keypair.public());
    raw.extend_from_slice(keypair.secret());
    std::fs::write(identities_dir(config_dir).join(name), &raw)?;
    std::fs::write(users_dir(config_dir).join(format!("{name}.pub")), keypair.public())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_keypair_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        create_keypair("alice", dir.path()).unwrap();

        let identity = load_identity("alice", dir.path()).unwrap();
        let public_only = load_user_public_key("alice", dir.path()).unwrap();
        assert_eq!(identity.public(), &public_only);
    }

    #[test]
    fn load_or_generate_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_generate_server_keypair(dir.path()).unwrap();
        let second = load_or_generate_server_keypair(dir.path()).unwrap();
        assert_eq!(first.public(), second.public());
        assert_eq!(first.secret(), second.secret());
    }

    #[test]
    fn wrong_size_file_is_invalid_key_file_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(identities_dir(dir.path())).unwrap();
        std::fs::write(identities_dir(dir.path()).join("bob"), b"too short").unwrap();
        let err = load_identity("bob", dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKeyFile { .. }));
    }
}
