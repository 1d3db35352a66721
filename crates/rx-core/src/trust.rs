//! Trusted public keys
//!
//! The trusted keys file holds one hex-encoded Ed25519 public key per line.
//! Blank lines and lines starting with `#` are skipped; anything after the
//! key on the same line is kept as a comment.
//!
//! The live set is published through a [`TrustStore`]: readers take an
//! `Arc` snapshot, reloads swap in a complete new set.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use tokio::sync::watch;

use rx_protocol::parse_public_key_hex;

use crate::error::KeyError;
use crate::keys::fingerprint;

/// A trusted public key
#[derive(Debug, Clone)]
pub struct TrustedKey {
    /// The verifying key
    pub key: VerifyingKey,
    /// Key fingerprint
    pub fingerprint: String,
    /// Key comment (if any)
    pub comment: Option<String>,
}

/// Immutable set of public keys allowed to establish sessions
#[derive(Debug, Clone, Default)]
pub struct TrustedKeySet {
    keys: HashMap<[u8; 32], TrustedKey>,
}

impl TrustedKeySet {
    /// Create a new empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from keys without comments
    pub fn from_keys(keys: impl IntoIterator<Item = VerifyingKey>) -> Self {
        let mut set = Self::new();
        for key in keys {
            set.insert(key, None);
        }
        set
    }

    /// Load the trusted keys file.
    ///
    /// Fails if the file is missing or any key line is malformed. A file with
    /// no keys yields an empty set.
    pub fn load_from_file(path: &Path) -> Result<Self, KeyError> {
        let content = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut set = Self::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key_text, comment) = split_line(line);
            let key = parse_public_key_hex(key_text).map_err(|e| KeyError::InvalidTrustedKey {
                path: path.to_path_buf(),
                line: index + 1,
                reason: e.to_string(),
            })?;

            tracing::debug!(
                "Trusted key: {} ({})",
                fingerprint(&key),
                comment.as_deref().unwrap_or("no comment")
            );
            set.insert(key, comment);
        }

        tracing::info!("Loaded {} trusted keys from {:?}", set.len(), path);
        Ok(set)
    }

    /// Add a key to the set
    pub fn insert(&mut self, key: VerifyingKey, comment: Option<String>) {
        self.keys.insert(
            key.to_bytes(),
            TrustedKey {
                key,
                fingerprint: fingerprint(&key),
                comment,
            },
        );
    }

    /// Check if a key is trusted
    pub fn is_trusted(&self, key: &VerifyingKey) -> bool {
        self.keys.contains_key(key.as_bytes())
    }

    /// Get the number of trusted keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if there are no trusted keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over the trusted keys
    pub fn iter(&self) -> impl Iterator<Item = &TrustedKey> {
        self.keys.values()
    }
}

/// Load the trusted keys file at `path`
pub fn load_trusted_keys(path: &Path) -> Result<TrustedKeySet, KeyError> {
    TrustedKeySet::load_from_file(path)
}

/// Split `<hex> [comment...]`
fn split_line(line: &str) -> (&str, Option<String>) {
    match line.split_once(char::is_whitespace) {
        Some((key, rest)) => {
            let rest = rest.trim();
            (key, (!rest.is_empty()).then(|| rest.to_string()))
        }
        None => (line, None),
    }
}

/// Shared handle to the live trusted key set.
///
/// Cloning the store shares the same underlying set.
#[derive(Clone)]
pub struct TrustStore {
    tx: Arc<watch::Sender<Arc<TrustedKeySet>>>,
}

impl TrustStore {
    /// Create a store holding `initial`
    pub fn new(initial: TrustedKeySet) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current set
    pub fn current(&self) -> Arc<TrustedKeySet> {
        Arc::clone(&self.tx.borrow())
    }

    /// Check a key against the current snapshot
    pub fn is_trusted(&self, key: &VerifyingKey) -> bool {
        self.current().is_trusted(key)
    }

    /// Atomically replace the live set
    pub fn replace(&self, set: TrustedKeySet) {
        if set.is_empty() {
            tracing::warn!("Trusted key set is now empty - new sessions will be refused");
        }
        self.tx.send_replace(Arc::new(set));
    }

    /// Receive a notification whenever the set is replaced
    pub fn subscribe(&self) -> watch::Receiver<Arc<TrustedKeySet>> {
        self.tx.subscribe()
    }
}
