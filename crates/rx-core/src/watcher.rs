//! Hot reload of the trusted keys file
//!
//! The parent directory is watched rather than the file itself so that
//! editors which save by renaming over the original still trigger a reload.
//! Bursts of events are collapsed into a single reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::KeyError;
use crate::trust::{TrustStore, TrustedKeySet};

/// Quiet period before a burst of file events triggers a reload
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

/// Reload the trusted keys file into `store`.
///
/// On failure the store keeps its current set and the error is returned.
pub fn reload_now(path: &Path, store: &TrustStore) -> Result<usize, KeyError> {
    match TrustedKeySet::load_from_file(path) {
        Ok(set) => {
            let count = set.len();
            store.replace(set);
            tracing::info!("Reloaded trusted keys from {:?} ({} keys)", path, count);
            Ok(count)
        }
        Err(e) => {
            tracing::warn!("Keeping previous trusted keys, reload failed: {}", e);
            Err(e)
        }
    }
}

/// Running watcher for a trusted keys file.
///
/// Watching stops when this handle is dropped.
pub struct TrustWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for TrustWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `path` and reload `store` whenever it changes.
///
/// Must be called from within a Tokio runtime.
pub fn watch_trusted_keys(path: &Path, store: TrustStore) -> Result<TrustWatcher, KeyError> {
    let path = path.to_path_buf();
    let watch_err = |reason: String| KeyError::Watch {
        path: path.clone(),
        reason,
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| watch_err("path has no file name".to_string()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (event_tx, mut event_rx) = mpsc::channel::<()>(16);
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if relevant {
                    let _ = event_tx.try_send(());
                }
            }
            Err(err) => {
                tracing::error!(%err, "Trusted keys watcher error");
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| watch_err(e.to_string()))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| watch_err(e.to_string()))?;

    tracing::info!("Watching trusted keys file {:?}", path);
    let task = tokio::spawn(async move {
        while event_rx.recv().await.is_some() {
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            while event_rx.try_recv().is_ok() {}

            let path = path.clone();
            let store = store.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || reload_now(&path, &store)).await {
                tracing::error!("Trusted keys reload task failed: {}", e);
            }
        }
        tracing::debug!("Trusted keys watcher stopped");
    });

    Ok(TrustWatcher {
        _watcher: watcher,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use tempfile::TempDir;

    fn write_keys(path: &Path, keys: &[&KeyPair]) {
        let body: String = keys
            .iter()
            .map(|k| format!("{}\n", k.public_key_hex()))
            .collect();
        std::fs::write(path, body).unwrap();
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..50 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[test]
    fn test_reload_now_keeps_previous_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("allowed_keys");
        let alice = KeyPair::generate();
        write_keys(&path, &[&alice]);

        let store = TrustStore::new(TrustedKeySet::load_from_file(&path).unwrap());
        std::fs::write(&path, "garbage\n").unwrap();

        assert!(reload_now(&path, &store).is_err());
        assert!(store.is_trusted(&alice.public_key()));
    }

    #[test]
    fn test_reload_now_accepts_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("allowed_keys");
        let alice = KeyPair::generate();
        write_keys(&path, &[&alice]);

        let store = TrustStore::new(TrustedKeySet::load_from_file(&path).unwrap());
        std::fs::write(&path, "").unwrap();

        assert_eq!(reload_now(&path, &store).unwrap(), 0);
        assert!(!store.is_trusted(&alice.public_key()));
    }

    #[tokio::test]
    async fn test_watcher_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("allowed_keys");
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        write_keys(&path, &[&alice]);

        let store = TrustStore::new(TrustedKeySet::load_from_file(&path).unwrap());
        let _watcher = watch_trusted_keys(&path, store.clone()).unwrap();

        write_keys(&path, &[&bob]);

        let bob_key = bob.public_key();
        assert!(wait_until(|| store.is_trusted(&bob_key)).await);
        assert!(!store.is_trusted(&alice.public_key()));
    }

    #[tokio::test]
    async fn test_watcher_ignores_malformed_update() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("allowed_keys");
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        write_keys(&path, &[&alice]);

        let store = TrustStore::new(TrustedKeySet::load_from_file(&path).unwrap());
        let _watcher = watch_trusted_keys(&path, store.clone()).unwrap();

        std::fs::write(&path, "this is not a key\n").unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(store.is_trusted(&alice.public_key()));

        // A later valid edit still applies
        write_keys(&path, &[&bob]);
        let bob_key = bob.public_key();
        assert!(wait_until(|| store.is_trusted(&bob_key)).await);
    }

    #[tokio::test]
    async fn test_watch_missing_directory_fails() {
        let store = TrustStore::new(TrustedKeySet::new());
        let result = watch_trusted_keys(Path::new("/no/such/dir/allowed_keys"), store);
        assert!(matches!(result, Err(KeyError::Watch { .. })));
    }
}
