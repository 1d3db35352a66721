//! Session manager implementation

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use rx_core::keys::fingerprint;
use rx_core::time::current_time_millis;
use rx_core::TrustedKeySet;
use rx_protocol::{SessionId, SessionToken, VerifyingKey};

/// An authenticated session
pub struct Session {
    /// Session ID
    pub id: SessionId,
    /// Symmetric key shared with the client
    pub token: SessionToken,
    /// Public key that established the session
    pub identity: VerifyingKey,
    /// Creation time (ms since epoch)
    pub created_at: u64,
    /// Last authenticated request (ms since epoch)
    last_used: AtomicU64,
}

impl Session {
    fn new(id: SessionId, identity: VerifyingKey) -> Self {
        let now = current_time_millis();
        Self {
            id,
            token: SessionToken::generate(),
            identity,
            created_at: now,
            last_used: AtomicU64::new(now),
        }
    }

    /// Record use of the session
    pub fn touch(&self) {
        self.last_used.store(current_time_millis(), Ordering::Relaxed);
    }

    /// Time of the last authenticated request (ms since epoch)
    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Short fingerprint of the session identity
    pub fn identity_fingerprint(&self) -> String {
        fingerprint(&self.identity)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity_fingerprint())
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used())
            .finish_non_exhaustive()
    }
}

/// Manages all active sessions
pub struct SessionManager {
    /// Sessions indexed by session ID
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Next session ID to allocate
    next_id: AtomicU32,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Create a session for an identity that has already been verified.
    ///
    /// Ids never take the value 0 and never reuse the id of a live session,
    /// including after the counter wraps.
    pub fn create(&self, identity: VerifyingKey) -> Arc<Session> {
        loop {
            let id = SessionId::new(self.allocate_id());
            if let Entry::Vacant(slot) = self.sessions.entry(id) {
                let session = Arc::new(Session::new(id, identity));
                slot.insert(Arc::clone(&session));
                return session;
            }
        }
    }

    fn allocate_id(&self) -> u32 {
        let step = |n: u32| Some(n.checked_add(1).unwrap_or(1));
        match self.next_id.fetch_update(Ordering::SeqCst, Ordering::SeqCst, step) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| Arc::clone(&r))
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    /// Remove sessions whose identity is not in `trusted`
    pub fn remove_untrusted(&self, trusted: &TrustedKeySet) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            let keep = trusted.is_trusted(&session.identity);
            if !keep {
                tracing::info!(
                    "Revoking session {} of {}",
                    id,
                    session.identity_fingerprint()
                );
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Remove sessions last used before `cutoff` (ms since epoch)
    pub fn remove_idle(&self, cutoff: u64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.last_used() >= cutoff);
        before.saturating_sub(self.sessions.len())
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
