use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Registry of live credentials. A session entry exists if and only if its
/// credential is still considered valid; absence means revoked or expired and
/// the gates treat both identically.
///
/// Every method returns `Result` so a remote backend's outage propagates as a
/// dependency error instead of being mistaken for "not authenticated".
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Records identifier → user with the given TTL and appends the
    /// identifier to the user's reverse index. One logical write.
    async fn register(&self, jti: &str, user_id: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Existence check only; does not resolve the user.
    async fn is_active(&self, jti: &str) -> Result<bool, StoreError>;

    /// The user bound to a still-live session, or None if revoked/expired.
    async fn resolve_user(&self, jti: &str) -> Result<Option<i64>, StoreError>;

    /// Deletes every session in the user's reverse index, then the index
    /// itself. Entries whose session already expired are skipped silently.
    async fn revoke_all(&self, user_id: i64) -> Result<(), StoreError>;
}

struct SessionEntry {
    user_id: i64,
    expires_at: Instant,
}

#[derive(Default)]
struct RegistryInner {
    /// Primary entries, the equivalent of `session:<jti>` keys.
    sessions: HashMap<String, SessionEntry>,
    /// Reverse index, the equivalent of `user:<id>:sessions` sets. Enables
    /// bulk revocation without scanning every session.
    by_user: HashMap<i64, HashSet<String>>,
}

/// In-memory session registry. All reads are live (no caching of session
/// validity anywhere else in the process), so a revocation is observed by
/// every request that starts after it completes.
#[derive(Default)]
pub struct InMemorySessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired primary entries and prunes them from the reverse index.
    /// Best-effort housekeeping; reads already ignore expired entries.
    pub async fn sweep_expired(&self) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        let expired: Vec<(String, i64)> = inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(jti, entry)| (jti.clone(), entry.user_id))
            .collect();

        for (jti, user_id) in &expired {
            inner.sessions.remove(jti);
            if let Some(set) = inner.by_user.get_mut(user_id) {
                set.remove(jti);
                if set.is_empty() {
                    inner.by_user.remove(user_id);
                }
            }
        }

        if !expired.is_empty() {
            tracing::debug!("swept {} expired sessions", expired.len());
        }
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn register(&self, jti: &str, user_id: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(
            jti.to_string(),
            SessionEntry {
                user_id,
                expires_at: Instant::now() + ttl,
            },
        );
        inner
            .by_user
            .entry(user_id)
            .or_default()
            .insert(jti.to_string());
        Ok(())
    }

    async fn is_active(&self, jti: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(matches!(
            inner.sessions.get(jti),
            Some(entry) if entry.expires_at > Instant::now()
        ))
    }

    async fn resolve_user(&self, jti: &str) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(jti)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.user_id))
    }

    async fn revoke_all(&self, user_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(jtis) = inner.by_user.remove(&user_id) {
            // removing an already-expired entry is a no-op, not an error
            for jti in &jtis {
                inner.sessions.remove(jti);
            }
            tracing::info!("revoked {} session(s) for user {}", jtis.len(), user_id);
        }
        Ok(())
    }
}
