use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Anti-forgery state tokens correlate an authorization request with its
/// callback and expire after this long.
const STATE_TTL: Duration = Duration::from_secs(5 * 60);
const STATE_TOKEN_LEN: usize = 32;

/// Single-use, time-bounded OAuth state tokens.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Generates and records a fresh state token.
    async fn issue(&self) -> Result<String, StoreError>;

    /// Atomic check-and-delete. True exactly once per issued token; false for
    /// anything empty, unknown, expired, or already consumed.
    async fn validate_and_consume(&self, state: &str) -> Result<bool, StoreError>;
}

/// In-memory implementation. Consumption holds the write lock for the whole
/// check-and-delete, so concurrent validations of the same token see at most
/// one success.
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::with_ttl(STATE_TTL)
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Best-effort removal of expired entries; consumption already treats
    /// them as invalid, this just bounds memory.
    pub async fn sweep_expired(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);

        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!("swept {} expired OAuth state tokens", swept);
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn issue(&self) -> Result<String, StoreError> {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_TOKEN_LEN)
            .map(char::from)
            .collect();

        self.entries
            .write()
            .await
            .insert(token.clone(), Instant::now() + self.ttl);
        Ok(token)
    }

    async fn validate_and_consume(&self, state: &str) -> Result<bool, StoreError> {
        if state.is_empty() {
            return Ok(false);
        }

        // remove-then-check under one write lock: the anti-replay contract
        let removed = self.entries.write().await.remove(state);
        Ok(matches!(removed, Some(expires_at) if expires_at > Instant::now()))
    }
}
