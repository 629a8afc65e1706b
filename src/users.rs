use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// A local user record, created on first OAuth login for a
/// (provider, provider_user_id) pair. `onboarding_step` of 0 means onboarding
/// is complete; anything above 0 is the step currently in progress.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub provider: String,
    pub provider_user_id: String,
    pub onboarding_step: i32,
}

/// The profile submitted during onboarding. Field validation is deliberately
/// loose here; the auth core only cares that submission flips the onboarding
/// step to 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub nickname: Option<String>,
    pub occupation: Option<String>,
    pub allergens: Vec<String>,
    pub dietary_preferences: Vec<String>,
}

/// Lookup/create of local users keyed by their OAuth identity.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Idempotent: a second login from the same (provider, provider_user_id)
    /// pair returns the same user, never inserts a duplicate.
    async fn find_or_create(
        &self,
        provider: &str,
        provider_user_id: &str,
        email: &str,
    ) -> Result<UserRecord, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError>;

    async fn save_profile(&self, user_id: i64, profile: UserProfile)
        -> Result<UserProfile, StoreError>;

    /// The profile previously saved for the user, if any.
    async fn find_profile(&self, user_id: i64) -> Result<Option<UserProfile>, StoreError>;

    /// Marks onboarding complete (step 0). No-op for unknown users.
    async fn complete_onboarding(&self, user_id: i64) -> Result<(), StoreError>;
}

/// The admin allow-list. Checked once at login (to embed the role claim) and
/// again live on every admin route.
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    async fn is_admin(&self, user_id: i64) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct DirectoryInner {
    next_id: i64,
    by_id: HashMap<i64, UserRecord>,
    by_provider: HashMap<(String, String), i64>,
    profiles: HashMap<i64, UserProfile>,
}

/// In-memory user directory. Swap for a database-backed implementation via
/// the `UserDirectory` trait without touching the auth core.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    inner: RwLock<DirectoryInner>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_or_create(
        &self,
        provider: &str,
        provider_user_id: &str,
        email: &str,
    ) -> Result<UserRecord, StoreError> {
        let mut inner = self.inner.write().await;

        let key = (provider.to_string(), provider_user_id.to_string());
        if let Some(id) = inner.by_provider.get(&key) {
            // existing identity keeps its stored onboarding step
            return Ok(inner.by_id[id].clone());
        }

        inner.next_id += 1;
        let user = UserRecord {
            id: inner.next_id,
            email: email.to_string(),
            provider: provider.to_string(),
            provider_user_id: provider_user_id.to_string(),
            onboarding_step: 1,
        };
        inner.by_provider.insert(key, user.id);
        inner.by_id.insert(user.id, user.clone());

        tracing::info!(
            "created user {} for {}:{}",
            user.id,
            provider,
            provider_user_id
        );
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn save_profile(
        &self,
        user_id: i64,
        profile: UserProfile,
    ) -> Result<UserProfile, StoreError> {
        let mut inner = self.inner.write().await;
        inner.profiles.insert(user_id, profile.clone());
        Ok(profile)
    }

    async fn find_profile(&self, user_id: i64) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.inner.read().await.profiles.get(&user_id).cloned())
    }

    async fn complete_onboarding(&self, user_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.by_id.get_mut(&user_id) {
            user.onboarding_step = 0;
        }
        Ok(())
    }
}

/// Allow-list loaded once at startup from configuration.
pub struct StaticAdminDirectory {
    admins: HashSet<i64>,
}

impl StaticAdminDirectory {
    pub fn new(admins: impl IntoIterator<Item = i64>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AdminDirectory for StaticAdminDirectory {
    async fn is_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.admins.contains(&user_id))
    }
}
