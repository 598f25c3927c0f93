//! Group membership resolution.
//!
//! Membership lives in an external directory service; this module defines the
//! collaborator interface, a static config-backed implementation for
//! development and tests, and a short-TTL caching decorator used by multicast
//! resolution so the directory is not hit once per connected user on every
//! notification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Group {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("group lookup failed: {0}")]
    Lookup(String),
}

/// External directory service returning a user's group memberships.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn groups_for_user(&self, user_id: &str) -> Result<Vec<Group>, DirectoryError>;
}

/// Config-backed directory with a fixed user -> groups mapping.
pub struct StaticGroupDirectory {
    memberships: HashMap<String, Vec<String>>,
}

impl StaticGroupDirectory {
    pub fn new(memberships: HashMap<String, Vec<String>>) -> Self {
        Self { memberships }
    }
}

#[async_trait]
impl GroupDirectory for StaticGroupDirectory {
    async fn groups_for_user(&self, user_id: &str) -> Result<Vec<Group>, DirectoryError> {
        Ok(self
            .memberships
            .get(user_id)
            .map(|ids| ids.iter().map(Group::new).collect())
            .unwrap_or_default())
    }
}

struct CacheEntry {
    fetched_at: Instant,
    groups: Vec<Group>,
}

/// TTL cache in front of any [`GroupDirectory`].
///
/// Successful lookups are served from cache for at most `ttl`; lookup errors
/// are never cached, so a recovering directory is retried immediately.
pub struct CachedGroupDirectory {
    inner: Arc<dyn GroupDirectory>,
    ttl: Duration,
    cache: DashMap<String, CacheEntry>,
}

impl CachedGroupDirectory {
    pub fn new(inner: Arc<dyn GroupDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: DashMap::new(),
        }
    }

    pub fn invalidate(&self, user_id: &str) {
        self.cache.remove(user_id);
    }
}

#[async_trait]
impl GroupDirectory for CachedGroupDirectory {
    async fn groups_for_user(&self, user_id: &str) -> Result<Vec<Group>, DirectoryError> {
        if let Some(entry) = self.cache.get(user_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.groups.clone());
            }
        }

        let groups = self.inner.groups_for_user(user_id).await?;
        self.cache.insert(
            user_id.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                groups: groups.clone(),
            },
        );
        Ok(groups)
    }
}
