//! Per-user "last submitted URL" store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::UserId;

/// Maps a user to the most recent URL they sent.
///
/// `put` overwrites unconditionally (last write wins); `get` leaves the entry
/// in place. Entries for different users are independent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, user: UserId, url: String);
    async fn get(&self, user: UserId) -> Option<String>;
}

/// Process-lifetime store behind a single `RwLock`.
///
/// Entries never expire; the map grows with the number of distinct users seen
/// since startup.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    urls: RwLock<HashMap<UserId, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, user: UserId, url: String) {
        self.urls.write().await.insert(user, url);
    }

    async fn get(&self, user: UserId) -> Option<String> {
        self.urls.read().await.get(&user).cloned()
    }
}
