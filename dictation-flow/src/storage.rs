use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    client::Services,
    config::SessionConfig,
    error::{Result, SessionError},
    session::SessionController,
};

/// A session controller shared between requests. The mutex serializes access;
/// hosts use `try_lock` to reject overlapping calls instead of queueing them.
pub type SharedSession = Arc<Mutex<SessionController>>;

/// Trait for storing and retrieving live sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: SessionController) -> Result<SharedSession>;
    async fn get(&self, id: &str) -> Result<Option<SharedSession>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage. Sessions live until deleted or
/// until the process exits.
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, SharedSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: SessionController) -> Result<SharedSession> {
        let id = session.id().to_string();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.insert(id, shared.clone());
        Ok(shared)
    }

    async fn get(&self, id: &str) -> Result<Option<SharedSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))
    }
}

/// Create a session with a fresh v4 id and store it.
pub async fn create_session(
    storage: &dyn SessionStorage,
    services: Services,
    config: SessionConfig,
) -> Result<SharedSession> {
    let controller = SessionController::new(Uuid::new_v4().to_string(), services, config);
    storage.save(controller).await
}
