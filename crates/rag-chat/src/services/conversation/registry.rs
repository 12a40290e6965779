use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::chain::ChainStrategy;
use super::providers::LlmProvider;
use super::session::ConversationSession;
use crate::logging::ActivityLogger;
use crate::models::chat::SessionId;
use crate::utils::error::ChatResult;

pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// Concurrent set of independent sessions.
///
/// Each session sits behind its own async mutex, so one slow `invoke`
/// never blocks another session.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SharedSession>>,
    backend: Arc<dyn LlmProvider>,
    logger: ActivityLogger,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn LlmProvider>, logger: ActivityLogger) -> Self {
        info!("Initializing session registry");
        Self {
            sessions: Arc::new(DashMap::new()),
            backend,
            logger,
        }
    }

    /// Start a session on the shared backend and register it.
    pub fn create(&self, strategy: ChainStrategy) -> ChatResult<(SessionId, SharedSession)> {
        let session =
            ConversationSession::with_backend(self.backend.clone(), strategy, self.logger.clone())?;
        let id = session.id();
        Ok((id, self.insert(session)))
    }

    pub fn insert(&self, session: ConversationSession) -> SharedSession {
        let id = session.id();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.insert(id, shared.clone());
        debug!("Registered session {} ({} active)", id, self.sessions.len());
        shared
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Unregister without releasing resources.
    pub fn remove(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Unregister and destroy. Returns `false` for unknown ids.
    pub async fn destroy(&self, id: SessionId) -> ChatResult<bool> {
        let Some(session) = self.remove(id) else {
            warn!("Destroy requested for unknown session {}", id);
            return Ok(false);
        };
        session.lock().await.destroy().await?;
        Ok(true)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::providers::MockLlmProvider;

    fn registry() -> SessionRegistry {
        let mut backend = MockLlmProvider::new();
        backend
            .expect_generate()
            .returning(|messages| Ok(format!("seen {}", messages.len())));
        SessionRegistry::new(Arc::new(backend), ActivityLogger::inline())
    }

    #[tokio::test]
    async fn test_sessions_keep_separate_histories() {
        let registry = registry();
        let (a, session_a) = registry.create(ChainStrategy::plain()).unwrap();
        let (b, session_b) = registry.create(ChainStrategy::plain()).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        let (ra, rb) = tokio::join!(
            async { session_a.lock().await.invoke("first").await },
            async { session_b.lock().await.invoke("second").await },
        );
        ra.unwrap();
        rb.unwrap();

        session_a.lock().await.invoke("third").await.unwrap();
        assert_eq!(session_a.lock().await.history().len(), 4);
        assert_eq!(session_b.lock().await.history().len(), 2);
    }

    #[tokio::test]
    async fn test_get_remove_destroy() {
        let registry = registry();
        let (id, _) = registry.create(ChainStrategy::plain()).unwrap();
        assert!(registry.get(id).is_some());
        assert_eq!(registry.ids(), vec![id]);

        assert!(registry.destroy(id).await.unwrap());
        assert!(registry.get(id).is_none());
        assert!(!registry.destroy(id).await.unwrap());
        assert!(registry.is_empty());
    }
}
