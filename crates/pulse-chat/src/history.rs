use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use pulse_core::session::ChatSession;

use crate::session::SessionHandle;

/// In-memory list of chat sessions, newest first.
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    sessions: Arc<RwLock<Vec<Arc<SessionHandle>>>>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session and put it at the top of the list.
    pub async fn create(&self) -> Arc<SessionHandle> {
        self.insert(ChatSession::new()).await
    }

    pub async fn insert(&self, session: ChatSession) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(session));
        let mut sessions = self.sessions.write().await;
        sessions.insert(0, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;
        sessions.iter().find(|h| h.id() == id).cloned()
    }

    /// Overwrite the stored session with the same id. Returns `false` if unknown.
    pub async fn update(&self, session: ChatSession) -> bool {
        match self.get(session.id).await {
            Some(handle) => {
                handle.replace(session);
                true
            }
            None => false,
        }
    }

    pub async fn delete(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().await;
        let index = sessions.iter().position(|h| h.id() == id)?;
        Some(sessions.remove(index))
    }

    pub async fn list(&self) -> Vec<ChatSession> {
        let sessions = self.sessions.read().await;
        sessions.iter().map(|h| h.snapshot()).collect()
    }

    /// Sessions whose title or any message contains `query`, ignoring case.
    /// An empty query returns everything.
    pub async fn search(&self, query: &str) -> Vec<ChatSession> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|h| h.read(|s| s.matches(query)))
            .map(|h| h.snapshot())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::message::ChatMessage;

    #[tokio::test]
    async fn create_puts_newest_first() {
        let history = SessionHistory::new();
        let first = history.create().await;
        let second = history.create().await;

        let list = history.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second.id());
        assert_eq!(list[1].id, first.id());
    }

    #[tokio::test]
    async fn get_returns_shared_handle() {
        let history = SessionHistory::new();
        let handle = history.create().await;
        handle.push_message(ChatMessage::user("hello"));

        let fetched = history.get(handle.id()).await.unwrap();
        assert_eq!(fetched.snapshot().messages.len(), 1);
        assert!(history.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn update_replaces_known_session() {
        let history = SessionHistory::new();
        let handle = history.create().await;
        let mut session = handle.snapshot();
        session.title = "Sleep trends".into();

        assert!(history.update(session).await);
        assert_eq!(handle.snapshot().title, "Sleep trends");
        assert!(!history.update(ChatSession::new()).await);
    }

    #[tokio::test]
    async fn delete_session() {
        let history = SessionHistory::new();
        let handle = history.create().await;
        assert!(history.delete(handle.id()).await.is_some());
        assert!(history.delete(handle.id()).await.is_none());
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn search_titles_and_messages() {
        let history = SessionHistory::new();
        history
            .insert(ChatSession::new().with_title("Heart rate"))
            .await;
        let steps = history.create().await;
        steps.push_message(ChatMessage::user("How many STEPS did I take?"));
        history.create().await;

        assert_eq!(history.search("heart").await.len(), 1);
        assert_eq!(history.search("steps").await[0].id, steps.id());
        assert_eq!(history.search("").await.len(), 3);
        assert!(history.search("glucose").await.is_empty());
        assert_eq!(history.len().await, 3);
    }
}
