use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Role, Session, SessionId};
use crate::error::{flatten_errs, Result};

/// SessionRegistry tracks every answered session that has not been torn down.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionRegistry::default())
    }

    pub(crate) async fn insert(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id(), session);
    }

    pub(crate) async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&id)
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().await;
        sessions.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn count_by_role(&self, role: Role) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|s| s.role() == role).count()
    }

    /// close_all tears down every registered session.
    pub async fn close_all(&self) -> Result<()> {
        let sessions: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock().await;
            sessions.values().cloned().collect()
        };

        let mut errs = vec![];
        for session in sessions {
            if let Err(err) = session.close().await {
                errs.push(err);
            }
        }

        flatten_errs(errs)
    }
}
