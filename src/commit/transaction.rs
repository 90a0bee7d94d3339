use crate::document::driver::Session;
use crate::error::Result;
use crate::node::DatabaseNode;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One logical transaction spanning every physical store a write touches.
///
/// Sessions start lazily, one per store, the first time a node on that store is written.
/// A scope belongs to a single outer call and is not shared between concurrent writers.
pub struct TxnScope {
    /// Store id -> session with an open transaction.
    sessions: Mutex<HashMap<String, Arc<dyn Session>>>,
}

impl TxnScope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Session bound to `node`'s store, starting it and its transaction on first use.
    pub async fn session_for(&self, node: &DatabaseNode) -> Result<Arc<dyn Session>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(node.store_id()) {
            return Ok(session.clone());
        }
        let session = node.start_session().await?;
        session.start_transaction().await?;
        tracing::trace!("Started transaction {} on {}", session.id(), node.store_id());
        sessions.insert(node.store_id().to_string(), session.clone());
        Ok(session)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Commits every session. After the first failure the remaining ones are aborted and the
    /// failure is returned.
    pub async fn commit(&self) -> Result<()> {
        let sessions: Vec<Arc<dyn Session>> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        let mut failure = None;
        for session in sessions {
            if failure.is_some() {
                if let Err(e) = session.abort_transaction().await {
                    tracing::warn!("Abort of {} failed: {}", session.id(), e);
                }
                continue;
            }
            if let Err(e) = session.commit_transaction().await {
                failure = Some(e);
            }
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub async fn abort(&self) {
        let sessions: Vec<Arc<dyn Session>> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            if let Err(e) = session.abort_transaction().await {
                tracing::warn!("Abort of {} failed: {}", session.id(), e);
            }
        }
    }
}

/// The scope's session for `node`, or none when writing outside a transaction.
pub(crate) async fn session_in(
    scope: Option<&TxnScope>,
    node: &DatabaseNode,
) -> Result<Option<Arc<dyn Session>>> {
    match scope {
        Some(scope) => Ok(Some(scope.session_for(node).await?)),
        None => Ok(None),
    }
}
