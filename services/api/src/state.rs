//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the database pool, the agent client and the
//! registry of live relay sessions.

use crate::{config::Config, db::Db, ws::provider::LiveInput};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;
use voxrelay_core::{
    approval::PendingApproval,
    config::RelayConfig,
    converse::ConverseClient,
    correction::{CorrectionStore, Corrector},
};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// `None` when running without a database.
    pub db: Option<Arc<Db>>,
    pub converse_client: Arc<dyn ConverseClient>,
    pub corrector: Arc<dyn Corrector>,
    pub corrections: Arc<dyn CorrectionStore>,
    pub relay_config: Arc<RelayConfig>,
    pub system_prompt: Arc<String>,
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
}

/// How the REST layer reaches a running relay session.
#[derive(Clone)]
pub struct LiveSessionEntry {
    pub control: mpsc::Sender<LiveInput>,
    pub approval: watch::Receiver<Option<PendingApproval>>,
    pub started_at: DateTime<Utc>,
}

/// Relay sessions with an open voice connection, keyed by browser session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, LiveSessionEntry>>,
}

impl SessionRegistry {
    pub async fn register(&self, id: Uuid, entry: LiveSessionEntry) {
        self.sessions.write().await.insert(id, entry);
    }

    pub async fn deregister(&self, id: Uuid) {
        self.sessions.write().await.remove(&id);
    }

    pub async fn get(&self, id: Uuid) -> Option<LiveSessionEntry> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// All entries, oldest first.
    pub async fn list(&self) -> Vec<(Uuid, LiveSessionEntry)> {
        let mut entries: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by_key(|(_, entry)| entry.started_at);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(started_at: DateTime<Utc>) -> (LiveSessionEntry, mpsc::Receiver<LiveInput>) {
        let (control, rx) = mpsc::channel(1);
        let (_tx, approval) = watch::channel(None);
        (
            LiveSessionEntry {
                control,
                approval,
                started_at,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = SessionRegistry::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let now = Utc::now();

        let (later, _rx1) = entry(now);
        let (earlier, _rx2) = entry(now - chrono::Duration::seconds(5));
        registry.register(first, later).await;
        registry.register(second, earlier).await;

        let ids: Vec<Uuid> = registry.list().await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![second, first]);
        assert!(registry.get(first).await.is_some());

        registry.deregister(first).await;
        assert!(registry.get(first).await.is_none());
        assert_eq!(registry.list().await.len(), 1);
    }
}
