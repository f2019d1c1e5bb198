use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::SaveConfig;
use super::session::{SessionError, SessionHandle, SessionReport, SessionSummary, spawn_session};
use super::storage::PersistClient;
use crate::document::DocumentEngine;

struct Entry {
    handle: SessionHandle,
    join: JoinHandle<SessionSummary>,
}

/// One session worker per document key.
pub struct SessionRegistry {
    config: SaveConfig,
    reports: mpsc::UnboundedSender<SessionReport>,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new(config: SaveConfig, reports: mpsc::UnboundedSender<SessionReport>) -> Self {
        Self {
            config,
            reports,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open<E, P>(
        &self,
        doc_key: &str,
        engine: Arc<E>,
        client: Arc<P>,
    ) -> Result<SessionHandle, SessionError>
    where
        E: DocumentEngine,
        P: PersistClient,
    {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(doc_key)
            .is_some_and(|entry| !entry.join.is_finished())
        {
            return Err(SessionError::AlreadyOpen(doc_key.to_string()));
        }
        let (handle, join) =
            spawn_session(doc_key, engine, client, &self.config, self.reports.clone());
        sessions.insert(
            doc_key.to_string(),
            Entry {
                handle: handle.clone(),
                join,
            },
        );
        info!(doc_key = %doc_key, "session registered");
        Ok(handle)
    }

    pub async fn get(&self, doc_key: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(doc_key)
            .filter(|entry| !entry.join.is_finished())
            .map(|entry| entry.handle.clone())
    }

    /// Number of sessions whose worker is still running.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|entry| !entry.join.is_finished())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops sessions that have already torn down.
    pub async fn reap_finished(&self) -> Vec<SessionSummary> {
        let finished: Vec<(String, Entry)> = {
            let mut sessions = self.sessions.lock().await;
            let keys: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.join.is_finished())
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| sessions.remove(&key).map(|entry| (key, entry)))
                .collect()
        };
        let mut summaries = Vec::with_capacity(finished.len());
        for (doc_key, entry) in finished {
            match join_summary(&doc_key, entry.join).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(doc_key = %doc_key, "{err}"),
            }
        }
        summaries
    }

    /// Disconnects one session and waits for its teardown.
    pub async fn close(&self, doc_key: &str) -> Result<SessionSummary, SessionError> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(doc_key)
            .ok_or_else(|| SessionError::Closed(doc_key.to_string()))?;
        request_disconnect(doc_key, &entry);
        join_summary(doc_key, entry.join).await
    }

    /// Disconnects every session and waits until all of them have torn down.
    pub async fn shutdown_all(&self) -> Vec<SessionSummary> {
        let entries: Vec<(String, Entry)> = self.sessions.lock().await.drain().collect();
        for (doc_key, entry) in &entries {
            request_disconnect(doc_key, entry);
        }
        let mut summaries = Vec::with_capacity(entries.len());
        for (doc_key, entry) in entries {
            match join_summary(&doc_key, entry.join).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(doc_key = %doc_key, "{err}"),
            }
        }
        summaries
    }
}

fn request_disconnect(doc_key: &str, entry: &Entry) {
    if entry.handle.disconnect().is_err() {
        info!(doc_key = %doc_key, "session had already torn down");
    }
}

async fn join_summary(
    doc_key: &str,
    join: JoinHandle<SessionSummary>,
) -> Result<SessionSummary, SessionError> {
    join.await.map_err(|err| SessionError::Worker {
        doc_key: doc_key.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::document::TextDocument;
    use crate::save::request::PersistRequest;
    use crate::save::storage::PersistError;
    use crate::save::tracker::ModificationOrigin;

    #[derive(Default)]
    struct CountingStore {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl PersistClient for CountingStore {
        async fn persist(&self, _request: &PersistRequest) -> Result<(), PersistError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry() -> (SessionRegistry, mpsc::UnboundedReceiver<SessionReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SaveConfig {
            autosave_interval: None,
            ..SaveConfig::default()
        };
        (SessionRegistry::new(config, tx), rx)
    }

    #[tokio::test]
    async fn refuses_second_session_for_same_document() {
        let (registry, _reports) = registry();
        let store = Arc::new(CountingStore::default());
        registry
            .open("/wopi/files/a", Arc::new(TextDocument::default()), Arc::clone(&store))
            .await
            .unwrap();

        let err = registry
            .open("/wopi/files/a", Arc::new(TextDocument::default()), store)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyOpen(key) if key == "/wopi/files/a"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closed_document_can_be_opened_again() {
        let (registry, _reports) = registry();
        let store = Arc::new(CountingStore::default());
        registry
            .open("/wopi/files/a", Arc::new(TextDocument::default()), Arc::clone(&store))
            .await
            .unwrap();

        let summary = registry.close("/wopi/files/a").await.unwrap();
        assert!(!summary.data_loss);
        assert_eq!(summary.attempts, 0);
        assert!(registry.get("/wopi/files/a").await.is_none());
        assert!(matches!(
            registry.close("/wopi/files/a").await,
            Err(SessionError::Closed(_))
        ));

        registry
            .open("/wopi/files/a", Arc::new(TextDocument::default()), store)
            .await
            .unwrap();
        assert!(registry.get("/wopi/files/a").await.is_some());
    }

    #[tokio::test]
    async fn shutdown_flushes_every_dirty_session() {
        let (registry, mut reports) = registry();
        let store = Arc::new(CountingStore::default());
        for key in ["/wopi/files/a", "/wopi/files/b"] {
            let handle = registry
                .open(key, Arc::new(TextDocument::new("x")), Arc::clone(&store))
                .await
                .unwrap();
            handle.modified(ModificationOrigin::User).unwrap();
        }
        registry
            .open("/wopi/files/clean", Arc::new(TextDocument::default()), Arc::clone(&store))
            .await
            .unwrap();

        let summaries = registry.shutdown_all().await;
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|summary| !summary.data_loss));
        assert_eq!(store.uploads.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty().await);

        let mut closed = 0;
        while let Ok(report) = reports.try_recv() {
            if matches!(report, SessionReport::Closed { .. }) {
                closed += 1;
            }
        }
        assert_eq!(closed, 3);
    }

    #[tokio::test]
    async fn shutdown_still_collects_sessions_that_already_tore_down() {
        let (registry, mut reports) = registry();
        let handle = registry
            .open(
                "/wopi/files/gone",
                Arc::new(TextDocument::default()),
                Arc::new(CountingStore::default()),
            )
            .await
            .unwrap();
        handle.disconnect().unwrap();
        tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        while !handle.is_closed() {
            tokio::task::yield_now().await;
        }

        let summaries = registry.shutdown_all().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].doc_key, "/wopi/files/gone");
        assert!(!summaries[0].data_loss);
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn torn_down_sessions_are_reaped() {
        let (registry, mut reports) = registry();
        let handle = registry
            .open(
                "/wopi/files/a",
                Arc::new(TextDocument::default()),
                Arc::new(CountingStore::default()),
            )
            .await
            .unwrap();
        handle.disconnect().unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report, SessionReport::Closed { data_loss: false, .. }));

        while !handle.is_closed() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reaped = registry.reap_finished().await;
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].doc_key, "/wopi/files/a");
        assert!(registry.is_empty().await);
    }
}
