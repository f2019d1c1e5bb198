use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::attempt::{AttemptId, FinalOutcome, TriggerKind};
use super::config::SaveConfig;
use super::orchestrator::{Command, SaveOrchestrator, SaveRequest};
use super::request::PersistRequest;
use super::storage::{PersistClient, PersistError};
use super::tracker::ModificationOrigin;
use crate::document::{DocumentEngine, SerializationError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session for {0} is already closed")]
    Closed(String),
    #[error("document {0} is already open")]
    AlreadyOpen(String),
    #[error("session worker for {doc_key} stopped abnormally: {message}")]
    Worker { doc_key: String, message: String },
}

/// Inbound notifications. Client events and worker feedback are each processed
/// in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Modified(ModificationOrigin),
    Save(SaveRequest),
    Autosave,
    Disconnect,
    Serialized {
        attempt: AttemptId,
        result: Result<Bytes, SerializationError>,
    },
    UploadFinished {
        attempt: AttemptId,
        result: Result<(), PersistError>,
    },
    RetryDue {
        attempt: AttemptId,
        retry: u32,
    },
}

/// What the session owner hears about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionReport {
    PersistFinal {
        doc_key: String,
        attempt: AttemptId,
        trigger: TriggerKind,
        outcome: FinalOutcome,
    },
    Closed {
        doc_key: String,
        data_loss: bool,
    },
}

impl SessionReport {
    pub fn doc_key(&self) -> &str {
        match self {
            SessionReport::PersistFinal { doc_key, .. } | SessionReport::Closed { doc_key, .. } => {
                doc_key
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub doc_key: String,
    pub data_loss: bool,
    pub attempts: u64,
    pub last_persisted_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    doc_key: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn doc_key(&self) -> &str {
        &self.doc_key
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn modified(&self, origin: ModificationOrigin) -> Result<(), SessionError> {
        self.send(SessionEvent::Modified(origin))
    }

    pub fn save(&self, request: SaveRequest) -> Result<(), SessionError> {
        self.send(SessionEvent::Save(request))
    }

    pub fn autosave(&self) -> Result<(), SessionError> {
        self.send(SessionEvent::Autosave)
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionEvent::Disconnect)
    }

    fn send(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.tx
            .send(event)
            .map_err(|_| SessionError::Closed(self.doc_key.clone()))
    }
}

/// Starts the single worker that owns all save state of one document.
pub fn spawn_session<E, P>(
    doc_key: impl Into<String>,
    engine: Arc<E>,
    client: Arc<P>,
    config: &SaveConfig,
    reports: mpsc::UnboundedSender<SessionReport>,
) -> (SessionHandle, JoinHandle<SessionSummary>)
where
    E: DocumentEngine,
    P: PersistClient,
{
    let doc_key = doc_key.into();
    // Handles own the only senders of the inbox, so it closes once they are all dropped.
    let (tx, rx) = mpsc::unbounded_channel();
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
    let worker = SessionWorker {
        orch: SaveOrchestrator::new(doc_key.clone(), config.retry_policy()),
        engine,
        client,
        upload_timeout: config.upload_timeout,
        events: feedback_tx,
        reports,
    };
    let ticker = config.autosave_interval.map(autosave_ticker);
    let join = tokio::spawn(worker.run(rx, feedback_rx, ticker));
    (SessionHandle { doc_key, tx }, join)
}

fn autosave_ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn next_client_event(
    inbox: &mut Option<mpsc::UnboundedReceiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match inbox {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct SessionWorker<E, P> {
    orch: SaveOrchestrator,
    engine: Arc<E>,
    client: Arc<P>,
    upload_timeout: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
    reports: mpsc::UnboundedSender<SessionReport>,
}

impl<E, P> SessionWorker<E, P>
where
    E: DocumentEngine,
    P: PersistClient,
{
    async fn run(
        mut self,
        rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut feedback: mpsc::UnboundedReceiver<SessionEvent>,
        mut ticker: Option<Interval>,
    ) -> SessionSummary {
        info!(doc_key = %self.orch.doc_key(), "session started");
        let mut inbox = Some(rx);
        loop {
            let event = tokio::select! {
                event = next_client_event(&mut inbox) => match event {
                    Some(event) => event,
                    None => {
                        inbox = None;
                        warn!(doc_key = %self.orch.doc_key(), "all handles dropped, disconnecting");
                        SessionEvent::Disconnect
                    }
                },
                Some(event) = feedback.recv() => event,
                _ = next_tick(&mut ticker) => SessionEvent::Autosave,
            };
            if let Some(data_loss) = self.handle(event) {
                return self.summary(data_loss);
            }
        }
    }

    /// Returns the teardown verdict once the session is finished.
    fn handle(&mut self, event: SessionEvent) -> Option<bool> {
        debug!(doc_key = %self.orch.doc_key(), ?event, "session event");
        let commands = match event {
            SessionEvent::Modified(origin) => self.orch.on_modified(origin),
            SessionEvent::Save(request) => self.orch.on_save_requested(request),
            SessionEvent::Autosave => self.orch.on_autosave_tick(),
            SessionEvent::Disconnect => self.orch.on_disconnect(),
            SessionEvent::Serialized { attempt, result } => self.orch.on_serialized(attempt, result),
            SessionEvent::UploadFinished { attempt, result } => {
                self.orch.on_upload_finished(attempt, result)
            }
            SessionEvent::RetryDue { attempt, retry } => self.orch.on_retry_due(attempt, retry),
        };

        let mut verdict = None;
        for command in commands {
            match command {
                Command::Serialize { attempt } => self.serialize(attempt),
                Command::Upload(request) => self.upload(request),
                Command::ScheduleRetry {
                    attempt,
                    retry,
                    delay,
                } => self.schedule_retry(attempt, retry, delay),
                Command::Report {
                    attempt,
                    trigger,
                    outcome,
                } => self.report(SessionReport::PersistFinal {
                    doc_key: self.orch.doc_key().to_string(),
                    attempt,
                    trigger,
                    outcome,
                }),
                Command::Teardown { data_loss } => {
                    self.report(SessionReport::Closed {
                        doc_key: self.orch.doc_key().to_string(),
                        data_loss,
                    });
                    verdict = Some(data_loss);
                }
            }
        }
        verdict
    }

    fn serialize(&self, attempt: AttemptId) {
        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result =
                match tokio::task::spawn_blocking(move || engine.serialize_current_content()).await
                {
                    Ok(result) => result,
                    Err(err) => Err(SerializationError(err.to_string())),
                };
            let _ = events.send(SessionEvent::Serialized { attempt, result });
        });
    }

    fn upload(&self, request: PersistRequest) {
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let ceiling = self.upload_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(ceiling, client.persist(&request)).await {
                Ok(result) => result,
                Err(_) => Err(PersistError::Timeout(ceiling)),
            };
            let _ = events.send(SessionEvent::UploadFinished {
                attempt: request.attempt,
                result,
            });
        });
    }

    fn schedule_retry(&self, attempt: AttemptId, retry: u32, delay: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::RetryDue { attempt, retry });
        });
    }

    fn report(&self, report: SessionReport) {
        if self.reports.send(report).is_err() {
            debug!(doc_key = %self.orch.doc_key(), "session owner stopped listening");
        }
    }

    fn summary(&self, data_loss: bool) -> SessionSummary {
        SessionSummary {
            doc_key: self.orch.doc_key().to_string(),
            data_loss,
            attempts: self.orch.attempts_started(),
            last_persisted_at: self.orch.tracker().last_persisted_at(),
        }
    }
}
