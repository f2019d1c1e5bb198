use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use wopi_core::ExtendedData;

use super::attempt::{AttemptId, FinalOutcome, TriggerKind};
use super::backoff::RetryPolicy;
use super::disconnect::{CloseState, DisconnectAction, DisconnectHandler};
use super::guard::{GuardState, UploadGuard};
use super::request::{PersistRequest, build_persist_request, retry_request};
use super::storage::PersistError;
use super::tracker::{ModificationOrigin, ModificationTracker, SnapshotMark};
use crate::document::SerializationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Waiting for the engine to hand over a content snapshot.
    Saving,
    /// Snapshot sent (or waiting to be resent) to storage.
    Uploading,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveRequest {
    pub dont_save_if_unmodified: bool,
    pub extended_data: ExtendedData,
}

/// Side effects the session worker must carry out, in order.
#[derive(Debug, Clone)]
pub enum Command {
    Serialize {
        attempt: AttemptId,
    },
    Upload(PersistRequest),
    ScheduleRetry {
        attempt: AttemptId,
        retry: u32,
        delay: Duration,
    },
    Report {
        attempt: AttemptId,
        trigger: TriggerKind,
        outcome: FinalOutcome,
    },
    Teardown {
        data_loss: bool,
    },
}

#[derive(Debug)]
struct Cycle {
    attempt: AttemptId,
    trigger: TriggerKind,
    mark: SnapshotMark,
    extended_data: ExtendedData,
    request: Option<PersistRequest>,
    retries: u32,
}

/// Per-document save state machine. It performs no I/O: every input returns
/// the commands to execute, and outcomes come back as further inputs.
#[derive(Debug)]
pub struct SaveOrchestrator {
    doc_key: String,
    phase: Phase,
    tracker: ModificationTracker,
    guard: UploadGuard,
    disconnect: DisconnectHandler,
    policy: RetryPolicy,
    cycle: Option<Cycle>,
    pending_save: Option<SaveRequest>,
}

impl SaveOrchestrator {
    pub fn new(doc_key: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            doc_key: doc_key.into(),
            phase: Phase::Idle,
            tracker: ModificationTracker::new(),
            guard: UploadGuard::new(),
            disconnect: DisconnectHandler::default(),
            policy,
            cycle: None,
            pending_save: None,
        }
    }

    pub fn doc_key(&self) -> &str {
        &self.doc_key
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tracker(&self) -> &ModificationTracker {
        &self.tracker
    }

    pub fn guard_state(&self) -> GuardState {
        self.guard.state()
    }

    pub fn close_state(&self) -> CloseState {
        self.disconnect.state()
    }

    pub fn attempts_started(&self) -> u64 {
        self.guard.attempts_started()
    }

    pub fn on_modified(&mut self, origin: ModificationOrigin) -> Vec<Command> {
        if self.phase == Phase::Closed {
            warn!(doc_key = %self.doc_key, "modification after teardown ignored");
            return Vec::new();
        }
        self.tracker.on_modified(origin);
        if self.guard.note_followup() {
            debug!(doc_key = %self.doc_key, "modified during upload, follow-up owed");
        }
        Vec::new()
    }

    pub fn on_save_requested(&mut self, request: SaveRequest) -> Vec<Command> {
        if !self.disconnect.is_open() {
            debug!(doc_key = %self.doc_key, "save request after disconnect ignored");
            return Vec::new();
        }
        if self.phase != Phase::Idle {
            self.guard.note_followup();
            self.pending_save = Some(request);
            debug!(doc_key = %self.doc_key, phase = ?self.phase, "save deferred behind in-flight upload");
            return Vec::new();
        }
        if request.dont_save_if_unmodified && !self.tracker.is_dirty() {
            info!(doc_key = %self.doc_key, "document unmodified, save skipped");
            return Vec::new();
        }
        self.start_cycle(TriggerKind::UserSave, request.extended_data)
    }

    pub fn on_autosave_tick(&mut self) -> Vec<Command> {
        if self.phase != Phase::Idle || !self.disconnect.is_open() || !self.tracker.is_dirty() {
            return Vec::new();
        }
        self.start_cycle(TriggerKind::Autosave, ExtendedData::new())
    }

    pub fn on_serialized(
        &mut self,
        attempt: AttemptId,
        result: Result<Bytes, SerializationError>,
    ) -> Vec<Command> {
        if self.phase != Phase::Saving {
            warn!(doc_key = %self.doc_key, %attempt, phase = ?self.phase, "unexpected serialization result");
            return Vec::new();
        }
        let Some(cycle) = self.cycle.as_mut().filter(|cycle| cycle.attempt == attempt) else {
            warn!(doc_key = %self.doc_key, %attempt, "serialization result for unknown attempt");
            return Vec::new();
        };
        match result {
            Ok(content) => {
                let request = build_persist_request(
                    &self.doc_key,
                    attempt,
                    cycle.trigger,
                    cycle.mark,
                    content,
                    &cycle.extended_data,
                );
                cycle.request = Some(request.clone());
                self.phase = Phase::Uploading;
                info!(
                    doc_key = %self.doc_key,
                    %attempt,
                    trigger = ?request.trigger,
                    bytes = request.content.len(),
                    autosave = request.is_autosave,
                    modified_by_user = request.is_modified_by_user,
                    "uploading"
                );
                vec![Command::Upload(request)]
            }
            Err(err) => {
                error!(doc_key = %self.doc_key, %attempt, "serialization failed: {err}");
                self.settle(FinalOutcome::SerializationFailed)
            }
        }
    }

    pub fn on_upload_finished(
        &mut self,
        attempt: AttemptId,
        result: Result<(), PersistError>,
    ) -> Vec<Command> {
        if self.phase != Phase::Uploading {
            warn!(doc_key = %self.doc_key, %attempt, phase = ?self.phase, "unexpected upload result");
            return Vec::new();
        }
        let Some(cycle) = self.cycle.as_mut().filter(|cycle| cycle.attempt == attempt) else {
            warn!(doc_key = %self.doc_key, %attempt, "upload result for unknown attempt");
            return Vec::new();
        };
        match result {
            Ok(()) => {
                let mark = cycle.mark;
                let clean = self
                    .tracker
                    .on_persist_succeeded(mark, OffsetDateTime::now_utc());
                info!(doc_key = %self.doc_key, %attempt, clean, "upload succeeded");
                self.settle(FinalOutcome::Succeeded)
            }
            Err(err) if err.is_retryable() && self.policy.allows(cycle.retries) => {
                cycle.retries += 1;
                let retry = cycle.retries;
                let delay = self.policy.delay_for(retry, err.retry_after());
                warn!(
                    doc_key = %self.doc_key,
                    %attempt,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    "upload failed, retrying: {err}"
                );
                vec![Command::ScheduleRetry {
                    attempt,
                    retry,
                    delay,
                }]
            }
            Err(err) => {
                error!(
                    doc_key = %self.doc_key,
                    %attempt,
                    retries = cycle.retries,
                    "upload failed permanently: {err}"
                );
                self.settle(FinalOutcome::ExhaustedRetries)
            }
        }
    }

    pub fn on_retry_due(&mut self, attempt: AttemptId, retry: u32) -> Vec<Command> {
        if self.phase != Phase::Uploading {
            return Vec::new();
        }
        let Some(cycle) = self
            .cycle
            .as_ref()
            .filter(|cycle| cycle.attempt == attempt && cycle.retries == retry)
        else {
            debug!(doc_key = %self.doc_key, %attempt, retry, "stale retry timer");
            return Vec::new();
        };
        match &cycle.request {
            Some(first) => vec![Command::Upload(retry_request(first, retry))],
            None => Vec::new(),
        }
    }

    pub fn on_disconnect(&mut self) -> Vec<Command> {
        info!(doc_key = %self.doc_key, phase = ?self.phase, dirty = self.tracker.is_dirty(), "connection closed");
        let action = self.disconnect.on_disconnect(&mut self.guard, &self.tracker);
        self.apply_disconnect(action)
    }

    fn apply_disconnect(&mut self, action: DisconnectAction) -> Vec<Command> {
        match action {
            DisconnectAction::Wait => Vec::new(),
            DisconnectAction::ForceSave => {
                let commands = self.start_cycle(TriggerKind::ForcedOnClose, ExtendedData::new());
                if let Some(cycle) = &self.cycle {
                    self.disconnect.forced_started(cycle.attempt);
                }
                commands
            }
            DisconnectAction::Teardown { data_loss } => {
                self.phase = Phase::Closed;
                self.pending_save = None;
                if data_loss {
                    error!(doc_key = %self.doc_key, "tearing down with unsaved modifications");
                } else {
                    info!(doc_key = %self.doc_key, "tearing down cleanly");
                }
                vec![Command::Teardown { data_loss }]
            }
        }
    }

    fn start_cycle(&mut self, trigger: TriggerKind, extended_data: ExtendedData) -> Vec<Command> {
        let was_dirty = self.tracker.is_dirty();
        let attempt =
            match self
                .guard
                .request_upload(trigger, was_dirty, OffsetDateTime::now_utc())
            {
                Ok(attempt) => attempt,
                Err(err) => {
                    error!(doc_key = %self.doc_key, "cannot start save: {err}");
                    return Vec::new();
                }
            };
        self.cycle = Some(Cycle {
            attempt,
            trigger,
            mark: self.tracker.mark(),
            extended_data,
            request: None,
            retries: 0,
        });
        self.phase = Phase::Saving;
        info!(doc_key = %self.doc_key, %attempt, ?trigger, was_dirty, "save started");
        vec![Command::Serialize { attempt }]
    }

    fn settle(&mut self, outcome: FinalOutcome) -> Vec<Command> {
        let Some(cycle) = self.cycle.take() else {
            return Vec::new();
        };
        let settled = match self.guard.finish(cycle.attempt, outcome) {
            Ok(settled) => settled,
            Err(err) => {
                error!(doc_key = %self.doc_key, "cannot settle attempt: {err}");
                return Vec::new();
            }
        };
        self.phase = Phase::Idle;
        let mut commands = vec![Command::Report {
            attempt: cycle.attempt,
            trigger: cycle.trigger,
            outcome,
        }];

        if !self.disconnect.is_open() {
            let action = self.disconnect.after_settle(&settled, &self.tracker);
            commands.extend(self.apply_disconnect(action));
        } else if settled.followup {
            commands.extend(self.start_followup());
        }
        commands
    }

    fn start_followup(&mut self) -> Vec<Command> {
        match self.pending_save.take() {
            Some(request) if request.dont_save_if_unmodified && !self.tracker.is_dirty() => {
                info!(doc_key = %self.doc_key, "deferred save skipped, document unmodified");
                Vec::new()
            }
            Some(request) => self.start_cycle(TriggerKind::UserSave, request.extended_data),
            None if self.tracker.is_dirty() => {
                self.start_cycle(TriggerKind::Autosave, ExtendedData::new())
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
