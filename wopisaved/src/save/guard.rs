use thiserror::Error;
use time::OffsetDateTime;

use super::attempt::{AttemptId, AttemptOutcome, FinalOutcome, TriggerKind, UploadAttempt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    InFlight,
    InFlightWithPendingFollowup,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("upload {0} is already in flight")]
    Busy(AttemptId),
    #[error("no upload is in flight")]
    NotInFlight,
    #[error("attempt {got} does not match in-flight attempt {expected}")]
    Mismatch { expected: AttemptId, got: AttemptId },
}

/// Result of settling the in-flight attempt.
#[derive(Debug, Clone)]
pub struct Settled {
    pub attempt: UploadAttempt,
    /// Another cycle is owed because something arrived while in flight.
    pub followup: bool,
}

/// At most one live upload per document.
#[derive(Debug, Default)]
pub struct UploadGuard {
    current: Option<UploadAttempt>,
    followup: bool,
    next_id: u64,
}

impl UploadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GuardState {
        match (&self.current, self.followup) {
            (None, _) => GuardState::Idle,
            (Some(_), false) => GuardState::InFlight,
            (Some(_), true) => GuardState::InFlightWithPendingFollowup,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<&UploadAttempt> {
        self.current.as_ref()
    }

    pub fn attempts_started(&self) -> u64 {
        self.next_id
    }

    pub fn has_pending_followup(&self) -> bool {
        self.current.is_some() && self.followup
    }

    pub fn request_upload(
        &mut self,
        trigger: TriggerKind,
        was_dirty: bool,
        now: OffsetDateTime,
    ) -> Result<AttemptId, GuardError> {
        if let Some(current) = &self.current {
            return Err(GuardError::Busy(current.id));
        }
        self.next_id = self.next_id.saturating_add(1);
        let id = AttemptId(self.next_id);
        self.current = Some(UploadAttempt {
            id,
            trigger,
            started_at: now,
            was_dirty,
            outcome: AttemptOutcome::Pending,
        });
        self.followup = false;
        Ok(id)
    }

    /// Records that another cycle is owed once the current attempt finishes.
    /// Returns false when nothing is in flight.
    pub fn note_followup(&mut self) -> bool {
        if self.current.is_none() {
            return false;
        }
        self.followup = true;
        true
    }

    pub fn finish(&mut self, id: AttemptId, outcome: FinalOutcome) -> Result<Settled, GuardError> {
        let expected = self.current.as_ref().ok_or(GuardError::NotInFlight)?.id;
        if expected != id {
            return Err(GuardError::Mismatch { expected, got: id });
        }
        let mut attempt = self.current.take().ok_or(GuardError::NotInFlight)?;
        attempt.outcome = AttemptOutcome::Finished(outcome);
        let followup = std::mem::take(&mut self.followup);
        Ok(Settled { attempt, followup })
    }
}
