use super::attempt::{AttemptId, AttemptOutcome, FinalOutcome};
use super::guard::{Settled, UploadGuard};
use super::tracker::ModificationTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseState {
    #[default]
    Open,
    /// Connection is gone; waiting for outstanding work before teardown.
    Draining { forced: Option<AttemptId> },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    Wait,
    ForceSave,
    Teardown { data_loss: bool },
}

/// Decides what an abrupt close means for the upload state. It never cancels
/// an in-flight attempt; it only changes what happens once that attempt settles.
#[derive(Debug, Default)]
pub struct DisconnectHandler {
    state: CloseState,
}

impl DisconnectHandler {
    pub fn state(&self) -> CloseState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CloseState::Open
    }

    pub fn on_disconnect(
        &mut self,
        guard: &mut UploadGuard,
        tracker: &ModificationTracker,
    ) -> DisconnectAction {
        if self.state != CloseState::Open {
            return DisconnectAction::Wait;
        }
        self.state = CloseState::Draining { forced: None };
        if guard.note_followup() {
            return DisconnectAction::Wait;
        }
        if tracker.is_dirty() {
            DisconnectAction::ForceSave
        } else {
            self.teardown(false)
        }
    }

    pub fn forced_started(&mut self, attempt: AttemptId) {
        if let CloseState::Draining { forced } = &mut self.state {
            *forced = Some(attempt);
        }
    }

    pub fn after_settle(
        &mut self,
        settled: &Settled,
        tracker: &ModificationTracker,
    ) -> DisconnectAction {
        let CloseState::Draining { forced } = self.state else {
            return DisconnectAction::Wait;
        };
        if !tracker.is_dirty() {
            return self.teardown(false);
        }
        match forced {
            // The attempt that was in flight at disconnect time has settled.
            None => DisconnectAction::ForceSave,
            // Edits landed while the forced upload was running; keep going
            // as long as uploads succeed.
            Some(id)
                if id == settled.attempt.id
                    && settled.followup
                    && settled.attempt.outcome == AttemptOutcome::Finished(FinalOutcome::Succeeded) =>
            {
                DisconnectAction::ForceSave
            }
            Some(_) => self.teardown(true),
        }
    }

    fn teardown(&mut self, data_loss: bool) -> DisconnectAction {
        self.state = CloseState::Closed;
        DisconnectAction::Teardown { data_loss }
    }
}
