use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    UserSave,
    Autosave,
    ForcedOnClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalOutcome {
    Succeeded,
    ExhaustedRetries,
    SerializationFailed,
}

impl FinalOutcome {
    pub fn is_success(self) -> bool {
        self == FinalOutcome::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Finished(FinalOutcome),
}

#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub id: AttemptId,
    pub trigger: TriggerKind,
    pub started_at: OffsetDateTime,
    /// Dirty state observed when the attempt was admitted.
    pub was_dirty: bool,
    pub outcome: AttemptOutcome,
}
