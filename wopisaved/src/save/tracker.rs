use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationOrigin {
    User,
    Internal,
}

/// What the content snapshot of an attempt is known to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMark {
    pub revision: u64,
    pub user_modified: bool,
}

/// Dirty state of one document relative to its last successful persist.
///
/// Every modification bumps a revision counter; a persist only cleans the
/// revisions its snapshot covered, so an edit made while an upload is in
/// flight keeps the document dirty no matter how that upload ends.
#[derive(Debug, Clone, Default)]
pub struct ModificationTracker {
    revision: u64,
    persisted_revision: u64,
    user_revision: Option<u64>,
    last_origin: Option<ModificationOrigin>,
    last_persisted_at: Option<OffsetDateTime>,
}

impl ModificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_modified(&mut self, origin: ModificationOrigin) {
        self.revision = self.revision.saturating_add(1);
        if origin == ModificationOrigin::User {
            self.user_revision = Some(self.revision);
        }
        self.last_origin = Some(origin);
    }

    pub fn is_dirty(&self) -> bool {
        self.revision > self.persisted_revision
    }

    /// True when at least one pending revision came from a user edit.
    pub fn is_user_modified(&self) -> bool {
        self.user_revision
            .is_some_and(|revision| revision > self.persisted_revision)
    }

    pub fn mark(&self) -> SnapshotMark {
        SnapshotMark {
            revision: self.revision,
            user_modified: self.is_user_modified(),
        }
    }

    /// Records a successful persist of a snapshot taken at `mark`. Returns
    /// whether the document is clean afterwards.
    pub fn on_persist_succeeded(&mut self, mark: SnapshotMark, at: OffsetDateTime) -> bool {
        self.persisted_revision = self.persisted_revision.max(mark.revision);
        self.last_persisted_at = Some(at);
        !self.is_dirty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_origin(&self) -> Option<ModificationOrigin> {
        self.last_origin
    }

    pub fn last_persisted_at(&self) -> Option<OffsetDateTime> {
        self.last_persisted_at
    }
}
