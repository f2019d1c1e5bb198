use bytes::Bytes;
use wopi_core::{ExtendedData, PutFileRequest};

use super::attempt::{AttemptId, TriggerKind};
use super::tracker::SnapshotMark;

/// Immutable value handed to the storage client for one send.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub doc_key: String,
    pub attempt: AttemptId,
    pub trigger: TriggerKind,
    /// 0 for the first send of an attempt.
    pub retry: u32,
    pub content: Bytes,
    pub is_autosave: bool,
    pub is_modified_by_user: bool,
    pub is_exit_save: bool,
    pub extended_data: ExtendedData,
}

pub fn build_persist_request(
    doc_key: &str,
    attempt: AttemptId,
    trigger: TriggerKind,
    mark: SnapshotMark,
    content: Bytes,
    extended_data: &ExtendedData,
) -> PersistRequest {
    PersistRequest {
        doc_key: doc_key.to_string(),
        attempt,
        trigger,
        retry: 0,
        content,
        is_autosave: trigger == TriggerKind::Autosave,
        is_modified_by_user: mark.user_modified,
        is_exit_save: trigger == TriggerKind::ForcedOnClose,
        extended_data: extended_data.clone(),
    }
}

/// Request for a resend of the same snapshot.
///
/// Retries carry the storage flags coarsened: the user-modified attribution
/// of the first send is dropped. Content is untouched.
pub fn retry_request(request: &PersistRequest, retry: u32) -> PersistRequest {
    PersistRequest {
        retry,
        is_modified_by_user: false,
        ..request.clone()
    }
}

impl From<&PersistRequest> for PutFileRequest {
    fn from(request: &PersistRequest) -> Self {
        PutFileRequest {
            body: request.content.clone(),
            is_autosave: request.is_autosave,
            is_modified_by_user: request.is_modified_by_user,
            is_exit_save: request.is_exit_save,
            extended_data: request.extended_data.clone(),
        }
    }
}
