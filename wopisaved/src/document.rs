use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("document could not be serialized: {0}")]
pub struct SerializationError(pub String);

/// The live document the coordinator persists.
pub trait DocumentEngine: Send + Sync + 'static {
    /// Produces an owned snapshot; later edits must not alter it.
    fn serialize_current_content(&self) -> Result<Bytes, SerializationError>;
}

/// Document content edited through key input.
///
/// Loaded bytes are kept as they are, whatever their encoding. Typed
/// characters are appended in UTF-8.
#[derive(Debug, Default)]
pub struct TextDocument {
    content: Mutex<Vec<u8>>,
}

impl TextDocument {
    pub fn new(initial: impl Into<String>) -> Self {
        Self::from_bytes(initial.into().as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            content: Mutex::new(bytes.to_vec()),
        }
    }

    /// Applies one `key type=input` event. Returns whether the document changed.
    pub fn apply_input(&self, char_code: u32, key_code: u32) -> bool {
        let mut content = self.content.lock().unwrap_or_else(PoisonError::into_inner);
        match (char_code, key_code) {
            (0, KEY_BACKSPACE) => pop_char(&mut content),
            (0, KEY_ENTER) | (13, _) => {
                content.push(b'\n');
                true
            }
            (0, _) => false,
            (code, _) => match char::from_u32(code) {
                Some(ch) => {
                    let mut buf = [0; 4];
                    content.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    true
                }
                None => false,
            },
        }
    }

    /// Lossy text view, for display only.
    pub fn text(&self) -> String {
        let content = self.content.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&content).into_owned()
    }
}

const KEY_BACKSPACE: u32 = 1283;
const KEY_ENTER: u32 = 1280;

// Removes the trailing UTF-8 character, or a single byte when the tail is not UTF-8.
fn pop_char(content: &mut Vec<u8>) -> bool {
    let Some(last) = content.len().checked_sub(1) else {
        return false;
    };
    let start = (last.saturating_sub(3)..=last)
        .find(|&start| {
            std::str::from_utf8(&content[start..]).is_ok_and(|tail| tail.chars().count() == 1)
        })
        .unwrap_or(last);
    content.truncate(start);
    true
}

impl DocumentEngine for TextDocument {
    fn serialize_current_content(&self) -> Result<Bytes, SerializationError> {
        let content = self.content.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Bytes::copy_from_slice(&content))
    }
}
