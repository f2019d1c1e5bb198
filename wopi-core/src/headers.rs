use thiserror::Error;

pub const HEADER_OVERRIDE: &str = "X-WOPI-Override";
pub const HEADER_IS_AUTOSAVE: &str = "X-LOOL-WOPI-IsAutosave";
pub const HEADER_IS_MODIFIED_BY_USER: &str = "X-LOOL-WOPI-IsModifiedByUser";
pub const HEADER_IS_EXIT_SAVE: &str = "X-LOOL-WOPI-IsExitSave";
pub const HEADER_EXTENDED_DATA: &str = "X-LOOL-WOPI-ExtendedData";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtendedDataError {
    #[error("extended data is not valid percent-encoded utf-8")]
    Encoding,
    #[error("extended data entry is missing '=': {0}")]
    MissingSeparator(String),
    #[error("extended data entry has an empty key")]
    EmptyKey,
}

/// Ordered `key=value` metadata forwarded to the storage host with an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedData {
    entries: Vec<(String, String)>,
}

impl ExtendedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the argument of a client `save` command, where the whole list
    /// was percent-encoded once: `CustomFlag%3DCustom%20Value%3BOther%3D1`.
    pub fn from_command_arg(raw: &str) -> Result<Self, ExtendedDataError> {
        let decoded = urlencoding::decode(raw).map_err(|_| ExtendedDataError::Encoding)?;
        let mut data = Self::new();
        for entry in decoded.split(';').filter(|entry| !entry.is_empty()) {
            let (key, value) = split_entry(entry)?;
            data.insert(key, value);
        }
        Ok(data)
    }

    /// Parses the header form produced by [`ExtendedData::to_header_value`],
    /// where each key and value is percent-encoded separately.
    pub fn from_header_value(value: &str) -> Result<Self, ExtendedDataError> {
        let mut data = Self::new();
        for entry in value.split(';').filter(|entry| !entry.is_empty()) {
            let (key, value) = split_entry(entry)?;
            let key = urlencoding::decode(key).map_err(|_| ExtendedDataError::Encoding)?;
            let value = urlencoding::decode(value).map_err(|_| ExtendedDataError::Encoding)?;
            data.insert(key.into_owned(), value.into_owned());
        }
        Ok(data)
    }

    pub fn to_header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn split_entry(entry: &str) -> Result<(&str, &str), ExtendedDataError> {
    let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| ExtendedDataError::MissingSeparator(entry.to_string()))?;
    if key.trim().is_empty() {
        return Err(ExtendedDataError::EmptyKey);
    }
    Ok((key, value))
}
