use std::time::SystemTime;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::headers::{
    ExtendedData, HEADER_EXTENDED_DATA, HEADER_IS_AUTOSAVE, HEADER_IS_EXIT_SAVE,
    HEADER_IS_MODIFIED_BY_USER, HEADER_OVERRIDE,
};

#[derive(Debug, Error)]
pub enum WopiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("WOPISrc cannot carry path segments: {0}")]
    InvalidWopiSrc(String),
    #[error("no access token for {0}")]
    MissingAccessToken(String),
    #[error("wopi host returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after_secs: Option<u64>,
    },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    Conflict,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct WopiClient {
    http: Client,
    wopi_src: Url,
    access_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct PutFileRequest {
    pub body: Bytes,
    pub is_autosave: bool,
    pub is_modified_by_user: bool,
    pub is_exit_save: bool,
    pub extended_data: ExtendedData,
}

impl WopiClient {
    pub fn new(wopi_src: &str, access_token: impl Into<String>) -> Result<Self, WopiError> {
        let mut wopi_src = Url::parse(wopi_src)?;
        if wopi_src.cannot_be_a_base() {
            return Err(WopiError::InvalidWopiSrc(wopi_src.to_string()));
        }
        wopi_src.set_query(None);
        wopi_src.set_fragment(None);
        Ok(Self {
            http: Client::new(),
            wopi_src,
            access_token: access_token.into(),
        })
    }

    /// Builds a client from a full `load url=` value. The token embedded in the
    /// query wins over `fallback_token`.
    pub fn from_load_url(url: &str, fallback_token: Option<&str>) -> Result<Self, WopiError> {
        let parsed = Url::parse(url)?;
        let token = parsed
            .query_pairs()
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned())
            .or_else(|| fallback_token.map(str::to_string))
            .ok_or_else(|| WopiError::MissingAccessToken(url.to_string()))?;
        Self::new(url, token)
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn wopi_src(&self) -> &Url {
        &self.wopi_src
    }

    /// Stable key for the document behind this endpoint (the WOPISrc path).
    pub fn document_key(&self) -> String {
        self.wopi_src.path().to_string()
    }

    pub async fn check_file_info(&self) -> Result<CheckFileInfo, WopiError> {
        let url = self.endpoint(None)?;
        let response = self.http.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn get_file(&self) -> Result<Bytes, WopiError> {
        let url = self.endpoint(Some("contents"))?;
        let response = self.http.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?)
    }

    pub async fn put_file(&self, request: &PutFileRequest) -> Result<PutFileResponse, WopiError> {
        let url = self.endpoint(Some("contents"))?;
        let mut builder = self
            .http
            .post(url)
            .header(HEADER_OVERRIDE, "PUT")
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(HEADER_IS_AUTOSAVE, bool_header(request.is_autosave))
            .header(
                HEADER_IS_MODIFIED_BY_USER,
                bool_header(request.is_modified_by_user),
            )
            .header(HEADER_IS_EXIT_SAVE, bool_header(request.is_exit_save));
        if !request.extended_data.is_empty() {
            builder = builder.header(HEADER_EXTENDED_DATA, request.extended_data.to_header_value());
        }
        let response = builder.body(request.body.clone()).send().await?;
        let response = Self::ensure_success(response).await?;
        let body = response.bytes().await?;
        Ok(parse_put_file_response(&body))
    }

    fn endpoint(&self, suffix: Option<&str>) -> Result<Url, WopiError> {
        let mut url = self.wopi_src.clone();
        if let Some(suffix) = suffix {
            url.path_segments_mut()
                .map_err(|_| WopiError::InvalidWopiSrc(self.wopi_src.to_string()))?
                .pop_if_empty()
                .push(suffix);
        }
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token);
        Ok(url)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, WopiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let retry_after_secs = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(WopiError::Api {
            status,
            body,
            retry_after_secs,
        })
    }
}

impl WopiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            WopiError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            WopiError::Api { .. } => matches!(
                self.classification(),
                Some(ApiErrorClass::Conflict | ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
            WopiError::Request(err) => !err.is_builder() && !err.is_decode(),
            _ => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            WopiError::Api {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::CONFLICT {
        ApiErrorClass::Conflict
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .map(|left| left.as_secs())
            .unwrap_or(0),
    )
}

fn bool_header(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

// The status already decided success; hosts may answer with plain text.
fn parse_put_file_response(body: &[u8]) -> PutFileResponse {
    if body.iter().all(u8::is_ascii_whitespace) {
        return PutFileResponse::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|err| {
        tracing::debug!(bytes = body.len(), "ignoring non-JSON PutFile body: {err}");
        PutFileResponse::default()
    })
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckFileInfo {
    pub base_file_name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub user_can_write: bool,
    #[serde(default)]
    pub last_modified_time: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PutFileResponse {
    #[serde(default)]
    pub last_modified_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::CONFLICT),
            ApiErrorClass::Conflict
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn permanent_api_errors_are_not_retryable() {
        let err = WopiError::Api {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
            retry_after_secs: None,
        };
        assert!(!err.is_retryable());

        let err = WopiError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
            retry_after_secs: Some(3),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_secs(), Some(3));
    }

    #[test]
    fn retry_after_accepts_seconds_and_past_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(7));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(0));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn put_file_body_is_optional_json() {
        assert_eq!(parse_put_file_response(b""), PutFileResponse::default());
        assert_eq!(parse_put_file_response(b"OK"), PutFileResponse::default());
        assert_eq!(
            parse_put_file_response(br#"{"LastModifiedTime":"2024-01-01T00:00:01.000Z"}"#)
                .last_modified_time
                .as_deref(),
            Some("2024-01-01T00:00:01.000Z")
        );
    }

    #[test]
    fn load_url_token_and_query_are_split() {
        let client = WopiClient::from_load_url(
            "http://127.0.0.1:9980/wopi/files/doc.odt?access_token=abc",
            Some("fallback"),
        )
        .unwrap();
        assert_eq!(client.access_token, "abc");
        assert_eq!(client.wopi_src().query(), None);
        assert_eq!(client.document_key(), "/wopi/files/doc.odt");
    }

    #[test]
    fn load_url_without_token_uses_fallback_or_fails() {
        let client =
            WopiClient::from_load_url("http://host/wopi/files/a", Some("fallback")).unwrap();
        assert_eq!(client.access_token, "fallback");

        let err = WopiClient::from_load_url("http://host/wopi/files/a", None)
            .err()
            .unwrap();
        assert!(matches!(err, WopiError::MissingAccessToken(_)));
    }

    #[test]
    fn contents_endpoint_appends_segment_and_token() {
        let client = WopiClient::new("http://host/wopi/files/doc.odt", "t 1").unwrap();
        let url = client.endpoint(Some("contents")).unwrap();
        assert_eq!(url.path(), "/wopi/files/doc.odt/contents");
        assert_eq!(url.query(), Some("access_token=t+1"));
    }
}
