use serde::Serialize;
use std::time::Duration;

pub type FetchId = u64;

/// Caller-facing description of a request before an id has been assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub follow_redirects: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { method: None, headers: Vec::new(), body: None, timeout: None, follow_redirects: true }
    }
}

/// A request owned by exactly one worker for its whole lifetime.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub id: FetchId,
    pub url: reqwest::Url,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub follow_redirects: bool,
}

impl FetchRequest {
    pub fn new(id: FetchId, url: reqwest::Url, options: FetchOptions) -> Self {
        Self {
            id,
            url,
            method: options.method.unwrap_or_else(|| "GET".to_string()),
            headers: options.headers,
            body: options.body,
            timeout: options.timeout,
            follow_redirects: options.follow_redirects,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Response body, base64-encoded for transport into the script.
    #[serde(rename = "body")]
    pub body_base64: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Response(FetchResponse),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub id: FetchId,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    pub fn error(id: FetchId, message: impl Into<String>) -> Self {
        Self { id, outcome: FetchOutcome::Error(message.into()) }
    }

    pub fn response(&self) -> Option<&FetchResponse> {
        match &self.outcome {
            FetchOutcome::Response(response) => Some(response),
            FetchOutcome::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Response(_) => None,
            FetchOutcome::Error(message) => Some(message),
        }
    }
}
