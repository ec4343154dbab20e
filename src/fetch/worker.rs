use std::time::Instant;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Method, StatusCode, Url};

use super::headers::HeaderAccumulator;
use super::request::{FetchOutcome, FetchRequest, FetchResponse};
use crate::base64;

/// Runs one request to completion on the calling (worker) thread.
pub(crate) fn perform(http: &Client, request: &FetchRequest, max_redirects: usize) -> FetchOutcome {
    match execute(http, request, max_redirects) {
        Ok(response) => FetchOutcome::Response(response),
        Err(message) => FetchOutcome::Error(message),
    }
}

fn execute(http: &Client, request: &FetchRequest, max_redirects: usize) -> Result<FetchResponse, String> {
    let deadline = request.timeout.and_then(|timeout| Instant::now().checked_add(timeout));
    let mut method = Method::from_bytes(request.method.as_bytes())
        .map_err(|_| format!("Invalid HTTP method '{}'", request.method))?;
    let mut url = request.url.clone();
    let mut body = request.body.clone();
    let mut headers = HeaderAccumulator::new();
    let mut hops = 0usize;

    loop {
        let mut builder = http.request(method.clone(), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(bytes) = &body {
            builder = builder.body(bytes.clone());
        }
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err("Request timed out".to_string());
            }
            builder = builder.timeout(remaining);
        }

        let response = builder.send().map_err(describe_error)?;
        let status = response.status();
        headers.feed_line(&format!("{:?} {} {}", response.version(), status.as_u16(), reason(status)));
        for (name, value) in response.headers() {
            headers.feed_line(&format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())));
        }

        if request.follow_redirects && status.is_redirection() {
            if let Some(next) = redirect_target(&url, response.headers()) {
                hops += 1;
                if hops > max_redirects {
                    return Err(format!("Too many redirects (limit {max_redirects})"));
                }
                (method, body) = redirect_method(status, method, body);
                url = next;
                continue;
            }
        }

        let final_url = response.url().to_string();
        let bytes = response.bytes().map_err(describe_error)?;
        return Ok(FetchResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            status_text: reason(status).to_string(),
            url: final_url,
            headers: headers.into_headers(),
            body_base64: base64::encode(&bytes),
        });
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

fn redirect_target(current: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

/// 301/302 turn a POST into a GET, 303 turns everything but HEAD into a GET. 307/308 replay the
/// original method and body.
pub(crate) fn redirect_method(status: StatusCode, method: Method, body: Option<Vec<u8>>) -> (Method, Option<Vec<u8>>) {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if method == Method::POST => (Method::GET, None),
        StatusCode::SEE_OTHER if method != Method::HEAD => (Method::GET, None),
        _ => (method, body),
    }
}

fn describe_error(err: reqwest::Error) -> String {
    if err.is_timeout() {
        "Request timed out".to_string()
    } else if err.is_connect() {
        format!("Connection failed: {err}")
    } else {
        err.to_string()
    }
}
