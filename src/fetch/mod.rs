//! Off-thread HTTP requests whose results are handed back to the script thread through a
//! [`ResultQueue`]. Workers never touch the script engine.

mod headers;
mod pool;
mod request;
mod worker;

pub use headers::HeaderAccumulator;
pub use pool::{ShutdownPolicy, WorkerPool};
pub use request::{FetchId, FetchOptions, FetchOutcome, FetchRequest, FetchResponse, FetchResult};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::config::FetchConfig;
use crate::dispatch::ResultQueue;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch requires a URL")]
    MissingUrl,
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct FetchClient {
    http: reqwest::blocking::Client,
    results: ResultQueue<FetchResult>,
    next_id: AtomicU64,
    pool: WorkerPool,
    max_redirects: usize,
}

impl FetchClient {
    pub fn new(config: &FetchConfig, results: ResultQueue<FetchResult>) -> Result<Self, FetchError> {
        let http = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            results,
            next_id: AtomicU64::new(1),
            pool: WorkerPool::new("fetch", config.shutdown_policy()),
            max_redirects: config.max_redirects,
        })
    }

    pub fn results(&self) -> &ResultQueue<FetchResult> {
        &self.results
    }

    /// Validates the URL, assigns the next id and hands the request to a fresh worker thread.
    /// Exactly one [`FetchResult`] carrying the returned id is pushed to the result queue.
    pub fn start(&mut self, url: &str, options: FetchOptions) -> Result<FetchId, FetchError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(FetchError::MissingUrl);
        }
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::InvalidUrl { url: url.to_string(), reason: err.to_string() })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = FetchRequest::new(id, parsed, options);
        log::debug!("[fetch] #{id} {} {}", request.method, request.url);

        let http = self.http.clone();
        let results = self.results.clone();
        let max_redirects = self.max_redirects;
        let spawned = self.pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker::perform(&http, &request, max_redirects)))
                .unwrap_or_else(|_| FetchOutcome::Error("Fetch worker panicked".to_string()));
            if let FetchOutcome::Error(message) = &outcome {
                log::warn!("[fetch] #{} failed: {message}", request.id);
            }
            results.push(FetchResult { id: request.id, outcome });
        });
        if let Err(err) = spawned {
            log::error!("[fetch] #{id} could not spawn worker: {err}");
            self.results.push(FetchResult::error(id, format!("Failed to start fetch worker: {err}")));
        }
        Ok(id)
    }

    pub fn reap_finished(&mut self) -> usize {
        self.pool.reap()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn set_shutdown_policy(&mut self, policy: ShutdownPolicy) {
        self.pool.set_policy(policy);
    }

    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}
