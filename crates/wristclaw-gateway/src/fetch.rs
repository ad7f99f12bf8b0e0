// SPDX-License-Identifier: Apache-2.0
//! Timeout + retry fetch utility. Generic over a minimal [`HttpClient`]
//! seam so the retry/backoff logic is unit-testable without a network
//! stack; [`ReqwestHttpClient`] is the production transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
            .and_then(|(_, v)| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: FetchRequest) -> Result<FetchResponse, FetchError>;
}

pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, req: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut builder = self.client.request(req.method, &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_on: Vec<u16>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            retries: 2,
            retry_on: vec![429, 502, 503, 504],
        }
    }
}

fn exponential_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn retry_delay(resp: &FetchResponse, attempt: u32) -> Duration {
    match resp.retry_after_secs() {
        Some(secs) => Duration::from_millis((secs * 1000).min(30_000)),
        None => exponential_backoff(attempt),
    }
}

/// Run `req` against `client`, retrying transient statuses and transient
/// transport errors up to `opts.retries + 1` total attempts. On exhaustion
/// with a retriable status, returns the last response rather than an error;
/// on exhaustion after transient transport errors, returns the last error.
pub async fn fetch<C: HttpClient + ?Sized>(
    client: &C,
    req: FetchRequest,
    opts: &FetchOptions,
) -> Result<FetchResponse, FetchError> {
    let attempts = opts.retries + 1;

    for attempt in 1..=attempts {
        let outcome = tokio::time::timeout(opts.timeout, client.execute(req.clone())).await;

        match outcome {
            Err(_elapsed) => {
                if attempt >= attempts {
                    return Err(FetchError::Timeout);
                }
                debug!(attempt, "fetch timed out, retrying");
                tokio::time::sleep(exponential_backoff(attempt)).await;
            }
            Ok(Ok(resp)) => {
                if opts.retry_on.contains(&resp.status) {
                    if attempt >= attempts {
                        return Ok(resp);
                    }
                    let delay = retry_delay(&resp, attempt);
                    debug!(attempt, status = resp.status, delay_ms = delay.as_millis() as u64, "fetch got transient status, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(resp);
            }
            Ok(Err(err)) => {
                let FetchError::Transport(text) = &err else {
                    return Err(err);
                };
                if !FetchError::is_transient_text(text) {
                    return Err(err);
                }
                if attempt >= attempts {
                    return Err(err);
                }
                debug!(attempt, "fetch transport error, retrying");
                tokio::time::sleep(exponential_backoff(attempt)).await;
            }
        }
    }

    unreachable!("loop always returns by the final attempt")
}
