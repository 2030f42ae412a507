use crate::config::{ConfigError, Target};
use crate::gate::RateGate;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{target}: waited longer than {timeout:?} for a rate permit")]
    TimeoutExceeded { target: String, timeout: Duration },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("client error, status code: {status}. details: {body}")]
    Client { status: StatusCode, body: String },
    #[error("server error, status code: {status}. details: {body}")]
    Server { status: StatusCode, body: String },
    #[error("unexpected status code: {status}. details: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("auth is invalid: {0}")]
    InvalidAuth(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// True for failures worth another attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Client { status, .. } => *status == StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Server { .. } => true,
            _ => false,
        }
    }
}

pub fn map_status_to_error(status: StatusCode, body: String) -> GatewayError {
    if status.is_client_error() {
        GatewayError::Client { status, body }
    } else if status.is_server_error() {
        GatewayError::Server { status, body }
    } else {
        GatewayError::UnexpectedStatus { status, body }
    }
}

pub fn build_client(target: &Target, cookie_store: bool) -> reqwest::Result<Client> {
    let mut default_headers = HeaderMap::new();
    let ua = format!("mips-relay/{}", env!("CARGO_PKG_VERSION"));
    if let Ok(v) = HeaderValue::from_str(&ua) {
        default_headers.insert(USER_AGENT, v);
    }
    Client::builder()
        .default_headers(default_headers)
        .timeout(target.timeout)
        .cookie_store(cookie_store)
        .use_rustls_tls()
        .build()
}

fn compute_backoff(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d;
    }
    // Exponential backoff with jitter: base 200ms * 2^attempt, max 5s.
    let base = 200u64.saturating_mul(1u64 << attempt.min(5));
    let max = 5_000u64.min(base);
    let jitter = fastrand::u64(0..=max / 2);
    Duration::from_millis(max / 2 + jitter)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// HTTP client bound to one [`Target`]: every attempt first passes the
/// target's rate gate, then goes out with the target's timeout.
#[derive(Debug, Clone)]
pub struct GatedClient {
    client: Client,
    gate: Arc<RateGate>,
    target: Target,
    max_retries: u32,
    hide_paths: bool,
}

impl GatedClient {
    pub fn new(target: Target, gate: Arc<RateGate>, cookie_store: bool) -> Result<Self, GatewayError> {
        let client = build_client(&target, cookie_store)?;
        Ok(Self {
            client,
            gate,
            target,
            max_retries: DEFAULT_MAX_RETRIES,
            hide_paths: false,
        })
    }

    /// Keeps request paths and URLs out of logs and errors, for targets that
    /// carry credentials in the path.
    pub fn hide_paths(mut self) -> Self {
        self.hide_paths = true;
        self
    }

    fn loggable<'a>(&self, path: &'a str) -> &'a str {
        if self.hide_paths {
            "<redacted>"
        } else {
            path
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Waits for a permit, giving up after the target's timeout.
    pub async fn acquire_within(&self, method: &Method) -> Result<(), GatewayError> {
        let scope = method.as_str().to_ascii_lowercase();
        match tokio::time::timeout(
            self.target.timeout,
            self.gate.acquire(&self.target.name, Some(&scope)),
        )
        .await
        {
            Ok(granted) => Ok(granted?),
            Err(_) => Err(GatewayError::TimeoutExceeded {
                target: self.target.name.clone(),
                timeout: self.target.timeout,
            }),
        }
    }

    /// Sends `method path`, letting `customize` add query, body and headers.
    ///
    /// Transport errors, 429 and 5xx are retried with backoff; any other
    /// non-success status is returned as an error.
    pub async fn send<F>(&self, method: Method, path: &str, customize: F) -> Result<Response, GatewayError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        // The gate fails fast on unconfigured methods; check before the first attempt.
        self.gate
            .bucket(&self.target.name, Some(&method.as_str().to_ascii_lowercase()))?;
        let url = self.target.endpoint(path);
        let shown = self.loggable(path);
        let mut attempt: u32 = 0;
        loop {
            self.acquire_within(&method).await?;
            let started = Instant::now();
            let res = customize(self.client.request(method.clone(), &url)).send().await;
            let res = match res {
                Ok(r) => r,
                Err(e) => {
                    let e = if self.hide_paths { e.without_url() } else { e };
                    warn!("{} {} {} error sending request: {}", self.target.name, method, shown, e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(compute_backoff(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GatewayError::Transport(e));
                }
            };
            let status = res.status();
            debug!(
                "{} {} {} responded {} in {:.2}s",
                self.target.name,
                method,
                shown,
                status,
                started.elapsed().as_secs_f64()
            );
            if status.is_success() {
                return Ok(res);
            }

            // Retry on 429/5xx
            if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                && attempt < self.max_retries
            {
                let backoff = compute_backoff(attempt, retry_after(res.headers()));
                warn!(
                    "{} {} {} retrying (status {}), backoff {:?}",
                    self.target.name, method, shown, status, backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }
            let body = res.text().await.unwrap_or_default();
            return Err(map_status_to_error(status, body));
        }
    }
}
