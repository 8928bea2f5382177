//! The rate-limited HTTP boundary
//!
//! All remote calls go through a [`Requester`]. It serializes requests (one in
//! flight at a time), classifies every response, and remembers the server's
//! most recent `Retry-After` so callers can pace themselves.

use crate::config::{ApiConfig, RateLimitConfig};
use crate::requester::error::{classify_response, RequestError};
use crate::requester::pacing::{backoff_delay, parse_retry_after, Pacing};
use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result type for requester operations
pub type RequestResult<T> = Result<T, RequestError>;

/// One outbound API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: url::Url,
    /// Query string parameters
    pub params: Vec<(String, String)>,
    /// Form-encoded body fields (ignored for GET)
    pub form: Vec<(String, String)>,
    /// Overrides the client's default timeout
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn get(url: url::Url) -> Self {
        Self {
            method: Method::GET,
            url,
            params: Vec::new(),
            form: Vec::new(),
            timeout: None,
        }
    }

    pub fn post(url: url::Url) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(url)
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// OAuth access token shared by every component acting for one account
///
/// Acquiring and refreshing the token happens elsewhere; whoever refreshes it
/// calls [`Credentials::set`] and the next request picks it up.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    token: Arc<RwLock<String>>,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.into())),
        }
    }

    pub fn access_token(&self) -> String {
        match self.token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The API configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Serialized, pacing-aware HTTP requester
///
/// Write actions are never retried here; a failed write is reported once and
/// the caller decides. Idempotent GETs get a bounded number of internal
/// retries on transient failures.
pub struct Requester {
    client: Client,
    rate_limit: RateLimitConfig,
    in_flight: tokio::sync::Mutex<()>,
    pacing: Mutex<Pacing>,
}

impl Requester {
    /// Creates a requester for one account
    pub fn new(api: &ApiConfig, rate_limit: &RateLimitConfig) -> RequestResult<Self> {
        let client = build_http_client(api).map_err(RequestError::from_reqwest)?;
        Ok(Self::with_client(client, rate_limit))
    }

    pub fn with_client(client: Client, rate_limit: &RateLimitConfig) -> Self {
        Self {
            client,
            rate_limit: rate_limit.clone(),
            in_flight: tokio::sync::Mutex::new(()),
            pacing: Mutex::new(Pacing::new(
                rate_limit.default_delay(),
                rate_limit.max_retry_after(),
            )),
        }
    }

    /// Delay the caller must sleep before its next request
    ///
    /// Reflects the most recent response only, so query it again after
    /// every call.
    pub fn recommended_delay(&self) -> Duration {
        self.with_pacing(|p| p.recommended_delay())
    }

    /// Earliest instant the server asked us to wait for, if it ever did
    ///
    /// Not enforced: scheduling is the caller's job. Requests issued before
    /// this instant are logged as pacing bugs.
    pub fn next_allowed_at(&self) -> Option<Instant> {
        self.with_pacing(|p| p.next_allowed_at())
    }

    fn with_pacing<T>(&self, f: impl FnOnce(&mut Pacing) -> T) -> T {
        match self.pacing.lock() {
            Ok(mut pacing) => f(&mut pacing),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Issues one request, classifying the outcome
    ///
    /// # Arguments
    ///
    /// * `request` - Method, URL, parameters and body of the call
    ///
    /// # Returns
    ///
    /// * `Ok(ApiResponse)` - The server answered 2xx
    /// * `Err(RequestError)` - Rate limit, auth, client, server or network failure
    pub async fn execute(&self, request: ApiRequest) -> RequestResult<ApiResponse> {
        let retries = if request.method == Method::GET {
            self.rate_limit.transient_retries
        } else {
            0
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Err(err) if err.is_transient() && attempt < retries => {
                    attempt += 1;
                    let delay = backoff_delay(
                        Duration::from_millis(self.rate_limit.backoff_base_ms),
                        Duration::from_millis(self.rate_limit.backoff_max_ms),
                        attempt,
                    );
                    warn!(
                        url = %request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Convenience wrapper for a GET returning JSON
    pub async fn get_json(
        &self,
        url: url::Url,
        params: Vec<(String, String)>,
    ) -> RequestResult<Value> {
        let mut request = ApiRequest::get(url);
        request.params = params;
        Ok(self.execute(request).await?.body)
    }

    async fn send_once(&self, request: &ApiRequest) -> RequestResult<ApiResponse> {
        let _guard = self.in_flight.lock().await;

        if let Some(early) = self.with_pacing(|p| p.early_by(Instant::now())) {
            debug!(
                url = %request.url,
                early_ms = early.as_millis() as u64,
                "Request issued before the server's Retry-After elapsed"
            );
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .query(&request.params);
        if request.method != Method::GET && !request.form.is_empty() {
            builder = builder.form(&request.form);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");
        let response = builder.send().await.map_err(RequestError::from_reqwest)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let retry_after = self.with_pacing(|p| p.observe(retry_after, Instant::now()));

        let text = response.text().await.map_err(RequestError::from_reqwest)?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(e) if (200..300).contains(&status) => {
                    return Err(RequestError::Decode(e.to_string()));
                }
                Err(_) => Value::Null,
            }
        };

        debug!(
            url = %request.url,
            status,
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "Received response"
        );

        classify_response(status, retry_after, &body)?;
        Ok(ApiResponse { status, body })
    }
}
