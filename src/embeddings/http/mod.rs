
use std::time::Duration;

use tracing::{debug, error, warn};

use super::{ProviderError, ProviderErrorKind};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking JSON transport shared by the HTTP providers.
///
/// Retries rate limits and transient failures with exponential backoff.
/// Non-success statuses are read rather than raised so the response body can
/// take part in classification.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

impl Default for HttpTransport {
    #[inline]
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
    }
}

impl HttpTransport {
    #[inline]
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: Self::build_agent(timeout),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: Duration::from_secs(1),
        }
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into()
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// POST a JSON body and return the response text of a 2xx answer.
    #[inline]
    pub fn post_json(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        body: &str,
    ) -> Result<String, ProviderError> {
        let authorization = bearer_token.map(|token| format!("Bearer {}", token));

        self.execute_with_retry(url, || {
            let mut request = self
                .agent
                .post(url)
                .header("Content-Type", "application/json");
            if let Some(value) = &authorization {
                request = request.header("Authorization", value.as_str());
            }
            request.send(body)
        })
    }

    /// GET a resource and return the response text of a 2xx answer.
    #[inline]
    pub fn get(&self, url: &str) -> Result<String, ProviderError> {
        self.execute_with_retry(url, || self.agent.get(url).call())
    }

    fn execute_with_retry<F>(&self, url: &str, mut request_fn: F) -> Result<String, ProviderError>
    where
        F: FnMut() -> Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            let error = match request_fn() {
                Ok(mut response) => {
                    let status = response.status().as_u16();
                    let text = response.body_mut().read_to_string().map_err(|e| {
                        ProviderError::new(
                            ProviderErrorKind::Transient,
                            format!("Failed to read response body: {}", e),
                        )
                    });

                    match text {
                        Ok(text) if (200..300).contains(&status) => {
                            debug!("Request succeeded on attempt {}", attempt);
                            return Ok(text);
                        }
                        Ok(text) => ProviderError::from_status(status, &text),
                        Err(e) => e,
                    }
                }
                Err(e) => classify_transport_error(&e),
            };

            if !error.is_retryable() {
                warn!("Non-retryable provider error: {}", error);
                return Err(error);
            }

            warn!(
                "Retryable provider error: {}, attempt {}/{}",
                error, attempt, self.retry_attempts
            );
            last_error = Some(error);

            if attempt < self.retry_attempts {
                let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", url);

        Err(last_error.unwrap_or_else(|| {
            ProviderError::new(ProviderErrorKind::Transient, "Request failed after retries")
        }))
    }
}

/// Map a transport-level failure (no HTTP status available) to a provider error.
#[inline]
pub fn classify_transport_error(error: &ureq::Error) -> ProviderError {
    match error {
        ureq::Error::StatusCode(status) => ProviderError::from_status(*status, ""),
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => ProviderError::new(
            ProviderErrorKind::Transient,
            format!("Transport error: {}", error),
        ),
        _ => ProviderError::new(
            ProviderErrorKind::Rejected,
            format!("Request error: {}", error),
        ),
    }
}
