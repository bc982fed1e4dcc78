use super::envelope::parse_body;
use super::retry::retry_with_policy;
use crate::config::{DEFAULT_ACCEPT, DEFAULT_ACCEPT_LANGUAGE, LedgerConfig, RetryPolicy};
use crate::core::{FetchOutcome, LedgerError, RawPayload, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tracing::{Instrument, Level, event, info_span};

/// Query parameter carrying the target user id.
pub const USER_ID_PARAM: &str = "uid";

/// Anything able to answer "what does this user own right now".
///
/// Implementations never fail: every error is folded into
/// [`FetchOutcome::Failure`] so that one id cannot abort its siblings.
#[async_trait]
pub trait OwnershipSource: Send + Sync {
    async fn fetch(&self, user_id: &str) -> FetchOutcome;
}

/// HTTP client for the upstream per-user ownership query.
pub struct RemoteFetcher {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl RemoteFetcher {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));
        if !config.referer.is_empty() {
            headers.insert(REFERER, header_value(&config.referer)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|err| LedgerError::Config(format!("Failed to build HTTP client: {}", err)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            retry: config.retry.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One request, no retries. Any error returned here counts as a failed
    /// attempt.
    async fn fetch_once(&self, user_id: &str) -> Result<RawPayload> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[(USER_ID_PARAM, user_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Transport(format!("HTTP status {}", status)));
        }

        let body = response.text().await?;
        let payload = RawPayload::new(parse_body(&body)?);

        match payload.status_code() {
            0 => Ok(payload),
            code => Err(LedgerError::Application {
                code,
                message: payload.message().unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl OwnershipSource for RemoteFetcher {
    async fn fetch(&self, user_id: &str) -> FetchOutcome {
        let span = info_span!("fetch", user_id = %user_id);
        let result = retry_with_policy(&self.retry, |_| self.fetch_once(user_id))
            .instrument(span)
            .await;

        match result {
            Ok(payload) => FetchOutcome::from_payload(payload),
            Err(err) => {
                event!(Level::WARN, user_id = %user_id, error = %err, "fetch gave up");
                FetchOutcome::Failure {
                    error: err.to_string(),
                }
            }
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| LedgerError::Config(format!("Invalid header value '{}': {}", value, err)))
}
