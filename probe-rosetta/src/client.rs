use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::VaultError;

/// Where credential requests go. Providers only differ by endpoint URL and
/// infrastructure-level authentication (IAM, network isolation, function
/// keys); the request body never carries credentials. `Local` serves a
/// fixture tree without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultProvider {
    Local,
    AwsLambda,
    AzureFunction,
    GcpCloudFunction,
}

impl FromStr for VaultProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(VaultProvider::Local),
            "aws-lambda" => Ok(VaultProvider::AwsLambda),
            "azure-function" => Ok(VaultProvider::AzureFunction),
            "gcp-cloud-function" => Ok(VaultProvider::GcpCloudFunction),
            invalid => Err(format!("{} is not a valid vault provider", invalid)),
        }
    }
}

/// Backoff between the first attempt and the single retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    initial: Duration,
    maximum: Duration,
}

impl RetryBackoff {
    pub fn new(initial: Duration, maximum: Duration) -> Self {
        Self { initial, maximum }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        std::cmp::min(self.initial * 2u32.saturating_pow(attempt), self.maximum)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            maximum: Duration::from_secs(5),
        }
    }
}

enum Transport {
    Http { endpoint: String },
    Fixture(Value),
}

/// Client for the vault endpoint. One retry with backoff for transient
/// failures; everything else propagates immediately.
pub struct VaultClient {
    transport: Transport,
    http: reqwest::Client,
    backoff: RetryBackoff,
}

impl VaultClient {
    pub fn new(
        provider: VaultProvider,
        endpoint: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, VaultError> {
        let transport = match provider {
            VaultProvider::Local => Transport::Fixture(Value::Object(Default::default())),
            _ => {
                let endpoint = endpoint.ok_or_else(|| {
                    VaultError::Configuration("vault endpoint is required".to_string())
                })?;
                Transport::Http { endpoint }
            }
        };

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(VaultError::Transport)?;

        Ok(Self {
            transport,
            http,
            backoff: RetryBackoff::default(),
        })
    }

    /// A client that answers every request from an in-memory fixture.
    pub fn local(fixture: Value) -> Self {
        Self {
            transport: Transport::Fixture(fixture),
            http: reqwest::Client::new(),
            backoff: RetryBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Post the assembled request and return the vault response tree.
    /// Transient failures are retried exactly once.
    pub async fn fetch(&self, request: &Value) -> Result<Value, VaultError> {
        match self.post_once(request).await {
            Err(err) if err.is_transient() => {
                let delay = self.backoff.delay(0);
                warn!(
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient vault error, retrying once"
                );
                tokio::time::sleep(delay).await;
                self.post_once(request).await
            }
            other => other,
        }
    }

    async fn post_once(&self, request: &Value) -> Result<Value, VaultError> {
        let endpoint = match &self.transport {
            Transport::Fixture(fixture) => return Ok(fixture.clone()),
            Transport::Http { endpoint } => endpoint,
        };

        let response = self
            .http
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VaultError::Timeout
                } else {
                    VaultError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| VaultError::Mapping(format!("vault response is not JSON: {}", e)))
    }
}

/// Map an HTTP status to an error kind per the vault contract: 401/403 are
/// auth failures, 404 means no credentials, 429 and non-500 5xx are
/// transient, everything else is final.
pub fn classify_status(status: u16) -> VaultError {
    match status {
        401 | 403 => VaultError::Auth(status),
        404 => VaultError::NotFound,
        429 => VaultError::RateLimit,
        500 => VaultError::UpstreamStatus(500),
        s if (501..=599).contains(&s) => VaultError::ServiceUnavailable(s),
        s => VaultError::UpstreamStatus(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_backoff() -> RetryBackoff {
        RetryBackoff::new(Duration::from_millis(5), Duration::from_millis(20))
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(401), VaultError::Auth(401)));
        assert!(matches!(classify_status(403), VaultError::Auth(403)));
        assert!(matches!(classify_status(404), VaultError::NotFound));
        assert!(matches!(classify_status(429), VaultError::RateLimit));
        assert!(matches!(classify_status(500), VaultError::UpstreamStatus(500)));
        assert!(matches!(
            classify_status(503),
            VaultError::ServiceUnavailable(503)
        ));
        assert!(matches!(classify_status(400), VaultError::UpstreamStatus(400)));

        assert!(classify_status(429).is_transient());
        assert!(classify_status(503).is_transient());
        assert!(!classify_status(401).is_transient());
        assert!(!classify_status(500).is_transient());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let backoff = RetryBackoff::new(Duration::from_millis(500), Duration::from_secs(5));
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn recovers_from_a_single_transient_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": {"client_id": "svc"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultClient::new(
            VaultProvider::AwsLambda,
            Some(server.uri()),
            Duration::from_secs(1),
        )
        .unwrap()
        .with_backoff(fast_backoff());

        let response = client
            .fetch(&serde_json::json!({"principal": "svc"}))
            .await
            .expect("expected recovery after one retry");
        assert_eq!(response["data"]["client_id"], "svc");
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultClient::new(
            VaultProvider::AzureFunction,
            Some(server.uri()),
            Duration::from_secs(1),
        )
        .unwrap()
        .with_backoff(fast_backoff());

        let result = client.fetch(&serde_json::json!({})).await;
        assert!(matches!(result, Err(VaultError::Auth(401))));
    }

    #[tokio::test]
    async fn sustained_transient_failure_gives_up_after_one_retry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let client = VaultClient::new(
            VaultProvider::GcpCloudFunction,
            Some(server.uri()),
            Duration::from_secs(1),
        )
        .unwrap()
        .with_backoff(fast_backoff());

        let result = client.fetch(&serde_json::json!({})).await;
        assert!(matches!(result, Err(VaultError::ServiceUnavailable(503))));
    }

    #[tokio::test]
    async fn local_client_serves_the_fixture() {
        let client = VaultClient::local(serde_json::json!({"data": {"client_id": "local"}}));
        let response = client.fetch(&serde_json::json!({})).await.unwrap();
        assert_eq!(response["data"]["client_id"], "local");
    }
}
