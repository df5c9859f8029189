//! Control-plane API executor.
//!
//! The engine core never talks to the network directly; it hands
//! [`ApiCall`]s to an injected [`ApiExecutor`]. The HTTP implementation
//! posts calls to a control-plane endpoint and retries transient failures
//! (throttling, network errors) with backoff before surfacing them.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{KorralError, ProviderError, Result};

use super::call::{ApiCall, ApiResponse};

#[cfg(test)]
use mockall::automock;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Executes external API calls on behalf of the provisioner.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiExecutor: Send + Sync {
    /// Invokes a single API call and returns its response fields.
    async fn invoke(&self, call: &ApiCall) -> Result<ApiResponse>;
}

/// HTTP executor for a control-plane API endpoint.
#[derive(Debug, Clone)]
pub struct HttpApiExecutor {
    /// HTTP client.
    client: Client,
    /// Control-plane endpoint URL.
    endpoint: String,
    /// Bearer token.
    token: String,
}

impl HttpApiExecutor {
    /// Creates a new HTTP executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates an executor with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(endpoint: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token: token.to_string(),
        })
    }

    /// Executes a call with bounded retries for transient failures.
    async fn execute(&self, call: &ApiCall) -> Result<ApiResponse> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for {call}");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            match self.execute_once(call).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if e.is_retryable() {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            KorralError::Provider(ProviderError::NetworkError {
                message: String::from("Max retries exceeded"),
            })
        }))
    }

    /// Executes a single request.
    async fn execute_once(&self, call: &ApiCall) -> Result<ApiResponse> {
        trace!("Invoking {call} with {} parameter(s)", call.parameters.len());

        let body = json!({
            "service": call.service,
            "action": call.action,
            "parameters": call.parameters,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                KorralError::Provider(ProviderError::NetworkError {
                    message: format!("Request failed: {e}"),
                })
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(KorralError::Provider(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(KorralError::Provider(ProviderError::AuthenticationFailed {
                message: String::from("Invalid API token"),
            }));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KorralError::Provider(ProviderError::api_error(
                status.as_u16(),
                body,
            )));
        }

        let value: serde_json::Value = response.json().await.map_err(|e| {
            KorralError::Provider(ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })?;

        ApiResponse::from_json(value).ok_or_else(|| {
            KorralError::Provider(ProviderError::InvalidResponse {
                message: String::from("Response body is not a JSON object"),
            })
        })
    }
}

#[async_trait]
impl ApiExecutor for HttpApiExecutor {
    async fn invoke(&self, call: &ApiCall) -> Result<ApiResponse> {
        self.execute(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_invoke_returns_response_fields() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({
                "service": "iot",
                "action": "CreateKeysAndCertificate",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "certificateArn": "arn:aws:iot:us-west-2:123456789012:cert/abc",
                "certificateId": "abc",
            })))
            .mount(&server)
            .await;

        let executor = HttpApiExecutor::new(&server.uri(), "test-token").expect("executor");
        let call = ApiCall::new("iot", "CreateKeysAndCertificate")
            .with_parameter("setAsActive", json!(true));

        let response = executor.invoke(&call).await.expect("invoke");
        assert_eq!(
            response.string_field("certificateArn").as_deref(),
            Some("arn:aws:iot:us-west-2:123456789012:cert/abc")
        );
    }

    #[tokio::test]
    async fn test_invoke_maps_auth_failures() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let executor = HttpApiExecutor::new(&server.uri(), "bad-token").expect("executor");
        let err = executor
            .invoke(&ApiCall::new("iot", "CreateThing"))
            .await
            .expect_err("must fail");

        assert!(matches!(
            err,
            KorralError::Provider(ProviderError::AuthenticationFailed { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_invoke_surfaces_api_errors_without_retry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid parameters"))
            .expect(1)
            .mount(&server)
            .await;

        let executor = HttpApiExecutor::new(&server.uri(), "test-token").expect("executor");
        let err = executor
            .invoke(&ApiCall::new("iot", "CreateThing"))
            .await
            .expect_err("must fail");

        assert!(matches!(
            err,
            KorralError::Provider(ProviderError::ApiRequestFailed { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_retries_rate_limits() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"thingArn": "arn"})))
            .mount(&server)
            .await;

        let executor = HttpApiExecutor::new(&server.uri(), "test-token").expect("executor");
        let response = executor
            .invoke(&ApiCall::new("iot", "CreateThing"))
            .await
            .expect("retried call succeeds");

        assert_eq!(response.string_field("thingArn").as_deref(), Some("arn"));
    }

    #[tokio::test]
    async fn test_invoke_rejects_non_object_responses() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["not", "an", "object"])))
            .mount(&server)
            .await;

        let executor = HttpApiExecutor::new(&server.uri(), "test-token").expect("executor");
        let err = executor
            .invoke(&ApiCall::new("iot", "CreateThing"))
            .await
            .expect_err("must fail");

        assert!(matches!(
            err,
            KorralError::Provider(ProviderError::InvalidResponse { .. })
        ));
    }
}
