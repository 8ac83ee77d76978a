use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tracing::warn;

/// JSON-over-HTTPS transport for gateway calls.
///
/// One attempt per call, bounded by `timeout`. Anything other than
/// `200 OK` with a JSON object body is an error.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    provider: &'static str,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            provider,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> PaymentResult<Map<String, JsonValue>> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if status != StatusCode::OK {
            warn!(
                provider = self.provider,
                status = %status,
                "gateway returned non-200 status"
            );
            return Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: format!("HTTP {}: {}", status, text),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        match serde_json::from_str::<JsonValue>(&text) {
            Ok(JsonValue::Object(map)) => Ok(map),
            Ok(_) => Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: "gateway response is not a JSON object".to_string(),
                provider_code: None,
                retryable: false,
            }),
            Err(e) => Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: format!("invalid provider JSON response: {}", e),
                provider_code: None,
                retryable: false,
            }),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::TimeoutError {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            PaymentError::NetworkError {
                message: format!("provider request failed: {}", err),
            }
        }
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
        assert!(secure_eq(b"", b""));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let client = PaymentHttpClient::new("test", Duration::from_secs(2)).expect("client");
        let err = client
            .post_json("http://127.0.0.1:9/unreachable", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
