//! HTTP transport backed by reqwest.

use std::time::Duration;

use bytes::Bytes;

use super::{BoxFuture, Transport, TransportError, TransportRequest};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Real transport implementation using the async reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a new transport with the default timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a new transport with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                TransportError::network(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Bytes, TransportError>> {
        let client = self.client.clone();

        Box::pin(async move {
            let mut builder = client
                .request(request.method.clone(), &request.url)
                .header(reqwest::header::ACCEPT, request.response_type.accept_header());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::network(format!("Request failed: {}", e)))?;

            let status = response.status();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();

            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::network(format!("Failed to read response: {}", e)))?;

            // Check HTTP status
            if !status.is_success() {
                return Err(TransportError {
                    status: Some(status.as_u16()),
                    message: format!("HTTP {} from {}", status, request.url),
                    body: Some(body),
                    headers,
                });
            }

            Ok(body)
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    /// Scripted outcome for a mocked URL.
    #[derive(Debug, Clone)]
    pub enum MockResponse {
        Ok(Bytes),
        Err(TransportError),
        /// Never completes; only dropping the future ends it.
        Pending,
    }

    /// Mock transport for testing.
    ///
    /// Responses are looked up by exact URL, falling back to the default.
    /// When gated, every call waits for a permit released through
    /// [`MockTransport::release`] before answering.
    pub struct MockTransport {
        responses: Mutex<HashMap<String, MockResponse>>,
        default: MockResponse,
        calls: Mutex<Vec<String>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockTransport {
        pub fn new(default: MockResponse) -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                default,
                calls: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        pub fn ok(bytes: &'static [u8]) -> Self {
            Self::new(MockResponse::Ok(Bytes::from_static(bytes)))
        }

        pub fn gated(mut self) -> Self {
            self.gate = Some(Arc::new(Semaphore::new(0)));
            self
        }

        pub fn respond(&self, url: &str, response: MockResponse) {
            self.responses.lock().insert(url.to_string(), response);
        }

        /// Lets `count` gated calls complete.
        pub fn release(&self, count: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(count);
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl Transport for MockTransport {
        fn send(
            &self,
            request: TransportRequest,
        ) -> BoxFuture<'static, Result<Bytes, TransportError>> {
            self.calls.lock().push(request.url.clone());
            let response = self
                .responses
                .lock()
                .get(&request.url)
                .cloned()
                .unwrap_or_else(|| self.default.clone());
            let gate = self.gate.clone();

            Box::pin(async move {
                if let Some(gate) = gate {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                }
                match response {
                    MockResponse::Ok(bytes) => Ok(bytes),
                    MockResponse::Err(error) => Err(error),
                    MockResponse::Pending => futures::future::pending().await,
                }
            })
        }
    }

    #[tokio::test]
    async fn test_mock_transport_success() {
        let mock = MockTransport::ok(&[1, 2, 3, 4]);

        let result = mock.send(TransportRequest::get("http://example.com")).await;
        assert_eq!(result.unwrap(), Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(mock.calls(), vec!["http://example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_transport_scripted_error() {
        let mock = MockTransport::ok(&[]);
        mock.respond(
            "http://example.com/missing",
            MockResponse::Err(TransportError::status(404, "Not Found")),
        );

        let result = mock
            .send(TransportRequest::get("http://example.com/missing"))
            .await;
        assert_eq!(result.unwrap_err().status, Some(404));
    }

    #[tokio::test]
    async fn test_gated_mock_waits_for_release() {
        let mock = MockTransport::ok(b"x").gated();
        let mut future = mock.send(TransportRequest::get("http://example.com"));

        assert!(futures::poll!(&mut future).is_pending());
        mock.release(1);
        assert!(future.await.is_ok());
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::with_timeout(5).is_ok());
    }
}
