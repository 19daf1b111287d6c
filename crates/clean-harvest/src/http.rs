//! Async HTTP client wrapping reqwest.
//!
//! Handles redirects, timeouts, retry on 5xx, and backoff on 429.

use anyhow::{bail, Result};
use std::time::Duration;

/// Maximum retries on 5xx, 429, or transport errors.
const MAX_RETRIES: u32 = 2;

/// A downloaded body.
#[derive(Debug, Clone)]
pub struct BinaryResponse {
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// HTTP client for asset downloads and service calls.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client with a standard Chrome user-agent.
    pub fn new(timeout: Duration) -> Self {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) \
                  AppleWebKit/537.36 (KHTML, like Gecko) \
                  Chrome/131.0.0.0 Safari/537.36";

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .build()
            .unwrap_or_default();

        Self { client, timeout }
    }

    /// Send the request produced by `build`, rebuilding it for each attempt.
    ///
    /// Retries on 5xx and transport errors with exponential backoff, and
    /// honours `Retry-After` on 429. Once retries are exhausted the last
    /// response is returned whatever its status.
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut retries = 0u32;

        loop {
            let resp = build(&self.client).timeout(self.timeout).send().await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();

                    if status >= 500 && retries < MAX_RETRIES {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tracing::debug!("{} returned {status}, retry {retries} in {delay:?}", r.url());
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == 429 && retries < MAX_RETRIES {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        let delay = Duration::from_secs(retry_after.min(10));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Ok(r);
                }
                Err(e) => {
                    if retries < MAX_RETRIES && !e.is_builder() {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// GET `url` and return the body bytes. Any non-2xx final status is an
    /// error.
    pub async fn get_bytes(&self, url: &str) -> Result<BinaryResponse> {
        let r = self.send(|client| client.get(url)).await?;
        let status = r.status().as_u16();
        if !r.status().is_success() {
            bail!("GET {url} returned HTTP {status}");
        }

        let content_type = r
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = r.bytes().await?.to_vec();

        Ok(BinaryResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_bytes_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8, 2, 3])
                    .insert_header("content-type", "image/png"),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let resp = client.get_bytes(&format!("{}/a.png", server.uri())).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, vec![1, 2, 3]);
        assert_eq!(resp.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_get_bytes_retries_5xx_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1 + MAX_RETRIES as u64)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let err = client
            .get_bytes(&format!("{}/down", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_get_bytes_404_is_error_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        assert!(client
            .get_bytes(&format!("{}/missing", server.uri()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_send_retries_post_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/annotate"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/annotate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let url = format!("{}/annotate", server.uri());
        let resp = client
            .send(|c| c.post(&url).body("payload"))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_send_returns_final_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let resp = client.send(|c| c.post(server.uri())).await.unwrap();
        assert_eq!(resp.status().as_u16(), 403);
    }
}
