//! Text screening for downloaded thumbnails.
//!
//! [`TextDetector`] is the seam to the remote text-detection service;
//! [`GoogleVisionDetector`] talks to Cloud Vision `images:annotate`.
//! [`TextClassifier`] reduces detector output to a [`Classification`] and
//! fails open: any error is reported as `Unavailable`, which the pipeline
//! treats as "no text".

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{ServiceAccountTokens, VISION_SCOPE};
use crate::config::VisionCredentials;
use crate::http::HttpClient;
use crate::types::Classification;

/// A single detected text region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnnotation {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub locale: Option<String>,
}

/// Raw detector answer: an error message, or a possibly empty annotation set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextDetection {
    pub error: Option<String>,
    pub annotations: Vec<TextAnnotation>,
}

/// Remote capability that finds text in image bytes.
#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<TextDetection>;
}

/// Google Cloud Vision `TEXT_DETECTION` over REST.
pub struct GoogleVisionDetector {
    http: HttpClient,
    endpoint: String,
    auth: Authorization,
}

enum Authorization {
    ApiKey(String),
    Bearer(String),
    ServiceAccount(ServiceAccountTokens),
    None,
}

#[derive(Deserialize)]
struct AnnotateBatch {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<StatusMessage>,
}

#[derive(Deserialize)]
struct StatusMessage {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: StatusMessage,
}

impl GoogleVisionDetector {
    /// Requests (and token exchanges for service accounts) go through
    /// `http`, so they share its timeout and retry policy.
    pub fn new(endpoint: impl Into<String>, credentials: VisionCredentials, http: HttpClient) -> Self {
        let auth = match credentials {
            VisionCredentials::ApiKey(key) => Authorization::ApiKey(key),
            VisionCredentials::AccessToken(token) => Authorization::Bearer(token),
            VisionCredentials::ServiceAccount(key) => Authorization::ServiceAccount(
                ServiceAccountTokens::new(key, VISION_SCOPE, http.clone()),
            ),
            VisionCredentials::Missing => Authorization::None,
        };

        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth,
        }
    }
}

#[async_trait]
impl TextDetector for GoogleVisionDetector {
    async fn detect(&self, image: &[u8]) -> Result<TextDetection> {
        let content = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "requests": [{
                "image": { "content": content },
                "features": [{ "type": "TEXT_DETECTION" }]
            }]
        });

        let url = format!("{}/v1/images:annotate", self.endpoint);
        let bearer = match &self.auth {
            Authorization::Bearer(token) => Some(token.clone()),
            Authorization::ServiceAccount(tokens) => Some(
                tokens
                    .token()
                    .await
                    .context("failed to obtain a service-account token")?,
            ),
            Authorization::ApiKey(_) | Authorization::None => None,
        };

        let resp = self
            .http
            .send(|client| {
                let mut request = client.post(&url).json(&body);
                if let Authorization::ApiKey(key) = &self.auth {
                    request = request.query(&[("key", key.as_str())]);
                }
                if let Some(token) = &bearer {
                    request = request.bearer_auth(token);
                }
                request
            })
            .await
            .context("vision request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("failed to read vision response")?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            bail!("vision returned HTTP {}: {message}", status.as_u16());
        }

        let batch: AnnotateBatch =
            serde_json::from_str(&text).context("unexpected vision response shape")?;
        let Some(first) = batch.responses.into_iter().next() else {
            return Ok(TextDetection::default());
        };

        Ok(TextDetection {
            error: first
                .error
                .map(|e| e.message)
                .filter(|m| !m.is_empty()),
            annotations: first.text_annotations,
        })
    }
}

/// Fail-open text classifier over any [`TextDetector`].
#[derive(Clone)]
pub struct TextClassifier {
    detector: Arc<dyn TextDetector>,
}

impl TextClassifier {
    pub fn new(detector: Arc<dyn TextDetector>) -> Self {
        Self { detector }
    }

    /// Screen the image at `path`.
    pub async fn classify(&self, path: &Path) -> Classification {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("[vision] cannot read {}: {e}", path.display());
                return Classification::Unavailable(e.to_string());
            }
        };

        match self.detector.detect(&bytes).await {
            Ok(TextDetection {
                error: Some(message),
                ..
            }) => {
                tracing::error!("[vision] {}: {message}", path.display());
                Classification::Unavailable(message)
            }
            Ok(detection) if !detection.annotations.is_empty() => Classification::HasText,
            Ok(_) => Classification::Clean,
            Err(e) => {
                tracing::error!("[vision] {}: {e:#}", path.display());
                Classification::Unavailable(format!("{e:#}"))
            }
        }
    }

    /// `true` only when text was positively detected.
    pub async fn has_text(&self, path: &Path) -> bool {
        self.classify(path).await.has_text()
    }
}
