//! Google service-account access tokens.
//!
//! A service-account key file is exchanged for a short-lived OAuth access
//! token by posting a signed JWT assertion to the key's `token_uri`
//! (RFC 7523). Tokens are cached until shortly before they expire.

use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::http::HttpClient;

/// OAuth scope for Cloud Vision.
pub const VISION_SCOPE: &str = "https://www.googleapis.com/auth/cloud-vision";

/// Token endpoint used when the key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion. Google caps it at one hour.
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Refresh this long before the cached token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account key file needed to mint tokens.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

impl ServiceAccountKey {
    /// RS256-signed assertion requesting `scope`, issued at `issued_at`
    /// (seconds since the Unix epoch).
    pub fn assertion(&self, scope: &str, issued_at: u64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("invalid service-account private key")?;
        encode(&header, &claims, &key).context("failed to sign token assertion")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Mints and caches access tokens for one service account.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    scope: String,
    http: HttpClient,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, scope: impl Into<String>, http: HttpClient) -> Self {
        Self {
            key,
            scope: scope.into(),
            http,
            cached: Mutex::new(None),
        }
    }

    /// A valid bearer token, minting a new one when the cache is empty or
    /// about to expire.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.mint().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn mint(&self) -> Result<CachedToken> {
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the Unix epoch")?
            .as_secs();
        let assertion = self.key.assertion(&self.scope, issued_at)?;
        let form = [("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())];

        let requested = Instant::now();
        let resp = self
            .http
            .send(|client| client.post(&self.key.token_uri).form(&form))
            .await
            .context("token request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("failed to read token response")?;
        if !status.is_success() {
            bail!("token endpoint returned HTTP {}: {text}", status.as_u16());
        }

        let token: TokenResponse =
            serde_json::from_str(&text).context("unexpected token response shape")?;
        tracing::debug!(
            "[vision] minted access token for {} ({}s)",
            self.key.client_email,
            token.expires_in
        );

        Ok(CachedToken {
            value: token.access_token,
            expires_at: requested + Duration::from_secs(token.expires_in),
        })
    }
}
