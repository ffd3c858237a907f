//! Service-account access tokens for the Drive API.
//!
//! Signs a JWT assertion with the account's private key, exchanges it for a
//! bearer token and caches that token until shortly before it expires.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::archive::backend::DriveError;

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime requested from the token endpoint.
const ASSERTION_TTL_SECS: i64 = 3600;

/// Refresh this many seconds before the token actually expires.
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields we need from a service-account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_TTL_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at - REFRESH_MARGIN_SECS
    }
}

/// Hands out bearer tokens for one service account.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// Read a key file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DriveError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let key: ServiceAccountKey = serde_json::from_str(&content)
            .map_err(|e| DriveError::Auth(format!("invalid key file '{}': {e}", path.display())))?;
        Self::from_key(key, reqwest::Client::new())
    }

    pub fn from_key(key: ServiceAccountKey, http: reqwest::Client) -> Result<Self, DriveError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| DriveError::Auth(format!("invalid private key: {e}")))?;
        Ok(Self {
            key,
            encoding_key,
            http,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// A valid bearer token, fetching a new one when the cached one is stale.
    pub async fn access_token(&self) -> Result<String, DriveError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp();

        if let Some(ref token) = *cached
            && token.is_fresh(now)
        {
            return Ok(token.token.clone());
        }

        let fresh = self.fetch_token(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self, now: i64) -> Result<CachedToken, DriveError> {
        debug!("Requesting access token for {}", self.key.client_email);

        let claims = Claims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| DriveError::Auth(format!("failed to sign assertion: {e}")))?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| DriveError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriveError::Auth(format!("bad token response: {e}")))?;

        info!("🔑 Access token refreshed (valid {}s)", parsed.expires_in);
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: now + parsed.expires_in,
        })
    }
}
