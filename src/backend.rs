//! Narrow REST contract with the account backend
//!
//! The session core needs exactly two things from the wider product: the
//! coach catalogue and a pass/fail access check. Responses are never
//! interpreted beyond that; account, billing, and plan semantics stay on
//! the backend.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// A coach as the backend describes it
#[derive(Debug, Clone, Deserialize)]
pub struct CoachRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
}

/// Client for the account backend
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl BackendClient {
    /// Create a client for `base_url`, authenticating with `token`
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    /// Fetch the coach catalogue
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the token is rejected, [`Error::Http`]
    /// on any other failure.
    pub async fn list_coaches(&self) -> Result<Vec<CoachRecord>> {
        let response = self
            .http
            .get(format!("{}/api/coaches", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::Auth("token rejected by the backend".to_string()));
        }

        Ok(response.error_for_status()?.json().await?)
    }

    /// Pass/fail check that the account may talk to `coach_id`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when access is denied, [`Error::Http`] on
    /// any other failure.
    pub async fn verify_access(&self, coach_id: i64) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/api/coaches/{coach_id}/access", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::Auth(format!(
                "account not entitled to coach {coach_id}"
            )));
        }

        response.error_for_status()?;
        Ok(())
    }
}

/// Best-effort identity extraction from a JWT-shaped token
///
/// Decodes the payload segment without verification (the relay verifies;
/// this only personalizes the start message) and picks out a display name
/// and user id where present. Returns `(None, None)` for anything that
/// does not parse.
#[must_use]
pub fn token_identity(token: &str) -> (Option<String>, Option<i64>) {
    let Some(payload) = token.split('.').nth(1) else {
        return (None, None);
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload) else {
        return (None, None);
    };
    let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return (None, None);
    };

    let name = ["name", "userName", "username", "firstName"]
        .into_iter()
        .find_map(|key| claims.get(key).and_then(|v| v.as_str()))
        .map(ToString::to_string);
    let user_id = claims.get("userId").and_then(serde_json::Value::as_i64);

    (name, user_id)
}
