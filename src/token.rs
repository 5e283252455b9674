use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::config::Config;
use crate::consts::AUTHORIZATION_HEADER;
use crate::error::{Error, Result};

/// Supplies the short-lived credential used to open one realtime connection.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<SecretString>;
}

/// Hands out a credential that was obtained elsewhere.
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<SecretString> {
        if self.token.expose_secret().trim().is_empty() {
            return Err(Error::Token("no credential configured".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Mints credentials from an HTTP endpoint.
///
/// Accepts `{"client_secret": {"value": ..}}`, `{"value": ..}` or `{"token": ..}`.
pub struct HttpTokenProvider {
    http: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
    body: Value,
}

impl HttpTokenProvider {
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
            api_key: None,
            body: json!({}),
        }
    }

    /// Mints against the configured endpoint for the configured model and voice.
    pub fn from_config(config: &Config) -> Self {
        let mut body = json!({ "model": config.model() });
        if let Some(voice) = config.session().voice() {
            body["voice"] = json!(voice);
        }
        Self::new(config.token_url())
            .with_api_key(config.api_key().clone())
            .with_body(body)
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

fn credential_from(value: &Value) -> Option<&str> {
    value
        .pointer("/client_secret/value")
        .or_else(|| value.get("value"))
        .or_else(|| value.get("token"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self) -> Result<SecretString> {
        let mut request = self.http.post(&self.url).json(&self.body);
        if let Some(api_key) = &self.api_key {
            request =
                request.header(AUTHORIZATION_HEADER, format!("Bearer {}", api_key.expose_secret()));
        }

        let response = request.send().await.map_err(|e| Error::Token(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| Error::Token(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Token(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| Error::Token(format!("unreadable token response: {e}")))?;
        let credential = credential_from(&value)
            .ok_or_else(|| Error::Token("response carries no credential".to_string()))?;
        tracing::debug!("Session credential minted");
        Ok(SecretString::from(credential.to_string()))
    }
}
