use secrecy::{ExposeSecret, SecretString};

use crate::consts::{AUTHORIZATION_HEADER, CONTENT_TYPE_HEADER, SDP_CONTENT_TYPE};
use crate::error::{Error, Result};

/// One-shot offer/answer exchange with the realtime endpoint.
#[derive(Debug, Clone)]
pub struct SdpExchange {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl SdpExchange {
    pub fn new(url: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
            model: model.to_string(),
        }
    }

    /// Posts the local offer and returns the remote answer SDP.
    pub async fn exchange(&self, credential: &SecretString, offer_sdp: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .query(&[("model", self.model.as_str())])
            .header(AUTHORIZATION_HEADER, format!("Bearer {}", credential.expose_secret()))
            .header(CONTENT_TYPE_HEADER, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| Error::negotiation(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::negotiation(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "SDP exchange rejected: {}", text);
            return Err(Error::negotiation_status(status.as_u16(), text));
        }

        let answer = text.trim_start();
        if !answer.starts_with("v=") {
            return Err(Error::negotiation("remote answer is not a session description"));
        }
        tracing::debug!(bytes = answer.len(), "Received SDP answer");
        Ok(answer.to_string())
    }
}
