use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use flowchat_core::config::ResponderConfig;

use crate::{AiReply, AiReplyWire, AiRequest, AiResponder, ResponderError};

/// HTTP client for the external AI responder service. The request timeout is
/// enforced by the underlying client so a stalled responder can never hang a
/// session turn; callers substitute the fallback reply on any error.
#[derive(Debug)]
pub struct HttpResponder {
    client: reqwest::Client,
    chat_url: String,
    api_key: Option<SecretString>,
}

impl HttpResponder {
    pub fn from_config(config: &ResponderConfig) -> Result<Self, ResponderError> {
        Self::new(&config.base_url, config.api_key.clone(), config.timeout_secs)
    }

    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, ResponderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|error| ResponderError::Transport(error.to_string()))?;

        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(ResponderError::Endpoint("base url must not be empty".to_string()));
        }

        Ok(Self { client, chat_url: format!("{base}/chat"), api_key })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }
}

#[async_trait]
impl AiResponder for HttpResponder {
    async fn respond(&self, request: AiRequest) -> Result<AiReply, ResponderError> {
        let mut http_request = self.client.post(&self.chat_url).json(&request);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key.expose_secret());
        }

        let response = http_request
            .send()
            .await
            .map_err(|error| ResponderError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResponderError::Status { status: status.as_u16() });
        }

        let wire: AiReplyWire = response
            .json()
            .await
            .map_err(|error| ResponderError::Malformed(error.to_string()))?;

        Ok(AiReply::from(wire))
    }
}

#[cfg(test)]
mod tests {
    use super::HttpResponder;

    #[test]
    fn chat_url_is_joined_without_duplicate_slashes() {
        let responder =
            HttpResponder::new("http://ai.internal:8001/", None, 30).expect("build responder");
        assert_eq!(responder.chat_url(), "http://ai.internal:8001/chat");

        let responder =
            HttpResponder::new("http://ai.internal:8001", None, 30).expect("build responder");
        assert_eq!(responder.chat_url(), "http://ai.internal:8001/chat");
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let error = HttpResponder::new("", None, 30).expect_err("empty base url must fail");
        assert!(error.to_string().contains("base url"));
    }
}
