use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse};
use std::time::Duration;

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

#[derive(Clone)]
pub struct LlmClient {
    base_url: String,
    model: String,
    inner: OpenAiClient,
}

impl LlmClient {
    /// Builds a client for an OpenAI-compatible backend rooted at `base_url`.
    ///
    /// `timeout` of `None` leaves requests without a client-side deadline.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        let completions_url = completions_url(base_url)?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().unwrap_or_else(|e| {
            tracing::warn!(%e, "reqwest client build failed; falling back to default client");
            reqwest::Client::new()
        });

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            inner: OpenAiClient::new(http, completions_url, api_key.trim(), model),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "at least one message is required".to_string(),
            ));
        }
        let resp = self.inner.chat(messages).await?;
        tracing::debug!(
            prompt_tokens = resp.usage.prompt_tokens,
            completion_tokens = resp.usage.completion_tokens,
            finish_reason = %resp.finish_reason,
            "chat completion received"
        );
        Ok(resp)
    }
}

fn completions_url(base_url: &str) -> Result<reqwest::Url> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(LlmError::InvalidInput("base url is required".to_string()));
    }
    let url = reqwest::Url::parse(&format!("{trimmed}/{CHAT_COMPLETIONS_PATH}"))
        .map_err(|e| LlmError::InvalidInput(format!("base url {trimmed:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LlmError::InvalidInput(format!(
            "base url must use http or https, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{LlmClient, completions_url};

    #[test]
    fn completions_url_appends_path_once() {
        let url = completions_url("https://chatapi.akash.network/api/v1/")
            .expect("https base url is valid");
        assert_eq!(
            url.as_str(),
            "https://chatapi.akash.network/api/v1/chat/completions"
        );
    }

    #[test]
    fn completions_url_rejects_non_http_schemes() {
        assert!(completions_url("ftp://example.com/v1").is_err());
        assert!(completions_url("   ").is_err());
    }

    #[test]
    fn new_requires_model() {
        assert!(LlmClient::new("https://api.openai.com/v1", "k", " ", None).is_err());
        let client = LlmClient::new("https://api.openai.com/v1/", "k", "gpt-4o", None)
            .expect("client builds");
        assert_eq!(client.model(), "gpt-4o");
        assert_eq!(client.base_url(), "https://api.openai.com/v1");
    }
}
