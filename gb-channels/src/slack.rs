use crate::error::{Result, SlackError};
use crate::traits::ThreadApi;
use crate::types::{MessageTs, RawMessage, RepliesPage, ThreadKey, UserId};
use reqwest::Url;
use serde::Deserialize;
use std::cmp::Ordering;
use std::time::Duration;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack Web API client scoped to what the relay needs: thread replies, posting,
/// identity lookup and opening Socket Mode connections.
#[derive(Clone)]
pub struct SlackWebClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: String,
}

impl SlackWebClient {
    pub fn new(bot_token: &str, app_token: &str) -> Result<Self> {
        let bot_token = bot_token.trim();
        if bot_token.is_empty() {
            return Err(SlackError::InvalidInput(
                "slack bot token is required".to_string(),
            ));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_base: SLACK_API_BASE.to_string(),
            bot_token: bot_token.to_string(),
            app_token: app_token.trim().to_string(),
        })
    }

    /// Applies a per-request deadline. Without one, requests rely on the transport's own
    /// limits.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.http = builder.build()?;
        Ok(self)
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Url::parse(&format!("{}/{method}", self.api_base))
            .map_err(|e| SlackError::InvalidInput(format!("slack api url for {method}: {e}")))
    }

    /// Resolves the bot's own user id through `auth.test`.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn auth_test(&self) -> Result<UserId> {
        let url = self.api_url("auth.test")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await?;
        let body: SlackAuthTestResponse = response.json().await?;
        check_ok("auth.test", body.ok, body.error.as_deref())?;
        body.user_id
            .filter(|id| !id.trim().is_empty())
            .map(UserId::new)
            .ok_or_else(|| SlackError::ResponseFormat("auth.test missing user_id".to_string()))
    }

    /// Requests a fresh Socket Mode WebSocket URL through `apps.connections.open`.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn open_socket_url(&self) -> Result<String> {
        if self.app_token.is_empty() {
            return Err(SlackError::InvalidInput(
                "slack app-level token is required for socket mode".to_string(),
            ));
        }
        let url = self.api_url("apps.connections.open")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.app_token)
            .send()
            .await?;
        let body: SlackConnectionsOpenResponse = response.json().await?;
        check_ok("apps.connections.open", body.ok, body.error.as_deref())?;
        body.url.ok_or_else(|| {
            SlackError::ResponseFormat("apps.connections.open missing url".to_string())
        })
    }
}

#[async_trait::async_trait]
impl ThreadApi for SlackWebClient {
    async fn replies(
        &self,
        key: &ThreadKey,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RepliesPage> {
        let url = self.api_url("conversations.replies")?;
        let limit = limit.to_string();
        let mut query = vec![
            ("channel", key.channel.as_str()),
            ("ts", key.anchor.as_str()),
            ("limit", limit.as_str()),
            ("inclusive", "true"),
        ];
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            query.push(("cursor", cursor));
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token)
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Http(format!(
                "conversations.replies status={status} thread={key}"
            )));
        }
        let body: SlackRepliesResponse = response.json().await?;
        check_ok("conversations.replies", body.ok, body.error.as_deref())?;
        Ok(body.into_page())
    }

    async fn post(&self, key: &ThreadKey, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SlackError::InvalidInput("message text is empty".to_string()));
        }

        let payload = serde_json::json!({
            "channel": key.channel.as_str(),
            "text": text,
            "thread_ts": key.anchor.as_str(),
        });

        let url = self.api_url("chat.postMessage")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body: SlackPostMessageResponse = response.json().await?;
        if !status.is_success() || !body.ok {
            return Err(SlackError::Api {
                method: "chat.postMessage".to_string(),
                error: format!(
                    "status={status} error={}",
                    body.error.unwrap_or_else(|| "unknown".to_string())
                ),
            });
        }
        Ok(())
    }
}

fn check_ok(method: &str, ok: bool, error: Option<&str>) -> Result<()> {
    if ok {
        return Ok(());
    }
    Err(SlackError::Api {
        method: method.to_string(),
        error: error.unwrap_or("unknown").to_string(),
    })
}

/// Numeric order for parseable timestamps. Unparseable ones sort after all of them,
/// lexically among themselves, so the order stays total.
pub(crate) fn compare_slack_timestamps(left: &str, right: &str) -> Ordering {
    match (parse_slack_timestamp(left), parse_slack_timestamp(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SlackTimestamp {
    seconds: i64,
    micros: i64,
}

fn parse_slack_timestamp(raw: &str) -> Option<SlackTimestamp> {
    let mut parts = raw.trim().split('.');
    let seconds = parts.next()?.parse::<i64>().ok()?;
    let micros_raw = parts.next().unwrap_or("0");
    let micros_digits = micros_raw.chars().take(6).collect::<String>();
    let micros_padded = format!("{micros_digits:0<6}");
    let micros = micros_padded.parse::<i64>().ok()?;
    Some(SlackTimestamp { seconds, micros })
}

#[derive(Debug, Deserialize)]
struct SlackRepliesResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<SlackResponseMetadata>,
}

impl SlackRepliesResponse {
    fn into_page(self) -> RepliesPage {
        let next_cursor = self
            .response_metadata
            .and_then(|m| m.next_cursor)
            .filter(|c| !c.is_empty());
        RepliesPage {
            messages: self
                .messages
                .into_iter()
                .filter_map(SlackMessage::into_raw)
                .collect(),
            has_more: self.has_more,
            next_cursor,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackPostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackConnectionsOpenResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

impl SlackMessage {
    fn into_raw(self) -> Option<RawMessage> {
        let ts = self.ts.filter(|ts| !ts.trim().is_empty())?;
        let thread_ts = self
            .thread_ts
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| ts.clone());
        let author_id = self.user.or(self.bot_id).unwrap_or_default();
        Some(RawMessage {
            author_id: UserId::new(author_id),
            text: self.text.unwrap_or_default(),
            ts: MessageTs::new(ts),
            thread_ts: MessageTs::new(thread_ts),
        })
    }
}
