//! grumpybot configuration loader.
//!
//! Layers, lowest precedence first: built-in defaults, optional TOML file, environment,
//! command-line flags.

use gb_channels::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LLM_BASE_URL: &str = "https://chatapi.akash.network/api/v1";
pub const DEFAULT_LLM_MODEL: &str = "Meta-Llama-3-3-70B-Instruct";

pub const DEFAULT_PERSONA: &str = "You are an overworked, burned out and depressed programmer. \
You hate constant interruptions and questions. You hate jira. You hate the company. \
You hate the product. You hate the customers. You hate the team. You hate the boss. \
You hate the work. You hate the life. You hate everything. \
Still, you are the most experienced programmer in the world. You still try to help the others. \
You write concise, focused responses, with enough detail to be helpful. \
Sometimes you are sarcastic, ironic or grumpy.";

const APP_TOKEN_PREFIX: &str = "xapp-";
const BOT_TOKEN_PREFIX: &str = "xoxb-";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrumpyConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    /// App-level token used to open Socket Mode connections (`xapp-…`).
    #[serde(default)]
    pub app_token: String,
    /// Bot user OAuth token used for Web API calls (`xoxb-…`).
    #[serde(default)]
    pub bot_token: String,
    /// The bot's own user id. Resolved through `auth.test` when absent.
    #[serde(default)]
    pub bot_user_id: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// No client-side deadline when unset.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            timeout_seconds: None,
        }
    }
}

/// What to do when a thread normalizes to zero turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyConversationPolicy {
    /// Skip the completion call and stay silent.
    #[default]
    Skip,
    /// Call the backend with only the persona.
    PersonaOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default)]
    pub empty_conversation: EmptyConversationPolicy,
    /// Upper bound on concurrently running thread round trips. Unbounded when unset.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            page_limit: default_page_limit(),
            empty_conversation: EmptyConversationPolicy::default(),
            max_in_flight: None,
        }
    }
}

/// Values supplied on the command line. `None` leaves the lower layers untouched.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub app_token: Option<String>,
    pub bot_token: Option<String>,
    pub bot_id: Option<String>,
    pub openai_model: Option<String>,
    pub openai_url: Option<String>,
    pub openai_token: Option<String>,
}

impl GrumpyConfig {
    pub async fn load(path: Option<PathBuf>, cli: &CliOverrides) -> anyhow::Result<Self> {
        let mut cfg = match resolve_config_path(path) {
            Some(path) => {
                let contents = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
                let cfg = Self::from_toml(&contents)
                    .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
                tracing::info!(path = %path.display(), "config file loaded");
                cfg
            }
            None => {
                tracing::info!("no config file found; using defaults");
                Self::default()
            }
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.apply_cli_overrides(cli);
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("SLACK_APP_TOKEN") {
            self.slack.app_token = v;
        }
        if let Some(v) = var("SLACK_BOT_TOKEN") {
            self.slack.bot_token = v;
        }
        if let Some(v) = var("SLACK_BOT_USER_ID") {
            self.slack.bot_user_id = Some(v);
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = var("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("GRUMPYBOT_PERSONA") {
            self.relay.persona = v;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        let set = |target: &mut String, value: &Option<String>| {
            if let Some(v) = value.as_ref().filter(|v| !v.trim().is_empty()) {
                *target = v.clone();
            }
        };
        set(&mut self.slack.app_token, &cli.app_token);
        set(&mut self.slack.bot_token, &cli.bot_token);
        set(&mut self.llm.model, &cli.openai_model);
        set(&mut self.llm.base_url, &cli.openai_url);
        set(&mut self.llm.api_key, &cli.openai_token);
        if let Some(v) = cli.bot_id.as_ref().filter(|v| !v.trim().is_empty()) {
            self.slack.bot_user_id = Some(v.clone());
        }
    }

    /// Checks everything the completion side needs.
    pub fn validate_llm(&self) -> anyhow::Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model is required"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.base_url is required"));
        }
        if self.llm.timeout_seconds == Some(0) {
            return Err(anyhow::anyhow!("llm.timeout_seconds must be > 0"));
        }
        if self.relay.persona.trim().is_empty() {
            return Err(anyhow::anyhow!("relay.persona must not be empty"));
        }
        Ok(())
    }

    /// Checks everything the Slack relay needs on top of [`Self::validate_llm`].
    pub fn validate_relay(&self) -> anyhow::Result<()> {
        self.validate_llm()?;
        if self.slack.app_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "slack.app_token (--app-token / SLACK_APP_TOKEN) must be set"
            ));
        }
        if self.slack.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "slack.bot_token (--bot-token / SLACK_BOT_TOKEN) must be set"
            ));
        }
        if self.slack.timeout_seconds == Some(0) {
            return Err(anyhow::anyhow!("slack.timeout_seconds must be > 0"));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&self.relay.page_limit) {
            return Err(anyhow::anyhow!(
                "relay.page_limit must be between 1 and {MAX_PAGE_LIMIT}"
            ));
        }
        if self.relay.max_in_flight == Some(0) {
            return Err(anyhow::anyhow!("relay.max_in_flight must be > 0 when set"));
        }
        for warning in self.token_warnings() {
            tracing::warn!("{warning}");
        }
        Ok(())
    }

    /// Tokens with an unexpected prefix are suspicious but not fatal.
    pub fn token_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.slack.app_token.starts_with(APP_TOKEN_PREFIX) {
            warnings.push(format!(
                "slack.app_token should have the prefix {APP_TOKEN_PREFIX:?}"
            ));
        }
        if !self.slack.bot_token.starts_with(BOT_TOKEN_PREFIX) {
            warnings.push(format!(
                "slack.bot_token should have the prefix {BOT_TOKEN_PREFIX:?}"
            ));
        }
        warnings
    }

    pub fn llm_timeout(&self) -> Option<Duration> {
        self.llm.timeout_seconds.map(Duration::from_secs)
    }

    pub fn slack_timeout(&self) -> Option<Duration> {
        self.slack.timeout_seconds.map(Duration::from_secs)
    }
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    if let Ok(v) = std::env::var("GRUMPYBOT_CONFIG") {
        if !v.trim().is_empty() {
            return Some(PathBuf::from(v));
        }
    }
    let default = default_config_path();
    default.exists().then_some(default)
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".grumpybot").join("config.toml")
}
