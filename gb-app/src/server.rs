//! Process wiring: builds the Slack and model clients, then runs the relay until a
//! shutdown signal arrives.

use crate::completion::{CompletionBackend, LlmCompletion};
use crate::config::GrumpyConfig;
use crate::gateway::Gateway;
use crate::relay::{Relay, RelaySettings};
use anyhow::Result;
use gb_channels::{
    ConversationNormalizer, SenderClass, SlackWebClient, SocketModeClient, Turn, UserId,
};
use gb_llm::LlmClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EVENT_QUEUE_CAPACITY: usize = 256;

pub async fn serve(cfg: GrumpyConfig) -> Result<()> {
    cfg.validate_relay()?;

    let slack = SlackWebClient::new(&cfg.slack.bot_token, &cfg.slack.app_token)?
        .with_timeout(cfg.slack_timeout())?;
    let bot_user_id = resolve_bot_user_id(&cfg, &slack).await?;
    tracing::info!(%bot_user_id, "bot identity resolved");

    let llm = build_llm_client(&cfg)?;
    tracing::info!(
        model = %llm.model(),
        base_url = %llm.base_url(),
        "completion backend configured"
    );

    let relay = Arc::new(Relay::new(
        Arc::new(slack.clone()),
        Arc::new(LlmCompletion::new(llm)),
        ConversationNormalizer::new(bot_user_id)?,
        RelaySettings {
            persona: cfg.relay.persona.clone(),
            page_limit: cfg.relay.page_limit,
            empty_conversation: cfg.relay.empty_conversation,
            max_in_flight: cfg.relay.max_in_flight,
        },
    ));

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let socket_handle = SocketModeClient::new(slack).start(events_tx, shutdown.child_token());
    let gateway_handle = Gateway::new(relay).start(events_rx, shutdown.child_token());
    tracing::info!(
        max_in_flight = ?cfg.relay.max_in_flight,
        empty_conversation = ?cfg.relay.empty_conversation,
        "grumpybot relay started"
    );

    shutdown_signal(shutdown.clone()).await;

    match socket_handle.await {
        Ok(()) => tracing::info!("socket mode shutdown completed"),
        Err(e) => tracing::error!(error = %e, "socket mode task join failed during shutdown"),
    }
    match gateway_handle.await {
        Ok(()) => tracing::info!("event loop shutdown completed"),
        Err(e) => tracing::error!(error = %e, "event loop task join failed during shutdown"),
    }
    Ok(())
}

/// One-shot question to the configured model with the relay persona.
pub async fn ask(cfg: GrumpyConfig, question: &str) -> Result<String> {
    cfg.validate_llm()?;
    let question = question.trim();
    if question.is_empty() {
        return Err(anyhow::anyhow!("question must not be empty"));
    }
    let completion = LlmCompletion::new(build_llm_client(&cfg)?);
    completion
        .complete(
            &cfg.relay.persona,
            &[Turn::new(SenderClass::Human, question)],
        )
        .await
}

fn build_llm_client(cfg: &GrumpyConfig) -> Result<LlmClient> {
    if cfg.llm.api_key.trim().is_empty() {
        tracing::warn!("llm.api_key is empty; requests are sent without authorization");
    }
    Ok(LlmClient::new(
        &cfg.llm.base_url,
        &cfg.llm.api_key,
        &cfg.llm.model,
        cfg.llm_timeout(),
    )?)
}

async fn resolve_bot_user_id(cfg: &GrumpyConfig, slack: &SlackWebClient) -> Result<UserId> {
    if let Some(id) = cfg
        .slack
        .bot_user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        return Ok(UserId::new(id));
    }
    tracing::info!("slack.bot_user_id not configured; resolving through auth.test");
    slack
        .auth_test()
        .await
        .map_err(|e| anyhow::anyhow!("resolve bot user id: {e}"))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install SIGTERM handler; falling back to ctrl_c only"
                );
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
