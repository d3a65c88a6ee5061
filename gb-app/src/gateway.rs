//! Event loop: consumes Socket Mode events one at a time and hands mentions to the relay.

use crate::relay::{Dispatch, Relay};
use gb_channels::SocketEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Gateway {
    relay: Arc<Relay>,
}

impl Gateway {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }

    pub fn start(
        self,
        events: mpsc::Receiver<SocketEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(events, shutdown).await })
    }

    /// Runs until `shutdown` fires or the event source closes. In-flight relay tasks are
    /// left to finish on their own.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run(&self, mut events: mpsc::Receiver<SocketEvent>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("event loop cancelled");
                    return;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                tracing::info!("event source closed; event loop exiting");
                return;
            };
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Connecting => tracing::info!("connecting to slack with socket mode"),
            SocketEvent::Connected => tracing::info!("connected to slack with socket mode"),
            SocketEvent::ConnectionError { error } => {
                tracing::warn!(%error, "slack connection failed; retrying later")
            }
            SocketEvent::Hello => tracing::info!("slack hello received"),
            SocketEvent::Disconnect { reason } => {
                tracing::info!(%reason, "slack requested disconnect")
            }
            SocketEvent::AppMention(mention) => match self.relay.on_mention(&mention).await {
                Dispatch::Command(command) => {
                    tracing::debug!(?command, "built-in command answered")
                }
                Dispatch::Spawned(_) => tracing::debug!("thread relay dispatched"),
            },
            SocketEvent::MemberJoined { user, channel } => {
                tracing::info!(%user, %channel, "user joined channel")
            }
            SocketEvent::Unsupported { envelope_type } => {
                tracing::info!(%envelope_type, "unsupported socket envelope ignored")
            }
            SocketEvent::Ignored { event_type } => {
                tracing::debug!(%event_type, "unhandled event type ignored")
            }
            SocketEvent::Malformed {
                envelope_type,
                error,
            } => tracing::warn!(
                %envelope_type,
                %error,
                "acked slack envelope with undecodable payload"
            ),
        }
    }
}
