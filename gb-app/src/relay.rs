//! Mention dispatch: built-in commands inline, everything else through the model.

use crate::commands::BuiltinCommand;
use crate::completion::CompletionBackend;
use crate::config::EmptyConversationPolicy;
use gb_channels::{AppMention, ConversationNormalizer, ThreadApi, ThreadFetcher, ThreadKey};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub persona: String,
    pub page_limit: usize,
    pub empty_conversation: EmptyConversationPolicy,
    pub max_in_flight: Option<usize>,
}

/// How a mention was handled.
#[derive(Debug)]
pub enum Dispatch {
    /// A built-in command was answered (or the answer failed to post) before returning.
    Command(BuiltinCommand),
    /// The thread round trip runs on its own task.
    Spawned(JoinHandle<()>),
}

pub struct Relay {
    api: Arc<dyn ThreadApi>,
    fetcher: ThreadFetcher,
    normalizer: ConversationNormalizer,
    completion: Arc<dyn CompletionBackend>,
    persona: String,
    empty_conversation: EmptyConversationPolicy,
    in_flight: Option<Arc<Semaphore>>,
}

impl Relay {
    pub fn new(
        api: Arc<dyn ThreadApi>,
        completion: Arc<dyn CompletionBackend>,
        normalizer: ConversationNormalizer,
        settings: RelaySettings,
    ) -> Self {
        let fetcher = ThreadFetcher::new(api.clone()).with_page_limit(settings.page_limit);
        Self {
            api,
            fetcher,
            normalizer,
            completion,
            persona: settings.persona,
            empty_conversation: settings.empty_conversation,
            in_flight: settings
                .max_in_flight
                .map(|permits| Arc::new(Semaphore::new(permits.max(1)))),
        }
    }

    /// Handles one mention. Commands are answered before this returns; conversational
    /// requests are handed to a spawned task so the caller can keep consuming events.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(channel = %mention.channel, ts = %mention.ts)
    )]
    pub async fn on_mention(self: &Arc<Self>, mention: &AppMention) -> Dispatch {
        let key = mention.thread_key();
        let text = self.normalizer.strip_mentions(&mention.text);
        tracing::info!(thread = %key, text = %text, "received mention");

        if let Some(command) = BuiltinCommand::parse(&text) {
            self.post(&key, command.reply()).await;
            return Dispatch::Command(command);
        }

        let relay = Arc::clone(self);
        let span = tracing::info_span!("relay_thread", thread = %key);
        Dispatch::Spawned(tokio::spawn(
            async move { relay.relay_thread(key).await }.instrument(span),
        ))
    }

    async fn relay_thread(&self, key: ThreadKey) {
        let _permit = match self.in_flight.as_ref() {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(error) => {
                    tracing::warn!(%error, "relay concurrency limiter closed; dropping request");
                    return;
                }
            },
            None => None,
        };

        let messages = self.fetcher.fetch(&key).await;
        let conversation = self.normalizer.normalize(&messages);
        if conversation.is_empty() && self.empty_conversation == EmptyConversationPolicy::Skip {
            tracing::info!(
                fetched = messages.len(),
                "thread normalized to no turns; skipping completion"
            );
            return;
        }

        let reply = match self
            .completion
            .complete(&self.persona, conversation.turns())
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(
                    %error,
                    turns = conversation.len(),
                    "completion failed; no reply sent"
                );
                return;
            }
        };
        if reply.trim().is_empty() {
            tracing::warn!("completion returned empty text; no reply sent");
            return;
        }

        self.post(&key, &reply).await;
    }

    async fn post(&self, key: &ThreadKey, text: &str) {
        match self.api.post(key, text).await {
            Ok(()) => tracing::debug!(thread = %key, "reply posted"),
            Err(error) => tracing::warn!(%error, thread = %key, "failed posting message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatch, Relay, RelaySettings};
    use crate::commands::{BuiltinCommand, HELP_REPLY, PONG_REPLY};
    use crate::completion::CompletionBackend;
    use crate::config::EmptyConversationPolicy;
    use gb_channels::{
        AppMention, ConversationNormalizer, RawMessage, RepliesPage, Result as SlackResult,
        SenderClass, SlackError, ThreadApi, ThreadKey, Turn, UserId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const BOT: &str = "U092CPW681M";
    const ANCHOR: &str = "1700000000.000100";

    #[derive(Default)]
    struct FakeSlack {
        history: Vec<RawMessage>,
        fail_replies: bool,
        fail_post: bool,
        replies_calls: AtomicUsize,
        posts: Mutex<Vec<(ThreadKey, String)>>,
    }

    impl FakeSlack {
        fn posts(&self) -> Vec<(ThreadKey, String)> {
            self.posts.lock().expect("posts lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl ThreadApi for FakeSlack {
        async fn replies(
            &self,
            _key: &ThreadKey,
            _cursor: Option<&str>,
            _limit: usize,
        ) -> SlackResult<RepliesPage> {
            self.replies_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_replies {
                return Err(SlackError::Http("boom".to_string()));
            }
            Ok(RepliesPage {
                messages: self.history.clone(),
                has_more: false,
                next_cursor: None,
            })
        }

        async fn post(&self, key: &ThreadKey, text: &str) -> SlackResult<()> {
            self.posts
                .lock()
                .expect("posts lock")
                .push((key.clone(), text.to_string()));
            if self.fail_post {
                return Err(SlackError::Api {
                    method: "chat.postMessage".to_string(),
                    error: "channel_not_found".to_string(),
                });
            }
            Ok(())
        }
    }

    enum Scripted {
        Reply(&'static str),
        NoChoices,
    }

    struct FakeCompletion {
        outcome: Scripted,
        calls: Mutex<Vec<(String, Vec<Turn>)>>,
    }

    impl FakeCompletion {
        fn new(outcome: Scripted) -> Self {
            Self {
                outcome,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Vec<Turn>)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for FakeCompletion {
        async fn complete(&self, persona: &str, turns: &[Turn]) -> anyhow::Result<String> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((persona.to_string(), turns.to_vec()));
            match self.outcome {
                Scripted::Reply(text) => Ok(text.to_string()),
                Scripted::NoChoices => Err(gb_llm::LlmError::NoChoices.into()),
            }
        }
    }

    fn settings(empty_conversation: EmptyConversationPolicy) -> RelaySettings {
        RelaySettings {
            persona: "be grumpy".to_string(),
            page_limit: 900,
            empty_conversation,
            max_in_flight: None,
        }
    }

    fn relay(
        slack: &Arc<FakeSlack>,
        completion: &Arc<FakeCompletion>,
        settings: RelaySettings,
    ) -> Arc<Relay> {
        let normalizer = ConversationNormalizer::new(UserId::new(BOT)).expect("normalizer");
        Arc::new(Relay::new(
            slack.clone(),
            completion.clone(),
            normalizer,
            settings,
        ))
    }

    fn mention(text: &str, thread_ts: Option<&str>) -> AppMention {
        AppMention {
            channel: "C1".into(),
            user: Some("U1".into()),
            text: text.to_string(),
            ts: "1700000000.000300".into(),
            thread_ts: thread_ts.map(Into::into),
        }
    }

    fn raw(author: &str, ts: &str, text: &str) -> RawMessage {
        RawMessage {
            author_id: author.into(),
            text: text.to_string(),
            ts: ts.into(),
            thread_ts: ANCHOR.into(),
        }
    }

    async fn join(dispatch: Dispatch) {
        match dispatch {
            Dispatch::Spawned(handle) => handle.await.expect("relay task completes"),
            Dispatch::Command(command) => panic!("expected spawned task, got {command:?}"),
        }
    }

    #[tokio::test]
    async fn ping_replies_inline_without_fetch_or_completion() {
        let slack = Arc::new(FakeSlack::default());
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("unused")));
        let relay = relay(&slack, &completion, settings(EmptyConversationPolicy::Skip));

        let dispatch = relay
            .on_mention(&mention("<@U092CPW681M> ping", Some("1700000000.000100")))
            .await;

        assert!(matches!(dispatch, Dispatch::Command(BuiltinCommand::Ping)));
        assert_eq!(
            slack.posts(),
            vec![(
                ThreadKey::new("C1", "1700000000.000100"),
                PONG_REPLY.to_string()
            )]
        );
        assert_eq!(slack.replies_calls.load(Ordering::SeqCst), 0);
        assert!(completion.calls().is_empty());
    }

    #[tokio::test]
    async fn help_in_a_new_thread_replies_to_the_mention_itself() {
        let slack = Arc::new(FakeSlack::default());
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("unused")));
        let relay = relay(&slack, &completion, settings(EmptyConversationPolicy::Skip));

        relay.on_mention(&mention("<@U092CPW681M>   help", None)).await;

        assert_eq!(
            slack.posts(),
            vec![(
                ThreadKey::new("C1", "1700000000.000300"),
                HELP_REPLY.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn conversation_is_normalized_and_reply_posted_to_thread() {
        let slack = Arc::new(FakeSlack {
            history: vec![
                raw("U1", "1700000000.000100", "<@U092CPW681M> what is jira?"),
                raw(BOT, "1700000000.000200", "a ticket tracker"),
                raw("U2", "1700000000.000250", "and"),
                raw("U1", "1700000000.000300", "<@U092CPW681M> why do we use it?"),
            ],
            ..FakeSlack::default()
        });
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("nobody knows")));
        let relay = relay(&slack, &completion, settings(EmptyConversationPolicy::Skip));

        join(
            relay
                .on_mention(&mention(
                    "<@U092CPW681M> why do we use it?",
                    Some("1700000000.000100"),
                ))
                .await,
        )
        .await;

        let calls = completion.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "be grumpy");
        assert_eq!(
            calls[0].1,
            vec![
                Turn::new(SenderClass::Human, "what is jira?"),
                Turn::new(SenderClass::Bot, "a ticket tracker"),
                Turn::new(SenderClass::Human, "and\nwhy do we use it?"),
            ]
        );
        assert_eq!(
            slack.posts(),
            vec![(
                ThreadKey::new("C1", "1700000000.000100"),
                "nobody knows".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn completion_failure_posts_nothing() {
        let slack = Arc::new(FakeSlack {
            history: vec![raw("U1", "1700000000.000100", "<@U092CPW681M> hi")],
            ..FakeSlack::default()
        });
        let completion = Arc::new(FakeCompletion::new(Scripted::NoChoices));
        let relay = relay(&slack, &completion, settings(EmptyConversationPolicy::Skip));

        join(
            relay
                .on_mention(&mention("<@U092CPW681M> hi", Some(ANCHOR)))
                .await,
        )
        .await;

        assert_eq!(completion.calls().len(), 1);
        assert!(slack.posts().is_empty());
    }

    #[tokio::test]
    async fn empty_conversation_skips_completion_by_default() {
        let slack = Arc::new(FakeSlack {
            fail_replies: true,
            ..FakeSlack::default()
        });
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("unused")));
        let relay = relay(&slack, &completion, settings(EmptyConversationPolicy::Skip));

        join(relay.on_mention(&mention("<@U092CPW681M> hi", None)).await).await;

        assert_eq!(slack.replies_calls.load(Ordering::SeqCst), 1);
        assert!(completion.calls().is_empty());
        assert!(slack.posts().is_empty());
    }

    #[tokio::test]
    async fn bare_mention_starting_a_thread_is_skipped() {
        let slack = Arc::new(FakeSlack {
            history: vec![raw("U1", ANCHOR, "<@U092CPW681M>")],
            ..FakeSlack::default()
        });
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("unused")));
        let relay = relay(&slack, &completion, settings(EmptyConversationPolicy::Skip));

        join(relay.on_mention(&mention("<@U092CPW681M>", Some(ANCHOR))).await).await;

        assert_eq!(slack.replies_calls.load(Ordering::SeqCst), 1);
        assert!(completion.calls().is_empty());
        assert!(slack.posts().is_empty());
    }

    #[tokio::test]
    async fn persona_only_policy_calls_backend_without_turns() {
        let slack = Arc::new(FakeSlack::default());
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("what do you want")));
        let relay = relay(
            &slack,
            &completion,
            settings(EmptyConversationPolicy::PersonaOnly),
        );

        join(relay.on_mention(&mention("<@U092CPW681M>", None)).await).await;

        let calls = completion.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.is_empty());
        assert_eq!(slack.posts().len(), 1);
    }

    #[tokio::test]
    async fn post_failure_is_absorbed() {
        let slack = Arc::new(FakeSlack {
            history: vec![raw("U1", "1700000000.000100", "hello")],
            fail_post: true,
            ..FakeSlack::default()
        });
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("go away")));
        let relay = relay(&slack, &completion, settings(EmptyConversationPolicy::Skip));

        join(relay.on_mention(&mention("hello", Some(ANCHOR))).await).await;
        assert_eq!(completion.calls().len(), 1);
        assert_eq!(slack.posts().len(), 1);

        let dispatch = relay.on_mention(&mention("ping", None)).await;
        assert!(matches!(dispatch, Dispatch::Command(BuiltinCommand::Ping)));
    }

    #[tokio::test]
    async fn bounded_relay_still_serves_every_request() {
        let slack = Arc::new(FakeSlack {
            history: vec![raw("U1", "1700000000.000100", "hello")],
            ..FakeSlack::default()
        });
        let completion = Arc::new(FakeCompletion::new(Scripted::Reply("fine")));
        let mut bounded = settings(EmptyConversationPolicy::Skip);
        bounded.max_in_flight = Some(1);
        let relay = relay(&slack, &completion, bounded);

        let first = relay.on_mention(&mention("hello", Some(ANCHOR))).await;
        let second = relay
            .on_mention(&mention("hello again", Some(ANCHOR)))
            .await;
        join(first).await;
        join(second).await;

        assert_eq!(completion.calls().len(), 2);
        assert_eq!(slack.posts().len(), 2);
    }
}
