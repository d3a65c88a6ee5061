use crate::slack::compare_slack_timestamps;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(ChannelId);
id_newtype!(UserId);
id_newtype!(MessageTs);

impl MessageTs {
    /// Orders two platform timestamps by the instant they denote.
    pub fn cmp_chronological(&self, other: &MessageTs) -> Ordering {
        compare_slack_timestamps(self.as_str(), other.as_str())
    }
}

/// Who wrote a message, from the bot's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderClass {
    Human,
    Bot,
}

/// One normalized, sender-tagged unit of conversation text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    sender: SenderClass,
    text: String,
}

impl Turn {
    pub fn new(sender: SenderClass, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
        }
    }

    pub fn sender(&self) -> SenderClass {
        self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Turns ordered oldest first, with no two adjacent turns from the same sender.
///
/// Only the normalizer builds non-empty conversations, so the alternation holds for every
/// value of this type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub(crate) fn from_alternating(turns: Vec<Turn>) -> Self {
        debug_assert!(
            turns.windows(2).all(|w| w[0].sender != w[1].sender),
            "conversation turns must alternate"
        );
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Identifies one thread: the channel plus the timestamp of its root message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub channel: ChannelId,
    pub anchor: MessageTs,
}

impl ThreadKey {
    pub fn new(channel: impl Into<ChannelId>, anchor: impl Into<MessageTs>) -> Self {
        Self {
            channel: channel.into(),
            anchor: anchor.into(),
        }
    }

    /// Resolves the thread a message lives in. A message without a thread anchor starts
    /// its own thread.
    pub fn for_message(channel: ChannelId, ts: MessageTs, thread_ts: Option<MessageTs>) -> Self {
        let anchor = thread_ts.filter(|t| !t.is_empty()).unwrap_or(ts);
        Self { channel, anchor }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.anchor)
    }
}

/// A thread message as returned by the platform, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub author_id: UserId,
    pub text: String,
    pub ts: MessageTs,
    pub thread_ts: MessageTs,
}

impl RawMessage {
    pub fn belongs_to(&self, anchor: &MessageTs) -> bool {
        &self.thread_ts == anchor || &self.ts == anchor
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepliesPage {
    pub messages: Vec<RawMessage>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// An `app_mention` event addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMention {
    pub channel: ChannelId,
    pub user: Option<UserId>,
    pub text: String,
    pub ts: MessageTs,
    pub thread_ts: Option<MessageTs>,
}

impl AppMention {
    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey::for_message(self.channel.clone(), self.ts.clone(), self.thread_ts.clone())
    }
}
