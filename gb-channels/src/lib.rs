//! Slack plumbing for grumpybot.
//!
//! Holds the thread message model, the Web API client, thread history collection,
//! conversation normalization and the Socket Mode event transport.

mod error;
mod fetcher;
mod normalize;
mod slack;
mod socket_mode;
mod traits;
mod types;

pub use error::{Result, SlackError};
pub use fetcher::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, ThreadFetcher};
pub use normalize::ConversationNormalizer;
pub use slack::SlackWebClient;
pub use socket_mode::{SocketEvent, SocketFrame, SocketModeClient, parse_frame};
pub use traits::ThreadApi;
pub use types::{
    AppMention, ChannelId, Conversation, MessageTs, RawMessage, RepliesPage, SenderClass,
    ThreadKey, Turn, UserId,
};
