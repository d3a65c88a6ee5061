use crate::error::Result;
use crate::types::{RepliesPage, ThreadKey};
use async_trait::async_trait;

/// Thread-scoped access to the chat platform.
///
/// Implementations must be safe to share between concurrently running relay tasks.
#[async_trait]
pub trait ThreadApi: Send + Sync {
    /// Fetch one page of replies to `key.anchor`, starting at `cursor` when given.
    async fn replies(
        &self,
        key: &ThreadKey,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RepliesPage>;

    /// Post `text` as a reply in the thread identified by `key`.
    async fn post(&self, key: &ThreadKey, text: &str) -> Result<()>;
}
