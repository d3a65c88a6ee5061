use crate::traits::ThreadApi;
use crate::types::{MessageTs, RawMessage, ThreadKey};
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_PAGE_LIMIT: usize = 900;
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Collects every message of one thread across `conversations.replies` pages.
#[derive(Clone)]
pub struct ThreadFetcher {
    api: Arc<dyn ThreadApi>,
    page_limit: usize,
}

impl ThreadFetcher {
    pub fn new(api: Arc<dyn ThreadApi>) -> Self {
        Self {
            api,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    /// Returns the thread's messages oldest first.
    ///
    /// A failed page request ends pagination: the messages gathered before it are still
    /// returned, so an empty result may mean the very first page failed.
    #[tracing::instrument(level = "info", skip_all, fields(thread = %key))]
    pub async fn fetch(&self, key: &ThreadKey) -> Vec<RawMessage> {
        let mut collected: Vec<RawMessage> = Vec::new();
        let mut seen: HashSet<MessageTs> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = match self
                .api
                .replies(key, cursor.as_deref(), self.page_limit)
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    tracing::warn!(
                        %error,
                        pages_fetched = pages,
                        messages_kept = collected.len(),
                        "thread replies fetch failed; truncating history"
                    );
                    break;
                }
            };
            pages += 1;
            tracing::debug!(page = pages, count = page.messages.len(), "fetched replies page");

            for message in page.messages {
                if message.belongs_to(&key.anchor) && seen.insert(message.ts.clone()) {
                    collected.push(message);
                }
            }

            if !page.has_more {
                break;
            }
            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                other => {
                    tracing::warn!(
                        next_cursor = ?other,
                        "replies page reported more results without a new cursor; stopping"
                    );
                    break;
                }
            }
        }

        collected.sort_by(|left, right| left.ts.cmp_chronological(&right.ts));
        tracing::info!(pages, messages = collected.len(), "thread history collected");
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadFetcher;
    use crate::error::{Result, SlackError};
    use crate::traits::ThreadApi;
    use crate::types::{RawMessage, RepliesPage, ThreadKey};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Serves pre-built pages keyed by cursor; `None` is the first page.
    struct PagedApi {
        pages: HashMap<Option<String>, Result<RepliesPage>>,
        calls: Mutex<Vec<(Option<String>, usize)>>,
    }

    impl PagedApi {
        fn new(pages: Vec<(Option<&str>, Result<RepliesPage>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(cursor, page)| (cursor.map(str::to_string), page))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn cursors_requested(&self) -> Vec<Option<String>> {
            self.calls
                .lock()
                .expect("calls lock")
                .iter()
                .map(|(cursor, _)| cursor.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl ThreadApi for PagedApi {
        async fn replies(
            &self,
            _key: &ThreadKey,
            cursor: Option<&str>,
            limit: usize,
        ) -> Result<RepliesPage> {
            let cursor = cursor.map(str::to_string);
            self.calls
                .lock()
                .expect("calls lock")
                .push((cursor.clone(), limit));
            match self.pages.get(&cursor) {
                Some(Ok(page)) => Ok(page.clone()),
                Some(Err(error)) => Err(SlackError::Http(error.to_string())),
                None => Err(SlackError::Http(format!("no page for cursor {cursor:?}"))),
            }
        }

        async fn post(&self, _key: &ThreadKey, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    const ANCHOR: &str = "1700000000.000100";

    fn msg(ts: &str, thread_ts: &str) -> RawMessage {
        RawMessage {
            author_id: "U1".into(),
            text: format!("text {ts}"),
            ts: ts.into(),
            thread_ts: thread_ts.into(),
        }
    }

    fn page(messages: Vec<RawMessage>, next: Option<&str>) -> RepliesPage {
        RepliesPage {
            messages,
            has_more: next.is_some(),
            next_cursor: next.map(str::to_string),
        }
    }

    fn key() -> ThreadKey {
        ThreadKey::new("C1", ANCHOR)
    }

    fn timestamps(messages: &[RawMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.ts.as_str()).collect()
    }

    #[tokio::test]
    async fn fetch_unions_pages_sorted_without_duplicates() {
        let api = Arc::new(PagedApi::new(vec![
            (
                None,
                Ok(page(
                    vec![
                        msg("1700000000.000900", ANCHOR),
                        msg(ANCHOR, ANCHOR),
                        msg("1700000000.000500", ANCHOR),
                    ],
                    Some("p2"),
                )),
            ),
            (
                Some("p2"),
                Ok(page(
                    vec![
                        msg("1700000000.000300", ANCHOR),
                        msg("1700000000.000900", ANCHOR),
                    ],
                    Some("p3"),
                )),
            ),
            (
                Some("p3"),
                Ok(page(vec![msg("1700000000.000200", ANCHOR)], None)),
            ),
        ]));

        let fetched = ThreadFetcher::new(api.clone()).fetch(&key()).await;
        assert_eq!(
            timestamps(&fetched),
            vec![
                ANCHOR,
                "1700000000.000200",
                "1700000000.000300",
                "1700000000.000500",
                "1700000000.000900",
            ]
        );
        assert_eq!(
            api.cursors_requested(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
    }

    #[tokio::test]
    async fn fetch_excludes_messages_from_other_threads() {
        let api = Arc::new(PagedApi::new(vec![(
            None,
            Ok(page(
                vec![
                    msg(ANCHOR, ANCHOR),
                    msg("1700000000.000200", "1600000000.000001"),
                    msg("1700000000.000300", ANCHOR),
                ],
                None,
            )),
        )]));

        let fetched = ThreadFetcher::new(api).fetch(&key()).await;
        assert_eq!(timestamps(&fetched), vec![ANCHOR, "1700000000.000300"]);
    }

    #[tokio::test]
    async fn fetch_keeps_earlier_pages_when_a_later_page_fails() {
        let api = Arc::new(PagedApi::new(vec![
            (
                None,
                Ok(page(
                    vec![msg("1700000000.000300", ANCHOR), msg(ANCHOR, ANCHOR)],
                    Some("p2"),
                )),
            ),
            (
                Some("p2"),
                Err(SlackError::Http("connection reset".to_string())),
            ),
            (
                Some("p3"),
                Ok(page(vec![msg("1700000000.000400", ANCHOR)], None)),
            ),
        ]));

        let fetched = ThreadFetcher::new(api.clone()).fetch(&key()).await;
        assert_eq!(timestamps(&fetched), vec![ANCHOR, "1700000000.000300"]);
        assert_eq!(api.cursors_requested().len(), 2);
    }

    #[tokio::test]
    async fn fetch_returns_empty_when_first_page_fails() {
        let api = Arc::new(PagedApi::new(vec![(
            None,
            Err(SlackError::Api {
                method: "conversations.replies".to_string(),
                error: "thread_not_found".to_string(),
            }),
        )]));
        assert!(ThreadFetcher::new(api).fetch(&key()).await.is_empty());
    }

    #[tokio::test]
    async fn fetch_stops_when_cursor_repeats() {
        let api = Arc::new(PagedApi::new(vec![
            (None, Ok(page(vec![msg(ANCHOR, ANCHOR)], Some("loop")))),
            (
                Some("loop"),
                Ok(page(vec![msg("1700000000.000200", ANCHOR)], Some("loop"))),
            ),
        ]));
        let fetched = ThreadFetcher::new(api.clone()).fetch(&key()).await;
        assert_eq!(fetched.len(), 2);
        assert_eq!(api.cursors_requested().len(), 2);
    }

    #[tokio::test]
    async fn page_limit_is_clamped_and_forwarded() {
        let api = Arc::new(PagedApi::new(vec![(None, Ok(page(vec![], None)))]));
        let fetcher = ThreadFetcher::new(api.clone()).with_page_limit(5000);
        assert_eq!(fetcher.page_limit(), 1000);
        fetcher.fetch(&key()).await;
        let calls = api.calls.lock().expect("calls lock");
        assert_eq!(calls[0].1, 1000);
    }
}
