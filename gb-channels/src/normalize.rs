use crate::error::{Result, SlackError};
use crate::types::{Conversation, RawMessage, SenderClass, Turn, UserId};
use regex::Regex;

/// Matches user mentions such as `<@U092CPW681M>`. The character class is deliberately
/// narrow: uppercase letters and digits only.
const MENTION_PATTERN: &str = r"<@[A-Z0-9]+>";

/// Turns ordered thread messages into an alternating conversation from the bot's view.
#[derive(Debug, Clone)]
pub struct ConversationNormalizer {
    self_id: UserId,
    mention: Regex,
}

impl ConversationNormalizer {
    pub fn new(self_id: UserId) -> Result<Self> {
        if self_id.is_empty() {
            return Err(SlackError::InvalidInput(
                "bot user id is required to classify thread messages".to_string(),
            ));
        }
        let mention = Regex::new(MENTION_PATTERN)
            .map_err(|e| SlackError::InvalidInput(format!("mention pattern: {e}")))?;
        Ok(Self { self_id, mention })
    }

    /// Removes every mention token and trims surrounding whitespace.
    pub fn strip_mentions(&self, text: &str) -> String {
        self.mention.replace_all(text, "").trim().to_string()
    }

    pub fn classify(&self, message: &RawMessage) -> SenderClass {
        if message.author_id == self.self_id {
            SenderClass::Bot
        } else {
            SenderClass::Human
        }
    }

    /// Classifies `messages` (already in chronological order), drops human messages left
    /// empty after mention stripping and merges runs from the same sender into one
    /// newline-joined turn.
    pub fn normalize(&self, messages: &[RawMessage]) -> Conversation {
        let mut turns = Vec::new();
        let mut current: Option<(SenderClass, String)> = None;

        for message in messages {
            let sender = self.classify(message);
            let text = match sender {
                SenderClass::Human => self.strip_mentions(&message.text),
                SenderClass::Bot => message.text.clone(),
            };
            if sender == SenderClass::Human && text.is_empty() {
                continue;
            }

            if let Some((current_sender, current_text)) = current.as_mut() {
                if *current_sender == sender {
                    current_text.push('\n');
                    current_text.push_str(&text);
                    continue;
                }
            }
            if let Some((flushed_sender, flushed_text)) = current.take() {
                turns.push(Turn::new(flushed_sender, flushed_text));
            }
            current = Some((sender, text));
        }

        if let Some((sender, text)) = current {
            turns.push(Turn::new(sender, text));
        }

        Conversation::from_alternating(turns)
    }
}
