//! Built-in chat commands answered without consulting the model.

pub const HELP_REPLY: &str = "Hello, I'm a badly written AI bot. I send all messages in a slack \
thread to an LLM of my author's choice. My context is limited to the current thread. \
I do not store anything anywhere.";

pub const PONG_REPLY: &str = "Pong!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    Help,
    Ping,
}

impl BuiltinCommand {
    /// Matches mention text that has already had mention tokens stripped. Only exact,
    /// lowercase command words count; anything else goes to the model.
    pub fn parse(stripped: &str) -> Option<Self> {
        match stripped.trim() {
            "help" => Some(Self::Help),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn reply(self) -> &'static str {
        match self {
            Self::Help => HELP_REPLY,
            Self::Ping => PONG_REPLY,
        }
    }
}
