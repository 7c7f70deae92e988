pub mod render;
pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

pub use telegram::TelegramNotifier;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl NotifierError {
    /// Whether this failure means the bot lost access to the destination
    /// chat, as opposed to a transient server or network problem.
    pub fn is_access_error(&self) -> bool {
        let NotifierError::Api { code, description } = self else {
            return false;
        };
        if *code == 403 {
            return true;
        }
        if *code != 400 {
            return false;
        }
        let d = description.to_lowercase();
        [
            "chat not found",
            "channel private",
            "not enough rights",
            "need administrator rights",
            "have no rights",
            "bot was kicked",
            "bot was blocked",
            "not a member",
        ]
        .iter()
        .any(|p| d.contains(p))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    pub parse_html: bool,
    pub disable_preview: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            parse_html: true,
            disable_preview: false,
        }
    }
}

/// Sends rendered messages to a chat. Rate-limit retries live inside the
/// implementation; callers see only the final outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        opts: SendOptions,
    ) -> std::result::Result<(), NotifierError>;
}
