//! Outbound chat transport.
//!
//! Front ends talk to recipients through the `Messenger` trait. The Telegram
//! Bot API client is the production implementation; `RecordingMessenger`
//! keeps everything in memory.

pub mod recording;
pub mod telegram;

use anyhow::Result;
use std::path::Path;

pub use recording::{RecordingMessenger, Sent};
pub use telegram::{
    CallbackQuery, Chat, Document, Message, PhotoSize, TelegramClient, Update, User, Video,
};

/// Chat identifier (user, group or channel).
pub type ChatId = i64;

/// Handle to a message already sent, for later edits or deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: &str, callback_data: &str) -> Self {
        Self {
            text: text.to_string(),
            callback_data: callback_data.to_string(),
        }
    }
}

pub trait Messenger: Send + Sync {
    fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    /// Text with one row of inline buttons.
    fn send_text_with_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[InlineButton],
    ) -> Result<MessageRef>;

    fn edit_text(&self, message: MessageRef, text: &str) -> Result<()>;

    fn delete_message(&self, message: MessageRef) -> Result<()>;

    fn send_photo(&self, chat_id: ChatId, path: &Path, caption: Option<&str>) -> Result<()>;

    /// MP4 goes out as a video; GIF as an animation.
    fn send_video(&self, chat_id: ChatId, path: &Path, caption: Option<&str>) -> Result<()>;

    fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Fetch an inbound attachment to `dest`.
    fn download_file(&self, file_id: &str, dest: &Path) -> Result<()>;
}
