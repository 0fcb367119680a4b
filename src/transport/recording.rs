use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use super::{ChatId, InlineButton, MessageRef, Messenger};

/// One outbound call seen by `RecordingMessenger`.
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Text {
        chat_id: ChatId,
        text: String,
        buttons: Vec<InlineButton>,
    },
    Edit {
        message: MessageRef,
        text: String,
    },
    Delete {
        message: MessageRef,
    },
    Photo {
        chat_id: ChatId,
        path: PathBuf,
        caption: Option<String>,
    },
    Video {
        chat_id: ChatId,
        path: PathBuf,
        caption: Option<String>,
    },
    CallbackAnswer {
        callback_id: String,
        text: Option<String>,
    },
}

impl Sent {
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            Sent::Text { chat_id, .. } | Sent::Photo { chat_id, .. } | Sent::Video { chat_id, .. } => {
                Some(*chat_id)
            }
            Sent::Edit { message, .. } | Sent::Delete { message } => Some(message.chat_id),
            Sent::CallbackAnswer { .. } => None,
        }
    }
}

/// In-memory messenger. Uploads and downloads work against local files;
/// chats marked failing reject every send.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    files: Mutex<HashMap<String, PathBuf>>,
    failing: Mutex<HashSet<ChatId>>,
    next_message_id: AtomicI64,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `file_id` downloadable from `source`.
    pub fn register_file(&self, file_id: &str, source: impl Into<PathBuf>) {
        lock(&self.files).insert(file_id.to_string(), source.into());
    }

    pub fn fail_chat(&self, chat_id: ChatId) {
        lock(&self.failing).insert(chat_id);
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|sent| sent.chat_id() == Some(chat_id))
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }

    fn check_chat(&self, chat_id: ChatId) -> Result<()> {
        if lock(&self.failing).contains(&chat_id) {
            return Err(anyhow!("chat {chat_id} rejected the message"));
        }
        Ok(())
    }

    fn record(&self, sent: Sent) {
        lock(&self.sent).push(sent);
    }

    fn next_ref(&self, chat_id: ChatId) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Messenger for RecordingMessenger {
    fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.send_text_with_keyboard(chat_id, text, &[])
    }

    fn send_text_with_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[InlineButton],
    ) -> Result<MessageRef> {
        self.check_chat(chat_id)?;
        self.record(Sent::Text {
            chat_id,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(self.next_ref(chat_id))
    }

    fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
        self.check_chat(message.chat_id)?;
        self.record(Sent::Edit {
            message,
            text: text.to_string(),
        });
        Ok(())
    }

    fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.check_chat(message.chat_id)?;
        self.record(Sent::Delete { message });
        Ok(())
    }

    fn send_photo(&self, chat_id: ChatId, path: &Path, caption: Option<&str>) -> Result<()> {
        self.check_chat(chat_id)?;
        if !path.is_file() {
            return Err(anyhow!("photo {} does not exist", path.display()));
        }
        self.record(Sent::Photo {
            chat_id,
            path: path.to_path_buf(),
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    fn send_video(&self, chat_id: ChatId, path: &Path, caption: Option<&str>) -> Result<()> {
        self.check_chat(chat_id)?;
        if !path.is_file() {
            return Err(anyhow!("video {} does not exist", path.display()));
        }
        self.record(Sent::Video {
            chat_id,
            path: path.to_path_buf(),
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.record(Sent::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }

    fn download_file(&self, file_id: &str, dest: &Path) -> Result<()> {
        let source = lock(&self.files)
            .get(file_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown file id {file_id}"))?;
        std::fs::copy(&source, dest)
            .with_context(|| format!("failed to copy {} to {}", source.display(), dest.display()))?;
        Ok(())
    }
}
