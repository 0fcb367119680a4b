//! Chat bot front end: long-poll loop and per-update handlers.

pub mod commands;

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use self::commands::*;
use crate::delivery::deliver;
use crate::media::{self, VIDEO_EXTENSIONS};
use crate::pipeline::{ProcessOptions, RequestPipeline};
use crate::stats::UsageStats;
use crate::subscribers::SubscriberStore;
use crate::transport::{
    CallbackQuery, ChatId, InlineButton, Message, Messenger, TelegramClient, Update,
};

/// Pause after a failed poll before polling again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Where updates come from. The Telegram client long-polls `getUpdates`.
pub trait UpdateSource {
    fn poll(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>>;
}

impl UpdateSource for TelegramClient {
    fn poll(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        self.get_updates(offset, timeout)
    }
}

pub struct BotService {
    messenger: Arc<dyn Messenger>,
    pipeline: RequestPipeline,
    subscribers: Arc<dyn SubscriberStore>,
    stats: Arc<UsageStats>,
    allowed_users: Vec<i64>,
    downloads_dir: PathBuf,
    bot_username: Option<String>,
}

impl BotService {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        pipeline: RequestPipeline,
        subscribers: Arc<dyn SubscriberStore>,
        stats: Arc<UsageStats>,
        downloads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            messenger,
            pipeline,
            subscribers,
            stats,
            allowed_users: Vec::new(),
            downloads_dir: downloads_dir.into(),
            bot_username: None,
        }
    }

    /// Restrict the bot to these user ids. Empty allows everyone.
    pub fn with_allowed_users(mut self, users: Vec<i64>) -> Self {
        self.allowed_users = users;
        self
    }

    /// Commands addressed to another bot (`/cmd@other`) are ignored.
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.bot_username = username;
        self
    }

    pub fn stats(&self) -> &UsageStats {
        &self.stats
    }

    fn is_allowed(&self, user_id: Option<i64>) -> bool {
        if self.allowed_users.is_empty() {
            return true;
        }
        user_id.is_some_and(|id| self.allowed_users.contains(&id))
    }

    pub fn handle_update(&mut self, update: &Update) -> Result<()> {
        if let Some(callback) = &update.callback_query {
            return self.handle_callback(callback);
        }
        match &update.message {
            Some(message) => self.handle_message(message),
            None => Ok(()),
        }
    }

    fn handle_callback(&mut self, callback: &CallbackQuery) -> Result<()> {
        self.messenger.answer_callback(&callback.id, None)?;
        let Some(chat_id) = callback.message.as_ref().map(|m| m.chat.id) else {
            return Ok(());
        };
        if !self.is_allowed(Some(callback.from.id)) {
            self.messenger.send_text(chat_id, DENIED_TEXT)?;
            return Ok(());
        }
        match callback.data.as_deref() {
            Some("stats") => self.send_stats(chat_id),
            Some("help") => self.messenger.send_text(chat_id, HELP_TEXT).map(|_| ()),
            other => {
                log::debug!("ignoring callback data {:?}", other);
                Ok(())
            }
        }
    }

    fn handle_message(&mut self, message: &Message) -> Result<()> {
        let chat_id = message.chat.id;
        let user_id = message.from.as_ref().map(|user| user.id);
        if !self.is_allowed(user_id) {
            log::warn!("user {:?} is not on the allow-list", user_id);
            self.messenger.send_text(chat_id, DENIED_TEXT)?;
            return Ok(());
        }

        if let Some(photo) = message
            .photo
            .iter()
            .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
        {
            log::info!("photo received from chat {}", chat_id);
            let dest = media::timestamped_path(&self.downloads_dir, "detection", "jpg");
            return self.process_upload(chat_id, &photo.file_id, &dest, PROCESSING_IMAGE_TEXT, true);
        }
        if let Some(video) = &message.video {
            log::info!("video received from chat {}", chat_id);
            let ext = video_extension(video.file_name.as_deref());
            let dest = media::timestamped_path(&self.downloads_dir, "video", &ext);
            return self.process_upload(chat_id, &video.file_id, &dest, PROCESSING_VIDEO_TEXT, false);
        }
        if message.document.is_some() {
            self.messenger.send_text(chat_id, DOCUMENT_TEXT)?;
            return Ok(());
        }

        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        match parse_command(text, self.bot_username.as_deref()) {
            Some(Command::Start) => {
                let buttons = [
                    InlineButton::new("Statistics", "stats"),
                    InlineButton::new("Help", "help"),
                ];
                self.messenger
                    .send_text_with_keyboard(chat_id, WELCOME_TEXT, &buttons)?;
            }
            Some(Command::Help) => {
                self.messenger.send_text(chat_id, HELP_TEXT)?;
            }
            Some(Command::Stats) => self.send_stats(chat_id)?,
            Some(Command::Subscribe) => {
                let reply = if self.subscribers.subscribe(chat_id)? {
                    log::info!("chat {} subscribed", chat_id);
                    SUBSCRIBED_TEXT
                } else {
                    ALREADY_SUBSCRIBED_TEXT
                };
                self.messenger.send_text(chat_id, reply)?;
            }
            Some(Command::Unsubscribe) => {
                let reply = if self.subscribers.unsubscribe(chat_id)? {
                    log::info!("chat {} unsubscribed", chat_id);
                    UNSUBSCRIBED_TEXT
                } else {
                    NOT_SUBSCRIBED_TEXT
                };
                self.messenger.send_text(chat_id, reply)?;
            }
            Some(Command::Unknown) => {
                self.messenger.send_text(chat_id, UNKNOWN_COMMAND_TEXT)?;
            }
            // Addressed to another bot in a group chat.
            None if text.trim_start().starts_with('/') => {
                log::debug!("ignoring command for another bot: {}", text);
            }
            None => {
                self.messenger.send_text(chat_id, PLAIN_TEXT_HINT)?;
            }
        }
        Ok(())
    }

    fn send_stats(&self, chat_id: ChatId) -> Result<()> {
        let text = stats_text(&self.stats.snapshot(), &self.pipeline.detector().describe());
        self.messenger.send_text(chat_id, &text).map(|_| ())
    }

    /// Download, process and reply, narrating progress in one status message
    /// that is removed on success and replaced by the error on failure.
    fn process_upload(
        &mut self,
        chat_id: ChatId,
        file_id: &str,
        dest: &Path,
        processing_text: &str,
        render_clip: bool,
    ) -> Result<()> {
        let status = self.messenger.send_text(chat_id, RECEIVED_TEXT)?;

        let outcome = self
            .messenger
            .download_file(file_id, dest)
            .and_then(|()| {
                self.messenger.edit_text(status, processing_text)?;
                self.pipeline.process(dest, ProcessOptions { render_clip })
            });
        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                log::error!("chat {} request failed: {:#}", chat_id, err);
                self.messenger.edit_text(status, &format!("Error: {err:#}"))?;
                return Ok(());
            }
        };

        self.stats.record(output.tally());
        self.messenger.edit_text(status, SENDING_TEXT)?;
        let clip_seconds = self.pipeline.renderer().duration_secs();
        let report = deliver(self.messenger.as_ref(), &[chat_id], &output, clip_seconds);
        if report.all_sent() {
            self.messenger.delete_message(status)?;
        } else {
            self.messenger.edit_text(
                status,
                &format!("Error: {} of the results could not be sent", report.failed),
            )?;
        }
        log::info!(
            "chat {} request completed: {} artifact(s) sent",
            chat_id,
            report.sent
        );
        Ok(())
    }
}

fn video_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "mp4".to_string())
}

/// Poll until `shutdown` is set. Handler failures are logged and the update
/// is skipped.
pub fn run_polling(
    source: &dyn UpdateSource,
    service: &mut BotService,
    poll_timeout: Duration,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut offset: Option<i64> = None;
    while !shutdown.load(Ordering::SeqCst) {
        let updates = match source.poll(offset, poll_timeout) {
            Ok(updates) => updates,
            Err(err) => {
                log::warn!("polling for updates failed: {:#}", err);
                std::thread::sleep(POLL_ERROR_BACKOFF);
                continue;
            }
        };
        for update in updates {
            offset = Some(update.update_id + 1);
            if let Err(err) = service.handle_update(&update) {
                log::error!("update {} failed: {:#}", update.update_id, err);
            }
        }
    }
    log::info!("bot polling stopped");
    Ok(())
}

/// Startup check that the token works; returns the bot's username.
pub fn identify(client: &TelegramClient) -> Result<Option<String>> {
    let me = client
        .get_me()
        .map_err(|err| anyhow!("bot token rejected: {:#}", err))?;
    log::info!(
        "bot connected as @{}",
        me.username.as_deref().unwrap_or("<unnamed>")
    );
    Ok(me.username)
}
