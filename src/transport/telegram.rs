//! Telegram Bot API client over blocking HTTP.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use super::{ChatId, InlineButton, MessageRef, Messenger};
use crate::config::TelegramSettings;

/// Extra read time on top of the long-poll timeout.
const POLL_GRACE: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub video: Option<Video>,
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

pub struct TelegramClient {
    agent: ureq::Agent,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        let token = settings.require_token()?.to_string();
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(settings.poll_timeout + POLL_GRACE)
            .build();
        Ok(Self {
            agent,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let response = self.agent.post(&self.method_url(method)).send_json(body);
        parse_response(method, response)
    }

    /// Long-poll for updates after `offset`.
    pub fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let mut body = json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", body)
    }

    /// Bot identity, used at startup to check the token.
    pub fn get_me(&self) -> Result<User> {
        self.call("getMe", json!({}))
    }

    fn upload(
        &self,
        method: &str,
        field: &str,
        chat_id: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<()> {
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut file| file.read_to_end(&mut bytes))
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload");

        let mut form = MultipartForm::new();
        form.text("chat_id", &chat_id.to_string());
        if let Some(caption) = caption {
            form.text("caption", caption);
        }
        form.file(field, file_name, content_type_for(path), &bytes);
        let (content_type, body) = form.finish();

        let response = self
            .agent
            .post(&self.method_url(method))
            .set("Content-Type", &content_type)
            .send_bytes(&body);
        parse_response::<serde_json::Value>(method, response).map(|_| ())
    }
}

fn parse_response<T: DeserializeOwned>(
    method: &str,
    response: std::result::Result<ureq::Response, ureq::Error>,
) -> Result<T> {
    let parsed: ApiResponse<T> = match response {
        Ok(response) => response
            .into_json()
            .with_context(|| format!("{method}: invalid response body"))?,
        Err(ureq::Error::Status(code, response)) => {
            let description = response
                .into_json::<ApiResponse<serde_json::Value>>()
                .ok()
                .and_then(|body| body.description)
                .unwrap_or_else(|| "no description".to_string());
            return Err(anyhow!("{method}: HTTP {code}: {description}"));
        }
        // The request URL carries the token, so only the error kind is kept.
        Err(ureq::Error::Transport(transport)) => {
            return Err(anyhow!(
                "{method}: transport error: {}",
                transport
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| transport.kind().to_string())
            ));
        }
    };
    if !parsed.ok {
        return Err(anyhow!(
            "{method}: {}",
            parsed.description.unwrap_or_else(|| "request failed".to_string())
        ));
    }
    parsed
        .result
        .ok_or_else(|| anyhow!("{method}: response has no result"))
}

impl Messenger for TelegramClient {
    fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let message: Message = self.call("sendMessage", json!({ "chat_id": chat_id, "text": text }))?;
        Ok(message_ref(&message))
    }

    fn send_text_with_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[InlineButton],
    ) -> Result<MessageRef> {
        let row: Vec<_> = buttons
            .iter()
            .map(|b| json!({ "text": b.text, "callback_data": b.callback_data }))
            .collect();
        let message: Message = self.call(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
                "reply_markup": { "inline_keyboard": [row] },
            }),
        )?;
        Ok(message_ref(&message))
    }

    fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
        self.call::<serde_json::Value>(
            "editMessageText",
            json!({
                "chat_id": message.chat_id,
                "message_id": message.message_id,
                "text": text,
            }),
        )
        .map(|_| ())
    }

    fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.call::<serde_json::Value>(
            "deleteMessage",
            json!({ "chat_id": message.chat_id, "message_id": message.message_id }),
        )
        .map(|_| ())
    }

    fn send_photo(&self, chat_id: ChatId, path: &Path, caption: Option<&str>) -> Result<()> {
        self.upload("sendPhoto", "photo", chat_id, path, caption)
    }

    fn send_video(&self, chat_id: ChatId, path: &Path, caption: Option<&str>) -> Result<()> {
        if is_gif(path) {
            self.upload("sendAnimation", "animation", chat_id, path, caption)
        } else {
            self.upload("sendVideo", "video", chat_id, path, caption)
        }
    }

    fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<serde_json::Value>("answerCallbackQuery", body)
            .map(|_| ())
    }

    fn download_file(&self, file_id: &str, dest: &Path) -> Result<()> {
        let remote: RemoteFile = self.call("getFile", json!({ "file_id": file_id }))?;
        let file_path = remote
            .file_path
            .ok_or_else(|| anyhow!("getFile: no download path for {file_id}"))?;
        let response = self
            .agent
            .get(&self.file_url(&file_path))
            .call()
            .map_err(|err| anyhow!("download {file_id}: {}", err.kind()))?;
        let mut out =
            File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?;
        std::io::copy(&mut response.into_reader(), &mut out)
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(())
    }
}

fn message_ref(message: &Message) -> MessageRef {
    MessageRef {
        chat_id: message.chat.id,
        message_id: message.message_id,
    }
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Minimal `multipart/form-data` body builder.
struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    fn new() -> Self {
        let boundary = format!("----pose-relay-{:016x}", rand::thread_rng().gen::<u64>());
        Self {
            boundary,
            body: Vec::new(),
        }
    }

    fn text(&mut self, name: &str, value: &str) {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
    }

    fn file(&mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) {
        let file_name = file_name.replace('"', "_");
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
    }

    fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_has_fields_and_terminator() {
        let mut form = MultipartForm::new();
        form.text("chat_id", "42");
        form.file("photo", "a.jpg", "image/jpeg", b"JPEGDATA");
        let boundary = form.boundary.clone();
        let (content_type, body) = form.finish();
        let text = String::from_utf8_lossy(&body);
        assert_eq!(content_type, format!("multipart/form-data; boundary={boundary}"));
        assert!(text.contains("name=\"chat_id\"\r\n\r\n42\r\n"));
        assert!(text.contains("filename=\"a.jpg\"\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn parses_photo_update() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 7,
            "message": {
                "message_id": 3,
                "chat": { "id": 99, "type": "private" },
                "from": { "id": 5, "is_bot": false, "first_name": "Ana" },
                "photo": [
                    { "file_id": "small", "width": 90, "height": 60 },
                    { "file_id": "big", "width": 900, "height": 600, "file_size": 1000 }
                ]
            }
        }))
        .unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 99);
        assert_eq!(message.photo.len(), 2);
        assert!(message.text.is_none());
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("x.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("x.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("x")), "application/octet-stream");
    }
}
