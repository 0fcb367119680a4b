use regex::Regex;
use std::sync::OnceLock;

use crate::stats::{format_uptime, UsageSnapshot};

pub const RECEIVED_TEXT: &str = "Detection received. Analysing posture...";
pub const PROCESSING_IMAGE_TEXT: &str = "Processing image...";
pub const PROCESSING_VIDEO_TEXT: &str = "Processing video...";
pub const SENDING_TEXT: &str = "Sending results...";
pub const DENIED_TEXT: &str = "Sorry, you are not allowed to use this bot.";
pub const DOCUMENT_TEXT: &str =
    "I received a document. Please send videos as video files, not as documents.";
pub const SUBSCRIBED_TEXT: &str = "You are subscribed to notifications.";
pub const ALREADY_SUBSCRIBED_TEXT: &str = "You were already subscribed.";
pub const UNSUBSCRIBED_TEXT: &str = "You are unsubscribed from notifications.";
pub const NOT_SUBSCRIBED_TEXT: &str = "You were not subscribed.";
pub const PLAIN_TEXT_HINT: &str = "Send me a photo or a video and I will analyse the poses in it.";
pub const UNKNOWN_COMMAND_TEXT: &str = "Unknown command. Send /help for the list of commands.";

pub const WELCOME_TEXT: &str = "Human pose detection bot

Send a photo or a video with people in it and I will analyse their posture.

Commands:
/start - start the bot
/help - help
/stats - usage statistics
/subscribe - receive detections from the API
/unsubscribe - stop receiving detections";

pub const HELP_TEXT: &str = "How to use this bot

1. Send a photo with people in it
2. Or send a short video
3. Skeletons and posture labels are detected automatically

Supported formats:
- Images: JPG, PNG
- Videos: MP4, AVI, MOV, MKV, GIF

You will receive:
- the original image
- the image with detected skeletons
- a short detection clip

Commands:
/start - start the bot
/help - show this help
/stats - usage statistics
/subscribe - receive detections from the API
/unsubscribe - stop receiving detections";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Stats,
    Subscribe,
    Unsubscribe,
    Unknown,
}

fn command_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/([A-Za-z0-9_]+)(?:@([A-Za-z0-9_]+))?(?:\s|$)").ok())
        .as_ref()
}

/// Parse a slash command. `None` for plain text and for commands addressed
/// to a different bot.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let caps = command_regex()?.captures(text.trim())?;
    if let (Some(target), Some(me)) = (caps.get(2), bot_username) {
        if !target.as_str().eq_ignore_ascii_case(me) {
            return None;
        }
    }
    let name = caps.get(1)?.as_str().to_ascii_lowercase();
    Some(match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "stats" => Command::Stats,
        "subscribe" => Command::Subscribe,
        "unsubscribe" => Command::Unsubscribe,
        _ => Command::Unknown,
    })
}

pub fn stats_text(snapshot: &UsageSnapshot, detector: &str) -> String {
    format!(
        "Bot statistics

Images processed: {}
Videos processed: {}
Persons detected: {}
Uptime: {}

Detector: {}",
        snapshot.total_images,
        snapshot.total_videos,
        snapshot.total_persons_detected,
        format_uptime(snapshot.uptime),
        detector
    )
}
