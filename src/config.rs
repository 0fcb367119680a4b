use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pose::{Fallback, PostureThresholds, Topology};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_OUTPUTS_DIR: &str = "outputs";
const DEFAULT_SUBSCRIBERS_FILE: &str = "subscribers.json";
const DEFAULT_CONF_THRESHOLD: f32 = 0.3;
const DEFAULT_CLIP_FPS: u32 = 15;
const DEFAULT_CLIP_SECS: f32 = 5.0;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    telegram: Option<TelegramConfigFile>,
    api: Option<ApiConfigFile>,
    paths: Option<PathsConfigFile>,
    pose: Option<PoseConfigFile>,
    clip: Option<ClipConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    bot_token: Option<String>,
    chat_id: Option<i64>,
    allowed_users: Option<Vec<i64>>,
    api_base: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PathsConfigFile {
    outputs_dir: Option<PathBuf>,
    subscribers_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PoseConfigFile {
    topology: Option<String>,
    model_path: Option<PathBuf>,
    device: Option<String>,
    conf_threshold: Option<f32>,
    fallback: Option<Fallback>,
    thresholds: Option<PostureThresholds>,
}

#[derive(Debug, Deserialize, Default)]
struct ClipConfigFile {
    fps: Option<u32>,
    duration_secs: Option<f32>,
    format: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub telegram: TelegramSettings,
    pub api: ApiSettings,
    pub paths: PathSettings,
    pub pose: PoseSettings,
    pub clip: ClipSettings,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    /// Fixed recipient for `pose_trigger`.
    pub chat_id: Option<i64>,
    /// Empty means every user may talk to the bot.
    pub allowed_users: Vec<i64>,
    pub api_base: String,
    pub poll_timeout: Duration,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            allowed_users: Vec::new(),
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            poll_timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        }
    }
}

impl TelegramSettings {
    pub fn require_token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN is not set"))
    }

    pub fn require_chat_id(&self) -> Result<i64> {
        self.chat_id
            .ok_or_else(|| anyhow!("TELEGRAM_CHAT_ID is not set"))
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathSettings {
    pub outputs_dir: PathBuf,
    pub subscribers_file: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            outputs_dir: PathBuf::from(DEFAULT_OUTPUTS_DIR),
            subscribers_file: PathBuf::from(DEFAULT_SUBSCRIBERS_FILE),
        }
    }
}

impl PathSettings {
    pub fn under(outputs_dir: impl Into<PathBuf>) -> Self {
        let outputs_dir = outputs_dir.into();
        Self {
            subscribers_file: outputs_dir.join(DEFAULT_SUBSCRIBERS_FILE),
            outputs_dir,
        }
    }

    /// Downloads from chat front ends.
    pub fn detections_dir(&self) -> PathBuf {
        self.outputs_dir.join("detections")
    }

    /// Annotated stills.
    pub fn poses_dir(&self) -> PathBuf {
        self.outputs_dir.join("poses")
    }

    /// Clips and annotated videos.
    pub fn videos_dir(&self) -> PathBuf {
        self.outputs_dir.join("videos")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.detections_dir(), self.poses_dir(), self.videos_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl Device {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(anyhow!("unknown device '{}', expected cpu or cuda", other)),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        })
    }
}

#[derive(Debug, Clone)]
pub struct PoseSettings {
    pub topology: Topology,
    /// No model means the simulated backend.
    pub model_path: Option<PathBuf>,
    pub device: Device,
    pub conf_threshold: f32,
    pub fallback: Fallback,
    pub thresholds: PostureThresholds,
}

impl Default for PoseSettings {
    fn default() -> Self {
        Self {
            topology: Topology::Coco17,
            model_path: None,
            device: Device::Cpu,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            fallback: Fallback::Simulated,
            thresholds: PostureThresholds::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipFormat {
    Mp4,
    Gif,
}

impl ClipFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Ok(ClipFormat::Mp4),
            "gif" => Ok(ClipFormat::Gif),
            other => Err(anyhow!("unknown clip format '{}', expected mp4 or gif", other)),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ClipFormat::Mp4 => "mp4",
            ClipFormat::Gif => "gif",
        }
    }
}

impl Default for ClipFormat {
    fn default() -> Self {
        if cfg!(feature = "video-ffmpeg") {
            ClipFormat::Mp4
        } else {
            ClipFormat::Gif
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClipSettings {
    pub fps: u32,
    pub duration_secs: f32,
    pub format: ClipFormat,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_CLIP_FPS,
            duration_secs: DEFAULT_CLIP_SECS,
            format: ClipFormat::default(),
        }
    }
}

impl RelayConfig {
    /// Defaults, then the TOML file named by `POSE_CONFIG`, then environment.
    pub fn load() -> Result<Self> {
        let config_path = env_value("POSE_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with the config file given explicitly.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(telegram) = file.telegram {
            cfg.telegram.bot_token = telegram.bot_token.or(cfg.telegram.bot_token);
            cfg.telegram.chat_id = telegram.chat_id.or(cfg.telegram.chat_id);
            if let Some(users) = telegram.allowed_users {
                cfg.telegram.allowed_users = users;
            }
            if let Some(base) = telegram.api_base {
                cfg.telegram.api_base = base;
            }
            if let Some(secs) = telegram.poll_timeout_secs {
                cfg.telegram.poll_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(addr) = file.api.and_then(|api| api.addr) {
            cfg.api.addr = addr;
        }
        if let Some(paths) = file.paths {
            if let Some(dir) = paths.outputs_dir {
                cfg.paths.outputs_dir = dir;
            }
            if let Some(path) = paths.subscribers_file {
                cfg.paths.subscribers_file = path;
            }
        }
        if let Some(pose) = file.pose {
            if let Some(topology) = pose.topology {
                cfg.pose.topology = Topology::parse(&topology)?;
            }
            cfg.pose.model_path = pose.model_path;
            if let Some(device) = pose.device {
                cfg.pose.device = Device::parse(&device)?;
            }
            if let Some(threshold) = pose.conf_threshold {
                cfg.pose.conf_threshold = threshold;
            }
            if let Some(fallback) = pose.fallback {
                cfg.pose.fallback = fallback;
            }
            if let Some(thresholds) = pose.thresholds {
                cfg.pose.thresholds = thresholds;
            }
        }
        if let Some(clip) = file.clip {
            if let Some(fps) = clip.fps {
                cfg.clip.fps = fps;
            }
            if let Some(secs) = clip.duration_secs {
                cfg.clip.duration_secs = secs;
            }
            if let Some(format) = clip.format {
                cfg.clip.format = ClipFormat::parse(&format)?;
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(token) = env_value("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = env_value("TELEGRAM_CHAT_ID") {
            let chat_id = chat_id
                .parse()
                .map_err(|_| anyhow!("TELEGRAM_CHAT_ID must be an integer chat id"))?;
            self.telegram.chat_id = Some(chat_id);
        }
        if let Some(users) = env_value("TELEGRAM_ALLOWED_USERS") {
            self.telegram.allowed_users = split_csv(&users)
                .iter()
                .map(|entry| {
                    entry.parse::<i64>().map_err(|_| {
                        anyhow!("TELEGRAM_ALLOWED_USERS entry '{}' is not a user id", entry)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(base) = env_value("TELEGRAM_API_BASE") {
            self.telegram.api_base = base;
        }
        if let Some(addr) = env_value("POSE_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(dir) = env_value("POSE_OUTPUTS_DIR") {
            self.paths.outputs_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_value("POSE_SUBSCRIBERS_FILE") {
            self.paths.subscribers_file = PathBuf::from(path);
        }
        if let Some(topology) = env_value("POSE_TOPOLOGY") {
            self.pose.topology = Topology::parse(&topology)?;
        }
        if let Some(path) = env_value("POSE_MODEL_PATH") {
            self.pose.model_path = Some(PathBuf::from(path));
        }
        if let Some(device) = env_value("POSE_DEVICE") {
            self.pose.device = Device::parse(&device)?;
        }
        if let Some(threshold) = env_value("POSE_CONF_THRESHOLD") {
            self.pose.conf_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("POSE_CONF_THRESHOLD must be a number"))?;
        }
        if let Some(format) = env_value("POSE_CLIP_FORMAT") {
            self.clip.format = ClipFormat::parse(&format)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pose.conf_threshold) {
            return Err(anyhow!(
                "conf_threshold must be within [0, 1], got {}",
                self.pose.conf_threshold
            ));
        }
        let t = &self.pose.thresholds;
        let ratios = [
            t.min_span_px,
            t.upright_ratio,
            t.bent_ratio,
            t.upright_leg_ratio,
            t.bent_leg_ratio,
        ];
        if ratios.iter().any(|value| !(*value > 0.0)) {
            return Err(anyhow!("posture thresholds must be positive"));
        }
        if t.upright_ratio <= t.bent_ratio || t.upright_leg_ratio <= t.bent_leg_ratio {
            return Err(anyhow!(
                "upright thresholds must be greater than the bent thresholds"
            ));
        }
        if self.clip.fps == 0 {
            return Err(anyhow!("clip fps must be at least 1"));
        }
        if !(self.clip.duration_secs > 0.0) {
            return Err(anyhow!("clip duration must be greater than zero"));
        }
        url::Url::parse(&self.telegram.api_base)
            .with_context(|| format!("invalid Telegram API base '{}'", self.telegram.api_base))?;
        self.telegram.api_base = self.telegram.api_base.trim_end_matches('/').to_string();
        self.api
            .addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid api addr '{}', expected ip:port", self.api.addr))?;
        if self.pose.device == Device::Cuda {
            log::warn!("device cuda requested; the tract runtime is CPU-only, running on cpu");
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        log::info!(
            "pose: topology={} model={} device={} threshold={:.2} fallback={:?}",
            self.pose.topology,
            self.pose
                .model_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<simulated>".to_string()),
            self.pose.device,
            self.pose.conf_threshold,
            self.pose.fallback
        );
        log::info!(
            "outputs={} subscribers={} clip={}fps x {}s ({})",
            self.paths.outputs_dir.display(),
            self.paths.subscribers_file.display(),
            self.clip.fps,
            self.clip.duration_secs,
            self.clip.format.extension()
        );
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
