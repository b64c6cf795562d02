//! Configuration – reads/writes `~/.rover/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Supported decision-service providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    /// Any OpenAI-compatible `/v1/chat/completions` server.
    OpenAi,
}

impl Provider {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(Provider::Gemini),
            "openai" | "ollama" => Some(Provider::OpenAi),
            _ => None,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.5-flash",
            Provider::OpenAi => "llava",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Gemini => write!(f, "gemini"),
            Provider::OpenAi => write!(f, "openai"),
        }
    }
}

/// `[hardware]` – drive servos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Use simulated PWM channels and camera instead of real devices.
    pub simulate: bool,
    pub pwm_root: PathBuf,
    pub left_channel: u32,
    pub right_channel: u32,
    pub neutral_us: u32,
    pub speed_us: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            pwm_root: PathBuf::from("/sys/class/pwm"),
            left_channel: 0,
            right_channel: 1,
            neutral_us: rover_hal::NEUTRAL_US,
            speed_us: rover_hal::SPEED_US,
        }
    }
}

/// `[camera]` – still capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    /// Still-capture program, invoked with `--output <file>`.
    pub command: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 3280,
            height: 2464,
            command: "rpicam-still".to_string(),
        }
    }
}

/// Persisted user configuration stored in `~/.rover/config.toml`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Provider,

    /// Model name (e.g. "gemini-2.5-flash", "llava").
    pub model: String,

    /// API key for the provider (stored as plain text; the file is created
    /// owner-only).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Endpoint override.  Required for OpenAI-compatible servers other than
    /// a local Ollama.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Standing instruction added to every prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    pub image_logs_dir: PathBuf,
    pub action_logs_dir: PathBuf,
    pub max_image_side: u32,
    pub turn_dwell_ms: u64,

    pub hardware: HardwareConfig,
    pub camera: CameraConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("base_url", &self.base_url)
            .field("goal", &self.goal)
            .field("image_logs_dir", &self.image_logs_dir)
            .field("action_logs_dir", &self.action_logs_dir)
            .field("max_image_side", &self.max_image_side)
            .field("turn_dwell_ms", &self.turn_dwell_ms)
            .field("hardware", &self.hardware)
            .field("camera", &self.camera)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: Provider::default().default_model().to_string(),
            api_key: String::new(),
            base_url: None,
            goal: None,
            image_logs_dir: PathBuf::from("logs/images"),
            action_logs_dir: PathBuf::from("logs/actions"),
            max_image_side: rover_hal::DEFAULT_MAX_SIDE,
            turn_dwell_ms: 1000,
            hardware: HardwareConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

/// Return the path to `~/.rover/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rover").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config, falling back to defaults.  Environment overrides are
/// applied in both cases.
pub fn load_or_default() -> Result<Config, String> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVER_PROVIDER` | `provider` |
/// | `ROVER_MODEL` | `model` |
/// | `ROVER_API_KEY`, then `GEMINI_API_KEY` | `api_key` |
/// | `ROVER_BASE_URL` | `base_url` |
/// | `ROVER_GOAL` | `goal` |
/// | `ROVER_IMAGE_LOGS_DIR` | `image_logs_dir` |
/// | `ROVER_ACTION_LOGS_DIR` | `action_logs_dir` |
/// | `ROVER_SIMULATE` | `hardware.simulate` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("ROVER_PROVIDER").as_deref().and_then(Provider::parse) {
        cfg.provider = p;
    }
    if let Some(v) = var("ROVER_MODEL") {
        cfg.model = v;
    }
    if let Some(v) = var("ROVER_API_KEY").or_else(|| var("GEMINI_API_KEY")) {
        cfg.api_key = v;
    }
    if let Some(v) = var("ROVER_BASE_URL") {
        cfg.base_url = Some(v).filter(|s| !s.is_empty());
    }
    if let Some(v) = var("ROVER_GOAL") {
        cfg.goal = Some(v).filter(|s| !s.trim().is_empty());
    }
    if let Some(v) = var("ROVER_IMAGE_LOGS_DIR") {
        cfg.image_logs_dir = PathBuf::from(v);
    }
    if let Some(v) = var("ROVER_ACTION_LOGS_DIR") {
        cfg.action_logs_dir = PathBuf::from(v);
    }
    if let Some(v) = var("ROVER_SIMULATE")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.hardware.simulate = flag;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.rover/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
