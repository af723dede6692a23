use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "RBX_PLAYER_COUNT_CONFIG";
const CONFIG_DIR_NAME: &str = "rbx-player-count";
const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;
const MIN_REFRESH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Plugin-wide configuration. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub refresh_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub universes_base_url: String,
    pub thumbnails_base_url: String,
    pub games_base_url: String,
    pub game_page_base_url: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_level: LogLevel::default(),
            log_file: None,
            universes_base_url: "https://apis.roblox.com".to_string(),
            thumbnails_base_url: "https://thumbnails.roblox.com".to_string(),
            games_base_url: "https://games.roblox.com".to_string(),
            game_page_base_url: "https://www.roblox.com/games".to_string(),
        }
    }
}

impl PluginConfig {
    /// Loads the config from the env override or the user config dir.
    ///
    /// A missing file means defaults. A broken one is an error; callers fall
    /// back to defaults once logging is up to report it.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: PluginConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.refresh_interval_ms = self.refresh_interval_ms.max(MIN_REFRESH_INTERVAL_MS);
        for url in [
            &mut self.universes_base_url,
            &mut self.thumbnails_base_url,
            &mut self.games_base_url,
            &mut self.game_page_base_url,
        ] {
            let trimmed = url.trim_end_matches('/').len();
            url.truncate(trimmed);
        }
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn game_page_url(&self, place_id: u64) -> String {
        format!("{}/{}/", self.game_page_base_url, place_id)
    }
}

fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
