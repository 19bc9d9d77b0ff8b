mod config;

pub use config::{
    limits, AttentionSettings, AudioSettings, BubbleSettings, FlashSettings, LimitSettings,
    OverlaySettings, PlayerSettings, RampSettings, SafetySettings, Settings, StartleSettings,
    SubliminalSettings, TimeWindowSettings, TintSettings,
};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/flashdeck[-dev]/` based on FLASHDECK_ENV.
///
/// Set FLASHDECK_ENV=dev to use the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    let env = std::env::var("FLASHDECK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("flashdeck-dev")
    } else {
        base_dir.join("flashdeck")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::NoDataDir(e.to_string()))?;
    Ok(dir)
}
