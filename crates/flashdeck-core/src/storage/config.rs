//! TOML-based engine settings.
//!
//! Stores per-effect frequencies, durations, limits and danger flags, plus
//! the player's level and XP written back by the progression engine.
//!
//! Settings are stored at `~/.config/flashdeck/settings.toml`.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Hard caps that no settings file can exceed.
pub mod limits {
    pub const MAX_IMAGES_ON_SCREEN: u32 = 20;
    pub const MAX_VIDEOS_PER_HOUR: f64 = 20.0;
    pub const MAX_FLASHES_PER_MIN: f64 = 10.0;
    pub const MAX_SUBLIMINALS_PER_MIN: f64 = 30.0;
    pub const MAX_ATTENTION_DENSITY: u32 = 10;
    pub const MAX_BUBBLES: u32 = 8;
}

const DEFAULT_TEXTS: [&str; 6] = ["RELAX", "BREATHE", "FOCUS", "LET GO", "STAY", "GOOD JOB"];

fn default_pool() -> BTreeMap<String, bool> {
    DEFAULT_TEXTS.iter().map(|t| (t.to_string(), true)).collect()
}

fn default_true() -> bool {
    true
}

/// Image flash configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashSettings {
    pub enabled: bool,
    /// Flashes per minute.
    pub freq_per_min: f64,
    /// Images shown per flash (±1 random variance).
    pub images_per_flash: u32,
    /// Maximum images on screen, including hydra spawns.
    pub hydra_limit: u32,
    pub clickable: bool,
    /// Clicking an image spawns replacements ("hydra").
    pub corruption: bool,
    pub image_scale: f64,
    pub image_alpha: f64,
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            freq_per_min: 2.0,
            images_per_flash: 5,
            hydra_limit: 20,
            clickable: true,
            corruption: false,
            image_scale: 0.9,
            image_alpha: 1.0,
        }
    }
}

/// Mandatory video configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartleSettings {
    pub enabled: bool,
    /// Videos per hour.
    pub freq_per_hour: f64,
    /// Strict lock: the video cannot be dismissed and the host UI is hidden.
    pub strict: bool,
    /// Fire a strict video shortly after the session starts.
    pub force_on_launch: bool,
}

impl Default for StartleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            freq_per_hour: 6.0,
            strict: false,
            force_on_launch: false,
        }
    }
}

/// Subliminal text configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubliminalSettings {
    pub enabled: bool,
    /// Messages per minute.
    pub freq_per_min: f64,
    /// Display length in frames (~16.6 ms each).
    pub duration_frames: u32,
    pub opacity: f64,
    /// Text -> active.
    pub pool: BTreeMap<String, bool>,
    pub audio_enabled: bool,
    pub audio_volume: f64,
}

impl Default for SubliminalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            freq_per_min: 5.0,
            duration_frames: 2,
            opacity: 0.8,
            pool: default_pool(),
            audio_enabled: false,
            audio_volume: 0.5,
        }
    }
}

impl SubliminalSettings {
    pub fn active_texts(&self) -> Vec<&str> {
        self.pool
            .iter()
            .filter(|(_, active)| **active)
            .map(|(text, _)| text.as_str())
            .collect()
    }
}

/// In-video attention mini-game configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionSettings {
    pub enabled: bool,
    /// Targets per 30 seconds of video.
    pub density: u32,
    pub lifespan_secs: f64,
    pub size: u32,
    pub pool: BTreeMap<String, bool>,
}

impl Default for AttentionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            density: 3,
            lifespan_secs: 5.0,
            size: 70,
            pool: default_pool(),
        }
    }
}

/// Floating bubble targets (unlocked at level 20).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BubbleSettings {
    pub enabled: bool,
    pub freq_per_min: f64,
    pub link_ramp: bool,
    /// Seconds a missed bubble takes to float off screen.
    pub lifespan_secs: f64,
}

impl Default for BubbleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            freq_per_min: 5.0,
            link_ramp: false,
            lifespan_secs: 20.0,
        }
    }
}

/// Decorative animated overlay (unlocked at level 10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub enabled: bool,
    pub path: String,
    pub opacity: f64,
    pub link_ramp: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: String::new(),
            opacity: 0.10,
            link_ramp: false,
        }
    }
}

/// Full-screen colour tint (unlocked at level 10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TintSettings {
    pub enabled: bool,
    pub opacity: f64,
    pub link_ramp: bool,
}

impl Default for TintSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            opacity: 0.10,
            link_ramp: false,
        }
    }
}

/// Audio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub volume: f64,
    #[serde(default = "default_true")]
    pub ducking_enabled: bool,
    /// Ducking strength, percent.
    pub ducking_strength: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 0.32,
            ducking_enabled: true,
            ducking_strength: 100,
        }
    }
}

/// Session intensity ramp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampSettings {
    pub enabled: bool,
    /// Minutes from session start until the ramp reaches 1.0.
    pub duration_min: f64,
    /// Frequency multiplier reached at full ramp.
    pub multiplier: f64,
    /// Ramp image alpha from 0.3 to 1.0.
    pub link_alpha: bool,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_min: 60.0,
            multiplier: 1.0,
            link_alpha: false,
        }
    }
}

/// Daily active window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWindowSettings {
    pub enabled: bool,
    /// `HH:MM`, local time.
    pub start: String,
    /// `HH:MM`, local time. May be earlier than `start` for overnight windows.
    pub end: String,
    /// 0 = Monday .. 6 = Sunday.
    pub active_weekdays: Vec<u8>,
}

impl Default for TimeWindowSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "16:00".into(),
            end: "18:00".into(),
            active_weekdays: (0..7).collect(),
        }
    }
}

impl TimeWindowSettings {
    /// Parsed `(start, end)`, or `None` if either string is malformed.
    pub fn bounds(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(self.start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(self.end.trim(), "%H:%M").ok()?;
        Some((start, end))
    }
}

/// Danger flags. Both raise XP gains by 50%.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    /// Ignore the panic hotkey.
    pub disable_panic: bool,
}

/// Resource arbiter caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_bubbles: u32,
    pub max_flashes: u32,
    /// Minimum re-trigger interval per effect type.
    pub min_effect_interval_ms: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_bubbles: 4,
            max_flashes: 15,
            min_effect_interval_ms: 500,
        }
    }
}

/// Persisted player progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub level: u32,
    pub xp: f64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self { level: 1, xp: 0.0 }
    }
}

/// Engine settings.
///
/// Serialized to/from TOML at `~/.config/flashdeck/settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub flash: FlashSettings,
    #[serde(default)]
    pub startle: StartleSettings,
    #[serde(default)]
    pub subliminal: SubliminalSettings,
    #[serde(default)]
    pub attention: AttentionSettings,
    #[serde(default)]
    pub bubbles: BubbleSettings,
    #[serde(default)]
    pub overlay: OverlaySettings,
    #[serde(default)]
    pub tint: TintSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub ramp: RampSettings,
    #[serde(default)]
    pub time_window: TimeWindowSettings,
    #[serde(default)]
    pub safety: SafetySettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub player: PlayerSettings,
}

impl Settings {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => {
                    if let Ok(n) = value.parse::<u64>() {
                        serde_json::Value::Number(n.into())
                    } else if let Ok(n) = value.parse::<f64>() {
                        serde_json::Number::from_f64(n)
                            .map(serde_json::Value::Number)
                            .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                    } else {
                        return Err(invalid(format!("cannot parse '{value}' as number")));
                    }
                }
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    /// Default settings file location.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("settings.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// default settings cannot be written.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let settings = Self::default();
            settings.save_to(&path)?;
            Ok(settings)
        }
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings.clamped())
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Persist to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from disk, returning defaults on any error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Get a settings value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key, in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the
    /// field's type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Settings =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        *self = updated.clamped();
        Ok(())
    }

    /// Copy with every value forced inside its hard safety limit.
    pub fn clamped(mut self) -> Self {
        use limits::*;

        let unit = |v: f64| v.clamp(0.0, 1.0);

        self.flash.hydra_limit = self.flash.hydra_limit.min(MAX_IMAGES_ON_SCREEN);
        self.flash.images_per_flash = self.flash.images_per_flash.clamp(1, MAX_IMAGES_ON_SCREEN);
        self.flash.freq_per_min = self.flash.freq_per_min.clamp(0.0, MAX_FLASHES_PER_MIN);
        self.flash.image_alpha = unit(self.flash.image_alpha);
        self.startle.freq_per_hour = self.startle.freq_per_hour.clamp(0.0, MAX_VIDEOS_PER_HOUR);
        self.subliminal.freq_per_min =
            self.subliminal.freq_per_min.clamp(0.0, MAX_SUBLIMINALS_PER_MIN);
        self.subliminal.opacity = unit(self.subliminal.opacity);
        self.subliminal.audio_volume = unit(self.subliminal.audio_volume);
        self.attention.density = self.attention.density.min(MAX_ATTENTION_DENSITY);
        self.attention.lifespan_secs = self.attention.lifespan_secs.max(0.5);
        self.bubbles.lifespan_secs = self.bubbles.lifespan_secs.clamp(1.0, 120.0);
        self.limits.max_bubbles = self.limits.max_bubbles.min(MAX_BUBBLES);
        self.limits.max_flashes = self.limits.max_flashes.min(MAX_IMAGES_ON_SCREEN);
        self.overlay.opacity = unit(self.overlay.opacity);
        self.tint.opacity = unit(self.tint.opacity);
        self.audio.volume = unit(self.audio.volume);
        self.audio.ducking_strength = self.audio.ducking_strength.min(100);
        self.ramp.duration_min = self.ramp.duration_min.max(0.0);
        self.ramp.multiplier = self.ramp.multiplier.max(0.0);
        self.player.level = self.player.level.max(1);
        self.player.xp = self.player.xp.max(0.0);
        self
    }

    /// Whether moving from `old` to `self` changes event timing.
    pub fn needs_reschedule(&self, old: &Settings) -> bool {
        self.flash.enabled != old.flash.enabled
            || self.flash.freq_per_min != old.flash.freq_per_min
            || self.startle.enabled != old.startle.enabled
            || self.startle.freq_per_hour != old.startle.freq_per_hour
            || self.subliminal.enabled != old.subliminal.enabled
            || self.subliminal.freq_per_min != old.subliminal.freq_per_min
            || self.subliminal.audio_enabled != old.subliminal.audio_enabled
            || self.bubbles != old.bubbles
            || self.ramp != old.ramp
    }
}
