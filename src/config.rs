/*
 * @file config.rs
 * @brief Application configuration loading
 * @author Kevin Thomas
 * @date 2025
 *
 * MIT License
 *
 * Copyright (c) 2025 Kevin Thomas
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

//! Runtime configuration loaded from `config.json` and the environment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Default configuration file, relative to the working directory.
pub const CONFIG_PATH: &str = "config.json";

/// Serial device used when neither the config nor the environment name one.
const FALLBACK_SERIAL_PORT: &str = "/dev/ttyACM0";

/// Baud rate of the toy's firmware.
const DEFAULT_SERIAL_BAUD: u32 = 9600;

/// Strongly typed representation of `config.json`.
///
/// # Details
/// Every section and field has a default, so a partial file only overrides
/// what it names.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub control: ControlConfig,
    pub speech: SpeechConfig,
    pub behavior: BehaviorConfig,
}

/// Serial link settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    /// Longest time an idle read blocks before the reader re-arms.
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: FALLBACK_SERIAL_PORT.to_string(),
            baud: DEFAULT_SERIAL_BAUD,
            read_timeout_ms: 50,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Exchange timeouts and move resync policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub command_timeout_ms: u64,
    pub move_timeout_ms: u64,
    /// Extra replies a move may read past while the echoed position is stale.
    pub move_resync_attempts: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            move_timeout_ms: 2000,
            move_resync_attempts: 3,
        }
    }
}

impl ControlConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }
}

/// Voice and playback parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub voice: String,
    /// Words per minute passed to the synthesizer.
    pub speed: u32,
    pub pitch: u32,
    /// Pitch shift, in cents, applied during playback.
    pub playback_pitch: i32,
    pub wav_path: PathBuf,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice: "mb-fr4".to_string(),
            speed: 100,
            pitch: 50,
            playback_pitch: 400,
            wav_path: env::temp_dir().join("furby-speech.wav"),
        }
    }
}

/// Timing of the speaking loop and gestures.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub tick_ms: u64,
    /// How far ahead of the playback clock the jaw samples the envelope.
    pub lookahead_ms: u64,
    pub settle_ms: u64,
    pub debounce_ms: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            lookahead_ms: 100,
            settle_ms: 500,
            debounce_ms: 500,
        }
    }
}

impl BehaviorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Loads configuration from `path`, falling back to baked defaults.
///
/// # Details
/// A missing or invalid file is logged and replaced by
/// [`AppConfig::default`]. Environment overrides are applied afterwards.
///
/// # Arguments
/// * `path` - JSON configuration file.
///
/// # Returns
/// * `AppConfig` - The loaded or default configuration.
pub fn load_app_config(path: &Path) -> AppConfig {
    let mut config = match load_config_file(path) {
        Ok(config) => config,
        Err(err) => {
            warn!("Config load error ({}): {:#}", path.display(), err);
            AppConfig::default()
        }
    };
    apply_env_overrides(&mut config);
    config
}

/// Reads and parses the configuration file.
///
/// # Errors
/// Returns an error if the file cannot be read or contains invalid JSON.
fn load_config_file(path: &Path) -> Result<AppConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Applies `FURBY_SERIAL_PORT`, `FURBY_SERIAL_BAUD` and `FURBY_VOICE`.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(port) = env::var("FURBY_SERIAL_PORT") {
        config.serial.port = port;
    }
    if let Some(baud) = env::var("FURBY_SERIAL_BAUD")
        .ok()
        .and_then(|value| value.parse().ok())
    {
        config.serial.baud = baud;
    }
    if let Ok(voice) = env::var("FURBY_VOICE") {
        config.speech.voice = voice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.control.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.control.move_timeout(), Duration::from_secs(2));
        assert_eq!(config.behavior.tick(), Duration::from_millis(10));
        assert_eq!(config.speech.voice, "mb-fr4");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "control": { "move_timeout_ms": 750 }, "behavior": { "tick_ms": 20 } }"#,
        )
        .unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.control.move_timeout(), Duration::from_millis(750));
        assert_eq!(config.control.command_timeout_ms, 5000);
        assert_eq!(config.behavior.tick_ms, 20);
        assert_eq!(config.behavior.settle_ms, 500);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config_file(&path).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_app_config(&dir.path().join("absent.json"));
        assert_eq!(config.control.move_resync_attempts, 3);
    }
}
