//! Persisted settings: API key and model selection.

use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::DEFAULT_MODEL;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const MODEL_ENV: &str = "VIBEMONKEY_MODEL";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
        }
    }
}

impl Settings {
    /// API key if one is configured. Blank keys count as missing.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Apply environment overrides on top of what was loaded from disk.
    pub fn with_overrides(mut self, api_key: Option<String>, model: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        self
    }
}

/// Values taken from the environment. They shadow the stored settings but are never saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV).ok(),
            model: std::env::var(MODEL_ENV).ok(),
        }
    }
}

/// The settings file plus the environment layered on top of it.
///
/// `stored` mirrors what is on disk. Saves merge into `stored` only, so a key
/// that came from the environment never gets written to the file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    stored: Settings,
    env: EnvOverrides,
}

impl SettingsStore {
    pub fn open(path: PathBuf, env: EnvOverrides) -> Result<Self> {
        let stored = load_settings(&path)?;
        Ok(Self { path, stored, env })
    }

    /// What a generation should use: the file, then the environment.
    pub fn effective(&self) -> Settings {
        self.stored
            .clone()
            .with_overrides(self.env.api_key.clone(), self.env.model.clone())
    }

    /// Persist a settings form. A blank key keeps the stored key.
    /// Returns the new effective settings.
    pub fn save_form(&mut self, form: Settings) -> Result<Settings> {
        let next = Settings {
            api_key: form
                .api_key
                .filter(|k| !k.trim().is_empty())
                .or_else(|| self.stored.api_key.clone()),
            model: form.model,
        };
        save_settings(&self.path, &next)?;
        debug!(path = %self.path.display(), "settings saved");
        self.stored = next;
        Ok(self.effective())
    }
}

/// `<config dir>/vibemonkey/settings.json`, or the working directory if there is no config dir.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("vibemonkey"))
        .unwrap_or_default()
        .join(SETTINGS_FILE)
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!(path = %path.display(), "no settings file, using defaults");
        return Ok(Settings::default());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening settings {}", path.display()))?;
    let reader = BufReader::new(file);
    let settings: Settings = serde_json::from_reader(reader)
        .with_context(|| format!("parsing settings {}", path.display()))?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("writing settings {}", path.display()))?;

    serde_json::to_writer_pretty(file, settings)?;
    Ok(())
}
