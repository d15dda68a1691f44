//! Goal in, validated userscript out.

use tracing::{info, warn};

use crate::brain::{ScriptModel, build_prompt};
use crate::bridge::PageSource;
use crate::config::Settings;
use crate::error::{GenerateError, Result};
use crate::script::{is_valid_userscript, parse_script_from_response};
use crate::types::GeneratedScript;

/// URL prefixes of browser-internal pages the probe must not run on.
pub const RESTRICTED_SCHEMES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "devtools://",
    "view-source:",
    "about:",
];

pub fn is_restricted_url(url: &str) -> bool {
    let url = url.trim_start().to_ascii_lowercase();
    RESTRICTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// Progress points reported while a generation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GatheringContext,
    Generating,
}

impl Stage {
    pub fn message(self) -> &'static str {
        match self {
            Stage::GatheringContext => "Getting page context...",
            Stage::Generating => "Generating script...",
        }
    }
}

/// Panel session state: current settings and the last good script.
pub struct Session<P, M> {
    page: P,
    model: M,
    settings: Settings,
    current: Option<GeneratedScript>,
}

impl<P: PageSource, M: ScriptModel> Session<P, M> {
    pub fn new(page: P, model: M, settings: Settings) -> Self {
        Self {
            page,
            model,
            settings,
            current: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Swap in new settings. Takes effect from the next generation.
    pub fn apply_settings(&mut self, settings: Settings) {
        info!(model = %settings.model, has_key = settings.api_key().is_some(), "settings updated");
        self.settings = settings;
    }

    pub fn current_script(&self) -> Option<&GeneratedScript> {
        self.current.as_ref()
    }

    /// Run one generation. On failure the previous script stays current.
    pub async fn generate(
        &mut self,
        goal: &str,
        mut on_stage: impl FnMut(Stage),
    ) -> Result<&GeneratedScript> {
        if goal.trim().is_empty() {
            return Err(GenerateError::EmptyGoal);
        }
        let api_key = self
            .settings
            .api_key()
            .ok_or(GenerateError::MissingApiKey)?
            .to_string();

        let tab = self.page.active_tab().await?.ok_or(GenerateError::NoActiveTab)?;
        if is_restricted_url(&tab.url) {
            return Err(GenerateError::RestrictedPage { url: tab.url });
        }

        on_stage(Stage::GatheringContext);
        let summary = self.page.describe(goal).await?;

        on_stage(Stage::Generating);
        let prompt = build_prompt(goal, &summary);
        info!(model = %self.settings.model, url = %tab.url, "requesting script");
        let reply = self
            .model
            .generate(&api_key, &self.settings.model, &prompt)
            .await?;

        let text = parse_script_from_response(&reply);
        if !is_valid_userscript(&text) {
            warn!(reply_chars = reply.len(), "reply is not a userscript");
            return Err(GenerateError::InvalidScript);
        }

        Ok(self.current.insert(GeneratedScript::new(text)))
    }
}
