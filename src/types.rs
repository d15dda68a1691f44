use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of text characters kept in a one-line element summary.
pub const ELEMENT_TEXT_MAX_CHARS: usize = 50;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Model identifiers offered in the settings form. Anything else is passed through as-is.
pub const KNOWN_MODELS: &[&str] = &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash"];

/// Raw description of a DOM element, as reported by the page probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub text: String,
}

/// One-line description of an element: `tag#id.class (Text: "...")`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSummary {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub text: String,
}

impl ElementSummary {
    pub fn from_info(info: &ElementInfo) -> Self {
        let id = Some(info.id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let classes = info
            .class_name
            .split_whitespace()
            .map(str::to_string)
            .collect();

        // Truncate first, then collapse, so a long run of whitespace still counts against the budget.
        let truncated: String = info
            .text
            .trim()
            .chars()
            .take(ELEMENT_TEXT_MAX_CHARS)
            .collect();
        // A cut inside a whitespace run leaves a single trailing space.
        let text = WHITESPACE_RUN.replace_all(&truncated, " ").into_owned();

        Self {
            tag: info.tag.to_lowercase(),
            id,
            classes,
            text,
        }
    }
}

impl fmt::Display for ElementSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)?;
        if let Some(ref id) = self.id {
            write!(f, "#{}", id)?;
        }
        if !self.classes.is_empty() {
            write!(f, ".{}", self.classes.join("."))?;
        }
        write!(f, " (Text: \"{}...\")", self.text)
    }
}

/// Render an optional element the way the summary expects, `N/A` when absent.
pub fn element_summary(info: Option<&ElementInfo>) -> String {
    match info {
        Some(info) => ElementSummary::from_info(info).to_string(),
        None => "N/A".to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveCounts {
    pub buttons: usize,
    pub links: usize,
    pub inputs: usize,
    pub other: usize,
}

/// Summary of the inspected page. Its text rendering is what the prompt builder consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub goal: String,
    pub focused_element: String,
    pub main_landmarks: Vec<String>,
    pub interactive: InteractiveCounts,
    pub meta_description: String,
}

impl fmt::Display for PageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let landmarks = if self.main_landmarks.is_empty() {
            "  - None".to_string()
        } else {
            self.main_landmarks
                .iter()
                .map(|l| format!("  - {}", l))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let text = format!(
            "Page Title: {title}
URL: {url}
User's Goal: {goal}
Focused Element: - {focused}
Main Landmarks:
{landmarks}
Interactive Elements Summary:
  - Buttons: {buttons}
  - Links: {links}
  - Inputs: {inputs}
  - Other (select, textarea): {other}
Meta Description: {meta}",
            title = self.title,
            url = self.url,
            goal = self.goal,
            focused = self.focused_element,
            landmarks = landmarks,
            buttons = self.interactive.buttons,
            links = self.interactive.links,
            inputs = self.interactive.inputs,
            other = self.interactive.other,
            meta = self.meta_description,
        );
        f.write_str(text.trim())
    }
}

/// The active tab as seen from the panel side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: String,
    pub url: String,
}

/// Script text extracted from a model reply. Held in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
    pub text: String,
}

impl GeneratedScript {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn file_name(&self) -> String {
        crate::script::script_file_name(&self.text)
    }
}
