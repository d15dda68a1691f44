use std::sync::Arc;

use anyhow::{Context, Result};
use headless_chrome::Tab;
use serde::Deserialize;

use crate::types::{ElementInfo, InteractiveCounts, PageSummary, element_summary};

/// JavaScript injected into the page to collect the facts a summary is built from.
/// READ-ONLY: it queries the DOM and never writes to it.
///
/// Text is pre-trimmed to a few hundred characters so large landmarks don't bloat
/// the CDP payload; the exact 50-character cut happens on the Rust side.
const SUMMARY_PROBE_JS: &str = r#"
(() => {
  const describe = (el) => el ? {
    tag: el.tagName || '',
    id: el.id || '',
    className: typeof el.className === 'string' ? el.className : (el.getAttribute('class') || ''),
    text: (el.textContent || '').trim().slice(0, 200),
  } : null;
  const count = (sel) => document.querySelectorAll(sel).length;
  const meta = document.querySelector('meta[name="description"]');

  return JSON.stringify({
    url: window.location.href,
    title: document.title,
    focused: describe(document.activeElement),
    landmarks: [...document.querySelectorAll('main, [role="main"]')].map(describe),
    counts: {
      buttons: count('button, [role="button"]'),
      links: count('a[href]'),
      inputs: count('input, [role="textbox"], [role="searchbox"]'),
      other: count('select, textarea'),
    },
    metaDescription: meta ? meta.content : null,
  });
})()
"#;

/// What the probe reports back, before any formatting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFacts {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub focused: Option<ElementInfo>,
    #[serde(default)]
    pub landmarks: Vec<ElementInfo>,
    #[serde(default)]
    pub counts: InteractiveCounts,
    #[serde(default)]
    pub meta_description: Option<String>,
}

impl PageFacts {
    /// Format the facts into a summary. Missing pieces degrade to placeholders.
    pub fn summarize(&self, goal: &str) -> PageSummary {
        let focused_element = match self.focused {
            Some(ref el) => element_summary(Some(el)),
            None => "none".to_string(),
        };
        let main_landmarks = self
            .landmarks
            .iter()
            .map(|el| element_summary(Some(el)))
            .collect();
        let meta_description = self
            .meta_description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or("N/A")
            .to_string();

        PageSummary {
            url: self.url.clone(),
            title: self.title.clone(),
            goal: goal.to_string(),
            focused_element,
            main_landmarks,
            interactive: self.counts,
            meta_description,
        }
    }
}

/// Run the probe in the tab and parse what it returns.
pub fn collect_page_facts(tab: &Arc<Tab>) -> Result<PageFacts> {
    let result = tab
        .evaluate(SUMMARY_PROBE_JS, false)
        .context("evaluating page probe")?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();

    serde_json::from_str(&raw).context("parsing page probe result")
}

/// Summarize the page currently loaded in the tab.
pub fn capture_page_summary(tab: &Arc<Tab>, goal: &str) -> Result<PageSummary> {
    Ok(collect_page_facts(tab)?.summarize(goal))
}
