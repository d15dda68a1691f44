use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bridge::PageHandler;
use crate::dom;
use crate::types::{PageSummary, TabInfo};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    web_socket_debugger_url: String,
}

/// Turn `http://host:9222` into the browser's DevTools websocket URL.
/// Websocket URLs are passed through untouched.
pub async fn resolve_debugger_url(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }
    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let version: VersionInfo = reqwest::get(&url)
        .await
        .with_context(|| format!("querying {}", url))?
        .json()
        .await
        .context("reading DevTools version info")?;
    Ok(version.web_socket_debugger_url)
}

/// Browser the page probe runs in. Created once, reused for every generation.
pub struct BrowserSession {
    browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attach to a Chrome started with `--remote-debugging-port`, or launch our own.
    pub fn launch(debugger_url: Option<String>, start_url: Option<&str>) -> Result<Self> {
        if let Some(ws_url) = debugger_url {
            info!("attaching to running Chrome at {}", ws_url);
            match Browser::connect(ws_url) {
                Ok(browser) => {
                    let tab = {
                        let tabs = browser
                            .get_tabs()
                            .lock()
                            .map_err(|_| anyhow!("tab list lock poisoned"))?;
                        tabs.first().cloned()
                    };
                    let tab = match tab {
                        Some(t) => t,
                        None => browser.new_tab()?,
                    };
                    let mut session = Self { browser, tab };
                    if let Some(url) = start_url {
                        session.open(url)?;
                    }
                    return Ok(session);
                }
                Err(e) => warn!("could not attach ({}), launching a new Chrome", e),
            }
        }

        let options = LaunchOptions {
            headless: false,
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
            ],
            idle_browser_timeout: Duration::from_secs(60 * 60),
            ..Default::default()
        };

        info!("starting Chrome");
        let browser = Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;

        let mut session = Self { browser, tab };
        session.open(start_url.unwrap_or("about:blank"))?;
        info!("Chrome ready");
        Ok(session)
    }

    pub fn open(&mut self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    /// Re-pick the tab the user is looking at: the first visible page, or the current one.
    /// Returns `false` when the browser has no tabs left.
    fn refresh_active_tab(&mut self) -> Result<bool> {
        let tabs: Vec<Arc<Tab>> = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list lock poisoned"))?
            .clone();
        if tabs.is_empty() {
            return Ok(false);
        }

        for tab in tabs {
            let visible = tab
                .evaluate("document.visibilityState === 'visible'", false)
                .ok()
                .and_then(|r| r.value)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if visible {
                self.tab = tab;
                break;
            }
        }
        Ok(true)
    }
}

/// Describe a tab, or `None` if it has no URL yet (closed or still being created).
fn tab_info(id: &str, url: String) -> Option<TabInfo> {
    if url.trim().is_empty() {
        return None;
    }
    Some(TabInfo {
        id: id.to_string(),
        url,
    })
}

impl PageHandler for BrowserSession {
    fn active_tab(&mut self) -> Result<Option<TabInfo>> {
        match self.refresh_active_tab() {
            Ok(false) => {
                debug!("browser has no tabs");
                return Ok(None);
            }
            Ok(true) => {}
            Err(e) => debug!("keeping current tab: {:#}", e),
        }
        Ok(tab_info(self.tab.get_target_id(), self.tab.get_url()))
    }

    fn summarize(&mut self, goal: &str) -> Result<PageSummary> {
        dom::capture_page_summary(&self.tab, goal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_info_with_url() {
        let info = tab_info("T1", "https://example.com/".into()).unwrap();
        assert_eq!(info.id, "T1");
        assert_eq!(info.url, "https://example.com/");
    }

    #[test]
    fn test_tab_info_without_url_is_none() {
        assert!(tab_info("T1", String::new()).is_none());
        assert!(tab_info("T1", "  ".into()).is_none());
    }

    #[tokio::test]
    async fn test_ws_endpoint_passes_through() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(resolve_debugger_url(url).await.unwrap(), url);
    }
}
