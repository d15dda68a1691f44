use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::types::GeneratedScript;

/// Put the script on the system clipboard. Best effort: failures are logged and dropped.
pub fn copy_to_clipboard(script: &GeneratedScript) {
    let result = arboard::Clipboard::new()
        .and_then(|mut clipboard| clipboard.set_text(script.text.clone()));
    match result {
        Ok(()) => info!(chars = script.text.len(), "script copied to clipboard"),
        Err(e) => warn!("clipboard unavailable: {}", e),
    }
}

/// A script ready to be handed out as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDownload {
    pub file_name: String,
    pub content: String,
}

impl From<&GeneratedScript> for ScriptDownload {
    fn from(script: &GeneratedScript) -> Self {
        Self {
            file_name: script.file_name(),
            content: script.text.clone(),
        }
    }
}

impl ScriptDownload {
    /// `Content-Disposition` value that makes the browser save the file.
    pub fn content_disposition(&self) -> String {
        let name = self.file_name.replace(['"', '\\', '\r', '\n'], "_");
        format!("attachment; filename=\"{}\"", name)
    }
}

/// Where `save` writes when no directory is given.
pub fn default_save_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Write the script into `dir` under its derived file name. Returns the full path.
pub fn save_to_dir(script: &GeneratedScript, dir: &Path) -> Result<PathBuf> {
    let download = ScriptDownload::from(script);
    let name = Path::new(&download.file_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(crate::script::DEFAULT_SCRIPT_NAME));

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(name);
    std::fs::write(&path, download.content)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "script saved");
    Ok(path)
}
