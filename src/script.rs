//! Userscript extraction, validation and naming.

use std::sync::LazyLock;

use regex::Regex;

pub const USERSCRIPT_START: &str = "// ==UserScript==";
pub const USERSCRIPT_END: &str = "})();";
pub const MATCH_TAG: &str = "@match";
pub const DEFAULT_SCRIPT_NAME: &str = "vibemonkey-script.user.js";
pub const SCRIPT_EXTENSION: &str = ".user.js";

static NAME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@name\s+(.*)").expect("valid @name pattern")
});

/// Pull the userscript out of a free-form model reply.
///
/// Takes everything from the first userscript header up to and including the
/// last IIFE terminator. Replies without both markers in that order are
/// returned whole (trimmed), so the caller can still show what the model said.
pub fn parse_script_from_response(response: &str) -> String {
    let start = response.find(USERSCRIPT_START);
    let end = response
        .rfind(USERSCRIPT_END)
        .map(|pos| pos + USERSCRIPT_END.len());

    match (start, end) {
        (Some(start), Some(end)) if end > start => response[start..end].to_string(),
        _ => response.trim().to_string(),
    }
}

/// Syntactic smoke test: a userscript header and at least one `@match` tag.
pub fn is_valid_userscript(script: &str) -> bool {
    script.contains(USERSCRIPT_START) && script.contains(MATCH_TAG)
}

/// `@name Foo Bar` becomes `Foo_Bar.user.js`.
pub fn script_name(script: &str) -> Option<String> {
    let captured = NAME_TAG.captures(script)?.get(1)?.as_str().trim();
    if captured.is_empty() {
        return None;
    }
    let name = captured.split_whitespace().collect::<Vec<_>>().join("_");
    Some(format!("{}{}", name, SCRIPT_EXTENSION))
}

pub fn script_file_name(script: &str) -> String {
    script_name(script).unwrap_or_else(|| DEFAULT_SCRIPT_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "// ==UserScript==
// @name         Red Links
// @match        *://*/*
// ==/UserScript==
(function() {
    'use strict';
    document.querySelectorAll('a').forEach(a => a.style.color = 'red');
})();";

    #[test]
    fn test_parse_extracts_between_markers() {
        let reply = format!(
            "### Selector Plan\n- primary: a[href]\n\n```javascript\n{}\n```\n\n### Post-script Checklist\n- links are red",
            SCRIPT
        );
        assert_eq!(parse_script_from_response(&reply), SCRIPT);
    }

    #[test]
    fn test_parse_uses_last_end_marker() {
        let reply = format!("{}\n(function() {{ console.log(1); }})();\ntrailing", SCRIPT);
        let parsed = parse_script_from_response(&reply);
        assert!(parsed.starts_with(USERSCRIPT_START));
        assert!(parsed.ends_with("console.log(1); })();"));
    }

    #[test]
    fn test_parse_falls_back_without_start_marker() {
        let reply = "  (function() { alert(1); })();  \n";
        assert_eq!(parse_script_from_response(reply), "(function() { alert(1); })();");
    }

    #[test]
    fn test_parse_falls_back_without_end_marker() {
        let reply = "\n// ==UserScript==\n// @match *://*/*\nno iife here\n";
        assert_eq!(
            parse_script_from_response(reply),
            "// ==UserScript==\n// @match *://*/*\nno iife here"
        );
    }

    #[test]
    fn test_parse_falls_back_when_end_precedes_start() {
        let reply = "})(); then // ==UserScript== header";
        assert_eq!(parse_script_from_response(reply), reply);
    }

    #[test]
    fn test_is_valid_userscript() {
        assert!(is_valid_userscript(SCRIPT));
        assert!(is_valid_userscript("@match x\n// ==UserScript=="));
        assert!(!is_valid_userscript("// ==UserScript==\n// @name x"));
        assert!(!is_valid_userscript("// @match *://*/*"));
        assert!(!is_valid_userscript(""));
    }

    #[test]
    fn test_script_name_collapses_whitespace() {
        assert_eq!(
            script_file_name("// @name   Foo Bar\n// @match x"),
            "Foo_Bar.user.js"
        );
        assert_eq!(
            script_file_name("// @name\tDark   Mode  Toggle  "),
            "Dark_Mode_Toggle.user.js"
        );
    }

    #[test]
    fn test_script_name_defaults() {
        assert_eq!(script_name("// @match *://*/*"), None);
        assert_eq!(script_file_name("no tags at all"), DEFAULT_SCRIPT_NAME);
    }
}
