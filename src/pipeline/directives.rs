//! Input normalisation: strip inline `<rst-options: … />` directives.
//!
//! Authors control a render from inside the markup block:
//!
//! ```text
//! <rst-options: 'toc' = False/>
//! <rst-options: 'reset-figures' = False/>
//! ```
//!
//! Each directive is recorded and then blanked out with spaces of the same
//! length, so the byte offsets of later matches stay valid. Text that does
//! not match the directive pattern passes through untouched and ends up in
//! the compiled page as literal text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static RE_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<rst-options\s*:\s(.*)/>").unwrap());

/// Per-document switches parsed from directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOptions {
    /// Prepend the compiler's table of contents. Default: true.
    pub toc: bool,
    /// Re-fetch every figure even when a local copy exists. Default: true.
    pub reset_figures: bool,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            toc: true,
            reset_figures: true,
        }
    }
}

/// The markup with directives removed, plus the options they selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDocument {
    pub text: String,
    pub options: DocumentOptions,
    /// Number of directives matched (recognised or not).
    pub directives_found: usize,
}

/// Parse and strip every directive in `raw`.
///
/// Only `toc` and `reset-figures` are recognised; any other name is removed
/// from the text but otherwise ignored. A value turns an option off only if
/// it reads `false` once surrounding whitespace and quotes are trimmed
/// (case-insensitive). When at least one directive was found the result is
/// trimmed, which drops the blank lines the directives leave behind.
pub fn normalize(raw: &str) -> NormalizedDocument {
    let mut text = raw.to_string();
    let mut options = DocumentOptions::default();
    let mut found = 0;

    for caps in RE_DIRECTIVE.captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        debug!("Found option: {}", whole.as_str());
        text.replace_range(whole.range(), &" ".repeat(whole.len()));
        found += 1;

        let Some((name, value)) = split_assignment(&caps[1]) else {
            debug!("Ignoring option without a single '=': {}", whole.as_str());
            continue;
        };
        let off = value == "false";
        match name.as_str() {
            "toc" if off => options.toc = false,
            "reset-figures" if off => options.reset_figures = false,
            "toc" | "reset-figures" => {}
            other => debug!("Ignoring unknown option '{}'", other),
        }
    }

    if found > 0 {
        text = text.trim().to_string();
    }

    NormalizedDocument {
        text,
        options,
        directives_found: found,
    }
}

/// Split `'name' = value` into a cleaned, lower-cased `(name, value)`.
fn split_assignment(body: &str) -> Option<(String, String)> {
    let mut parts = body.split('=');
    let (name, value) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some((clean_token(name), clean_token(value)))
}

fn clean_token(s: &str) -> String {
    s.trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"')
        .to_lowercase()
}
