//! Figure resolution: make every `images/…` figure available to the compiler.
//!
//! Authors upload figures to the wiki under the same name they use in the
//! markup:
//!
//! ```text
//! .. figure:: images/reactor.png
//!     :scale: 40
//! ```
//!
//! Each referenced name is looked up with the wiki API and streamed into
//! the workspace's `images/` directory. A figure that is not on the wiki is
//! a warning (the compiled page shows a broken image); a transport failure
//! while downloading aborts the render.

use crate::error::{RenderWarning, SphinxWikiError};
use crate::pipeline::directives::DocumentOptions;
use crate::pipeline::workspace::Workspace;
use crate::wiki::{Download, ImageLookup, WikiClient};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path};
use tracing::{debug, warn};

static RE_FIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*..\s*figure::\s*images/(.*)").unwrap());

/// What happened to the figures of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FigureReport {
    /// Distinct figure names, in order of first appearance.
    pub referenced: Vec<String>,
    pub fetched: usize,
    /// Already present and `reset-figures` was off.
    pub reused: usize,
    /// Skipped with a warning.
    pub missing: usize,
    pub warnings: Vec<RenderWarning>,
}

/// Names of all figures under `images/`, in order, without duplicates.
pub fn extract_figures(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in RE_FIGURE.captures_iter(text) {
        let name = fetch_name(caps[1].trim_end());
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Name to request from the wiki for a figure reference.
///
/// The compiler accepts `images/chart.*` and picks a format itself; the
/// wiki needs a concrete file, so a trailing wildcard is cut at the first
/// `*` and `png` is appended. No dot is inserted: `chart.*` becomes
/// `chart.png`, but `chart-*` becomes `chart-png`.
// TODO: `chart-*` → `chart-png` looks unintended (probably meant `.png`);
// switch to a dotted join once existing pages have been checked for it.
pub fn fetch_name(reference: &str) -> String {
    if reference.ends_with('*') {
        let stem = reference.split('*').next().unwrap_or_default();
        format!("{stem}png")
    } else {
        reference.to_string()
    }
}

/// Ensure every figure in `text` is present in the workspace.
///
/// A figure is skipped only if it already exists locally *and*
/// `reset-figures` is off; by default everything is fetched again. The wiki
/// login happens on the first fetch, so a page whose figures are all cached
/// never talks to the wiki.
pub async fn resolve_figures(
    text: &str,
    workspace: &Workspace,
    options: &DocumentOptions,
    wiki: &mut WikiClient,
) -> Result<FigureReport, SphinxWikiError> {
    let images = workspace.images_dir();
    tokio::fs::create_dir_all(&images)
        .await
        .map_err(|e| SphinxWikiError::Workspace {
            path: images.clone(),
            source: e,
        })?;

    let mut report = FigureReport {
        referenced: extract_figures(text),
        ..FigureReport::default()
    };

    for name in report.referenced.clone() {
        if !is_safe_relative(&name) {
            warn!("Figure \"{}\" has an unsafe path; skipping", name);
            report.missing += 1;
            report.warnings.push(RenderWarning::FigureRejected { name });
            continue;
        }

        let dest = images.join(&name);
        if !options.reset_figures && is_cached(&dest).await {
            debug!("Figure not required for download: {}", name);
            report.reused += 1;
            continue;
        }

        debug!("Extracting figure from wiki: {}", name);
        wiki.ensure_logged_in().await?;
        let url = match wiki.image_url(&name).await? {
            ImageLookup::Found { url } => url,
            ImageLookup::Missing => {
                warn!("Figure \"{}\" not available yet in wiki", name);
                report.missing += 1;
                report.warnings.push(RenderWarning::FigureMissing { name });
                continue;
            }
        };

        match wiki.download(&name, &url, &dest).await? {
            Download::Stored { bytes } => {
                debug!("Stored figure {} ({} bytes)", name, bytes);
                report.fetched += 1;
            }
            Download::HttpStatus(status) => {
                warn!("Figure \"{}\" returned HTTP {} from {}", name, status, url);
                report.missing += 1;
                report
                    .warnings
                    .push(RenderWarning::FigureUnavailable { name, status });
            }
        }
    }

    Ok(report)
}

/// Whether `dest` already exists. An unreadable path counts as absent, so the
/// figure is fetched again.
async fn is_cached(dest: &Path) -> bool {
    match tokio::fs::try_exists(dest).await {
        Ok(found) => found,
        Err(e) => {
            debug!("Cannot check cached figure {}: {}; fetching again", dest.display(), e);
            false
        }
    }
}

fn is_safe_relative(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}
