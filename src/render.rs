//! Render entry points: raw wiki markup in, HTML fragment out.
//!
//! The five stages run strictly in order; each needs the previous one's
//! output:
//!
//! ```text
//! normalize ─▶ stage ─▶ figures ─▶ (sync) compile ─▶ assemble + publish
//! ```
//!
//! Every log line emitted during a render carries the document fingerprint
//! through the `render` span.

use crate::config::RenderConfig;
use crate::error::SphinxWikiError;
use crate::output::{RenderOutput, RenderStats};
use crate::pipeline::compile::{self, SYNC_FAILED_BANNER};
use crate::pipeline::directives::{self, NormalizedDocument};
use crate::pipeline::{assemble, figures, workspace};
use crate::wiki::WikiClient;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Render one `<rst>` block to HTML.
///
/// # Arguments
/// * `raw`: the markup exactly as the wiki passed it, directives included
/// * `config`: server configuration
///
/// # Returns
/// `Ok(RenderOutput)` on success, even if some figures were missing or the
/// source tree could not be synchronised (see `output.warnings`).
///
/// # Errors
/// Returns `Err(SphinxWikiError)` only for fatal errors:
/// - the workspace could not be written
/// - a figure download failed at the transport level
/// - the compiler could not be run or exited non-zero
/// - compiled assets could not be copied to the public directory
pub async fn render(raw: &str, config: &RenderConfig) -> Result<RenderOutput, SphinxWikiError> {
    let doc = directives::normalize(raw);
    let fingerprint = workspace::fingerprint(&doc.text);
    let span = info_span!("render", fingerprint = %fingerprint);
    let result = render_document(doc, fingerprint, config)
        .instrument(span.clone())
        .await;
    if let Err(ref e) = result {
        span.in_scope(|| error!(exit_code = e.exit_code(), "Render failed: {e}"));
    }
    result
}

/// Synchronous wrapper around [`render`].
///
/// Creates a single-threaded tokio runtime internally.
pub fn render_sync(raw: &str, config: &RenderConfig) -> Result<RenderOutput, SphinxWikiError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SphinxWikiError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(render(raw, config))
}

/// Render and write the HTML to `out`.
///
/// Nothing is written unless the render succeeds.
pub async fn render_to_writer<W: Write>(
    raw: &str,
    config: &RenderConfig,
    out: &mut W,
) -> Result<RenderOutput, SphinxWikiError> {
    let output = render(raw, config).await?;
    out.write_all(output.html.as_bytes())
        .and_then(|()| {
            if output.html.ends_with('\n') {
                Ok(())
            } else {
                out.write_all(b"\n")
            }
        })
        .and_then(|()| out.flush())
        .map_err(SphinxWikiError::OutputWrite)?;
    Ok(output)
}

async fn render_document(
    doc: NormalizedDocument,
    fingerprint: String,
    config: &RenderConfig,
) -> Result<RenderOutput, SphinxWikiError> {
    let total_start = Instant::now();
    debug!("Hash is = {}; snippet = {}", fingerprint, snippet(&doc.text));
    debug!(
        "Options: toc={} reset-figures={} ({} directives)",
        doc.options.toc, doc.options.reset_figures, doc.directives_found
    );

    ensure_dir(&config.static_content_dir).await?;
    ensure_dir(&config.extension_dir).await?;

    // ── Step 1: Stage workspace ──────────────────────────────────────────
    let ws = workspace::stage(&doc.text, config).await?;
    debug_assert_eq!(ws.fingerprint(), fingerprint);

    // ── Step 2: Fetch figures ────────────────────────────────────────────
    let figures_start = Instant::now();
    let mut wiki = WikiClient::new(config)?;
    let report = figures::resolve_figures(&doc.text, &ws, &doc.options, &mut wiki).await?;
    let figures_duration_ms = figures_start.elapsed().as_millis() as u64;
    info!(
        "Figures: {} referenced, {} fetched, {} reused, {} missing",
        report.referenced.len(),
        report.fetched,
        report.reused,
        report.missing
    );
    let mut warnings = report.warnings;

    // ── Step 3: Sync shared sources ──────────────────────────────────────
    let mut banner = "";
    if let Some(ref repo) = config.local_repo_dir {
        let vcs = config.vcs_tool();
        if let Some(warning) = compile::sync_repository(vcs.as_ref(), repo).await {
            warnings.push(warning);
            banner = SYNC_FAILED_BANNER;
        }
    }

    // ── Step 4: Compile ──────────────────────────────────────────────────
    let compile_start = Instant::now();
    let compiler = config.compiler_tool();
    compile::compile(compiler.as_ref(), &ws).await?;
    let compile_duration_ms = compile_start.elapsed().as_millis() as u64;

    // ── Step 5: Assemble and publish ─────────────────────────────────────
    let body = assemble::assemble(&ws, doc.options.toc, config).await?;
    let assets_published =
        assemble::publish_assets(&ws.compiled_images_dir(), &config.static_content_dir).await?;
    debug!("Published {} asset files", assets_published);

    let html = format!("{banner}{body}{}", config.append_html);

    let stats = RenderStats {
        figures_referenced: report.referenced.len(),
        figures_fetched: report.fetched,
        figures_reused: report.reused,
        figures_missing: report.missing,
        assets_published,
        figures_duration_ms,
        compile_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Render complete: {} bytes, {} warnings, {}ms total",
        html.len(),
        warnings.len(),
        stats.total_duration_ms
    );

    Ok(RenderOutput {
        html,
        fingerprint,
        workspace: ws.dir().to_path_buf(),
        options: doc.options,
        warnings,
        stats,
    })
}

async fn ensure_dir(path: &Path) -> Result<(), SphinxWikiError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| SphinxWikiError::Workspace {
            path: path.to_path_buf(),
            source,
        })
}

/// Characters 50..150 of `text` on one line, for the log.
fn snippet(text: &str) -> String {
    text.chars().skip(50).take(100).collect::<String>().replace('\n', ";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_skips_head_and_flattens_lines() {
        let text = format!("{}line one\nline two", "x".repeat(50));
        assert_eq!(snippet(&text), "line one;line two");
        assert_eq!(snippet("short"), "");
    }
}
