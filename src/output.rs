//! Result types returned by the `render*` entry points.

use crate::error::RenderWarning;
use crate::pipeline::directives::DocumentOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The rendered fragment plus what it took to produce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOutput {
    /// HTML ready to splice into the wiki page, trailer included.
    pub html: String,
    /// Content hash of the normalised markup.
    pub fingerprint: String,
    /// Directory the document was compiled in.
    pub workspace: PathBuf,
    /// Options selected by inline directives.
    pub options: DocumentOptions,
    /// Soft failures; the page rendered anyway.
    pub warnings: Vec<RenderWarning>,
    pub stats: RenderStats,
}

impl RenderOutput {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Counters and timings for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStats {
    pub figures_referenced: usize,
    pub figures_fetched: usize,
    pub figures_reused: usize,
    pub figures_missing: usize,
    /// Files copied into the public asset directory.
    pub assets_published: usize,
    pub figures_duration_ms: u64,
    pub compile_duration_ms: u64,
    pub total_duration_ms: u64,
}
