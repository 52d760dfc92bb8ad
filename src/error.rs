//! Error types for the sphinx-wiki library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SphinxWikiError`] (**fatal**): the render cannot proceed (the compiler
//!   failed, an image download broke at the transport level, the public asset
//!   directory is not writable). Returned as `Err(SphinxWikiError)` from the
//!   top-level `render*` functions.
//!
//! * [`RenderWarning`] (**non-fatal**): a single figure is missing from the
//!   wiki or the shared source tree could not be synchronised. Stored inside
//!   [`crate::output::RenderOutput`]; the page still renders, just degraded.
//!
//! Fatal errors carry full context for the log file. What the wiki reader
//! sees comes from [`SphinxWikiError::user_message`], which never mentions
//! server paths.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a failed image download (transport level).
pub const EXIT_IMAGE_FETCH: i32 = -3;
/// Exit code for a failed compiler invocation.
pub const EXIT_COMPILE: i32 = -2;
/// Exit code for a failed copy into the public asset directory.
pub const EXIT_ASSET_PUBLISH: i32 = -4;
/// Exit code for every other fatal failure.
pub const EXIT_OTHER: i32 = -1;

/// Shown on the wiki page for failures outside the fetch/compile/publish stages.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "The RST code on this page could not be rendered; please email the site administrator.";

/// All fatal errors returned by the sphinx-wiki library.
#[derive(Debug, Error)]
pub enum SphinxWikiError {
    // ── Staging errors ────────────────────────────────────────────────────
    /// A workspace directory, source file or symlink could not be created.
    #[error("Failed to stage workspace '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Wiki errors ───────────────────────────────────────────────────────
    /// Logging in to the wiki API failed.
    #[error("Wiki login as '{user}' failed: {reason}")]
    WikiLogin { user: String, reason: String },

    /// The imageinfo query could not be sent or its response was unusable.
    #[error("Wiki API query for '{title}' failed: {reason}")]
    WikiQuery { title: String, reason: String },

    /// The image itself could not be downloaded.
    #[error("Failed to download figure '{name}' from '{url}': {reason}")]
    ImageFetch {
        name: String,
        url: String,
        reason: String,
    },

    /// The downloaded image could not be written into the workspace.
    #[error("Failed to store figure '{name}' at '{path}': {source}")]
    ImageStore {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Compiler errors ───────────────────────────────────────────────────
    /// The compiler process could not be started at all.
    #[error("Failed to start compiler '{program}': {source}")]
    CompilerSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The compiler ran but exited unsuccessfully.
    #[error("Compiler exited with status {status:?} in '{workspace}': {stderr}")]
    CompilerFailed {
        workspace: PathBuf,
        status: Option<i32>,
        stderr: String,
    },

    /// A compiled page object is missing or not valid JSON.
    #[error("Failed to read compiled output '{path}': {reason}")]
    CompiledOutput { path: PathBuf, reason: String },

    // ── Publication errors ────────────────────────────────────────────────
    /// Copying rendered images/equations to the public directory failed.
    #[error("Failed to publish assets from '{from}' to '{to}': {reason}")]
    AssetPublish {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The rendered HTML could not be written to the caller.
    #[error("Failed to write rendered HTML: {0}")]
    OutputWrite(#[source] std::io::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SphinxWikiError {
    /// Process exit code reported to the calling wiki hook.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::WikiLogin { .. }
            | Self::WikiQuery { .. }
            | Self::ImageFetch { .. }
            | Self::ImageStore { .. } => EXIT_IMAGE_FETCH,
            Self::CompilerSpawn { .. } | Self::CompilerFailed { .. } | Self::CompiledOutput { .. } => {
                EXIT_COMPILE
            }
            Self::AssetPublish { .. } => EXIT_ASSET_PUBLISH,
            Self::Workspace { .. }
            | Self::OutputWrite(_)
            | Self::InvalidConfig(_)
            | Self::Internal(_) => EXIT_OTHER,
        }
    }

    /// Short message safe to show on the wiki page.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::WikiLogin { .. }
            | Self::WikiQuery { .. }
            | Self::ImageFetch { .. }
            | Self::ImageStore { .. } => {
                "An error occurred while retrieving the figures for this page from the wiki; \
                 please email the site administrator."
            }
            Self::CompilerSpawn { .. } | Self::CompilerFailed { .. } | Self::CompiledOutput { .. } => {
                "An error occurred when compiling the RST code to HTML. \
                 Please email the site administrator."
            }
            Self::AssetPublish { .. } => {
                "An error occurred when copying over the image data to the static \
                 web-directory; please email the site administrator."
            }
            Self::Workspace { .. }
            | Self::OutputWrite(_)
            | Self::InvalidConfig(_)
            | Self::Internal(_) => GENERIC_FAILURE_MESSAGE,
        }
    }
}

/// A non-fatal problem encountered while rendering.
///
/// Stored in [`crate::output::RenderOutput::warnings`]. The render
/// continues; the compiler simply shows a broken reference for a missing
/// figure, or works from a stale source tree.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum RenderWarning {
    /// The wiki has no `File:<name>` page.
    #[error("Figure \"{name}\" not available yet in wiki")]
    FigureMissing { name: String },

    /// The wiki knows the file but serving it returned a non-success status.
    #[error("Figure \"{name}\" could not be downloaded (HTTP {status})")]
    FigureUnavailable { name: String, status: u16 },

    /// The figure name would resolve outside the workspace's image directory.
    #[error("Figure \"{name}\" has an unsafe path and was skipped")]
    FigureRejected { name: String },

    /// `pull`/`update` of the shared source tree failed; the stale tree was used.
    #[error("Could not pull and update the repository: {detail}")]
    RepositorySyncFailed { detail: String },
}
