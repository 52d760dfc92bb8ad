//! Workspace staging: one compile directory per distinct document.
//!
//! ```text
//! <extension_dir>/_compilearea/
//!     conf.py, index.rst           shared, edited by the site admin
//!     <fingerprint>/
//!         wiki_rst.rst             the normalised markup
//!         conf.py -> ../conf.py    symlinked on first use
//!         index.rst -> ../index.rst
//!         images/                  figures fetched from the wiki
//!         _build/json/             compiler output
//! ```
//!
//! Workspaces are keyed by a content hash, so two pages with different text
//! never share a directory and identical text reuses an earlier compile.
//! Nothing is ever evicted. Two processes rendering the *same* text at the
//! same moment share one workspace without locking; the last writer of
//! `wiki_rst.rst` wins.

use crate::config::{RenderConfig, RST_BASENAME, RST_EXTENSION};
use crate::error::SphinxWikiError;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Subdirectory figures are fetched into.
pub const IMAGES_DIR: &str = "images";

/// Compiler build directory, relative to the workspace.
pub const BUILD_DIR: &str = "_build";

/// Builder selected on the compiler command line.
pub const BUILDER: &str = "json";

/// Extension of one serialised page object.
pub const PAGE_EXTENSION: &str = "fjson";

/// Hex SHA-256 of the exact bytes of `text`.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A staged compile directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    fingerprint: String,
    dir: PathBuf,
}

impl Workspace {
    /// Workspace for `fingerprint` under `staging_root`. Touches nothing on disk.
    pub fn at(staging_root: &Path, fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        Self {
            dir: staging_root.join(&fingerprint),
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `wiki_rst.rst` inside the workspace.
    pub fn source_file(&self) -> PathBuf {
        self.dir.join(format!("{RST_BASENAME}.{RST_EXTENSION}"))
    }

    pub fn images_dir(&self) -> PathBuf {
        self.dir.join(IMAGES_DIR)
    }

    /// `_build/doctrees`, relative to the workspace.
    pub fn doctree_arg() -> String {
        format!("{BUILD_DIR}/doctrees")
    }

    /// `_build/json`, relative to the workspace.
    pub fn output_arg() -> String {
        format!("{BUILD_DIR}/{BUILDER}")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.join(Self::output_arg())
    }

    /// Serialised object for page `name` (without extension).
    pub fn page_object(&self, name: &str) -> PathBuf {
        self.output_dir().join(format!("{name}.{PAGE_EXTENSION}"))
    }

    /// Rendered images and equations the compiler collected.
    pub fn compiled_images_dir(&self) -> PathBuf {
        self.output_dir().join("_images")
    }
}

/// Write `text` into its fingerprint-keyed workspace and link the shared files.
///
/// Idempotent: existing directories are reused and existing entries (links,
/// or files an admin dropped in by hand) are left alone. The source file is
/// always rewritten.
pub async fn stage(text: &str, config: &RenderConfig) -> Result<Workspace, SphinxWikiError> {
    let root = config.staging_root();
    let ws = Workspace::at(&root, fingerprint(text));

    tokio::fs::create_dir_all(ws.dir())
        .await
        .map_err(|e| workspace_err(ws.dir(), e))?;

    let source = ws.source_file();
    tokio::fs::write(&source, text)
        .await
        .map_err(|e| workspace_err(&source, e))?;
    debug!("Wrote RST to {}", source.display());

    for name in &config.shared_files {
        link_shared_file(&root.join(name), &ws.dir().join(name)).await?;
    }

    Ok(ws)
}

/// Symlink `shared` to `link` unless something named `link` already exists.
///
/// Uses `symlink_metadata` so a dangling link counts as existing; the admin
/// may create the shared file later.
async fn link_shared_file(shared: &Path, link: &Path) -> Result<(), SphinxWikiError> {
    match tokio::fs::symlink_metadata(link).await {
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(workspace_err(link, e)),
    }

    match symlink(shared, link).await {
        Ok(()) => {
            debug!("Linked {} -> {}", link.display(), shared.display());
            Ok(())
        }
        // Another process staging the same text got there first.
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(workspace_err(link, e)),
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_file(target, link).await
}

fn workspace_err(path: &Path, source: std::io::Error) -> SphinxWikiError {
    SphinxWikiError::Workspace {
        path: path.to_path_buf(),
        source,
    }
}
