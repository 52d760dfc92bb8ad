//! # sphinx-wiki
//!
//! Render reStructuredText blocks embedded in MediaWiki pages to HTML with
//! Sphinx.
//!
//! The wiki hands the contents of an `<rst>` tag to this crate; the crate
//! stages the text in a workspace named after its content hash, pulls the
//! figures it references out of the wiki, runs `sphinx-build`, and returns
//! an HTML fragment the wiki splices back into the page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! <rst> text
//!  │
//!  ├─ 1. Normalize  strip <rst-options: toc=false /> directives
//!  ├─ 2. Stage      _compilearea/<sha256>/wiki_rst.rst + shared conf.py
//!  ├─ 3. Figures    MediaWiki imageinfo lookup, streamed downloads
//!  ├─ 4. Compile    sphinx-build -b json (after optional hg pull/update)
//!  └─ 5. Assemble   TOC + body, asset URLs rewritten, _images published
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sphinx_wiki::{render, RenderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RenderConfig::builder()
//!         .wiki_api_url("https://wiki.example.org/w/api.php")
//!         .extension_dir("/var/www/w/extensions/sphinx-wiki")
//!         .build()?;
//!     let output = render("Title\n=====\n\nHello *world*.\n", &config).await?;
//!     println!("{}", output.html);
//!     for warning in &output.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `sphinx-wiki` binary (clap + anyhow + tracing-subscriber + tracing-appender) |
//!
//! ## Compiler output layout
//!
//! `sphinx-build` runs with the `json` builder, so each workspace holds
//! `_build/json/<page>.fjson` rather than the `_build/pickle/<page>.fpickle`
//! files older installs of the extension produced. The page objects carry
//! the same `body` and `title` fields; only the serialisation differs.
//! Compiled images land in `_build/json/_images/`. Workspaces left over
//! from a pickle-based install are recompiled on their next render.
//!
//! ## Concurrency
//!
//! Two renders of identical text share one workspace directory and are not
//! serialised against each other. The wiki invokes one process per tag, so
//! in practice collisions are rare, but callers embedding the library in a
//! long-running service should serialise by [`RenderOutput::fingerprint`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod tool;
pub mod wiki;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RenderConfig, RenderConfigBuilder};
pub use error::{RenderWarning, SphinxWikiError};
pub use output::{RenderOutput, RenderStats};
pub use pipeline::directives::DocumentOptions;
pub use render::{render, render_sync, render_to_writer};
pub use tool::{CommandTool, ExternalTool, ToolOutput};
