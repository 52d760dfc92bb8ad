//! End-to-end tests for the render pipeline.
//!
//! The wiki is an `httpmock` server and the compiler is an in-process
//! double that writes the same page objects `sphinx-build -b json` would,
//! so these run anywhere without Sphinx or a MediaWiki install.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use sphinx_wiki::pipeline::directives::normalize;
use sphinx_wiki::pipeline::workspace::fingerprint;
use sphinx_wiki::{
    render, render_sync, render_to_writer, ExternalTool, RenderConfig, RenderWarning,
    SphinxWikiError, ToolOutput,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const TRAILER: &str = "<!-- lightbox -->";
const SYNC_BANNER_START: &str = "<span style=\"color:red\">Could not pull and update the repository";

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Writes `_build/json/{index,wiki_rst}.fjson` and copies `images/*` into
/// `_build/json/_images/`, like the JSON builder does for figures.
struct ScriptedCompiler {
    fail: bool,
    runs: AtomicUsize,
}

impl ScriptedCompiler {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            runs: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ExternalTool for ScriptedCompiler {
    fn program(&self) -> String {
        "scripted-sphinx-build".into()
    }

    async fn run(&self, cwd: &Path, args: &[&str]) -> std::io::Result<ToolOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        assert_eq!(args, ["-b", "json", "-d", "_build/doctrees", ".", "_build/json"]);

        if self.fail {
            return Ok(ToolOutput {
                status: Some(2),
                stdout: String::new(),
                stderr: "Exception occurred: reST markup error".into(),
            });
        }

        let source = std::fs::read_to_string(cwd.join("wiki_rst.rst"))?;
        let out = cwd.join("_build/json");
        let compiled_images = out.join("_images");
        std::fs::create_dir_all(&compiled_images)?;

        let mut body = format!("<pre>{source}</pre>");
        for entry in std::fs::read_dir(cwd.join("images"))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            std::fs::copy(entry.path(), compiled_images.join(&name))?;
            body.push_str(&format!(
                "<a href=\"../_images/{name}\"><img src=\"../_images/{name}\" /></a>"
            ));
        }

        std::fs::write(
            out.join("index.fjson"),
            json!({
                "body": "<ul><li><a class=\"reference external\" href=\"wiki_rst/#top\">Top</a></li></ul>",
                "title": "Contents"
            })
            .to_string(),
        )?;
        std::fs::write(
            out.join("wiki_rst.fjson"),
            json!({"body": body, "title": "Page"}).to_string(),
        )?;

        Ok(ToolOutput {
            status: Some(0),
            stdout: "build succeeded.".into(),
            stderr: String::new(),
        })
    }
}

/// Version control that fails on `pull`.
struct BrokenVcs;

#[async_trait]
impl ExternalTool for BrokenVcs {
    fn program(&self) -> String {
        "hg".into()
    }

    async fn run(&self, _cwd: &Path, _args: &[&str]) -> std::io::Result<ToolOutput> {
        Ok(ToolOutput {
            status: Some(255),
            stdout: String::new(),
            stderr: "abort: no default repository".into(),
        })
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Site {
    _tmp: TempDir,
    extension_dir: PathBuf,
    static_dir: PathBuf,
}

impl Site {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let extension_dir = tmp.path().join("extensions/sphinx-wiki");
        let static_dir = tmp.path().join("sphinx_images");
        let staging_root = extension_dir.join("_compilearea");
        std::fs::create_dir_all(&staging_root).unwrap();
        std::fs::write(staging_root.join("conf.py"), "project = 'wiki'\n").unwrap();
        std::fs::write(staging_root.join("index.rst"), ".. toctree::\n\n   wiki_rst\n").unwrap();
        Self {
            _tmp: tmp,
            extension_dir,
            static_dir,
        }
    }

    fn config(&self, api_url: &str, compiler: Arc<dyn ExternalTool>) -> RenderConfig {
        RenderConfig::builder()
            .wiki_api_url(api_url)
            .extension_dir(&self.extension_dir)
            .static_content_dir(&self.static_dir)
            .static_content_url("/w/sphinx_images/")
            .append_html(TRAILER)
            .compiler(compiler)
            .http_timeout_secs(5)
            .build()
            .unwrap()
    }

    fn staging_root(&self) -> PathBuf {
        self.extension_dir.join("_compilearea")
    }
}

/// Serve `File:<name>` from the mock wiki.
async fn serve_figure(server: &MockServer, name: &str, bytes: &[u8]) {
    let image_path = format!("/images/{name}");
    let image_url = server.url(&image_path);
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api.php")
                .query_param("titles", format!("File:{name}"));
            then.status(200).json_body(json!({
                "query": {"pages": {"7": {
                    "pageid": 7,
                    "title": format!("File:{name}"),
                    "imageinfo": [{"url": image_url}]
                }}}
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(image_path);
            then.status(200).body(bytes.to_vec());
        })
        .await;
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_render_with_toc_and_figure() {
    let server = MockServer::start_async().await;
    serve_figure(&server, "reactor.png", b"\x89PNG reactor").await;
    let site = Site::new();
    let compiler = ScriptedCompiler::ok();
    let config = site.config(&server.url("/api.php"), compiler.clone());

    let raw = "Reactor\n=======\n\n.. figure:: images/reactor.png\n    :scale: 40\n";
    let output = render(raw, &config).await.unwrap();

    assert!(output.html.starts_with("<table id=\"toc\""));
    assert!(output.html.contains("reference-external-sphinx"));
    assert!(output.html.contains("href=\"#top\""));
    assert!(output.html.contains("src=\"/w/sphinx_images/reactor.png\""));
    assert!(output
        .html
        .contains("rel=\"sphinx_image\"href=\"/w/sphinx_images/reactor.png\""));
    assert!(!output.html.contains("../_images"));
    assert!(output.html.ends_with(TRAILER));

    assert!(output.warnings.is_empty());
    assert_eq!(output.stats.figures_referenced, 1);
    assert_eq!(output.stats.figures_fetched, 1);
    assert_eq!(output.stats.assets_published, 1);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 1);

    assert_eq!(output.fingerprint, fingerprint(raw));
    assert_eq!(output.workspace, site.staging_root().join(&output.fingerprint));
    assert!(output.workspace.join("conf.py").exists());
    assert!(output.workspace.join("index.rst").exists());
    assert_eq!(
        std::fs::read(output.workspace.join("images/reactor.png")).unwrap(),
        b"\x89PNG reactor"
    );
    assert_eq!(
        std::fs::read(site.static_dir.join("reactor.png")).unwrap(),
        b"\x89PNG reactor"
    );
}

#[tokio::test]
async fn test_toc_directive_omits_contents() {
    let site = Site::new();
    let config = site.config("http://127.0.0.1:9/api.php", ScriptedCompiler::ok());

    let raw = "<rst-options: 'toc' = \"False\" />\nJust text.\n";
    let output = render(raw, &config).await.unwrap();

    assert!(!output.options.toc);
    assert!(output.options.reset_figures);
    assert!(!output.html.contains("id=\"toc\""));
    assert!(!output.html.contains("rst-options"));
    assert!(output.html.starts_with("<pre>Just text.</pre>"));
}

#[tokio::test]
async fn test_identical_text_reuses_workspace() {
    let site = Site::new();
    let config = site.config("http://127.0.0.1:9/api.php", ScriptedCompiler::ok());

    let first = render("Same text\n", &config).await.unwrap();
    let second = render("Same text\n", &config).await.unwrap();
    let other = render("Other text\n", &config).await.unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.workspace, second.workspace);
    assert_eq!(first.html, second.html);
    assert_ne!(first.workspace, other.workspace);
}

#[test]
fn test_render_sync_outside_runtime() {
    let site = Site::new();
    let config = site.config("http://127.0.0.1:9/api.php", ScriptedCompiler::ok());
    let output = render_sync("Plain paragraph.\n", &config).unwrap();
    assert!(output.html.contains("Plain paragraph."));
}

#[tokio::test]
async fn test_render_to_writer_appends_newline() {
    let site = Site::new();
    let config = site.config("http://127.0.0.1:9/api.php", ScriptedCompiler::ok());
    let mut out = Vec::new();
    let output = render_to_writer("Hello.\n", &config, &mut out).await.unwrap();
    assert_eq!(out, format!("{}\n", output.html).into_bytes());
}

// ── Figures ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_figure_still_renders() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api.php")
                .query_param("titles", "File:later.png");
            then.status(200).json_body(json!({
                "query": {"pages": {"-1": {"ns": 6, "title": "File:later.png", "missing": ""}}}
            }));
        })
        .await;
    let site = Site::new();
    let config = site.config(&server.url("/api.php"), ScriptedCompiler::ok());

    let output = render(".. figure:: images/later.png\n", &config).await.unwrap();

    assert_eq!(
        output.warnings,
        vec![RenderWarning::FigureMissing {
            name: "later.png".into()
        }]
    );
    assert_eq!(output.stats.figures_missing, 1);
    assert_eq!(output.stats.figures_fetched, 0);
    assert!(output.html.ends_with(TRAILER));
}

#[tokio::test]
async fn test_cached_figure_reused_without_wiki() {
    let site = Site::new();
    // Nothing listens on port 9: any wiki call would fail the render.
    let config = site.config("http://127.0.0.1:9/api.php", ScriptedCompiler::ok());

    let raw = "<rst-options: reset-figures=false />\n.. figure:: images/cached.png\n";
    let ws = site.staging_root().join(fingerprint(&normalize(raw).text));
    std::fs::create_dir_all(ws.join("images")).unwrap();
    std::fs::write(ws.join("images/cached.png"), b"cached").unwrap();

    let output = render(raw, &config).await.unwrap();

    assert!(!output.options.reset_figures);
    assert_eq!(output.workspace, ws);
    assert_eq!(output.stats.figures_reused, 1);
    assert_eq!(output.stats.figures_fetched, 0);
    assert_eq!(
        std::fs::read(site.static_dir.join("cached.png")).unwrap(),
        b"cached"
    );
}

#[tokio::test]
async fn test_cached_figure_refetched_by_default() {
    let server = MockServer::start_async().await;
    serve_figure(&server, "reactor.png", b"fresh").await;
    let site = Site::new();
    let config = site.config(&server.url("/api.php"), ScriptedCompiler::ok());

    let raw = ".. figure:: images/reactor.png\n";
    let ws = site.staging_root().join(fingerprint(raw));
    std::fs::create_dir_all(ws.join("images")).unwrap();
    std::fs::write(ws.join("images/reactor.png"), b"stale").unwrap();

    let output = render(raw, &config).await.unwrap();

    assert!(output.options.reset_figures);
    assert_eq!(output.stats.figures_fetched, 1);
    assert_eq!(output.stats.figures_reused, 0);
    assert_eq!(std::fs::read(ws.join("images/reactor.png")).unwrap(), b"fresh");
}

#[tokio::test]
async fn test_wildcard_figure_fetches_png() {
    let server = MockServer::start_async().await;
    serve_figure(&server, "plot.png", b"plot").await;
    let site = Site::new();
    let config = site.config(&server.url("/api.php"), ScriptedCompiler::ok());

    let output = render(".. figure:: images/plot.*\n", &config).await.unwrap();

    assert_eq!(output.stats.figures_fetched, 1);
    assert!(output.workspace.join("images/plot.png").exists());
}

#[tokio::test]
async fn test_unreachable_image_host_is_fetch_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api.php");
            then.status(200).json_body(json!({
                "query": {"pages": {"3": {
                    "pageid": 3,
                    "imageinfo": [{"url": "http://127.0.0.1:9/images/x.png"}]
                }}}
            }));
        })
        .await;
    let site = Site::new();
    let compiler = ScriptedCompiler::ok();
    let config = site.config(&server.url("/api.php"), compiler.clone());

    let err = render(".. figure:: images/x.png\n", &config).await.unwrap_err();

    assert!(matches!(err, SphinxWikiError::ImageFetch { .. }));
    assert_eq!(err.exit_code(), -3);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 0);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_wiki_query_failure_aborts_before_compiling() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api.php");
            then.status(500).body("Internal Server Error");
        })
        .await;
    let site = Site::new();
    let compiler = ScriptedCompiler::ok();
    let config = site.config(&server.url("/api.php"), compiler.clone());

    let mut out = Vec::new();
    let err = render_to_writer(".. figure:: images/a.png\n", &config, &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, SphinxWikiError::WikiQuery { .. }));
    assert_eq!(err.exit_code(), -3);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 0);
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_wiki_api_error_body_is_fetch_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api.php");
            then.status(200).json_body(json!({
                "error": {"code": "readapidenied", "info": "You need read permission"}
            }));
        })
        .await;
    let site = Site::new();
    let compiler = ScriptedCompiler::ok();
    let config = site.config(&server.url("/api.php"), compiler.clone());

    let err = render(".. figure:: images/a.png\n", &config).await.unwrap_err();

    assert!(matches!(err, SphinxWikiError::WikiQuery { ref reason, .. } if reason.contains("readapidenied")));
    assert_eq!(err.exit_code(), -3);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_asset_publish_failure_is_fatal() {
    let server = MockServer::start_async().await;
    serve_figure(&server, "r.png", b"png").await;
    let site = Site::new();
    let config = site.config(&server.url("/api.php"), ScriptedCompiler::ok());

    // A directory where the published image should go makes the copy fail.
    let blocker = site.static_dir.join("r.png");
    std::fs::create_dir_all(&blocker).unwrap();
    std::fs::File::open(&blocker)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(86_400))
        .unwrap();

    let mut out = Vec::new();
    let err = render_to_writer(".. figure:: images/r.png\n", &config, &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, SphinxWikiError::AssetPublish { .. }));
    assert_eq!(err.exit_code(), -4);
    assert!(!err.user_message().contains("sphinx_images"));
    assert!(out.is_empty());
    assert!(blocker.is_dir());
}

#[tokio::test]
async fn test_compiler_failure_is_fatal_and_writes_nothing() {
    let site = Site::new();
    let config = site.config("http://127.0.0.1:9/api.php", ScriptedCompiler::failing());

    let mut out = Vec::new();
    let err = render_to_writer("Broken `markup\n", &config, &mut out)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SphinxWikiError::CompilerFailed {
            status: Some(2),
            ..
        }
    ));
    assert_eq!(err.exit_code(), -2);
    assert!(!err.user_message().contains(&*site.extension_dir.to_string_lossy()));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_repository_sync_failure_prepends_banner() {
    let site = Site::new();
    let repo = site.extension_dir.join("shared-sources");
    std::fs::create_dir_all(&repo).unwrap();
    let config = RenderConfig {
        local_repo_dir: Some(repo),
        vcs: Some(Arc::new(BrokenVcs)),
        ..site.config("http://127.0.0.1:9/api.php", ScriptedCompiler::ok())
    };

    let output = render("Uses shared includes.\n", &config).await.unwrap();

    assert!(output.html.starts_with(SYNC_BANNER_START));
    assert!(output.html.contains("Uses shared includes."));
    assert!(matches!(
        output.warnings.as_slice(),
        [RenderWarning::RepositorySyncFailed { detail }] if detail.contains("no default repository")
    ));
}
