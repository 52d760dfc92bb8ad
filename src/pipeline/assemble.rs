//! Output assembly: compiled page objects → one HTML fragment for the wiki.
//!
//! ## Steps
//!
//! 1. Read `index.fjson` (table of contents, when enabled) and
//!    `wiki_rst.fjson` (the document) and take their `body` strings.
//! 2. Restyle the TOC and drop its self-links, then wrap it in the wiki's
//!    show/hide TOC skeleton.
//! 3. Point image `src`/`href` attributes at the public asset URL; `href`s
//!    also get `rel="sphinx_image"` so the lightbox script can find them.
//! 4. Merge the compiled `_images/` directory into the public asset directory.

use crate::config::{RenderConfig, RST_BASENAME};
use crate::error::SphinxWikiError;
use crate::pipeline::workspace::Workspace;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Name of the compiler's index page.
pub const INDEX_PAGE: &str = "index";

/// One serialised page as written by the compiler's JSON builder.
#[derive(Debug, Clone, Deserialize)]
pub struct CompiledPage {
    pub body: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Load and parse a `*.fjson` page object.
pub async fn read_page(path: &Path) -> Result<CompiledPage, SphinxWikiError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SphinxWikiError::CompiledOutput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    serde_json::from_str(&raw).map_err(|e| SphinxWikiError::CompiledOutput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Wrap the index page body as the wiki's collapsible table of contents.
pub fn build_toc(index_body: &str) -> String {
    let toc = index_body
        .replace("reference external", "reference-external-sphinx")
        .replace(&format!("{RST_BASENAME}/"), "");
    format!(
        "<table id=\"toc\" class=\"toc\" summary=\"Contents\">\n\
         <tr>\n<td>\n\t<div id=\"toctitle\"><h2>Contents</h2></div>\n  {toc}\
         </td>\n</tr>\n</table>\n\
         <script type=\"text/javascript\"> if (window.showTocToggle) \
         {{ var tocShowText = \"show\"; var tocHideText = \"hide\"; \
         showTocToggle(); }} </script>"
    )
}

/// Rewrite compiler-relative asset links to the public URL.
///
/// `src="<static_dir>/x"` becomes `src="<url>/x"` and
/// `href="<static_dir>/x"` becomes `rel="sphinx_image"href="<url>/x"`.
/// Exactly one `/` joins the URL and the remainder, however the two
/// prefixes are configured.
pub fn rewrite_static_urls(html: &str, static_dir: &str, static_url: &str) -> String {
    let dir = static_dir.trim_end_matches('/');
    if dir.is_empty() {
        return html.to_string();
    }
    let url = format!("{}/", static_url.trim_end_matches('/'));
    let pattern = format!(r#"(src|href)="{}/?"#, regex::escape(dir));
    let Ok(re) = Regex::new(&pattern) else {
        return html.to_string();
    };
    re.replace_all(html, |caps: &Captures| match &caps[1] {
        "href" => format!("rel=\"sphinx_image\"href=\"{url}"),
        _ => format!("src=\"{url}"),
    })
    .into_owned()
}

/// Concatenate the optional TOC with the document body and rewrite links.
pub async fn assemble(
    workspace: &Workspace,
    include_toc: bool,
    config: &RenderConfig,
) -> Result<String, SphinxWikiError> {
    let toc = if include_toc {
        let path = workspace.page_object(INDEX_PAGE);
        let index = read_page(&path).await?;
        debug!("Read TOC page object {}", path.display());
        build_toc(&index.body)
    } else {
        String::new()
    };

    let page = read_page(&workspace.page_object(RST_BASENAME)).await?;
    debug!(
        "Read page object {} (title {:?})",
        RST_BASENAME,
        page.title.as_deref().unwrap_or("")
    );
    let html = format!("{toc}{}", page.body);
    Ok(rewrite_static_urls(
        &html,
        &config.sphinx_static_dir,
        &config.static_content_url,
    ))
}

/// Merge `from` into `to`, like `cp -ru from/. to`.
///
/// A file is copied when the destination is missing or older than the
/// source. Existing files in `to` are never removed. A missing `from` is
/// created empty first, so a page without images publishes nothing.
///
/// Returns the number of files copied.
pub async fn publish_assets(from: &Path, to: &Path) -> Result<usize, SphinxWikiError> {
    let (from, to) = (from.to_path_buf(), to.to_path_buf());
    debug!("Publishing {} -> {}", from.display(), to.display());
    tokio::task::spawn_blocking(move || {
        copy_tree_update(&from, &to).map_err(|reason| SphinxWikiError::AssetPublish {
            from: from.clone(),
            to: to.clone(),
            reason,
        })
    })
    .await
    .map_err(|e| SphinxWikiError::Internal(format!("Asset copy task panicked: {e}")))?
}

fn copy_tree_update(source: &Path, destination: &Path) -> Result<usize, String> {
    std::fs::create_dir_all(source)
        .map_err(|err| format!("failed to create {}: {err}", source.display()))?;
    std::fs::create_dir_all(destination)
        .map_err(|err| format!("failed to create {}: {err}", destination.display()))?;

    let mut copied = 0;
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|err| format!("failed to walk {}: {err}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| format!("failed to strip prefix: {err}"))?;
        let target_path = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target_path)
                .map_err(|err| format!("failed to create {}: {err}", target_path.display()))?;
        } else if entry.file_type().is_file() {
            if !is_newer(entry.path(), &target_path) {
                continue;
            }
            std::fs::copy(entry.path(), &target_path)
                .map_err(|err| format!("failed to copy {}: {err}", target_path.display()))?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Whether `source` should overwrite `target`.
fn is_newer(source: &Path, target: &Path) -> bool {
    let modified = |p: &Path| -> Option<SystemTime> { std::fs::metadata(p).ok()?.modified().ok() };
    match (modified(source), modified(target)) {
        (_, None) => true,
        (Some(src), Some(dst)) => src > dst,
        (None, Some(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn src_prefix_is_rewritten() {
        let out = rewrite_static_urls(
            r#"<img src="../_images/foo.png" />"#,
            "../_images",
            "/pub/images/",
        );
        assert_eq!(out, r#"<img src="/pub/images/foo.png" />"#);
    }

    #[test]
    fn href_prefix_gets_lightbox_marker() {
        let out = rewrite_static_urls(
            r#"<a href="../_images/foo.png">"#,
            "../_images",
            "/pub/images/",
        );
        assert_eq!(out, r#"<a rel="sphinx_image"href="/pub/images/foo.png">"#);
    }

    #[test]
    fn rewrite_ignores_other_links_and_regex_metacharacters() {
        let html = r#"<a href="http://x/y">y</a><img src="..X_images/a.png">"#;
        assert_eq!(rewrite_static_urls(html, "../_images", "/pub/"), html);
    }

    #[test]
    fn rewrite_joins_with_single_slash() {
        let html = r#"<img src="../_images/a.png"><img src="../_images/b.png">"#;
        let expected = r#"<img src="/w/img/a.png"><img src="/w/img/b.png">"#;
        assert_eq!(rewrite_static_urls(html, "../_images/", "/w/img"), expected);
        assert_eq!(rewrite_static_urls(html, "../_images", "/w/img/"), expected);
    }

    #[test]
    fn toc_is_restyled_and_self_links_removed() {
        let body = r#"<ul><li><a class="reference external" href="wiki_rst/#intro">Intro</a></li></ul>"#;
        let toc = build_toc(body);
        assert!(toc.starts_with("<table id=\"toc\" class=\"toc\" summary=\"Contents\">"));
        assert!(toc.contains(r#"class="reference-external-sphinx""#));
        assert!(toc.contains(r##"href="#intro""##));
        assert!(!toc.contains("wiki_rst/"));
        assert!(toc.ends_with("showTocToggle(); } </script>"));
    }

    #[tokio::test]
    async fn assemble_with_and_without_toc() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::at(tmp.path(), "fp");
        std::fs::create_dir_all(ws.output_dir()).unwrap();
        std::fs::write(
            ws.page_object("index"),
            r#"{"body": "<ul><li>TOC</li></ul>", "title": "Index"}"#,
        )
        .unwrap();
        std::fs::write(
            ws.page_object("wiki_rst"),
            r#"{"body": "<p><img src=\"../_images/a.png\"></p>", "toc": "<ul></ul>"}"#,
        )
        .unwrap();
        let config = RenderConfig::builder()
            .static_content_url("/pub/")
            .build()
            .unwrap();

        let plain = assemble(&ws, false, &config).await.unwrap();
        assert_eq!(plain, r#"<p><img src="/pub/a.png"></p>"#);

        let with_toc = assemble(&ws, true, &config).await.unwrap();
        assert!(with_toc.contains("<ul><li>TOC</li></ul>"));
        assert!(with_toc.ends_with(r#"<p><img src="/pub/a.png"></p>"#));
    }

    #[tokio::test]
    async fn page_title_is_optional() {
        let tmp = TempDir::new().unwrap();
        let with = tmp.path().join("with.fjson");
        let without = tmp.path().join("without.fjson");
        std::fs::write(&with, r#"{"body": "<p/>", "title": "Reactor"}"#).unwrap();
        std::fs::write(&without, r#"{"body": "<p/>"}"#).unwrap();

        assert_eq!(read_page(&with).await.unwrap().title.as_deref(), Some("Reactor"));
        assert_eq!(read_page(&without).await.unwrap().title, None);
    }

    #[tokio::test]
    async fn missing_page_object_is_compiled_output_error() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::at(tmp.path(), "fp");
        let config = RenderConfig::default();
        let err = assemble(&ws, false, &config).await.unwrap_err();
        assert!(matches!(err, SphinxWikiError::CompiledOutput { .. }));
    }

    #[tokio::test]
    async fn publish_merges_and_keeps_existing_files() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("build/_images");
        let to = tmp.path().join("public");
        std::fs::create_dir_all(from.join("math")).unwrap();
        std::fs::create_dir_all(&to).unwrap();
        std::fs::write(from.join("a.png"), "A").unwrap();
        std::fs::write(from.join("math/eq.png"), "EQ").unwrap();
        std::fs::write(to.join("other.png"), "keep me").unwrap();

        let copied = publish_assets(&from, &to).await.unwrap();

        assert_eq!(copied, 2);
        assert_eq!(std::fs::read_to_string(to.join("a.png")).unwrap(), "A");
        assert_eq!(std::fs::read_to_string(to.join("math/eq.png")).unwrap(), "EQ");
        assert_eq!(std::fs::read_to_string(to.join("other.png")).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn publish_skips_files_newer_in_destination() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("src");
        let to = tmp.path().join("dst");
        std::fs::create_dir_all(&from).unwrap();
        std::fs::create_dir_all(&to).unwrap();
        std::fs::write(from.join("a.png"), "old").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(to.join("a.png"), "newer").unwrap();

        // Bump the destination well past the source to avoid coarse mtimes.
        let later = SystemTime::now() + Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(to.join("a.png"))
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(publish_assets(&from, &to).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(to.join("a.png")).unwrap(), "newer");
    }

    #[tokio::test]
    async fn publish_creates_missing_source() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("never-built/_images");
        let to = tmp.path().join("public");
        assert_eq!(publish_assets(&from, &to).await.unwrap(), 0);
        assert!(from.is_dir());
        assert!(to.is_dir());
    }
}
