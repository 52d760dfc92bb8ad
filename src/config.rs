//! Server configuration for rendering wiki RST blocks.
//!
//! Everything the pipeline needs to know about the host (where the wiki API
//! lives, where workspaces are staged, how compiler output maps to public
//! URLs) lives in one [`RenderConfig`], constructed once at process start
//! and passed by reference into every stage. Per-document switches
//! (`toc`, `reset-figures`) are not here; they come from the markup itself,
//! see [`crate::pipeline::directives`].

use crate::error::SphinxWikiError;
use crate::tool::{CommandTool, ExternalTool};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// HTML appended to every rendered block: jQuery + fancybox, wired to the
/// `rel="sphinx_image"` links produced by the URL rewrite.
pub const DEFAULT_APPEND_HTML: &str = r#"<script type="text/javascript" src="/media/jquery-1.4.2.min.js"></script>
<script type="text/javascript" src="/media/fancybox/jquery.mousewheel-3.0.2.pack.js"></script>
<script type="text/javascript" src="/media/fancybox/jquery.fancybox-1.3.1.pack.js"></script>
<link rel="stylesheet" type="text/css" href="/media/fancybox/jquery.fancybox-1.3.1.css" media="screen" />
<script type="text/javascript">
            $(document).ready(function() {
                $("a[rel=sphinx_image]").fancybox();
                $("a.embed").fancybox({'hideOnContentClick': true});
            });
</script>
"#;

/// Name of the file the RST text is written to, without extension.
pub const RST_BASENAME: &str = "wiki_rst";

/// Extension of the staged RST file.
pub const RST_EXTENSION: &str = "rst";

/// Configuration for a render.
///
/// Built via [`RenderConfig::builder()`] or using [`RenderConfig::default()`].
///
/// # Example
/// ```rust
/// use sphinx_wiki::RenderConfig;
///
/// let config = RenderConfig::builder()
///     .wiki_api_url("https://wiki.example.com/w/api.php")
///     .extension_dir("/srv/wiki/extensions/sphinx-wiki")
///     .static_content_url("/w/sphinx_images/")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// MediaWiki `api.php` endpoint used to look up figures.
    pub wiki_api_url: String,

    /// Account used for API access. When `None`, queries are anonymous.
    pub wiki_username: Option<String>,

    pub wiki_password: Option<String>,

    /// Directory the extension is installed in. Shared compiler files
    /// (`conf.py`, `index.rst`, …) live in `<extension_dir>/<compile_area>/`
    /// and the log file is written here.
    pub extension_dir: PathBuf,

    /// Staging root below `extension_dir`. Default: `_compilearea`.
    pub compile_area: String,

    /// Files symlinked from the staging root into every workspace.
    /// Default: `conf.py`, `index.rst`.
    ///
    /// A link is only created when the workspace has no entry of that name,
    /// so touching the shared copy updates every workspace at once.
    pub shared_files: Vec<String>,

    /// Compiler executable. Default: `sphinx-build` (looked up on `PATH`).
    pub sphinx_executable: PathBuf,

    /// Pre-constructed compiler. Takes precedence over `sphinx_executable`.
    pub compiler: Option<Arc<dyn ExternalTool>>,

    /// Asset prefix as it appears in compiler output. Default: `../_images`.
    pub sphinx_static_dir: String,

    /// Public URL that replaces `sphinx_static_dir`. Default: `/w/sphinx_images/`.
    pub static_content_url: String,

    /// Directory served at `static_content_url`.
    pub static_content_dir: PathBuf,

    /// HTML appended verbatim to every render. Default: [`DEFAULT_APPEND_HTML`].
    pub append_html: String,

    /// Shared source tree pulled and updated before every compile.
    /// `None` disables the sync step.
    pub local_repo_dir: Option<PathBuf>,

    /// Version-control executable. Default: `hg`.
    pub vcs_executable: PathBuf,

    /// Pre-constructed VCS client. Takes precedence over `vcs_executable`.
    pub vcs: Option<Arc<dyn ExternalTool>>,

    /// Timeout for each wiki API call and image download, in seconds. Default: 120.
    pub http_timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            wiki_api_url: "http://localhost/w/api.php".to_string(),
            wiki_username: None,
            wiki_password: None,
            extension_dir: PathBuf::from("/var/www/w/extensions/sphinx-wiki"),
            compile_area: "_compilearea".to_string(),
            shared_files: vec!["conf.py".to_string(), "index.rst".to_string()],
            sphinx_executable: PathBuf::from("sphinx-build"),
            compiler: None,
            sphinx_static_dir: "../_images".to_string(),
            static_content_url: "/w/sphinx_images/".to_string(),
            static_content_dir: PathBuf::from("/var/www/w/sphinx_images"),
            append_html: DEFAULT_APPEND_HTML.to_string(),
            local_repo_dir: None,
            vcs_executable: PathBuf::from("hg"),
            vcs: None,
            http_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("wiki_api_url", &self.wiki_api_url)
            .field("wiki_username", &self.wiki_username)
            .field("wiki_password", &self.wiki_password.as_ref().map(|_| "<redacted>"))
            .field("extension_dir", &self.extension_dir)
            .field("compile_area", &self.compile_area)
            .field("shared_files", &self.shared_files)
            .field("sphinx_executable", &self.sphinx_executable)
            .field("compiler", &self.compiler.as_ref().map(|_| "<dyn ExternalTool>"))
            .field("sphinx_static_dir", &self.sphinx_static_dir)
            .field("static_content_url", &self.static_content_url)
            .field("static_content_dir", &self.static_content_dir)
            .field("local_repo_dir", &self.local_repo_dir)
            .field("vcs_executable", &self.vcs_executable)
            .field("vcs", &self.vcs.as_ref().map(|_| "<dyn ExternalTool>"))
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Root under which every workspace directory is created.
    pub fn staging_root(&self) -> PathBuf {
        self.extension_dir.join(&self.compile_area)
    }

    /// The compiler to invoke: the injected tool, else `sphinx_executable`.
    pub fn compiler_tool(&self) -> Arc<dyn ExternalTool> {
        match self.compiler {
            Some(ref tool) => Arc::clone(tool),
            None => Arc::new(CommandTool::new(&self.sphinx_executable)),
        }
    }

    /// The VCS client: the injected tool, else `vcs_executable`.
    pub fn vcs_tool(&self) -> Arc<dyn ExternalTool> {
        match self.vcs {
            Some(ref tool) => Arc::clone(tool),
            None => Arc::new(CommandTool::new(&self.vcs_executable)),
        }
    }

    /// Whether both API credentials are present.
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.wiki_username, &self.wiki_password),
            (Some(u), Some(_)) if !u.is_empty()
        )
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn wiki_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.wiki_api_url = url.into();
        self
    }

    pub fn wiki_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.wiki_username = Some(user.into());
        self.config.wiki_password = Some(password.into());
        self
    }

    pub fn extension_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.extension_dir = dir.into();
        self
    }

    pub fn compile_area(mut self, name: impl Into<String>) -> Self {
        self.config.compile_area = name.into();
        self
    }

    pub fn shared_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.shared_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn sphinx_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sphinx_executable = path.into();
        self
    }

    pub fn compiler(mut self, tool: Arc<dyn ExternalTool>) -> Self {
        self.config.compiler = Some(tool);
        self
    }

    pub fn sphinx_static_dir(mut self, prefix: impl Into<String>) -> Self {
        self.config.sphinx_static_dir = prefix.into();
        self
    }

    pub fn static_content_url(mut self, url: impl Into<String>) -> Self {
        self.config.static_content_url = url.into();
        self
    }

    pub fn static_content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.static_content_dir = dir.into();
        self
    }

    pub fn append_html(mut self, html: impl Into<String>) -> Self {
        self.config.append_html = html.into();
        self
    }

    pub fn local_repo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.local_repo_dir = Some(dir.into());
        self
    }

    pub fn vcs_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.vcs_executable = path.into();
        self
    }

    pub fn vcs(mut self, tool: Arc<dyn ExternalTool>) -> Self {
        self.config.vcs = Some(tool);
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, SphinxWikiError> {
        let c = &self.config;
        let url = c.wiki_api_url.trim();
        if url.is_empty() {
            return Err(SphinxWikiError::InvalidConfig(
                "wiki API URL must not be empty".into(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SphinxWikiError::InvalidConfig(format!(
                "wiki API URL must be http:// or https://, got '{url}'"
            )));
        }
        if c.sphinx_static_dir.trim_end_matches('/').is_empty() {
            return Err(SphinxWikiError::InvalidConfig(
                "sphinx static dir must not be empty".into(),
            ));
        }
        if c.compile_area.is_empty() || !is_plain_file_name(&c.compile_area) {
            return Err(SphinxWikiError::InvalidConfig(format!(
                "compile area must be a single directory name, got '{}'",
                c.compile_area
            )));
        }
        if c.shared_files.is_empty() {
            return Err(SphinxWikiError::InvalidConfig(
                "at least one shared file (conf.py) is required".into(),
            ));
        }
        if let Some(bad) = c.shared_files.iter().find(|f| !is_plain_file_name(f)) {
            return Err(SphinxWikiError::InvalidConfig(format!(
                "shared file '{bad}' must be a plain file name"
            )));
        }
        Ok(self.config)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}
