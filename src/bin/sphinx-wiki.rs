//! CLI binary for sphinx-wiki.
//!
//! The wiki runs this once per `<rst>` tag: markup on stdin, HTML on stdout.
//! On a fatal error a short notice goes to stdout (the wiki shows stdout
//! verbatim) and the process exits with the error's exit code.

use anyhow::{Context, Result};
use clap::Parser;
use sphinx_wiki::error::{EXIT_OTHER, GENERIC_FAILURE_MESSAGE};
use sphinx_wiki::{render, render_to_writer, RenderConfig};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "log-sphinx-wiki.log";
const LOG_FILES_KEPT: usize = 5;

/// Debug output from this crate only; dependencies log warnings and up.
const DEFAULT_LOG_FILTER: &str = "warn,sphinx_wiki=debug";

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render a file the way the wiki would
  sphinx-wiki --api-url https://wiki.example.org/w/api.php < page.rst

  # Bot credentials and a shared source tree
  SPHINX_WIKI_USERNAME=RstBot SPHINX_WIKI_PASSWORD=secret \
    sphinx-wiki --repo-dir /srv/docs < page.rst

  # Debug a render with logs on the terminal and no log file
  sphinx-wiki --verbose --no-log-file < page.rst

INLINE OPTIONS (one per line inside the markup):
  <rst-options: toc=false />             omit the table of contents
  <rst-options: reset-figures=false />   reuse figures already downloaded

EXIT CODES:
  0   success (warnings are logged, not fatal)
  -1  staging or configuration failure
  -2  sphinx-build failed
  -3  a figure could not be fetched from the wiki
  -4  compiled images could not be published
"#;

/// Render reStructuredText from a MediaWiki page with Sphinx.
#[derive(Parser, Debug)]
#[command(
    name = "sphinx-wiki",
    version,
    about = "Render reStructuredText from a MediaWiki page with Sphinx",
    long_about = "Reads reStructuredText on stdin, compiles it with sphinx-build in a \
workspace keyed by the text's content hash, downloads referenced figures from the wiki, \
and writes an HTML fragment to stdout.",
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// MediaWiki api.php endpoint.
    #[arg(long, env = "SPHINX_WIKI_API_URL")]
    api_url: Option<String>,

    /// Wiki bot user name.
    #[arg(long, env = "SPHINX_WIKI_USERNAME", requires = "password")]
    username: Option<String>,

    /// Wiki bot password.
    #[arg(long, env = "SPHINX_WIKI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Extension directory holding conf.py, index.rst and the log files.
    #[arg(long, env = "SPHINX_WIKI_EXTENSION_DIR")]
    extension_dir: Option<PathBuf>,

    /// Staging area name under the extension directory.
    #[arg(long, env = "SPHINX_WIKI_COMPILE_AREA")]
    compile_area: Option<String>,

    /// Files linked into every workspace (comma separated).
    #[arg(long, env = "SPHINX_WIKI_SHARED_FILES", value_delimiter = ',')]
    shared_files: Vec<String>,

    /// sphinx-build executable.
    #[arg(long, env = "SPHINX_WIKI_SPHINX_BUILD")]
    sphinx_build: Option<PathBuf>,

    /// Image prefix in the compiled HTML to rewrite.
    #[arg(long, env = "SPHINX_WIKI_SPHINX_STATIC_DIR")]
    sphinx_static_dir: Option<String>,

    /// Public URL prefix for compiled images.
    #[arg(long, env = "SPHINX_WIKI_STATIC_URL")]
    static_url: Option<String>,

    /// Directory served at --static-url.
    #[arg(long, env = "SPHINX_WIKI_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Read the HTML trailer from this file instead of the built-in lightbox script.
    #[arg(long, env = "SPHINX_WIKI_APPEND_HTML_FILE", conflicts_with = "no_append_html")]
    append_html_file: Option<PathBuf>,

    /// Append nothing after the rendered HTML.
    #[arg(long)]
    no_append_html: bool,

    /// Shared source tree to pull and update before compiling.
    #[arg(long, env = "SPHINX_WIKI_REPO_DIR")]
    repo_dir: Option<PathBuf>,

    /// Version-control executable used for --repo-dir.
    #[arg(long, env = "SPHINX_WIKI_VCS")]
    vcs: Option<PathBuf>,

    /// Timeout for each wiki request in seconds.
    #[arg(long, env = "SPHINX_WIKI_HTTP_TIMEOUT")]
    http_timeout: Option<u64>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "SPHINX_WIKI_LOG_LEVEL", default_value = DEFAULT_LOG_FILTER)]
    log_level: String,

    /// Also log to stderr.
    #[arg(short, long, env = "SPHINX_WIKI_VERBOSE")]
    verbose: bool,

    /// Do not write the rotating log file.
    #[arg(long, env = "SPHINX_WIKI_NO_LOG_FILE")]
    no_log_file: bool,

    /// Print the full RenderOutput as JSON instead of bare HTML.
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sphinx-wiki: {e:#}");
            let _ = writeln!(io::stdout(), "{GENERIC_FAILURE_MESSAGE}");
            EXIT_OTHER
        }
    };
    std::process::exit(code);
}

/// Returns the process exit code. The log guard lives until this returns so
/// buffered lines are flushed before `exit`.
async fn run(cli: Cli) -> Result<i32> {
    let log_dir = cli
        .extension_dir
        .clone()
        .unwrap_or_else(|| RenderConfig::default().extension_dir);
    let _guard = init_logging(&cli, &log_dir)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    let config = match build_config(&cli).await {
        Ok(config) => config,
        Err(e) => return report_startup_failure(&mut handle, &e),
    };
    let raw = match read_markup(io::stdin()) {
        Ok(raw) => raw,
        Err(e) => return report_startup_failure(&mut handle, &e),
    };

    if cli.json {
        return match render(&raw, &config).await {
            Ok(output) => {
                let json =
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
                writeln!(handle, "{json}").context("Failed to write to stdout")?;
                Ok(0)
            }
            Err(e) => {
                writeln!(handle, "{}", e.user_message()).context("Failed to write to stdout")?;
                Ok(e.exit_code())
            }
        };
    }

    match render_to_writer(&raw, &config, &mut handle).await {
        Ok(output) => {
            if output.has_warnings() {
                for warning in &output.warnings {
                    tracing::warn!("{warning}");
                }
            }
            tracing::debug!(
                "Rendered in {}ms ({} figures fetched)",
                output.stats.total_duration_ms,
                output.stats.figures_fetched
            );
            Ok(0)
        }
        Err(e) => {
            writeln!(handle, "{}", e.user_message()).context("Failed to write to stdout")?;
            Ok(e.exit_code())
        }
    }
}

/// The whole of `input` as UTF-8.
fn read_markup<R: Read>(mut input: R) -> Result<String> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("Failed to read markup from stdin")?;
    Ok(raw)
}

/// Log a failure that happened before rendering and show the generic notice.
fn report_startup_failure<W: Write>(out: &mut W, err: &anyhow::Error) -> Result<i32> {
    tracing::error!(exit_code = EXIT_OTHER, "Render not started: {err:#}");
    writeln!(out, "{GENERIC_FAILURE_MESSAGE}").context("Failed to write to stdout")?;
    Ok(EXIT_OTHER)
}

/// Registry with an env filter, a rotating file layer in `log_dir`, and an
/// optional stderr layer.
fn init_logging(cli: &Cli, log_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let (file_layer, guard) = if cli.no_log_file {
        (None, None)
    } else {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
        let appender = RollingBuilder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(LOG_FILES_KEPT)
            .build(log_dir)
            .context("Failed to open log file")?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        (Some(layer), Some(guard))
    };

    let stderr_layer = cli
        .verbose
        .then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

/// Map CLI args to `RenderConfig`; unset args keep the library defaults.
async fn build_config(cli: &Cli) -> Result<RenderConfig> {
    let mut builder = RenderConfig::builder();

    if let Some(ref url) = cli.api_url {
        builder = builder.wiki_api_url(url);
    }
    if let (Some(user), Some(password)) = (&cli.username, &cli.password) {
        builder = builder.wiki_credentials(user, password);
    }
    if let Some(ref dir) = cli.extension_dir {
        builder = builder.extension_dir(dir);
    }
    if let Some(ref area) = cli.compile_area {
        builder = builder.compile_area(area);
    }
    if !cli.shared_files.is_empty() {
        builder = builder.shared_files(cli.shared_files.iter().cloned());
    }
    if let Some(ref exe) = cli.sphinx_build {
        builder = builder.sphinx_executable(exe);
    }
    if let Some(ref prefix) = cli.sphinx_static_dir {
        builder = builder.sphinx_static_dir(prefix);
    }
    if let Some(ref url) = cli.static_url {
        builder = builder.static_content_url(url);
    }
    if let Some(ref dir) = cli.static_dir {
        builder = builder.static_content_dir(dir);
    }
    if let Some(ref dir) = cli.repo_dir {
        builder = builder.local_repo_dir(dir);
    }
    if let Some(ref exe) = cli.vcs {
        builder = builder.vcs_executable(exe);
    }
    if let Some(secs) = cli.http_timeout {
        builder = builder.http_timeout_secs(secs);
    }

    if cli.no_append_html {
        builder = builder.append_html("");
    } else if let Some(ref path) = cli.append_html_file {
        let html = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read HTML trailer from {:?}", path))?;
        builder = builder.append_html(html);
    }

    builder.build().context("Invalid configuration")
}
