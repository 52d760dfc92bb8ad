//! Compiler invocation and the optional source-tree sync that precedes it.
//!
//! The compiler runs with the workspace as its working directory:
//!
//! ```text
//! sphinx-build -b json -d _build/doctrees . _build/json
//! ```
//!
//! There is no partial success: a non-zero exit aborts the render.

use crate::error::{RenderWarning, SphinxWikiError};
use crate::pipeline::workspace::{Workspace, BUILDER};
use crate::tool::ExternalTool;
use std::path::Path;
use tracing::{debug, error, warn};

/// Banner prepended to the output when the shared source tree is stale.
pub const SYNC_FAILED_BANNER: &str = "<span style=\"color:red\">Could not pull and update the \
repository; please report this problem to site administrator.</span>";

/// Argument list passed to the compiler.
pub fn compiler_args() -> Vec<String> {
    vec![
        "-b".to_string(),
        BUILDER.to_string(),
        "-d".to_string(),
        Workspace::doctree_arg(),
        ".".to_string(),
        Workspace::output_arg(),
    ]
}

/// Run the compiler against `workspace`.
pub async fn compile(
    compiler: &dyn ExternalTool,
    workspace: &Workspace,
) -> Result<(), SphinxWikiError> {
    let args = compiler_args();
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    debug!("Calling {} {:?}", compiler.program(), args);

    let output = compiler
        .run(workspace.dir(), &arg_refs)
        .await
        .map_err(|source| {
            error!("Could not start compiler {}: {}", compiler.program(), source);
            SphinxWikiError::CompilerSpawn {
                program: compiler.program(),
                source,
            }
        })?;

    if !output.success() {
        error!(
            "An error occurred while calling {} {:?} (status {:?}): {}",
            compiler.program(),
            args,
            output.status,
            output.stderr.trim()
        );
        return Err(SphinxWikiError::CompilerFailed {
            workspace: workspace.dir().to_path_buf(),
            status: output.status,
            stderr: output.stderr,
        });
    }

    debug!("Compiler finished; serialised HTML written");
    Ok(())
}

/// `pull` then `update` the shared source tree at `repo_dir`.
///
/// Failure is never fatal: the caller keeps rendering against whatever is
/// checked out and shows [`SYNC_FAILED_BANNER`].
pub async fn sync_repository(vcs: &dyn ExternalTool, repo_dir: &Path) -> Option<RenderWarning> {
    for step in ["pull", "update"] {
        let detail = match vcs.run(repo_dir, &[step]).await {
            Ok(out) if out.success() => continue,
            Ok(out) => format!(
                "{} {} exited with {:?}: {}",
                vcs.program(),
                step,
                out.status,
                out.stderr.trim()
            ),
            Err(e) => format!("{} {} could not start: {}", vcs.program(), step, e),
        };
        warn!("Repository sync failed in {}: {}", repo_dir.display(), detail);
        return Some(RenderWarning::RepositorySyncFailed { detail });
    }
    debug!("Successfully updated the repository at {}", repo_dir.display());
    None
}
