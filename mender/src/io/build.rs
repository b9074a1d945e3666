//! Build runner adapter for the workspace build entrypoint (`./build.sh` by default).

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::types::BuildResult;
use crate::io::process::run_command_with_timeout;

pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Workspace root, used as the working directory.
    pub workdir: PathBuf,
    /// Build argv; the first element is the program.
    pub command: Vec<String>,
    pub timeout: Duration,
    /// File that receives build stdout while the build runs.
    pub log_path: Option<PathBuf>,
}

/// Abstraction over build execution so the pipeline can be driven without spawning.
pub trait BuildRunner {
    /// Run the build. A timeout is reported through `BuildResult::timed_out`;
    /// `Err` means the build could not be run at all.
    fn run(&self, request: &BuildRequest) -> Result<BuildResult>;
}

/// Runs the configured build command as a child process.
pub struct CommandBuildRunner;

impl BuildRunner for CommandBuildRunner {
    #[instrument(skip_all, fields(workdir = %request.workdir.display(), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &BuildRequest) -> Result<BuildResult> {
        let (program, args) = request
            .command
            .split_first()
            .ok_or_else(|| anyhow!("build command is empty"))?;
        info!(command = ?request.command, "starting build");

        let mut cmd = Command::new(resolve_program(&request.workdir, program));
        cmd.args(args).current_dir(&request.workdir);

        let output = run_command_with_timeout(cmd, request.timeout, request.log_path.as_deref())
            .with_context(|| format!("run build command {:?}", request.command))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "build timed out");
        }

        Ok(BuildResult {
            command: request.command.clone(),
            exit_code: if output.timed_out {
                None
            } else {
                output.status.code()
            },
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: output.timed_out,
            duration_ms: output.elapsed.as_millis() as u64,
        })
    }
}

/// Resolve `./build.sh`-style programs against the workspace; bare names go through `PATH`.
fn resolve_program(workdir: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        workdir.join(path)
    } else {
        path.to_path_buf()
    }
}
