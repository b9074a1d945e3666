//! Per-run artifact directory `<log_root>/<run_id>/`.
//!
//! Artifacts are written as each stage completes, not buffered, so an aborted
//! run still leaves a partial trail.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub task_path: PathBuf,
    pub plan_path: PathBuf,
    pub retrieve_path: PathBuf,
    pub edits_path: PathBuf,
    pub apply_path: PathBuf,
    pub verdict_path: PathBuf,
}

impl RunPaths {
    pub fn new(log_root: &Path, run_id: &str) -> Self {
        let dir = log_root.join(run_id);
        Self {
            dir: dir.clone(),
            task_path: dir.join("task.txt"),
            plan_path: dir.join("plan.json"),
            retrieve_path: dir.join("retrieve.json"),
            edits_path: dir.join("edits.json"),
            apply_path: dir.join("apply.json"),
            verdict_path: dir.join("verdict.json"),
        }
    }

    /// Structured record of build `attempt` (0 = before repair, 1 = after).
    pub fn build_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("build_{attempt}.json"))
    }

    /// Stdout of build `attempt`, streamed while the build runs.
    pub fn build_log_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("build_{attempt}.log"))
    }
}

/// Writer for one run's artifacts.
#[derive(Debug)]
pub struct RunLog {
    paths: RunPaths,
}

impl RunLog {
    /// Create the run directory. Fails if a directory for `run_id` already exists.
    pub fn create(log_root: &Path, run_id: &str) -> Result<Self> {
        fs::create_dir_all(log_root)
            .with_context(|| format!("create log root {}", log_root.display()))?;
        let paths = RunPaths::new(log_root, run_id);
        match fs::create_dir(&paths.dir) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                bail!("run directory {} already exists", paths.dir.display());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create run dir {}", paths.dir.display()));
            }
        }
        debug!(dir = %paths.dir.display(), "run directory created");
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn write_task(&self, task: &str) -> Result<()> {
        write_text(&self.paths.task_path, task)
    }

    pub fn write_plan(&self, plan: &[String]) -> Result<()> {
        write_json(&self.paths.plan_path, &plan)
    }

    pub fn write_build<T: Serialize>(&self, attempt: u32, build: &T) -> Result<()> {
        write_json(&self.paths.build_path(attempt), build)
    }

    pub fn write_retrieve<T: Serialize>(&self, retrieve: &T) -> Result<()> {
        write_json(&self.paths.retrieve_path, retrieve)
    }

    pub fn write_edits<T: Serialize>(&self, edits: &T) -> Result<()> {
        write_json(&self.paths.edits_path, edits)
    }

    pub fn write_apply<T: Serialize>(&self, apply: &T) -> Result<()> {
        write_json(&self.paths.apply_path, apply)
    }

    pub fn write_verdict<T: Serialize>(&self, verdict: &T) -> Result<()> {
        write_json(&self.paths.verdict_path, verdict)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "1700000000000");

        assert!(paths.dir.ends_with("1700000000000"));
        assert!(paths.task_path.ends_with("task.txt"));
        assert!(paths.plan_path.ends_with("plan.json"));
        assert!(paths.build_path(0).ends_with("build_0.json"));
        assert!(paths.build_log_path(1).ends_with("build_1.log"));
        assert!(paths.retrieve_path.ends_with("retrieve.json"));
        assert!(paths.edits_path.ends_with("edits.json"));
        assert!(paths.apply_path.ends_with("apply.json"));
        assert!(paths.verdict_path.ends_with("verdict.json"));
    }

    #[test]
    fn writes_artifacts_incrementally() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(&temp.path().join("runs"), "42").expect("create");

        log.write_task("fix the build").expect("task");
        log.write_plan(&["a".to_string(), "b".to_string()])
            .expect("plan");

        let paths = log.paths();
        assert_eq!(
            fs::read_to_string(&paths.task_path).expect("read task"),
            "fix the build"
        );
        assert_eq!(
            fs::read_to_string(&paths.plan_path).expect("read plan"),
            "[\n  \"a\",\n  \"b\"\n]\n"
        );
        assert!(!paths.edits_path.exists());
    }

    #[test]
    fn existing_run_directory_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        RunLog::create(temp.path(), "7").expect("first");
        let err = RunLog::create(temp.path(), "7").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
