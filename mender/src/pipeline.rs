//! Orchestration for a single repair run.
//!
//! One run is strictly single-pass: build, and on failure extract missing
//! headers, record a search, read the target file, insert the includes, apply
//! the edit through the engine, and rebuild once. Every branch ends in exactly
//! one [`Verdict`]; nothing is retried.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::extractor::{extract_missing, remaining_missing};
use crate::core::planner::{FixedPlanner, Planner};
use crate::core::run_id::{ClockRunIds, RunIdSource};
use crate::core::synthesizer::{synthesize_insertion, whole_file_edit};
use crate::core::types::{BuildResult, FailureKind, Verdict};
use crate::io::build::{BuildRequest, BuildRunner, CommandBuildRunner};
use crate::io::config::RepairConfig;
use crate::io::engine::{ApplyRequest, Engine, SearchRequest};
use crate::io::run_log::RunLog;

/// Run ids handed out by this process; shared so ids never repeat.
static PROCESS_RUN_IDS: ClockRunIds = ClockRunIds::new();

/// Collaborators of one pipeline run.
pub struct Pipeline<'a, E, B, P, R> {
    pub engine: &'a E,
    pub builder: &'a B,
    pub planner: &'a P,
    pub run_ids: &'a R,
    pub config: &'a RepairConfig,
}

/// Run the pipeline with the command build runner, the fixed planner and
/// wall-clock run ids.
pub fn run_pipeline<E: Engine>(
    task: &str,
    workspace: &Path,
    engine: &E,
    log_root: &Path,
    config: &RepairConfig,
) -> Result<Verdict> {
    Pipeline {
        engine,
        builder: &CommandBuildRunner,
        planner: &FixedPlanner,
        run_ids: &PROCESS_RUN_IDS,
        config,
    }
    .run(task, workspace, log_root)
}

impl<E, B, P, R> Pipeline<'_, E, B, P, R>
where
    E: Engine,
    B: BuildRunner,
    P: Planner,
    R: RunIdSource,
{
    /// Execute one run and persist its artifacts under `<log_root>/<run_id>/`.
    ///
    /// `Err` is reserved for infrastructure failures (artifact writes, build
    /// spawn); every domain outcome is a [`Verdict`], also written as
    /// `verdict.json`.
    #[instrument(skip_all, fields(workspace = %workspace.display()))]
    pub fn run(&self, task: &str, workspace: &Path, log_root: &Path) -> Result<Verdict> {
        let run_id = self.run_ids.next_run_id();
        let log = RunLog::create(log_root, &run_id)?;
        info!(run_id = %run_id, "run started");

        let verdict = self.run_stages(task, workspace, &run_id, &log)?;
        log.write_verdict(&verdict)?;

        match verdict.failure_kind() {
            Some(kind) => warn!(run_id = %run_id, error = kind.as_str(), "run failed"),
            None => info!(run_id = %run_id, "run succeeded"),
        }
        Ok(verdict)
    }

    fn run_stages(
        &self,
        task: &str,
        workspace: &Path,
        run_id: &str,
        log: &RunLog,
    ) -> Result<Verdict> {
        log.write_task(task)?;
        log.write_plan(&self.planner.plan(task))?;

        let first = self.build(workspace, log, 0)?;
        if first.timed_out {
            return Ok(Verdict::failed_build(run_id, FailureKind::Timeout, first));
        }
        if first.succeeded() {
            return Ok(Verdict::already_passing(run_id));
        }

        let extracted = extract_missing(&first.stderr);
        if extracted.is_empty() {
            info!("no known diagnostic signature in build output");
            return Ok(Verdict::failed_build(
                run_id,
                FailureKind::UnsupportedBuildError,
                first,
            ));
        }
        debug!(headers = ?extracted, "missing headers extracted");

        let retrieve = &self.config.retrieve;
        let search = self.engine.search_text(&SearchRequest {
            root: workspace,
            query: &retrieve.query,
            top_k: retrieve.top_k,
            max_bytes: retrieve.max_bytes,
        });
        log.write_retrieve(&json!({ "search": search }))?;

        let target = workspace.join(&self.config.target_file);
        let read = self.engine.read_file(&target, self.config.read_max_bytes);
        let content = match read.content() {
            Some(content) if read.ok && !read.truncated() => content.to_string(),
            _ => {
                warn!(
                    target = %target.display(),
                    error = ?read.error,
                    truncated = read.truncated(),
                    "target file unreadable"
                );
                return Ok(Verdict::failed_engine(
                    run_id,
                    FailureKind::ReadFileFailed,
                    read,
                ));
            }
        };

        let missing = remaining_missing(&extracted, &content);
        if missing.is_empty() {
            info!("every missing header is already included");
            return Ok(Verdict::failed(run_id, FailureKind::IncludesAlreadyPresent));
        }

        let replacement = synthesize_insertion(&content, &missing);
        let edits = whole_file_edit(&self.config.target_file, &content, replacement);
        log.write_edits(&edits)?;

        let apply = self.engine.apply_edits(&ApplyRequest {
            root: workspace,
            edits: &edits,
            edits_path: &log.paths().edits_path,
        });
        log.write_apply(&apply)?;
        if !apply.ok {
            return Ok(Verdict::failed_engine(run_id, FailureKind::ApplyFailed, apply));
        }
        let snapshot_id = apply.snapshot_id().map(str::to_string);
        info!(added = ?missing, snapshot_id = ?snapshot_id, "edit applied");

        let second = self.build(workspace, log, 1)?;
        if second.timed_out {
            return Ok(Verdict::failed_build(run_id, FailureKind::Timeout, second));
        }
        if !second.succeeded() {
            return Ok(Verdict::failed_build(
                run_id,
                FailureKind::StillFailing,
                second,
            ));
        }
        Ok(Verdict::repaired(run_id, &missing, snapshot_id))
    }

    fn build(&self, workspace: &Path, log: &RunLog, attempt: u32) -> Result<BuildResult> {
        let request = BuildRequest {
            workdir: workspace.to_path_buf(),
            command: self.config.build.command.clone(),
            timeout: self.config.build_timeout(),
            log_path: Some(log.paths().build_log_path(attempt)),
        };
        let result = self
            .builder
            .run(&request)
            .with_context(|| format!("build attempt {attempt}"))?;
        log.write_build(attempt, &result)?;
        debug!(attempt, exit_code = ?result.exit_code, timed_out = result.timed_out, "build finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FakeEngine, FixedRunIds, ScriptedBuildRunner, TestWorkspace, build_failed, build_ok,
    };
    use std::fs;

    const CHRONO_ERROR: &str =
        "main.cpp:4:10: error: no member named 'chrono' in namespace 'std'\n";

    #[test]
    fn verdict_is_persisted_for_failures_too() {
        let ws = TestWorkspace::new();
        let engine = FakeEngine::with_file("int main() {}\n");
        let builder = ScriptedBuildRunner::new(vec![build_failed("ld: symbol(s) not found\n")]);
        let config = RepairConfig::default();
        let pipeline = Pipeline {
            engine: &engine,
            builder: &builder,
            planner: &FixedPlanner,
            run_ids: &FixedRunIds::starting_at(100),
            config: &config,
        };

        let verdict = pipeline
            .run("fix", &ws.workspace, &ws.log_root)
            .expect("run");

        let saved: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(ws.log_root.join("100/verdict.json")).expect("read verdict"),
        )
        .expect("parse verdict");
        assert_eq!(saved, serde_json::to_value(&verdict).expect("serialize"));
        assert_eq!(saved["error"], "unsupported_build_error");
    }

    #[test]
    fn build_uses_configured_command_and_timeout() {
        let ws = TestWorkspace::new();
        let engine = FakeEngine::with_file("int main() {}\n");
        let builder = ScriptedBuildRunner::new(vec![build_ok()]);
        let mut config = RepairConfig::default();
        config.build.command = vec!["make".to_string(), "all".to_string()];
        config.build.timeout_secs = 5;
        let pipeline = Pipeline {
            engine: &engine,
            builder: &builder,
            planner: &FixedPlanner,
            run_ids: &FixedRunIds::starting_at(1),
            config: &config,
        };

        pipeline
            .run("fix", &ws.workspace, &ws.log_root)
            .expect("run");

        let requests = builder.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].command, vec!["make", "all"]);
        assert_eq!(requests[0].timeout.as_secs(), 5);
        assert_eq!(requests[0].workdir, ws.workspace);
        assert_eq!(
            requests[0].log_path.as_deref(),
            Some(ws.log_root.join("1/build_0.log").as_path())
        );
    }

    #[test]
    fn reused_run_id_is_an_infrastructure_error() {
        let ws = TestWorkspace::new();
        fs::create_dir_all(ws.log_root.join("5")).expect("precreate");
        let engine = FakeEngine::with_file("int main() {}\n");
        let builder = ScriptedBuildRunner::new(vec![build_failed(CHRONO_ERROR)]);
        let config = RepairConfig::default();
        let pipeline = Pipeline {
            engine: &engine,
            builder: &builder,
            planner: &FixedPlanner,
            run_ids: &FixedRunIds::starting_at(5),
            config: &config,
        };

        let err = pipeline
            .run("fix", &ws.workspace, &ws.log_root)
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(builder.requests().is_empty());
    }

    #[test]
    fn build_spawn_failure_is_an_error() {
        let ws = TestWorkspace::new();
        let engine = FakeEngine::with_file("int main() {}\n");
        let builder = ScriptedBuildRunner::new(Vec::new());
        let config = RepairConfig::default();
        let pipeline = Pipeline {
            engine: &engine,
            builder: &builder,
            planner: &FixedPlanner,
            run_ids: &FixedRunIds::starting_at(9),
            config: &config,
        };

        let err = pipeline
            .run("fix", &ws.workspace, &ws.log_root)
            .unwrap_err();
        assert!(format!("{err:#}").contains("build attempt 0"));
        assert!(ws.log_root.join("9/task.txt").is_file());
        assert!(!ws.log_root.join("9/verdict.json").exists());
    }
}
