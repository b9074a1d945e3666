//! Client for the external patch/snapshot engine (`engine_cli`).
//!
//! The [`Engine`] trait decouples the pipeline from the engine process. The
//! [`CliEngine`] adapter invokes the engine binary once per call and parses the
//! single JSON line it prints on stdout. Failures are never raised as errors;
//! they come back as `ok: false` replies so the caller can attach them to a
//! verdict verbatim. Nothing is retried here.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use crate::core::types::{EditSet, EngineFailure, EngineReply};

/// Parameters for `search-text`.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub root: &'a Path,
    pub query: &'a str,
    pub top_k: usize,
    pub max_bytes: usize,
}

/// Parameters for `apply-edits`.
///
/// `edits_path` must already contain `edits` serialized as JSON; the CLI engine
/// reads the file while in-process engines can use `edits` directly.
#[derive(Debug, Clone)]
pub struct ApplyRequest<'a> {
    pub root: &'a Path,
    pub edits: &'a EditSet,
    pub edits_path: &'a Path,
}

/// Operations offered by the patch/snapshot engine.
pub trait Engine {
    /// Enumerate files under `root` (`{"ok":true,"files":[...]}`).
    fn list_files(&self, root: &Path) -> EngineReply;
    /// Read at most `max_bytes` of `path` (`{"ok":true,"content":"...","truncated":false}`).
    fn read_file(&self, path: &Path, max_bytes: usize) -> EngineReply;
    /// Ranked text search (`{"ok":true,"results":[{"path","line","snippet"}]}`).
    fn search_text(&self, request: &SearchRequest<'_>) -> EngineReply;
    /// Apply line-range edits atomically (`{"ok":true,"snapshot_id":"..."}`).
    fn apply_edits(&self, request: &ApplyRequest<'_>) -> EngineReply;
    /// Restore the files captured by `snapshot_id`.
    fn rollback(&self, root: &Path, snapshot_id: &str) -> EngineReply;
}

/// Engine adapter that spawns the engine executable per call.
#[derive(Debug, Clone)]
pub struct CliEngine {
    program: PathBuf,
}

impl CliEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[instrument(skip_all, fields(engine = %self.program.display()))]
    fn invoke(&self, args: Vec<String>) -> EngineReply {
        debug!(?args, "invoking engine");
        let output = match Command::new(&self.program).args(&args).output() {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "failed to spawn engine");
                return EngineReply::client_failure(
                    EngineFailure::EngineFailed,
                    detail_fields(&[("stderr", json!(err.to_string())), ("args", json!(args))]),
                );
            }
        };
        let reply = interpret_output(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            &args,
        );
        if reply.ok {
            debug!("engine call succeeded");
        } else {
            warn!(error = ?reply.error, exit_code = ?output.status.code(), "engine call failed");
        }
        reply
    }
}

impl Engine for CliEngine {
    fn list_files(&self, root: &Path) -> EngineReply {
        self.invoke(vec![
            "list-files".to_string(),
            "--root".to_string(),
            path_arg(root),
        ])
    }

    fn read_file(&self, path: &Path, max_bytes: usize) -> EngineReply {
        self.invoke(vec![
            "read-file".to_string(),
            "--path".to_string(),
            path_arg(path),
            "--max-bytes".to_string(),
            max_bytes.to_string(),
        ])
    }

    fn search_text(&self, request: &SearchRequest<'_>) -> EngineReply {
        self.invoke(vec![
            "search-text".to_string(),
            "--root".to_string(),
            path_arg(request.root),
            "--query".to_string(),
            request.query.to_string(),
            "--topk".to_string(),
            request.top_k.to_string(),
            "--max-bytes".to_string(),
            request.max_bytes.to_string(),
        ])
    }

    fn apply_edits(&self, request: &ApplyRequest<'_>) -> EngineReply {
        self.invoke(vec![
            "apply-edits".to_string(),
            "--root".to_string(),
            path_arg(request.root),
            "--edits-json".to_string(),
            path_arg(request.edits_path),
        ])
    }

    fn rollback(&self, root: &Path, snapshot_id: &str) -> EngineReply {
        self.invoke(vec![
            "rollback".to_string(),
            "--root".to_string(),
            path_arg(root),
            "--snapshot-id".to_string(),
            snapshot_id.to_string(),
        ])
    }
}

/// Reconcile the engine's exit code with its printed reply.
///
/// - non-zero exit and nothing on stdout: `engine_failed`
/// - stdout that is not a JSON object: `engine_invalid_json`
/// - non-zero exit with `"ok": true`: forced to failure, `engine_nonzero_exit`
///   unless the engine supplied its own error code
/// - otherwise the engine's own `ok` flag stands.
pub fn interpret_output(
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
    args: &[String],
) -> EngineReply {
    let nonzero = exit_code != Some(0);
    let line = stdout.trim();
    if nonzero && line.is_empty() {
        return EngineReply::client_failure(
            EngineFailure::EngineFailed,
            detail_fields(&[("stderr", json!(stderr)), ("args", json!(args))]),
        );
    }

    let mut reply: EngineReply = match serde_json::from_str(line) {
        Ok(reply) => reply,
        Err(_) => {
            return EngineReply::client_failure(
                EngineFailure::EngineInvalidJson,
                detail_fields(&[
                    ("stdout", json!(stdout)),
                    ("stderr", json!(stderr)),
                    ("args", json!(args)),
                ]),
            );
        }
    };

    if nonzero && reply.ok {
        reply.ok = false;
        if reply.error.is_none() {
            reply.error = Some(EngineFailure::EngineNonzeroExit.as_str().to_string());
        }
    }
    reply
}

fn detail_fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
