//! Shared deterministic types for the repair pipeline.
//!
//! These types define stable contracts between the pipeline stages and the
//! artifacts written for each run. They do not depend on external state or I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Captured outcome of one invocation of the workspace build entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Argv of the build command that was run.
    pub command: Vec<String>,
    /// Process exit code, `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The build exceeded its wall-clock timeout and was killed.
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Ordered set of missing standard headers (e.g. `chrono` for `<chrono>`).
///
/// Insertion order is preserved and duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncludeSet(Vec<String>);

impl IncludeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `header` unless already present. Returns whether it was added.
    pub fn insert(&mut self, header: &str) -> bool {
        if self.contains(header) {
            return false;
        }
        self.0.push(header.to_string());
        true
    }

    pub fn contains(&self, header: &str) -> bool {
        self.0.iter().any(|h| h == header)
    }

    /// Keep only headers for which `keep` returns true, preserving order.
    pub fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.0.retain(|h| keep(h));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl<S: AsRef<str>> FromIterator<S> for IncludeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = IncludeSet::new();
        for header in iter {
            set.insert(header.as_ref());
        }
        set
    }
}

/// A single contiguous line-range replacement against one file.
///
/// Lines are 1-based and inclusive; `replacement` fully supersedes the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    /// Path relative to the workspace root.
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub replacement: String,
}

/// The edit set handed to the engine's `apply-edits` (`{"edits": [...]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSet {
    pub edits: Vec<Edit>,
}

/// Structured single-line reply of the external patch/snapshot engine.
///
/// `ok` is authoritative. Command-specific payload (`content`, `snapshot_id`,
/// `results`, `files`, ...) is kept verbatim in `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineReply {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Failures detected by the client itself rather than reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFailure {
    /// The engine exited non-zero without printing anything parsable.
    EngineFailed,
    /// The engine's stdout was not a JSON object.
    EngineInvalidJson,
    /// The engine claimed success but exited non-zero.
    EngineNonzeroExit,
}

impl EngineFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineFailure::EngineFailed => "engine_failed",
            EngineFailure::EngineInvalidJson => "engine_invalid_json",
            EngineFailure::EngineNonzeroExit => "engine_nonzero_exit",
        }
    }
}

impl EngineReply {
    pub fn success(fields: Map<String, Value>) -> Self {
        Self {
            ok: true,
            error: None,
            fields,
        }
    }

    /// Failure reply carrying an engine-style error code.
    pub fn failure(error: &str, fields: Map<String, Value>) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            fields,
        }
    }

    pub fn client_failure(kind: EngineFailure, fields: Map<String, Value>) -> Self {
        Self::failure(kind.as_str(), fields)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// File text of a `read-file` reply.
    pub fn content(&self) -> Option<&str> {
        self.str_field("content")
    }

    /// Whether a `read-file` reply hit its byte cap.
    pub fn truncated(&self) -> bool {
        self.fields
            .get("truncated")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Rollback token of an `apply-edits` reply.
    pub fn snapshot_id(&self) -> Option<&str> {
        self.str_field("snapshot_id")
    }
}

/// Terminal failure classes of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No known diagnostic signature matched the build output.
    UnsupportedBuildError,
    /// The target file could not be read through the engine.
    ReadFileFailed,
    /// Every candidate header is already declared in the target file.
    IncludesAlreadyPresent,
    /// The engine rejected or could not perform the edit.
    ApplyFailed,
    /// The edit applied but the rebuild still fails.
    StillFailing,
    /// A build exceeded its wall-clock timeout.
    Timeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::UnsupportedBuildError => "unsupported_build_error",
            FailureKind::ReadFileFailed => "read_file_failed",
            FailureKind::IncludesAlreadyPresent => "includes_already_present",
            FailureKind::ApplyFailed => "apply_failed",
            FailureKind::StillFailing => "still_failing",
            FailureKind::Timeout => "timeout",
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The first build passed; nothing was changed.
    AlreadyPassing { message: String },
    /// Headers were inserted and the rebuild passed.
    Repaired {
        fixed: String,
        added_includes: Vec<String>,
        snapshot_id: Option<String>,
    },
    /// The run stopped at a terminal failure.
    Failed {
        error: FailureKind,
        /// Build that exposed the failure, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        build: Option<BuildResult>,
        /// Engine reply that exposed the failure, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<EngineReply>,
    },
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub ok: bool,
    pub run_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

pub const ALREADY_OK_MESSAGE: &str = "build already OK";
pub const FIXED_MISSING_INCLUDE: &str = "missing_include";

impl Verdict {
    pub fn already_passing(run_id: &str) -> Self {
        Self {
            ok: true,
            run_id: run_id.to_string(),
            outcome: Outcome::AlreadyPassing {
                message: ALREADY_OK_MESSAGE.to_string(),
            },
        }
    }

    pub fn repaired(run_id: &str, added: &IncludeSet, snapshot_id: Option<String>) -> Self {
        Self {
            ok: true,
            run_id: run_id.to_string(),
            outcome: Outcome::Repaired {
                fixed: FIXED_MISSING_INCLUDE.to_string(),
                added_includes: added.to_vec(),
                snapshot_id,
            },
        }
    }

    pub fn failed(run_id: &str, error: FailureKind) -> Self {
        Self {
            ok: false,
            run_id: run_id.to_string(),
            outcome: Outcome::Failed {
                error,
                build: None,
                detail: None,
            },
        }
    }

    pub fn failed_build(run_id: &str, error: FailureKind, build: BuildResult) -> Self {
        Self {
            ok: false,
            run_id: run_id.to_string(),
            outcome: Outcome::Failed {
                error,
                build: Some(build),
                detail: None,
            },
        }
    }

    pub fn failed_engine(run_id: &str, error: FailureKind, detail: EngineReply) -> Self {
        Self {
            ok: false,
            run_id: run_id.to_string(),
            outcome: Outcome::Failed {
                error,
                build: None,
                detail: Some(detail),
            },
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Failed { error, .. } => Some(*error),
            _ => None,
        }
    }

    pub fn added_includes(&self) -> Option<&[String]> {
        match &self.outcome {
            Outcome::Repaired { added_includes, .. } => Some(added_includes),
            _ => None,
        }
    }

    pub fn snapshot_id(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Repaired { snapshot_id, .. } => snapshot_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_set_dedupes_and_keeps_order() {
        let mut set = IncludeSet::new();
        assert!(set.insert("thread"));
        assert!(set.insert("chrono"));
        assert!(!set.insert("thread"));
        assert_eq!(set.to_vec(), vec!["thread", "chrono"]);
    }

    #[test]
    fn build_result_timeout_is_not_success() {
        let build = BuildResult {
            command: vec!["./build.sh".to_string()],
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            duration_ms: 10,
        };
        assert!(!build.succeeded());
    }

    #[test]
    fn already_passing_verdict_serializes_flat() {
        let verdict = Verdict::already_passing("1700000000000");
        let value = serde_json::to_value(&verdict).expect("serialize");
        assert_eq!(value["ok"], true);
        assert_eq!(value["run_id"], "1700000000000");
        assert_eq!(value["outcome"], "already_passing");
        assert_eq!(value["message"], "build already OK");
    }

    #[test]
    fn engine_reply_keeps_payload_fields() {
        let reply: EngineReply = serde_json::from_str(
            r#"{"ok":true,"path":"/w/main.cpp","truncated":false,"content":"int main() {}\n"}"#,
        )
        .expect("parse");
        assert!(reply.ok);
        assert_eq!(reply.error, None);
        assert_eq!(reply.content(), Some("int main() {}\n"));
        assert!(!reply.truncated());
        assert_eq!(reply.str_field("path"), Some("/w/main.cpp"));
    }

    #[test]
    fn engine_reply_without_ok_is_failure() {
        let reply: EngineReply = serde_json::from_str(r#"{"snapshot_id":"1"}"#).expect("parse");
        assert!(!reply.ok);
        assert_eq!(reply.snapshot_id(), Some("1"));
    }

    #[test]
    fn failed_verdict_omits_missing_artifacts() {
        let verdict = Verdict::failed("7", FailureKind::IncludesAlreadyPresent);
        let value = serde_json::to_value(&verdict).expect("serialize");
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "includes_already_present");
        assert!(value.get("build").is_none());
        assert!(value.get("detail").is_none());
    }
}
