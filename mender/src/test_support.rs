//! Test-only fakes for driving the pipeline without spawning processes.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use crate::core::run_id::RunIdSource;
use crate::core::types::{BuildResult, Edit, EditSet, EngineReply};
use crate::io::build::{BuildRequest, BuildRunner};
use crate::io::engine::{ApplyRequest, Engine, SearchRequest};

/// Scratch directory holding a `workspace/` and a `runs/` log root.
pub struct TestWorkspace {
    _temp: TempDir,
    pub workspace: PathBuf,
    pub log_root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = temp.path().join("workspace");
        fs::create_dir_all(&workspace).expect("create workspace");
        let log_root = temp.path().join("runs");
        Self {
            _temp: temp,
            workspace,
            log_root,
        }
    }

    /// The single run directory created under the log root.
    pub fn only_run_dir(&self) -> PathBuf {
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.log_root)
            .expect("read log root")
            .map(|entry| entry.expect("dir entry").path())
            .collect();
        assert_eq!(dirs.len(), 1, "expected exactly one run dir: {dirs:?}");
        dirs.remove(0)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory engine holding a single target file.
///
/// Edits are applied to the held content; each successful apply records a
/// snapshot (`snap-1`, `snap-2`, ...) of the previous content for rollback.
pub struct FakeEngine {
    content: RefCell<Option<String>>,
    read_reply: Option<EngineReply>,
    apply_reply: Option<EngineReply>,
    snapshots: RefCell<BTreeMap<String, Option<String>>>,
    calls: RefCell<Vec<String>>,
    applied: RefCell<Vec<EditSet>>,
}

impl FakeEngine {
    pub fn with_file(content: &str) -> Self {
        Self::new(Some(content.to_string()))
    }

    /// Engine whose target file does not exist; reads fail with `read_failed`.
    pub fn missing_file() -> Self {
        Self::new(None)
    }

    fn new(content: Option<String>) -> Self {
        Self {
            content: RefCell::new(content),
            read_reply: None,
            apply_reply: None,
            snapshots: RefCell::new(BTreeMap::new()),
            calls: RefCell::new(Vec::new()),
            applied: RefCell::new(Vec::new()),
        }
    }

    /// Answer every `read-file` with `reply` instead of the held content.
    pub fn reading(mut self, reply: EngineReply) -> Self {
        self.read_reply = Some(reply);
        self
    }

    /// Answer every `apply-edits` with `reply` without touching the content.
    pub fn applying(mut self, reply: EngineReply) -> Self {
        self.apply_reply = Some(reply);
        self
    }

    /// Engine commands received so far, in order (`"read-file"`, ...).
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn content(&self) -> Option<String> {
        self.content.borrow().clone()
    }

    pub fn applied(&self) -> Vec<EditSet> {
        self.applied.borrow().clone()
    }

    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }
}

impl Engine for FakeEngine {
    fn list_files(&self, root: &Path) -> EngineReply {
        self.record("list-files");
        let files: Vec<&str> = if self.content.borrow().is_some() {
            vec!["main.cpp"]
        } else {
            Vec::new()
        };
        EngineReply::success(fields(json!({
            "root": root.display().to_string(),
            "files": files,
        })))
    }

    fn read_file(&self, path: &Path, _max_bytes: usize) -> EngineReply {
        self.record("read-file");
        if let Some(reply) = &self.read_reply {
            return reply.clone();
        }
        let path = path.display().to_string();
        match self.content.borrow().as_deref() {
            Some(content) => EngineReply::success(fields(json!({
                "path": path,
                "truncated": false,
                "content": content,
            }))),
            None => EngineReply::failure("read_failed", fields(json!({ "path": path }))),
        }
    }

    fn search_text(&self, request: &SearchRequest<'_>) -> EngineReply {
        self.record("search-text");
        EngineReply::success(fields(json!({
            "query": request.query,
            "results": [],
        })))
    }

    fn apply_edits(&self, request: &ApplyRequest<'_>) -> EngineReply {
        self.record("apply-edits");
        self.applied.borrow_mut().push(request.edits.clone());
        if let Some(reply) = &self.apply_reply {
            return reply.clone();
        }

        let before = self.content.borrow().clone();
        let mut current = before.clone().unwrap_or_default();
        let mut changed = Vec::new();
        for edit in &request.edits.edits {
            match apply_edit(&current, edit) {
                Some(next) => current = next,
                None => {
                    return EngineReply::failure(
                        "invalid_line_range",
                        fields(json!({ "path": edit.path })),
                    );
                }
            }
            changed.push(edit.path.clone());
        }

        let mut snapshots = self.snapshots.borrow_mut();
        let snapshot_id = format!("snap-{}", snapshots.len() + 1);
        snapshots.insert(snapshot_id.clone(), before);
        *self.content.borrow_mut() = Some(current);
        EngineReply::success(fields(json!({
            "snapshot_id": snapshot_id,
            "changed": changed,
        })))
    }

    fn rollback(&self, _root: &Path, snapshot_id: &str) -> EngineReply {
        self.record("rollback");
        match self.snapshots.borrow().get(snapshot_id) {
            Some(previous) => {
                *self.content.borrow_mut() = previous.clone();
                EngineReply::success(fields(json!({
                    "snapshot_id": snapshot_id,
                    "restored": ["main.cpp"],
                })))
            }
            None => EngineReply::failure(
                "snapshot_not_found",
                fields(json!({ "snapshot_id": snapshot_id })),
            ),
        }
    }
}

/// Replace lines `start_line..=end_line` (1-based) of `content` the way the
/// engine does, or `None` when the range does not address existing lines.
fn apply_edit(content: &str, edit: &Edit) -> Option<String> {
    let mut lines = engine_lines(content);
    if edit.start_line == 0 || edit.start_line > edit.end_line || edit.end_line > lines.len() {
        return None;
    }
    lines.splice(
        edit.start_line - 1..edit.end_line,
        engine_lines(&edit.replacement),
    );
    Some(lines.join("\n"))
}

/// The engine's line model: split on `\n` only, and a trailing newline
/// yields one final empty line. Empty text has no lines.
fn engine_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    }
}

/// Build runner replaying scripted results in order.
///
/// Running out of scripted results is an error, like a build that cannot be spawned.
pub struct ScriptedBuildRunner {
    results: RefCell<VecDeque<BuildResult>>,
    requests: RefCell<Vec<BuildRequest>>,
}

impl ScriptedBuildRunner {
    pub fn new(results: Vec<BuildResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.borrow().clone()
    }

    pub fn assert_drained(&self) {
        assert!(
            self.results.borrow().is_empty(),
            "unused scripted builds: {:?}",
            self.results.borrow()
        );
    }
}

impl BuildRunner for ScriptedBuildRunner {
    fn run(&self, request: &BuildRequest) -> Result<BuildResult> {
        let mut result = self
            .results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted build result left"))?;
        self.requests.borrow_mut().push(request.clone());
        if let Some(path) = &request.log_path {
            fs::write(path, &result.stdout)?;
        }
        result.command = request.command.clone();
        Ok(result)
    }
}

/// Sequential numeric run ids starting at a fixed value.
pub struct FixedRunIds {
    next: Cell<u64>,
}

impl FixedRunIds {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Cell::new(first),
        }
    }
}

impl RunIdSource for FixedRunIds {
    fn next_run_id(&self) -> String {
        let id = self.next.get();
        self.next.set(id + 1);
        id.to_string()
    }
}

pub fn build_ok() -> BuildResult {
    BuildResult {
        command: vec!["./build.sh".to_string()],
        exit_code: Some(0),
        stdout: "build ok\n".to_string(),
        stderr: String::new(),
        timed_out: false,
        duration_ms: 12,
    }
}

pub fn build_failed(stderr: &str) -> BuildResult {
    BuildResult {
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
        ..build_ok()
    }
}

pub fn build_timed_out() -> BuildResult {
    BuildResult {
        exit_code: None,
        stdout: "compiling\n".to_string(),
        timed_out: true,
        duration_ms: 60_000,
        ..build_ok()
    }
}

/// Object payload for an [`EngineReply`]; non-objects yield an empty map.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
