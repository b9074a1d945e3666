//! Engine calls made outside a pipeline run: restoring a snapshot and listing files.
//!
//! The pipeline never rolls back on its own; the snapshot id in a `repaired`
//! verdict is handed to [`rollback_snapshot`] by the caller.

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::core::types::EngineReply;
use crate::io::engine::Engine;

/// Restore the files captured by `snapshot_id`.
#[instrument(skip_all, fields(workspace = %workspace.display(), snapshot_id = %snapshot_id))]
pub fn rollback_snapshot<E: Engine>(
    engine: &E,
    workspace: &Path,
    snapshot_id: &str,
) -> EngineReply {
    let reply = engine.rollback(workspace, snapshot_id);
    if reply.ok {
        info!("snapshot restored");
    } else {
        warn!(error = ?reply.error, "rollback failed");
    }
    reply
}

/// Enumerate the workspace files known to the engine.
pub fn list_workspace_files<E: Engine>(engine: &E, workspace: &Path) -> EngineReply {
    engine.list_files(workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::synthesizer::whole_file_edit;
    use crate::io::engine::ApplyRequest;
    use crate::test_support::FakeEngine;

    #[test]
    fn rollback_restores_content_before_apply() {
        let engine = FakeEngine::with_file("int main() {}\n");
        let edits = whole_file_edit(
            "main.cpp",
            "int main() {}\n",
            "#include <chrono>\nint main() {}\n".to_string(),
        );
        let apply = engine.apply_edits(&ApplyRequest {
            root: Path::new("/ws"),
            edits: &edits,
            edits_path: Path::new("/ws/edits.json"),
        });
        let snapshot_id = apply.snapshot_id().expect("snapshot id").to_string();
        assert_eq!(
            engine.content().as_deref(),
            Some("#include <chrono>\nint main() {}\n")
        );

        let reply = rollback_snapshot(&engine, Path::new("/ws"), &snapshot_id);

        assert!(reply.ok);
        assert_eq!(engine.content().as_deref(), Some("int main() {}\n"));
    }

    #[test]
    fn unknown_snapshot_is_reported() {
        let engine = FakeEngine::with_file("int main() {}\n");
        let reply = rollback_snapshot(&engine, Path::new("/ws"), "nope");
        assert!(!reply.ok);
        assert_eq!(reply.error.as_deref(), Some("snapshot_not_found"));
    }

    #[test]
    fn listing_goes_through_engine() {
        let engine = FakeEngine::with_file("int main() {}\n");
        let reply = list_workspace_files(&engine, Path::new("/ws"));
        assert!(reply.ok);
        assert_eq!(engine.calls(), vec!["list-files"]);
    }
}
