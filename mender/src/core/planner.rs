//! Plan generation for the audit trail.
//!
//! A plan is documentation only: it is persisted as `plan.json` and never
//! consulted by the pipeline's branching logic.

/// Strategy that describes the steps a run is about to take.
pub trait Planner {
    fn plan(&self, task: &str) -> Vec<String>;
}

/// Constant four-step plan mirroring the fixed pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPlanner;

impl Planner for FixedPlanner {
    fn plan(&self, _task: &str) -> Vec<String> {
        [
            "Run the workspace build and capture its diagnostics",
            "Extract missing headers from the diagnostics and search the workspace for context",
            "Insert the missing #include lines into the target file and apply the edit",
            "Rebuild to verify the repair",
        ]
        .iter()
        .map(|step| step.to_string())
        .collect()
    }
}
