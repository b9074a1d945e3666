//! Stable exit codes for mender CLI commands.

/// Run succeeded (`already_passing` or `repaired`), or the engine call succeeded.
pub const OK: i32 = 0;
/// Infrastructure error: invalid config, unwritable log root, unrunnable build.
pub const INVALID: i32 = 1;
/// The run ended in a failure verdict, or the engine reported `ok: false`.
pub const FAILED: i32 = 2;
