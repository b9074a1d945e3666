//! Single-pass repair of C++ builds that fail on missing standard includes.
//!
//! A run builds the workspace, and when the build fails with a recognized
//! "missing standard header" diagnostic it inserts the `#include` lines through
//! an external patch/snapshot engine and rebuilds once. The crate keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (diagnostic extraction, patch
//!   synthesis, verdict types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (build process, engine process, config,
//!   run artifacts). Each sits behind a trait so tests can substitute fakes.
//!
//! [`pipeline`] sequences the two into one run; [`rollback`] exposes the
//! engine's snapshot restore to callers.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod rollback;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
