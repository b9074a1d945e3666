//! Deterministic, pure logic shared by the repair pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests. The one exception
//! is [`run_id::ClockRunIds`], which reads the wall clock behind the
//! [`run_id::RunIdSource`] seam.

pub mod extractor;
pub mod planner;
pub mod run_id;
pub mod synthesizer;
pub mod types;
