//! Side-effecting adapters: child processes, the build, the engine, config, and run artifacts.

pub mod build;
pub mod config;
pub mod engine;
pub mod process;
pub mod run_log;
