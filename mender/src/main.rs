//! `mender` CLI: run the repair pipeline, roll back a repair, inspect the engine view.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use mender::core::types::EngineReply;
use mender::exit_codes;
use mender::io::config::{RepairConfig, config_path, load_config, write_config};
use mender::io::engine::CliEngine;
use mender::logging;
use mender::pipeline::run_pipeline;
use mender::rollback::{list_workspace_files, rollback_snapshot};

#[derive(Parser)]
#[command(
    name = "mender",
    version,
    about = "Single-pass repair of C++ builds missing standard includes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the workspace and, on a missing-include failure, patch and rebuild once.
    Run {
        /// Free-text task description, recorded in the run artifacts.
        task: String,
        #[command(flatten)]
        target: Target,
        /// Directory that receives one artifact directory per run.
        #[arg(long, default_value = ".mender/runs")]
        logs: PathBuf,
    },
    /// Restore the files captured by a snapshot id from a `repaired` verdict.
    Rollback {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        snapshot_id: String,
    },
    /// Print the engine's file listing for the workspace.
    Files {
        #[command(flatten)]
        target: Target,
    },
    /// Write the default `.mender/config.toml` into the workspace.
    Init {
        #[arg(long)]
        workspace: PathBuf,
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct Target {
    /// Workspace root containing the build entrypoint.
    #[arg(long)]
    workspace: PathBuf,
    /// Engine executable; overrides `engine.path` from the config.
    #[arg(long)]
    engine: Option<PathBuf>,
    /// Config file; defaults to `<workspace>/.mender/config.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Target {
    /// Canonical workspace plus the effective config.
    fn resolve(&self) -> Result<(PathBuf, RepairConfig)> {
        let workspace = fs::canonicalize(&self.workspace)
            .with_context(|| format!("resolve workspace {}", self.workspace.display()))?;
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| config_path(&workspace));
        let mut cfg = load_config(&path)?;
        if let Some(engine) = &self.engine {
            cfg.engine.path = engine.clone();
        }
        Ok((workspace, cfg))
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { task, target, logs } => cmd_run(&task, &target, &logs),
        Command::Rollback {
            target,
            snapshot_id,
        } => cmd_rollback(&target, &snapshot_id),
        Command::Files { target } => cmd_files(&target),
        Command::Init { workspace, force } => cmd_init(&workspace, force),
    }
}

fn cmd_run(task: &str, target: &Target, logs: &Path) -> Result<i32> {
    let (workspace, cfg) = target.resolve()?;
    let engine = CliEngine::new(&cfg.engine.path);
    let verdict = run_pipeline(task, &workspace, &engine, logs, &cfg)?;
    print_json(&verdict)?;
    Ok(if verdict.ok {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_rollback(target: &Target, snapshot_id: &str) -> Result<i32> {
    let (workspace, cfg) = target.resolve()?;
    let engine = CliEngine::new(&cfg.engine.path);
    let reply = rollback_snapshot(&engine, &workspace, snapshot_id);
    print_reply(&reply)
}

fn cmd_files(target: &Target) -> Result<i32> {
    let (workspace, cfg) = target.resolve()?;
    let engine = CliEngine::new(&cfg.engine.path);
    let reply = list_workspace_files(&engine, &workspace);
    print_reply(&reply)
}

fn cmd_init(workspace: &Path, force: bool) -> Result<i32> {
    let path = config_path(workspace);
    if !force && path.exists() {
        eprintln!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &RepairConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn print_reply(reply: &EngineReply) -> Result<i32> {
    print_json(reply)?;
    Ok(if reply.ok {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

/// Print `value` to stdout as pretty-printed JSON.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["mender", "run", "fix the build", "--workspace", "demo"]);
        match cli.command {
            Command::Run { task, target, logs } => {
                assert_eq!(task, "fix the build");
                assert_eq!(target.workspace, PathBuf::from("demo"));
                assert!(target.engine.is_none());
                assert!(target.config.is_none());
                assert_eq!(logs, PathBuf::from(".mender/runs"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_rollback() {
        let cli = Cli::parse_from([
            "mender",
            "rollback",
            "--workspace",
            "demo",
            "--snapshot-id",
            "1700000000000",
            "--engine",
            "bin/engine_cli",
        ]);
        match cli.command {
            Command::Rollback {
                target,
                snapshot_id,
            } => {
                assert_eq!(snapshot_id, "1700000000000");
                assert_eq!(target.engine, Some(PathBuf::from("bin/engine_cli")));
            }
            _ => panic!("expected rollback"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["mender", "init", "--workspace", "demo", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn run_requires_workspace() {
        assert!(Cli::try_parse_from(["mender", "run", "fix"]).is_err());
    }

    #[test]
    fn engine_flag_overrides_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = Target {
            workspace: temp.path().to_path_buf(),
            engine: Some(PathBuf::from("/opt/engine_cli")),
            config: None,
        };
        let (workspace, cfg) = target.resolve().expect("resolve");
        assert_eq!(workspace, fs::canonicalize(temp.path()).expect("canonicalize"));
        assert_eq!(cfg.engine.path, PathBuf::from("/opt/engine_cli"));
        assert_eq!(cfg.target_file, "main.cpp");
    }
}
