//! Helpers for running child processes with timeouts.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may lag behind the child once it has exited or been killed.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output. Nothing is truncated.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Run a command with a wall-clock timeout, capturing stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. If `stream_path` is `Some`, each stdout line
/// is also written (and flushed) to that file as it arrives, so an interrupted run still leaves
/// the partial output on disk.
///
/// On unix the child leads its own process group. On timeout the whole group is killed and
/// `timed_out` is set, so processes forked by a build script die with it. Readers still blocked
/// on a pipe held open by an escaped descendant are abandoned after a short grace period; the
/// call returns within roughly `timeout` plus that grace either way.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), streaming = stream_path.is_some()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    stream_path: Option<&Path>,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    own_process_group(&mut cmd);

    let stream_file = match stream_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create stream dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create stream file {}", path.display()))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(move || read_stream_with_tee(stdout, stream_file));
    let stderr_rx = spawn_reader(move || read_stream(stderr));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };
    let elapsed = started.elapsed();

    // Background descendants may keep the pipes open past the child's exit.
    let reader_budget = if timed_out {
        READER_GRACE
    } else {
        timeout.saturating_sub(elapsed) + READER_GRACE
    };
    let reader_deadline = Instant::now() + reader_budget;
    let stdout = collect_output(&stdout_rx, reader_deadline).context("collect stdout")?;
    let stderr = collect_output(&stderr_rx, reader_deadline).context("collect stderr")?;

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
        elapsed,
    })
}

fn spawn_reader<F>(read: F) -> Receiver<Result<Vec<u8>>>
where
    F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only when the caller abandoned this reader.
        let _ = tx.send(read());
    });
    rx
}

fn collect_output(rx: &Receiver<Result<Vec<u8>>>, deadline: Instant) -> Result<Vec<u8>> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("output pipe still held open by a descendant, abandoning reader");
            Ok(Vec::new())
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill the child and, on unix, every process in its group.
fn kill_process_tree(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(?status, "process group kill failed"),
            Err(err) => warn!(err = %err, "failed to spawn kill for process group"),
        }
    }
    match child.kill() {
        Ok(()) => Ok(()),
        // Already gone with its group.
        Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill command"),
    }
}

/// Read a stream to the end, tee-ing each line to `stream_file` when present.
fn read_stream_with_tee<R: Read>(
    reader: R,
    mut stream_file: Option<BufWriter<File>>,
) -> Result<Vec<u8>> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(writer) = stream_file.as_mut() {
            // Write and flush immediately for real-time visibility
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to stream file");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush stream file");
            }
        }

        collected.extend_from_slice(&line);
    }

    Ok(collected)
}

fn read_stream<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).context("read output")?;
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_exit_code_and_both_streams() {
        let out = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            Duration::from_secs(10),
            None,
        )
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
        assert!(!out.timed_out);
    }

    #[test]
    fn kills_child_on_timeout() {
        let out = run_command_with_timeout(sh("exec sleep 5"), Duration::from_millis(100), None)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[test]
    fn timeout_kills_forked_descendants_holding_the_pipes() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("echo begin; sleep 6; exit 0"),
            Duration::from_millis(200),
            None,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "took {:?}",
            started.elapsed()
        );
        assert_eq!(out.stdout, b"begin\n");
    }

    #[test]
    fn background_descendant_does_not_hold_the_call_open() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("sleep 8 & echo done"),
            Duration::from_millis(500),
            None,
        )
        .expect("run");
        assert!(!out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn streams_stdout_to_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("logs").join("build.log");
        let out = run_command_with_timeout(
            sh("echo one; echo two"),
            Duration::from_secs(10),
            Some(&log),
        )
        .expect("run");
        assert_eq!(out.stdout, b"one\ntwo\n");
        assert_eq!(std::fs::read_to_string(&log).expect("read log"), "one\ntwo\n");
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("/nonexistent/definitely-not-here"),
            Duration::from_secs(1),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
