//! Shell command execution with live and buffered output.
//!
//! stdout and stderr share one pipe, so lines arrive in the order the shell
//! wrote them. A reader task feeds that pipe into a channel whose consumer is
//! the only owner of the output buffer. Every line has its ANSI escapes
//! removed, then is forwarded to the subscriber and appended to the buffer, so
//! the streamed lines (each followed by `\n`) always equal the returned output.

use crate::error::{ExitReason, Result, RunStepError};
use crate::output::OutputSink;
use crate::postprocess::strip_ansi;
use runstep_core::{EngineConfig, Id, RunKey};
use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Interpreter used to run command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ShellSpec {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        }
    }
}

impl ShellSpec {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.shell.clone(),
            args: config.shell_args.clone(),
        }
    }
}

/// Where streamed lines go for one invocation.
#[derive(Clone, Copy)]
pub struct OutputTarget<'a> {
    pub sink: &'a dyn OutputSink,
    pub invocation: &'a Id,
    pub run: &'a RunKey,
}

impl std::fmt::Debug for OutputTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("invocation", self.invocation)
            .field("run", self.run)
            .finish_non_exhaustive()
    }
}

/// Run `command` through `shell` in `dir` with exactly `env` as its
/// environment.
///
/// Empty command text is a no-op. With `target` set, each line is streamed
/// as it arrives. The child is killed and the reader stopped if the returned
/// future is dropped.
pub async fn execute(
    shell: &ShellSpec,
    command: &str,
    dir: &Path,
    env: &BTreeMap<String, String>,
    target: Option<OutputTarget<'_>>,
) -> Result<String> {
    if command.trim().is_empty() {
        return Ok(String::new());
    }

    let (reader, writer) = std::io::pipe()?;
    let stderr_writer = writer.try_clone()?;

    let mut cmd = Command::new(&shell.program);
    cmd.args(&shell.args)
        .arg(command)
        .current_dir(dir)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(stderr_writer))
        .kill_on_drop(true);

    debug!(
        shell = %shell.program,
        command,
        dir = %dir.display(),
        "spawning run step"
    );

    let spawned = cmd.spawn();
    // The command owns the parent's copies of the write end; the reader only
    // sees EOF once those are closed.
    drop(cmd);

    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            warn!(command, dir = %dir.display(), error = %err, "failed to start shell");
            return Err(RunStepError::exec(
                ExitReason::LaunchFailed,
                command,
                dir,
                err.to_string(),
            ));
        }
    };

    let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    let (tx, rx) = mpsc::unbounded_channel();
    let mut reader = AbortOnDrop(tokio::spawn(forward_lines(receiver, tx)));

    let (status, output) = tokio::join!(child.wait(), collect_lines(rx, target));

    match (&mut reader.0).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "output capture failed"),
        Err(err) => warn!(error = %err, "output reader task panicked"),
    }

    if let Some(target) = target {
        target.sink.complete(target.invocation, target.run);
    }

    match exit_reason(status?) {
        None => Ok(output),
        Some(reason) => Err(RunStepError::exec(reason, command, dir, output)),
    }
}

/// Aborts the reader task when execution is cancelled.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Read `reader` line by line and push each line into `tx`.
///
/// Lines are decoded lossily and lose their terminator (`\n` or `\r\n`).
async fn forward_lines<R: AsyncRead + Unpin>(
    reader: R,
    tx: mpsc::UnboundedSender<String>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
            return Ok(());
        }
    }
}

/// Single owner of the output buffer; returns once the reader has finished.
async fn collect_lines(
    mut rx: mpsc::UnboundedReceiver<String>,
    target: Option<OutputTarget<'_>>,
) -> String {
    let mut output = String::new();
    while let Some(raw) = rx.recv().await {
        let line = strip_ansi(&raw);
        if let Some(target) = target {
            target.sink.send(target.invocation, target.run, &line);
        }
        output.push_str(&line);
        output.push('\n');
    }
    output
}

fn exit_reason(status: ExitStatus) -> Option<ExitReason> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(ExitReason::Code(code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(ExitReason::Signal(signal));
        }
    }
    Some(ExitReason::Code(-1))
}
