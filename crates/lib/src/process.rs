//! Running stage commands under pause/cancel control.
//!
//! Each command string is split into argv (see [`crate::shell`]) and spawned
//! directly in the stage's build directory. Its stdout and stderr share one
//! pipe, so the output is read line by line in the order the command wrote
//! it and logged at debug level.
//!
//! While a command runs, the runner races output against the cancel
//! notification and a poll tick, so a silent child still notices pause and
//! cancel requests within [`PAUSE_POLL_INTERVAL`]:
//!
//! - cancel: the child's process group gets SIGTERM, then SIGKILL after
//!   [`TERMINATE_GRACE_PERIOD`], and the runner returns
//!   [`BuildError::Cancelled`] without reading further output.
//! - pause: the process group is stopped, the flag is polled until it clears,
//!   then the group is continued. Cancel wins over pause.
//!
//! A non-zero exit stops the command list; the remaining commands never run.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::consts::{PAUSE_POLL_INTERVAL, TERMINATE_GRACE_PERIOD};
use crate::control::ControlSignal;
use crate::shell::{self, SplitError};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("invalid command '{cmd}': {source}")]
  Parse {
    cmd: String,
    #[source]
    source: SplitError,
  },

  #[error("empty command")]
  EmptyCommand,

  #[error("failed to spawn '{cmd}' in '{}': {source}", .cwd.display())]
  Spawn {
    cmd: String,
    cwd: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("i/o error while running '{cmd}': {source}")]
  Io {
    cmd: String,
    #[source]
    source: io::Error,
  },

  #[error("command '{cmd}' in '{}' failed with exit code {code:?}", .cwd.display())]
  Failed {
    cmd: String,
    cwd: PathBuf,
    code: Option<i32>,
  },

  #[error("command '{cmd}' was cancelled")]
  Cancelled { cmd: String },
}

/// Lifecycle of one spawned command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
  Running,
  Suspended,
  Terminated,
  Exited(Option<i32>),
}

/// Something that can be stopped and continued without being killed.
pub trait Pausable {
  fn suspend(&mut self) -> io::Result<()>;
  fn resume(&mut self) -> io::Result<()>;
}

/// How a pause ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
  /// Pause was not requested; nothing happened.
  NotPaused,
  /// Suspended, then resumed after the flag cleared.
  Resumed,
  /// Cancel arrived while suspended. The process is left suspended.
  Cancelled,
}

/// Suspend `process` while the pause flag is set.
///
/// Polls every `poll` until the flag clears or cancellation is requested.
pub async fn hold_while_paused<P: Pausable>(
  process: &mut P,
  control: &ControlSignal,
  poll: Duration,
) -> io::Result<PauseOutcome> {
  if !control.is_pause_requested() {
    return Ok(PauseOutcome::NotPaused);
  }

  process.suspend()?;
  info!("paused");

  loop {
    if control.is_cancel_requested() {
      return Ok(PauseOutcome::Cancelled);
    }
    if !control.is_pause_requested() {
      break;
    }
    tokio::select! {
      _ = control.cancelled() => {}
      _ = tokio::time::sleep(poll) => {}
    }
  }

  process.resume()?;
  info!("resumed");
  Ok(PauseOutcome::Resumed)
}

/// Read end of the pipe a command writes its stdout and stderr to.
#[cfg(unix)]
type MergedOutput = tokio::net::unix::pipe::Receiver;
#[cfg(windows)]
type MergedOutput = tokio::fs::File;

#[cfg(unix)]
fn merged_output(reader: io::PipeReader) -> io::Result<MergedOutput> {
  tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())
}

#[cfg(windows)]
fn merged_output(reader: io::PipeReader) -> io::Result<MergedOutput> {
  let handle = std::os::windows::io::OwnedHandle::from(reader);
  Ok(tokio::fs::File::from_std(std::fs::File::from(handle)))
}

/// A spawned command and its process group.
pub struct ProcessHandle {
  child: Child,
  pid: Option<u32>,
  state: ProcessState,
}

impl ProcessHandle {
  /// Spawn `argv` with stdout and stderr both writing into one pipe, and
  /// return the handle along with that pipe's read end.
  fn spawn(argv: &[String], cwd: &Path) -> io::Result<(Self, MergedOutput)> {
    let (reader, writer) = io::pipe()?;
    let mut command = Command::new(&argv[0]);
    command
      .args(&argv[1..])
      .current_dir(cwd)
      .stdin(Stdio::null())
      .stdout(Stdio::from(writer.try_clone()?))
      .stderr(Stdio::from(writer))
      .kill_on_drop(true);

    // Own process group so pause and cancel reach everything the command
    // forks (make -> cc -> ...), not just the direct child.
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn()?;
    let pid = child.id();
    // The command keeps our copies of the write end; the reader only sees EOF
    // once every write end is closed.
    drop(command);

    let handle = Self {
      child,
      pid,
      state: ProcessState::Running,
    };
    Ok((handle, merged_output(reader)?))
  }

  pub fn state(&self) -> ProcessState {
    self.state
  }

  async fn wait(&mut self) -> io::Result<ExitStatus> {
    let status = self.child.wait().await?;
    self.state = ProcessState::Exited(status.code());
    Ok(status)
  }

  /// SIGTERM the group, then SIGKILL if it has not exited within `grace`.
  async fn terminate(&mut self, grace: Duration) {
    if let Err(e) = self.signal_group(GroupSignal::Terminate) {
      warn!(pid = ?self.pid, error = %e, "failed to send SIGTERM");
    }
    // A stopped process cannot act on SIGTERM until it is continued.
    if self.state == ProcessState::Suspended
      && let Err(e) = self.signal_group(GroupSignal::Continue)
    {
      warn!(pid = ?self.pid, error = %e, "failed to continue suspended process");
    }

    if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
      warn!(pid = ?self.pid, "process ignored SIGTERM, killing");
      if let Err(e) = self.signal_group(GroupSignal::Kill) {
        warn!(pid = ?self.pid, error = %e, "failed to send SIGKILL");
      }
      let _ = self.child.kill().await;
    }

    self.state = ProcessState::Terminated;
  }

  #[cfg(unix)]
  fn signal_group(&self, signal: GroupSignal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = self.pid else {
      return Ok(());
    };
    let signal = match signal {
      GroupSignal::Stop => Signal::SIGSTOP,
      GroupSignal::Continue => Signal::SIGCONT,
      GroupSignal::Terminate => Signal::SIGTERM,
      GroupSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(pid as i32), signal) {
      Ok(()) | Err(Errno::ESRCH) => Ok(()),
      Err(e) => Err(io::Error::from(e)),
    }
  }

  #[cfg(not(unix))]
  fn signal_group(&self, _signal: GroupSignal) -> io::Result<()> {
    Err(io::Error::new(
      io::ErrorKind::Unsupported,
      "process suspension requires unix signals",
    ))
  }
}

impl Pausable for ProcessHandle {
  fn suspend(&mut self) -> io::Result<()> {
    self.signal_group(GroupSignal::Stop)?;
    self.state = ProcessState::Suspended;
    Ok(())
  }

  fn resume(&mut self) -> io::Result<()> {
    self.signal_group(GroupSignal::Continue)?;
    self.state = ProcessState::Running;
    Ok(())
  }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
  Stop,
  Continue,
  Terminate,
  Kill,
}

/// The child's combined output.
///
/// Partial lines survive across `select!` iterations in `buf`, so dropping a
/// pending read loses nothing.
struct OutputStream {
  reader: BufReader<MergedOutput>,
  buf: Vec<u8>,
  open: bool,
}

impl OutputStream {
  fn new(inner: MergedOutput) -> Self {
    Self {
      reader: BufReader::new(inner),
      buf: Vec::new(),
      open: true,
    }
  }

  async fn read(&mut self) -> io::Result<usize> {
    self.reader.read_until(b'\n', &mut self.buf).await
  }

  fn on_read(&mut self, result: io::Result<usize>) {
    match result {
      Ok(0) => self.open = false,
      Ok(_) => {
        let line = String::from_utf8_lossy(&self.buf);
        debug!("{}", line.trim_end_matches(['\n', '\r']));
        self.buf.clear();
      }
      Err(e) => {
        warn!(error = %e, "error reading command output");
        self.open = false;
      }
    }
  }
}

/// Run `commands` in order inside `cwd`, stopping at the first failure.
pub async fn run_commands(commands: &[String], cwd: &Path, control: &ControlSignal) -> Result<(), BuildError> {
  for cmd in commands {
    run_command(cmd, cwd, control).await?;
  }
  Ok(())
}

/// Run a single command string inside `cwd`.
pub async fn run_command(cmd: &str, cwd: &Path, control: &ControlSignal) -> Result<(), BuildError> {
  let argv = shell::split(cmd).map_err(|source| BuildError::Parse {
    cmd: cmd.to_string(),
    source,
  })?;
  if argv.is_empty() {
    return Err(BuildError::EmptyCommand);
  }

  let cancelled = || BuildError::Cancelled { cmd: cmd.to_string() };
  let io_err = |source: io::Error| BuildError::Io {
    cmd: cmd.to_string(),
    source,
  };

  if control.is_cancel_requested() {
    return Err(cancelled());
  }

  info!(cmd, cwd = %cwd.display(), "running command");

  let (mut process, output) = ProcessHandle::spawn(&argv, cwd).map_err(|source| {
    error!(cmd, cwd = %cwd.display(), error = %source, "failed to spawn command");
    BuildError::Spawn {
      cmd: cmd.to_string(),
      cwd: cwd.to_path_buf(),
      source,
    }
  })?;

  let mut output = OutputStream::new(output);

  let mut poll = tokio::time::interval(PAUSE_POLL_INTERVAL);
  poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

  // Stream output until every writer has closed the pipe.
  loop {
    if control.is_cancel_requested()
      || hold_while_paused(&mut process, control, PAUSE_POLL_INTERVAL)
        .await
        .map_err(io_err)?
        == PauseOutcome::Cancelled
    {
      info!(cmd, "cancelling command");
      process.terminate(TERMINATE_GRACE_PERIOD).await;
      return Err(cancelled());
    }

    if !output.open {
      break;
    }

    tokio::select! {
      biased;
      _ = control.cancelled() => {}
      result = output.read() => output.on_read(result),
      _ = poll.tick() => {}
    }
  }

  // The pipe is closed but the process may still be running.
  let status = loop {
    if control.is_cancel_requested()
      || hold_while_paused(&mut process, control, PAUSE_POLL_INTERVAL)
        .await
        .map_err(io_err)?
        == PauseOutcome::Cancelled
    {
      info!(cmd, "cancelling command");
      process.terminate(TERMINATE_GRACE_PERIOD).await;
      return Err(cancelled());
    }

    tokio::select! {
      biased;
      _ = control.cancelled() => {}
      status = process.wait() => break status.map_err(io_err)?,
      _ = poll.tick() => {}
    }
  };

  let code = status.code();
  info!(cmd, code = ?code, "command returned");

  if !status.success() {
    if control.is_cancel_requested() {
      return Err(cancelled());
    }
    error!(cmd, cwd = %cwd.display(), code = ?code, "command failed");
    return Err(BuildError::Failed {
      cmd: cmd.to_string(),
      cwd: cwd.to_path_buf(),
      code,
    });
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Instant;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn commands(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[derive(Default)]
  struct FakeProcess {
    calls: Vec<&'static str>,
  }

  impl Pausable for FakeProcess {
    fn suspend(&mut self) -> io::Result<()> {
      self.calls.push("suspend");
      Ok(())
    }

    fn resume(&mut self) -> io::Result<()> {
      self.calls.push("resume");
      Ok(())
    }
  }

  #[tokio::test]
  async fn hold_is_a_no_op_when_not_paused() {
    let control = ControlSignal::new();
    let mut fake = FakeProcess::default();

    let outcome = hold_while_paused(&mut fake, &control, Duration::from_millis(5)).await.unwrap();

    assert_eq!(outcome, PauseOutcome::NotPaused);
    assert!(fake.calls.is_empty());
  }

  #[tokio::test]
  async fn hold_suspends_until_unpaused_then_resumes() {
    let control = Arc::new(ControlSignal::new());
    control.set_paused(true);

    let unpause = {
      let control = control.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.set_paused(false);
      })
    };

    let mut fake = FakeProcess::default();
    let outcome = hold_while_paused(&mut fake, &control, Duration::from_millis(5)).await.unwrap();
    unpause.await.unwrap();

    assert_eq!(outcome, PauseOutcome::Resumed);
    assert_eq!(fake.calls, vec!["suspend", "resume"]);
  }

  #[tokio::test]
  async fn cancel_wins_over_pause() {
    let control = Arc::new(ControlSignal::new());
    control.set_paused(true);

    let cancel = {
      let control = control.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.request_cancel();
      })
    };

    let mut fake = FakeProcess::default();
    // Long poll interval: the cancel notification, not the poll, must end the wait.
    let outcome = tokio::time::timeout(
      Duration::from_secs(5),
      hold_while_paused(&mut fake, &control, Duration::from_secs(60)),
    )
    .await
    .expect("cancel should interrupt the pause")
    .unwrap();
    cancel.await.unwrap();

    assert_eq!(outcome, PauseOutcome::Cancelled);
    assert_eq!(fake.calls, vec!["suspend"]);
  }

  #[tokio::test]
  #[traced_test]
  async fn runs_commands_in_order_and_logs_output() {
    let temp = TempDir::new().unwrap();
    let control = ControlSignal::new();

    run_commands(
      &commands(&["sh -c 'echo first-line'", "sh -c 'echo second-line >&2'"]),
      temp.path(),
      &control,
    )
    .await
    .unwrap();

    assert!(logs_contain("first-line"));
    assert!(logs_contain("second-line"));
    assert!(logs_contain("command returned"));
  }

  #[tokio::test]
  #[traced_test]
  async fn stdout_and_stderr_keep_their_relative_order() {
    let temp = TempDir::new().unwrap();
    let control = ControlSignal::new();

    run_command(
      "sh -c 'echo seq-a; echo seq-b >&2; echo seq-c; echo seq-d >&2; echo seq-e'",
      temp.path(),
      &control,
    )
    .await
    .unwrap();

    logs_assert(|lines: &[&str]| {
      // Lines carrying `cmd=` echo the command string itself, not its output.
      let order: Vec<&str> = lines
        .iter()
        .filter(|line| !line.contains("cmd="))
        .filter_map(|line| {
          ["seq-a", "seq-b", "seq-c", "seq-d", "seq-e"]
            .into_iter()
            .find(|marker| line.contains(marker))
        })
        .collect();

      if order == ["seq-a", "seq-b", "seq-c", "seq-d", "seq-e"] {
        Ok(())
      } else {
        Err(format!("output logged out of order: {order:?}"))
      }
    });
  }

  #[tokio::test]
  async fn quoted_arguments_are_not_split() {
    let temp = TempDir::new().unwrap();
    let control = ControlSignal::new();

    run_command("touch 'name with spaces'", temp.path(), &control)
      .await
      .unwrap();

    assert!(temp.path().join("name with spaces").exists());
  }

  #[tokio::test]
  async fn commands_run_in_working_directory() {
    let temp = TempDir::new().unwrap();
    let control = ControlSignal::new();

    run_command("touch cwd_marker", temp.path(), &control).await.unwrap();

    assert!(temp.path().join("cwd_marker").exists());
  }

  #[tokio::test]
  async fn failure_stops_remaining_commands() {
    let temp = TempDir::new().unwrap();
    let control = ControlSignal::new();

    let err = run_commands(
      &commands(&["touch before", "sh -c 'exit 3'", "touch after"]),
      temp.path(),
      &control,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BuildError::Failed { code: Some(3), ref cmd, .. } if cmd == "sh -c 'exit 3'"));
    assert!(temp.path().join("before").exists());
    assert!(!temp.path().join("after").exists());
  }

  #[tokio::test]
  async fn missing_program_is_a_spawn_error() {
    let temp = TempDir::new().unwrap();
    let control = ControlSignal::new();

    let err = run_command("./definitely-not-here --flag", temp.path(), &control)
      .await
      .unwrap_err();

    assert!(matches!(err, BuildError::Spawn { .. }));
  }

  #[tokio::test]
  async fn malformed_and_empty_commands_are_rejected() {
    let temp = TempDir::new().unwrap();
    let control = ControlSignal::new();

    assert!(matches!(
      run_command("echo 'unterminated", temp.path(), &control).await,
      Err(BuildError::Parse { .. })
    ));
    assert!(matches!(
      run_command("   ", temp.path(), &control).await,
      Err(BuildError::EmptyCommand)
    ));
  }

  #[tokio::test]
  async fn cancel_terminates_silent_child() {
    let temp = TempDir::new().unwrap();
    let control = Arc::new(ControlSignal::new());

    let canceller = {
      let control = control.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        control.request_cancel();
      })
    };

    let started = Instant::now();
    let err = run_commands(
      &commands(&["sleep 30", "touch after"]),
      temp.path(),
      &control,
    )
    .await
    .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, BuildError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!temp.path().join("after").exists());
  }

  #[tokio::test]
  async fn cancel_terminates_chatty_child() {
    let temp = TempDir::new().unwrap();
    let control = Arc::new(ControlSignal::new());

    let canceller = {
      let control = control.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        control.request_cancel();
      })
    };

    let err = run_command(
      "sh -c 'while true; do echo tick; sleep 0.01; done'",
      temp.path(),
      &control,
    )
    .await
    .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, BuildError::Cancelled { .. }));
  }

  #[tokio::test]
  async fn cancel_while_paused_terminates_stopped_child() {
    let temp = TempDir::new().unwrap();
    let control = Arc::new(ControlSignal::new());

    let runner = {
      let control = control.clone();
      let cwd = temp.path().to_path_buf();
      tokio::spawn(async move { run_commands(&commands(&["sleep 30", "touch after"]), &cwd, &control).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    control.set_paused(true);
    // Let the runner stop the process group.
    tokio::time::sleep(PAUSE_POLL_INTERVAL * 2).await;
    assert!(!runner.is_finished());

    let cancelled_at = Instant::now();
    control.request_cancel();
    let result = tokio::time::timeout(Duration::from_secs(20), runner)
      .await
      .expect("cancel should end a paused command")
      .unwrap();

    assert!(matches!(result, Err(BuildError::Cancelled { .. })));
    // A stopped group that never saw SIGCONT would sit out the whole grace period.
    assert!(cancelled_at.elapsed() < TERMINATE_GRACE_PERIOD);
    assert!(!temp.path().join("after").exists());
  }

  #[tokio::test]
  async fn pause_stops_progress_without_killing() {
    let temp = TempDir::new().unwrap();
    let control = Arc::new(ControlSignal::new());
    let counter = temp.path().join("count");

    // Appends one line per 20ms to `count`, so progress is observable on disk.
    let script = format!(
      "sh -c 'i=0; while [ $i -lt 100 ]; do echo $i >> {}; i=$((i+1)); sleep 0.02; done'",
      counter.display()
    );

    let runner = {
      let control = control.clone();
      let cwd = temp.path().to_path_buf();
      tokio::spawn(async move { run_command(&script, &cwd, &control).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    control.set_paused(true);
    // Let the runner notice the pause and the stop take effect.
    tokio::time::sleep(PAUSE_POLL_INTERVAL * 2).await;

    let lines_at_pause = std::fs::read_to_string(&counter).unwrap().lines().count();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let lines_while_paused = std::fs::read_to_string(&counter).unwrap().lines().count();

    assert!(lines_at_pause > 0);
    assert_eq!(lines_at_pause, lines_while_paused, "no progress while paused");
    assert!(!runner.is_finished(), "paused command must not exit");

    control.set_paused(false);
    let result = tokio::time::timeout(Duration::from_secs(20), runner)
      .await
      .expect("command should finish after resuming")
      .unwrap();

    assert!(result.is_ok());
    let total = std::fs::read_to_string(&counter).unwrap().lines().count();
    assert_eq!(total, 100, "command resumed instead of restarting");
  }
}
