//! One external test process and its status machine.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::adapter::TestAdapter;

/// Where a handle is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built but not spawned.
    NotStarted,
    /// Spawned and not yet reaped.
    Running,
    /// Exited, killed, or never spawnable.
    Finished,
}

/// Status observed for a handle, ordered by precedence.
///
/// The status only ever moves up this order; see [`ProcessStatus::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Nothing but passing output so far.
    Nominal,
    /// The adapter reported a failing test.
    Failed,
    /// Error-stream output, abnormal termination, or spawn failure.
    Errored,
    /// Deadline exceeded; the process was killed.
    TimedOut,
}

/// Signals that move a [`ProcessStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A stdout chunk the adapter did not consider ok.
    AdapterFailed,
    /// Any data on the error stream.
    ErrorOutput,
    /// Non-zero or signal exit, failed to spawn, or failed to reap.
    AbnormalExit,
    /// Elapsed time passed the deadline.
    DeadlineExceeded,
}

impl ProcessStatus {
    /// The single transition function for process status.
    ///
    /// Transitions are monotonic: an event whose target ranks below the
    /// current status leaves it untouched, so `TimedOut` is final.
    pub fn transition(self, event: StatusEvent) -> Self {
        let target = match event {
            StatusEvent::AdapterFailed => Self::Failed,
            StatusEvent::ErrorOutput | StatusEvent::AbnormalExit => Self::Errored,
            StatusEvent::DeadlineExceeded => Self::TimedOut,
        };
        self.max(target)
    }
}

#[derive(Debug)]
enum Chunk {
    Stdout(String),
    Stderr(String),
}

/// Wraps one spawned test process.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    command: Option<Command>,
    child: Option<Child>,
    lifecycle: Lifecycle,
    status: ProcessStatus,
    timeout: Option<Duration>,
    started_at: Option<Instant>,
    elapsed: Duration,
    exit_code: Option<i32>,
    exited: Option<ExitStatus>,
    timed_out: bool,
    output: String,
    error_output: String,
    chunks: Option<Receiver<Chunk>>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Wrap a command that has not been spawned yet.
    pub fn new(label: impl Into<String>, command: Command, timeout: Option<Duration>) -> Self {
        Self {
            label: label.into(),
            command: Some(command),
            child: None,
            lifecycle: Lifecycle::NotStarted,
            status: ProcessStatus::Nominal,
            timeout,
            started_at: None,
            elapsed: Duration::ZERO,
            exit_code: None,
            exited: None,
            timed_out: false,
            output: String::new(),
            error_output: String::new(),
            chunks: None,
            readers: Vec::new(),
        }
    }

    /// A handle for an invocation that could not even be built.
    pub fn unspawnable(label: impl Into<String>, message: impl Into<String>) -> Self {
        let mut handle = Self {
            label: label.into(),
            command: None,
            child: None,
            lifecycle: Lifecycle::Finished,
            status: ProcessStatus::Nominal,
            timeout: None,
            started_at: None,
            elapsed: Duration::ZERO,
            exit_code: None,
            exited: None,
            timed_out: false,
            output: String::new(),
            error_output: message.into(),
            chunks: None,
            readers: Vec::new(),
        };
        handle.status = handle.status.transition(StatusEvent::AbnormalExit);
        handle
    }

    /// Spawn the process with piped output. Calling it again is a no-op.
    pub fn start(&mut self) {
        if self.lifecycle != Lifecycle::NotStarted {
            return;
        }
        let Some(mut command) = self.command.take() else {
            self.lifecycle = Lifecycle::Finished;
            return;
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        self.started_at = Some(Instant::now());
        match command.spawn() {
            Ok(mut child) => {
                let (tx, rx) = mpsc::channel();
                if let Some(stdout) = child.stdout.take() {
                    self.readers
                        .push(spawn_reader(stdout, tx.clone(), Chunk::Stdout));
                }
                if let Some(stderr) = child.stderr.take() {
                    self.readers.push(spawn_reader(stderr, tx, Chunk::Stderr));
                }
                self.chunks = Some(rx);
                self.child = Some(child);
                self.lifecycle = Lifecycle::Running;
                tracing::trace!(process = %self.label, "process started");
            }
            Err(err) => {
                self.error_output
                    .push_str(&format!("failed to spawn test process: {err}\n"));
                self.status = self.status.transition(StatusEvent::AbnormalExit);
                self.lifecycle = Lifecycle::Finished;
            }
        }
    }

    /// Drain streamed output, reap the child if it exited, and enforce the
    /// deadline. Returns whether the process is still running.
    ///
    /// A handle stays running after its child exits until both output streams
    /// close, since descendants may still hold them open. The deadline keeps
    /// applying during that wait.
    pub fn poll(&mut self, adapter: &dyn TestAdapter) -> bool {
        if self.lifecycle != Lifecycle::Running {
            return false;
        }
        let mut streams_open = self.drain_available(adapter);

        if self.exited.is_none() {
            let waited = match self.child.as_mut() {
                Some(child) => child.try_wait(),
                None => {
                    self.lifecycle = Lifecycle::Finished;
                    return false;
                }
            };
            match waited {
                Ok(Some(exit)) => {
                    self.exit_code = exit.code();
                    self.exited = Some(exit);
                    streams_open = self.drain_available(adapter);
                }
                Ok(None) => {}
                Err(err) => {
                    self.error_output
                        .push_str(&format!("failed to poll test process: {err}\n"));
                    self.status = self.status.transition(StatusEvent::AbnormalExit);
                    if let Some(child) = self.child.as_mut() {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    self.release(adapter, false);
                    return false;
                }
            }
        }

        if let Some(exit) = self.exited {
            if !streams_open {
                self.finish_exited(exit, adapter);
                return false;
            }
        }
        if self.deadline_passed() {
            self.kill_for_timeout(adapter);
            return false;
        }
        true
    }

    fn deadline_passed(&self) -> bool {
        match (self.timeout, self.started_at) {
            (Some(timeout), Some(started_at)) => started_at.elapsed() > timeout,
            _ => false,
        }
    }

    // Output that the adapter never judged failing still errors on a non-zero
    // or signal exit.
    fn finish_exited(&mut self, exit: ExitStatus, adapter: &dyn TestAdapter) {
        self.exit_code = exit.code();
        if self.status == ProcessStatus::Nominal && exit.code() != Some(0) {
            self.status = self.status.transition(StatusEvent::AbnormalExit);
        }
        self.release(adapter, true);
    }

    fn kill_for_timeout(&mut self, adapter: &dyn TestAdapter) {
        self.timed_out = true;
        self.status = self.status.transition(StatusEvent::DeadlineExceeded);
        if self.exited.is_none() {
            if let Some(child) = self.child.as_mut() {
                let _ = child.kill();
                if let Ok(exit) = child.wait() {
                    self.exit_code = exit.code();
                }
            }
        }
        tracing::debug!(process = %self.label, "process exceeded its timeout and was killed");
        // Descendants may still hold the pipes open, so readers are detached
        // instead of joined.
        self.release(adapter, false);
    }

    fn release(&mut self, adapter: &dyn TestAdapter, join_readers: bool) {
        self.drain_available(adapter);
        self.chunks = None;
        if join_readers {
            for reader in self.readers.drain(..) {
                let _ = reader.join();
            }
        } else {
            self.readers.clear();
        }
        if let Some(started_at) = self.started_at {
            self.elapsed = started_at.elapsed();
        }
        self.child = None;
        self.lifecycle = Lifecycle::Finished;
    }

    // Returns false once every stream has closed.
    fn drain_available(&mut self, adapter: &dyn TestAdapter) -> bool {
        loop {
            let next = match self.chunks.as_ref() {
                Some(rx) => rx.try_recv(),
                None => return false,
            };
            match next {
                Ok(chunk) => self.apply(chunk, adapter),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply(&mut self, chunk: Chunk, adapter: &dyn TestAdapter) {
        match chunk {
            Chunk::Stdout(data) => {
                if self.status == ProcessStatus::Nominal && !adapter.ok(&data) {
                    self.status = self.status.transition(StatusEvent::AdapterFailed);
                }
                self.output.push_str(&data);
            }
            Chunk::Stderr(data) => {
                self.status = self.status.transition(StatusEvent::ErrorOutput);
                self.error_output.push_str(&data);
            }
        }
    }

    /// Human-readable name used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current lifecycle stage.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// True while spawned and not yet reaped.
    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Current status.
    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// True if the process was killed for exceeding its deadline.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Exit code, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Wall-clock time between spawn and completion.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Captured stdout.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Captured stderr (plus spawn/poll failure messages).
    pub fn error_output(&self) -> &str {
        &self.error_output
    }

    /// Move captured output out of the handle, leaving it empty.
    pub fn take_output(&mut self) -> (String, String) {
        (
            std::mem::take(&mut self.output),
            std::mem::take(&mut self.error_output),
        )
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn spawn_reader<R>(stream: R, tx: Sender<Chunk>, wrap: fn(String) -> Chunk) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(wrap(text)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::TapCommandAdapter;

    #[test]
    fn transition_never_lowers_precedence() {
        let events = [
            StatusEvent::AdapterFailed,
            StatusEvent::ErrorOutput,
            StatusEvent::AbnormalExit,
            StatusEvent::DeadlineExceeded,
        ];
        for start in [
            ProcessStatus::Nominal,
            ProcessStatus::Failed,
            ProcessStatus::Errored,
            ProcessStatus::TimedOut,
        ] {
            for event in events {
                assert!(start.transition(event) >= start);
            }
        }
        assert_eq!(
            ProcessStatus::TimedOut.transition(StatusEvent::AdapterFailed),
            ProcessStatus::TimedOut
        );
        assert_eq!(
            ProcessStatus::Failed.transition(StatusEvent::ErrorOutput),
            ProcessStatus::Errored
        );
        assert_eq!(
            ProcessStatus::Nominal.transition(StatusEvent::AdapterFailed),
            ProcessStatus::Failed
        );
    }

    #[test]
    fn unspawnable_handle_is_finished_and_errored() {
        let handle = ProcessHandle::unspawnable("m1", "no command");
        assert_eq!(handle.lifecycle(), Lifecycle::Finished);
        assert_eq!(handle.status(), ProcessStatus::Errored);
        assert_eq!(handle.error_output(), "no command");
    }

    #[cfg(unix)]
    fn run_to_completion(handle: &mut ProcessHandle) {
        let adapter = TapCommandAdapter::new("true", Vec::new());
        handle.start();
        while handle.poll(&adapter) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[test]
    fn passing_output_stays_nominal() {
        let mut handle = ProcessHandle::new("ok", sh("echo 'ok 1 - adds'"), None);
        run_to_completion(&mut handle);
        assert_eq!(handle.status(), ProcessStatus::Nominal);
        assert_eq!(handle.exit_code(), Some(0));
        assert!(handle.output().contains("ok 1 - adds"));
    }

    #[cfg(unix)]
    #[test]
    fn not_ok_line_marks_failed() {
        let mut handle = ProcessHandle::new(
            "fail",
            sh("echo 'ok 1 - a'; echo 'not ok 2 - b'; exit 1"),
            None,
        );
        run_to_completion(&mut handle);
        assert_eq!(handle.status(), ProcessStatus::Failed);
        assert_eq!(handle.exit_code(), Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn stderr_output_marks_errored() {
        let mut handle = ProcessHandle::new("err", sh("echo 'fatal' >&2"), None);
        run_to_completion(&mut handle);
        assert_eq!(handle.status(), ProcessStatus::Errored);
        assert!(handle.error_output().contains("fatal"));
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_and_marks_timed_out() {
        let mut handle = ProcessHandle::new(
            "hang",
            sh("echo 'not ok 1 - slow'; exec sleep 5"),
            Some(Duration::from_millis(200)),
        );
        let started = Instant::now();
        run_to_completion(&mut handle);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(handle.timed_out());
        assert_eq!(handle.status(), ProcessStatus::TimedOut);
    }

    #[cfg(unix)]
    #[test]
    fn background_child_holding_pipes_still_times_out() {
        let mut handle = ProcessHandle::new(
            "bg",
            sh("sleep 5 & echo 'ok 1'"),
            Some(Duration::from_millis(200)),
        );
        let started = Instant::now();
        run_to_completion(&mut handle);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(handle.timed_out());
        assert_eq!(handle.status(), ProcessStatus::TimedOut);
        assert_eq!(handle.exit_code(), Some(0));
        assert!(handle.output().contains("ok 1"));
    }

    #[cfg(unix)]
    #[test]
    fn background_child_that_closes_pipes_finishes_normally() {
        let mut handle = ProcessHandle::new(
            "bg-quiet",
            sh("sleep 5 >/dev/null 2>&1 & echo 'ok 1'"),
            Some(Duration::from_secs(3)),
        );
        let started = Instant::now();
        run_to_completion(&mut handle);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!handle.timed_out());
        assert_eq!(handle.status(), ProcessStatus::Nominal);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_without_failing_output_is_errored() {
        let mut handle = ProcessHandle::new("crash", sh("exit 3"), None);
        run_to_completion(&mut handle);
        assert_eq!(handle.exit_code(), Some(3));
        assert_eq!(handle.status(), ProcessStatus::Errored);
    }

    #[cfg(unix)]
    #[test]
    fn signal_exit_is_errored() {
        let mut handle = ProcessHandle::new("killed", sh("echo 'ok 1'; kill -9 $$"), None);
        run_to_completion(&mut handle);
        assert_eq!(handle.exit_code(), None);
        assert_eq!(handle.status(), ProcessStatus::Errored);
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_is_errored_not_panicking() {
        let cmd = Command::new("/definitely/not/a/real/binary");
        let mut handle = ProcessHandle::new("missing", cmd, None);
        run_to_completion(&mut handle);
        assert_eq!(handle.status(), ProcessStatus::Errored);
        assert!(handle.error_output().contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[test]
    fn take_output_clears_buffers() {
        let mut handle = ProcessHandle::new("out", sh("echo hi; echo there >&2"), None);
        run_to_completion(&mut handle);
        let (out, err) = handle.take_output();
        assert_eq!(out, "hi\n");
        assert_eq!(err, "there\n");
        assert!(handle.output().is_empty());
        assert!(handle.error_output().is_empty());
    }
}
