//! Per-worker supervision loop
//!
//! A [`WorkerLoop`] owns one slot of the fleet: it spawns the worker command,
//! reads its combined output line by line, watches for the liveness marker
//! and replaces the child when it exits, stalls, or its output breaks. The
//! loop ends only when its generation's stop token is cancelled.

use crate::config::SupervisorConfig;
use crate::core::models::{WorkerId, WorkerReport};
use crate::error::SupervisorError;
use crate::platform;
use crate::terminator::ProcessTerminator;
use chrono::Utc;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdout};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Waking one timer tick past the deadline guarantees the strict comparison
/// in [`StallClock::is_stalled_at`] holds when the timer fires.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// How often a worker whose output has closed checks whether it has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stand-in deadline for durations too large to represent (~30 years), the
/// same horizon tokio uses for an unbounded `sleep`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `base + duration`, clamped to a far-future instant instead of panicking.
pub(crate) fn instant_after(base: Instant, duration: Duration) -> Instant {
    base.checked_add(duration)
        .unwrap_or_else(|| Instant::now() + FAR_FUTURE)
}

/// Tracks time since the worker was last known alive.
#[derive(Debug, Clone)]
pub struct StallClock {
    last_liveness: Instant,
    timeout: Duration,
}

impl StallClock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_liveness: Instant::now(),
            timeout,
        }
    }

    pub fn reset(&mut self) {
        self.last_liveness = Instant::now();
    }

    pub fn record_liveness(&mut self) {
        self.last_liveness = Instant::now();
    }

    pub fn last_liveness(&self) -> Instant {
        self.last_liveness
    }

    /// Earliest instant at which the worker can be considered stalled.
    pub fn deadline(&self) -> Instant {
        instant_after(self.last_liveness, self.timeout)
    }

    /// Strictly greater-than: reaching the deadline exactly is not a stall.
    pub fn is_stalled_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_liveness) > self.timeout
    }
}

/// State owned by one worker slot across many child spawn/kill cycles
#[derive(Debug)]
struct WorkerHandle {
    /// Never reaped here: the terminator sweeps the process group first.
    child: Option<Child>,
    clock: StallClock,
}

impl WorkerHandle {
    fn new(stall_timeout: Duration) -> Self {
        Self {
            child: None,
            clock: StallClock::new(stall_timeout),
        }
    }
}

/// stdout and stderr of one child read as a single stream of lines
struct CombinedOutput {
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

impl CombinedOutput {
    fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        Self {
            stdout: stdout.map(|out| BufReader::new(out).lines()),
            stderr: stderr.map(|err| BufReader::new(err).lines()),
        }
    }

    fn is_open(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    /// Next line from whichever stream has one; `None` once both are closed.
    ///
    /// Cancel safe: `Lines::next_line` keeps partial lines buffered.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let (from_stdout, line) = match (&mut self.stdout, &mut self.stderr) {
                (Some(out), Some(err)) => tokio::select! {
                    line = out.next_line() => (true, line),
                    line = err.next_line() => (false, line),
                },
                (Some(out), None) => (true, out.next_line().await),
                (None, Some(err)) => (false, err.next_line().await),
                (None, None) => return Ok(None),
            };
            match line? {
                Some(line) => return Ok(Some(line)),
                None if from_stdout => self.stdout = None,
                None => self.stderr = None,
            }
        }
    }
}

/// Why the read loop handed control back to the spawn loop
#[derive(Debug)]
enum ChildEnd {
    Stopped,
    Exited,
    Stalled,
    ReadError(io::Error),
}

enum Event {
    Stop,
    Line(io::Result<Option<String>>),
    Exited,
    Deadline,
}

pub struct WorkerLoop {
    id: WorkerId,
    config: Arc<SupervisorConfig>,
    terminator: ProcessTerminator,
    stop: CancellationToken,
}

impl WorkerLoop {
    pub fn new(
        id: WorkerId,
        config: Arc<SupervisorConfig>,
        terminator: ProcessTerminator,
        stop: CancellationToken,
    ) -> Self {
        Self {
            id,
            config,
            terminator,
            stop,
        }
    }

    /// Supervise the slot until the stop token is cancelled.
    ///
    /// Whatever child is running when the token fires is terminated before
    /// this returns.
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::new(self.id);
        let mut handle = WorkerHandle::new(self.config.stall_timeout);
        let mut stdout = tokio::io::stdout();
        debug!(worker = %self.id, "Worker loop started");

        while !self.stop.is_cancelled() {
            let mut output = match self.spawn(&mut handle, &mut report) {
                Ok(output) => output,
                Err(err) => {
                    error!(worker = %self.id, category = %err.category(), "{}. Restarting...", err);
                    report.spawn_failures += 1;
                    self.cooldown().await;
                    continue;
                }
            };

            match self.supervise(&mut handle, &mut output, &mut stdout).await {
                ChildEnd::Stopped => break,
                ChildEnd::Exited => {
                    report.exits += 1;
                    info!(worker = %self.id, "Worker {}: Restarting", self.id);
                    // Sweeps anything the child left behind, then reaps it.
                    self.terminator.terminate(self.id, &mut handle.child).await;
                }
                ChildEnd::Stalled => {
                    report.stalls += 1;
                    warn!(
                        worker = %self.id,
                        "Worker {}: No inference finished for {}. Restarting...",
                        self.id,
                        describe_timeout(self.config.stall_timeout)
                    );
                    self.terminator.terminate(self.id, &mut handle.child).await;
                    handle.clock.reset();
                }
                ChildEnd::ReadError(source) => {
                    report.read_errors += 1;
                    let err = SupervisorError::OutputStream {
                        worker: self.id,
                        source,
                    };
                    error!(worker = %self.id, category = %err.category(), "{}. Restarting...", err);
                    self.terminator.terminate(self.id, &mut handle.child).await;
                    self.cooldown().await;
                }
            }
        }

        if handle.child.is_some() {
            info!(worker = %self.id, "Worker {}: Stopping", self.id);
            self.terminator.terminate(self.id, &mut handle.child).await;
        }
        report.finished_at = Utc::now();
        debug!(worker = %self.id, spawns = report.spawns, "Worker loop finished");
        report
    }

    /// NoProcess -> Running
    fn spawn(
        &self,
        handle: &mut WorkerHandle,
        report: &mut WorkerReport,
    ) -> Result<CombinedOutput, SupervisorError> {
        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(&self.config.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        platform::prepare_command(&mut command);

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            worker: self.id,
            command: self.config.command.clone(),
            source,
        })?;
        let output = CombinedOutput::new(child.stdout.take(), child.stderr.take());
        let pid = child.id();

        handle.child = Some(child);
        handle.clock.reset();
        report.spawns += 1;
        report.pids.extend(pid);
        info!(worker = %self.id, pid = ?pid, "Worker {}: Started process", self.id);
        Ok(output)
    }

    /// Running: read lines until the child has to be replaced or the loop stops.
    async fn supervise(
        &self,
        handle: &mut WorkerHandle,
        output: &mut CombinedOutput,
        stdout: &mut Stdout,
    ) -> ChildEnd {
        let Some(pid) = handle.child.as_ref().and_then(Child::id) else {
            return ChildEnd::Exited;
        };
        loop {
            let deadline = instant_after(handle.clock.deadline(), TIMER_RESOLUTION);
            let stream_open = output.is_open();

            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => Event::Stop,
                line = output.next_line(), if stream_open => Event::Line(line),
                _ = exited(pid), if !stream_open => Event::Exited,
                _ = sleep_until(deadline) => Event::Deadline,
            };

            match event {
                Event::Stop => return ChildEnd::Stopped,
                Event::Line(Ok(Some(line))) => self.on_line(&mut handle.clock, stdout, &line).await,
                // Both streams closed; the next pass waits for the child to exit.
                Event::Line(Ok(None)) => {}
                Event::Line(Err(err)) => return ChildEnd::ReadError(err),
                Event::Exited => return ChildEnd::Exited,
                Event::Deadline => {
                    if handle.clock.is_stalled_at(Instant::now()) {
                        return ChildEnd::Stalled;
                    }
                }
            }
        }
    }

    async fn on_line(&self, clock: &mut StallClock, stdout: &mut Stdout, line: &str) {
        if line.is_empty() {
            return;
        }
        if !self.config.silent {
            if let Err(source) = mirror_line(stdout, self.id, line).await {
                // A closed stdout must not take the worker down.
                let err = SupervisorError::from(source);
                debug!(worker = %self.id, category = %err.category(), "Failed to mirror output: {}", err);
            }
        }
        if line.contains(self.config.liveness_marker.as_str()) {
            clock.record_liveness();
        }
    }

    /// Pause before the next spawn attempt; cut short by the stop token.
    async fn cooldown(&self) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = sleep(self.config.read_error_cooldown) => {}
        }
    }
}

/// Resolves once `pid` has exited. The child is left unreaped, so its pid and
/// process group id cannot be reused until the terminator has swept the group.
async fn exited(pid: u32) {
    while platform::process_alive(pid) {
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// Pass a worker's own output through to stdout, tagged with its id.
async fn mirror_line(stdout: &mut Stdout, worker: WorkerId, line: &str) -> io::Result<()> {
    let tagged = format!("Worker {}: {}\n", worker, line.trim_end());
    stdout.write_all(tagged.as_bytes()).await?;
    stdout.flush().await
}

fn describe_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{:?}", timeout)
    }
}

/// Entry point used by the fleet: run worker `id` until `stop` is cancelled.
pub async fn run_worker(
    id: WorkerId,
    config: Arc<SupervisorConfig>,
    terminator: ProcessTerminator,
    stop: CancellationToken,
) -> WorkerReport {
    WorkerLoop::new(id, config, terminator, stop).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SHELL;

    #[tokio::test(start_paused = true)]
    async fn stall_requires_strictly_more_than_timeout() {
        let clock = StallClock::new(Duration::from_secs(60));
        let start = clock.last_liveness();

        assert!(!clock.is_stalled_at(start));
        assert!(!clock.is_stalled_at(start + Duration::from_secs(59)));
        assert!(!clock.is_stalled_at(start + Duration::from_secs(60)));
        assert!(clock.is_stalled_at(start + Duration::from_secs(60) + Duration::from_millis(1)));
        assert_eq!(clock.deadline(), start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_pushes_the_deadline_back() {
        let mut clock = StallClock::new(Duration::from_secs(60));
        let start = clock.last_liveness();

        tokio::time::advance(Duration::from_secs(59)).await;
        clock.record_liveness();
        assert!(!clock.is_stalled_at(start + Duration::from_secs(90)));
        assert_eq!(clock.deadline(), start + Duration::from_secs(119));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_deadline_is_clamped() {
        let clock = StallClock::new(Duration::from_secs(u64::MAX));
        let start = clock.last_liveness();

        let deadline = clock.deadline();
        assert!(deadline > start + Duration::from_secs(86400 * 365));
        assert!(!clock.is_stalled_at(start + Duration::from_secs(86400 * 365)));
        assert!(instant_after(deadline, TIMER_RESOLUTION) >= deadline);
    }

    #[test]
    fn timeouts_in_whole_minutes_read_naturally() {
        assert_eq!(describe_timeout(Duration::from_secs(3600)), "60 minutes");
        assert_eq!(describe_timeout(Duration::from_millis(1500)), "1.5s");
    }

    #[tokio::test]
    async fn exit_is_detected_without_reaping() {
        let mut child = Command::new(SHELL)
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .expect("spawn sh");
        let pid = child.id().expect("pid");

        tokio::time::timeout(Duration::from_secs(5), exited(pid))
            .await
            .expect("exit noticed");
        // Still a zombie: tokio has not reaped it, so the pid is reserved.
        assert_eq!(child.id(), Some(pid));
        assert!(crate::core::process_tree::is_zombie(pid));
        child.wait().await.expect("wait");
    }

    #[tokio::test]
    async fn combined_output_reads_both_streams_until_closed() {
        let mut child = Command::new(SHELL)
            .arg("-c")
            .arg("echo out; echo err 1>&2")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let mut output = CombinedOutput::new(child.stdout.take(), child.stderr.take());

        let mut lines = Vec::new();
        while let Some(line) = output.next_line().await.expect("read") {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert!(!output.is_open());
        child.wait().await.expect("wait");
    }
}
