//! Process-tree termination
//!
//! Two phases behind one idempotent call: snapshot the tree and send SIGTERM
//! to every member, then SIGKILL whatever outlives the grace period. The
//! worker's own child is always reaped before the handle is released.

use crate::config::TERMINATE_GRACE_PERIOD;
use crate::core::models::{ProcessTreeSnapshot, WorkerId};
use crate::core::process_tree;
use crate::error::SupervisorError;
use crate::platform::{self, SignalDelivery};
use crate::worker::instant_after;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Bound on waiting for SIGKILLed processes to disappear from the table.
const KILL_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a call to [`ProcessTerminator::terminate`] ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The handle held no process
    NoProcess,
    /// The child had already exited on its own
    AlreadyExited,
    /// Every process in the snapshot exited within the grace period
    Graceful { signalled: usize },
    /// These pids survived SIGTERM and were killed
    Forced { killed: Vec<u32> },
}

#[derive(Debug, Clone)]
pub struct ProcessTerminator {
    grace_period: Duration,
}

impl Default for ProcessTerminator {
    fn default() -> Self {
        Self::new(TERMINATE_GRACE_PERIOD)
    }
}

impl ProcessTerminator {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Terminate the child held in `slot` and all of its descendants.
    ///
    /// Never fails: errors are logged with the worker id and absorbed. The slot
    /// is empty afterwards, so a second call is a no-op.
    pub async fn terminate(&self, worker: WorkerId, slot: &mut Option<Child>) -> Termination {
        let Some(mut child) = slot.take() else {
            return Termination::NoProcess;
        };

        let Some(pid) = child.id() else {
            // Reaped elsewhere: the pid may already belong to another process.
            info!(worker = %worker, "Process already terminated");
            return Termination::AlreadyExited;
        };
        if !platform::process_alive(pid) {
            // Exited but unreaped, so the group id is still ours to sweep.
            info!(worker = %worker, pid, "Process already terminated");
            sweep_process_group(worker, pid);
            reap(worker, &mut child).await;
            return Termination::AlreadyExited;
        }

        info!(worker = %worker, pid, "Terminating process...");

        let snapshot = match process_tree::snapshot_tree(pid) {
            Ok(snapshot) => snapshot,
            Err(source) => {
                let err = SupervisorError::from(source);
                warn!(
                    worker = %worker,
                    pid,
                    category = %err.category(),
                    "Failed to enumerate child processes: {}",
                    err
                );
                ProcessTreeSnapshot::new(pid, Vec::new())
            }
        };
        debug!(
            worker = %worker,
            pid,
            descendants = ?snapshot.descendants,
            "Captured process tree"
        );

        for target in snapshot.all_pids() {
            deliver(worker, target, Signal::SIGTERM);
        }

        let survivors = self.wait_for_exit(&snapshot).await;
        let outcome = if survivors.is_empty() {
            Termination::Graceful {
                signalled: snapshot.process_count(),
            }
        } else {
            for &target in &survivors {
                warn!(worker = %worker, pid = target, "Force killing process {}", target);
                deliver(worker, target, Signal::SIGKILL);
            }
            settle(&survivors).await;
            Termination::Forced { killed: survivors }
        };

        // The root is still unreaped here, which keeps its group id reserved.
        sweep_process_group(worker, pid);
        reap(worker, &mut child).await;
        info!(worker = %worker, pid, "Process termination completed");
        outcome
    }

    /// Poll until every member of the snapshot is gone or the grace period
    /// elapses; returns the pids still alive.
    async fn wait_for_exit(&self, snapshot: &ProcessTreeSnapshot) -> Vec<u32> {
        let deadline = instant_after(Instant::now(), self.grace_period);
        loop {
            let survivors = survivors(snapshot);
            if survivors.is_empty() || Instant::now() >= deadline {
                return survivors;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

/// Snapshot members still running. The root counts as gone once it is a
/// zombie; it is only reaped after the group sweep.
fn survivors(snapshot: &ProcessTreeSnapshot) -> Vec<u32> {
    snapshot
        .all_pids()
        .into_iter()
        .filter(|&pid| platform::process_alive(pid))
        .collect()
}

fn deliver(worker: WorkerId, pid: u32, signal: Signal) {
    match platform::send_signal(pid, signal) {
        Ok(SignalDelivery::Delivered) => {}
        Ok(SignalDelivery::AlreadyGone) => {
            debug!(worker = %worker, pid, "Process already terminated before {}", signal);
        }
        Err(errno) => {
            error!(
                worker = %worker,
                pid,
                "Error while terminating process - {} failed: {}",
                signal,
                errno
            );
        }
    }
}

/// Kill stragglers left in the worker's process group, e.g. background jobs
/// started after the snapshot or orphaned by a shell that already exited.
fn sweep_process_group(worker: WorkerId, pgid: u32) {
    match killpg(Pid::from_raw(pgid as libc::pid_t), Signal::SIGKILL) {
        Ok(()) => debug!(worker = %worker, pgid, "Swept remaining process group members"),
        Err(Errno::ESRCH) => {}
        Err(errno) => debug!(worker = %worker, pgid, "Process group sweep failed: {}", errno),
    }
}

async fn settle(killed: &[u32]) {
    let deadline = Instant::now() + KILL_SETTLE_TIMEOUT;
    while Instant::now() < deadline && killed.iter().any(|&pid| platform::process_alive(pid)) {
        sleep(POLL_INTERVAL).await;
    }
}

async fn reap(worker: WorkerId, child: &mut Child) {
    match timeout(KILL_SETTLE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(worker = %worker, %status, "Reaped worker process"),
        Ok(Err(err)) => warn!(worker = %worker, "Failed to reap worker process: {}", err),
        Err(_) => {
            // Still unreaped after SIGKILL; kill_on_drop covers the handle.
            warn!(worker = %worker, "Worker process did not exit after SIGKILL");
            let _ = child.start_kill();
        }
    }
}
