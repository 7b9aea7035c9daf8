//! Process tree tracking module
//!
//! Captures the descendants of a worker process at a single point in time so
//! the terminator can signal the whole tree, not only the shell it spawned.
//!
//! Platform strategy: psutil provides the process table and parent links on
//! Linux/macOS.

use crate::core::models::ProcessTreeSnapshot;
use psutil::process::{Process, Status};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessTreeError {
    #[error("Failed to get process information: {0}")]
    ProcessInfo(#[from] psutil::Error),
    #[error("Process not found: {0}")]
    ProcessNotFound(u32),
}

// Add support for psutil::process::ProcessError conversion
impl From<psutil::process::ProcessError> for ProcessTreeError {
    fn from(err: psutil::process::ProcessError) -> Self {
        match err {
            psutil::process::ProcessError::NoSuchProcess { pid, .. } => {
                ProcessTreeError::ProcessNotFound(pid)
            }
            other => {
                use std::io;
                ProcessTreeError::ProcessInfo(psutil::Error::from(io::Error::other(format!(
                    "{:?}",
                    other
                ))))
            }
        }
    }
}

/// Snapshot `root_pid` together with all of its transitive descendants.
///
/// Processes that vanish while the table is being read are skipped; only a
/// failure to list the process table itself is an error.
pub fn snapshot_tree(root_pid: u32) -> Result<ProcessTreeSnapshot, ProcessTreeError> {
    let children = children_by_parent()?;
    Ok(ProcessTreeSnapshot::new(
        root_pid,
        collect_descendants(root_pid, &children),
    ))
}

/// Build the parent -> children index from the live process table.
fn children_by_parent() -> Result<HashMap<u32, Vec<u32>>, ProcessTreeError> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for pid in psutil::process::pids()? {
        let parent = match Process::new(pid).and_then(|process| process.ppid()) {
            Ok(Some(parent)) => parent,
            // Exited between listing and inspection, or no parent (pid 1)
            Ok(None) | Err(_) => continue,
        };
        children.entry(parent).or_default().push(pid);
    }
    Ok(children)
}

/// Breadth-first walk of the parent -> children index.
pub(crate) fn collect_descendants(root_pid: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut descendants = Vec::new();
    let mut queue = VecDeque::from([root_pid]);
    while let Some(pid) = queue.pop_front() {
        if let Some(direct) = children.get(&pid) {
            for &child in direct {
                // Guard against pid reuse producing a cycle
                if child != root_pid && !descendants.contains(&child) {
                    descendants.push(child);
                    queue.push_back(child);
                }
            }
        }
    }
    descendants
}

/// Whether `pid` is a zombie (exited but not yet reaped by its parent).
pub fn is_zombie(pid: u32) -> bool {
    matches!(
        Process::new(pid).and_then(|process| process.status()),
        Ok(Status::Zombie)
    )
}
