use crate::core::process_tree;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use tokio::process::Command;

/// Result of delivering a signal to a single process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    Delivered,
    /// The process exited before the signal could be delivered
    AlreadyGone,
}

/// Safely prepare the execution environment for worker processes
///
/// Each worker gets its own process group so a terminal Ctrl-C reaches only
/// the supervisor. On Linux the child also receives SIGTERM if the supervisor
/// dies without running its shutdown sequence.
pub fn prepare_command(cmd: &mut Command) {
    // Use RAII pattern to wrap unsafe operations
    unsafe {
        cmd.pre_exec(|| {
            // Safely set process group ID
            if set_process_group() != 0 {
                return Err(io::Error::last_os_error());
            }

            // Set parent death signal on Linux
            #[cfg(target_os = "linux")]
            {
                if set_parent_death_signal() != 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            Ok(())
        });
    }
}

/// Check if process is alive
///
/// Zombies count as gone: they hold a pid but run nothing.
pub fn process_alive(pid: u32) -> bool {
    let alive = match kill(to_pid(pid), None) {
        Ok(()) => true,
        // EPERM means process exists but no permission
        Err(errno) => errno == Errno::EPERM,
    };
    alive && !process_tree::is_zombie(pid)
}

/// Send `signal` to `pid`, treating a vanished target as success.
pub fn send_signal(pid: u32, signal: Signal) -> Result<SignalDelivery, Errno> {
    match kill(to_pid(pid), signal) {
        Ok(()) => Ok(SignalDelivery::Delivered),
        Err(Errno::ESRCH) => Ok(SignalDelivery::AlreadyGone),
        Err(errno) => Err(errno),
    }
}

pub fn current_pid() -> u32 {
    std::process::id()
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as libc::pid_t)
}

/// Safely set process group ID
///
/// Encapsulates unsafe setpgid call
unsafe fn set_process_group() -> libc::c_int {
    unsafe { libc::setpgid(0, 0) }
}

/// Safely set parent death signal
///
/// Encapsulates unsafe prctl call
#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> libc::c_int {
    unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(current_pid()));
    }

    #[test]
    fn signalling_a_live_process_is_delivered() {
        // SIGCONT to a running process has no effect.
        assert_eq!(
            send_signal(current_pid(), Signal::SIGCONT),
            Ok(SignalDelivery::Delivered)
        );
    }

    #[tokio::test]
    async fn reaped_child_is_gone() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .expect("spawn sh");
        let pid = child.id().expect("pid before wait");
        child.wait().await.expect("wait");
        assert!(!process_alive(pid));
        assert_eq!(
            send_signal(pid, Signal::SIGTERM),
            Ok(SignalDelivery::AlreadyGone)
        );
    }
}
