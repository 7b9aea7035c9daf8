use crate::error::SupervisorError;
use std::time::Duration;

/// Text that marks a worker as alive when it appears anywhere in an output line.
pub const LIVENESS_MARKER: &str = "Inference finished";

pub const DEFAULT_STALL_TIMEOUT_MINUTES: u64 = 60;
pub const DEFAULT_FLEET_RESTART_MINUTES: u64 = 5;
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(1);
pub const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(3);
pub const READ_ERROR_COOLDOWN: Duration = Duration::from_secs(5);

/// Default shell used to interpret the worker command template.
pub const SHELL: &str = "sh";

/// Immutable supervisor configuration shared by every worker of the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub command: String,
    /// Program invoked as `<shell> -c <command>`.
    pub shell: String,
    pub instances: usize,
    pub silent: bool,
    pub stall_timeout: Duration,
    /// `None` disables the periodic fleet restart.
    pub fleet_restart_interval: Option<Duration>,
    pub stagger: Duration,
    pub grace_period: Duration,
    pub read_error_cooldown: Duration,
    pub liveness_marker: String,
}

impl SupervisorConfig {
    pub fn new(command: impl Into<String>, instances: usize) -> Self {
        Self {
            command: command.into(),
            shell: SHELL.to_string(),
            instances,
            silent: false,
            stall_timeout: minutes(DEFAULT_STALL_TIMEOUT_MINUTES),
            fleet_restart_interval: Some(minutes(DEFAULT_FLEET_RESTART_MINUTES)),
            stagger: DEFAULT_STAGGER,
            grace_period: TERMINATE_GRACE_PERIOD,
            read_error_cooldown: READ_ERROR_COOLDOWN,
            liveness_marker: LIVENESS_MARKER.to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_fleet_restart_interval(mut self, interval: Option<Duration>) -> Self {
        self.fleet_restart_interval = interval;
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_read_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.read_error_cooldown = cooldown;
        self
    }

    pub fn with_liveness_marker(mut self, marker: impl Into<String>) -> Self {
        self.liveness_marker = marker.into();
        self
    }

    /// Reject configurations the supervisor cannot run with.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.command.trim().is_empty() {
            return Err(SupervisorError::invalid_config("command must not be empty"));
        }
        if self.shell.trim().is_empty() {
            return Err(SupervisorError::invalid_config("shell must not be empty"));
        }
        if self.instances == 0 {
            return Err(SupervisorError::invalid_config(
                "instances must be a positive integer",
            ));
        }
        if self.stall_timeout.is_zero() {
            return Err(SupervisorError::invalid_config(
                "stall timeout must be greater than zero",
            ));
        }
        if self.liveness_marker.is_empty() {
            return Err(SupervisorError::invalid_config(
                "liveness marker must not be empty",
            ));
        }
        if matches!(self.fleet_restart_interval, Some(interval) if interval.is_zero()) {
            return Err(SupervisorError::invalid_config(
                "fleet restart interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Saturates instead of overflowing for absurdly large counts.
pub fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_constants() {
        let config = SupervisorConfig::new("run-worker", 3);
        assert_eq!(config.stall_timeout, Duration::from_secs(3600));
        assert_eq!(config.fleet_restart_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.stagger, Duration::from_secs(1));
        assert_eq!(config.grace_period, Duration::from_secs(3));
        assert_eq!(config.read_error_cooldown, Duration::from_secs(5));
        assert_eq!(config.liveness_marker, "Inference finished");
        assert_eq!(config.shell, "sh");
        assert!(!config.silent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_instances_rejected() {
        let err = SupervisorConfig::new("run-worker", 0).validate().unwrap_err();
        assert!(err.to_string().contains("instances"));
    }

    #[test]
    fn blank_command_rejected() {
        assert!(SupervisorConfig::new("   ", 1).validate().is_err());
    }

    #[test]
    fn zero_stall_timeout_rejected() {
        let config = SupervisorConfig::new("run-worker", 1).with_stall_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn huge_minute_counts_saturate() {
        assert_eq!(minutes(2), Duration::from_secs(120));
        assert_eq!(minutes(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn blank_shell_rejected() {
        assert!(SupervisorConfig::new("run-worker", 1).with_shell("").validate().is_err());
    }

    #[test]
    fn disabled_fleet_restart_is_valid() {
        let config = SupervisorConfig::new("run-worker", 1).with_fleet_restart_interval(None);
        assert!(config.validate().is_ok());

        let zero = SupervisorConfig::new("run-worker", 1)
            .with_fleet_restart_interval(Some(Duration::ZERO));
        assert!(zero.validate().is_err());
    }
}
