//! CLI 命令行参数解析
//!
//! 使用 clap 定义命令行接口，并转换为经过校验的 [`SupervisorConfig`]

use crate::config::{
    minutes, SupervisorConfig, DEFAULT_FLEET_RESTART_MINUTES, DEFAULT_STALL_TIMEOUT_MINUTES, SHELL,
};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Run inference workers in parallel and keep them healthy
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "inference-warden", version, about, long_about = None)]
pub struct Cli {
    /// Worker command to run (interpreted by `sh -c`)
    #[arg(value_name = "COMMAND")]
    pub command: String,

    /// Number of instances to run in parallel
    #[arg(value_name = "INSTANCES", value_parser = clap::value_parser!(u32).range(1..))]
    pub instances: u32,

    /// Shell that interprets COMMAND
    #[arg(long, value_name = "PROGRAM", default_value = SHELL)]
    pub shell: String,

    /// Only log supervisor events; do not pass worker output through
    #[arg(long)]
    pub silent: bool,

    /// Minutes without "Inference finished" before a worker is restarted
    #[arg(
        long = "no-inference-timeout",
        value_name = "MINUTES",
        default_value_t = DEFAULT_STALL_TIMEOUT_MINUTES,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub no_inference_timeout: u64,

    /// Minutes between full fleet restarts (0 disables them)
    #[arg(long, value_name = "MINUTES", default_value_t = DEFAULT_FLEET_RESTART_MINUTES)]
    pub fleet_restart_minutes: u64,

    /// Delay between starting consecutive workers
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub stagger_ms: u64,

    /// Log filter (trace, debug, info, warn, error or a RUST_LOG directive)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Also append logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    pub fn try_parse_args_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(args)
    }

    pub fn to_config(&self) -> SupervisorConfig {
        let fleet_restart = match self.fleet_restart_minutes {
            0 => None,
            count => Some(minutes(count)),
        };
        SupervisorConfig::new(self.command.clone(), self.instances as usize)
            .with_shell(self.shell.clone())
            .with_silent(self.silent)
            .with_stall_timeout(minutes(self.no_inference_timeout))
            .with_fleet_restart_interval(fleet_restart)
            .with_stagger(Duration::from_millis(self.stagger_ms))
    }
}
