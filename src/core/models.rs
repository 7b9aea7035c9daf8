//! 统一数据模型定义
//!
//! 定义 worker 身份、进程树快照以及运行报告等核心数据结构

use chrono::{DateTime, Utc};
use std::fmt;

/// Worker 唯一标识符，在整个 fleet 生命周期内保持稳定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 进程树快照：根进程及其在快照时刻的所有后代进程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTreeSnapshot {
    pub root_pid: u32,
    /// 后代进程，按广度优先顺序（子进程在孙进程之前）
    pub descendants: Vec<u32>,
}

impl ProcessTreeSnapshot {
    pub fn new(root_pid: u32, descendants: Vec<u32>) -> Self {
        Self {
            root_pid,
            descendants,
        }
    }

    /// 所有进程：先后代，后根进程（与发送信号的顺序一致）
    pub fn all_pids(&self) -> Vec<u32> {
        let mut pids = self.descendants.clone();
        pids.push(self.root_pid);
        pids
    }

    pub fn process_count(&self) -> usize {
        self.descendants.len() + 1
    }
}

/// 单个 WorkerLoop 的运行统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: WorkerId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 成功启动的子进程次数
    pub spawns: u32,
    /// 子进程自行退出的次数（正常退出与崩溃不作区分）
    pub exits: u32,
    pub stalls: u32,
    pub read_errors: u32,
    pub spawn_failures: u32,
    /// 按启动顺序记录的子进程 PID
    pub pids: Vec<u32>,
}

impl WorkerReport {
    pub fn new(id: WorkerId) -> Self {
        let now = Utc::now();
        Self {
            id,
            started_at: now,
            finished_at: now,
            spawns: 0,
            exits: 0,
            stalls: 0,
            read_errors: 0,
            spawn_failures: 0,
            pids: Vec::new(),
        }
    }

    /// Respawns after the first spawn.
    pub fn restarts(&self) -> u32 {
        self.spawns.saturating_sub(1)
    }
}

/// 一代 worker（一次启动到一次全量停止之间）的报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub generation: u64,
    pub workers: Vec<WorkerReport>,
}

impl GenerationReport {
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|worker| worker.id).collect()
    }

    pub fn first_start(&self) -> Option<DateTime<Utc>> {
        self.workers.iter().map(|worker| worker.started_at).min()
    }

    pub fn last_finish(&self) -> Option<DateTime<Utc>> {
        self.workers.iter().map(|worker| worker.finished_at).max()
    }
}

/// 整个 supervisor 运行期间的报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetReport {
    pub generations: Vec<GenerationReport>,
}

impl FleetReport {
    pub fn total_spawns(&self) -> u32 {
        self.generations
            .iter()
            .flat_map(|generation| generation.workers.iter())
            .map(|worker| worker.spawns)
            .sum()
    }

    pub fn all_pids(&self) -> Vec<u32> {
        self.generations
            .iter()
            .flat_map(|generation| generation.workers.iter())
            .flat_map(|worker| worker.pids.iter().copied())
            .collect()
    }
}
