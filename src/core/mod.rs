//! 核心数据模块
//!
//! 包含 worker 数据模型与进程树快照

pub mod models;
pub mod process_tree;
