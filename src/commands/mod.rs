//! 命令行接口

pub mod parser;

pub use parser::Cli;
