use clap::{Parser, Subcommand};

use crate::cli::*;

// 各阶段的固定 IPC 端点，发布端绑定 *，订阅端连接 localhost

/// 生成端发布图片流的端点
pub const GENERATOR_ENDPOINT: &str = "tcp://*:5555";
/// 提取端订阅图片流的端点
pub const GENERATOR_CONNECT: &str = "tcp://localhost:5555";
/// 提取端发布特征流的端点
pub const EXTRACTOR_ENDPOINT: &str = "tcp://*:5556";
/// 记录端订阅特征流的端点
pub const EXTRACTOR_CONNECT: &str = "tcp://localhost:5556";

#[derive(Parser, Debug, Clone)]
#[command(name = "imstream", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 循环扫描目录并发布图片流
    Generate(GenerateCommand),
    /// 订阅图片流，提取特征点后重新发布
    Extract(ExtractCommand),
    /// 订阅特征流并写入 SQLite 数据库
    Record(RecordCommand),
}
