use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{EXTRACTOR_CONNECT, Opts};
use crate::db;
use crate::keypoint;
use crate::pipeline::Shutdown;
use crate::transport::{Frame, FrameSource, ZmqSubscriber};

/// 流水线的末端：订阅特征流，把结果落盘到 SQLite
#[derive(Parser, Debug, Clone)]
pub struct RecordCommand {
    /// 上游特征流端点
    #[arg(long, default_value = EXTRACTOR_CONNECT)]
    pub subscribe: String,
    /// SQLite 数据库路径
    #[arg(short, long, default_value = "processed_data.db")]
    pub database: PathBuf,
}

impl SubCommandExtend for RecordCommand {
    #[tokio::main]
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let pool = db::init_db(&self.database).await?;

        let context = zmq::Context::new();
        let mut source = ZmqSubscriber::connect(&context, &self.subscribe)?;

        let shutdown = Shutdown::new();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutting down");
                    shutdown.trigger();
                }
            }
        });

        while !shutdown.is_triggered() {
            let Some(parts) = block_in_place(|| source.recv_frame())? else {
                continue;
            };
            record_frame(&pool, parts).await;
        }

        Ok(())
    }
}

/// 校验分段并写库
///
/// 单条消息的任何失败（分段数量错误、写库失败）都在此处兜住，
/// 记录循环继续处理下一条消息。
async fn record_frame(pool: &db::Database, parts: Vec<Frame>) {
    let parts: [Frame; 3] = match parts.try_into() {
        Ok(parts) => parts,
        Err(parts) => {
            warn!("expected 3 message parts, got {}, dropping frame", parts.len());
            return;
        }
    };
    let [name, image, keypoints] = parts;
    let filename = String::from_utf8_lossy(&name).into_owned();

    // 长度非法的特征缓冲区按 0 个特征点统计，但记录照常落盘
    let count = keypoint::decode(&keypoints).map(|kps| kps.len()).unwrap_or(0);

    if let Err(e) = db::insert_result(pool, &filename, &image, &keypoints).await {
        warn!("failed to insert {filename}: {e}");
        return;
    }
    info!("logged image: {filename} ({} KB, {count} keypoints)", image.len() / 1024);
}
