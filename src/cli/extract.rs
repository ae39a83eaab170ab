use std::sync::Arc;
use std::thread;

use anyhow::Result;
use clap::Parser;
use log::{error, info};

use crate::cli::SubCommandExtend;
use crate::config::{EXTRACTOR_ENDPOINT, GENERATOR_CONNECT, Opts};
use crate::detect::SiftDetector;
use crate::pipeline::{
    ImageTask, PipelineStats, ProcessedTask, Shutdown, receive_loop, sender_loop, worker_loop,
};
use crate::queue::HandoffQueue;
use crate::transport::{ZmqPublisher, ZmqSubscriber};

/// 流水线的核心阶段：接收图片流，N 个 worker 并发提取特征点，重新发布
#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    /// 上游图片流端点
    #[arg(long, default_value = GENERATOR_CONNECT)]
    pub subscribe: String,
    /// 特征流发布端点
    #[arg(long, default_value = EXTRACTOR_ENDPOINT)]
    pub bind: String,
    /// worker 线程数，默认为 CPU 核心数
    #[arg(short, long)]
    pub workers: Option<usize>,
}

impl SubCommandExtend for ExtractCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let context = zmq::Context::new();
        // 连接失败无法继续，直接向上返回
        let mut source = ZmqSubscriber::connect(&context, &self.subscribe)?;

        let ingress = HandoffQueue::<ImageTask>::new("ingress");
        let egress = HandoffQueue::<ProcessedTask>::new("egress");
        let stats = Arc::new(PipelineStats::default());
        let shutdown = Shutdown::new();

        let workers = self.workers.unwrap_or_else(default_workers);
        info!("launching {workers} worker threads");

        let mut handles = Vec::with_capacity(workers + 1);
        for id in 0..workers {
            let (ingress, egress) = (ingress.clone(), egress.clone());
            let (stats, shutdown) = (stats.clone(), shutdown.clone());
            handles.push(thread::spawn(move || {
                // 检测器创建一次，之后处理所有任务时复用
                let mut detector = match SiftDetector::new() {
                    Ok(detector) => detector,
                    Err(e) => {
                        error!("[worker {id}] failed to create detector: {e}");
                        return;
                    }
                };
                worker_loop(id, &mut detector, &ingress, &egress, &stats, &shutdown);
            }));
        }

        // 发送线程持有自己的 PUB 套接字，绑定失败或发送失败仅终止该线程
        handles.push(thread::spawn({
            let egress = egress.clone();
            let (stats, shutdown) = (stats.clone(), shutdown.clone());
            let (context, endpoint) = (context.clone(), self.bind.clone());
            move || {
                let mut sink = match ZmqPublisher::bind(&context, &endpoint) {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("[sender] {e:#}");
                        return;
                    }
                };
                if let Err(e) = sender_loop(&mut sink, &egress, &stats, &shutdown) {
                    error!("[sender] {e:#}");
                }
            }
        }));

        // 接收循环占用当前线程，正常情况下永不返回
        let result = receive_loop(&mut source, &ingress, &stats, &shutdown);
        if let Err(e) = &result {
            error!("[receiver] {e:#}");
        }
        for handle in handles {
            let _ = handle.join();
        }
        result
    }
}

/// 默认 worker 数量：CPU 核心数，探测失败时回退到 2
fn default_workers() -> usize {
    match num_cpus::get() {
        0 => 2,
        n => n,
    }
}
