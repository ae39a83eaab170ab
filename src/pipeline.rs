use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};

use crate::detect::FeatureDetector;
use crate::keypoint;
use crate::metrics;
use crate::queue::HandoffQueue;
use crate::transport::{FrameSink, FrameSource};
use crate::utils;

/// 各循环在阻塞点上的轮询间隔，每次超时后检查停机标志
pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 从上游接收到的一帧待处理图片
///
/// 由接收线程创建，被且仅被一个 worker 消费，交接后不保留引用。
pub struct ImageTask {
    pub filename: String,
    /// 压缩图片字节，原样透传到下游
    pub payload: Vec<u8>,
}

/// worker 处理完成的结果
pub struct ProcessedTask {
    pub filename: String,
    pub payload: Vec<u8>,
    /// keypoint::encode 的输出
    pub features: Vec<u8>,
}

/// 协作式停机标志
///
/// 原始系统的循环只能靠 kill 退出；这里在每个阻塞点轮询该标志，
/// 测试和 record 命令（Ctrl-C）用它干净地停掉循环。
#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 流水线计数器，丢弃信息除日志外的显式观测通道
#[derive(Default)]
pub struct PipelineStats {
    received: AtomicU64,
    framing_dropped: AtomicU64,
    task_dropped: AtomicU64,
    processed: AtomicU64,
    sent: AtomicU64,
}

impl PipelineStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn framing_dropped(&self) -> u64 {
        self.framing_dropped.load(Ordering::Relaxed)
    }

    pub fn task_dropped(&self) -> u64 {
        self.task_dropped.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_framing_dropped(&self) {
        self.framing_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::inc_dropped("receiver", "framing");
    }

    fn inc_task_dropped(&self) {
        self.task_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::inc_dropped("worker", "task");
    }

    fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        metrics::inc_processed();
    }

    fn inc_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// 接收循环：把上游的两段式消息转换为 ImageTask
///
/// 分段数量不是 2 的消息记一条警告后整体丢弃（recv_frame 已经读完
/// 该消息的全部分段，消息边界不会错位），接收循环继续等待下一条。
/// 传输层错误向上返回，接收线程随之退出。
pub fn receive_loop(
    source: &mut impl FrameSource,
    ingress: &HandoffQueue<ImageTask>,
    stats: &PipelineStats,
    shutdown: &Shutdown,
) -> Result<()> {
    while !shutdown.is_triggered() {
        let Some(parts) = source.recv_frame()? else {
            continue;
        };

        let parts: [Vec<u8>; 2] = match parts.try_into() {
            Ok(parts) => parts,
            Err(parts) => {
                warn!("expected 2 message parts, got {}, dropping frame", parts.len());
                stats.inc_framing_dropped();
                continue;
            }
        };
        let [name, payload] = parts;

        let filename = String::from_utf8_lossy(&name).into_owned();
        if filename.is_empty() {
            warn!("dropping frame with empty filename part");
            stats.inc_framing_dropped();
            continue;
        }

        stats.inc_received();
        ingress.push(ImageTask { filename, payload });
    }
    Ok(())
}

/// worker 循环：解码图片、检测特征点、编码结果
///
/// 单个任务的任何失败都在此处兜住：记日志、计数、丢弃任务，
/// worker 本身和其它任务不受影响。
pub fn worker_loop(
    id: usize,
    detector: &mut impl FeatureDetector,
    ingress: &HandoffQueue<ImageTask>,
    egress: &HandoffQueue<ProcessedTask>,
    stats: &PipelineStats,
    shutdown: &Shutdown,
) {
    while !shutdown.is_triggered() {
        let Some(task) = ingress.pop_timeout(QUEUE_POLL_INTERVAL) else {
            continue;
        };
        let ImageTask { filename, payload } = task;

        match extract_features(detector, &payload) {
            Ok((features, count)) => {
                debug!("[worker {id}] processed {filename} ({count} keypoints)");
                stats.inc_processed();
                egress.push(ProcessedTask { filename, payload, features });
            }
            Err(e) => {
                warn!("[worker {id}] dropping {filename}: {e}");
                stats.inc_task_dropped();
            }
        }
    }
}

fn extract_features(detector: &mut impl FeatureDetector, payload: &[u8]) -> Result<(Vec<u8>, usize)> {
    let image = utils::imdecode(payload)?;
    let gray = utils::to_grayscale(&image)?;
    let keypoints = detector.detect(&gray)?;
    Ok((keypoint::encode(&keypoints), keypoints.len()))
}

/// 发送循环：把结果重新封装为三段式消息发布
///
/// 发送失败向上返回，发送线程随之退出；上游仍会继续入队，
/// egress 队列会无限增长直到进程被杀，这是继承自原始设计的失败模式。
pub fn sender_loop(
    sink: &mut impl FrameSink,
    egress: &HandoffQueue<ProcessedTask>,
    stats: &PipelineStats,
    shutdown: &Shutdown,
) -> Result<()> {
    while !shutdown.is_triggered() {
        let Some(result) = egress.pop_timeout(QUEUE_POLL_INTERVAL) else {
            continue;
        };
        sink.send_frame(&[result.filename.as_bytes(), &result.payload, &result.features])?;
        stats.inc_sent();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::thread;

    use super::*;
    use crate::keypoint::Keypoint;
    use crate::transport::Frame;
    use crate::utils::test_support::encoded_test_image;

    /// 预置若干消息的帧来源，耗尽后触发停机让循环退出
    struct VecSource {
        frames: VecDeque<Vec<Frame>>,
        shutdown: Shutdown,
    }

    impl VecSource {
        fn new(frames: Vec<Vec<Frame>>, shutdown: Shutdown) -> Self {
            Self { frames: frames.into(), shutdown }
        }
    }

    impl FrameSource for VecSource {
        fn recv_frame(&mut self) -> Result<Option<Vec<Frame>>> {
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None => {
                    self.shutdown.trigger();
                    Ok(None)
                }
            }
        }
    }

    #[derive(Default)]
    struct VecSink {
        frames: Vec<Vec<Frame>>,
    }

    impl FrameSink for VecSink {
        fn send_frame(&mut self, parts: &[&[u8]]) -> Result<()> {
            self.frames.push(parts.iter().map(|p| p.to_vec()).collect());
            Ok(())
        }
    }

    /// 固定返回 n 个特征点的检测器
    struct StubDetector(usize);

    impl FeatureDetector for StubDetector {
        fn detect(&mut self, _gray: &opencv::core::Mat) -> Result<Vec<Keypoint>> {
            Ok((0..self.0)
                .map(|i| Keypoint {
                    x: i as f32,
                    y: i as f32 * 2.0,
                    size: 31.0,
                    angle: 90.0,
                    response: 0.5,
                    octave: 1,
                    class_id: -1,
                })
                .collect())
        }
    }

    fn frame(parts: &[&[u8]]) -> Vec<Frame> {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    #[test]
    fn test_receiver_enqueues_well_formed_frame() {
        let shutdown = Shutdown::new();
        let mut source =
            VecSource::new(vec![frame(&[b"a.jpg".as_slice(), b"payload".as_slice()])], shutdown.clone());
        let ingress = HandoffQueue::new("test_rx_ok");
        let stats = PipelineStats::default();

        receive_loop(&mut source, &ingress, &stats, &shutdown).unwrap();

        assert_eq!(stats.received(), 1);
        assert_eq!(ingress.len(), 1);
        let task = ingress.pop();
        assert_eq!(task.filename, "a.jpg");
        assert_eq!(task.payload, b"payload");
    }

    #[test]
    fn test_receiver_survives_bad_framing() {
        let shutdown = Shutdown::new();
        // 1 段、4 段和空文件名的消息都应被丢弃，随后的合法消息正常入队
        let mut source = VecSource::new(
            vec![
                frame(&[b"only-one-part".as_slice()]),
                frame(&[b"a.jpg".as_slice(), b"x".as_slice(), b"y".as_slice(), b"z".as_slice()]),
                frame(&[b"".as_slice(), b"payload".as_slice()]),
                frame(&[b"b.jpg".as_slice(), b"payload".as_slice()]),
            ],
            shutdown.clone(),
        );
        let ingress = HandoffQueue::new("test_rx_bad");
        let stats = PipelineStats::default();

        receive_loop(&mut source, &ingress, &stats, &shutdown).unwrap();

        assert_eq!(stats.framing_dropped(), 3);
        assert_eq!(stats.received(), 1);
        assert_eq!(ingress.len(), 1);
        assert_eq!(ingress.pop().filename, "b.jpg");
    }

    #[test]
    fn test_worker_produces_encoded_features() {
        let ingress = HandoffQueue::new("test_worker_in");
        let egress = HandoffQueue::new("test_worker_out");
        let stats = Arc::new(PipelineStats::default());
        let shutdown = Shutdown::new();

        let handle = thread::spawn({
            let (ingress, egress) = (ingress.clone(), egress.clone());
            let (stats, shutdown) = (stats.clone(), shutdown.clone());
            move || worker_loop(0, &mut StubDetector(3), &ingress, &egress, &stats, &shutdown)
        });

        let payload = encoded_test_image();
        ingress.push(ImageTask { filename: "a.jpg".to_string(), payload: payload.clone() });

        let result = egress.pop_timeout(Duration::from_secs(5)).expect("no result produced");
        shutdown.trigger();
        handle.join().unwrap();

        assert_eq!(result.filename, "a.jpg");
        assert_eq!(result.payload, payload);
        assert_eq!(result.features.len(), 3 * keypoint::RECORD_SIZE);
        let decoded = keypoint::decode(&result.features).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].y, 2.0);
        assert_eq!(stats.processed(), 1);
    }

    #[test]
    fn test_worker_drops_corrupt_payload_and_continues() {
        let ingress = HandoffQueue::new("test_worker_bad_in");
        let egress = HandoffQueue::new("test_worker_bad_out");
        let stats = Arc::new(PipelineStats::default());
        let shutdown = Shutdown::new();

        let handle = thread::spawn({
            let (ingress, egress) = (ingress.clone(), egress.clone());
            let (stats, shutdown) = (stats.clone(), shutdown.clone());
            move || worker_loop(0, &mut StubDetector(1), &ingress, &egress, &stats, &shutdown)
        });

        ingress.push(ImageTask {
            filename: "broken.jpg".to_string(),
            payload: b"not an image".to_vec(),
        });
        ingress.push(ImageTask {
            filename: "good.jpg".to_string(),
            payload: encoded_test_image(),
        });

        // 损坏的任务被丢弃，后续任务仍被同一个 worker 正常处理
        let result = egress.pop_timeout(Duration::from_secs(5)).expect("no result produced");
        shutdown.trigger();
        handle.join().unwrap();

        assert_eq!(result.filename, "good.jpg");
        assert_eq!(stats.task_dropped(), 1);
        assert_eq!(stats.processed(), 1);
        assert!(egress.is_empty());
    }

    #[test]
    fn test_sender_emits_three_part_frames() {
        let egress = HandoffQueue::new("test_sender");
        let stats = Arc::new(PipelineStats::default());
        let shutdown = Shutdown::new();

        egress.push(ProcessedTask {
            filename: "a.jpg".to_string(),
            payload: vec![1, 2, 3],
            features: vec![0; keypoint::RECORD_SIZE],
        });

        let handle = thread::spawn({
            let egress = egress.clone();
            let (stats, shutdown) = (stats.clone(), shutdown.clone());
            move || {
                let mut sink = VecSink::default();
                sender_loop(&mut sink, &egress, &stats, &shutdown).unwrap();
                sink
            }
        });

        for _ in 0..50 {
            if stats.sent() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(stats.sent(), 1);
        shutdown.trigger();
        let sink = handle.join().unwrap();

        assert_eq!(sink.frames.len(), 1);
        assert_eq!(sink.frames[0].len(), 3);
        assert_eq!(sink.frames[0][0], b"a.jpg");
        assert_eq!(sink.frames[0][1], vec![1, 2, 3]);
        assert_eq!(sink.frames[0][2].len(), keypoint::RECORD_SIZE);
    }

    #[test]
    fn test_end_to_end_receiver_worker_sender() {
        let payload = encoded_test_image();
        // 接收循环和 worker/sender 使用独立的停机标志：来源耗尽只应停掉
        // 接收循环，worker 和 sender 要等队列消费完毕后再停
        let rx_shutdown = Shutdown::new();
        let shutdown = Shutdown::new();
        let mut source =
            VecSource::new(vec![frame(&[b"a.jpg".as_slice(), payload.as_slice()])], rx_shutdown.clone());
        let ingress = HandoffQueue::new("test_e2e_in");
        let egress = HandoffQueue::new("test_e2e_out");
        let stats = Arc::new(PipelineStats::default());

        let worker = thread::spawn({
            let (ingress, egress) = (ingress.clone(), egress.clone());
            let (stats, shutdown) = (stats.clone(), shutdown.clone());
            move || worker_loop(0, &mut StubDetector(3), &ingress, &egress, &stats, &shutdown)
        });
        let sender = thread::spawn({
            let egress = egress.clone();
            let (stats, shutdown) = (stats.clone(), shutdown.clone());
            move || {
                let mut sink = VecSink::default();
                sender_loop(&mut sink, &egress, &stats, &shutdown).unwrap();
                sink
            }
        });

        receive_loop(&mut source, &ingress, &stats, &rx_shutdown).unwrap();
        for _ in 0..250 {
            if stats.sent() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        shutdown.trigger();
        worker.join().unwrap();
        let sink = sender.join().unwrap();

        assert_eq!(stats.received(), 1);
        assert_eq!(stats.processed(), 1);
        assert_eq!(stats.sent(), 1);
        assert_eq!(sink.frames.len(), 1);
        let [name, image, features] = &sink.frames[0][..] else {
            panic!("expected 3 parts");
        };
        assert_eq!(name, b"a.jpg");
        assert_eq!(image, &payload);
        assert_eq!(keypoint::decode(features).unwrap().len(), 3);
    }
}
