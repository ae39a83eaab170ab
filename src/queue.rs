use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::metrics;

/// 线程安全的无界 FIFO 交接队列
///
/// 生产者和消费者通过它转移任务所有权：push 永不阻塞，pop 阻塞直到有元素。
/// 队列刻意不设上限，慢消费者会导致队列无限增长，深度通过 len() 和
/// prometheus 指标暴露，便于外部监控。
pub struct HandoffQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
}

// 手动实现 Clone，避免对 T 的多余约束
impl<T> Clone for HandoffQueue<T> {
    fn clone(&self) -> Self {
        Self { name: self.name, tx: self.tx.clone(), rx: self.rx.clone() }
    }
}

impl<T> HandoffQueue<T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = unbounded();
        Self { name, tx, rx }
    }

    /// 追加元素到队尾，唤醒一个等待中的消费者
    pub fn push(&self, item: T) {
        // 队列同时持有收发两端，send 不可能失败
        self.tx.send(item).expect("handoff queue disconnected");
        metrics::set_queue_depth(self.name, self.rx.len());
    }

    /// 阻塞等待并取出队头元素，多个消费者之间严格按 FIFO 分发
    pub fn pop(&self) -> T {
        let item = self.rx.recv().expect("handoff queue disconnected");
        metrics::set_queue_depth(self.name, self.rx.len());
        item
    }

    /// 带超时的 pop，供需要定期检查停机标志的循环使用
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                metrics::set_queue_depth(self.name, self.rx.len());
                Some(item)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
