use anyhow::{Context, Result};
use log::info;

/// 多部分消息中的一个分段
pub type Frame = Vec<u8>;

/// 接收超时（毫秒），循环借此定期检查停机标志
pub const RECV_POLL_MS: i32 = 100;

/// 一条逻辑消息的来源
///
/// `recv_frame` 返回该消息的全部分段（读到 rcvmore 为假为止），
/// 超时返回 `Ok(None)`，传输层错误对调用者来说是致命的。
pub trait FrameSource {
    fn recv_frame(&mut self) -> Result<Option<Vec<Frame>>>;
}

/// 多部分消息的出口，最后一个分段标记消息结束
pub trait FrameSink {
    fn send_frame(&mut self, parts: &[&[u8]]) -> Result<()>;
}

/// 订阅上游 PUB 套接字的 ZMQ SUB 端
pub struct ZmqSubscriber {
    socket: zmq::Socket,
}

impl ZmqSubscriber {
    /// 连接到指定端点并订阅全部消息
    pub fn connect(context: &zmq::Context, endpoint: &str) -> Result<Self> {
        let socket = context.socket(zmq::SUB)?;
        socket.set_subscribe(b"")?;
        socket.set_rcvtimeo(RECV_POLL_MS)?;
        socket
            .connect(endpoint)
            .with_context(|| format!("failed to connect subscriber to {endpoint}"))?;
        info!("subscribed to {endpoint}");
        Ok(Self { socket })
    }
}

impl FrameSource for ZmqSubscriber {
    fn recv_frame(&mut self) -> Result<Option<Vec<Frame>>> {
        let first = match self.socket.recv_bytes(0) {
            Ok(bytes) => bytes,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e).context("failed to receive message"),
        };

        // 多部分消息整体投递，后续分段紧随其后
        let mut parts = vec![first];
        while self.socket.get_rcvmore()? {
            parts.push(self.socket.recv_bytes(0).context("failed to receive message part")?);
        }
        Ok(Some(parts))
    }
}

/// 绑定下游端点的 ZMQ PUB 端
pub struct ZmqPublisher {
    socket: zmq::Socket,
}

impl ZmqPublisher {
    pub fn bind(context: &zmq::Context, endpoint: &str) -> Result<Self> {
        let socket = context.socket(zmq::PUB)?;
        socket.set_linger(0)?;
        socket.bind(endpoint).with_context(|| format!("failed to bind publisher to {endpoint}"))?;
        info!("publishing on {endpoint}");
        Ok(Self { socket })
    }
}

impl FrameSink for ZmqPublisher {
    fn send_frame(&mut self, parts: &[&[u8]]) -> Result<()> {
        let Some((last, rest)) = parts.split_last() else {
            return Ok(());
        };
        for part in rest {
            self.socket.send(*part, zmq::SNDMORE).context("failed to send message part")?;
        }
        self.socket.send(*last, 0).context("failed to send message part")?;
        Ok(())
    }
}
