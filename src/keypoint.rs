use std::error::Error;
use std::fmt;

/// 单个特征点序列化后的大小：5 个 f32 + 2 个 i32
pub const RECORD_SIZE: usize = 5 * 4 + 2 * 4;

/// 一个检测到的图像特征点
///
/// 字段布局与 OpenCV 的 KeyPoint 一致，序列化时按声明顺序逐字段写入，
/// 统一使用小端字节序，没有任何头部或数量前缀。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// 特征点 x 坐标（像素）
    pub x: f32,
    /// 特征点 y 坐标（像素）
    pub y: f32,
    /// 特征点直径
    pub size: f32,
    /// 主方向（角度制）
    pub angle: f32,
    /// 检测器响应强度
    pub response: f32,
    /// 金字塔层级（包含 layer 信息）
    pub octave: i32,
    /// 分类标签，未设置时为 -1
    pub class_id: i32,
}

/// 反序列化时缓冲区长度不是 RECORD_SIZE 整数倍
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedRecordBuffer {
    pub len: usize,
}

impl fmt::Display for MalformedRecordBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keypoint buffer length {} is not a multiple of {}",
            self.len, RECORD_SIZE
        )
    }
}

impl Error for MalformedRecordBuffer {}

/// 将特征点序列编码为二进制缓冲区，空输入返回空缓冲区
pub fn encode(keypoints: &[Keypoint]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(keypoints.len() * RECORD_SIZE);
    for kp in keypoints {
        buffer.extend_from_slice(&kp.x.to_le_bytes());
        buffer.extend_from_slice(&kp.y.to_le_bytes());
        buffer.extend_from_slice(&kp.size.to_le_bytes());
        buffer.extend_from_slice(&kp.angle.to_le_bytes());
        buffer.extend_from_slice(&kp.response.to_le_bytes());
        buffer.extend_from_slice(&kp.octave.to_le_bytes());
        buffer.extend_from_slice(&kp.class_id.to_le_bytes());
    }
    buffer
}

/// 从二进制缓冲区还原特征点序列
///
/// 浮点数按位还原，不做任何规范化，NaN 和 ±Inf 原样保留。
pub fn decode(data: &[u8]) -> Result<Vec<Keypoint>, MalformedRecordBuffer> {
    if data.len() % RECORD_SIZE != 0 {
        return Err(MalformedRecordBuffer { len: data.len() });
    }

    let mut keypoints = Vec::with_capacity(data.len() / RECORD_SIZE);
    for record in data.chunks_exact(RECORD_SIZE) {
        let f32_at = |off: usize| f32::from_le_bytes(record[off..off + 4].try_into().unwrap());
        let i32_at = |off: usize| i32::from_le_bytes(record[off..off + 4].try_into().unwrap());
        keypoints.push(Keypoint {
            x: f32_at(0),
            y: f32_at(4),
            size: f32_at(8),
            angle: f32_at(12),
            response: f32_at(16),
            octave: i32_at(20),
            class_id: i32_at(24),
        });
    }
    Ok(keypoints)
}
