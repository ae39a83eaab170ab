use anyhow::Result;
use opencv::core::{KeyPoint, Mat, Ptr, Vector};
use opencv::features2d::SIFT;
use opencv::prelude::*;

use crate::keypoint::Keypoint;

/// 特征点检测能力
///
/// 输入灰度图，输出检测到的特征点序列。检测器实例由单个 worker 独占，
/// 因此允许 &mut self。
pub trait FeatureDetector {
    fn detect(&mut self, gray: &Mat) -> Result<Vec<Keypoint>>;
}

/// 基于 OpenCV SIFT 的检测器，每个 worker 启动时创建一次并复用
pub struct SiftDetector {
    sift: Ptr<SIFT>,
}

impl SiftDetector {
    pub fn new() -> Result<Self> {
        Ok(Self { sift: SIFT::create_def()? })
    }
}

impl FeatureDetector for SiftDetector {
    fn detect(&mut self, gray: &Mat) -> Result<Vec<Keypoint>> {
        let mut keypoints = Vector::<KeyPoint>::new();
        self.sift.detect(gray, &mut keypoints, &Mat::default())?;
        Ok(keypoints.iter().map(to_keypoint).collect())
    }
}

fn to_keypoint(kp: KeyPoint) -> Keypoint {
    Keypoint {
        x: kp.pt().x,
        y: kp.pt().y,
        size: kp.size(),
        angle: kp.angle(),
        response: kp.response(),
        octave: kp.octave(),
        class_id: kp.class_id(),
    }
}
