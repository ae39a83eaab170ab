use anyhow::{Result, bail};
use opencv::core::{Mat, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

/// 解码内存中的压缩图片，解码失败（空矩阵）视为错误
pub fn imdecode(bytes: &[u8]) -> Result<Mat> {
    let buffer = Mat::from_slice(bytes)?;
    let image = imgcodecs::imdecode(&buffer, imgcodecs::IMREAD_COLOR)?;
    if image.empty() {
        bail!("failed to decode image buffer ({} bytes)", bytes.len());
    }
    Ok(image)
}

/// BGR 转灰度图，SIFT 等检测器的标准输入
pub fn to_grayscale(image: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color(image, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
    Ok(gray)
}

/// 从磁盘读取彩色图片，读取失败视为错误
pub fn imread(path: &str) -> Result<Mat> {
    let image = imgcodecs::imread(path, imgcodecs::IMREAD_COLOR)?;
    if image.empty() {
        bail!("failed to read image {path}");
    }
    Ok(image)
}

/// 将图片编码为指定格式的压缩缓冲区，ext 形如 ".jpg"
pub fn imencode(ext: &str, image: &Mat) -> Result<Vec<u8>> {
    let mut buffer = Vector::<u8>::new();
    imgcodecs::imencode(ext, image, &mut buffer, &Vector::new())?;
    Ok(buffer.to_vec())
}
