use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::cli::SubCommandExtend;
use crate::config::{GENERATOR_ENDPOINT, Opts};
use crate::transport::{FrameSink, ZmqPublisher};
use crate::utils;

/// 模拟高速相机：循环扫描目录，把图片逐帧发布出去
#[derive(Parser, Debug, Clone)]
pub struct GenerateCommand {
    /// 图片所在目录，每轮循环都会重新扫描以感知文件增删
    pub path: PathBuf,
    /// 发布端点
    #[arg(long, default_value = GENERATOR_ENDPOINT)]
    pub bind: String,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
    /// 帧间隔（毫秒）
    #[arg(long, default_value_t = 50)]
    pub interval: u64,
}

impl SubCommandExtend for GenerateCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        if !self.path.is_dir() {
            bail!("image directory not found: {}", self.path.display());
        }

        let re_suffix = suffix_regex(&self.suffix)?;

        let context = zmq::Context::new();
        let mut publisher = ZmqPublisher::bind(&context, &self.bind)?;

        let mut frame_count = 0u64;
        loop {
            let images = scan_images(&self.path, &re_suffix);
            if images.is_empty() {
                info!("waiting for images to appear in {}", self.path.display());
                sleep(Duration::from_secs(1));
                continue;
            }

            for path in &images {
                // 扫描和发送之间文件可能被删除或损坏，跳过即可
                if let Err(e) = self.publish_image(&mut publisher, path, &mut frame_count) {
                    warn!("skipping {}: {e}", path.display());
                }
                sleep(Duration::from_millis(self.interval));
            }

            // 一轮发送结束后稍作停顿再重新扫描
            sleep(Duration::from_millis(500));
        }
    }
}

impl GenerateCommand {
    fn publish_image(
        &self,
        publisher: &mut ZmqPublisher,
        path: &Path,
        frame_count: &mut u64,
    ) -> Result<()> {
        let ext = path.extension().map(|s| s.to_string_lossy()).unwrap_or_default();
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let image = utils::imread(&path.to_string_lossy())?;
        let buffer = utils::imencode(&format!(".{ext}"), &image)?;

        publisher.send_frame(&[filename.as_bytes(), &buffer])?;
        *frame_count += 1;
        info!("sent image: {filename} (frame {frame_count}, {} KB)", buffer.len() / 1024);
        Ok(())
    }
}

/// 把逗号分隔的后缀列表编译成大小写不敏感的匹配器
///
/// 逐个转义后缀，用户传入正则元字符（如 c++）也不会导致构建失败。
fn suffix_regex(suffix: &str) -> Result<Regex> {
    let pattern =
        suffix.split(',').map(regex::escape).collect::<Vec<_>>().join("|");
    Ok(Regex::new(&format!("(?i)^({pattern})$"))?)
}

/// 非递归扫描目录，返回后缀名匹配的文件
fn scan_images(dir: &Path, re_suffix: &Regex) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|s| re_suffix.is_match(&s.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect()
}
