/// 视频输入系统 (Video Input System)
///
/// 独立工作线程, 负责从采集设备拉取帧
/// - CaptureDevice: 采集设备接口 (打开 / 读帧 / 释放, 可选跨线程强制释放句柄)
/// - FrameSource:   采集循环 (打开重试、读帧失败退避、满队列丢弃最旧帧)
/// - SyntheticCamera: 合成视频源 (带已知脉搏频率, 用于测试与演示)
/// - FfmpegCamera:  本地摄像头 (DirectShow/AVFoundation/V4L2, 需 `camera` 特性)
#[cfg(feature = "camera")]
pub mod camera;
pub mod source;
pub mod synthetic;

use std::sync::Arc;

use image::RgbImage;

#[cfg(feature = "camera")]
pub use camera::{get_camera_devices, FfmpegCamera};
pub use source::{CaptureDevice, FrameSource, ReleaseHandle, SourceSettings};
pub use synthetic::{SyntheticCamera, SyntheticConfig};

/// 采集帧 (采集线程 → 提取线程)
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: Arc<RgbImage>, // Arc共享, 避免复制
    pub timestamp: f64,       // 单调递增的采集时间 (秒)
    pub index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: f64, index: u64) -> Self {
        Self {
            image: Arc::new(image),
            timestamp,
            index,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
