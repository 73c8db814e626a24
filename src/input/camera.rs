//! 摄像头输入模块 - 基于 FFmpeg 的本地摄像头
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)
//! 解码线程只保留最新一帧, 读帧端带超时, 释放 (或经 ReleaseHandle 强制释放) 时通过标志位让解码回调返回错误以结束解码。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::source::{CaptureDevice, ReleaseHandle};
use super::Frame;
use crate::queue::DropOldestQueue;

/// 等待 FFmpeg 完成设备协商的最长时间
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// 摄像头采集设备
pub struct FfmpegCamera {
    index: usize,
    width: u32,
    height: u32,
    read_timeout: Duration,
    frames: Option<DropOldestQueue<Frame>>,
    /// 本次打开的解码线程停止标志
    released: Arc<AtomicBool>,
    /// 跨线程强制释放 (之后不可再打开)
    handle: ReleaseHandle,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegCamera {
    pub fn new(index: usize, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            read_timeout: Duration::from_millis(500),
            frames: None,
            released: Arc::new(AtomicBool::new(true)),
            handle: ReleaseHandle::new(),
            worker: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// 格式化摄像头URL - 根据平台选择
    fn format_camera_url(index: usize, name: &str) -> String {
        #[cfg(target_os = "windows")]
        {
            let _ = index;
            format!("video={}", name)
        }
        #[cfg(target_os = "macos")]
        {
            let _ = name;
            format!("{}", index)
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let _ = name;
            format!("/dev/video{}", index)
        }
    }

    fn input_format() -> &'static str {
        #[cfg(target_os = "windows")]
        {
            "dshow"
        }
        #[cfg(target_os = "macos")]
        {
            "avfoundation"
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            "v4l2"
        }
    }
}

impl CaptureDevice for FfmpegCamera {
    fn name(&self) -> String {
        format!("camera:{}", self.index)
    }

    fn open(&mut self) -> Result<()> {
        if self.handle.is_released() {
            bail!("camera {} released", self.index);
        }
        let devices = get_camera_devices();
        let device_name = devices
            .iter()
            .find(|(i, _)| *i == self.index)
            .map(|(_, name)| name.clone())
            .ok_or_else(|| anyhow!("camera index {} not found ({} devices)", self.index, devices.len()))?;

        let url = Self::format_camera_url(self.index, &device_name);
        let video_size = format!("{}x{}", self.width, self.height);
        info!("📷 打开摄像头 {} ({}) {}", device_name, url, video_size);

        let frames = DropOldestQueue::new(1);
        let released = Arc::new(AtomicBool::new(false));
        let filter = RgbFrameFilter::new(frames.clone(), Arc::clone(&released), self.handle.clone());
        let (ready_tx, ready_rx) = bounded(1);

        let worker = std::thread::Builder::new()
            .name("rppg-ffmpeg".into())
            .spawn(move || decode_camera(&url, &video_size, filter, ready_tx))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.frames = Some(frames);
                self.released = released;
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => bail!("{}", e),
            Err(_) => {
                released.store(true, Ordering::Release);
                bail!("camera did not start within {:?}", OPEN_TIMEOUT)
            }
        }
    }

    fn read(&mut self) -> Result<Frame> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| anyhow!("camera not opened"))?;
        if self.handle.is_released() {
            bail!("camera released");
        }
        if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
            bail!("decoder stopped");
        }
        frames
            .pop_timeout(self.read_timeout)
            .ok_or_else(|| anyhow!("no frame within {:?}", self.read_timeout))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::Release);
        self.frames = None;
        // 解码线程在下一帧回调时退出, 不在此处等待
        self.worker.take();
    }

    fn release_handle(&self) -> Option<ReleaseHandle> {
        Some(self.handle.clone())
    }
}

/// 解码线程: 构建 FFmpeg 上下文, 通过 `ready` 报告启动结果后等待解码结束
fn decode_camera(
    url: &str,
    video_size: &str,
    filter: RgbFrameFilter,
    ready: Sender<std::result::Result<(), String>>,
) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("rgb", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let input = Input::new(url)
        .set_format(FfmpegCamera::input_format())
        .set_input_opts([("framerate", "30"), ("video_size", video_size)].into());

    let ctx = match FfmpegContext::builder()
        .input(input)
        .filter_descs(["format=yuv420p"].into())
        .output(out)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(format!("build failed: {}", e)));
            return;
        }
    };

    let sch = match ctx.start() {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(format!("start failed: {}", e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    info!("✅ 摄像头连接成功,开始解码!");

    let _ = sch.wait();
    info!("📹 摄像头解码循环结束");
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}

/// 解码回调: YUV420P → RGB 帧
#[derive(Clone)]
struct RgbFrameFilter {
    frames: DropOldestQueue<Frame>,
    released: Arc<AtomicBool>,
    device: ReleaseHandle,
    epoch: Instant,
    index: u64,
    dropped: u64,
}

impl RgbFrameFilter {
    fn new(frames: DropOldestQueue<Frame>, released: Arc<AtomicBool>, device: ReleaseHandle) -> Self {
        Self {
            frames,
            released,
            device,
            epoch: Instant::now(),
            index: 0,
            dropped: 0,
        }
    }
}

impl FrameFilter for RgbFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> std::result::Result<(), String> {
        debug!("✅ 摄像头解码回调初始化");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: ez_ffmpeg::Frame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<ez_ffmpeg::Frame>, String> {
        if self.released.load(Ordering::Acquire) || self.device.is_released() {
            info!("🛑 摄像头已释放, 停止解码");
            return Err("camera released".to_string());
        }
        let timestamp = self.epoch.elapsed().as_secs_f64();

        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped += 1;
                return Ok(None);
            }

            let raw = &*frame.as_ptr();
            let w = raw.width as u32;
            let h = raw.height as u32;
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                self.dropped += 1;
                return Ok(None);
            }

            let y_plane = raw.data[0];
            let u_plane = raw.data[1];
            let v_plane = raw.data[2];
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.dropped += 1;
                return Ok(None);
            }
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                self.dropped += 1;
                return Ok(None);
            }

            let mut rgb = vec![0u8; (w * h * 3) as usize];
            yuv420p_to_rgb(
                y_plane,
                u_plane,
                v_plane,
                y_stride,
                uv_stride,
                &mut rgb,
                w as usize,
                h as usize,
            );

            match RgbImage::from_raw(w, h, rgb) {
                Some(image) => {
                    self.frames.push(Frame::new(image, timestamp, self.index));
                    self.index += 1;
                }
                None => {
                    error!("❌ RGB缓冲区尺寸不匹配 {}x{}", w, h);
                    self.dropped += 1;
                }
            }
        }

        Ok(Some(frame))
    }
}

/// 标量 YUV420P → RGB (BT.601 整数近似)
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
}
