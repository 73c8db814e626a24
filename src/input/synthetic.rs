//! 合成视频源 - 固定位置的"人脸"色块, 绿色通道按已知频率脉动
//!
//! 可配置人脸缺席时段、周期性读帧失败与打开失败, 用于端到端测试

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::source::{CaptureDevice, ReleaseHandle};
use super::Frame;

const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);
const SKIN_RED: u8 = 200;
const SKIN_BLUE: u8 = 120;
const SKIN_GREEN_BASE: f64 = 150.0;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub pulse_hz: f64,
    /// 绿色通道脉动幅度 (灰度级)
    pub pulse_amplitude: f64,
    /// 每帧高斯噪声标准差 (灰度级)
    pub noise_std: f64,
    /// 人脸区域 [x, y, w, h] (相对坐标)
    pub face: [f32; 4],
    /// 人脸缺席时段 [开始, 结束) (秒)
    pub absences: Vec<(f64, f64)>,
    /// 每第 N 次读帧失败, 0 表示不失败
    pub fail_every: u64,
    /// 前 N 次打开失败
    pub open_failures: u32,
    /// 按帧率实时节拍输出
    pub realtime: bool,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            pulse_hz: 1.2,
            pulse_amplitude: 4.0,
            noise_std: 0.5,
            face: [0.35, 0.2, 0.3, 0.45],
            absences: Vec::new(),
            fail_every: 0,
            open_failures: 0,
            realtime: true,
            seed: 7,
        }
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    rng: StdRng,
    noise: Option<Normal<f64>>,
    opened: bool,
    handle: ReleaseHandle,
    open_attempts: u32,
    reads: u64,
    index: u64,
    started: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let noise = if config.noise_std > 0.0 {
            Normal::new(0.0, config.noise_std).ok()
        } else {
            None
        };
        Self {
            config,
            rng,
            noise,
            opened: false,
            handle: ReleaseHandle::new(),
            open_attempts: 0,
            reads: 0,
            index: 0,
            started: None,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn face_visible(&self, t: f64) -> bool {
        !self
            .config
            .absences
            .iter()
            .any(|&(start, end)| t >= start && t < end)
    }

    fn render(&mut self, t: f64) -> RgbImage {
        let (w, h) = (self.config.width, self.config.height);
        let mut img = RgbImage::from_pixel(w, h, BACKGROUND);
        if !self.face_visible(t) {
            return img;
        }

        let noise = self
            .noise
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(0.0);
        let green = SKIN_GREEN_BASE
            + self.config.pulse_amplitude * (2.0 * PI * self.config.pulse_hz * t).sin()
            + noise;
        let color = Rgb([SKIN_RED, green.round().clamp(0.0, 255.0) as u8, SKIN_BLUE]);

        let [fx, fy, fw, fh] = self.config.face;
        let rx = (fx * w as f32) as i32;
        let ry = (fy * h as f32) as i32;
        let rw = ((fw * w as f32) as u32).max(1);
        let rh = ((fh * h as f32) as u32).max(1);
        draw_filled_rect_mut(&mut img, Rect::at(rx, ry).of_size(rw, rh), color);
        img
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> String {
        format!("synthetic:{:.2}Hz", self.config.pulse_hz)
    }

    fn open(&mut self) -> Result<()> {
        if self.handle.is_released() {
            bail!("synthetic device released");
        }
        self.open_attempts += 1;
        if self.open_attempts <= self.config.open_failures {
            bail!("synthetic device busy");
        }
        self.opened = true;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.opened || self.handle.is_released() {
            bail!("device not opened");
        }
        self.reads += 1;
        if self.config.fail_every > 0 && self.reads % self.config.fail_every == 0 {
            bail!("simulated read failure");
        }

        let t = self.index as f64 / self.config.fps;
        if self.config.realtime {
            if let Some(start) = self.started {
                let due = start + Duration::from_secs_f64(t);
                let now = Instant::now();
                if due > now {
                    std::thread::sleep(due - now);
                }
            }
        }

        let image = self.render(t);
        let frame = Frame::new(image, t, self.index);
        self.index += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        self.opened = false;
    }

    fn release_handle(&self) -> Option<ReleaseHandle> {
        Some(self.handle.clone())
    }
}
