/// 人脸ROI提取 (Face ROI Extraction)
///
/// 独立工作线程: 帧 → 降采样 + 镜像 → 人脸检测 (检测线程, 带超时) → EMA平滑 → 额头ROI → 绿色均值
/// - 信号采样送入分析线程
/// - 标注后的显示帧送入显示队列 (渲染端自行消费)
/// - 人脸出现/消失时发布事件
pub mod overlay;
pub mod roi;

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::MonitorConfig;
use crate::detection::{
    DetectOutcome, FaceDetector, FacePresence, PixelBox, PresenceState, SmoothedBox,
    TimedDetector,
};
use crate::events::{EventBus, PipelineEvent};
use crate::input::Frame;
use crate::pipeline::stats::{bump, PipelineCounters};
use crate::queue::DropOldestQueue;

pub use roi::{green_mean, RoiGeometry, RoiRect};

/// 信号采样 (提取线程 → 分析线程)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignalSample {
    pub value: f64,
    pub timestamp: f64,
}

/// 显示帧 (原始分辨率, 已镜像, 可选标注)
#[derive(Clone, Debug)]
pub struct DisplayFrame {
    pub image: Arc<RgbImage>,
    pub timestamp: f64,
    pub index: u64,
    /// 显示坐标下的人脸框 / ROI
    pub face: Option<PixelBox>,
    pub roi: Option<PixelBox>,
    pub face_present: bool,
}

/// 单帧处理结果
#[derive(Debug)]
pub struct ExtractOutput {
    pub sample: Option<SignalSample>,
    pub display: DisplayFrame,
    pub presence_change: Option<PresenceState>,
    pub detector_failed: bool,
}

pub struct FaceRoiExtractor {
    detector: TimedDetector,
    smoothed: SmoothedBox,
    presence: FacePresence,
    geometry: RoiGeometry,
    process_width: u32,
    mirror: bool,
    draw_overlay: bool,
}

impl FaceRoiExtractor {
    /// 检测器移入独立线程, 单帧等待不超过 `detect_timeout`
    pub fn new(detector: Box<dyn FaceDetector>, config: &MonitorConfig) -> std::io::Result<Self> {
        Ok(Self {
            detector: TimedDetector::spawn(detector, config.detect_timeout())?,
            smoothed: SmoothedBox::new(config.smoothing_alpha),
            presence: FacePresence::new(config.face_lost_threshold),
            geometry: RoiGeometry::from(config),
            process_width: config.process_width,
            mirror: config.mirror,
            draw_overlay: config.draw_overlay,
        })
    }

    pub fn is_face_present(&self) -> bool {
        self.presence.is_present()
    }

    pub fn smoothed_box(&self) -> Option<PixelBox> {
        self.smoothed.current()
    }

    /// 缩放到处理宽度并镜像
    fn prepare(&self, image: &RgbImage) -> RgbImage {
        let (w, h) = image.dimensions();
        let mut out = if w > self.process_width {
            let ph = ((h as f64 * self.process_width as f64 / w as f64).round() as u32).max(1);
            imageops::resize(image, self.process_width, ph, FilterType::Triangle)
        } else {
            image.clone()
        };
        if self.mirror {
            imageops::flip_horizontal_in_place(&mut out);
        }
        out
    }

    pub fn process(&mut self, frame: &Frame) -> ExtractOutput {
        let processed = Arc::new(self.prepare(&frame.image));
        let (pw, ph) = processed.dimensions();

        let outcome = self.detector.detect(Arc::clone(&processed));
        if let DetectOutcome::Failed(reason) = &outcome {
            debug!("⚠️  检测失败 (帧 {}): {}", frame.index, reason);
        }
        let detection = outcome.detection();

        let face = detection.map(|d| self.smoothed.update(d.to_pixels(pw, ph)));
        let presence_change = self.presence.update(detection.is_some(), frame.timestamp);
        if presence_change == Some(PresenceState::NoFace) {
            self.smoothed.reset();
        }

        let rect = face.and_then(|f| RoiRect::clamp(&self.geometry.derive(&f), pw, ph));
        let sample = rect
            .and_then(|r| green_mean(&processed, &r))
            .map(|value| SignalSample {
                value,
                timestamp: frame.timestamp,
            });

        let roi = rect.map(|r| r.to_pixel_box());
        let display = self.render_display(frame, face, roi, pw, ph);

        ExtractOutput {
            sample,
            display,
            presence_change,
            detector_failed: matches!(outcome, DetectOutcome::Failed(_)),
        }
    }

    fn render_display(
        &self,
        frame: &Frame,
        face: Option<PixelBox>,
        roi: Option<PixelBox>,
        pw: u32,
        ph: u32,
    ) -> DisplayFrame {
        let (fw, fh) = (frame.width(), frame.height());
        let sx = fw as f64 / pw.max(1) as f64;
        let sy = fh as f64 / ph.max(1) as f64;
        let face = face.map(|b| b.scale(sx, sy));
        let roi = roi.map(|b| b.scale(sx, sy));

        let annotate = self.draw_overlay && (face.is_some() || roi.is_some());
        let image = if self.mirror || annotate {
            let mut img = (*frame.image).clone();
            if self.mirror {
                imageops::flip_horizontal_in_place(&mut img);
            }
            if annotate {
                overlay::annotate(&mut img, face.as_ref(), roi.as_ref());
            }
            Arc::new(img)
        } else {
            Arc::clone(&frame.image)
        };

        DisplayFrame {
            image,
            timestamp: frame.timestamp,
            index: frame.index,
            face,
            roi,
            face_present: self.presence.is_present(),
        }
    }

    /// 提取线程主循环
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        mut self,
        frames: DropOldestQueue<Frame>,
        signals: DropOldestQueue<SignalSample>,
        display: DropOldestQueue<DisplayFrame>,
        events: EventBus,
        cancel: CancelToken,
        counters: Arc<PipelineCounters>,
        timeout: Duration,
    ) {
        info!("🧑 提取线程启动 (检测器: {})", self.detector.name());
        let mut count = 0u64;
        let mut last_report = Instant::now();

        while !cancel.is_cancelled() {
            let Some(frame) = frames.pop_timeout(timeout) else {
                continue;
            };
            let out = self.process(&frame);
            bump(&counters.frames_processed);
            if out.detector_failed {
                bump(&counters.detector_failures);
            }
            if cancel.is_cancelled() {
                break;
            }

            if let Some(state) = out.presence_change {
                let present = state == PresenceState::FaceHeld;
                info!("{}", if present { "🙂 检测到人脸" } else { "🫥 人脸丢失" });
                events.post(PipelineEvent::FacePresenceChanged { present });
            }
            if let Some(sample) = out.sample {
                signals.push(sample);
                bump(&counters.samples_emitted);
            }
            display.push(out.display);
            count += 1;

            let elapsed = last_report.elapsed().as_secs_f64();
            if elapsed >= 1.0 {
                debug!(
                    "🔬 提取统计: {:.1}fps | 信号队列 {}/{} | 人脸: {}",
                    count as f64 / elapsed,
                    signals.len(),
                    signals.capacity(),
                    self.presence.is_present()
                );
                count = 0;
                last_report = Instant::now();
            }
        }
        info!("🛑 提取线程退出");
    }
}
