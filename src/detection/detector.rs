use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::types::Detection;

/// 人脸检测器接口
///
/// 输入为处理分辨率下的RGB图像, 返回至多一个人脸 (相对坐标)。
/// 实现可以持有模型状态, 因此接收 `&mut self`; 只会在提取线程中调用。
pub trait FaceDetector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, image: &RgbImage) -> Result<Option<Detection>>;
}

/// 检测结果及失败原因
#[derive(Debug, PartialEq)]
pub enum DetectOutcome {
    Found(Detection),
    NotFound,
    /// 返回错误、panic 或输出非法, 按无检测处理
    Failed(String),
}

impl DetectOutcome {
    pub fn detection(&self) -> Option<Detection> {
        match self {
            DetectOutcome::Found(d) => Some(*d),
            _ => None,
        }
    }
}

/// 调用检测器并隔离其失败 (错误 / panic / 非法坐标)
pub fn detect_guarded(detector: &mut dyn FaceDetector, image: &RgbImage) -> DetectOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| detector.detect(image)));
    match result {
        Ok(Ok(Some(raw))) => match raw.sanitize() {
            Some(d) => DetectOutcome::Found(d),
            None => DetectOutcome::Failed(format!("invalid detection {:?}", raw)),
        },
        Ok(Ok(None)) => DetectOutcome::NotFound,
        Ok(Err(e)) => DetectOutcome::Failed(e.to_string()),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("⚠️  检测器 {} panic: {}", detector.name(), msg);
            DetectOutcome::Failed(format!("panic: {}", msg))
        }
    }
}

/// 在独立线程中运行检测器, 单帧等待不超过 `timeout`
///
/// 请求/结果通道深度均为 1。超时后该次检测仍在后台进行,
/// 结果返回前的帧直接跳过 (Failed("detector busy")), 迟到的结果被丢弃。
/// 检测器永久卡死时线程随之泄漏, 提取线程不受影响。
pub struct TimedDetector {
    name: String,
    requests: Sender<Arc<RgbImage>>,
    results: Receiver<DetectOutcome>,
    timeout: Duration,
    in_flight: bool,
}

impl TimedDetector {
    pub fn spawn(mut detector: Box<dyn FaceDetector>, timeout: Duration) -> std::io::Result<Self> {
        let name = detector.name().to_string();
        let (requests, request_rx) = bounded::<Arc<RgbImage>>(1);
        let (result_tx, results) = bounded::<DetectOutcome>(1);

        thread::Builder::new()
            .name("rppg-detector".into())
            .spawn(move || {
                while let Ok(image) = request_rx.recv() {
                    let outcome = detect_guarded(detector.as_mut(), &image);
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!("🛑 检测线程退出 ({})", detector.name());
            })?;

        info!("🔍 检测线程启动 ({}), 超时 {:?}", name, timeout);
        Ok(Self {
            name,
            requests,
            results,
            timeout,
            in_flight: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 上一次超时的检测是否仍未返回
    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    pub fn detect(&mut self, image: Arc<RgbImage>) -> DetectOutcome {
        if self.in_flight {
            match self.results.try_recv() {
                // 迟到的结果属于旧帧
                Ok(_) => self.in_flight = false,
                Err(TryRecvError::Empty) => {
                    return DetectOutcome::Failed("detector busy".to_string())
                }
                Err(TryRecvError::Disconnected) => return self.exited(),
            }
        }

        if self.requests.try_send(image).is_err() {
            return self.exited();
        }
        match self.results.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.in_flight = true;
                warn!("⏱️  检测器 {} 超时 ({:?}), 跳过后续帧直至返回", self.name, self.timeout);
                DetectOutcome::Failed("timeout".to_string())
            }
            Err(RecvTimeoutError::Disconnected) => self.exited(),
        }
    }

    fn exited(&self) -> DetectOutcome {
        DetectOutcome::Failed("detector thread exited".to_string())
    }
}

/// 固定区域检测器 (人脸位置已知, 如固定机位或合成视频)
pub struct FixedRegionDetector {
    region: Detection,
}

impl FixedRegionDetector {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            region: Detection::new(x, y, width, height, 1.0),
        }
    }

    /// 从 `[x, y, w, h]` 构造
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match values {
            [x, y, w, h] => Some(Self::new(*x, *y, *w, *h)),
            _ => None,
        }
    }
}

impl FaceDetector for FixedRegionDetector {
    fn name(&self) -> &str {
        "fixed-region"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Option<Detection>> {
        Ok(Some(self.region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;
    impl FaceDetector for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn detect(&mut self, _image: &RgbImage) -> Result<Option<Detection>> {
            anyhow::bail!("model not loaded")
        }
    }

    struct Panicking;
    impl FaceDetector for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn detect(&mut self, _image: &RgbImage) -> Result<Option<Detection>> {
            panic!("boom")
        }
    }

    struct Garbage;
    impl FaceDetector for Garbage {
        fn name(&self) -> &str {
            "garbage"
        }
        fn detect(&mut self, _image: &RgbImage) -> Result<Option<Detection>> {
            Ok(Some(Detection::new(0.1, 0.1, f32::NAN, 0.3, 0.9)))
        }
    }

    #[test]
    fn test_fixed_region() {
        let mut det = FixedRegionDetector::from_slice(&[0.3, 0.2, 0.4, 0.5]).unwrap();
        let img = RgbImage::new(32, 32);
        let outcome = detect_guarded(&mut det, &img);
        assert_eq!(
            outcome.detection(),
            Some(Detection::new(0.3, 0.2, 0.4, 0.5, 1.0))
        );
        assert!(FixedRegionDetector::from_slice(&[0.1, 0.2]).is_none());
    }

    #[test]
    fn test_error_treated_as_no_detection() {
        let img = RgbImage::new(8, 8);
        let outcome = detect_guarded(&mut Failing, &img);
        assert!(matches!(outcome, DetectOutcome::Failed(_)));
        assert_eq!(outcome.detection(), None);
    }

    #[test]
    fn test_panic_is_contained() {
        let img = RgbImage::new(8, 8);
        let outcome = detect_guarded(&mut Panicking, &img);
        assert_eq!(outcome, DetectOutcome::Failed("panic: boom".to_string()));
    }

    /// 首次立即返回, 之后每次耗时 `delay`
    struct SlowAfterFirst {
        calls: usize,
        delay: Duration,
    }
    impl FaceDetector for SlowAfterFirst {
        fn name(&self) -> &str {
            "slow"
        }
        fn detect(&mut self, _image: &RgbImage) -> Result<Option<Detection>> {
            self.calls += 1;
            if self.calls > 1 {
                thread::sleep(self.delay);
            }
            Ok(Some(Detection::new(0.3, 0.2, 0.4, 0.5, 1.0)))
        }
    }

    #[test]
    fn test_timed_detector_passes_results_through() {
        let det = FixedRegionDetector::new(0.3, 0.2, 0.4, 0.5);
        let mut timed = TimedDetector::spawn(Box::new(det), Duration::from_secs(1)).unwrap();
        assert_eq!(timed.name(), "fixed-region");
        let img = Arc::new(RgbImage::new(8, 8));
        for _ in 0..3 {
            let outcome = timed.detect(Arc::clone(&img));
            assert_eq!(outcome.detection(), Some(Detection::new(0.3, 0.2, 0.4, 0.5, 1.0)));
        }
        let mut timed = TimedDetector::spawn(Box::new(Panicking), Duration::from_secs(1)).unwrap();
        assert_eq!(
            timed.detect(Arc::clone(&img)),
            DetectOutcome::Failed("panic: boom".to_string())
        );
    }

    #[test]
    fn test_timed_detector_times_out_and_skips_while_busy() {
        let slow = SlowAfterFirst {
            calls: 0,
            delay: Duration::from_millis(300),
        };
        let mut timed = TimedDetector::spawn(Box::new(slow), Duration::from_millis(50)).unwrap();
        let img = Arc::new(RgbImage::new(8, 8));

        assert!(timed.detect(Arc::clone(&img)).detection().is_some());

        let started = std::time::Instant::now();
        assert_eq!(timed.detect(Arc::clone(&img)), DetectOutcome::Failed("timeout".to_string()));
        assert!(timed.is_busy());
        assert_eq!(
            timed.detect(Arc::clone(&img)),
            DetectOutcome::Failed("detector busy".to_string())
        );
        assert!(started.elapsed() < Duration::from_millis(250));

        // 后台检测返回后恢复, 迟到的结果不会被当作当前帧的结果
        thread::sleep(Duration::from_millis(400));
        let outcome = timed.detect(Arc::clone(&img));
        assert_eq!(outcome, DetectOutcome::Failed("timeout".to_string()));
    }

    #[test]
    fn test_invalid_output_rejected() {
        let img = RgbImage::new(8, 8);
        assert!(detect_guarded(&mut Garbage, &img).detection().is_none());
    }
}
