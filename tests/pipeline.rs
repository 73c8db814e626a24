//! 端到端流水线测试 (合成视频源)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Receiver;
use image::RgbImage;

use rppg_rs::detection::{Detection, FaceDetector, FixedRegionDetector, SkinRegionDetector};
use rppg_rs::input::{CaptureDevice, Frame, ReleaseHandle, SyntheticCamera, SyntheticConfig};
use rppg_rs::{MonitorConfig, Pipeline, PipelineEvent, PipelineState};

fn test_config() -> MonitorConfig {
    MonitorConfig {
        capture_width: 320,
        capture_height: 240,
        queue_timeout: 0.05,
        join_timeout: 1.0,
        device_open_backoff: 0.05,
        ..Default::default()
    }
}

fn camera(config: SyntheticConfig) -> Box<SyntheticCamera> {
    Box::new(SyntheticCamera::new(SyntheticConfig {
        width: 320,
        height: 240,
        ..config
    }))
}

fn face_detector() -> Box<FixedRegionDetector> {
    let [x, y, w, h] = SyntheticConfig::default().face;
    Box::new(FixedRegionDetector::new(x, y, w, h))
}

/// 等待满足条件的事件
fn wait_for(
    events: &Receiver<PipelineEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&PipelineEvent) -> bool,
) -> Option<PipelineEvent> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(event) = events.recv_timeout(Duration::from_millis(50)) {
            if pred(&event) {
                return Some(event);
            }
        }
    }
    None
}

#[test]
fn test_synthetic_pulse_reaches_valid_heart_rate() {
    let mut pipeline = Pipeline::new(test_config()).unwrap();
    let events = pipeline.subscribe();
    pipeline.set_recording(true);
    pipeline
        .start(camera(SyntheticConfig::default()), face_detector())
        .unwrap();

    let event = wait_for(&events, Duration::from_secs(12), |e| {
        matches!(e, PipelineEvent::HeartRateUpdated { is_valid: true, .. })
    });
    let report = pipeline.stop();
    assert!(report.is_clean());

    match event {
        Some(PipelineEvent::HeartRateUpdated { bpm, confidence, .. }) => {
            assert!((bpm - 72.0).abs() <= 5.0, "bpm {}", bpm);
            assert!(confidence > 0.0);
        }
        other => panic!("no valid heart rate: {:?}", other),
    }

    let samples = pipeline.recorded_samples();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| (40.0..=180.0).contains(&s.bpm)));

    let stats = pipeline.stats();
    assert!(stats.frames_captured >= 90);
    assert!(stats.samples_emitted >= 90);
    assert!(stats.valid_estimates >= 1);
}

#[test]
fn test_face_presence_events_follow_absence() {
    let mut pipeline = Pipeline::new(test_config()).unwrap();
    let events = pipeline.subscribe();
    pipeline
        .start(
            camera(SyntheticConfig {
                absences: vec![(1.0, 3.0)],
                ..Default::default()
            }),
            Box::new(SkinRegionDetector::default()),
        )
        .unwrap();

    let mut transitions = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(8);
    while transitions.len() < 3 && Instant::now() < deadline {
        if let Ok(PipelineEvent::FacePresenceChanged { present }) =
            events.recv_timeout(Duration::from_millis(50))
        {
            transitions.push(present);
        }
    }
    pipeline.stop();
    assert_eq!(transitions, vec![true, false, true]);
}

#[test]
fn test_unavailable_device_reported_once() {
    let config = MonitorConfig {
        device_open_retries: 2,
        ..test_config()
    };
    let mut pipeline = Pipeline::new(config).unwrap();
    let events = pipeline.subscribe();
    pipeline
        .start(
            camera(SyntheticConfig {
                open_failures: u32::MAX,
                ..Default::default()
            }),
            face_detector(),
        )
        .unwrap();

    let event = wait_for(&events, Duration::from_secs(3), |e| {
        matches!(e, PipelineEvent::DeviceUnavailable { .. })
    });
    assert!(event.is_some());
    // 仍处于运行状态, 不再重复报告
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert!(wait_for(&events, Duration::from_millis(300), |e| {
        matches!(e, PipelineEvent::DeviceUnavailable { .. })
    })
    .is_none());

    assert!(pipeline.stop().is_clean());
    assert_eq!(pipeline.stats().frames_captured, 0);
}

#[test]
fn test_read_failures_do_not_stop_capture() {
    let mut pipeline = Pipeline::new(test_config()).unwrap();
    pipeline
        .start(
            camera(SyntheticConfig {
                fail_every: 5,
                ..Default::default()
            }),
            face_detector(),
        )
        .unwrap();
    std::thread::sleep(Duration::from_millis(800));
    pipeline.stop();
    let stats = pipeline.stats();
    assert!(stats.read_failures > 0);
    assert!(stats.frames_captured > stats.read_failures);
}

/// 模拟卡死的检测器
struct HungDetector;

impl FaceDetector for HungDetector {
    fn name(&self) -> &str {
        "hung"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Option<Detection>> {
        std::thread::sleep(Duration::from_secs(30));
        Ok(None)
    }
}

#[test]
fn test_hung_detector_does_not_block_extractor() {
    let config = MonitorConfig {
        detect_timeout: 0.1,
        ..test_config()
    };
    let mut pipeline = Pipeline::new(config).unwrap();
    let events = pipeline.subscribe();
    pipeline
        .start(camera(SyntheticConfig::default()), Box::new(HungDetector))
        .unwrap();
    std::thread::sleep(Duration::from_millis(600));

    let started = Instant::now();
    let report = pipeline.stop();
    assert!(started.elapsed() < Duration::from_millis(1500), "stop took {:?}", started.elapsed());
    assert!(report.is_clean(), "{:?}", report);

    // 检测卡住期间仍持续消费帧, 且从未报告人脸
    let stats = pipeline.stats();
    assert!(stats.frames_processed > 5, "{:?}", stats);
    assert!(stats.detector_failures >= stats.frames_processed - 1);
    assert!(events
        .try_iter()
        .all(|e| !matches!(e, PipelineEvent::FacePresenceChanged { present: true })));
}

/// 模拟卡在驱动调用中的设备: `read` 直到被强制释放才返回
struct HungDevice {
    handle: ReleaseHandle,
    dropped: Arc<AtomicBool>,
}

impl CaptureDevice for HungDevice {
    fn name(&self) -> String {
        "hung".into()
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !self.handle.is_released() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        anyhow::bail!("device released")
    }

    fn release(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }

    fn release_handle(&self) -> Option<ReleaseHandle> {
        Some(self.handle.clone())
    }
}

#[test]
fn test_stop_releases_device_when_capture_hangs() {
    let config = MonitorConfig {
        join_timeout: 0.5,
        ..test_config()
    };
    let handle = ReleaseHandle::new();
    let dropped = Arc::new(AtomicBool::new(false));
    let device = HungDevice {
        handle: handle.clone(),
        dropped: Arc::clone(&dropped),
    };

    let mut pipeline = Pipeline::new(config).unwrap();
    pipeline.start(Box::new(device), face_detector()).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert!(!handle.is_released());

    let started = Instant::now();
    let report = pipeline.stop();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(1500), "stop took {:?}", elapsed);
    assert_eq!(report.abandoned, vec!["capture".to_string()]);
    assert!(report.joined.contains(&"extractor".to_string()));
    assert!(report.joined.contains(&"analyzer".to_string()));
    assert!(handle.is_released());
    assert_eq!(pipeline.state(), PipelineState::Idle);

    // 被放弃的采集线程随后退出并释放设备
    let deadline = Instant::now() + Duration::from_secs(2);
    while !dropped.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(dropped.load(Ordering::SeqCst));
    // 重复停止无副作用
    assert!(pipeline.stop().is_clean());
}
