//! 采集循环 - 打开设备并持续拉帧
//!
//! 设备打开失败按固定间隔重试, 全部失败后发布一次 DeviceUnavailable 并空转到停止;
//! 读帧失败短暂退避后重试, 不退出线程。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::Frame;
use crate::cancel::CancelToken;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::pipeline::stats::{bump, PipelineCounters};
use crate::queue::DropOldestQueue;

/// 采集设备接口
///
/// `read` 不应无限阻塞: 没有新帧时应在有限时间内返回错误, 以便线程响应停止请求。
pub trait CaptureDevice: Send {
    fn name(&self) -> String;

    fn open(&mut self) -> anyhow::Result<()>;

    fn read(&mut self) -> anyhow::Result<Frame>;

    fn release(&mut self);

    /// 可跨线程强制释放设备的句柄; 不支持时返回 None
    fn release_handle(&self) -> Option<ReleaseHandle> {
        None
    }
}

/// 设备强制释放句柄
///
/// 采集线程卡在 `read` 中无法退出时, 由协调者调用 `release`:
/// 设备停止产帧, 之后的 `open` / `read` 均返回错误。
#[derive(Clone, Debug, Default)]
pub struct ReleaseHandle(Arc<AtomicBool>);

impl ReleaseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次释放返回 true
    pub fn release(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub open_retries: u32,
    pub open_backoff: Duration,
    pub read_backoff: Duration,
    pub idle_poll: Duration,
}

impl From<&MonitorConfig> for SourceSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            open_retries: config.device_open_retries.max(1),
            open_backoff: config.device_open_backoff(),
            read_backoff: config.read_retry_backoff(),
            idle_poll: config.queue_timeout(),
        }
    }
}

/// 帧源: 持有设备, 在采集线程中运行
pub struct FrameSource {
    device: Box<dyn CaptureDevice>,
    settings: SourceSettings,
    opened: bool,
}

impl FrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, settings: SourceSettings) -> Self {
        Self {
            device,
            settings,
            opened: false,
        }
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    pub fn release_handle(&self) -> Option<ReleaseHandle> {
        self.device.release_handle()
    }

    /// 打开设备, 失败时按间隔重试
    pub fn open_with_retry(&mut self, cancel: &CancelToken) -> Result<()> {
        let name = self.device.name();
        let retries = self.settings.open_retries;
        let mut last_error = String::new();
        for attempt in 1..=retries {
            match self.device.open() {
                Ok(()) => {
                    self.opened = true;
                    info!("✅ 设备 {} 已打开 (第{}次尝试)", name, attempt);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "⚠️  设备 {} 打开失败: {} ({}/{})",
                        name, last_error, attempt, retries
                    );
                }
            }
            if attempt < retries && cancel.sleep(self.settings.open_backoff) {
                return Err(MonitorError::Device(format!("{}: open cancelled", name)));
            }
        }
        error!("❌ 设备 {} 不可用: {}", name, last_error);
        Err(MonitorError::DeviceUnavailable {
            device: name,
            attempts: retries,
        })
    }

    /// 采集循环, 直到取消
    pub fn run(
        mut self,
        frames: DropOldestQueue<Frame>,
        events: EventBus,
        cancel: CancelToken,
        counters: Arc<PipelineCounters>,
    ) {
        let name = self.device.name();
        info!("🎥 采集线程启动: {}", name);

        if let Err(e) = self.open_with_retry(&cancel) {
            if let MonitorError::DeviceUnavailable { device, .. } = &e {
                events.post(PipelineEvent::DeviceUnavailable {
                    device: device.clone(),
                    reason: e.to_string(),
                });
                // 保持线程存活直到停止, 与正常运行时的生命周期一致
                while !cancel.sleep(self.settings.idle_poll) {}
            }
            info!("🛑 采集线程退出: {}", name);
            return;
        }

        let mut consecutive_failures = 0u64;
        let mut count = 0u64;
        let mut last_report = Instant::now();

        while !cancel.is_cancelled() {
            match self.device.read() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    bump(&counters.frames_captured);
                    if frames.push(frame) > 0 {
                        debug!("🗑️  帧队列已满, 丢弃最旧帧");
                    }
                    count += 1;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    bump(&counters.read_failures);
                    if consecutive_failures == 1 || consecutive_failures % 50 == 0 {
                        warn!(
                            "⚠️  读帧失败 ({}次连续): {}",
                            consecutive_failures, e
                        );
                    }
                    if cancel.sleep(self.settings.read_backoff) {
                        break;
                    }
                }
            }

            let elapsed = last_report.elapsed().as_secs_f64();
            if elapsed >= 1.0 {
                debug!(
                    "📺 采集统计: {:.1}fps | 帧队列 {}/{} | 累计丢弃 {}",
                    count as f64 / elapsed,
                    frames.len(),
                    frames.capacity(),
                    frames.dropped()
                );
                count = 0;
                last_report = Instant::now();
            }
        }

        info!("🛑 采集线程退出: {}", name);
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if self.opened {
            self.device.release();
            self.opened = false;
            info!("📷 设备 {} 已释放", self.device.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct ScriptedDevice {
        open_ok_after: u32,
        attempts: u32,
        released: Arc<AtomicBool>,
        index: u64,
    }

    impl CaptureDevice for ScriptedDevice {
        fn name(&self) -> String {
            "scripted".into()
        }
        fn open(&mut self) -> anyhow::Result<()> {
            self.attempts += 1;
            if self.attempts > self.open_ok_after {
                Ok(())
            } else {
                anyhow::bail!("busy")
            }
        }
        fn read(&mut self) -> anyhow::Result<Frame> {
            self.index += 1;
            std::thread::sleep(Duration::from_millis(2));
            Ok(Frame::new(RgbImage::new(4, 4), self.index as f64 / 30.0, self.index))
        }
        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn settings(retries: u32) -> SourceSettings {
        SourceSettings {
            open_retries: retries,
            open_backoff: Duration::from_millis(5),
            read_backoff: Duration::from_millis(5),
            idle_poll: Duration::from_millis(10),
        }
    }

    fn device(open_ok_after: u32) -> (ScriptedDevice, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        (
            ScriptedDevice {
                open_ok_after,
                attempts: 0,
                released: Arc::clone(&released),
                index: 0,
            },
            released,
        )
    }

    #[test]
    fn test_open_succeeds_after_retries() {
        let (dev, _) = device(2);
        let mut source = FrameSource::new(Box::new(dev), settings(3));
        assert!(source.open_with_retry(&CancelToken::new()).is_ok());
    }

    #[test]
    fn test_open_gives_up() {
        let (dev, _) = device(10);
        let mut source = FrameSource::new(Box::new(dev), settings(3));
        let err = source.open_with_retry(&CancelToken::new()).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::DeviceUnavailable { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_run_fills_queue_and_releases() {
        let (dev, released) = device(0);
        let source = FrameSource::new(Box::new(dev), settings(1));
        let frames = DropOldestQueue::new(3);
        let cancel = CancelToken::new();
        let counters = Arc::new(PipelineCounters::default());
        let handle = {
            let (frames, cancel, counters) = (frames.clone(), cancel.clone(), counters.clone());
            std::thread::spawn(move || source.run(frames, EventBus::new(), cancel, counters))
        };
        std::thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        handle.join().unwrap();

        assert!(frames.len() <= 3);
        assert!(counters.snapshot().frames_captured > 3);
        assert!(frames.dropped() > 0);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_release_handle_is_shared() {
        let handle = ReleaseHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_released());
        assert!(handle.release());
        assert!(clone.is_released());
        // 重复释放无副作用
        assert!(!clone.release());

        let (dev, _) = device(0);
        let source = FrameSource::new(Box::new(dev), settings(1));
        assert!(source.release_handle().is_none());
    }

    #[test]
    fn test_unavailable_device_posts_event_once() {
        let (dev, _) = device(u32::MAX);
        let source = FrameSource::new(Box::new(dev), settings(2));
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let cancel = CancelToken::new();
        let handle = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                source.run(
                    DropOldestQueue::new(2),
                    bus,
                    cancel,
                    Arc::new(PipelineCounters::default()),
                )
            })
        };
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, PipelineEvent::DeviceUnavailable { .. }));
        std::thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
        cancel.cancel();
        handle.join().unwrap();
    }
}
