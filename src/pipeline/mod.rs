/// 心率监测流水线 (Monitoring Pipeline)
///
/// 三线程架构, 通过有界队列 (满时丢弃最旧) 通信:
/// - Capture:   采集线程, 设备 → 帧队列
/// - Extractor: 提取线程, 帧队列 → 信号队列 + 显示队列
/// - Analyzer:  分析线程, 信号队列 → 事件
///
/// 状态: Idle → Running → Stopping → Idle
pub mod recorder;
pub mod stats;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::config::MonitorConfig;
use crate::detection::FaceDetector;
use crate::error::{MonitorError, Result};
use crate::estimator::Analyzer;
use crate::events::{EventBus, PipelineEvent};
use crate::extractor::{DisplayFrame, FaceRoiExtractor, SignalSample};
use crate::input::{CaptureDevice, Frame, FrameSource, ReleaseHandle, SourceSettings};
use crate::queue::DropOldestQueue;

pub use recorder::{RecordedSample, Recorder};
pub use stats::{PipelineCounters, PipelineStats};

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
}

/// 停止结果: 已退出的线程与超时后放弃等待的线程
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StopReport {
    pub joined: Vec<String>,
    pub abandoned: Vec<String>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
struct Queues {
    frames: DropOldestQueue<Frame>,
    signals: DropOldestQueue<SignalSample>,
    display: DropOldestQueue<DisplayFrame>,
}

impl Queues {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            frames: DropOldestQueue::new(config.frame_queue_capacity),
            signals: DropOldestQueue::new(config.signal_queue_capacity),
            display: DropOldestQueue::new(config.display_queue_capacity),
        }
    }

    fn drain(&self) -> usize {
        self.frames.drain() + self.signals.drain() + self.display.drain()
    }
}

fn spawn_worker(name: &'static str, body: impl FnOnce() + Send + 'static) -> Result<Worker> {
    let handle = thread::Builder::new()
        .name(format!("rppg-{}", name))
        .spawn(body)?;
    Ok(Worker { name, handle })
}

/// 流水线协调器
pub struct Pipeline {
    config: MonitorConfig,
    state: PipelineState,
    events: EventBus,
    recorder: Arc<Recorder>,
    counters: Arc<PipelineCounters>,
    cancel: CancelToken,
    queues: Option<Queues>,
    workers: Vec<Worker>,
    /// 采集线程放弃等待时用于强制释放设备
    device_release: Option<ReleaseHandle>,
}

impl Pipeline {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: PipelineState::Idle,
            events: EventBus::new(),
            recorder: Arc::new(Recorder::new()),
            counters: Arc::new(PipelineCounters::default()),
            cancel: CancelToken::new(),
            queues: None,
            workers: Vec::new(),
            device_release: None,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    /// 订阅之后发布的事件
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 显示队列句柄 (渲染端消费); 启动前为 None
    pub fn display_frames(&self) -> Option<DropOldestQueue<DisplayFrame>> {
        self.queues.as_ref().map(|q| q.display.clone())
    }

    /// 取出显示队列中最新的一帧, 丢弃更旧的
    pub fn latest_display_frame(&self) -> Option<DisplayFrame> {
        let queue = &self.queues.as_ref()?.display;
        std::iter::from_fn(|| queue.try_pop()).last()
    }

    pub fn set_recording(&self, on: bool) {
        self.recorder.set_active(on);
        info!("{}", if on { "⏺️  开始记录心率" } else { "⏹️  停止记录心率" });
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    pub fn recorded_samples(&self) -> Vec<RecordedSample> {
        self.recorder.samples()
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.counters.snapshot();
        if let Some(q) = &self.queues {
            stats.frames_dropped = q.frames.dropped();
            stats.samples_dropped = q.signals.dropped();
            stats.display_dropped = q.display.dropped();
        }
        stats
    }

    /// 启动三个工作线程; 非 Idle 状态返回 AlreadyRunning
    pub fn start(
        &mut self,
        device: Box<dyn CaptureDevice>,
        detector: Box<dyn FaceDetector>,
    ) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(MonitorError::AlreadyRunning);
        }

        info!("\n🚀 ============ 启动心率监测流水线 ============");
        self.config.log_summary();

        let cancel = CancelToken::new();
        let counters = Arc::new(PipelineCounters::default());
        let queues = Queues::new(&self.config);
        let timeout = self.config.queue_timeout();

        self.cancel = cancel.clone();
        self.counters = Arc::clone(&counters);
        self.queues = Some(queues.clone());

        let source = FrameSource::new(device, SourceSettings::from(&self.config));
        self.device_release = source.release_handle();
        let extractor = FaceRoiExtractor::new(detector, &self.config)?;
        let analyzer = Analyzer::new(&self.config, Arc::clone(&self.recorder));

        // 下游先启动
        let spawned = (|| -> Result<Vec<Worker>> {
            let mut workers = Vec::with_capacity(3);
            {
                let (signals, events, cancel, counters) = (
                    queues.signals.clone(),
                    self.events.clone(),
                    cancel.clone(),
                    Arc::clone(&counters),
                );
                workers.push(spawn_worker("analyzer", move || {
                    analyzer.run(signals, events, cancel, counters, timeout)
                })?);
            }
            {
                let q = queues.clone();
                let (events, cancel, counters) =
                    (self.events.clone(), cancel.clone(), Arc::clone(&counters));
                workers.push(spawn_worker("extractor", move || {
                    extractor.run(q.frames, q.signals, q.display, events, cancel, counters, timeout)
                })?);
            }
            {
                let (frames, events, cancel, counters) = (
                    queues.frames.clone(),
                    self.events.clone(),
                    cancel.clone(),
                    Arc::clone(&counters),
                );
                workers.push(spawn_worker("capture", move || {
                    source.run(frames, events, cancel, counters)
                })?);
            }
            Ok(workers)
        })();

        match spawned {
            Ok(workers) => {
                self.workers = workers;
                self.state = PipelineState::Running;
                info!("✅ 流水线已启动");
                Ok(())
            }
            Err(e) => {
                error!("❌ 启动工作线程失败: {}", e);
                cancel.cancel();
                queues.drain();
                self.device_release = None;
                self.state = PipelineState::Idle;
                Err(e)
            }
        }
    }

    /// 停止并等待线程退出 (总等待不超过 join_timeout); 可重复调用
    pub fn stop(&mut self) -> StopReport {
        if self.state == PipelineState::Idle {
            return StopReport::default();
        }
        self.state = PipelineState::Stopping;
        info!("⏹️  停止流水线...");

        self.cancel.cancel();
        if let Some(q) = &self.queues {
            q.drain();
        }

        let deadline = Instant::now() + self.config.join_timeout();
        let mut report = StopReport::default();
        for worker in self.workers.drain(..) {
            loop {
                if worker.handle.is_finished() {
                    if worker.handle.join().is_err() {
                        warn!("⚠️  线程 {} 异常退出 (panic)", worker.name);
                    }
                    report.joined.push(worker.name.to_string());
                    break;
                }
                if Instant::now() >= deadline {
                    warn!("⚠️  线程 {} 未在超时内退出, 放弃等待", worker.name);
                    report.abandoned.push(worker.name.to_string());
                    break;
                }
                // 持续清空, 避免线程卡在满队列上
                if let Some(q) = &self.queues {
                    q.drain();
                }
                thread::sleep(JOIN_POLL);
            }
        }
        if let Some(q) = &self.queues {
            q.drain();
        }

        let release = self.device_release.take();
        if report.abandoned.iter().any(|name| name == "capture") {
            match release {
                Some(handle) => {
                    handle.release();
                    warn!("🔌 采集线程未退出, 已强制释放设备");
                }
                None => warn!("⚠️  采集线程未退出, 设备不支持强制释放"),
            }
        }

        self.state = PipelineState::Idle;
        info!(
            "🛑 流水线已停止 (退出 {} | 放弃 {})",
            report.joined.len(),
            report.abandoned.len()
        );
        report
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state != PipelineState::Idle {
            self.stop();
        }
    }
}
