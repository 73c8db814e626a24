//! 分析线程: 收集信号采样, 窗口满后按周期估计并发布事件

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::respiration::RespirationEstimator;
use super::window::AnalysisWindow;
use super::{HeartRateEstimate, HeartRateEstimator};
use crate::cancel::CancelToken;
use crate::config::MonitorConfig;
use crate::events::{EventBus, PipelineEvent};
use crate::extractor::SignalSample;
use crate::pipeline::recorder::Recorder;
use crate::pipeline::stats::{bump, PipelineCounters};
use crate::queue::DropOldestQueue;

pub struct Analyzer {
    estimator: HeartRateEstimator,
    respiration: Option<RespirationEstimator>,
    window: AnalysisWindow,
    update_interval: Duration,
    recorder: Arc<Recorder>,
}

impl Analyzer {
    pub fn new(config: &MonitorConfig, recorder: Arc<Recorder>) -> Self {
        Self {
            estimator: HeartRateEstimator::new(config),
            respiration: config
                .respiration_enabled
                .then(|| RespirationEstimator::new(config)),
            window: AnalysisWindow::new(config.window_size),
            update_interval: config.update_interval(),
            recorder,
        }
    }

    /// 收下一个采样; 时间戳不递增的采样被丢弃
    pub fn accept(&mut self, sample: SignalSample) -> bool {
        let accepted = self.window.push(sample);
        if accepted {
            if let Some(resp) = self.respiration.as_mut() {
                resp.push(sample);
            }
        }
        accepted
    }

    pub fn window(&self) -> &AnalysisWindow {
        &self.window
    }

    /// 执行一次估计并发布事件
    pub fn cycle(&mut self, events: &EventBus, counters: &PipelineCounters) -> HeartRateEstimate {
        let estimate = self.estimator.estimate(&self.window);
        bump(&counters.estimates);
        if estimate.is_valid {
            bump(&counters.valid_estimates);
            info!(
                "💓 心率 {:.1} bpm | 置信度 {:.2} | 质量 {:.0}",
                estimate.bpm, estimate.confidence, estimate.quality
            );
        } else {
            debug!("💤 本周期无有效心率 (质量 {:.0})", estimate.quality);
        }

        events.post(PipelineEvent::HeartRateUpdated {
            bpm: estimate.bpm,
            is_valid: estimate.is_valid,
            confidence: estimate.confidence,
        });
        events.post(PipelineEvent::SignalQualityUpdated {
            quality: estimate.quality,
        });
        self.recorder.record(&estimate);

        if let Some(resp) = self.respiration.as_ref().and_then(|r| r.estimate()) {
            debug!("🌬️  呼吸 {:.1} 次/分 (有效: {})", resp.brpm, resp.is_valid);
            events.post(PipelineEvent::RespirationUpdated {
                brpm: resp.brpm,
                is_valid: resp.is_valid,
            });
        }
        estimate
    }

    /// 分析线程主循环
    pub fn run(
        mut self,
        signals: DropOldestQueue<SignalSample>,
        events: EventBus,
        cancel: CancelToken,
        counters: Arc<PipelineCounters>,
        timeout: Duration,
    ) {
        info!(
            "📈 分析线程启动 (窗口 {} 采样, 周期 {:.1}s)",
            self.window.capacity(),
            self.update_interval.as_secs_f64()
        );
        let mut last_cycle: Option<Instant> = None;
        let mut fresh = false;

        while !cancel.is_cancelled() {
            if let Some(sample) = signals.pop_timeout(timeout) {
                if self.accept(sample) {
                    fresh = true;
                } else {
                    bump(&counters.samples_rejected);
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            let due = last_cycle.map_or(true, |t| t.elapsed() >= self.update_interval);
            if fresh && due && self.window.is_full() {
                last_cycle = Some(Instant::now());
                fresh = false;
                self.cycle(&events, &counters);
            }
        }
        info!("🛑 分析线程退出");
    }
}
