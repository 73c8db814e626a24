//! 事件总线 (Event Bus)
//!
//! 分析线程/提取线程 → 外部订阅者 (界面、声音、日志)
//! 每个订阅者拥有独立的无界通道, 所有事件广播给全部订阅者。

use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::debug;

/// 对外发布的事件
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum PipelineEvent {
    /// 心率更新 (每个估计周期一次)
    HeartRateUpdated {
        bpm: f64,
        is_valid: bool,
        confidence: f64,
    },
    /// 人脸出现/消失
    FacePresenceChanged { present: bool },
    /// 信号质量 (0-100)
    SignalQualityUpdated { quality: f64 },
    /// 呼吸率更新 (次/分)
    RespirationUpdated { brpm: f64, is_valid: bool },
    /// 采集设备始终无法打开 (只报告一次)
    DeviceUnavailable { device: String, reason: String },
}

/// 线程安全的事件广播器
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅之后发布的所有事件
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// 发布事件, 同时清理已断开的订阅者
    pub fn post(&self, event: PipelineEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        debug!("📣 事件 {:?} → {} 个订阅者", event, subs.len());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }
}
