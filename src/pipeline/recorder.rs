//! 心率记录 - 开启期间保存每个有效估计

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::estimator::HeartRateEstimate;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordedSample {
    /// 信号时间 (秒, 与采集时间戳同一时间轴)
    pub timestamp: f64,
    pub recorded_at: DateTime<Utc>,
    pub bpm: f64,
    pub confidence: f64,
}

#[derive(Debug, Default)]
pub struct Recorder {
    active: AtomicBool,
    samples: Mutex<Vec<RecordedSample>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始记录时清空上一段序列
    pub fn set_active(&self, active: bool) {
        if active {
            if let Ok(mut samples) = self.samples.lock() {
                samples.clear();
            }
        }
        self.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 仅记录有效估计, 返回是否记录
    pub fn record(&self, estimate: &HeartRateEstimate) -> bool {
        if !self.is_active() || !estimate.is_valid {
            return false;
        }
        let Ok(mut samples) = self.samples.lock() else {
            return false;
        };
        samples.push(RecordedSample {
            timestamp: estimate.timestamp,
            recorded_at: Utc::now(),
            bpm: estimate.bpm,
            confidence: estimate.confidence,
        });
        true
    }

    pub fn samples(&self) -> Vec<RecordedSample> {
        self.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
