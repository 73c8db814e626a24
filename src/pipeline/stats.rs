//! 运行统计计数器 (各线程共享, 只增不减)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub frames_captured: AtomicU64,
    pub read_failures: AtomicU64,
    pub frames_processed: AtomicU64,
    pub detector_failures: AtomicU64,
    pub samples_emitted: AtomicU64,
    pub samples_rejected: AtomicU64,
    pub estimates: AtomicU64,
    pub valid_estimates: AtomicU64,
}

#[inline]
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// 某一时刻的统计快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub frames_processed: u64,
    pub detector_failures: u64,
    pub samples_emitted: u64,
    pub samples_rejected: u64,
    pub estimates: u64,
    pub valid_estimates: u64,
    pub frames_dropped: u64,
    pub samples_dropped: u64,
    pub display_dropped: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> PipelineStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            frames_captured: get(&self.frames_captured),
            read_failures: get(&self.read_failures),
            frames_processed: get(&self.frames_processed),
            detector_failures: get(&self.detector_failures),
            samples_emitted: get(&self.samples_emitted),
            samples_rejected: get(&self.samples_rejected),
            estimates: get(&self.estimates),
            valid_estimates: get(&self.valid_estimates),
            ..Default::default()
        }
    }
}
