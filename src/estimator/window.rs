//! 固定长度分析窗口 (环形缓冲)

use std::collections::VecDeque;

use ndarray::Array1;

use crate::extractor::SignalSample;

#[derive(Clone, Debug)]
pub struct AnalysisWindow {
    samples: VecDeque<SignalSample>,
    capacity: usize,
}

impl AnalysisWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加采样, 满时淘汰最旧; 时间戳不递增或非有限值的采样被拒绝
    pub fn push(&mut self, sample: SignalSample) -> bool {
        if !(sample.value.is_finite() && sample.timestamp.is_finite()) {
            return false;
        }
        if let Some(last) = self.samples.back() {
            if sample.timestamp <= last.timestamp {
                return false;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// 首尾时间跨度 (秒)
    pub fn span(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }

    pub fn values(&self) -> Array1<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn timestamps(&self) -> Array1<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.samples.back().map(|s| s.timestamp)
    }

    pub fn from_samples(capacity: usize, samples: impl IntoIterator<Item = SignalSample>) -> Self {
        let mut window = Self::new(capacity);
        for s in samples {
            window.push(s);
        }
        window
    }
}
