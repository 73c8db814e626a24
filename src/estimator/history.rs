//! 心率历史与中值平滑

use std::collections::VecDeque;

use crate::dsp::stats::median;

#[derive(Clone, Debug)]
pub struct EstimatorHistory {
    values: VecDeque<f64>,
    max_len: usize,
    median_window: usize,
    last_smoothed: Option<f64>,
}

impl EstimatorHistory {
    pub fn new(max_len: usize, median_window: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            values: VecDeque::with_capacity(max_len),
            max_len,
            median_window: median_window.clamp(1, max_len),
            last_smoothed: None,
        }
    }

    /// 加入候选值, 返回最近 min(median_window, len) 个值的中位数
    pub fn push(&mut self, candidate: f64) -> f64 {
        if self.values.len() == self.max_len {
            self.values.pop_front();
        }
        self.values.push_back(candidate);
        let recent: Vec<f64> = self
            .values
            .iter()
            .rev()
            .take(self.median_window)
            .copied()
            .collect();
        let smoothed = median(&recent).unwrap_or(candidate);
        self.last_smoothed = Some(smoothed);
        smoothed
    }

    pub fn last_smoothed(&self) -> Option<f64> {
        self.last_smoothed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.last_smoothed = None;
    }
}
