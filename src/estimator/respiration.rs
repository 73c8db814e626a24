//! 呼吸率估计
//!
//! 同一路绿色信号的低频成分 (0.1-0.4 Hz) 随呼吸起伏。
//! 使用独立的长窗口, 跨度足够后对低频带峰值计数。

use serde::Serialize;
use tracing::debug;

use super::window::AnalysisWindow;
use crate::config::MonitorConfig;
use crate::dsp::stats::{normalize_min_max, std_dev};
use crate::dsp::{find_peaks, BandpassFilter, PeakOptions};
use crate::extractor::SignalSample;

const RESPIRATION_FILTER_ORDER: usize = 2;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RespirationEstimate {
    /// 次/分
    pub brpm: f64,
    pub is_valid: bool,
}

#[derive(Clone, Debug)]
pub struct RespirationEstimator {
    window: AnalysisWindow,
    min_span: f64,
    low_hz: f64,
    high_hz: f64,
    min_brpm: f64,
    max_brpm: f64,
}

impl RespirationEstimator {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            window: AnalysisWindow::new(config.respiration_window_size),
            min_span: config.respiration_min_span,
            low_hz: config.respiration_low_hz,
            high_hz: config.respiration_high_hz,
            min_brpm: config.respiration_min_brpm,
            max_brpm: config.respiration_max_brpm,
        }
    }

    pub fn push(&mut self, sample: SignalSample) -> bool {
        self.window.push(sample)
    }

    pub fn window(&self) -> &AnalysisWindow {
        &self.window
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// 相邻呼吸峰的最小间距 (采样数): 通带上限对应的一个呼吸周期
    pub fn peak_distance(&self, fs: f64) -> f64 {
        (fs / self.high_hz).max(1.0)
    }

    /// 跨度不足或信号退化时返回 None
    pub fn estimate(&self) -> Option<RespirationEstimate> {
        let span = self.window.span();
        if self.window.len() < 3 || span < self.min_span {
            return None;
        }
        let fs = self.window.len() as f64 / span;

        let normalized = normalize_min_max(&self.window.values()).ok()?;
        let filtered =
            BandpassFilter::butterworth(RESPIRATION_FILTER_ORDER, self.low_hz, self.high_hz, fs)
                .and_then(|f| f.filtfilt(&normalized));
        let filtered = match filtered {
            Ok(y) => y,
            Err(e) => {
                debug!("⚠️  呼吸滤波失败: {}", e);
                return None;
            }
        };

        let std = std_dev(&filtered);
        let options = PeakOptions {
            height: None,
            distance: Some(self.peak_distance(fs)),
            prominence: Some(0.1 * std),
        };
        let peaks = find_peaks(&filtered.to_vec(), &options);
        let brpm = peaks.len() as f64 * 60.0 / span;
        Some(RespirationEstimate {
            brpm,
            is_valid: brpm >= self.min_brpm && brpm <= self.max_brpm,
        })
    }
}
