/// 心率估计系统 (Heart-Rate Estimation)
///
/// 独立工作线程, 窗口满后按固定周期估计一次
/// - Conditioning: IQR截断 → 归一化 → 去趋势 → Butterworth 带通 (零相位)
/// - Time domain:  峰值间隔 → bpm + 规律性质量分
/// - Frequency:    Welch 功率谱主峰 → bpm
/// - Combination:  两种估计择一 → 历史中值平滑 → 有效范围判定
/// - Respiration:  长窗口低频带峰值计数 → 呼吸率
pub mod history;
pub mod respiration;
pub mod window;
pub mod worker;

use ndarray::Array1;
use serde::Serialize;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::dsp::stats::{clip_iqr, detrend_linear, linspace, normalize_min_max, std_dev};
use crate::dsp::{dominant_frequency, find_peaks, welch, BandpassFilter, PeakOptions};
use crate::error::{MonitorError, Result};

pub use history::EstimatorHistory;
pub use respiration::{RespirationEstimate, RespirationEstimator};
pub use window::AnalysisWindow;
pub use worker::Analyzer;

/// 滤波失败时质量分上限
const UNFILTERED_QUALITY_CAP: f64 = 15.0;
/// 峰值阈值: 标准差过小时使用固定值
const FLAT_STD: f64 = 1e-5;

/// 一次估计周期的结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeartRateEstimate {
    /// 无效时为 0
    pub bpm: f64,
    pub is_valid: bool,
    /// [0, 1]
    pub confidence: f64,
    /// [0, 100]
    pub quality: f64,
    /// 窗口最后一个采样的时间戳
    pub timestamp: f64,
    pub time_domain_bpm: Option<f64>,
    pub frequency_domain_bpm: Option<f64>,
}

impl HeartRateEstimate {
    pub fn inconclusive(timestamp: f64) -> Self {
        Self {
            bpm: 0.0,
            is_valid: false,
            confidence: 0.0,
            quality: 0.0,
            timestamp,
            time_domain_bpm: None,
            frequency_domain_bpm: None,
        }
    }
}

/// 估计参数 (取自 MonitorConfig)
#[derive(Clone, Debug)]
pub struct EstimatorSettings {
    pub window_size: usize,
    pub min_hr: f64,
    pub max_hr: f64,
    pub history_len: usize,
    pub median_window: usize,
    pub agreement_tolerance: f64,
    pub filter_order: usize,
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    pub interval_min_bpm: f64,
    pub interval_max_bpm: f64,
    pub quality_cv_scale: f64,
    pub welch_segment_secs: f64,
    pub welch_nfft: usize,
}

impl From<&MonitorConfig> for EstimatorSettings {
    fn from(c: &MonitorConfig) -> Self {
        Self {
            window_size: c.window_size,
            min_hr: c.min_hr,
            max_hr: c.max_hr,
            history_len: c.history_len,
            median_window: c.median_window,
            agreement_tolerance: c.agreement_tolerance,
            filter_order: c.filter_order,
            band_low_hz: c.band_low_hz,
            band_high_hz: c.band_high_hz,
            interval_min_bpm: c.interval_min_bpm,
            interval_max_bpm: c.interval_max_bpm,
            quality_cv_scale: c.quality_cv_scale,
            welch_segment_secs: c.welch_segment_secs,
            welch_nfft: c.welch_nfft,
        }
    }
}

/// 预处理后的信号
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionedSignal {
    pub filtered: Array1<f64>,
    /// 由窗口跨度推算的采样率
    pub fs: f64,
    pub t_start: f64,
    pub duration: f64,
    /// false 表示滤波器设计或滤波失败, 使用的是去趋势信号
    pub filter_applied: bool,
}

/// 预处理: IQR截断 → 最小-最大归一化 → 线性去趋势 → 带通
pub fn condition(
    values: &Array1<f64>,
    timestamps: &Array1<f64>,
    settings: &EstimatorSettings,
) -> Result<ConditionedSignal> {
    let n = values.len();
    if n < 2 || timestamps.len() != n {
        return Err(MonitorError::InsufficientData {
            needed: 2,
            available: n,
        });
    }
    let t_start = timestamps[0];
    let duration = timestamps[n - 1] - t_start;
    if !(duration.is_finite() && duration > 0.0) {
        return Err(MonitorError::DegenerateSignal(format!(
            "non-positive time span {}",
            duration
        )));
    }
    let fs = n as f64 / duration;

    let clipped = clip_iqr(values);
    let normalized = normalize_min_max(&clipped)?;
    let detrended = detrend_linear(&normalized);

    let filtered = BandpassFilter::butterworth(
        settings.filter_order,
        settings.band_low_hz,
        settings.band_high_hz,
        fs,
    )
    .and_then(|f| f.filtfilt(&detrended));

    let (filtered, filter_applied) = match filtered {
        Ok(y) => (y, true),
        Err(e) => {
            debug!("⚠️  带通滤波失败, 使用去趋势信号: {}", e);
            (detrended, false)
        }
    };

    Ok(ConditionedSignal {
        filtered,
        fs,
        t_start,
        duration,
        filter_applied,
    })
}

/// 时域分析结果
#[derive(Clone, Debug, PartialEq)]
pub struct TimeDomainResult {
    pub bpm: Option<f64>,
    pub quality: f64,
    pub peak_count: usize,
    pub valid_intervals: usize,
}

/// 峰间隔规律性质量分
///
/// - ≥2 个有效间隔: (1 - cv·scale)·100, 截断到 [0, 100]
/// - 否则多于 2 个峰: 30, 2 个峰: 10
/// - 不超过 1 个峰: 5
pub fn interval_quality(valid_intervals: &[f64], peak_count: usize, cv_scale: f64) -> f64 {
    if peak_count <= 1 {
        return 5.0;
    }
    if valid_intervals.len() >= 2 {
        let n = valid_intervals.len() as f64;
        let mean = valid_intervals.iter().sum::<f64>() / n;
        let var = valid_intervals
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / n;
        let cv = if mean > 0.0 { var.sqrt() / mean } else { f64::INFINITY };
        return ((1.0 - cv * cv_scale) * 100.0).clamp(0.0, 100.0);
    }
    if peak_count > 2 {
        30.0
    } else {
        10.0
    }
}

/// 峰值间隔法
pub fn time_domain(signal: &ConditionedSignal, settings: &EstimatorSettings) -> TimeDomainResult {
    let x = signal.filtered.to_vec();
    let n = x.len();
    let std = std_dev(&signal.filtered);
    let threshold = if std > FLAT_STD { 0.1 * std } else { 0.01 };
    let options = PeakOptions {
        height: Some(threshold),
        distance: Some((signal.fs / 4.0).max(1.0)),
        prominence: Some(threshold),
    };
    let peaks = find_peaks(&x, &options);

    let times = linspace(signal.t_start, signal.t_start + signal.duration, n);
    let min_interval = 60.0 / settings.interval_max_bpm;
    let max_interval = 60.0 / settings.interval_min_bpm;
    let valid: Vec<f64> = peaks
        .windows(2)
        .map(|w| times[w[1]] - times[w[0]])
        .filter(|&iv| iv > min_interval && iv < max_interval)
        .collect();

    let bpm = if valid.is_empty() {
        None
    } else {
        Some(60.0 / (valid.iter().sum::<f64>() / valid.len() as f64))
    };
    TimeDomainResult {
        bpm,
        quality: interval_quality(&valid, peaks.len(), settings.quality_cv_scale),
        peak_count: peaks.len(),
        valid_intervals: valid.len(),
    }
}

/// Welch 频谱法; 信号短于 2 秒时不估计
pub fn frequency_domain(signal: &ConditionedSignal, settings: &EstimatorSettings) -> Option<f64> {
    let n = signal.filtered.len();
    let fs = signal.fs;
    if (n as f64) < 2.0 * fs {
        return None;
    }
    let seg_secs = settings.welch_segment_secs.min(n as f64 / fs);
    let nperseg = ((seg_secs * fs).round() as usize).clamp(1, n);
    let psd = welch(
        &signal.filtered,
        fs,
        nperseg,
        settings.welch_nfft.max(nperseg),
    );
    dominant_frequency(&psd, settings.band_low_hz, settings.band_high_hz).map(|f| f * 60.0)
}

/// 时域/频域一致性得分
pub fn agreement_score(td: Option<f64>, fd: Option<f64>, tolerance: f64) -> f64 {
    match (td, fd) {
        (Some(t), Some(f)) => {
            if (t - f).abs() <= tolerance {
                1.0
            } else {
                0.0
            }
        }
        (Some(_), None) | (None, Some(_)) => 0.5,
        (None, None) => 0.0,
    }
}

/// 两种估计不一致时, 选更接近上一次平滑结果的一个; 无历史时取频域
fn choose_candidate(
    td: Option<f64>,
    fd: Option<f64>,
    last: Option<f64>,
    tolerance: f64,
) -> Option<f64> {
    match (td, fd) {
        (Some(t), Some(f)) if (t - f).abs() > tolerance => match last {
            Some(prev) if (t - prev).abs() < (f - prev).abs() => Some(t),
            _ => Some(f),
        },
        (_, Some(f)) => Some(f),
        (Some(t), None) => Some(t),
        (None, None) => None,
    }
}

/// 心率估计器 (持有平滑历史)
#[derive(Clone, Debug)]
pub struct HeartRateEstimator {
    settings: EstimatorSettings,
    history: EstimatorHistory,
}

impl HeartRateEstimator {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_settings(EstimatorSettings::from(config))
    }

    pub fn with_settings(settings: EstimatorSettings) -> Self {
        let history = EstimatorHistory::new(settings.history_len, settings.median_window);
        Self { settings, history }
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    pub fn history(&self) -> &EstimatorHistory {
        &self.history
    }

    pub fn reset(&mut self) {
        self.history.reset();
    }

    /// 一次估计周期
    pub fn estimate(&mut self, window: &AnalysisWindow) -> HeartRateEstimate {
        let timestamp = window.last_timestamp().unwrap_or(0.0);
        if window.len() < self.settings.window_size {
            return HeartRateEstimate::inconclusive(timestamp);
        }

        let signal = match condition(&window.values(), &window.timestamps(), &self.settings) {
            Ok(s) => s,
            Err(e) => {
                debug!("⏭️  本周期无结论: {}", e);
                return HeartRateEstimate::inconclusive(timestamp);
            }
        };

        let td = time_domain(&signal, &self.settings);
        let fd = frequency_domain(&signal, &self.settings);
        let mut quality = td.quality;
        if !signal.filter_applied {
            quality = quality.min(UNFILTERED_QUALITY_CAP);
        }

        let tolerance = self.settings.agreement_tolerance;
        let Some(candidate) =
            choose_candidate(td.bpm, fd, self.history.last_smoothed(), tolerance)
        else {
            return HeartRateEstimate {
                time_domain_bpm: td.bpm,
                frequency_domain_bpm: fd,
                ..HeartRateEstimate::inconclusive(timestamp)
            };
        };

        let smoothed = self.history.push(candidate);
        let agreement = agreement_score(td.bpm, fd, tolerance);
        let confidence = (0.7 * quality / 100.0 + 0.3 * agreement).clamp(0.0, 1.0);
        let is_valid = smoothed >= self.settings.min_hr && smoothed <= self.settings.max_hr;

        debug!(
            "🔎 时域 {:?} | 频域 {:?} | 候选 {:.1} | 平滑 {:.1} | 峰 {} | 有效间隔 {}",
            td.bpm, fd, candidate, smoothed, td.peak_count, td.valid_intervals
        );

        HeartRateEstimate {
            bpm: if is_valid { smoothed } else { 0.0 },
            is_valid,
            confidence,
            quality,
            timestamp,
            time_domain_bpm: td.bpm,
            frequency_domain_bpm: fd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::SignalSample;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use std::f64::consts::PI;

    const FS: f64 = 30.0;

    fn sine_window(freq: f64, n: usize, noise_std: f64, seed: u64) -> AnalysisWindow {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, noise_std.max(1e-12)).unwrap();
        AnalysisWindow::from_samples(
            n,
            (0..n).map(|i| {
                let t = i as f64 / FS;
                SignalSample {
                    value: (2.0 * PI * freq * t).sin() + noise.sample(&mut rng),
                    timestamp: t,
                }
            }),
        )
    }

    fn noise_window(n: usize, seed: u64) -> AnalysisWindow {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        AnalysisWindow::from_samples(
            n,
            (0..n).map(|i| SignalSample {
                value: noise.sample(&mut rng),
                timestamp: i as f64 / FS,
            }),
        )
    }

    fn estimator(window_size: usize) -> HeartRateEstimator {
        HeartRateEstimator::new(&MonitorConfig {
            window_size,
            ..Default::default()
        })
    }

    #[test]
    fn test_72_bpm_sine() {
        let mut est = estimator(90);
        let r = est.estimate(&sine_window(1.2, 90, 0.05, 1));
        assert!(r.is_valid);
        assert!((r.bpm - 72.0).abs() <= 5.0, "got {}", r.bpm);
        assert!(r.confidence > 0.5);
        assert!(r.quality > 50.0);
    }

    #[test]
    fn test_flat_window_is_inconclusive() {
        let mut est = estimator(90);
        let window = AnalysisWindow::from_samples(
            90,
            (0..90).map(|i| SignalSample {
                value: 0.5,
                timestamp: i as f64 / FS,
            }),
        );
        let r = est.estimate(&window);
        assert!(!r.is_valid);
        assert_eq!(r.bpm, 0.0);
        assert_eq!(r.quality, 0.0);
        assert_eq!(r.confidence, 0.0);
        assert!(est.history().is_empty());
    }

    #[test]
    fn test_partial_window_is_inconclusive() {
        let mut est = estimator(90);
        let r = est.estimate(&sine_window(1.2, 60, 0.05, 2));
        assert!(!r.is_valid);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_out_of_range_rate_reported_invalid() {
        // 72 bpm 超出 [40, 60]
        let mut est = HeartRateEstimator::new(&MonitorConfig {
            max_hr: 60.0,
            ..Default::default()
        });
        let r = est.estimate(&sine_window(1.2, 90, 0.05, 3));
        assert!(!r.is_valid);
        assert_eq!(r.bpm, 0.0);
        assert!(r.confidence > 0.0);

        // 210 bpm 超出默认上限 180
        let mut est = estimator(90);
        let r = est.estimate(&sine_window(3.5, 90, 0.05, 4));
        assert!(!r.is_valid);
        assert_eq!(r.bpm, 0.0);
    }

    #[test]
    fn test_conditioning_is_deterministic() {
        let window = sine_window(1.3, 90, 0.2, 5);
        let settings = EstimatorSettings::from(&MonitorConfig::default());
        let a = condition(&window.values(), &window.timestamps(), &settings).unwrap();
        let b = condition(&window.values(), &window.timestamps(), &settings).unwrap();
        assert_eq!(a, b);
        assert!(a.filter_applied);

        let mut e1 = estimator(90);
        let mut e2 = estimator(90);
        assert_eq!(e1.estimate(&window), e2.estimate(&window));
    }

    #[test]
    fn test_quality_monotonic_in_valid_intervals() {
        // 零变异系数时, 有效间隔越多质量不降低
        let scale = 3.0;
        let q0 = interval_quality(&[], 1, scale);
        // 0.75 可精确表示, 均值与方差无舍入误差
        let q1 = interval_quality(&[0.75], 2, scale);
        let q2 = interval_quality(&[0.75, 0.75], 3, scale);
        let q3 = interval_quality(&[0.75, 0.75, 0.75], 4, scale);
        assert!(q0 <= q1 && q1 <= q2 && q2 <= q3);
        assert_eq!(q3, 100.0);
        assert_eq!(interval_quality(&[], 3, scale), 30.0);
    }

    #[test]
    fn test_white_noise_quality_low() {
        let average = |window_size: usize, runs: u64| {
            let total: f64 = (0..runs)
                .map(|seed| {
                    let mut est = estimator(window_size);
                    est.estimate(&noise_window(window_size, 100 + seed)).quality
                })
                .sum();
            total / runs as f64
        };
        // 长窗口: 峰间隔明显不规律
        let long = average(600, 10);
        assert!(long < 25.0, "average quality {}", long);
        // 默认3秒窗口只有两三个峰间隔, 噪声偶尔也会显得规律
        let short = average(90, 40);
        assert!(short < 45.0, "average quality {}", short);
        assert!(short > long);
    }

    #[test]
    fn test_agreement_and_choice() {
        assert_eq!(agreement_score(Some(70.0), Some(80.0), 15.0), 1.0);
        assert_eq!(agreement_score(Some(70.0), Some(100.0), 15.0), 0.0);
        assert_eq!(agreement_score(None, Some(100.0), 15.0), 0.5);
        assert_eq!(agreement_score(None, None, 15.0), 0.0);

        // 不一致且无历史 → 频域
        assert_eq!(choose_candidate(Some(70.0), Some(120.0), None, 15.0), Some(120.0));
        // 不一致, 时域更接近历史
        assert_eq!(
            choose_candidate(Some(70.0), Some(120.0), Some(72.0), 15.0),
            Some(70.0)
        );
        // 一致 → 频域
        assert_eq!(choose_candidate(Some(70.0), Some(75.0), Some(72.0), 15.0), Some(75.0));
        assert_eq!(choose_candidate(Some(70.0), None, None, 15.0), Some(70.0));
        assert_eq!(choose_candidate(None, None, Some(70.0), 15.0), None);
    }

    #[test]
    fn test_timestamps_define_sample_rate() {
        let window = sine_window(1.2, 90, 0.0, 6);
        let settings = EstimatorSettings::from(&MonitorConfig::default());
        let s = condition(&window.values(), &window.timestamps(), &settings).unwrap();
        assert!((s.fs - 90.0 / (89.0 / 30.0)).abs() < 1e-9);
    }
}
