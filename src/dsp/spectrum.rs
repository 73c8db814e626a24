//! Welch 功率谱密度与主频估计

use ndarray::Array1;
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

use super::peaks::{find_peaks, PeakOptions};

/// 频谱主峰搜索时相邻峰最小间隔 (Hz)
const PEAK_SPACING_HZ: f64 = 0.3;

/// 周期 Hann 窗
pub fn hann_window(size: usize) -> Array1<f64> {
    Array1::from_iter((0..size).map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / size as f64).cos()))
}

/// 单边功率谱密度
#[derive(Clone, Debug)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
}

/// Welch 法: Hann窗、50%重叠、逐段去均值、零填充到 `nfft`
pub fn welch(x: &Array1<f64>, fs: f64, nperseg: usize, nfft: usize) -> Psd {
    let n = x.len();
    let nperseg = nperseg.clamp(1, n.max(1));
    let nfft = nfft.max(nperseg);
    let step = (nperseg - nperseg / 2).max(1);
    let window = hann_window(nperseg);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());

    let bins = nfft / 2 + 1;
    let mut power = vec![0.0; bins];
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nfft);

    let samples: Vec<f64> = x.iter().copied().collect();
    let mut segments = 0usize;
    let mut start = 0;
    while start + nperseg <= n {
        let seg = &samples[start..start + nperseg];
        let seg_mean = seg.iter().sum::<f64>() / nperseg as f64;
        let mut buffer: Vec<Complex64> = seg
            .iter()
            .zip(window.iter())
            .map(|(s, w)| Complex64::new((s - seg_mean) * w, 0.0))
            .collect();
        buffer.resize(nfft, Complex64::new(0.0, 0.0));
        fft.process(&mut buffer);
        for (p, c) in power.iter_mut().zip(buffer.iter()) {
            *p += c.norm_sqr() * scale;
        }
        segments += 1;
        start += step;
    }

    if segments > 0 {
        let last = if nfft % 2 == 0 { bins - 1 } else { bins };
        for (k, p) in power.iter_mut().enumerate() {
            *p /= segments as f64;
            // 单边谱: 除直流和奈奎斯特外乘2
            if k > 0 && k < last {
                *p *= 2.0;
            }
        }
    }

    let freqs = (0..bins).map(|k| k as f64 * fs / nfft as f64).collect();
    Psd { freqs, power }
}

/// 在 [low_hz, high_hz] 内寻找最突出的谱峰, 返回抛物线插值后的频率
pub fn dominant_frequency(psd: &Psd, low_hz: f64, high_hz: f64) -> Option<f64> {
    let band: Vec<usize> = psd
        .freqs
        .iter()
        .enumerate()
        .filter(|(_, f)| (low_hz..=high_hz).contains(*f))
        .map(|(i, _)| i)
        .collect();
    let (&first, &last) = (band.first()?, band.last()?);
    let power = &psd.power[first..=last];
    let max = power.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max.is_finite() && max > 0.0) {
        return None;
    }

    let resolution = psd.freqs.get(1).copied().unwrap_or(1.0).max(f64::EPSILON);
    let options = PeakOptions {
        height: Some(0.1 * max),
        distance: Some((PEAK_SPACING_HZ / resolution).max(1.0)),
        prominence: None,
    };
    let peaks = find_peaks(power, &options);
    let best = if peaks.is_empty() {
        // 没有局部峰 (主峰位于频带边缘) 时取最大值
        argmax(power)?
    } else {
        peaks
            .into_iter()
            .max_by(|&a, &b| power[a].total_cmp(&power[b]))?
    };

    let idx = first + best;
    Some(psd.freqs[idx] + parabolic_offset(&psd.power, idx) * resolution)
}

fn argmax(v: &[f64]) -> Option<usize> {
    v.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// 抛物线插值的亚频点偏移, 范围 [-0.5, 0.5]
fn parabolic_offset(power: &[f64], idx: usize) -> f64 {
    if idx == 0 || idx + 1 >= power.len() {
        return 0.0;
    }
    let (alpha, beta, gamma) = (power[idx - 1], power[idx], power[idx + 1]);
    let denom = alpha - 2.0 * beta + gamma;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (0.5 * (alpha - gamma) / denom).clamp(-0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(freq: f64, fs: f64, n: usize) -> Array1<f64> {
        Array1::from_iter((0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()))
    }

    #[test]
    fn test_hann_window_periodic() {
        let w = hann_window(8);
        assert_relative_eq!(w[0], 0.0);
        assert_relative_eq!(w[4], 1.0);
        // 周期窗不对称: 末点不为0
        assert!(w[7] > 0.1);
    }

    #[test]
    fn test_welch_frequency_axis() {
        let psd = welch(&tone(1.0, 30.0, 90), 30.0, 90, 1024);
        assert_eq!(psd.freqs.len(), 513);
        assert_relative_eq!(psd.freqs[512], 15.0);
    }

    #[test]
    fn test_welch_constant_signal_has_no_power() {
        let psd = welch(&Array1::from_elem(256, 3.0), 30.0, 128, 256);
        assert!(psd.power.iter().all(|p| p.abs() < 1e-20));
    }

    #[test]
    fn test_dominant_frequency_short_window() {
        // 3秒窗口, 零填充 + 插值后仍能分辨 1.2 Hz
        let psd = welch(&tone(1.2, 30.0, 90), 30.0, 90, 1024);
        let f = dominant_frequency(&psd, 0.7, 4.0).unwrap();
        assert!((f - 1.2).abs() < 0.05, "got {}", f);
    }

    #[test]
    fn test_dominant_frequency_picks_strongest() {
        let fs = 30.0;
        let x = tone(1.0, fs, 600) + &(tone(2.5, fs, 600) * 0.3);
        let psd = welch(&x, fs, 240, 1024);
        let f = dominant_frequency(&psd, 0.7, 4.0).unwrap();
        assert!((f - 1.0).abs() < 0.05, "got {}", f);
    }

    #[test]
    fn test_empty_band() {
        let psd = welch(&tone(1.0, 30.0, 90), 30.0, 90, 256);
        assert!(dominant_frequency(&psd, 20.0, 30.0).is_none());
    }
}
