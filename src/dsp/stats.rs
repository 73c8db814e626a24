//! 基础统计与预处理: 百分位、IQR截断、归一化、线性去趋势

use ndarray::Array1;

use crate::error::{MonitorError, Result};

/// 归一化时判定信号为常数的阈值
pub const RANGE_EPSILON: f64 = 1e-10;

pub fn mean(x: &Array1<f64>) -> f64 {
    x.mean().unwrap_or(0.0)
}

/// 总体标准差 (ddof = 0)
pub fn std_dev(x: &Array1<f64>) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.std(0.0)
}

/// 线性插值百分位 (q ∈ [0, 100])
pub fn percentile(x: &Array1<f64>, q: f64) -> f64 {
    let mut sorted: Vec<f64> = x.iter().copied().collect();
    percentile_sorted(sort_in_place(&mut sorted), q)
}

fn sort_in_place(v: &mut [f64]) -> &[f64] {
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    Some(percentile_sorted(sort_in_place(&mut sorted), 50.0))
}

/// 将离群值截断到 [Q1 - 1.5·IQR, Q3 + 1.5·IQR]
pub fn clip_iqr(x: &Array1<f64>) -> Array1<f64> {
    let mut sorted: Vec<f64> = x.iter().copied().collect();
    let sorted = sort_in_place(&mut sorted);
    let q1 = percentile_sorted(sorted, 25.0);
    let q3 = percentile_sorted(sorted, 75.0);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    x.mapv(|v| v.clamp(lower, upper))
}

/// 最小-最大归一化到 [0, 1]; 范围小于 ε 时视为无效信号
pub fn normalize_min_max(x: &Array1<f64>) -> Result<Array1<f64>> {
    let min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range < RANGE_EPSILON {
        return Err(MonitorError::DegenerateSignal(format!(
            "signal range {:.3e} below epsilon",
            range
        )));
    }
    Ok(x.mapv(|v| (v - min) / range))
}

/// 减去最小二乘直线拟合
pub fn detrend_linear(x: &Array1<f64>) -> Array1<f64> {
    let n = x.len();
    if n < 2 {
        return x.mapv(|v| v - mean(x));
    }
    let t_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(x);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in x.iter().enumerate() {
        let dt = i as f64 - t_mean;
        num += dt * (y - y_mean);
        den += dt * dt;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    let intercept = y_mean - slope * t_mean;
    Array1::from_iter(
        x.iter()
            .enumerate()
            .map(|(i, &y)| y - (intercept + slope * i as f64)),
    )
}

/// 等间隔时间轴 (包含两端点)
pub fn linspace(start: f64, end: f64, n: usize) -> Array1<f64> {
    match n {
        0 => Array1::zeros(0),
        1 => Array1::from_elem(1, start),
        _ => Array1::linspace(start, end, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_percentile_interpolates() {
        let x = array![1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(percentile(&x, 25.0), 1.75);
        assert_relative_eq!(percentile(&x, 50.0), 2.5);
        assert_relative_eq!(percentile(&x, 100.0), 4.0);
    }

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_clip_iqr_limits_outlier() {
        let x = array![1.0, 2.0, 3.0, 4.0, 5.0, 100.0];
        let clipped = clip_iqr(&x);
        // Q1 = 2.25, Q3 = 4.75, IQR = 2.5 → 上界 8.5
        assert_relative_eq!(clipped[5], 8.5);
        assert_relative_eq!(clipped[0], 1.0);
    }

    #[test]
    fn test_normalize_flat_signal_fails() {
        let x = Array1::from_elem(50, 0.42);
        assert!(matches!(
            normalize_min_max(&x),
            Err(MonitorError::DegenerateSignal(_))
        ));
    }

    #[test]
    fn test_normalize_range() {
        let x = array![2.0, 4.0, 6.0];
        let n = normalize_min_max(&x).unwrap();
        assert_relative_eq!(n[0], 0.0);
        assert_relative_eq!(n[1], 0.5);
        assert_relative_eq!(n[2], 1.0);
    }

    #[test]
    fn test_detrend_removes_line() {
        let x = Array1::from_iter((0..20).map(|i| 3.0 + 0.5 * i as f64));
        let d = detrend_linear(&x);
        for v in d.iter() {
            assert!(v.abs() < 1e-9);
        }
    }
}
