//! Butterworth 带通滤波器
//!
//! 模拟原型零极点 → 频率预畸变 → 低通转带通 → 双线性变换 → 多项式系数,
//! 配合零相位前后向滤波 (filtfilt, 奇对称延拓 + 稳态初始条件)。

use ndarray::Array1;
use num_complex::Complex64;

use crate::error::{MonitorError, Result};

/// 归一化截止频率上限 (相对奈奎斯特频率)
const MAX_NORMALIZED_LOW: f64 = 0.8;
const MAX_NORMALIZED_HIGH: f64 = 0.9;

/// 传递函数系数 b / a (a[0] = 1)
#[derive(Clone, Debug, PartialEq)]
pub struct BandpassFilter {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

/// 将截止频率换算为归一化频率 (0, 1), 超出奈奎斯特时截断
pub fn normalized_band(low_hz: f64, high_hz: f64, fs: f64) -> Result<(f64, f64)> {
    if !(fs.is_finite() && fs > 0.0) {
        return Err(MonitorError::FilterDesign(format!("invalid sample rate {}", fs)));
    }
    let nyquist = fs / 2.0;
    let low = (low_hz / nyquist).min(MAX_NORMALIZED_LOW);
    let high = (high_hz / nyquist).min(MAX_NORMALIZED_HIGH);
    if !(low > 0.0 && low < high) {
        return Err(MonitorError::FilterDesign(format!(
            "band {:.3}-{:.3} Hz not realizable at fs={:.2}",
            low_hz, high_hz, fs
        )));
    }
    Ok((low, high))
}

impl BandpassFilter {
    /// 设计 `order` 阶 Butterworth 带通 (结果阶数为 2·order)
    pub fn butterworth(order: usize, low_hz: f64, high_hz: f64, fs: f64) -> Result<Self> {
        if order == 0 {
            return Err(MonitorError::FilterDesign("order must be positive".into()));
        }
        let (low, high) = normalized_band(low_hz, high_hz, fs)?;

        // 以 fs = 2 设计, 预畸变到模拟频率
        let design_fs = 2.0;
        let warp = |w: f64| 2.0 * design_fs * (std::f64::consts::PI * w / design_fs).tan();
        let (w1, w2) = (warp(low), warp(high));
        let bw = w2 - w1;
        let w0 = (w1 * w2).sqrt();

        // 模拟低通原型: 单位圆左半平面均匀分布的极点
        let n = order as i64;
        let proto: Vec<Complex64> = (0..order)
            .map(|i| {
                let m = (-n + 1 + 2 * i as i64) as f64;
                -Complex64::from_polar(1.0, std::f64::consts::PI * m / (2.0 * n as f64))
            })
            .collect();

        // 低通 → 带通
        let mut poles = Vec::with_capacity(2 * order);
        for &p in &proto {
            let p_lp = p * (bw / 2.0);
            let root = (p_lp * p_lp - Complex64::new(w0 * w0, 0.0)).sqrt();
            poles.push(p_lp + root);
        }
        for &p in &proto {
            let p_lp = p * (bw / 2.0);
            let root = (p_lp * p_lp - Complex64::new(w0 * w0, 0.0)).sqrt();
            poles.push(p_lp - root);
        }
        let zeros = vec![Complex64::new(0.0, 0.0); order];
        let gain = bw.powi(order as i32);

        // 双线性变换
        let fs2 = Complex64::new(2.0 * design_fs, 0.0);
        let mut z_d: Vec<Complex64> = zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
        let p_d: Vec<Complex64> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
        z_d.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(poles.len() - zeros.len()));
        let num: Complex64 = zeros.iter().map(|&z| fs2 - z).product();
        let den: Complex64 = poles.iter().map(|&p| fs2 - p).product();
        let gain_d = gain * (num / den).re;

        let b: Vec<f64> = poly(&z_d).iter().map(|c| c.re * gain_d).collect();
        let a: Vec<f64> = poly(&p_d).iter().map(|c| c.re).collect();

        if b.iter().chain(a.iter()).any(|v| !v.is_finite()) || a[0].abs() < f64::EPSILON {
            return Err(MonitorError::FilterDesign("non-finite coefficients".into()));
        }
        Ok(Self { b, a })
    }

    /// 零相位滤波
    pub fn filtfilt(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        filtfilt(&self.b, &self.a, x)
    }
}

/// 由根构造首一多项式系数 (最高次在前)
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &r in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for i in 1..next.len() {
            next[i] -= r * coeffs[i - 1];
        }
        coeffs = next;
    }
    coeffs
}

/// 直接II型转置结构的IIR滤波, `zi` 为初始状态
pub fn lfilter(b: &[f64], a: &[f64], x: &[f64], zi: &[f64]) -> Vec<f64> {
    let n = b.len().max(a.len());
    let coef = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0) / a[0];
    let mut z = zi.to_vec();
    z.resize(n - 1, 0.0);

    let mut y = Vec::with_capacity(x.len());
    for &xi in x {
        let yi = coef(b, 0) * xi + z.first().copied().unwrap_or(0.0);
        for i in 0..n.saturating_sub(1) {
            let next = if i + 1 < n - 1 { z[i + 1] } else { 0.0 };
            z[i] = coef(b, i + 1) * xi + next - coef(a, i + 1) * yi;
        }
        y.push(yi);
    }
    y
}

/// 阶跃响应稳态对应的初始状态: (I - Aᵀ) zi = b[1:] - a[1:]·b[0]
pub fn lfilter_zi(b: &[f64], a: &[f64]) -> Result<Vec<f64>> {
    let n = b.len().max(a.len());
    let a0 = a[0];
    let at = |i: usize| a.get(i).copied().unwrap_or(0.0) / a0;
    let bt = |i: usize| b.get(i).copied().unwrap_or(0.0) / a0;
    let m = n - 1;
    if m == 0 {
        return Ok(Vec::new());
    }

    let mut mat = vec![vec![0.0; m]; m];
    for (j, row) in mat.iter_mut().enumerate() {
        row[j] = 1.0;
        row[0] += at(j + 1);
        if j + 1 < m {
            row[j + 1] -= 1.0;
        }
    }
    let rhs: Vec<f64> = (1..n).map(|i| bt(i) - at(i) * bt(0)).collect();
    solve(mat, rhs)
}

/// 部分主元高斯消元
fn solve(mut mat: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Result<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| mat[i][col].abs().total_cmp(&mat[j][col].abs()))
            .unwrap_or(col);
        if mat[pivot][col].abs() < 1e-300 {
            return Err(MonitorError::FilterDesign("singular initial-state system".into()));
        }
        mat.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in col + 1..n {
            let factor = mat[row][col] / mat[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                mat[row][k] -= factor * mat[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| mat[row][k] * out[k]).sum();
        out[row] = (rhs[row] - tail) / mat[row][row];
    }
    Ok(out)
}

/// 前向-后向零相位滤波, 两端奇对称延拓 3·max(len(a), len(b)) 个采样
pub fn filtfilt(b: &[f64], a: &[f64], x: &Array1<f64>) -> Result<Array1<f64>> {
    let padlen = 3 * b.len().max(a.len());
    let n = x.len();
    if n <= padlen {
        return Err(MonitorError::InsufficientData {
            needed: padlen + 1,
            available: n,
        });
    }
    let x: Vec<f64> = x.iter().copied().collect();
    let (first, last) = (x[0], x[n - 1]);

    let mut ext = Vec::with_capacity(n + 2 * padlen);
    ext.extend((1..=padlen).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(&x);
    ext.extend((n - 1 - padlen..n - 1).rev().map(|i| 2.0 * last - x[i]));

    let zi = lfilter_zi(b, a)?;
    let scaled = |s: f64| zi.iter().map(|z| z * s).collect::<Vec<f64>>();

    let forward = lfilter(b, a, &ext, &scaled(ext[0]));
    let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
    let y0 = reversed[0];
    reversed = lfilter(b, a, &reversed, &scaled(y0));
    reversed.reverse();

    let out = Array1::from(reversed[padlen..padlen + n].to_vec());
    if out.iter().any(|v| !v.is_finite()) {
        return Err(MonitorError::FilterDesign("filter output diverged".into()));
    }
    Ok(out)
}
