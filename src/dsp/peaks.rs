//! 峰值检测
//!
//! 局部极大值 (平台取中点) → 最小高度 → 最小间距 (高峰优先) → 最小突出度

/// 峰值筛选条件, 均为可选
#[derive(Clone, Debug, Default)]
pub struct PeakOptions {
    /// 最小高度
    pub height: Option<f64>,
    /// 相邻峰最小间距 (采样数)
    pub distance: Option<f64>,
    /// 最小突出度
    pub prominence: Option<f64>,
}

/// 返回满足条件的峰值下标 (升序)
pub fn find_peaks(x: &[f64], options: &PeakOptions) -> Vec<usize> {
    let mut peaks = local_maxima(x);

    if let Some(height) = options.height {
        peaks.retain(|&p| x[p] >= height);
    }
    if let Some(distance) = options.distance {
        peaks = select_by_distance(x, &peaks, distance);
    }
    if let Some(min_prominence) = options.prominence {
        peaks.retain(|&p| prominence(x, p) >= min_prominence);
    }
    peaks
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }
    let mut i = 1;
    let i_max = n - 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                let left = i;
                let right = ahead - 1;
                peaks.push((left + right) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// 从最高峰开始, 移除间距内较低的峰
fn select_by_distance(x: &[f64], peaks: &[usize], distance: f64) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    // 稳定排序: 同高度时后出现的峰优先
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && ((peaks[j] - peaks[k - 1]) as f64) < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && ((peaks[k] - peaks[j]) as f64) < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// 峰值相对两侧最低点中较高者的高度
pub fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];

    let mut left_min = height;
    let mut i = peak;
    loop {
        if x[i] > height {
            break;
        }
        left_min = left_min.min(x[i]);
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    for &v in &x[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}
