//! 信号处理模块 (Digital Signal Processing)
//!
//! 纯函数, 无共享状态: 相同输入得到逐位相同的输出
//! - stats: 百分位 / IQR截断 / 归一化 / 去趋势
//! - filters: Butterworth 带通 + 零相位滤波
//! - peaks: 峰值检测
//! - spectrum: Welch 功率谱

pub mod filters;
pub mod peaks;
pub mod spectrum;
pub mod stats;

pub use filters::{filtfilt, BandpassFilter};
pub use peaks::{find_peaks, PeakOptions};
pub use spectrum::{dominant_frequency, welch, Psd};
