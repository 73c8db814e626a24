//! 监测配置 - 通过JSON文件调整参数
//! Monitor configuration (JSON file + command line)

use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MonitorError, Result};

/// 心率监测命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "rPPG 摄像头心率监测 (无界面)", long_about = None)]
pub struct Args {
    /// 摄像头索引
    #[arg(short, long, default_value_t = 0)]
    pub camera: usize,

    /// 配置文件路径 (不存在时自动创建)
    #[arg(long, default_value = "rppg_config.json")]
    pub config: String,

    /// 使用合成视频源 (无需摄像头)
    #[arg(long)]
    pub synthetic: bool,

    /// 合成视频源的脉搏频率 (Hz)
    #[arg(long, default_value_t = 1.2)]
    pub pulse_hz: f64,

    /// 运行时长 (秒), 0 表示一直运行直到 Ctrl+C
    #[arg(short, long, default_value_t = 30.0)]
    pub duration: f64,

    /// 记录有效心率并在结束时以JSON输出
    #[arg(short, long)]
    pub record: bool,

    /// 固定人脸区域 (相对坐标 x,y,w,h), 不使用肤色检测
    #[arg(long, value_delimiter = ',', num_args = 4)]
    pub face_region: Option<Vec<f32>>,
}

/// 监测参数配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    // === 分析窗口 ===
    pub window_size: usize,    // 分析窗口长度 (帧)
    pub min_hr: f64,           // 有效心率下限 (bpm)
    pub max_hr: f64,           // 有效心率上限 (bpm)
    pub update_interval: f64,  // 估计周期 (秒)
    pub history_len: usize,    // 历史心率长度 M
    pub median_window: usize,  // 中值平滑窗口
    pub agreement_tolerance: f64, // 时域/频域一致阈值 (bpm)

    // === 人脸/ROI ===
    pub face_lost_threshold: f64, // 人脸丢失判定时长 (秒)
    pub detect_timeout: f64,      // 单帧检测超时 (秒), 超时按无检测处理
    pub smoothing_alpha: f64,     // 人脸框EMA系数 (0,1]
    pub process_width: u32,       // 处理分辨率宽度 (像素)
    pub roi_x_ratio: f64,         // 额头ROI x偏移 (相对人脸宽)
    pub roi_y_ratio: f64,         // 额头ROI y偏移 (相对人脸高)
    pub roi_width_ratio: f64,     // 额头ROI 宽度
    pub roi_height_ratio: f64,    // 额头ROI 高度
    pub mirror: bool,             // 水平镜像 (自拍视角)
    pub draw_overlay: bool,       // 在显示帧上绘制人脸框/ROI

    // === 滤波与估计 ===
    pub filter_order: usize, // Butterworth阶数
    pub band_low_hz: f64,    // 通带下限
    pub band_high_hz: f64,   // 通带上限
    pub interval_min_bpm: f64, // 峰间隔合理范围下限
    pub interval_max_bpm: f64, // 峰间隔合理范围上限
    // 质量分 = (1 - cv * scale) * 100
    // 默认窗口只有两三个峰间隔, 白噪声单次也可能得到 50 以上, 需结合置信度判断
    pub quality_cv_scale: f64,
    pub welch_segment_secs: f64, // Welch分段长度上限 (秒)
    pub welch_nfft: usize,     // Welch FFT长度 (零填充)

    // === 呼吸率 ===
    pub respiration_enabled: bool,
    pub respiration_window_size: usize, // 呼吸缓冲长度 (帧)
    pub respiration_min_span: f64,      // 最短有效时长 (秒)
    pub respiration_low_hz: f64,
    pub respiration_high_hz: f64,
    pub respiration_min_brpm: f64,
    pub respiration_max_brpm: f64,

    // === 队列与线程 ===
    pub frame_queue_capacity: usize,
    pub signal_queue_capacity: usize,
    pub display_queue_capacity: usize,
    pub queue_timeout: f64, // 消费者等待超时 (秒)
    pub join_timeout: f64,  // 停止时等待线程退出 (秒)

    // === 采集设备 ===
    pub capture_width: u32,
    pub capture_height: u32,
    pub read_retry_backoff: f64, // 读帧失败后退避 (秒)
    pub device_open_retries: u32,
    pub device_open_backoff: f64, // 打开失败后重试间隔 (秒)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            // 分析窗口
            window_size: 90,
            min_hr: 40.0,
            max_hr: 180.0,
            update_interval: 1.0,
            history_len: 10,
            median_window: 5,
            agreement_tolerance: 15.0,

            // 人脸/ROI
            face_lost_threshold: 1.0,
            detect_timeout: 0.5,
            smoothing_alpha: 0.7,
            process_width: 320,
            roi_x_ratio: 0.20,
            roi_y_ratio: 0.10,
            roi_width_ratio: 0.60,
            roi_height_ratio: 0.15,
            mirror: true,
            draw_overlay: true,

            // 滤波与估计
            filter_order: 3,
            band_low_hz: 0.7,
            band_high_hz: 4.0,
            interval_min_bpm: 40.0,
            interval_max_bpm: 200.0,
            quality_cv_scale: 3.0,
            welch_segment_secs: 8.0,
            welch_nfft: 1024,

            // 呼吸率
            respiration_enabled: true,
            respiration_window_size: 900,
            respiration_min_span: 15.0,
            respiration_low_hz: 0.1,
            respiration_high_hz: 0.4,
            respiration_min_brpm: 4.0,
            respiration_max_brpm: 40.0,

            // 队列与线程
            frame_queue_capacity: 5,
            signal_queue_capacity: 100,
            display_queue_capacity: 5,
            queue_timeout: 0.5,
            join_timeout: 2.0,

            // 采集设备
            capture_width: 640,
            capture_height: 480,
            read_retry_backoff: 0.1,
            device_open_retries: 3,
            device_open_backoff: 1.0,
        }
    }
}

impl MonitorConfig {
    /// 从JSON文件加载配置 (文件不存在则写入默认配置)
    pub fn load(path: &str) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                info!("✅ 配置已从 {} 加载", path);
                config
            }
            Err(MonitorError::Io(_)) if !Path::new(path).exists() => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("⚠️  保存默认配置失败: {}", e);
                }
                config
            }
            Err(e) => {
                warn!("⚠️  配置文件无效: {}, 使用默认值", e);
                Self::default()
            }
        }
    }

    /// 读取并校验配置
    pub fn try_load(path: &str) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path);
        Ok(())
    }

    /// 参数合法性检查
    pub fn validate(&self) -> Result<()> {
        fn fail<T>(msg: String) -> Result<T> {
            Err(MonitorError::Config(msg))
        }

        if self.window_size < 16 {
            return fail(format!("window_size must be >= 16, got {}", self.window_size));
        }
        if !(self.min_hr > 0.0 && self.min_hr < self.max_hr) {
            return fail(format!(
                "min_hr/max_hr must satisfy 0 < min < max, got {}/{}",
                self.min_hr, self.max_hr
            ));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return fail(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            ));
        }
        if self.update_interval <= 0.0 || self.face_lost_threshold < 0.0 {
            return fail("update_interval must be > 0 and face_lost_threshold >= 0".into());
        }
        if !(self.detect_timeout.is_finite() && self.detect_timeout > 0.0) {
            return fail(format!("detect_timeout must be > 0, got {}", self.detect_timeout));
        }
        if self.process_width < 16 {
            return fail(format!("process_width too small: {}", self.process_width));
        }
        if self.history_len == 0 || self.median_window == 0 {
            return fail("history_len and median_window must be non-zero".into());
        }
        if self.filter_order == 0 || self.filter_order > 8 {
            return fail(format!("filter_order must be 1..=8, got {}", self.filter_order));
        }
        if !(self.band_low_hz > 0.0 && self.band_low_hz < self.band_high_hz) {
            return fail("band_low_hz must be positive and below band_high_hz".into());
        }
        if !(self.interval_min_bpm > 0.0 && self.interval_min_bpm < self.interval_max_bpm) {
            return fail("interval bpm bounds are inverted".into());
        }
        let ratios = [
            self.roi_x_ratio,
            self.roi_y_ratio,
            self.roi_width_ratio,
            self.roi_height_ratio,
        ];
        if ratios.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return fail("ROI ratios must lie in [0, 1]".into());
        }
        if self.frame_queue_capacity == 0
            || self.signal_queue_capacity == 0
            || self.display_queue_capacity == 0
        {
            return fail("queue capacities must be non-zero".into());
        }
        if self.read_retry_backoff < 0.0 || self.device_open_backoff < 0.0 {
            return fail("retry backoffs must be non-negative".into());
        }
        if self.queue_timeout <= 0.0 || self.join_timeout <= 0.0 {
            return fail("queue_timeout and join_timeout must be positive".into());
        }
        if self.respiration_enabled
            && !(self.respiration_low_hz > 0.0
                && self.respiration_low_hz < self.respiration_high_hz
                && self.respiration_window_size >= self.window_size)
        {
            return fail("respiration band or window is invalid".into());
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs_f64(self.update_interval)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.queue_timeout)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.detect_timeout)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.join_timeout)
    }

    pub fn read_retry_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.read_retry_backoff)
    }

    pub fn device_open_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.device_open_backoff)
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前监测配置:");
        info!(
            "  分析窗口: {}帧 | 更新周期: {:.1}s | 有效范围: {:.0}-{:.0} bpm",
            self.window_size, self.update_interval, self.min_hr, self.max_hr
        );
        info!(
            "  处理宽度: {}px | EMA系数: {:.2} | 人脸丢失阈值: {:.1}s | 检测超时: {:.2}s",
            self.process_width, self.smoothing_alpha, self.face_lost_threshold, self.detect_timeout
        );
        info!(
            "  通带: {:.1}-{:.1} Hz | Butterworth {}阶",
            self.band_low_hz, self.band_high_hz, self.filter_order
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MonitorConfig::default();
        assert_eq!(config.window_size, 90);
        assert_eq!(config.min_hr, 40.0);
        assert_eq!(config.max_hr, 180.0);
        assert_eq!(config.update_interval, 1.0);
        assert_eq!(config.face_lost_threshold, 1.0);
        assert_eq!(config.smoothing_alpha, 0.7);
        assert_eq!(config.process_width, 320);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MonitorConfig::from_json(r#"{ "window_size": 120, "max_hr": 200.0 }"#)
            .unwrap();
        assert_eq!(config.window_size, 120);
        assert_eq!(config.max_hr, 200.0);
        assert_eq!(config.min_hr, 40.0);
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        let err = MonitorConfig::from_json(r#"{ "smoothing_alpha": 0.0 }"#).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn test_inverted_hr_bounds_rejected() {
        let config = MonitorConfig {
            min_hr: 120.0,
            max_hr: 60.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detect_timeout_must_be_positive() {
        assert_eq!(MonitorConfig::default().detect_timeout(), Duration::from_millis(500));
        let err = MonitorConfig::from_json(r#"{ "detect_timeout": 0.0 }"#).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("rppg_config_{}.json", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let config = MonitorConfig {
            window_size: 150,
            mirror: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = MonitorConfig::load(&path);
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }
}
