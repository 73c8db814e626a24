//! 错误类型定义
//! Error types for the monitoring pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Capture device error: {0}")]
    Device(String),

    #[error("Capture device {device} unavailable after {attempts} attempts")]
    DeviceUnavailable { device: String, attempts: u32 },

    #[error("Face detector error: {0}")]
    Detector(String),

    #[error("Filter design failed: {0}")]
    FilterDesign(String),

    #[error("Not enough data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Degenerate signal: {0}")]
    DegenerateSignal(String),

    #[error("Pipeline already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
