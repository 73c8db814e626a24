pub mod cancel; // 协作式取消
pub mod config; // 监测配置参数
pub mod detection; // 人脸检测系统
pub mod dsp; // 信号处理
pub mod error; // 错误类型
pub mod estimator; // 心率估计系统
pub mod events; // 事件总线
pub mod extractor; // 人脸ROI提取
pub mod input; // 视频输入系统
pub mod pipeline; // 三线程流水线
pub mod queue; // 有界中继队列

pub use crate::cancel::CancelToken;
pub use crate::config::{Args, MonitorConfig};
pub use crate::detection::{
    Detection, FaceDetector, FixedRegionDetector, PixelBox, SkinRegionDetector,
};
pub use crate::error::{MonitorError, Result};
pub use crate::estimator::{HeartRateEstimate, HeartRateEstimator, RespirationEstimate};
pub use crate::events::{EventBus, PipelineEvent};
pub use crate::extractor::{DisplayFrame, SignalSample};
pub use crate::input::{CaptureDevice, Frame, ReleaseHandle, SyntheticCamera, SyntheticConfig};
pub use crate::pipeline::{Pipeline, PipelineState, PipelineStats, RecordedSample, StopReport};
pub use crate::queue::DropOldestQueue;

/// 本地时间字符串, 用作输出文件名
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}
