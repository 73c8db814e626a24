/// 检测系统 (Detection System)
///
/// 在提取线程中运行, 负责定位人脸
/// - Detector:  检测器接口 + 失败隔离 + 独立线程超时
/// - Skin:      肤色区域检测
/// - Smoothing: 人脸框平滑 + 在场状态机
pub mod detector;
pub mod skin;
pub mod smoothing;
pub mod types;

pub use detector::{
    detect_guarded, DetectOutcome, FaceDetector, FixedRegionDetector, TimedDetector,
};
pub use skin::SkinRegionDetector;
pub use smoothing::{FacePresence, PresenceState, SmoothedBox};
pub use types::{Detection, PixelBox};
