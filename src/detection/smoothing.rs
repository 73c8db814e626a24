//! 人脸框平滑与在场状态机
//!
//! - SmoothedBox: 指数滑动平均, 抑制检测框抖动
//! - FacePresence: NoFace ⇄ FaceHeld, 丢失超过阈值才判定人脸离开

use super::types::PixelBox;

/// EMA平滑后的人脸框
#[derive(Clone, Debug)]
pub struct SmoothedBox {
    alpha: f64,
    current: Option<PixelBox>,
}

impl SmoothedBox {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            current: None,
        }
    }

    /// 融合新检测; 首次检测直接采用
    pub fn update(&mut self, detected: PixelBox) -> PixelBox {
        let next = match &self.current {
            Some(prev) => detected.blend(prev, self.alpha),
            None => detected,
        };
        self.current = Some(next);
        next
    }

    pub fn current(&self) -> Option<PixelBox> {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceState {
    NoFace,
    FaceHeld,
}

/// 在场状态机, 时间使用帧时间戳 (秒)
#[derive(Clone, Debug)]
pub struct FacePresence {
    state: PresenceState,
    last_seen: Option<f64>,
    lost_threshold: f64,
}

impl FacePresence {
    pub fn new(lost_threshold: f64) -> Self {
        Self {
            state: PresenceState::NoFace,
            last_seen: None,
            lost_threshold,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn is_present(&self) -> bool {
        self.state == PresenceState::FaceHeld
    }

    /// 处理一帧的检测结果, 状态变化时返回新状态
    pub fn update(&mut self, detected: bool, now: f64) -> Option<PresenceState> {
        if detected {
            self.last_seen = Some(now);
        }
        match self.state {
            PresenceState::NoFace if detected => {
                self.state = PresenceState::FaceHeld;
                Some(self.state)
            }
            PresenceState::FaceHeld if !detected => {
                let lost_for = self.last_seen.map(|t| now - t).unwrap_or(f64::INFINITY);
                if lost_for > self.lost_threshold {
                    self.state = PresenceState::NoFace;
                    self.last_seen = None;
                    Some(self.state)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
