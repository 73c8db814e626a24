/// 人脸检测数据结构定义
/// Data structures for face detection

// ========== 数据结构 ==========

/// 检测结果 (相对坐标, 0~1)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// 像素坐标框 (左上角 + 尺寸)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PixelBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Detection {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    /// 校验检测器输出: 非有限值或非正尺寸视为无检测, 坐标截断到 [0, 1]
    pub fn sanitize(self) -> Option<Self> {
        let fields = [self.x, self.y, self.width, self.height];
        if fields.iter().any(|v| !v.is_finite()) || self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let width = self.width.min(1.0 - x);
        let height = self.height.min(1.0 - y);
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        let confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(Self {
            x,
            y,
            width,
            height,
            confidence,
        })
    }

    /// 换算到 `frame_w × frame_h` 图像的像素坐标
    pub fn to_pixels(&self, frame_w: u32, frame_h: u32) -> PixelBox {
        let (w, h) = (frame_w as f64, frame_h as f64);
        PixelBox {
            x: self.x as f64 * w,
            y: self.y as f64 * h,
            width: self.width as f64 * w,
            height: self.height as f64 * h,
        }
    }
}

impl PixelBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 按比例缩放 (处理分辨率 → 显示分辨率)
    pub fn scale(&self, sx: f64, sy: f64) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }

    /// 指数滑动平均: alpha·self + (1-alpha)·prev
    pub fn blend(&self, prev: &PixelBox, alpha: f64) -> Self {
        let mix = |cur: f64, old: f64| alpha * cur + (1.0 - alpha) * old;
        Self {
            x: mix(self.x, prev.x),
            y: mix(self.y, prev.y),
            width: mix(self.width, prev.width),
            height: mix(self.height, prev.height),
        }
    }

    /// 与另一框各分量的最大差值
    pub fn max_abs_diff(&self, other: &PixelBox) -> f64 {
        [
            self.x - other.x,
            self.y - other.y,
            self.width - other.width,
            self.height - other.height,
        ]
        .iter()
        .fold(0.0_f64, |acc, d| acc.max(d.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_rejects_invalid() {
        assert!(Detection::new(f32::NAN, 0.1, 0.2, 0.2, 0.9).sanitize().is_none());
        assert!(Detection::new(0.1, 0.1, 0.0, 0.2, 0.9).sanitize().is_none());
        assert!(Detection::new(0.1, 0.1, 0.2, -0.5, 0.9).sanitize().is_none());
        assert!(Detection::new(0.1, 0.1, f32::INFINITY, 0.2, 0.9)
            .sanitize()
            .is_none());
    }

    #[test]
    fn test_sanitize_clamps_to_unit_square() {
        let d = Detection::new(-0.2, 0.5, 0.5, 0.8, 1.5).sanitize().unwrap();
        assert_eq!(d.x, 0.0);
        assert_eq!(d.y, 0.5);
        assert_eq!(d.width, 0.5);
        assert_eq!(d.height, 0.5);
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn test_to_pixels() {
        let b = Detection::new(0.25, 0.5, 0.5, 0.25, 1.0).to_pixels(320, 240);
        assert_eq!(b, PixelBox::new(80.0, 120.0, 160.0, 60.0));
    }

    #[test]
    fn test_blend() {
        let cur = PixelBox::new(10.0, 10.0, 10.0, 10.0);
        let prev = PixelBox::new(0.0, 0.0, 0.0, 0.0);
        let b = cur.blend(&prev, 0.7);
        assert!((b.x - 7.0).abs() < 1e-12);
        assert!((b.width - 7.0).abs() < 1e-12);
    }
}
