//! 额头ROI几何与采样

use image::RgbImage;

use crate::config::MonitorConfig;
use crate::detection::PixelBox;

/// 额头区域相对人脸框的位置与尺寸
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoiGeometry {
    pub x_ratio: f64,
    pub y_ratio: f64,
    pub width_ratio: f64,
    pub height_ratio: f64,
}

impl Default for RoiGeometry {
    fn default() -> Self {
        Self {
            x_ratio: 0.20,
            y_ratio: 0.10,
            width_ratio: 0.60,
            height_ratio: 0.15,
        }
    }
}

impl From<&MonitorConfig> for RoiGeometry {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            x_ratio: config.roi_x_ratio,
            y_ratio: config.roi_y_ratio,
            width_ratio: config.roi_width_ratio,
            height_ratio: config.roi_height_ratio,
        }
    }
}

impl RoiGeometry {
    pub fn derive(&self, face: &PixelBox) -> PixelBox {
        PixelBox::new(
            face.x + self.x_ratio * face.width,
            face.y + self.y_ratio * face.height,
            self.width_ratio * face.width,
            self.height_ratio * face.height,
        )
    }
}

/// 截断到图像范围内的整数像素矩形
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoiRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RoiRect {
    /// 截断到 `frame_w × frame_h`; 退化 (面积为0) 时返回 None
    pub fn clamp(rect: &PixelBox, frame_w: u32, frame_h: u32) -> Option<Self> {
        let vals = [rect.x, rect.y, rect.width, rect.height];
        if vals.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let x0 = rect.x.floor().max(0.0);
        let y0 = rect.y.floor().max(0.0);
        let x1 = (rect.x + rect.width).floor().min(frame_w as f64);
        let y1 = (rect.y + rect.height).floor().min(frame_h as f64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }

    pub fn to_pixel_box(&self) -> PixelBox {
        PixelBox::new(
            self.x as f64,
            self.y as f64,
            self.width as f64,
            self.height as f64,
        )
    }
}

/// ROI内绿色通道均值
pub fn green_mean(image: &RgbImage, roi: &RoiRect) -> Option<f64> {
    let (w, h) = image.dimensions();
    if roi.width == 0 || roi.height == 0 || roi.x + roi.width > w || roi.y + roi.height > h {
        return None;
    }
    let mut sum = 0u64;
    for y in roi.y..roi.y + roi.height {
        for x in roi.x..roi.x + roi.width {
            sum += image.get_pixel(x, y)[1] as u64;
        }
    }
    Some(sum as f64 / (roi.width as u64 * roi.height as u64) as f64)
}
