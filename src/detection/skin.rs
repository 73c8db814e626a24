//! 肤色区域检测器 (YCbCr 阈值)
//!
//! 无模型依赖的轻量检测: 统计肤色像素的行/列分布, 取主要分布区间作为人脸框。
//! 适合正面、光照均匀、背景无大面积肤色的场景。

use anyhow::Result;
use image::RgbImage;

use super::detector::FaceDetector;
use super::types::Detection;

/// Cb / Cr 肤色范围
const CB_RANGE: (f32, f32) = (77.0, 127.0);
const CR_RANGE: (f32, f32) = (133.0, 173.0);

#[derive(Clone, Debug)]
pub struct SkinRegionDetector {
    /// 肤色像素占全图的最小比例
    pub min_area_fraction: f32,
    /// 行/列计数达到峰值的该比例才计入人脸范围
    pub profile_fraction: f32,
}

impl Default for SkinRegionDetector {
    fn default() -> Self {
        Self {
            min_area_fraction: 0.02,
            profile_fraction: 0.25,
        }
    }
}

#[inline]
fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (CB_RANGE.0..=CB_RANGE.1).contains(&cb) && (CR_RANGE.0..=CR_RANGE.1).contains(&cr)
}

/// 计数 ≥ 阈值的首尾下标
fn dominant_span(counts: &[u32], fraction: f32) -> Option<(usize, usize)> {
    let max = *counts.iter().max()?;
    if max == 0 {
        return None;
    }
    let threshold = (max as f32 * fraction).max(1.0) as u32;
    let first = counts.iter().position(|&c| c >= threshold)?;
    let last = counts.iter().rposition(|&c| c >= threshold)?;
    Some((first, last))
}

impl FaceDetector for SkinRegionDetector {
    fn name(&self) -> &str {
        "skin-region"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Option<Detection>> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(None);
        }
        let mut rows = vec![0u32; h as usize];
        let mut cols = vec![0u32; w as usize];
        let mut total = 0u64;
        for (x, y, p) in image.enumerate_pixels() {
            if is_skin(p[0], p[1], p[2]) {
                rows[y as usize] += 1;
                cols[x as usize] += 1;
                total += 1;
            }
        }

        let area = (w as u64 * h as u64) as f32;
        if (total as f32) < self.min_area_fraction * area {
            return Ok(None);
        }
        let (Some((y0, y1)), Some((x0, x1))) = (
            dominant_span(&rows, self.profile_fraction),
            dominant_span(&cols, self.profile_fraction),
        ) else {
            return Ok(None);
        };

        let box_w = (x1 - x0 + 1) as u32;
        let box_h = (y1 - y0 + 1) as u32;
        let inside = (y0..=y1)
            .flat_map(|y| (x0..=x1).map(move |x| (x as u32, y as u32)))
            .filter(|&(x, y)| {
                let p = image.get_pixel(x, y);
                is_skin(p[0], p[1], p[2])
            })
            .count();
        let confidence = inside as f32 / (box_w * box_h) as f32;

        Ok(Some(Detection::new(
            x0 as f32 / w as f32,
            y0 as f32 / h as f32,
            box_w as f32 / w as f32,
            box_h as f32 / h as f32,
            confidence,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn scene(face: Option<(u32, u32, u32, u32)>) -> RgbImage {
        let mut img = RgbImage::from_pixel(160, 120, Rgb([40, 40, 40]));
        if let Some((fx, fy, fw, fh)) = face {
            for y in fy..fy + fh {
                for x in fx..fx + fw {
                    img.put_pixel(x, y, Rgb([200, 150, 120]));
                }
            }
        }
        img
    }

    #[test]
    fn test_skin_color_classification() {
        assert!(is_skin(200, 150, 120));
        assert!(!is_skin(40, 40, 40));
        assert!(!is_skin(30, 80, 200));
    }

    #[test]
    fn test_detects_skin_patch() {
        let mut det = SkinRegionDetector::default();
        let d = det.detect(&scene(Some((40, 30, 48, 60)))).unwrap().unwrap();
        assert!((d.x - 40.0 / 160.0).abs() < 1e-6);
        assert!((d.y - 30.0 / 120.0).abs() < 1e-6);
        assert!((d.width - 48.0 / 160.0).abs() < 1e-6);
        assert!((d.height - 60.0 / 120.0).abs() < 1e-6);
        assert!(d.confidence > 0.99);
    }

    #[test]
    fn test_no_skin_no_detection() {
        let mut det = SkinRegionDetector::default();
        assert!(det.detect(&scene(None)).unwrap().is_none());
    }
}
