//! 显示帧标注: 人脸框 (绿) + 额头ROI (黄)

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::PixelBox;

pub const FACE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const ROI_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// 2像素线宽的空心矩形
pub fn draw_box(img: &mut RgbImage, b: &PixelBox, color: Rgb<u8>) {
    for inset in 0..2 {
        let w = (b.width - 2.0 * inset as f64).round();
        let h = (b.height - 2.0 * inset as f64).round();
        if w < 1.0 || h < 1.0 {
            break;
        }
        let rect = Rect::at(b.x.round() as i32 + inset, b.y.round() as i32 + inset)
            .of_size(w as u32, h as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

pub fn annotate(img: &mut RgbImage, face: Option<&PixelBox>, roi: Option<&PixelBox>) {
    if let Some(face) = face {
        draw_box(img, face, FACE_COLOR);
    }
    if let Some(roi) = roi {
        draw_box(img, roi, ROI_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_draws_outline_only() {
        let mut img = RgbImage::new(40, 40);
        annotate(
            &mut img,
            Some(&PixelBox::new(5.0, 5.0, 30.0, 30.0)),
            Some(&PixelBox::new(12.0, 10.0, 16.0, 6.0)),
        );
        assert_eq!(*img.get_pixel(5, 5), FACE_COLOR);
        assert_eq!(*img.get_pixel(12, 10), ROI_COLOR);
        // 框内部保持原样
        assert_eq!(*img.get_pixel(20, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_outside_frame_is_clipped() {
        let mut img = RgbImage::new(10, 10);
        draw_box(&mut img, &PixelBox::new(-5.0, -5.0, 30.0, 30.0), FACE_COLOR);
        draw_box(&mut img, &PixelBox::new(2.0, 2.0, 0.2, 0.2), FACE_COLOR);
    }
}
