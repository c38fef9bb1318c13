// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 图像预处理: RGB 帧 → NCHW 浮点张量

use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;

use crate::error::{MaskError, Result};

/// letterbox 填充灰度
pub const LETTERBOX_FILL: u8 = 114;

/// 把一批同尺寸帧转为 [N, 3, H, W], 数值缩放到 [0, 1]
///
/// `flip_bgr_rgb` 为 true 时交换第 0 与第 2 通道 (输入为 BGR 排列时使用)
pub fn frames_to_tensor(frames: &[RgbImage], flip_bgr_rgb: bool) -> Result<Array4<f32>> {
    let Some(first) = frames.first() else {
        return Ok(Array4::zeros((0, 3, 0, 0)));
    };
    let (width, height) = first.dimensions();

    let mut ys = Array4::<f32>::zeros((frames.len(), 3, height as usize, width as usize));
    for (idx, frame) in frames.iter().enumerate() {
        if frame.dimensions() != (width, height) {
            return Err(MaskError::InconsistentFrames {
                expected: (width, height),
                actual: frame.dimensions(),
            });
        }
        for (x, y, rgb) in frame.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            let [mut r, g, mut b] = rgb.0;
            if flip_bgr_rgb {
                std::mem::swap(&mut r, &mut b);
            }
            ys[[idx, 0, y, x]] = (r as f32) / 255.0;
            ys[[idx, 1, y, x]] = (g as f32) / 255.0;
            ys[[idx, 2, y, x]] = (b as f32) / 255.0;
        }
    }

    Ok(ys)
}

fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 等比缩放到 (width, height) 内并居中, 四周用 114 灰色填充
pub fn letterbox(image: &DynamicImage, width: u32, height: u32) -> RgbImage {
    let (w0, h0) = image.dimensions();
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([LETTERBOX_FILL; 3]));
    if w0 == 0 || h0 == 0 {
        return canvas;
    }

    let (_, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
    let resized = image
        .resize_exact(w_new as u32, h_new as u32, FilterType::CatmullRom)
        .to_rgb8();
    let dx = width.saturating_sub(resized.width()) / 2;
    let dy = height.saturating_sub(resized.height()) / 2;
    image::imageops::replace(&mut canvas, &resized, dx as i64, dy as i64);
    canvas
}
