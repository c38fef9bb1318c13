// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ROIAlignV2 池化: 在每个候选框位置裁剪并重采样基函数

use ndarray::{Array4, ArrayView2, ArrayView3, Axis};

use super::geometry::Bbox;

/// 单层 ROIAlign 池化器 (aligned = true)
///
/// 初始化后只读, 可在批内并行共享
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiPooler {
    output_size: usize,
    spatial_scale: f32,
    sampling_ratio: usize,
}

impl RoiPooler {
    pub fn new(output_size: usize, spatial_scale: f32) -> Self {
        Self {
            output_size,
            spatial_scale,
            sampling_ratio: 1,
        }
    }

    pub fn with_sampling_ratio(mut self, sampling_ratio: usize) -> Self {
        self.sampling_ratio = sampling_ratio;
        self
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// features: [C, H, W], boxes: 输入图像坐标 → [N, C, M, M]
    pub fn pool(&self, features: ArrayView3<f32>, boxes: &[Bbox]) -> Array4<f32> {
        let (channels, _, _) = features.dim();
        let m = self.output_size;
        let mut out = Array4::<f32>::zeros((boxes.len(), channels, m, m));

        for (mut roi_out, bbox) in out.axis_iter_mut(Axis(0)).zip(boxes) {
            // 半像素偏移
            let roi_start_w = bbox.xmin() * self.spatial_scale - 0.5;
            let roi_start_h = bbox.ymin() * self.spatial_scale - 0.5;
            let roi_end_w = bbox.xmax() * self.spatial_scale - 0.5;
            let roi_end_h = bbox.ymax() * self.spatial_scale - 0.5;

            let bin_w = (roi_end_w - roi_start_w) / m as f32;
            let bin_h = (roi_end_h - roi_start_h) / m as f32;

            let grid_w = if self.sampling_ratio > 0 {
                self.sampling_ratio
            } else {
                (bin_w.max(0.0).ceil() as usize).max(1)
            };
            let grid_h = if self.sampling_ratio > 0 {
                self.sampling_ratio
            } else {
                (bin_h.max(0.0).ceil() as usize).max(1)
            };
            let count = (grid_w * grid_h).max(1) as f32;

            for (c, mut plane) in roi_out.axis_iter_mut(Axis(0)).enumerate() {
                let feature = features.index_axis(Axis(0), c);
                for ph in 0..m {
                    for pw in 0..m {
                        let mut acc = 0.0f32;
                        for iy in 0..grid_h {
                            let y = roi_start_h
                                + ph as f32 * bin_h
                                + (iy as f32 + 0.5) * bin_h / grid_h as f32;
                            for ix in 0..grid_w {
                                let x = roi_start_w
                                    + pw as f32 * bin_w
                                    + (ix as f32 + 0.5) * bin_w / grid_w as f32;
                                acc += bilinear_interpolate(feature, y, x);
                            }
                        }
                        plane[[ph, pw]] = acc / count;
                    }
                }
            }
        }

        out
    }
}

/// ROIAlign 的采样规则: 超出一个像素以外为 0, 否则截到边界
fn bilinear_interpolate(feature: ArrayView2<f32>, y: f32, x: f32) -> f32 {
    let (height, width) = feature.dim();
    if height == 0 || width == 0 {
        return 0.0;
    }
    if y < -1.0 || y > height as f32 || x < -1.0 || x > width as f32 {
        return 0.0;
    }

    let mut y = y.max(0.0);
    let mut x = x.max(0.0);

    let mut y_low = y as usize;
    let y_high;
    if y_low >= height - 1 {
        y_low = height - 1;
        y_high = y_low;
        y = y_low as f32;
    } else {
        y_high = y_low + 1;
    }

    let mut x_low = x as usize;
    let x_high;
    if x_low >= width - 1 {
        x_low = width - 1;
        x_high = x_low;
        x = x_low as f32;
    } else {
        x_high = x_low + 1;
    }

    let ly = y - y_low as f32;
    let lx = x - x_low as f32;
    let hy = 1.0 - ly;
    let hx = 1.0 - lx;

    hy * hx * feature[[y_low, x_low]]
        + hy * lx * feature[[y_low, x_high]]
        + ly * hx * feature[[y_high, x_low]]
        + ly * lx * feature[[y_high, x_high]]
}
