// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 掩码贴回: 池化分辨率掩码 → 整帧布尔掩码, 并按帧取并集

use ndarray::{Array2, ArrayView2, ArrayView3, Axis, Zip};
use rayon::prelude::*;

use super::geometry::Bbox;
use crate::utils::affine_transform::{warp_affine_f32, AffineMatrix, Region};
use crate::FrameMask;

/// 概率大于该值视为前景
pub const MASK_THRESHOLD: f32 = 0.5;

/// 把单个 M×M 概率掩码放到 `bbox` 所在位置, 输出 (height, width) 布尔掩码
///
/// 只在框外扩一个像素的范围内采样, 其余位置为 false
pub fn paste_mask(mask: ArrayView2<f32>, bbox: &Bbox, frame: (usize, usize)) -> FrameMask {
    let (height, width) = frame;
    let (mask_h, mask_w) = mask.dim();
    if mask_h == 0 || mask_w == 0 {
        return Array2::from_elem((height, width), false);
    }

    let matrix = AffineMatrix::box_placement(
        mask_w,
        mask_h,
        bbox.xmin(),
        bbox.ymin(),
        bbox.xmax(),
        bbox.ymax(),
    );
    let region = Region {
        x_begin: (bbox.xmin().floor() - 1.0).max(0.0) as usize,
        x_end: ((bbox.xmax().ceil() + 1.0).max(0.0) as usize).min(width),
        y_begin: (bbox.ymin().floor() - 1.0).max(0.0) as usize,
        y_end: ((bbox.ymax().ceil() + 1.0).max(0.0) as usize).min(height),
    };

    match warp_affine_f32(mask, &matrix, (width, height), region) {
        Some(probs) => probs.mapv(|p| p > MASK_THRESHOLD),
        // 退化框 (宽或高为 0) 不覆盖任何像素
        None => Array2::from_elem((height, width), false),
    }
}

/// 逐个贴回后取逻辑或, `masks[k]` 对应 `boxes[k]`
pub fn union_masks(masks: ArrayView3<f32>, boxes: &[Bbox], frame: (usize, usize)) -> FrameMask {
    let n = masks.len_of(Axis(0)).min(boxes.len());
    (0..n)
        .into_par_iter()
        .map(|k| paste_mask(masks.index_axis(Axis(0), k), &boxes[k], frame))
        .reduce(|| Array2::from_elem(frame, false), |mut acc, mask| {
            or_assign(&mut acc, &mask);
            acc
        })
}

pub fn or_assign(acc: &mut FrameMask, other: &FrameMask) {
    Zip::from(acc).and(other).for_each(|a, &b| *a |= b);
}
