// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 掩码合成: 池化基函数 × softmax(注意力系数) → 每个候选框的概率掩码

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, ArrayView4, Axis};

use super::geometry::Bbox;
use super::roi_align::RoiPooler;
use crate::config::Hyperparameters;
use crate::error::{MaskError, Result};
use crate::utils::affine_transform::resize_bilinear;

/// 合成结果
#[derive(Debug, Clone)]
pub struct SynthesizedMasks {
    /// [N, M*M] sigmoid 概率
    pub probs: Array2<f32>,
    /// [N] 掩码置信度
    pub scores: Array1<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct MaskSynthesizer {
    pooler: RoiPooler,
    attn_resolution: usize,
    num_base: usize,
}

impl MaskSynthesizer {
    pub fn new(hyp: &Hyperparameters) -> Self {
        Self {
            pooler: RoiPooler::new(hyp.mask_resolution, hyp.pooler_scale),
            attn_resolution: hyp.attn_resolution,
            num_base: hyp.num_base,
        }
    }

    pub fn mask_resolution(&self) -> usize {
        self.pooler.output_size()
    }

    /// bases: [num_base, H/4, W/4], attention: [N, attn_len]
    pub fn synthesize(
        &self,
        bases: ArrayView3<f32>,
        boxes: &[Bbox],
        attention: ArrayView2<f32>,
    ) -> Result<SynthesizedMasks> {
        let rois = self.pooler.pool(bases, boxes);
        let merged = merge_bases(
            rois.view(),
            attention,
            self.attn_resolution,
            self.num_base,
        )?;
        let n = merged.len_of(Axis(0));
        let probs = merged
            .into_shape_with_order((n, self.mask_resolution() * self.mask_resolution()))?
            .mapv(sigmoid);
        let scores = mask_confidence(probs.view());
        Ok(SynthesizedMasks { probs, scores })
    }
}

/// 按注意力系数加权合并基函数 (未经过 sigmoid)
///
/// rois: [N, num_base, H, W], coeffs: [N, num_base * attn_res²] → [N, H, W]
pub fn merge_bases(
    rois: ArrayView4<f32>,
    coeffs: ArrayView2<f32>,
    attn_res: usize,
    num_base: usize,
) -> Result<Array3<f32>> {
    let (n, nb, h, w) = rois.dim();
    if nb != num_base {
        return Err(MaskError::MalformedOutput(format!(
            "池化通道数 {} 与基函数数量 {} 不一致",
            nb, num_base
        )));
    }
    if coeffs.nrows() != n || coeffs.ncols() != num_base * attn_res * attn_res {
        return Err(MaskError::MalformedOutput(format!(
            "注意力系数形状 {:?} 与 ({}, {}×{}×{}) 不一致",
            coeffs.dim(),
            n,
            num_base,
            attn_res,
            attn_res
        )));
    }

    let mut merged = Array3::<f32>::zeros((n, h, w));
    for ((roi, coeff), mut out) in rois
        .axis_iter(Axis(0))
        .zip(coeffs.axis_iter(Axis(0)))
        .zip(merged.axis_iter_mut(Axis(0)))
    {
        let coeff = coeff.into_shape_with_order((num_base, attn_res, attn_res))?;
        let resized: Vec<Array2<f32>> = coeff
            .axis_iter(Axis(0))
            .map(|c| resize_bilinear(c, h, w))
            .collect();

        for y in 0..h {
            for x in 0..w {
                // softmax over basis
                let max = resized
                    .iter()
                    .map(|c| c[[y, x]])
                    .fold(f32::NEG_INFINITY, f32::max);
                let mut denom = 0.0f32;
                let mut acc = 0.0f32;
                for (b, c) in resized.iter().enumerate() {
                    let e = (c[[y, x]] - max).exp();
                    denom += e;
                    acc += roi[[b, y, x]] * e;
                }
                out[[y, x]] = acc / denom;
            }
        }
    }

    Ok(merged)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 掩码置信度: 低于 0.5 的概率翻转为 1 - p, 取对数均值再取指数
///
/// 结果在 (0, 1], 掩码越"模糊"越低
pub fn mask_confidence(probs: ArrayView2<f32>) -> Array1<f32> {
    probs
        .axis_iter(Axis(0))
        .map(|row| {
            if row.is_empty() {
                return 1.0;
            }
            let log_sum: f32 = row
                .iter()
                .map(|&p| if p < 0.5 { 1.0 - p } else { p })
                .map(f32::ln)
                .sum();
            (log_sum / row.len() as f32).exp()
        })
        .collect()
}
