// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 掩码生成器: 预处理 → 推理 → 拆包 → 过滤 → 贴回

use image::RgbImage;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::backend::{InferenceBackend, Specialization};
use crate::config::Hyperparameters;
use crate::error::{MaskError, Result};
use crate::postprocess::{
    most_center_box, union_masks, unpack_inference, BasisLayout, ChannelLayout, Detection,
    DetectionFilter, FrameDetections, NmsConfig, UnpackedOutput,
};
use crate::preprocess::frames_to_tensor;
use crate::FrameMask;

/// 掩码 + 检测框
#[derive(Debug, Clone, PartialEq)]
pub struct MaskData {
    pub found: bool,
    /// 所有人的并集, 帧分辨率
    pub mask: FrameMask,
    pub detections: Vec<Detection>,
}

/// 仅掩码
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMaskData {
    pub found: bool,
    pub mask: FrameMask,
}

/// 掩码 + 最居中框 [x1, y1, x2, y2]
#[derive(Debug, Clone, PartialEq)]
pub struct CenterMaskData {
    pub found: bool,
    pub mask: FrameMask,
    pub center_box: Option<[i32; 4]>,
}

impl CenterMaskData {
    pub fn not_found(height: usize, width: usize) -> Self {
        Self {
            found: false,
            mask: Array2::from_elem((height, width), false),
            center_box: None,
        }
    }
}

impl From<MaskData> for FrameMaskData {
    fn from(data: MaskData) -> Self {
        Self {
            found: data.found,
            mask: data.mask,
        }
    }
}

/// 人体掩码生成器
///
/// 第一次调用时按输入尺寸特化后端, 之后所有调用必须使用相同的空间尺寸,
/// 批大小可以变化。
pub struct MaskGenerator<B> {
    backend: B,
    hyp: Hyperparameters,
    filter: DetectionFilter,
    channels: ChannelLayout,
    specialization: Option<Specialization>,
}

impl<B: InferenceBackend> MaskGenerator<B> {
    pub fn new(backend: B, hyp: Hyperparameters, config: NmsConfig) -> Result<Self> {
        hyp.validate()?;
        let channels = ChannelLayout {
            inference_len: hyp.inference_len(),
            attn_len: hyp.attn_len(),
        };
        let filter = DetectionFilter::new(config, &hyp);
        info!(
            "掩码生成器: mask_resolution={}, attn_resolution={}, num_base={}, conf={}, iou={}",
            hyp.mask_resolution,
            hyp.attn_resolution,
            hyp.num_base,
            config.conf_threshold,
            config.iou_threshold
        );
        Ok(Self {
            backend,
            hyp,
            filter,
            channels,
            specialization: None,
        })
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyp
    }

    pub fn nms_config(&self) -> &NmsConfig {
        self.filter.config()
    }

    pub fn specialization(&self) -> Option<&Specialization> {
        self.specialization.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 批量生成掩码和检测框, 结果顺序与输入一致
    pub fn generate_list(&mut self, frames: &[RgbImage], flip_bgr_rgb: bool) -> Result<Vec<MaskData>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let (unpacked, frame) = self.infer(frames, flip_bgr_rgb)?;
        let results = self.filter.filter_batch(&unpacked)?;
        Ok(results
            .into_par_iter()
            .map(|r| compose(r, frame))
            .collect())
    }

    /// 单帧生成掩码和检测框
    pub fn generate_once(&mut self, frame: &RgbImage, flip_bgr_rgb: bool) -> Result<MaskData> {
        let (unpacked, size) = self.infer(std::slice::from_ref(frame), flip_bgr_rgb)?;
        let result = self.filter.filter_once(&unpacked)?;
        Ok(compose(result, size))
    }

    pub fn generate_mask_list(
        &mut self,
        frames: &[RgbImage],
        flip_bgr_rgb: bool,
    ) -> Result<Vec<FrameMaskData>> {
        Ok(self
            .generate_list(frames, flip_bgr_rgb)?
            .into_iter()
            .map(FrameMaskData::from)
            .collect())
    }

    pub fn generate_mask_once(&mut self, frame: &RgbImage, flip_bgr_rgb: bool) -> Result<FrameMaskData> {
        Ok(self.generate_once(frame, flip_bgr_rgb)?.into())
    }

    /// 单帧生成掩码, 并选出最居中 (可合并相邻) 的框
    pub fn generate_center_once(
        &mut self,
        frame: &RgbImage,
        flip_bgr_rgb: bool,
        grouping_range_scale: f32,
        disable_merge: bool,
    ) -> Result<CenterMaskData> {
        let data = self.generate_once(frame, flip_bgr_rgb)?;
        let boxes: Vec<_> = data.detections.iter().map(|d| d.bbox).collect();
        let selection = most_center_box(
            &boxes,
            data.mask.dim(),
            grouping_range_scale,
            disable_merge,
        );
        if let Some(selection) = &selection {
            debug!(
                "最居中框 {:?}, 未合并 {} 个",
                selection.pivot.to_int(),
                selection.residual.len()
            );
        }
        Ok(CenterMaskData {
            found: data.found,
            mask: data.mask,
            center_box: selection.map(|s| s.pivot.to_int()),
        })
    }

    fn infer(
        &mut self,
        frames: &[RgbImage],
        flip_bgr_rgb: bool,
    ) -> Result<(UnpackedOutput, (usize, usize))> {
        let input = frames_to_tensor(frames, flip_bgr_rgb)?;
        let (n, _, height, width) = input.dim();
        let basis = self.ensure_specialized(&input)?;

        let t = std::time::Instant::now();
        let raw = self.backend.forward(&input)?;
        debug!("推理耗时 {:?}, 输出形状 {:?}", t.elapsed(), raw.dim());
        if raw.dim().0 != n {
            return Err(MaskError::MalformedOutput(format!(
                "输出批大小 {} 与输入 {} 不一致",
                raw.dim().0,
                n
            )));
        }

        let unpacked = unpack_inference(raw.view(), &self.channels, &basis)?;
        Ok((unpacked, (height, width)))
    }

    /// 首次调用时特化, 之后拒绝不同的空间尺寸
    fn ensure_specialized(&mut self, input: &ndarray::Array4<f32>) -> Result<BasisLayout> {
        let (_, _, height, width) = input.dim();
        match self.specialization {
            Some(spec) if spec.input_size != (height, width) => Err(MaskError::ShapeMismatch {
                expected: spec.input_size,
                actual: (height, width),
            }),
            Some(spec) => Ok(spec.basis),
            None => {
                let spec = Specialization::from_input_size(height, width, self.hyp.num_base);
                info!(
                    "首次输入 {}x{}, 特化后端: 基函数 {}x{}x{}",
                    width, height, spec.basis.num_basis, spec.basis.height, spec.basis.width
                );
                self.backend.specialize(&spec, input)?;
                self.specialization = Some(spec);
                Ok(spec.basis)
            }
        }
    }
}

fn compose(result: Option<FrameDetections>, frame: (usize, usize)) -> MaskData {
    match result {
        Some(det) => {
            let mask = union_masks(det.masks.view(), &det.boxes(), frame);
            MaskData {
                found: true,
                mask,
                detections: det.detections,
            }
        }
        None => MaskData {
            found: false,
            mask: Array2::from_elem(frame, false),
            detections: Vec::new(),
        },
    }
}
