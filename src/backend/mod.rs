// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 推理后端接口

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OrtBackend;

use ndarray::{Array3, Array4};

use crate::error::Result;
use crate::postprocess::BasisLayout;

/// 模型前向推理
///
/// 输入 [N, 3, H, W] (已归一化到 [0, 1]), 输出原始张量 [N, candidates, channels]。
/// 首次调用 `forward` 之前会以第一批输入调用一次 `specialize`, 之后输入尺寸固定。
pub trait InferenceBackend {
    /// 按首个输入尺寸做一次性预热 / 编译
    fn specialize(&mut self, spec: &Specialization, sample: &Array4<f32>) -> Result<()>;

    fn forward(&mut self, input: &Array4<f32>) -> Result<Array3<f32>>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn specialize(&mut self, spec: &Specialization, sample: &Array4<f32>) -> Result<()> {
        (**self).specialize(spec, sample)
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<Array3<f32>> {
        (**self).forward(input)
    }
}

/// 由首个输入尺寸推导出的常量, 生成器生命周期内只计算一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specialization {
    /// 输入空间尺寸 (height, width)
    pub input_size: (usize, usize),
    /// 基函数尺寸 (输入的 1/4)
    pub basis: BasisLayout,
    /// 模型输出打包常量
    pub target_size: usize,
    pub offset_size: usize,
    pub pad_size: usize,
}

impl Specialization {
    pub fn from_input_size(height: usize, width: usize, num_base: usize) -> Self {
        let basis = BasisLayout {
            num_basis: num_base,
            height: height / 4,
            width: width / 4,
        };
        let target_size = height * width * 1575 / 25600;
        let offset_size = basis.width * basis.height * 125 / 1600;
        let pad_size = if target_size == 0 {
            0
        } else {
            target_size - offset_size % target_size
        };

        Self {
            input_size: (height, width),
            basis,
            target_size,
            offset_size,
            pad_size,
        }
    }
}
