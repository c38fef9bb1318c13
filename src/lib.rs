#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod backend; // 推理后端接口
pub mod config; // 掩码分支超参数
pub mod error;
pub mod generator; // 掩码生成器
pub mod postprocess; // 模型输出后处理
pub mod preprocess;
pub mod record; // 录制 / 回放
pub mod utils;

pub use crate::backend::{InferenceBackend, Specialization};
pub use crate::config::Hyperparameters;
pub use crate::error::{MaskError, RecordError, Result};
pub use crate::generator::{CenterMaskData, FrameMaskData, MaskData, MaskGenerator};
pub use crate::postprocess::{Bbox, CenterBoxSelection, Detection, NmsConfig};
pub use crate::record::{CenterMaskSource, MaskRecord, RecordEntry, RecordingSource, ReplaySource};
pub use crate::utils::crop::fit_crop;

#[cfg(feature = "onnx")]
pub use crate::backend::OrtBackend;

/// 整帧布尔掩码 (height, width)
pub type FrameMask = ndarray::Array2<bool>;
