// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 错误类型定义

use thiserror::Error;

/// 掩码生成流水线错误
///
/// "未检测到人" 不是错误, 而是 `found == false` 的正常结果
#[derive(Error, Debug)]
pub enum MaskError {
    #[error("模型输出格式错误: {0}")]
    MalformedOutput(String),
    #[error("输入尺寸 {actual:?} 与首次特化尺寸 {expected:?} 不一致, 不支持重新特化")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("批次内帧尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
    InconsistentFrames {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("超参数无效: {0}")]
    InvalidHyperparameter(String),
    #[error("超参数文件读取失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("超参数解析失败: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("张量形状错误: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("推理后端错误: {0}")]
    Backend(String),
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// 录制/回放文件错误
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("录制文件读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("录制文件序列化失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("录制序列长度不一致: exists={exists}, masks={masks}, boxes={boxes}, count={count}")]
    LengthMismatch {
        exists: usize,
        masks: usize,
        boxes: usize,
        count: usize,
    },
    #[error("掩码尺寸 {actual:?} 与录制尺寸 {expected:?} 不一致")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("第 {index} 个掩码长度错误: 期望 {expected} 字节, 实际 {actual} 字节")]
    CorruptMask {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("录制掩码尺寸无效: {shape:?}")]
    InvalidShape { shape: (usize, usize) },
    #[error("第 {index} 个框长度错误: {len}")]
    CorruptBox { index: usize, len: usize },
    #[error("写入校验失败: 回读数据与内存数据不一致")]
    RoundTripMismatch,
}

pub type Result<T, E = MaskError> = std::result::Result<T, E>;
