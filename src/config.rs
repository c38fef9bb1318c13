// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 模型超参数 (hyp.*.yaml)

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{MaskError, Result};

/// 掩码分支超参数
///
/// 直接读取训练时的 hyp yaml, 其余训练字段 (lr0, momentum ...) 被忽略。
/// 构造后不可变。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hyperparameters {
    /// 池化掩码边长 (ROIAlign 输出尺寸)
    pub mask_resolution: usize,
    /// 注意力系数边长
    pub attn_resolution: usize,
    /// 基函数数量
    pub num_base: usize,
    /// 基函数相对输入的缩放 (基函数为 1/4 分辨率)
    #[serde(default = "default_pooler_scale")]
    pub pooler_scale: f32,
    /// 类别数量 (COCO)
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
}

fn default_pooler_scale() -> f32 {
    0.25
}

fn default_num_classes() -> usize {
    80
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            mask_resolution: 56,
            attn_resolution: 14,
            num_base: 5,
            pooler_scale: default_pooler_scale(),
            num_classes: default_num_classes(),
        }
    }
}

impl Hyperparameters {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("加载超参数文件: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let hyp: Hyperparameters = serde_yaml::from_str(content)?;
        hyp.validate()?;
        debug!("超参数: {:?}", hyp);
        Ok(hyp)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("mask_resolution", self.mask_resolution),
            ("attn_resolution", self.attn_resolution),
            ("num_base", self.num_base),
            ("num_classes", self.num_classes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(MaskError::InvalidHyperparameter(format!(
                    "{} 必须大于 0",
                    name
                )));
            }
        }
        if !(self.pooler_scale > 0.0) {
            return Err(MaskError::InvalidHyperparameter(format!(
                "pooler_scale 必须大于 0, 实际为 {}",
                self.pooler_scale
            )));
        }
        Ok(())
    }

    /// 单个候选框的注意力系数长度 (num_base × attn_res²)
    pub fn attn_len(&self) -> usize {
        self.num_base * self.attn_resolution * self.attn_resolution
    }

    /// 每个候选框的 box + objectness + 类别分数通道数
    pub fn inference_len(&self) -> usize {
        5 + self.num_classes
    }

    /// 多类别时逐 (候选框, 类别) 展开
    pub fn multi_label(&self) -> bool {
        self.num_classes > 1
    }
}
