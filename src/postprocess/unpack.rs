// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 原始输出拆包: [batch, candidates, channels] → (推理, 注意力, 基函数)

use ndarray::{s, Array, Array3, Array4, ArrayView3, Axis};

use crate::error::{MaskError, Result};

/// 通道切分位置
///
/// channels = 5 + num_classes | attn_len | 基函数 (填充在每行末尾)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub inference_len: usize,
    pub attn_len: usize,
}

impl ChannelLayout {
    pub fn attn_end(&self) -> usize {
        self.inference_len + self.attn_len
    }
}

/// 基函数张量尺寸 (num_basis × height × width, 输入的 1/4 分辨率)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasisLayout {
    pub num_basis: usize,
    pub height: usize,
    pub width: usize,
}

impl BasisLayout {
    pub fn len(&self) -> usize {
        self.num_basis * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 拆包结果
#[derive(Debug, Clone)]
pub struct UnpackedOutput {
    /// [batch, candidates, 5 + nc]
    pub inference: Array3<f32>,
    /// [batch, candidates, attn_len]
    pub attention: Array3<f32>,
    /// [batch, num_basis, H/4, W/4]
    pub bases: Array4<f32>,
}

impl UnpackedOutput {
    pub fn batch(&self) -> usize {
        self.inference.len_of(Axis(0))
    }
}

/// 切分原始输出
///
/// 每张图片的剩余通道按行展开后截断到 `basis.len()`, 多出的部分静默丢弃;
/// 不足则说明模型与超参数不匹配, 直接报错。
pub fn unpack_inference(
    x: ArrayView3<f32>,
    channels: &ChannelLayout,
    basis: &BasisLayout,
) -> Result<UnpackedOutput> {
    let (batch, _, nch) = x.dim();
    let attn_end = channels.attn_end();
    if nch < attn_end {
        return Err(MaskError::MalformedOutput(format!(
            "通道数 {} 小于推理+注意力通道数 {}",
            nch, attn_end
        )));
    }

    let inference = x.slice(s![.., .., ..channels.inference_len]).to_owned();
    let attention = x
        .slice(s![.., .., channels.inference_len..attn_end])
        .to_owned();

    let bases_len = basis.len();
    let mut flat = Vec::with_capacity(batch * bases_len);
    for image in x.axis_iter(Axis(0)) {
        let rest = image.slice(s![.., attn_end..]);
        if rest.len() < bases_len {
            return Err(MaskError::MalformedOutput(format!(
                "基函数元素不足: 期望 {}, 实际 {}",
                bases_len,
                rest.len()
            )));
        }
        flat.extend(rest.iter().take(bases_len).copied());
    }

    let bases = Array::from_shape_vec((batch, basis.num_basis, basis.height, basis.width), flat)?;

    Ok(UnpackedOutput {
        inference,
        attention,
        bases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNELS: ChannelLayout = ChannelLayout {
        inference_len: 85,
        attn_len: 980,
    };

    #[test]
    fn test_unpack_shapes() {
        // 160×160 输入: 100 行 × 80 通道 = 5 × 40 × 40
        let x = Array3::<f32>::zeros((1, 100, 1145));
        let basis = BasisLayout {
            num_basis: 5,
            height: 40,
            width: 40,
        };
        let out = unpack_inference(x.view(), &CHANNELS, &basis).unwrap();
        assert_eq!(out.inference.dim(), (1, 100, 85));
        assert_eq!(out.attention.dim(), (1, 100, 980));
        assert_eq!(out.bases.dim(), (1, 5, 40, 40));
        assert_eq!(out.batch(), 1);
    }

    #[test]
    fn test_bases_follow_row_major_order() {
        let mut x = Array3::<f32>::zeros((1, 2, 1065 + 3));
        for r in 0..2 {
            for c in 0..3 {
                x[[0, r, 1065 + c]] = (r * 3 + c) as f32;
            }
        }
        x[[0, 0, 4]] = 0.7;
        x[[0, 1, 85]] = 0.3;
        let basis = BasisLayout {
            num_basis: 1,
            height: 2,
            width: 2,
        };
        let out = unpack_inference(x.view(), &CHANNELS, &basis).unwrap();
        // 6 个元素截断到 4 个
        assert_eq!(out.bases.iter().copied().collect::<Vec<_>>(), vec![0., 1., 2., 3.]);
        assert_eq!(out.inference[[0, 0, 4]], 0.7);
        assert_eq!(out.attention[[0, 1, 0]], 0.3);
    }

    #[test]
    fn test_undersized_bases() {
        let x = Array3::<f32>::zeros((1, 10, 1145));
        let basis = BasisLayout {
            num_basis: 5,
            height: 40,
            width: 40,
        };
        assert!(matches!(
            unpack_inference(x.view(), &CHANNELS, &basis),
            Err(MaskError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_too_few_channels() {
        let x = Array3::<f32>::zeros((1, 10, 100));
        let basis = BasisLayout {
            num_basis: 1,
            height: 1,
            width: 1,
        };
        assert!(unpack_inference(x.view(), &CHANNELS, &basis).is_err());
    }

    #[test]
    fn test_batch_bases_are_per_image() {
        let mut x = Array3::<f32>::zeros((2, 1, 1066));
        x[[0, 0, 1065]] = 1.0;
        x[[1, 0, 1065]] = 2.0;
        let basis = BasisLayout {
            num_basis: 1,
            height: 1,
            width: 1,
        };
        let out = unpack_inference(x.view(), &CHANNELS, &basis).unwrap();
        assert_eq!(out.bases[[0, 0, 0, 0]], 1.0);
        assert_eq!(out.bases[[1, 0, 0, 0]], 2.0);
    }
}
