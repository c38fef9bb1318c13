/// 仿射变换工具模块
/// 用于把池化分辨率的掩码放回整帧坐标, 以及注意力系数的双线性缩放
use ndarray::{Array2, ArrayView2};

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl AffineMatrix {
    /// 创建单位仿射矩阵
    pub fn identity() -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: 1.0,
            b2: 0.0,
        }
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let new_x = self.a11 * x + self.a12 * y + self.b1;
        let new_y = self.a21 * x + self.a22 * y + self.b2;
        (new_x, new_y)
    }

    /// 计算逆矩阵 (用于反向映射)
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a11 * self.a22 - self.a12 * self.a21;
        if det.abs() < 1e-10 {
            return None; // 矩阵不可逆
        }

        let inv_det = 1.0 / det;
        Some(Self {
            a11: self.a22 * inv_det,
            a12: -self.a12 * inv_det,
            b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv_det,
            a21: -self.a21 * inv_det,
            a22: self.a11 * inv_det,
            b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv_det,
        })
    }

    /// 创建平移矩阵
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: dx,
            a21: 0.0,
            a22: 1.0,
            b2: dy,
        }
    }

    /// 创建缩放矩阵
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: sy,
            b2: 0.0,
        }
    }

    /// 矩阵组合 (self * other), 先应用 other
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }

    /// 把 src_w × src_h 的像素网格放到目标框 (x0, y0, x1, y1) 上 (像素中心对齐)
    pub fn box_placement(src_w: usize, src_h: usize, x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        let sx = (x1 - x0) / src_w as f32;
        let sy = (y1 - y0) / src_h as f32;
        let t = Self::translation(x0 + 0.5 * sx - 0.5, y0 + 0.5 * sy - 0.5);
        t.compose(&Self::scale(sx, sy))
    }
}

/// 目标图像中的矩形区域 [x_begin, x_end) × [y_begin, y_end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x_begin: usize,
    pub x_end: usize,
    pub y_begin: usize,
    pub y_end: usize,
}

/// 仿射变换 (单通道浮点图, 双线性插值, 常数 0 边界)
///
/// 只计算 `region` 内的像素, 区域外保持 0
///
/// # 参数
/// - `src`: 源图像 (height x width)
/// - `matrix`: 源 → 目标 的仿射变换矩阵
/// - `dst_size`: 目标图像尺寸 (width, height)
pub fn warp_affine_f32(
    src: ArrayView2<f32>,
    matrix: &AffineMatrix,
    dst_size: (usize, usize),
    region: Region,
) -> Option<Array2<f32>> {
    let (dst_width, dst_height) = dst_size;
    let mut dst = Array2::<f32>::zeros((dst_height, dst_width));

    // 使用逆变换进行反向映射
    let inv_matrix = matrix.inverse()?;

    for dst_y in region.y_begin..region.y_end.min(dst_height) {
        for dst_x in region.x_begin..region.x_end.min(dst_width) {
            let (src_x, src_y) = inv_matrix.transform_point(dst_x as f32, dst_y as f32);
            dst[[dst_y, dst_x]] = get_pixel_bilinear(src, src_x, src_y);
        }
    }

    Some(dst)
}

/// 双线性插值, 越界像素按 0 处理
fn get_pixel_bilinear(src: ArrayView2<f32>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_border_pixel(src, x0, y0);
    let p01 = get_border_pixel(src, x0, y1);
    let p10 = get_border_pixel(src, x1, y0);
    let p11 = get_border_pixel(src, x1, y1);

    let v0 = p00 * (1.0 - fx) + p10 * fx;
    let v1 = p01 * (1.0 - fx) + p11 * fx;
    v0 * (1.0 - fy) + v1 * fy
}

fn get_border_pixel(src: ArrayView2<f32>, x: i32, y: i32) -> f32 {
    let (height, width) = src.dim();
    if x >= 0 && x < width as i32 && y >= 0 && y < height as i32 {
        src[[y as usize, x as usize]]
    } else {
        0.0
    }
}

/// 双线性缩放 (半像素对齐, 不对齐角点)
///
/// 源坐标 = (dst + 0.5) * in / out - 0.5, 负值截为 0, 上邻点截到最后一行/列
pub fn resize_bilinear(src: ArrayView2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (in_h, in_w) = src.dim();
    let mut dst = Array2::<f32>::zeros((out_h, out_w));
    if in_h == 0 || in_w == 0 {
        return dst;
    }

    let scale_h = in_h as f32 / out_h as f32;
    let scale_w = in_w as f32 / out_w as f32;

    let source_index = |dst: usize, scale: f32, len: usize| -> (usize, usize, f32) {
        let src = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(len - 1);
        let i1 = (i0 + 1).min(len - 1);
        (i0, i1, src - i0 as f32)
    };

    for oy in 0..out_h {
        let (y0, y1, ly) = source_index(oy, scale_h, in_h);
        for ox in 0..out_w {
            let (x0, x1, lx) = source_index(ox, scale_w, in_w);
            let top = src[[y0, x0]] * (1.0 - lx) + src[[y0, x1]] * lx;
            let bottom = src[[y1, x0]] * (1.0 - lx) + src[[y1, x1]] * lx;
            dst[[oy, ox]] = top * (1.0 - ly) + bottom * ly;
        }
    }

    dst
}
