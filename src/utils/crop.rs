/// 裁剪框调整
/// 把检测框扩展为与目标画面同宽高比的裁剪区域, 使裁剪后缩放的失真最小
use crate::postprocess::Bbox;

/// 计算裁剪区域
///
/// # 参数
/// - `bbox`: 检测框 (会先截断为整数)
/// - `target`: 目标画面尺寸 (width, height), 同时也是画面边界
/// - `aggressive`: 为 true 时搜索能精确匹配宽高比的最小裁剪, 否则使用 1/2 裁剪
///
/// 返回 [x1, y1, x2, y2]
pub fn fit_crop(bbox: &Bbox, target: (i32, i32), aggressive: bool) -> [i32; 4] {
    let (tw, th) = target;
    let full = [0, 0, tw.max(0), th.max(0)];
    if tw <= 0 || th <= 0 {
        return full;
    }

    let [x1, y1, x2, y2] = bbox.to_int();
    // 坐标可能在 i32 两端饱和, 宽高用 i64 计算
    let (tw, th) = (tw as i64, th as i64);
    let (bx1, by1, bx2, by2) = (x1 as i64, y1 as i64, x2 as i64, y2 as i64);
    let (bw, bh) = (bx2 - bx1, by2 - by1);
    if bw <= 0 || bh <= 0 {
        return full;
    }

    // 宽高比已一致
    if bw * th == bh * tw {
        return [x1, y1, x2, y2];
    }

    // 超过一半时放大会拉伸, 直接用整帧
    if 2 * bw >= tw || 2 * bh >= th {
        return full;
    }

    let (cw, ch) = if aggressive {
        let g = gcd(tw, th);
        let (uw, uh) = (tw / g, th / g);
        let m = ceil_div(bw, uw).max(ceil_div(bh, uh)).max(1);
        (m * uw, m * uh)
    } else if tw % 2 == 0 && th % 2 == 0 {
        // 2 倍整数缩放
        (tw / 2, th / 2)
    } else {
        (ceil_div(tw, 2), ceil_div(th, 2))
    };

    // 放置后落在 [0, t] 内, 转回 i32 不会截断
    let left = place((bx1 + bx2) / 2, cw, tw);
    let top = place((by1 + by2) / 2, ch, th);
    [
        left as i32,
        top as i32,
        (left + cw) as i32,
        (top + ch) as i32,
    ]
}

/// 裁剪区域放大回目标尺寸的倍率, 约分后的 (分子, 分母)
pub fn zoom_factor(crop: &[i32; 4], target_width: i32) -> (i32, i32) {
    let cw = crop[2] - crop[0];
    if cw <= 0 || target_width <= 0 {
        return (1, 1);
    }
    let g = gcd(target_width as i64, cw as i64) as i32;
    (target_width / g, cw / g)
}

/// 以 center 为中心放置长度 len, 越界时贴到另一侧边缘
fn place(center: i64, len: i64, bound: i64) -> i64 {
    let start = center - len / 2;
    if start < 0 {
        0
    } else if start + len > bound {
        bound - len
    } else {
        start
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs().max(1)
}

fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}
