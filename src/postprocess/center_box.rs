// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 最居中框: 在多个检测中选出画面主体, 并可合并与其相邻的框

use super::geometry::Bbox;

/// 选择结果: 主体框 (可能由多个框合并) 与未合并的其余框
#[derive(Debug, Clone, PartialEq)]
pub struct CenterBoxSelection {
    pub pivot: Bbox,
    pub residual: Vec<Bbox>,
}

/// 选出离画面中心最近的框
///
/// - frame: (height, width)
/// - grouping_range_scale: 合并半径 = scale × sqrt(主体框面积)
/// - disable_merge: 为 true 时只选择, 不合并
///
/// 距离相同时取先出现的框。没有输入框时返回 `None`。
pub fn most_center_box(
    boxes: &[Bbox],
    frame: (usize, usize),
    grouping_range_scale: f32,
    disable_merge: bool,
) -> Option<CenterBoxSelection> {
    let (height, width) = frame;
    let (fcx, fcy) = (width as f32 / 2.0, height as f32 / 2.0);

    let mut pivot_index = 0;
    let mut best = f32::INFINITY;
    for (i, bbox) in boxes.iter().enumerate() {
        let (cx, cy) = bbox.cxcy();
        let distance = ((cx - fcx).powi(2) + (cy - fcy).powi(2)).sqrt();
        if distance < best {
            best = distance;
            pivot_index = i;
        }
    }
    let pivot = *boxes.get(pivot_index)?;

    let others = boxes
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != pivot_index)
        .map(|(_, b)| *b);

    if disable_merge || boxes.len() == 1 {
        return Some(CenterBoxSelection {
            pivot,
            residual: others.collect(),
        });
    }

    let range = grouping_range_scale * pivot.area().max(0.0).sqrt();
    let (pcx, pcy) = pivot.cxcy();
    let (phw, phh) = pivot.half_extent();

    let mut merged = pivot;
    let mut residual = Vec::new();
    for bbox in others {
        let (cx, cy) = bbox.cxcy();
        let (hw, hh) = bbox.half_extent();
        let gap_x = (cx - pcx).abs() - hw - phw;
        let gap_y = (cy - pcy).abs() - hh - phh;
        if gap_x < range && gap_y < range {
            merged = merged.enclose(&bbox);
        } else {
            residual.push(bbox);
        }
    }

    Some(CenterBoxSelection {
        pivot: merged,
        residual,
    })
}
