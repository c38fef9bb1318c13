// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 候选过滤与 NMS: 置信度门限 → 掩码合成 → 分数融合 → 标签选择 → 仅保留人 → 类别偏移 NMS

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use tracing::debug;

use super::geometry::{xywh2xyxy, Bbox};
use super::synth::MaskSynthesizer;
use super::unpack::UnpackedOutput;
use crate::config::Hyperparameters;
use crate::error::Result;

/// COCO 中 "person" 的类别索引
pub const PERSON_CLASS: usize = 0;

/// 过滤参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsConfig {
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    /// 类别偏移量 (像素), 需大于任何框的宽高
    pub max_wh: f32,
    /// 每帧最多保留的检测数
    pub max_det: usize,
    pub person_class: usize,
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.1,
            iou_threshold: 0.6,
            max_wh: 4096.0,
            max_det: 300,
            person_class: PERSON_CLASS,
        }
    }
}

impl NmsConfig {
    pub fn new(conf_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            conf_threshold,
            iou_threshold,
            ..Default::default()
        }
    }
}

/// 过滤后保留的检测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub confidence: f32,
    pub class_id: usize,
}

/// 一帧的检测结果, `masks[k]` 对应 `detections[k]`
#[derive(Debug, Clone)]
pub struct FrameDetections {
    pub detections: Vec<Detection>,
    /// [n, M, M] 池化分辨率的概率掩码
    pub masks: Array3<f32>,
}

impl FrameDetections {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn boxes(&self) -> Vec<Bbox> {
        self.detections.iter().map(|d| d.bbox).collect()
    }
}

/// 候选框过滤器, 构造后只读, 批内各图片并行共享
#[derive(Debug, Clone, Copy)]
pub struct DetectionFilter {
    config: NmsConfig,
    synth: MaskSynthesizer,
    multi_label: bool,
}

impl DetectionFilter {
    pub fn new(config: NmsConfig, hyp: &Hyperparameters) -> Self {
        Self {
            config,
            synth: MaskSynthesizer::new(hyp),
            multi_label: hyp.multi_label(),
        }
    }

    pub fn config(&self) -> &NmsConfig {
        &self.config
    }

    pub fn mask_resolution(&self) -> usize {
        self.synth.mask_resolution()
    }

    /// 批量过滤, 每张图片独立执行, 结果顺序与批次一致
    pub fn filter_batch(&self, unpacked: &UnpackedOutput) -> Result<Vec<Option<FrameDetections>>> {
        (0..unpacked.batch())
            .into_par_iter()
            .map(|xi| self.filter_index(unpacked, xi))
            .collect()
    }

    /// 只处理批次中的第一张图片
    pub fn filter_once(&self, unpacked: &UnpackedOutput) -> Result<Option<FrameDetections>> {
        self.filter_index(unpacked, 0)
    }

    fn filter_index(&self, unpacked: &UnpackedOutput, xi: usize) -> Result<Option<FrameDetections>> {
        self.filter_frame(
            unpacked.inference.index_axis(Axis(0), xi),
            unpacked.attention.index_axis(Axis(0), xi),
            unpacked.bases.index_axis(Axis(0), xi),
        )
    }

    /// 单帧过滤
    ///
    /// - inference: [candidates, 5 + nc]
    /// - attention: [candidates, attn_len]
    /// - bases: [num_base, H/4, W/4]
    ///
    /// 没有剩余候选时返回 `None` (未找到), 这不是错误
    pub fn filter_frame(
        &self,
        inference: ArrayView2<f32>,
        attention: ArrayView2<f32>,
        bases: ArrayView3<f32>,
    ) -> Result<Option<FrameDetections>> {
        let conf_thres = self.config.conf_threshold;

        // 置信度门限
        let xc: Vec<usize> = inference
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row[4] > conf_thres)
            .map(|(i, _)| i)
            .collect();
        if xc.is_empty() {
            return Ok(None);
        }

        let x = inference.select(Axis(0), &xc);
        let a = attention.select(Axis(0), &xc);

        // Box (center x, center y, width, height) to (x1, y1, x2, y2)
        let boxes = xywh2xyxy(x.slice(s![.., ..4]));
        let bboxes: Vec<Bbox> = boxes
            .axis_iter(Axis(0))
            .map(|b| Bbox::new(b[0], b[1], b[2], b[3]))
            .collect();

        let masks = self.synth.synthesize(bases, &bboxes, a.view())?;

        // 分数融合: cls * obj * mask_score
        let mut cls = x.slice(s![.., 5..]).to_owned();
        for (i, mut row) in cls.axis_iter_mut(Axis(0)).enumerate() {
            let factor = x[[i, 4]] * masks.scores[i];
            row.mapv_inplace(|v| v * factor);
        }

        // (候选索引, 类别, 分数)
        let mut entries: Vec<(usize, usize, f32)> = Vec::new();
        if self.multi_label {
            for (i, row) in cls.axis_iter(Axis(0)).enumerate() {
                for (j, &score) in row.iter().enumerate() {
                    if score > conf_thres {
                        entries.push((i, j, score));
                    }
                }
            }
        } else {
            // best class only
            for (i, row) in cls.axis_iter(Axis(0)).enumerate() {
                let (j, score) = row
                    .iter()
                    .enumerate()
                    .fold((0usize, f32::NEG_INFINITY), |best, (j, &v)| {
                        if v > best.1 {
                            (j, v)
                        } else {
                            best
                        }
                    });
                if score > conf_thres {
                    entries.push((i, j, score));
                }
            }
        }

        // 仅保留人
        entries.retain(|&(_, j, _)| j == self.config.person_class);
        if entries.is_empty() {
            return Ok(None);
        }

        // Batched NMS: 按类别偏移, 不同类别互不抑制
        let mut offset_boxes = Array2::<f32>::zeros((entries.len(), 4));
        let mut scores = Array1::<f32>::zeros(entries.len());
        for (k, &(i, j, score)) in entries.iter().enumerate() {
            let c = j as f32 * self.config.max_wh;
            for d in 0..4 {
                offset_boxes[[k, d]] = boxes[[i, d]] + c;
            }
            scores[k] = score;
        }

        let mut keep =
            non_max_suppression(offset_boxes.view(), scores.view(), self.config.iou_threshold);
        keep.truncate(self.config.max_det);

        let detections: Vec<Detection> = keep
            .iter()
            .map(|&k| {
                let (i, j, score) = entries[k];
                Detection {
                    bbox: bboxes[i],
                    confidence: score,
                    class_id: j,
                }
            })
            .collect();

        let mask_index: Vec<usize> = keep.iter().map(|&k| entries[k].0).collect();
        let m = self.mask_resolution();
        let masks = masks
            .probs
            .select(Axis(0), &mask_index)
            .into_shape_with_order((keep.len(), m, m))?;

        debug!(
            "候选 {} 个, 标签 {} 个, NMS 后保留 {} 个",
            xc.len(),
            entries.len(),
            detections.len()
        );

        Ok(Some(FrameDetections { detections, masks }))
    }
}

/// 非极大值抑制
///
/// boxes: [N, 4] 角点框, 返回按分数降序排列的保留索引; 分数相同按原顺序
pub fn non_max_suppression(
    boxes: ArrayView2<f32>,
    scores: ArrayView1<f32>,
    iou_threshold: f32,
) -> Vec<usize> {
    let n = boxes.nrows();
    let bboxes: Vec<Bbox> = boxes
        .axis_iter(Axis(0))
        .map(|b| Bbox::new(b[0], b[1], b[2], b[3]))
        .collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; n];
    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[pos + 1..] {
            if !suppressed[j] && bboxes[i].iou(&bboxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3 as A3};
    use rand::Rng;

    fn small_hyp(num_classes: usize) -> Hyperparameters {
        Hyperparameters {
            mask_resolution: 4,
            attn_resolution: 1,
            num_base: 1,
            pooler_scale: 0.25,
            num_classes,
        }
    }

    /// rows: (cx, cy, w, h, obj, 各类别分数)
    fn frame(rows: &[(f32, f32, f32, f32, f32, Vec<f32>)]) -> (Array2<f32>, Array2<f32>, A3<f32>) {
        let nc = rows[0].5.len();
        let mut inference = Array2::<f32>::zeros((rows.len(), 5 + nc));
        for (i, (cx, cy, w, h, obj, cls)) in rows.iter().enumerate() {
            inference[[i, 0]] = *cx;
            inference[[i, 1]] = *cy;
            inference[[i, 2]] = *w;
            inference[[i, 3]] = *h;
            inference[[i, 4]] = *obj;
            for (j, c) in cls.iter().enumerate() {
                inference[[i, 5 + j]] = *c;
            }
        }
        let attention = Array2::<f32>::zeros((rows.len(), 1));
        // 40×40 输入对应 10×10 基函数, 常数 4 → 掩码置信度 sigmoid(4)
        let bases = A3::<f32>::from_elem((1, 10, 10), 4.0);
        (inference, attention, bases)
    }

    fn run(
        filter: &DetectionFilter,
        data: &(Array2<f32>, Array2<f32>, A3<f32>),
    ) -> Option<FrameDetections> {
        filter
            .filter_frame(data.0.view(), data.1.view(), data.2.view())
            .unwrap()
    }

    #[test]
    fn test_no_candidates() {
        let filter = DetectionFilter::new(NmsConfig::default(), &small_hyp(2));
        let data = frame(&[(20., 20., 10., 10., 0.0, vec![1.0, 0.0])]);
        assert!(run(&filter, &data).is_none());
    }

    #[test]
    fn test_overlapping_persons_keep_highest() {
        let filter = DetectionFilter::new(NmsConfig::new(0.1, 0.6), &small_hyp(2));
        // [10,10,30,30] 与 [11,10,31,30], IoU ≈ 0.905
        let data = frame(&[
            (20., 20., 20., 20., 0.8, vec![1.0, 0.0]),
            (21., 20., 20., 20., 0.9, vec![1.0, 0.0]),
        ]);
        let out = run(&filter, &data).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.detections[0].bbox, Bbox::new(11., 10., 31., 30.));
        let expected = 0.9 * crate::postprocess::synth::sigmoid(4.0);
        assert!((out.detections[0].confidence - expected).abs() < 1e-4);
        assert_eq!(out.masks.dim(), (1, 4, 4));
    }

    #[test]
    fn test_threshold_at_one_never_found() {
        let filter = DetectionFilter::new(NmsConfig::new(1.0, 0.6), &small_hyp(2));
        let data = frame(&[(20., 20., 20., 20., 1.0, vec![1.0, 1.0])]);
        assert!(run(&filter, &data).is_none());
    }

    #[test]
    fn test_non_person_discarded() {
        let filter = DetectionFilter::new(NmsConfig::default(), &small_hyp(2));
        let data = frame(&[(20., 20., 20., 20., 0.9, vec![0.05, 0.9])]);
        assert!(run(&filter, &data).is_none());
    }

    #[test]
    fn test_multi_label_keeps_person_label() {
        let filter = DetectionFilter::new(NmsConfig::default(), &small_hyp(2));
        let data = frame(&[(20., 20., 20., 20., 0.9, vec![0.5, 0.6])]);
        let out = run(&filter, &data).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.detections[0].class_id, PERSON_CLASS);
    }

    #[test]
    fn test_single_label_uses_best_class() {
        let filter = DetectionFilter::new(NmsConfig::default(), &small_hyp(1));
        let data = frame(&[(20., 20., 20., 20., 0.9, vec![0.7])]);
        let out = run(&filter, &data).unwrap();
        assert_eq!(out.len(), 1);
        let expected = 0.63 * crate::postprocess::synth::sigmoid(4.0);
        assert!((out.detections[0].confidence - expected).abs() < 1e-4);
    }

    #[test]
    fn test_max_det_cap() {
        let config = NmsConfig {
            max_det: 3,
            ..Default::default()
        };
        let filter = DetectionFilter::new(config, &small_hyp(2));
        let rows: Vec<_> = (0..5)
            .map(|i| (4. + 8. * i as f32, 20., 6., 6., 0.5 + 0.1 * i as f32, vec![1.0, 0.0]))
            .collect();
        let out = run(&filter, &frame(&rows)).unwrap();
        assert_eq!(out.len(), 3);
        let scores: Vec<f32> = out.detections.iter().map(|d| d.confidence).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(out.detections[0].bbox.cxcy(), (36., 20.));
    }

    #[test]
    fn test_nms_class_offset_separates_classes() {
        let boxes = array![[0.0f32, 0.0, 10.0, 10.0], [4096.0, 4096.0, 4106.0, 4106.0]];
        let scores = array![0.9f32, 0.8];
        assert_eq!(non_max_suppression(boxes.view(), scores.view(), 0.5), vec![0, 1]);
    }

    #[test]
    fn test_nms_ties_keep_first() {
        let boxes = array![[0.0f32, 0.0, 10.0, 10.0], [0.0, 0.0, 10.0, 10.0]];
        let scores = array![0.5f32, 0.5];
        assert_eq!(non_max_suppression(boxes.view(), scores.view(), 0.5), vec![0]);
    }

    #[test]
    fn test_nms_nan_scores() {
        let boxes = array![
            [0.0f32, 0.0, 10.0, 10.0],
            [20.0, 0.0, 30.0, 10.0],
            [40.0, 0.0, 50.0, 10.0],
            [0.0, 0.0, 10.0, 10.0],
        ];
        let scores = array![0.3f32, f32::NAN, 0.9, -f32::NAN];
        let keep = non_max_suppression(boxes.view(), scores.view(), 0.5);
        // 正 NaN 排最前, 负 NaN 排最后并被第 0 个框抑制
        assert_eq!(keep, vec![1, 2, 0]);
    }

    #[test]
    fn test_nms_survivors_below_threshold() {
        let mut rng = rand::thread_rng();
        let n = 64;
        let mut boxes = Array2::<f32>::zeros((n, 4));
        let mut scores = Array1::<f32>::zeros(n);
        for i in 0..n {
            let x: f32 = rng.gen_range(0.0..100.0);
            let y: f32 = rng.gen_range(0.0..100.0);
            let w: f32 = rng.gen_range(5.0..40.0);
            let h: f32 = rng.gen_range(5.0..40.0);
            boxes.row_mut(i).assign(&array![x, y, x + w, y + h]);
            scores[i] = rng.gen_range(0.0..1.0);
        }
        let iou = 0.45;
        let keep = non_max_suppression(boxes.view(), scores.view(), iou);
        for (a, &i) in keep.iter().enumerate() {
            for &j in &keep[a + 1..] {
                let bi = Bbox::new(boxes[[i, 0]], boxes[[i, 1]], boxes[[i, 2]], boxes[[i, 3]]);
                let bj = Bbox::new(boxes[[j, 0]], boxes[[j, 1]], boxes[[j, 2]], boxes[[j, 3]]);
                assert!(bi.iou(&bj) <= iou);
            }
        }
    }
}
