// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 边界框几何: 中心编码 → 角点编码, 中心/面积, IoU

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// 角点形式的边界框 (x1, y1, x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bbox {
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2., cy - h / 2., cx + w / 2., cy + h / 2.)
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmax
    }

    pub fn ymax(&self) -> f32 {
        self.ymax
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn cxcy(&self) -> (f32, f32) {
        ((self.xmin + self.xmax) / 2., (self.ymin + self.ymax) / 2.)
    }

    /// 中心到左上角的距离 (半宽, 半高)
    pub fn half_extent(&self) -> (f32, f32) {
        let (cx, cy) = self.cxcy();
        (cx - self.xmin, cy - self.ymin)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax.min(another.xmax);
        let t = self.ymin.max(another.ymin);
        let b = self.ymax.min(another.ymax);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union > 0. {
            self.intersection_area(another) / union
        } else {
            0.
        }
    }

    /// 同时包含两个框的最小外接框
    pub fn enclose(&self, another: &Bbox) -> Bbox {
        Bbox::new(
            self.xmin.min(another.xmin),
            self.ymin.min(another.ymin),
            self.xmax.max(another.xmax),
            self.ymax.max(another.ymax),
        )
    }

    /// 截断取整
    pub fn to_int(&self) -> [i32; 4] {
        [
            self.xmin as i32,
            self.ymin as i32,
            self.xmax as i32,
            self.ymax as i32,
        ]
    }
}

impl From<[f32; 4]> for Bbox {
    fn from(v: [f32; 4]) -> Self {
        Bbox::new(v[0], v[1], v[2], v[3])
    }
}

/// [cx, cy, w, h] → [x1, y1, x2, y2], 对 N×4 批量转换
pub fn xywh2xyxy(x: ArrayView2<f32>) -> Array2<f32> {
    let mut y = x.to_owned();
    for (mut dst, src) in y.axis_iter_mut(Axis(0)).zip(x.axis_iter(Axis(0))) {
        dst[0] = src[0] - src[2] / 2.; // top left x
        dst[1] = src[1] - src[3] / 2.; // top left y
        dst[2] = src[0] + src[2] / 2.; // bottom right x
        dst[3] = src[1] + src[3] / 2.; // bottom right y
    }
    y
}

/// 角点框的中心 (N×2) 与面积 (N)
pub fn centers_and_areas(boxes: ArrayView2<f32>) -> (Array2<f32>, Array1<f32>) {
    let n = boxes.nrows();
    let mut centers = Array2::<f32>::zeros((n, 2));
    let mut areas = Array1::<f32>::zeros(n);
    for (i, b) in boxes.axis_iter(Axis(0)).enumerate() {
        centers[[i, 0]] = (b[0] + b[2]) / 2.;
        centers[[i, 1]] = (b[1] + b[3]) / 2.;
        areas[i] = (b[2] - b[0]) * (b[3] - b[1]);
    }
    (centers, areas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_xywh2xyxy_recovers_input() {
        let xywh = array![[50.0f32, 40.0, 20.0, 10.0], [3.5, 7.25, 1.0, 0.5]];
        let xyxy = xywh2xyxy(xywh.view());
        assert_eq!(xyxy.row(0).to_vec(), vec![40.0, 35.0, 60.0, 45.0]);

        for (src, b) in xywh.axis_iter(Axis(0)).zip(xyxy.axis_iter(Axis(0))) {
            let cx = (b[0] + b[2]) / 2.;
            let cy = (b[1] + b[3]) / 2.;
            let w = b[2] - b[0];
            let h = b[3] - b[1];
            assert!((cx - src[0]).abs() < 1e-5);
            assert!((cy - src[1]).abs() < 1e-5);
            assert!((w - src[2]).abs() < 1e-5);
            assert!((h - src[3]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_centers_and_areas() {
        let boxes = array![[0.0f32, 0.0, 10.0, 20.0], [5.0, 5.0, 7.0, 9.0]];
        let (centers, areas) = centers_and_areas(boxes.view());
        assert_eq!(centers.row(0).to_vec(), vec![5.0, 10.0]);
        assert_eq!(centers.row(1).to_vec(), vec![6.0, 7.0]);
        assert_eq!(areas.to_vec(), vec![200.0, 8.0]);
    }

    #[test]
    fn test_iou() {
        let a = Bbox::new(0., 0., 10., 10.);
        let b = Bbox::new(5., 0., 15., 10.);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&Bbox::new(20., 20., 30., 30.)), 0.);
        assert_eq!(a.iou(&a), 1.);
    }

    #[test]
    fn test_enclose_and_extent() {
        let a = Bbox::new(0., 0., 10., 10.);
        let b = Bbox::new(8., -2., 12., 4.);
        assert_eq!(a.enclose(&b), Bbox::new(0., -2., 12., 10.));
        assert_eq!(b.half_extent(), (2., 3.));
        assert_eq!(Bbox::new(1.9, 2.2, 10.7, 11.0).to_int(), [1, 2, 10, 11]);
    }
}
