// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 录制 / 回放: 把 (是否存在, 掩码, 最居中框) 序列写入 JSON 文件, 回放时按 FIFO 弹出

use std::collections::VecDeque;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::RgbImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::InferenceBackend;
use crate::error::{RecordError, Result};
use crate::generator::{CenterMaskData, MaskGenerator};
use crate::FrameMask;

/// 一帧的录制数据
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub exists: bool,
    pub mask: FrameMask,
    pub center_box: Option<[i32; 4]>,
}

impl From<CenterMaskData> for RecordEntry {
    fn from(data: CenterMaskData) -> Self {
        Self {
            exists: data.found,
            mask: data.mask,
            center_box: data.center_box,
        }
    }
}

impl From<RecordEntry> for CenterMaskData {
    fn from(entry: RecordEntry) -> Self {
        Self {
            found: entry.exists,
            mask: entry.mask,
            center_box: entry.center_box,
        }
    }
}

/// 文件格式: 三个等长序列 + 元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PersistedRecord {
    mask_shape: (usize, usize),
    count: usize,
    mask_exists: Vec<bool>,
    /// 按行展开后逐位打包, 高位在前
    masks: Vec<Vec<u8>>,
    /// 无框时为空数组
    mask_boxes: Vec<Vec<i32>>,
}

/// 录制队列
#[derive(Debug, Clone, PartialEq)]
pub struct MaskRecord {
    mask_shape: (usize, usize),
    entries: VecDeque<RecordEntry>,
}

impl MaskRecord {
    /// mask_shape: (height, width)
    pub fn new(mask_shape: (usize, usize)) -> Self {
        Self {
            mask_shape,
            entries: VecDeque::new(),
        }
    }

    pub fn mask_shape(&self) -> (usize, usize) {
        self.mask_shape
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: RecordEntry) -> Result<(), RecordError> {
        if entry.mask.dim() != self.mask_shape {
            return Err(RecordError::ShapeMismatch {
                expected: self.mask_shape,
                actual: entry.mask.dim(),
            });
        }
        self.entries.push_back(entry);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<RecordEntry> {
        self.entries.pop_front()
    }

    /// 写入 JSON 文件
    ///
    /// 先写同目录下的临时文件并回读校验, 一致后再原子替换目标文件;
    /// 校验失败时临时文件被删除, 原文件保持不变。
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RecordError> {
        let path = path.as_ref();
        let persisted = self.to_persisted();

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &persisted)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;

        let written: PersistedRecord = serde_json::from_slice(&fs::read(tmp.path())?)?;
        if written != persisted {
            warn!("录制文件回读校验失败, 放弃写入 {}", path.display());
            return Err(RecordError::RoundTripMismatch);
        }

        tmp.persist(path).map_err(|e| RecordError::Io(e.error))?;
        info!("保存录制文件 {}: {} 帧", path.display(), self.len());
        Ok(())
    }

    /// 读取 JSON 文件, 任何不一致都整体放弃
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let path = path.as_ref();
        let result = fs::read(path)
            .map_err(RecordError::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<PersistedRecord>(&bytes)?))
            .and_then(Self::from_persisted);
        match &result {
            Ok(record) => info!("加载录制文件 {}: {} 帧", path.display(), record.len()),
            Err(e) => warn!("加载录制文件 {} 失败: {}", path.display(), e),
        }
        result
    }

    fn to_persisted(&self) -> PersistedRecord {
        PersistedRecord {
            mask_shape: self.mask_shape,
            count: self.entries.len(),
            mask_exists: self.entries.iter().map(|e| e.exists).collect(),
            masks: self.entries.iter().map(|e| pack_mask(&e.mask)).collect(),
            mask_boxes: self
                .entries
                .iter()
                .map(|e| e.center_box.map(|b| b.to_vec()).unwrap_or_default())
                .collect(),
        }
    }

    fn from_persisted(p: PersistedRecord) -> Result<Self, RecordError> {
        let PersistedRecord {
            mask_shape,
            count,
            mask_exists,
            masks,
            mask_boxes,
        } = p;
        let packed_len =
            packed_len(mask_shape).ok_or(RecordError::InvalidShape { shape: mask_shape })?;
        if mask_exists.len() != count || masks.len() != count || mask_boxes.len() != count {
            return Err(RecordError::LengthMismatch {
                exists: mask_exists.len(),
                masks: masks.len(),
                boxes: mask_boxes.len(),
                count,
            });
        }

        let mut entries = VecDeque::with_capacity(count);
        for (index, ((exists, bits), bbox)) in mask_exists
            .into_iter()
            .zip(masks)
            .zip(mask_boxes)
            .enumerate()
        {
            if bits.len() != packed_len {
                return Err(RecordError::CorruptMask {
                    index,
                    expected: packed_len,
                    actual: bits.len(),
                });
            }
            let center_box = match bbox.as_slice() {
                [] => None,
                &[x1, y1, x2, y2] => Some([x1, y1, x2, y2]),
                other => {
                    return Err(RecordError::CorruptBox {
                        index,
                        len: other.len(),
                    })
                }
            };
            entries.push_back(RecordEntry {
                exists,
                mask: unpack_mask(&bits, mask_shape),
                center_box,
            });
        }
        debug!("录制掩码尺寸 {:?}", mask_shape);

        Ok(Self {
            mask_shape,
            entries,
        })
    }
}

/// 单帧掩码像素上限 (8192 × 8192)
pub const MAX_MASK_PIXELS: usize = 1 << 26;

/// 打包后的字节数; 像素数溢出或超过上限时为 `None`
fn packed_len((height, width): (usize, usize)) -> Option<usize> {
    height
        .checked_mul(width)
        .filter(|&pixels| pixels <= MAX_MASK_PIXELS)
        .map(|pixels| pixels.div_ceil(8))
}

fn pack_mask(mask: &FrameMask) -> Vec<u8> {
    let mut out = vec![0u8; mask.len().div_ceil(8)];
    for (i, &v) in mask.iter().enumerate() {
        if v {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out
}

fn unpack_mask(bits: &[u8], shape: (usize, usize)) -> FrameMask {
    let mut i = 0;
    Array2::from_shape_simple_fn(shape, || {
        let v = bits[i / 8] & (0x80 >> (i % 8)) != 0;
        i += 1;
        v
    })
}

/// 逐帧提供 (是否找到, 掩码, 最居中框)
pub trait CenterMaskSource {
    fn next_center_mask(
        &mut self,
        frame: &RgbImage,
        flip_bgr_rgb: bool,
        grouping_range_scale: f32,
        disable_merge: bool,
    ) -> Result<CenterMaskData>;
}

impl<B: InferenceBackend> CenterMaskSource for MaskGenerator<B> {
    fn next_center_mask(
        &mut self,
        frame: &RgbImage,
        flip_bgr_rgb: bool,
        grouping_range_scale: f32,
        disable_merge: bool,
    ) -> Result<CenterMaskData> {
        self.generate_center_once(frame, flip_bgr_rgb, grouping_range_scale, disable_merge)
    }
}

/// 转发给内部数据源, 同时记录每一帧结果
pub struct RecordingSource<S> {
    inner: S,
    record: MaskRecord,
}

impl<S: CenterMaskSource> RecordingSource<S> {
    pub fn new(inner: S, mask_shape: (usize, usize)) -> Self {
        Self {
            inner,
            record: MaskRecord::new(mask_shape),
        }
    }

    pub fn record(&self) -> &MaskRecord {
        &self.record
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RecordError> {
        self.record.save(path)
    }

}

impl<S: CenterMaskSource> CenterMaskSource for RecordingSource<S> {
    fn next_center_mask(
        &mut self,
        frame: &RgbImage,
        flip_bgr_rgb: bool,
        grouping_range_scale: f32,
        disable_merge: bool,
    ) -> Result<CenterMaskData> {
        let data =
            self.inner
                .next_center_mask(frame, flip_bgr_rgb, grouping_range_scale, disable_merge)?;
        if let Err(e) = self.record.push(RecordEntry::from(data.clone())) {
            warn!("本帧未录制: {}", e);
        }
        Ok(data)
    }
}

/// 按录制顺序回放, 不运行模型; 录制耗尽后返回未找到
#[derive(Debug, Clone)]
pub struct ReplaySource {
    record: MaskRecord,
}

impl ReplaySource {
    pub fn new(record: MaskRecord) -> Self {
        Self { record }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        Ok(Self::new(MaskRecord::load(path)?))
    }

    pub fn remaining(&self) -> usize {
        self.record.len()
    }
}

impl CenterMaskSource for ReplaySource {
    fn next_center_mask(
        &mut self,
        _frame: &RgbImage,
        _flip_bgr_rgb: bool,
        _grouping_range_scale: f32,
        _disable_merge: bool,
    ) -> Result<CenterMaskData> {
        Ok(match self.record.pop() {
            Some(entry) => entry.into(),
            None => {
                let (height, width) = self.record.mask_shape();
                CenterMaskData::not_found(height, width)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(k: usize, shape: (usize, usize)) -> RecordEntry {
        let mask = Array2::from_shape_fn(shape, |(y, x)| (x * 3 + y + k) % 4 == 0);
        RecordEntry {
            exists: k % 2 == 0,
            mask,
            center_box: if k % 3 == 0 {
                None
            } else {
                Some([k as i32, 1, 10 + k as i32, 20])
            },
        }
    }

    #[test]
    fn test_pack_roundtrip_odd_size() {
        let mask = Array2::from_shape_fn((3, 5), |(y, x)| (x + y) % 2 == 0);
        let bits = pack_mask(&mask);
        assert_eq!(bits.len(), 2);
        assert_eq!(bits[0], 0b1010_1010);
        assert_eq!(unpack_mask(&bits, (3, 5)), mask);
    }

    #[test]
    fn test_save_load_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        let shape = (7, 9);

        let mut record = MaskRecord::new(shape);
        for k in 0..5 {
            record.push(entry(k, shape)).unwrap();
        }
        record.save(&path).unwrap();

        let mut loaded = MaskRecord::load(&path).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.mask_shape(), shape);
        for k in 0..5 {
            assert_eq!(loaded.pop().unwrap(), entry(k, shape));
        }
        assert!(loaded.pop().is_none());
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        let shape = (4, 4);

        let mut first = MaskRecord::new(shape);
        first.push(entry(0, shape)).unwrap();
        first.save(&path).unwrap();

        let mut second = MaskRecord::new(shape);
        second.push(entry(1, shape)).unwrap();
        second.push(entry(2, shape)).unwrap();
        second.save(&path).unwrap();

        assert_eq!(MaskRecord::load(&path).unwrap(), second);
        // 目录里只剩目标文件, 没有残留的临时文件
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_push_rejects_other_shape() {
        let mut record = MaskRecord::new((4, 4));
        assert!(matches!(
            record.push(entry(0, (4, 5))),
            Err(RecordError::ShapeMismatch { .. })
        ));
        assert!(record.is_empty());
    }

    #[test]
    fn test_load_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(
            &path,
            r#"{"mask_shape":[1,8],"count":2,"mask_exists":[true,false],"masks":[[255]],"mask_boxes":[[],[]]}"#,
        )
        .unwrap();
        assert!(matches!(
            MaskRecord::load(&path),
            Err(RecordError::LengthMismatch { masks: 1, count: 2, .. })
        ));
    }

    #[test]
    fn test_load_corrupt_mask_and_box() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(
            &path,
            r#"{"mask_shape":[2,8],"count":1,"mask_exists":[true],"masks":[[255]],"mask_boxes":[[]]}"#,
        )
        .unwrap();
        assert!(matches!(
            MaskRecord::load(&path),
            Err(RecordError::CorruptMask { index: 0, expected: 2, actual: 1 })
        ));

        fs::write(
            &path,
            r#"{"mask_shape":[1,8],"count":1,"mask_exists":[true],"masks":[[255]],"mask_boxes":[[1,2,3]]}"#,
        )
        .unwrap();
        assert!(matches!(
            MaskRecord::load(&path),
            Err(RecordError::CorruptBox { index: 0, len: 3 })
        ));
    }

    #[test]
    fn test_load_rejects_oversized_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(
            &path,
            r#"{"mask_shape":[18446744073709551615,2],"count":0,"mask_exists":[],"masks":[],"mask_boxes":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            MaskRecord::load(&path),
            Err(RecordError::InvalidShape { .. })
        ));

        // 不溢出但过大, 回放时无法分配
        fs::write(
            &path,
            r#"{"mask_shape":[100000,100000],"count":0,"mask_exists":[],"masks":[],"mask_boxes":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            MaskRecord::load(&path),
            Err(RecordError::InvalidShape { shape: (100000, 100000) })
        ));
        assert!(ReplaySource::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MaskRecord::load(dir.path().join("none.json")),
            Err(RecordError::Io(_))
        ));
    }

    struct Scripted {
        shape: (usize, usize),
        calls: usize,
    }

    impl CenterMaskSource for Scripted {
        fn next_center_mask(
            &mut self,
            _frame: &RgbImage,
            _flip_bgr_rgb: bool,
            _grouping_range_scale: f32,
            _disable_merge: bool,
        ) -> Result<CenterMaskData> {
            self.calls += 1;
            Ok(entry(self.calls, self.shape).into())
        }
    }

    #[test]
    fn test_recording_keeps_result_on_shape_mismatch() {
        let frame = RgbImage::new(6, 6);
        let mut recording = RecordingSource::new(Scripted { shape: (6, 6), calls: 0 }, (4, 4));
        let data = recording.next_center_mask(&frame, false, 0.5, false).unwrap();
        assert_eq!(data, CenterMaskData::from(entry(1, (6, 6))));
        assert!(recording.record().is_empty());
    }

    #[test]
    fn test_record_then_replay() {
        let shape = (6, 6);
        let frame = RgbImage::new(6, 6);
        let mut recording = RecordingSource::new(Scripted { shape, calls: 0 }, shape);
        let live: Vec<CenterMaskData> = (0..3)
            .map(|_| recording.next_center_mask(&frame, true, 0.5, false).unwrap())
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        recording.save(&path).unwrap();

        let mut replay = ReplaySource::load(&path).unwrap();
        assert_eq!(replay.remaining(), 3);
        for expected in live {
            assert_eq!(replay.next_center_mask(&frame, true, 0.5, false).unwrap(), expected);
        }

        let exhausted = replay.next_center_mask(&frame, true, 0.5, false).unwrap();
        assert!(!exhausted.found);
        assert_eq!(exhausted.mask.dim(), shape);
        assert!(exhausted.mask.iter().all(|&v| !v));
        assert!(exhausted.center_box.is_none());
    }
}
