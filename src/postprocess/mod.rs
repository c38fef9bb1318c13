// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 模型输出后处理

pub mod center_box;
pub mod geometry;
pub mod nms;
pub mod paste;
pub mod roi_align;
pub mod synth;
pub mod unpack;

pub use center_box::{most_center_box, CenterBoxSelection};
pub use geometry::{centers_and_areas, xywh2xyxy, Bbox};
pub use nms::{non_max_suppression, Detection, DetectionFilter, FrameDetections, NmsConfig};
pub use paste::{paste_mask, union_masks, MASK_THRESHOLD};
pub use roi_align::RoiPooler;
pub use synth::{mask_confidence, MaskSynthesizer, SynthesizedMasks};
pub use unpack::{unpack_inference, BasisLayout, ChannelLayout, UnpackedOutput};
