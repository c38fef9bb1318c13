use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use image::{GrayImage, Luma};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
/// 人像掩码生成
///
/// 直接运行: cargo run --release --features onnx --bin person-mask -- --model yolov7-mask.onnx --hyp hyp.yaml img.jpg
use yolo_person_mask::{
    preprocess::letterbox, record::CenterMaskSource, FrameMask, Hyperparameters, MaskGenerator,
    NmsConfig, OrtBackend, RecordingSource,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "YOLOv7-mask 人像掩码生成", long_about = None)]
struct Args {
    /// ONNX 模型路径
    #[arg(short, long)]
    model: PathBuf,

    /// 超参数文件 (hyp.*.yaml), 缺省使用 56/14/5
    #[arg(long)]
    hyp: Option<PathBuf>,

    /// 输入图片
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// 置信度阈值
    #[arg(long, default_value_t = 0.1)]
    conf: f32,

    /// NMS IoU 阈值
    #[arg(long, default_value_t = 0.6)]
    iou: f32,

    /// 模型输入宽度
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// 模型输入高度
    #[arg(long, default_value_t = 640)]
    height: u32,

    /// 交换红蓝通道 (输入为 BGR 时使用)
    #[arg(long)]
    flip_bgr_rgb: bool,

    /// 只输出最居中框及其掩码
    #[arg(long)]
    center: bool,

    /// 最居中框合并半径系数
    #[arg(long, default_value_t = 0.5)]
    grouping_range_scale: f32,

    /// 不合并相邻框
    #[arg(long)]
    disable_merge: bool,

    /// 输出目录
    #[arg(short, long, default_value = "runs/person-mask")]
    output: PathBuf,

    /// 录制文件 (仅 --center 模式)
    #[arg(long)]
    record: Option<PathBuf>,
}

fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}

fn save_mask(mask: &FrameMask, path: &PathBuf) -> Result<()> {
    let (height, width) = mask.dim();
    let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if mask[[y as usize, x as usize]] { 255 } else { 0 }])
    });
    image
        .save(path)
        .with_context(|| format!("保存掩码失败: {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let hyp = match &args.hyp {
        Some(path) => Hyperparameters::from_file(path)
            .with_context(|| format!("读取超参数失败: {}", path.display()))?,
        None => Hyperparameters::default(),
    };
    let backend = OrtBackend::from_file(&args.model)
        .with_context(|| format!("加载模型失败: {}", args.model.display()))?;
    let mut generator = MaskGenerator::new(backend, hyp, NmsConfig::new(args.conf, args.iou))?;

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("创建输出目录失败: {}", args.output.display()))?;

    let mut frames = Vec::with_capacity(args.sources.len());
    for source in &args.sources {
        let image = image::open(source)
            .with_context(|| format!("读取图片失败: {}", source.display()))?;
        frames.push(letterbox(&image, args.width, args.height));
    }

    let stamp = gen_time_string("-");

    if args.center {
        let shape = (args.height as usize, args.width as usize);
        let mut source = RecordingSource::new(generator, shape);
        for (idx, frame) in frames.iter().enumerate() {
            let data = source.next_center_mask(
                frame,
                args.flip_bgr_rgb,
                args.grouping_range_scale,
                args.disable_merge,
            )?;
            if !data.found {
                warn!("{}: 未检测到人", args.sources[idx].display());
            }
            info!(
                "{}: 最居中框 {:?}",
                args.sources[idx].display(),
                data.center_box
            );
            let path = args.output.join(format!("{}_{}_center.png", stamp, idx));
            save_mask(&data.mask, &path)?;
        }
        if let Some(record) = &args.record {
            source
                .save(record)
                .with_context(|| format!("保存录制文件失败: {}", record.display()))?;
        }
        return Ok(());
    }

    let t = std::time::Instant::now();
    let results = generator.generate_list(&frames, args.flip_bgr_rgb)?;
    info!("{} 张图片处理完成, 耗时 {:?}", results.len(), t.elapsed());

    for (idx, data) in results.iter().enumerate() {
        info!(
            "{}: found={}, 人数={}",
            args.sources[idx].display(),
            data.found,
            data.detections.len()
        );
        for det in &data.detections {
            info!("  {:?} conf={:.3}", det.bbox.to_int(), det.confidence);
        }
        let path = args.output.join(format!("{}_{}.png", stamp, idx));
        save_mask(&data.mask, &path)?;
    }

    Ok(())
}
