// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 后端

use std::path::Path;

use ndarray::{Array3, Array4};
use ort::session::Session;
use tracing::{debug, info};

use super::{InferenceBackend, Specialization};
use crate::error::{MaskError, Result};

pub struct OrtBackend {
    session: Session,
    input_name: String,
    output_name: String,
}

impl std::fmt::Debug for OrtBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtBackend")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .finish()
    }
}

fn backend_error(context: &str, e: impl std::fmt::Display) -> MaskError {
    MaskError::Backend(format!("{}: {}", context, e))
}

impl OrtBackend {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("加载 ONNX 模型: {}", path.display());

        let session = Session::builder()
            .map_err(|e| backend_error("创建会话失败", e))?
            .commit_from_file(path)
            .map_err(|e| backend_error("加载模型失败", e))?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| MaskError::Backend("模型没有输入".to_string()))?;
        let output_name = session
            .outputs()
            .first()
            .map(|output| output.name().to_string())
            .ok_or_else(|| MaskError::Backend("模型没有输出".to_string()))?;
        debug!("模型输入: {}, 输出: {}", input_name, output_name);

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn specialize(&mut self, spec: &Specialization, sample: &Array4<f32>) -> Result<()> {
        info!(
            "预热模型: 输入 {:?}, target_size={}, pad_size={}",
            spec.input_size, spec.target_size, spec.pad_size
        );
        let t = std::time::Instant::now();
        let _ = self.forward(&Array4::zeros(sample.raw_dim()))?;
        let _ = self.forward(sample)?;
        info!("预热完成, 耗时 {:?}", t.elapsed());
        Ok(())
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<Array3<f32>> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = ort::value::Tensor::from_array((shape, data))
            .map_err(|e| backend_error("创建输入张量失败", e))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| backend_error("推理失败", e))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| MaskError::Backend(format!("缺少输出 {}", self.output_name)))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| backend_error("读取输出失败", e))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 {
            return Err(MaskError::MalformedOutput(format!(
                "期望三维输出, 实际形状 {:?}",
                dims
            )));
        }
        Ok(Array3::from_shape_vec((dims[0], dims[1], dims[2]), data.to_vec())?)
    }
}
