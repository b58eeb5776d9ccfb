//! ONNX Runtime 推理后端.
//!
//! 模型需导出为单输入单输出, 输入形状 `[1, 1, r, r, r]`, 输出形状 `[1, C, r, r, r]`.

use std::path::Path;

use ndarray::{Array4, ArrayView4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::{InferenceError, ModelLoadError, Network, NetworkLoader};
use crate::consts::network::{IN_CHANNELS, NUM_CLASSES};
use crate::consts::MODEL_FILE_NAME;

/// 从 `.onnx` 文件 (或包含 `model.onnx` 的目录) 加载网络.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    intra_threads: usize,
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self::new(1)
    }
}

impl OnnxLoader {
    /// 指定单个算子内部的线程数.
    #[inline]
    pub fn new(intra_threads: usize) -> Self {
        Self {
            intra_threads: intra_threads.max(1),
        }
    }
}

impl NetworkLoader for OnnxLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Network>, ModelLoadError> {
        let file = if path.is_dir() {
            path.join(MODEL_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        if !file.is_file() {
            return Err(ModelLoadError::NotFound(file));
        }

        let decode = |e: ort::Error| ModelLoadError::Decode(e.to_string());
        let session = Session::builder()
            .map_err(decode)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(decode)?
            .with_intra_threads(self.intra_threads)
            .map_err(decode)?
            .commit_from_file(&file)
            .map_err(decode)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| ModelLoadError::Decode("模型没有输入".into()))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| ModelLoadError::Decode("模型没有输出".into()))?;

        // 动态维度 (负值) 无法在加载时校验, 按期望值处理.
        let channels = |shape: Option<&[i64]>, expected: usize| -> usize {
            match shape.and_then(|s| s.get(1).copied()) {
                Some(d) if d >= 0 => d as usize,
                _ => {
                    log::warn!("模型通道维是动态的, 假定为 {expected}");
                    expected
                }
            }
        };
        let in_channels = channels(input.input_type.tensor_shape().map(|s| &s[..]), IN_CHANNELS);
        let out_channels = channels(output.output_type.tensor_shape().map(|s| &s[..]), NUM_CLASSES);
        let (input_name, output_name) = (input.name.clone(), output.name.clone());
        log::info!("已加载 {file:?}: 输入 `{input_name}` x{in_channels}, 输出 `{output_name}` x{out_channels}");

        Ok(Box::new(OnnxNetwork {
            session,
            input_name,
            output_name,
            in_channels,
            out_channels,
        }))
    }
}

/// ONNX Runtime 会话.
pub struct OnnxNetwork {
    session: Session,
    input_name: String,
    output_name: String,
    in_channels: usize,
    out_channels: usize,
}

impl Network for OnnxNetwork {
    #[inline]
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    #[inline]
    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn predict(&mut self, tile: ArrayView4<f32>) -> Result<Array4<f32>, InferenceError> {
        let backend = |e: ort::Error| InferenceError::Backend(e.to_string());
        let (c, a, b, d) = tile.dim();
        let data: Vec<f32> = tile.iter().copied().collect();
        let input = Tensor::from_array(([1usize, c, a, b, d], data)).map_err(backend)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(backend)?;
        let (shape, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(backend)?;

        let found: Vec<usize> = shape.iter().map(|v| (*v).max(0) as usize).collect();
        let expected = vec![1, self.out_channels, a, b, d];
        if found != expected {
            return Err(InferenceError::OutputShape { expected, found });
        }
        Array4::from_shape_vec((self.out_channels, a, b, d), values.to_vec())
            .map_err(|e| InferenceError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model() {
        let err = OnnxLoader::default()
            .load(Path::new("/nonexistent/ct-autoseg/model.onnx"))
            .err();
        assert!(matches!(err, Some(ModelLoadError::NotFound(_))));
    }
}
