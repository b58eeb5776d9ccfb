//! 分割网络接口与滑窗推理.
//!
//! 网络本身藏在 [`Network`] 之后: 一次前向传播接受一个 `(1, r, r, r)`
//! 的单通道立方体, 返回 `(C, r, r, r)` 的逐类别 logits. 权重的加载由
//! [`NetworkLoader`] 负责, 加载后必须通过 [`check_architecture`].
//!
//! - `fake`: 确定性的测试网络, 仅用于实验目的;
//! - `onnx`: 基于 ONNX Runtime 的后端 (需要 `onnx` feature).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array4, ArrayView4};
use thiserror::Error;

use crate::consts::network::{IN_CHANNELS, NUM_CLASSES};

pub mod fake;
mod sliding;

cfg_if::cfg_if! {
    if #[cfg(feature = "onnx")] {
        mod onnx;
        pub use onnx::{OnnxLoader, OnnxNetwork};
    }
}

pub use sliding::{gaussian_importance_map, scan_starts, SlidingWindow};

/// 网络权重加载失败, 或权重与期望的网络结构不符.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    /// 权重文件不存在.
    #[error("找不到模型权重 `{0}`")]
    NotFound(PathBuf),

    /// 权重文件无法解析.
    #[error("模型权重解析失败: {0}")]
    Decode(String),

    /// 输入通道数不符.
    #[error("模型输入通道数为 {found}, 期望 {expected}")]
    InputChannels {
        /// 期望值.
        expected: usize,

        /// 实际值.
        found: usize,
    },

    /// 输出通道数 (类别数) 不符.
    #[error("模型输出通道数为 {found}, 期望 {expected}")]
    OutputChannels {
        /// 期望值.
        expected: usize,

        /// 实际值.
        found: usize,
    },

    /// 没有可用的推理后端.
    #[error("推理后端不可用: {0}")]
    Unavailable(String),
}

/// 前向传播失败.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// 后端运行时错误.
    #[error("推理后端错误: {0}")]
    Backend(String),

    /// 网络输出形状不符.
    #[error("网络输出形状为 {found:?}, 期望 {expected:?}")]
    OutputShape {
        /// 期望形状.
        expected: Vec<usize>,

        /// 实际形状.
        found: Vec<usize>,
    },

    /// 输入体数据为空.
    #[error("输入体数据为空")]
    EmptyVolume,
}

/// 三维分割网络.
pub trait Network: Send {
    /// 输入通道数.
    fn in_channels(&self) -> usize {
        IN_CHANNELS
    }

    /// 输出通道数, 即类别数 (含背景).
    fn out_channels(&self) -> usize;

    /// 对一个 `(1, r, r, r)` 立方体做一次前向传播, 返回 `(C, r, r, r)` logits.
    fn predict(&mut self, tile: ArrayView4<f32>) -> Result<Array4<f32>, InferenceError>;
}

impl<N: Network + ?Sized> Network for Box<N> {
    #[inline]
    fn in_channels(&self) -> usize {
        (**self).in_channels()
    }

    #[inline]
    fn out_channels(&self) -> usize {
        (**self).out_channels()
    }

    #[inline]
    fn predict(&mut self, tile: ArrayView4<f32>) -> Result<Array4<f32>, InferenceError> {
        (**self).predict(tile)
    }
}

/// 网络权重加载器. 每次运行都重新加载一次权重.
pub trait NetworkLoader {
    /// 从 `path` 加载网络.
    fn load(&self, path: &Path) -> Result<Box<dyn Network>, ModelLoadError>;
}

impl<L: NetworkLoader + ?Sized> NetworkLoader for Arc<L> {
    #[inline]
    fn load(&self, path: &Path) -> Result<Box<dyn Network>, ModelLoadError> {
        (**self).load(path)
    }
}

/// 检查网络是 1 输入通道, 105 输出通道的结构.
pub fn check_architecture(net: &dyn Network) -> Result<(), ModelLoadError> {
    let found = net.in_channels();
    if found != IN_CHANNELS {
        return Err(ModelLoadError::InputChannels {
            expected: IN_CHANNELS,
            found,
        });
    }
    let found = net.out_channels();
    if found != NUM_CLASSES {
        return Err(ModelLoadError::OutputChannels {
            expected: NUM_CLASSES,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::fake::ConstantNetwork;
    use super::*;

    #[test]
    fn test_check_architecture() {
        let ok = ConstantNetwork::new(3);
        assert!(check_architecture(&ok).is_ok());

        let bad = ConstantNetwork::with_channels(3, 104);
        assert!(matches!(
            check_architecture(&bad),
            Err(ModelLoadError::OutputChannels {
                expected: 105,
                found: 104
            })
        ));

        let boxed: Box<dyn Network> = Box::new(ConstantNetwork::new(0));
        assert!(check_architecture(boxed.as_ref()).is_ok());
    }
}
