//! 运行时错误.
//!
//! 每个阶段都有自己的错误类型, [`PipelineError`] 把它们汇总起来,
//! 由编排器统一转换为进度消息.

use thiserror::Error;

pub use crate::inference::{InferenceError, ModelLoadError};
pub use crate::output::{BuildError, WriteError};
pub use crate::postprocess::InversionError;
pub use crate::select::SelectError;
pub use crate::source::LoadError;

/// 配置值非法. 在流水线启动之前就会被拒绝.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// 分割个数不是正整数.
    #[error("分割个数必须是正整数, 实际为 `{0}`")]
    MaxSegments(String),
}

/// 流水线中任意阶段的失败.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 配置错误.
    #[error("配置错误: {0}")]
    Configuration(#[from] ConfigurationError),

    /// 体数据加载失败.
    #[error("体数据加载失败: {0}")]
    Load(#[from] LoadError),

    /// 模型加载失败.
    #[error("模型加载失败: {0}")]
    ModelLoad(#[from] ModelLoadError),

    /// 推理失败.
    #[error("推理失败: {0}")]
    Inference(#[from] InferenceError),

    /// 逆变换失败.
    #[error("逆变换失败: {0}")]
    Inversion(#[from] InversionError),

    /// 分割选择失败.
    #[error("分割选择失败: {0}")]
    Select(#[from] SelectError),

    /// 分割对象组装失败.
    #[error("分割对象组装失败: {0}")]
    Build(#[from] BuildError),

    /// 写出失败.
    #[error("写出失败: {0}")]
    Write(#[from] WriteError),
}
