#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 对一组 CT 切片做全身 104 类解剖结构自动分割, 生成引用原始序列的多通道二值分割对象.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 流程
//!
//! 1. 加载与预处理: 方向规范化到 RAS, 重采样到 3mm 各向同性, 非零体素强度归一化;
//! 2. 滑窗推理: `96^3` 窗口, 0.25 重叠, 高斯权重融合;
//! 3. 后处理: softmax + argmax, 最近邻逆重采样回原始网格;
//! 4. 方向还原: 网络约定 -> 源序列 `[帧, 行, 列]` 约定;
//! 5. 分割选择: 按体素个数挑选至多 `N` 个结构;
//! 6. 组装并写出分割对象.
//!
//! 每一步都有自己的错误类型, 由 [`pipeline::Pipeline`] 统一编排.
//!
//! # 注意
//!
//! 1. 网络前向传播与文件写出都藏在窄接口之后 ([`inference::Network`], [`output::SegWriter`]),
//!   测试使用确定性的假网络和内存写出器.
//! 2. 每次运行都重新加载一次权重, 同一份权重同一时间最好只跑一个任务.
//!
//! # 开发计划
//!
//! ### 体数据加载与预处理 ✅
//!
//! NIfTI / 内存 / 切片序列三种来源.
//!
//! 实现位于 `ct-autoseg/src/source` 与 `ct-autoseg/src/preprocess.rs`.
//!
//! ### 滑窗推理 ✅
//!
//! 实现位于 `ct-autoseg/src/inference`. ONNX Runtime 后端需要 `onnx` feature.
//!
//! ### 后处理, 方向还原, 分割选择 ✅
//!
//! 1. 逆重采样必须是最近邻, 不能引入新的标签值. ✅
//! 2. 方向还原不是对合的, 需要显式逆映射. ✅
//! 3. 个数相同的标签按标签值升序排列. ✅
//!
//! ### 分割对象写出 ✅
//!
//! 1. zlib + bincode 归档 (`serde` feature). ✅
//! 2. DICOM Segmentation Storage (`dicom` feature). ✅
//!
//! ### 多窗口批量推理 ⌛️
//!
//! 目前每次前向传播只处理一个窗口.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod consts;

/// 体数据, 标签图与几何.
pub mod data;

pub mod config;
pub mod error;
pub mod inference;
pub mod output;
pub mod pipeline;
pub mod postprocess;
pub mod prelude;
pub mod preprocess;
pub mod reconcile;
pub mod select;
pub mod source;
pub mod uid;

pub use data::{Affine, GridAttr, LabelMap, Volume};
pub use error::PipelineError;
pub use pipeline::{Job, Pipeline, PipelineState, ProgressSink, RunReport};
