//! 运行配置.
//!
//! 用户只能调整一个值: 最多输出的分割个数. 其余参数都是固定常量,
//! 集中在 [`PipelineOptions`] 中.

use std::num::NonZeroUsize;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::network::{NUM_CLASSES, OVERLAP, ROI_SIZE, SIGMA_SCALE, TARGET_SPACING_MM};
use crate::consts::DEFAULT_MAX_SEGMENTS;
use crate::error::ConfigurationError;
use crate::inference::SlidingWindow;
use crate::preprocess::Normalizer;
use crate::select::Selector;

/// 用户配置.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentConfig {
    /// 最多输出的分割个数.
    pub max_segments: NonZeroUsize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_segments: NonZeroUsize::new(DEFAULT_MAX_SEGMENTS).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl SegmentConfig {
    /// 解析用户输入. 空白输入得到默认值 10.
    ///
    /// ```
    /// use ct_autoseg::config::SegmentConfig;
    ///
    /// assert_eq!(SegmentConfig::parse(" 4 ").unwrap().max_segments.get(), 4);
    /// assert_eq!(SegmentConfig::parse("").unwrap().max_segments.get(), 10);
    /// assert!(SegmentConfig::parse("0").is_err());
    /// assert!(SegmentConfig::parse("-3").is_err());
    /// assert!(SegmentConfig::parse("abc").is_err());
    /// ```
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let t = text.trim();
        if t.is_empty() {
            return Ok(Self::default());
        }
        t.parse::<NonZeroUsize>()
            .map(|max_segments| Self { max_segments })
            .map_err(|_| ConfigurationError::MaxSegments(text.to_string()))
    }

    /// 对应的分割选择器.
    #[inline]
    pub fn selector(&self) -> Selector {
        Selector::new(self.max_segments)
    }
}

/// 流水线的固定参数.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineOptions {
    /// 重采样目标间距 (mm).
    pub target_spacing: f64,

    /// 滑窗边长.
    pub roi_size: usize,

    /// 相邻窗口的重叠比例.
    pub overlap: f64,

    /// 高斯权重的 sigma 与窗口边长之比.
    pub sigma_scale: f64,

    /// 类别数 (含背景).
    pub num_classes: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            target_spacing: TARGET_SPACING_MM,
            roi_size: ROI_SIZE,
            overlap: OVERLAP,
            sigma_scale: SIGMA_SCALE,
            num_classes: NUM_CLASSES,
        }
    }
}

impl PipelineOptions {
    /// 预处理器.
    #[inline]
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.target_spacing)
    }

    /// 滑窗推理器.
    #[inline]
    pub fn sliding_window(&self) -> SlidingWindow {
        SlidingWindow::new(self.roi_size, self.overlap, self.sigma_scale)
    }
}
