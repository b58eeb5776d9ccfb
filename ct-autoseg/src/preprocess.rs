//! 网络输入预处理: 方向规范化, 各向同性重采样, 强度归一化.
//!
//! 几何部分 (轴置换/翻转, 重采样) 被记录在 [`ForwardTransform`] 中,
//! 供 [`postprocess`](crate::postprocess) 精确地逆变换回原始网格.

use itertools::{Itertools, MinMaxResult};
use ndarray::Array3;
use ordered_float::OrderedFloat;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::network::TARGET_SPACING_MM;
use crate::data::resample::{resampled_shape, trilinear};
use crate::data::{Affine, GridAttr, OrientTransform, Volume};
use crate::source::LoadError;
use crate::Idx3d;

/// 预处理所施加的几何变换.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ForwardTransform {
    /// 原始网格到 RAS 网格的轴置换/翻转.
    pub orient: OrientTransform,

    /// 原始网格形状.
    pub source_shape: Idx3d,

    /// 原始网格仿射.
    pub source_affine: Affine,

    /// 方向规范化后的形状.
    pub oriented_shape: Idx3d,

    /// 方向规范化后的体素间距.
    pub oriented_spacing: [f64; 3],

    /// 重采样目标间距.
    pub target_spacing: f64,

    /// 重采样后的形状, 即网络输入网格的形状.
    pub resampled_shape: Idx3d,
}

impl ForwardTransform {
    /// 重采样时, 输出前进一格对应的输入格数.
    #[inline]
    pub fn forward_steps(&self) -> [f64; 3] {
        self.oriented_spacing.map(|s| self.target_spacing / s)
    }

    /// 逆重采样时, 输出前进一格对应的输入格数.
    #[inline]
    pub fn inverse_steps(&self) -> [f64; 3] {
        self.oriented_spacing.map(|s| s / self.target_spacing)
    }
}

/// 体数据归一化器.
#[derive(Debug, Copy, Clone)]
pub struct Normalizer {
    target_spacing: f64,
}

impl Default for Normalizer {
    #[inline]
    fn default() -> Self {
        Self::new(TARGET_SPACING_MM)
    }
}

impl Normalizer {
    /// 以 `target_spacing` (毫米) 为重采样目标.
    #[inline]
    pub fn new(target_spacing: f64) -> Self {
        Self { target_spacing }
    }

    /// 完成全部预处理, 返回网络网格上的体数据和所施加的几何变换.
    ///
    /// 切片个数 (第三个轴) 少于 2 时失败.
    pub fn normalize(&self, volume: &Volume) -> Result<(Volume, ForwardTransform), LoadError> {
        let source_shape = volume.dim();
        if source_shape.2 < 2 {
            return Err(LoadError::TooFewSlices(source_shape.2));
        }
        let source_affine = *volume.affine();

        // (b) 方向规范化到 RAS.
        let orient = OrientTransform::to_ras(&source_affine);
        let oriented = orient.apply(volume.data());
        let oriented_affine = orient.apply_affine(&source_affine, source_shape);
        let oriented_shape = oriented.dim();
        let oriented_spacing = oriented_affine.spacing();
        log::debug!(
            "方向 {:?} -> RAS, 形状 {source_shape:?} -> {oriented_shape:?}",
            source_affine.axcodes()
        );

        // (c) 重采样.
        let resampled = resampled_shape(oriented_shape, oriented_spacing, self.target_spacing);
        let transform = ForwardTransform {
            orient,
            source_shape,
            source_affine,
            oriented_shape,
            oriented_spacing,
            target_spacing: self.target_spacing,
            resampled_shape: resampled,
        };
        let mut data = trilinear(oriented.view(), resampled, transform.forward_steps());
        let affine = Affine {
            axes: [0, 1, 2].map(|d: usize| {
                let scale = self.target_spacing / oriented_spacing[d];
                oriented_affine.axes[d].map(|v| v * scale)
            }),
            origin: oriented_affine.origin,
        };
        log::debug!("间距 {oriented_spacing:?} -> {}, 形状 {resampled:?}", self.target_spacing);

        // (d) 强度归一化.
        normalize_nonzero(&mut data);
        rescale_symmetric(&mut data);

        Ok((Volume::new(data, affine), transform))
    }
}

/// 对非零体素做零均值/单位方差归一化 (总体标准差). 零体素保持不变.
///
/// 标准差为 0 时按 1 处理. 没有非零体素时不做任何改变.
pub fn normalize_nonzero(data: &mut Array3<f32>) {
    let (count, sum) = data
        .iter()
        .filter(|v| **v != 0.0)
        .fold((0usize, 0.0f64), |(n, s), v| (n + 1, s + f64::from(*v)));
    if count == 0 {
        return;
    }
    let mean = sum / count as f64;
    let var = data
        .iter()
        .filter(|v| **v != 0.0)
        .map(|v| (f64::from(*v) - mean).powi(2))
        .sum::<f64>()
        / count as f64;
    let std = match var.sqrt() {
        s if s > 0.0 => s,
        _ => 1.0,
    };
    data.mapv_inplace(|v| {
        if v != 0.0 {
            ((f64::from(v) - mean) / std) as f32
        } else {
            v
        }
    });
}

/// 线性缩放到 `[-1, 1]`. 所有值相同时乘以 `-1`.
pub fn rescale_symmetric(data: &mut Array3<f32>) {
    let (lo, hi) = match data.iter().map(|v| OrderedFloat(*v)).minmax() {
        MinMaxResult::NoElements => return,
        MinMaxResult::OneElement(v) => (v.0, v.0),
        MinMaxResult::MinMax(lo, hi) => (lo.0, hi.0),
    };
    if hi == lo {
        data.mapv_inplace(|v| -v);
        return;
    }
    let range = f64::from(hi) - f64::from(lo);
    data.mapv_inplace(|v| ((f64::from(v) - f64::from(lo)) / range * 2.0 - 1.0) as f32);
}
