//! 网络工作约定 (`[列, 行, 倒序切片]`, RAS 世界) 与源序列约定
//! (`[帧, 行, 列]`, 帧按实例号升序) 之间的固定映射.
//!
//! 映射与数据无关: 交换第 0 与第 2 轴, 再翻转新的第 0 轴. 它不是对合的,
//! 因此同时提供正向 [`Reconciler::to_source`] 与逆向 [`Reconciler::to_network`].

use ndarray::{Array3, ArrayView3};

use crate::data::{GridAttr, LabelMap, OrientTransform};
use crate::Idx3d;

/// 方向还原器.
#[derive(Debug, Copy, Clone, Default)]
pub struct Reconciler;

impl Reconciler {
    /// 网络约定 -> 源序列约定: `out[f, r, c] = in[c, r, n - 1 - f]`.
    pub const FORWARD: OrientTransform = OrientTransform::from_raw([2, 1, 0], [true, false, false]);

    /// 网络约定 -> 源序列约定.
    #[inline]
    pub fn to_source<T: Clone>(&self, data: ArrayView3<T>) -> Array3<T> {
        Self::FORWARD.apply(data)
    }

    /// 源序列约定 -> 网络约定.
    #[inline]
    pub fn to_network<T: Clone>(&self, data: ArrayView3<T>) -> Array3<T> {
        Self::FORWARD.inverse().apply(data)
    }

    /// 映射整个标签图, 仿射随之更新, 世界坐标保持不变.
    pub fn reconcile(&self, label: &LabelMap) -> LabelMap {
        let affine = Self::FORWARD.apply_affine(label.affine(), label.dim());
        LabelMap::new(self.to_source(label.data()), affine)
    }

    /// 映射后的形状.
    #[inline]
    pub fn source_shape(&self, shape: Idx3d) -> Idx3d {
        Self::FORWARD.apply_shape(shape)
    }
}
