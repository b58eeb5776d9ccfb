use std::ops::Index;

use ndarray::{Array3, ArrayView, Ix3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Idx3d;

pub mod orientation;
pub mod resample;

pub use orientation::{AxisCodes, OrientTransform};

/// 体素索引到世界坐标 (毫米) 的仿射变换.
///
/// `axes[d]` 是沿第 `d` 个体素轴前进一格时世界坐标的增量,
/// `origin` 是体素 `(0, 0, 0)` 中心的世界坐标. 世界坐标系约定为 RAS.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Affine {
    /// 三个体素轴各自的世界方向向量 (含间距).
    pub axes: [[f64; 3]; 3],

    /// 原点.
    pub origin: [f64; 3],
}

impl Default for Affine {
    #[inline]
    fn default() -> Self {
        Self::from_spacing([1.0; 3])
    }
}

impl Affine {
    /// 以 `spacing` 为对角线, 原点为 0 的仿射.
    pub fn from_spacing(spacing: [f64; 3]) -> Self {
        let [x, y, z] = spacing;
        Self {
            axes: [[x, 0.0, 0.0], [0.0, y, 0.0], [0.0, 0.0, z]],
            origin: [0.0; 3],
        }
    }

    /// 每个体素轴的间距, 以毫米为单位.
    pub fn spacing(&self) -> [f64; 3] {
        self.axes.map(|v| v.iter().map(|c| c * c).sum::<f64>().sqrt())
    }

    /// 体素 `(i, j, k)` 中心的世界坐标.
    pub fn world(&self, (i, j, k): Idx3d) -> [f64; 3] {
        let mut ans = self.origin;
        for (d, n) in [i, j, k].into_iter().enumerate() {
            for (w, p) in ans.iter_mut().enumerate() {
                *p += self.axes[d][w] * n as f64;
            }
        }
        ans
    }

    /// 沿体素轴方向的大致世界方向编码, 例如 `['R', 'A', 'S']`.
    #[inline]
    pub fn axcodes(&self) -> AxisCodes {
        orientation::axcodes(self)
    }
}

/// 带几何信息的三维体素网格的共用属性.
pub trait GridAttr {
    /// 获取仿射.
    fn affine(&self) -> &Affine;

    /// 获取数据形状大小 (沿三个体素轴).
    fn dim(&self) -> Idx3d;

    /// 获取单个体素分辨率, 以毫米为单位.
    #[inline]
    fn spacing(&self) -> [f64; 3] {
        self.affine().spacing()
    }

    /// 方向编码.
    #[inline]
    fn axcodes(&self) -> AxisCodes {
        self.affine().axcodes()
    }

    /// 两者是否位于同一体素网格上 (形状与间距都一致)?
    fn same_grid<G: GridAttr>(&self, other: &G) -> bool {
        self.dim() == other.dim()
            && self
                .spacing()
                .iter()
                .zip(other.spacing().iter())
                .all(|(a, b)| (a - b).abs() < 1e-6)
    }
}

/// 三维 CT 扫描体数据, 体素值以 `f32` 保存.
///
/// 数据以 `[i, j, k]` 访问, 与 `affine` 的三个体素轴一一对应.
/// 构造后不可修改; 每一步处理都产生新的 `Volume`.
#[derive(Debug, Clone)]
pub struct Volume {
    affine: Affine,
    data: Array3<f32>,
}

impl GridAttr for Volume {
    #[inline]
    fn affine(&self) -> &Affine {
        &self.affine
    }

    #[inline]
    fn dim(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Volume {
    /// 直接由数据和仿射创建.
    pub fn new(data: Array3<f32>, affine: Affine) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self { affine, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// 三维标签图, 标签值以 `u8` 保存. `0` 为背景, `1..=104` 为解剖结构.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    affine: Affine,
    data: Array3<u8>,
}

impl GridAttr for LabelMap {
    #[inline]
    fn affine(&self) -> &Affine {
        &self.affine
    }

    #[inline]
    fn dim(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for LabelMap {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl LabelMap {
    /// 直接由数据和仿射创建.
    pub fn new(data: Array3<u8>, affine: Affine) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self { affine, data }
    }

    /// 以单位间距的仿射创建. 仅用于实验目的.
    #[inline]
    pub fn fake(data: Array3<u8>) -> Self {
        Self::new(data, Affine::default())
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取标签图中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 所有取值的直方图. 第 `v` 项为值 `v` 出现的次数.
    pub fn histogram(&self) -> [usize; 256] {
        match self.data.as_slice_memory_order() {
            Some(s) => histogram_of(s),
            None => histogram_of_iter(self.data.iter()),
        }
    }

    /// 值为 `label` 的二值掩码 (`1` 为前景).
    pub fn mask(&self, label: u8) -> Array3<u8> {
        self.data.mapv(|p| u8::from(p == label))
    }
}

#[cfg(not(feature = "rayon"))]
fn histogram_of(data: &[u8]) -> [usize; 256] {
    histogram_of_iter(data.iter())
}

/// 借助 `rayon`, 分块并行统计后合并.
#[cfg(feature = "rayon")]
fn histogram_of(data: &[u8]) -> [usize; 256] {
    use rayon::prelude::*;
    data.par_chunks(1 << 16)
        .map(|c| histogram_of_iter(c.iter()))
        .reduce(|| [0usize; 256], merge_histogram)
}

fn histogram_of_iter<'a, I: Iterator<Item = &'a u8>>(it: I) -> [usize; 256] {
    let mut ans = [0usize; 256];
    for p in it {
        ans[*p as usize] += 1;
    }
    ans
}

#[cfg(feature = "rayon")]
fn merge_histogram(mut a: [usize; 256], b: [usize; 256]) -> [usize; 256] {
    a.iter_mut().zip(b.iter()).for_each(|(x, y)| *x += y);
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_world_and_spacing() {
        let a = Affine {
            axes: [[-2.0, 0.0, 0.0], [0.0, 0.0, 3.0], [0.0, 1.5, 0.0]],
            origin: [10.0, 20.0, 30.0],
        };
        assert_eq!(a.spacing(), [2.0, 3.0, 1.5]);
        assert_eq!(a.world((1, 2, 4)), [8.0, 26.0, 36.0]);
        assert_eq!(a.axcodes(), ['L', 'S', 'A']);
    }

    #[test]
    fn test_label_histogram_and_mask() {
        let mut data = Array3::<u8>::zeros((4, 5, 6));
        data[(0, 0, 0)] = 5;
        data[(1, 2, 3)] = 5;
        data[(3, 4, 5)] = 104;
        let label = LabelMap::fake(data);

        let h = label.histogram();
        assert_eq!(h[0], 4 * 5 * 6 - 3);
        assert_eq!(h[5], 2);
        assert_eq!(h[104], 1);
        assert_eq!(label.count(5), 2);

        let m = label.mask(5);
        assert_eq!(m.iter().filter(|p| **p == 1).count(), 2);
        assert_eq!(m[(1, 2, 3)], 1);
        assert_eq!(m[(3, 4, 5)], 0);
    }

    #[test]
    fn test_same_grid() {
        let a = LabelMap::fake(Array3::zeros((2, 3, 4)));
        let b = Volume::new(Array3::zeros((2, 3, 4)), Affine::default());
        let c = Volume::new(Array3::zeros((2, 3, 4)), Affine::from_spacing([1.0, 1.0, 2.0]));
        assert!(a.same_grid(&b));
        assert!(!a.same_grid(&c));
        assert_eq!(c.spacing(), [1.0, 1.0, 2.0]);
    }
}
