//! 体素轴方向编码与轴置换/翻转.
//!
//! 方向编码沿用医学影像的三字母惯例: 第 `d` 个字母描述第 `d` 个体素轴
//! **增长** 时在世界坐标中大致指向的方向. 世界坐标系为 RAS
//! (x 指向病人右→左的反方向即 Right, y 指向 Anterior, z 指向 Superior).
//!
//! - `R`/`L`: 世界 x 轴, `R` 为正;
//! - `A`/`P`: 世界 y 轴, `A` 为正;
//! - `S`/`I`: 世界 z 轴, `S` 为正.

use ndarray::{Array3, ArrayView3, Axis};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::Affine;
use crate::Idx3d;

/// 三个体素轴的方向编码.
pub type AxisCodes = [char; 3];

/// RAS 方向.
pub const RAS: AxisCodes = ['R', 'A', 'S'];

/// LPS 方向.
pub const LPS: AxisCodes = ['L', 'P', 'S'];

/// 方向字母对应的 (世界轴, 是否为正方向). 非法字母返回 `None`.
#[inline]
fn code_axis(c: char) -> Option<(usize, bool)> {
    match c {
        'R' => Some((0, true)),
        'L' => Some((0, false)),
        'A' => Some((1, true)),
        'P' => Some((1, false)),
        'S' => Some((2, true)),
        'I' => Some((2, false)),
        _ => None,
    }
}

/// 世界轴与正负号对应的方向字母.
#[inline]
const fn axis_code(world: usize, positive: bool) -> char {
    match (world, positive) {
        (0, true) => 'R',
        (0, false) => 'L',
        (1, true) => 'A',
        (1, false) => 'P',
        (2, true) => 'S',
        _ => 'I',
    }
}

/// 为每个体素轴找到与之最接近的世界轴. 结果是一个置换:
/// `ans[d] = (w, positive)` 表示体素轴 `d` 对应世界轴 `w`.
///
/// 每一步在剩余的行列中挑选绝对值最大的分量, 因此斜切的方向也能得到唯一的分配.
fn dominant_axes(affine: &Affine) -> [(usize, bool); 3] {
    let mut ans = [(usize::MAX, true); 3];
    let mut used_voxel = [false; 3];
    let mut used_world = [false; 3];
    for _ in 0..3 {
        let mut best = (0usize, 0usize, -1.0f64);
        for (d, v) in affine.axes.iter().enumerate().filter(|(d, _)| !used_voxel[*d]) {
            for (w, c) in v.iter().enumerate().filter(|(w, _)| !used_world[*w]) {
                if c.abs() > best.2 {
                    best = (d, w, c.abs());
                }
            }
        }
        let (d, w, _) = best;
        used_voxel[d] = true;
        used_world[w] = true;
        ans[d] = (w, affine.axes[d][w] >= 0.0);
    }
    ans
}

/// 计算仿射 `affine` 的方向编码.
pub fn axcodes(affine: &Affine) -> AxisCodes {
    dominant_axes(affine).map(|(w, positive)| axis_code(w, positive))
}

/// 体素网格的轴置换加翻转.
///
/// 输出的第 `d` 个轴取自输入的第 `perm[d]` 个轴; 若 `flip[d]` 为真,
/// 则该输出轴方向反转. 该变换与数据无关, 因此可以预先求出并复用.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrientTransform {
    perm: [usize; 3],
    flip: [bool; 3],
}

impl Default for OrientTransform {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl OrientTransform {
    /// 恒等变换.
    pub const IDENTITY: Self = Self {
        perm: [0, 1, 2],
        flip: [false; 3],
    };

    /// 构建变换. `perm` 不是 `0, 1, 2` 的一个置换时返回 `None`.
    pub fn new(perm: [usize; 3], flip: [bool; 3]) -> Option<Self> {
        let mut seen = [false; 3];
        for p in perm {
            if p >= 3 || seen[p] {
                return None;
            }
            seen[p] = true;
        }
        Some(Self { perm, flip })
    }

    /// 常量上下文中构建. 调用者保证 `perm` 是合法置换.
    pub(crate) const fn from_raw(perm: [usize; 3], flip: [bool; 3]) -> Self {
        Self { perm, flip }
    }

    /// 将 `affine` 所描述的网格转到 RAS 方向所需的变换.
    pub fn to_ras(affine: &Affine) -> Self {
        let dom = dominant_axes(affine);
        let mut perm = [0usize; 3];
        let mut flip = [false; 3];
        for (d, (w, positive)) in dom.into_iter().enumerate() {
            perm[w] = d;
            flip[w] = !positive;
        }
        Self { perm, flip }
    }

    /// 从方向编码 `from` 到 `to` 的变换. 编码非法或不构成三个不同世界轴时返回 `None`.
    pub fn between(from: AxisCodes, to: AxisCodes) -> Option<Self> {
        let from = [
            code_axis(from[0])?,
            code_axis(from[1])?,
            code_axis(from[2])?,
        ];
        let mut perm = [usize::MAX; 3];
        let mut flip = [false; 3];
        for (d, c) in to.into_iter().enumerate() {
            let (w, positive) = code_axis(c)?;
            let src = from.iter().position(|(fw, _)| *fw == w)?;
            perm[d] = src;
            flip[d] = from[src].1 != positive;
        }
        Self::new(perm, flip)
    }

    /// 轴置换.
    #[inline]
    pub fn perm(&self) -> [usize; 3] {
        self.perm
    }

    /// 各输出轴是否翻转.
    #[inline]
    pub fn flip(&self) -> [bool; 3] {
        self.flip
    }

    /// 是否是恒等变换?
    #[inline]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// 逆变换. 满足 `t.inverse().apply(t.apply(x)) == x`.
    pub fn inverse(&self) -> Self {
        let mut perm = [0usize; 3];
        let mut flip = [false; 3];
        for d in 0..3 {
            perm[self.perm[d]] = d;
            flip[self.perm[d]] = self.flip[d];
        }
        Self { perm, flip }
    }

    /// 变换后的形状.
    #[inline]
    pub fn apply_shape(&self, (a, b, c): Idx3d) -> Idx3d {
        let s = [a, b, c];
        (s[self.perm[0]], s[self.perm[1]], s[self.perm[2]])
    }

    /// 对数据实施变换, 返回标准布局的新数组.
    pub fn apply<T: Clone>(&self, data: ArrayView3<T>) -> Array3<T> {
        let mut v = data.permuted_axes(self.perm);
        for (d, f) in self.flip.iter().enumerate() {
            if *f {
                v.invert_axis(Axis(d));
            }
        }
        v.as_standard_layout().into_owned()
    }

    /// 变换后网格的仿射. `shape` 为 **输入** 网格的形状.
    pub fn apply_affine(&self, affine: &Affine, (a, b, c): Idx3d) -> Affine {
        let shape = [a, b, c];
        let mut ans = Affine {
            axes: [[0.0; 3]; 3],
            origin: affine.origin,
        };
        for d in 0..3 {
            let src = affine.axes[self.perm[d]];
            if self.flip[d] {
                let steps = shape[self.perm[d]].saturating_sub(1) as f64;
                for w in 0..3 {
                    ans.origin[w] += src[w] * steps;
                }
                ans.axes[d] = src.map(|v| -v);
            } else {
                ans.axes[d] = src;
            }
        }
        ans
    }
}
