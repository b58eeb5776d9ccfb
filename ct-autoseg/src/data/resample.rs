//! 体素网格重采样.
//!
//! 输出网格的第 `o` 个体素对应输入网格坐标 `o * step`, 其中 `step`
//! 为输出间距与输入间距之比. 超出输入范围的坐标被钳制到边界.

use ndarray::{Array3, ArrayView3, Zip};

use crate::Idx3d;

/// 沿单个轴, 由 `n` 个体素、间距 `from` 重采样到间距 `to` 后的体素个数.
///
/// 保持首尾体素中心的物理跨度不变: `round((n - 1) * from / to) + 1`.
#[inline]
pub fn resampled_len(n: usize, from: f64, to: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let span = (n - 1) as f64 * from / to;
    span.round().max(0.0) as usize + 1
}

/// 三个轴上的 [`resampled_len`].
pub fn resampled_shape((a, b, c): Idx3d, spacing: [f64; 3], target: f64) -> Idx3d {
    (
        resampled_len(a, spacing[0], target),
        resampled_len(b, spacing[1], target),
        resampled_len(c, spacing[2], target),
    )
}

/// 线性插值用的索引表: `(低位索引, 高位索引, 高位权重)`.
fn linear_table(n_in: usize, n_out: usize, step: f64) -> Vec<(usize, usize, f32)> {
    let last = n_in.saturating_sub(1);
    (0..n_out)
        .map(|o| {
            let x = (o as f64 * step).clamp(0.0, last as f64);
            let lo = x.floor() as usize;
            let hi = (lo + 1).min(last);
            (lo, hi, (x - lo as f64) as f32)
        })
        .collect()
}

/// 最近邻用的索引表.
fn nearest_table(n_in: usize, n_out: usize, step: f64) -> Vec<usize> {
    let last = n_in.saturating_sub(1);
    (0..n_out)
        .map(|o| ((o as f64 * step).round().max(0.0) as usize).min(last))
        .collect()
}

/// 三线性插值重采样.
///
/// `steps[d]` 为输出第 `d` 轴前进一格时, 输入坐标前进的格数.
pub fn trilinear(data: ArrayView3<f32>, out: Idx3d, steps: [f64; 3]) -> Array3<f32> {
    let (a, b, c) = data.dim();
    let ti = linear_table(a, out.0, steps[0]);
    let tj = linear_table(b, out.1, steps[1]);
    let tk = linear_table(c, out.2, steps[2]);

    let mut ans = Array3::<f32>::zeros(out);
    let sample = |(i, j, k): Idx3d| -> f32 {
        let (i0, i1, fi) = ti[i];
        let (j0, j1, fj) = tj[j];
        let (k0, k1, fk) = tk[k];
        let lerp = |x: f32, y: f32, t: f32| x + (y - x) * t;
        let plane = |ii: usize| {
            let r0 = lerp(data[(ii, j0, k0)], data[(ii, j0, k1)], fk);
            let r1 = lerp(data[(ii, j1, k0)], data[(ii, j1, k1)], fk);
            lerp(r0, r1, fj)
        };
        lerp(plane(i0), plane(i1), fi)
    };
    fill(&mut ans, sample);
    ans
}

/// 最近邻重采样. 不会产生输入中不存在的值, 适用于标签图.
pub fn nearest<T>(data: ArrayView3<T>, out: Idx3d, steps: [f64; 3]) -> Array3<T>
where
    T: Copy + Default + Send + Sync,
{
    let (a, b, c) = data.dim();
    let ti = nearest_table(a, out.0, steps[0]);
    let tj = nearest_table(b, out.1, steps[1]);
    let tk = nearest_table(c, out.2, steps[2]);

    let mut ans = Array3::<T>::default(out);
    fill(&mut ans, |(i, j, k)| data[(ti[i], tj[j], tk[k])]);
    ans
}

#[cfg(feature = "rayon")]
fn fill<T, F>(ans: &mut Array3<T>, f: F)
where
    T: Send,
    F: Fn(Idx3d) -> T + Sync,
{
    Zip::indexed(ans).par_for_each(|idx, p| *p = f(idx));
}

#[cfg(not(feature = "rayon"))]
fn fill<T, F>(ans: &mut Array3<T>, f: F)
where
    F: Fn(Idx3d) -> T,
{
    Zip::indexed(ans).for_each(|idx, p| *p = f(idx));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_resampled_len() {
        assert_eq!(resampled_len(0, 1.0, 3.0), 0);
        assert_eq!(resampled_len(1, 1.0, 3.0), 1);
        assert_eq!(resampled_len(10, 1.0, 3.0), 4);
        assert_eq!(resampled_len(4, 3.0, 1.0), 10);
        assert_eq!(resampled_len(7, 3.0, 3.0), 7);
        assert_eq!(resampled_shape((10, 4, 7), [1.0, 3.0, 3.0], 3.0), (4, 4, 7));
    }

    #[test]
    fn test_trilinear_identity_and_linear_ramp() {
        let data = Array3::from_shape_fn((4, 5, 6), |(i, j, k)| (i + 2 * j + 3 * k) as f32);
        let same = trilinear(data.view(), data.dim(), [1.0; 3]);
        assert_eq!(same, data);

        // 线性函数在三线性插值下保持线性.
        let up = trilinear(data.view(), (7, 9, 11), [0.5; 3]);
        for ((i, j, k), v) in up.indexed_iter() {
            let expect = 0.5 * i as f32 + 2.0 * 0.5 * j as f32 + 3.0 * 0.5 * k as f32;
            assert!(f32_eq(*v, expect), "({i}, {j}, {k}): {v} != {expect}");
        }
    }

    #[test]
    fn test_trilinear_clamps() {
        let data = Array3::from_shape_fn((2, 2, 2), |(i, _, _)| i as f32);
        let out = trilinear(data.view(), (4, 1, 1), [1.0; 3]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_nearest_down_up_keeps_interior_labels() {
        // 每个标签块在每个轴上都占据 6 个体素, 按 3 倍降采样再升采样.
        let data = Array3::from_shape_fn((18, 18, 18), |(i, j, k)| {
            ((i / 6) * 9 + (j / 6) * 3 + k / 6) as u8 + 1
        });
        let down_shape = resampled_shape(data.dim(), [1.0; 3], 3.0);
        assert_eq!(down_shape, (7, 7, 7));
        let down = nearest(data.view(), down_shape, [3.0; 3]);
        let up = nearest(down.view(), data.dim(), [1.0 / 3.0; 3]);
        assert_eq!(up.dim(), data.dim());

        let interior = |x: usize| {
            let r = x % 6;
            (2..=3).contains(&r)
        };
        for ((i, j, k), v) in data.indexed_iter() {
            if interior(i) && interior(j) && interior(k) {
                assert_eq!(up[(i, j, k)], *v, "({i}, {j}, {k})");
            }
        }
        // 不会凭空产生新标签.
        assert!(up.iter().all(|v| (1..=27).contains(v)));
    }
}
