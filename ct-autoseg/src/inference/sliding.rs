//! 重叠滑窗推理.
//!
//! 窗口为边长 `roi` 的立方体, 相邻窗口重叠 `overlap`. 体数据某个轴比窗口短时,
//! 先在两侧以边缘值复制填充到窗口大小. 每个窗口的预测乘以以窗口中心为峰值的
//! 高斯权重后累加, 最终除以权重和.

use itertools::iproduct;
use ndarray::{s, Array3, Array4, ArrayView3, Axis, Zip};

use super::{InferenceError, Network};
use crate::consts::network::{OVERLAP, ROI_SIZE, SIGMA_SCALE};
use crate::Idx3d;

/// 沿单个轴, 长度为 `size` 时每个窗口的起点.
///
/// `size` 必须不小于 `roi`.
pub fn scan_starts(size: usize, roi: usize, overlap: f64) -> Vec<usize> {
    debug_assert!(size >= roi);
    let interval = if roi == size {
        roi
    } else {
        ((roi as f64 * (1.0 - overlap)) as usize).max(1)
    };
    // 第一个能覆盖到末尾的窗口.
    let count = (0..)
        .find(|d| d * interval + roi >= size)
        .map_or(1, |d| d + 1);
    (0..count)
        .map(|idx| {
            let start = idx * interval;
            start - (start + roi).saturating_sub(size)
        })
        .collect()
}

/// 边长 `roi` 的高斯权重图. 中心处为 1, 零值被替换为最小正值.
pub fn gaussian_importance_map(roi: usize, sigma_scale: f64) -> Array3<f32> {
    let sigma = (roi as f64 * sigma_scale).max(f64::EPSILON);
    let center = (roi / 2) as f64;
    let g: Vec<f64> = (0..roi)
        .map(|x| (-(x as f64 - center).powi(2) / (2.0 * sigma * sigma)).exp())
        .collect();
    let mut map = Array3::from_shape_fn((roi, roi, roi), |(i, j, k)| (g[i] * g[j] * g[k]) as f32);
    let max = map.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        map.mapv_inplace(|v| v / max);
    }
    let min_positive = map
        .iter()
        .copied()
        .filter(|v| *v > 0.0)
        .fold(f32::INFINITY, f32::min);
    if min_positive.is_finite() {
        map.mapv_inplace(|v| if v > 0.0 { v } else { min_positive });
    }
    map
}

/// 滑窗推理器.
#[derive(Debug, Copy, Clone)]
pub struct SlidingWindow {
    roi: usize,
    overlap: f64,
    sigma_scale: f64,
}

impl Default for SlidingWindow {
    #[inline]
    fn default() -> Self {
        Self::new(ROI_SIZE, OVERLAP, SIGMA_SCALE)
    }
}

impl SlidingWindow {
    /// 指定窗口边长, 重叠比例和高斯 sigma 比例.
    pub fn new(roi: usize, overlap: f64, sigma_scale: f64) -> Self {
        assert!(roi > 0, "窗口边长必须为正");
        assert!((0.0..1.0).contains(&overlap), "重叠比例必须位于 [0, 1)");
        Self {
            roi,
            overlap,
            sigma_scale,
        }
    }

    /// 窗口边长.
    #[inline]
    pub fn roi(&self) -> usize {
        self.roi
    }

    /// 对整个体数据推理, 返回 `(C, a, b, c)` 的 logits.
    pub fn infer(
        &self,
        net: &mut dyn Network,
        volume: ArrayView3<f32>,
    ) -> Result<Array4<f32>, InferenceError> {
        let (a, b, c) = volume.dim();
        if a * b * c == 0 {
            return Err(InferenceError::EmptyVolume);
        }
        let r = self.roi;
        let classes = net.out_channels();

        let (padded, before) = pad_replicate(volume, r);
        let (pa, pb, pc) = padded.dim();
        let starts = [
            scan_starts(pa, r, self.overlap),
            scan_starts(pb, r, self.overlap),
            scan_starts(pc, r, self.overlap),
        ];
        let weight = gaussian_importance_map(r, self.sigma_scale);
        log::debug!(
            "滑窗推理: 形状 {:?}, 填充后 {:?}, 窗口 {}x{}x{}",
            (a, b, c),
            (pa, pb, pc),
            starts[0].len(),
            starts[1].len(),
            starts[2].len()
        );

        let mut acc = Array4::<f32>::zeros((classes, pa, pb, pc));
        let mut count = Array3::<f32>::zeros((pa, pb, pc));
        let expected = vec![classes, r, r, r];
        for (&i, &j, &k) in iproduct!(&starts[0], &starts[1], &starts[2]) {
            let tile = padded
                .slice(s![i..i + r, j..j + r, k..k + r])
                .insert_axis(Axis(0));
            let pred = net.predict(tile)?;
            if pred.shape() != expected.as_slice() {
                return Err(InferenceError::OutputShape {
                    expected,
                    found: pred.shape().to_vec(),
                });
            }
            for (mut dst, src) in acc.outer_iter_mut().zip(pred.outer_iter()) {
                let dst = dst.slice_mut(s![i..i + r, j..j + r, k..k + r]);
                blend(dst, src, weight.view());
            }
            let mut cnt = count.slice_mut(s![i..i + r, j..j + r, k..k + r]);
            cnt += &weight;
        }

        for mut plane in acc.outer_iter_mut() {
            plane /= &count;
        }
        let (bi, bj, bk) = before;
        Ok(acc
            .slice(s![.., bi..bi + a, bj..bj + b, bk..bk + c])
            .to_owned())
    }
}

/// 将每个轴以边缘值复制填充到至少 `roi`, 两侧各填一半 (多出的一格在后侧).
/// 返回填充后的数据和前侧填充量.
fn pad_replicate(volume: ArrayView3<f32>, roi: usize) -> (Array3<f32>, Idx3d) {
    let (a, b, c) = volume.dim();
    let (pa, pb, pc) = (a.max(roi), b.max(roi), c.max(roi));
    let before = ((pa - a) / 2, (pb - b) / 2, (pc - c) / 2);
    if (pa, pb, pc) == (a, b, c) {
        return (volume.to_owned(), before);
    }
    let clamp = |x: usize, lo: usize, n: usize| x.saturating_sub(lo).min(n - 1);
    let padded = Array3::from_shape_fn((pa, pb, pc), |(i, j, k)| {
        volume[(clamp(i, before.0, a), clamp(j, before.1, b), clamp(k, before.2, c))]
    });
    (padded, before)
}

/// `dst += src * weight`.
#[cfg(feature = "rayon")]
fn blend(dst: ndarray::ArrayViewMut3<f32>, src: ArrayView3<f32>, weight: ArrayView3<f32>) {
    Zip::from(dst)
        .and(src)
        .and(weight)
        .par_for_each(|d, s, w| *d += s * w);
}

/// `dst += src * weight`.
#[cfg(not(feature = "rayon"))]
fn blend(dst: ndarray::ArrayViewMut3<f32>, src: ArrayView3<f32>, weight: ArrayView3<f32>) {
    Zip::from(dst)
        .and(src)
        .and(weight)
        .for_each(|d, s, w| *d += s * w);
}
