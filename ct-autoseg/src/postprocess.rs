//! 网络输出后处理: softmax, argmax, 以及预处理几何变换的逆变换.

use ndarray::{Array3, Array4, ArrayView4, Axis, Zip};
use num::ToPrimitive;
use thiserror::Error;

use crate::data::resample::nearest;
use crate::data::{GridAttr, LabelMap, Volume};
use crate::preprocess::ForwardTransform;
use crate::Idx3d;

/// 无法把预测结果逆变换回原始网格.
#[derive(Debug, Error)]
pub enum InversionError {
    /// 缺少预处理记录的几何变换.
    #[error("缺少预处理记录的几何变换")]
    MissingTransform,

    /// 预测结果的形状与记录的网络网格不一致.
    #[error("预测结果空间形状为 {found:?}, 与记录的 {expected:?} 不一致")]
    ShapeMismatch {
        /// 记录的网络网格形状.
        expected: Idx3d,

        /// 实际形状.
        found: Idx3d,
    },

    /// 类别数超出标签值能表示的范围.
    #[error("类别数 {0} 超出 u8 标签范围")]
    TooManyClasses(usize),
}

/// 沿类别轴 (第 0 轴) 做数值稳定的 softmax.
pub fn softmax(logits: ArrayView4<f32>) -> Array4<f32> {
    let mut ans = logits.to_owned();
    let max = logits.fold_axis(Axis(0), f32::NEG_INFINITY, |m, v| m.max(*v));
    for mut plane in ans.outer_iter_mut() {
        Zip::from(&mut plane).and(&max).for_each(|p, m| *p = (*p - m).exp());
    }
    let sum = ans.sum_axis(Axis(0));
    for mut plane in ans.outer_iter_mut() {
        plane /= &sum;
    }
    ans
}

/// 沿类别轴取最大值下标. 并列时取下标较小者.
pub fn argmax(probs: ArrayView4<f32>) -> Result<Array3<u8>, InversionError> {
    let classes = probs.len_of(Axis(0));
    let (_, a, b, c) = probs.dim();
    let mut best = Array3::<f32>::from_elem((a, b, c), f32::NEG_INFINITY);
    let mut ans = Array3::<u8>::zeros((a, b, c));
    for (class, plane) in probs.outer_iter().enumerate() {
        let value = class
            .to_u8()
            .ok_or(InversionError::TooManyClasses(classes))?;
        Zip::from(&mut ans)
            .and(&mut best)
            .and(&plane)
            .for_each(|l, m, p| {
                if *p > *m {
                    *m = *p;
                    *l = value;
                }
            });
    }
    Ok(ans)
}

/// 后处理器.
#[derive(Debug, Clone, Default)]
pub struct Postprocessor {
    transform: Option<ForwardTransform>,
}

impl Postprocessor {
    /// 以预处理记录的几何变换创建.
    #[inline]
    pub fn new(transform: ForwardTransform) -> Self {
        Self {
            transform: Some(transform),
        }
    }

    /// 记录的几何变换.
    #[inline]
    pub fn transform(&self) -> Option<&ForwardTransform> {
        self.transform.as_ref()
    }

    /// logits -> 网络网格上的标签 -> 原始网格上的标签图.
    pub fn run(&self, logits: ArrayView4<f32>) -> Result<LabelMap, InversionError> {
        let t = self.transform.as_ref().ok_or(InversionError::MissingTransform)?;
        let (_, a, b, c) = logits.dim();
        if (a, b, c) != t.resampled_shape {
            return Err(InversionError::ShapeMismatch {
                expected: t.resampled_shape,
                found: (a, b, c),
            });
        }
        let probs = softmax(logits);
        let labels = argmax(probs.view())?;
        self.invert(labels)
    }

    /// 将网络网格上的标签逆变换回原始网格: 最近邻逆重采样, 然后逆轴变换.
    pub fn invert(&self, labels: Array3<u8>) -> Result<LabelMap, InversionError> {
        let t = self.transform.as_ref().ok_or(InversionError::MissingTransform)?;
        if labels.dim() != t.resampled_shape {
            return Err(InversionError::ShapeMismatch {
                expected: t.resampled_shape,
                found: labels.dim(),
            });
        }
        let oriented = nearest(labels.view(), t.oriented_shape, t.inverse_steps());
        let data = t.orient.inverse().apply(oriented.view());
        debug_assert_eq!(data.dim(), t.source_shape);
        log::debug!("标签图 {:?} -> {:?}", t.resampled_shape, data.dim());
        Ok(LabelMap::new(data, t.source_affine))
    }

    /// 检查标签图与源体数据位于同一网格.
    pub fn check_alignment(label: &LabelMap, source: &Volume) -> Result<(), InversionError> {
        if label.same_grid(source) {
            Ok(())
        } else {
            Err(InversionError::ShapeMismatch {
                expected: source.dim(),
                found: label.dim(),
            })
        }
    }
}
