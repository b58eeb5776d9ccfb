//! 分割选择: 按体素个数挑选至多 `N` 个解剖结构, 生成二值掩码与描述.

use std::num::NonZeroUsize;

use ndarray::Array3;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::identity::{ALGORITHM_NAME, ALGORITHM_VERSION, TRACKING_ID_PREFIX};
use crate::consts::labels::{self, MAX_LABEL};
use crate::consts::{codes, Code, DEFAULT_MAX_SEGMENTS};
use crate::data::LabelMap;

/// 分割选择失败.
#[derive(Debug, Error)]
pub enum SelectError {
    /// 标签图中没有任何非背景体素.
    #[error("标签图中没有任何解剖结构, 无法生成分割对象")]
    EmptySelection,

    /// 标签图中出现了词表之外的标签值.
    #[error("标签值 {label} 不在 1..={MAX_LABEL} 范围内 ({count} 个体素)")]
    UnknownLabel {
        /// 标签值.
        label: u8,

        /// 该标签的体素个数.
        count: usize,
    },
}

/// 编码概念的自有版本, 便于序列化.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CodedConcept {
    /// 编码值.
    pub value: String,

    /// 编码方案.
    pub scheme: String,

    /// 含义.
    pub meaning: String,
}

impl From<Code> for CodedConcept {
    fn from(c: Code) -> Self {
        Self {
            value: c.value.to_string(),
            scheme: c.scheme.to_string(),
            meaning: c.meaning.to_string(),
        }
    }
}

/// 产生分割的算法.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlgorithmIdentity {
    /// 算法名称.
    pub name: String,

    /// 算法版本.
    pub version: String,

    /// 算法家族.
    pub family: CodedConcept,

    /// 算法类型, 固定为 `AUTOMATIC`.
    pub kind: String,
}

impl Default for AlgorithmIdentity {
    fn default() -> Self {
        Self {
            name: ALGORITHM_NAME.to_string(),
            version: ALGORITHM_VERSION.to_string(),
            family: codes::ARTIFICIAL_INTELLIGENCE.into(),
            kind: String::from("AUTOMATIC"),
        }
    }
}

/// 单个分割的描述.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentDescriptor {
    /// 分割序号, 从 1 开始连续编号.
    pub number: u16,

    /// 对应的标签值.
    pub label: u8,

    /// 解剖结构名称.
    pub name: String,

    /// 追踪 ID.
    pub tracking_id: String,

    /// 追踪 UID, 每次运行新生成.
    pub tracking_uid: String,

    /// 属性类别.
    pub category: CodedConcept,

    /// 属性类型.
    pub kind: CodedConcept,

    /// 算法.
    pub algorithm: AlgorithmIdentity,
}

impl SegmentDescriptor {
    /// 为 `label` 生成第 `number` 个分割的描述. `label` 必须在词表中.
    fn new(number: u16, label: u8, name: &str) -> Self {
        Self {
            number,
            label,
            name: name.to_string(),
            tracking_id: format!("{TRACKING_ID_PREFIX}{name}"),
            tracking_uid: crate::uid::fresh(),
            category: codes::TISSUE.into(),
            kind: codes::CONNECTIVE_TISSUE.into(),
            algorithm: AlgorithmIdentity::default(),
        }
    }
}

/// 二值掩码及其描述. 掩码中 `1` 为前景.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentMask {
    /// 描述.
    pub descriptor: SegmentDescriptor,

    /// 掩码, 与标签图同形状.
    pub mask: Array3<u8>,
}

impl SegmentMask {
    /// 前景体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|p| **p != 0).count()
    }
}

/// 由直方图得到非背景标签的排名: 体素个数降序, 并列时标签值升序.
///
/// 遇到词表之外的标签值时失败.
pub fn rank(histogram: &[usize; 256]) -> Result<Vec<(u8, usize)>, SelectError> {
    let mut ans = Vec::new();
    for (label, &count) in histogram.iter().enumerate().skip(1) {
        if count == 0 {
            continue;
        }
        let label = label as u8;
        if !labels::is_known(label) {
            return Err(SelectError::UnknownLabel { label, count });
        }
        ans.push((label, count));
    }
    ans.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    Ok(ans)
}

/// 分割选择器.
#[derive(Debug, Copy, Clone)]
pub struct Selector {
    max_segments: NonZeroUsize,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_MAX_SEGMENTS).unwrap_or(NonZeroUsize::MIN))
    }
}

impl Selector {
    /// 至多保留 `max_segments` 个分割.
    #[inline]
    pub fn new(max_segments: NonZeroUsize) -> Self {
        Self { max_segments }
    }

    /// 最多保留的分割个数.
    #[inline]
    pub fn max_segments(&self) -> usize {
        self.max_segments.get()
    }

    /// 选出的 `(标签, 体素个数)`, 按选择顺序.
    pub fn choose(&self, label: &LabelMap) -> Result<Vec<(u8, usize)>, SelectError> {
        let mut ranked = rank(&label.histogram())?;
        if ranked.is_empty() {
            return Err(SelectError::EmptySelection);
        }
        ranked.truncate(self.max_segments());
        Ok(ranked)
    }

    /// 选择并生成掩码与描述.
    pub fn select(&self, label: &LabelMap) -> Result<Vec<SegmentMask>, SelectError> {
        let chosen = self.choose(label)?;
        log::info!("选出 {} 个分割: {chosen:?}", chosen.len());
        let masks = extract(label, &chosen);
        Ok(masks)
    }
}

#[cfg(feature = "rayon")]
fn extract(label: &LabelMap, chosen: &[(u8, usize)]) -> Vec<SegmentMask> {
    use rayon::prelude::*;
    chosen
        .par_iter()
        .enumerate()
        .map(|(i, (l, _))| make_mask(label, i, *l))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn extract(label: &LabelMap, chosen: &[(u8, usize)]) -> Vec<SegmentMask> {
    chosen
        .iter()
        .enumerate()
        .map(|(i, (l, _))| make_mask(label, i, *l))
        .collect()
}

fn make_mask(label: &LabelMap, index: usize, value: u8) -> SegmentMask {
    // `rank` 已经保证标签在词表中.
    let name = labels::name(value).unwrap_or("unknown");
    SegmentMask {
        descriptor: SegmentDescriptor::new(index as u16 + 1, value, name),
        mask: label.mask(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    /// 依次填入 `(标签, 个数)`, 其余为背景.
    fn label_map(counts: &[(u8, usize)]) -> LabelMap {
        let mut flat = Vec::new();
        for (l, n) in counts {
            flat.extend(std::iter::repeat(*l).take(*n));
        }
        let total = flat.len().max(1);
        let side = (total as f64).cbrt().ceil() as usize + 1;
        flat.resize(side * side * side, 0);
        LabelMap::fake(Array3::from_shape_vec((side, side, side), flat).unwrap())
    }

    #[test]
    fn test_top_two() {
        let map = label_map(&[(1, 50), (5, 200), (12, 10)]);
        let masks = Selector::new(nz(2)).select(&map).unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].descriptor.label, 5);
        assert_eq!(masks[0].descriptor.number, 1);
        assert_eq!(masks[0].descriptor.name, "liver");
        assert_eq!(masks[0].descriptor.tracking_id, "MONAI_liver");
        assert_eq!(masks[0].count(), 200);
        assert_eq!(masks[1].descriptor.label, 1);
        assert_eq!(masks[1].descriptor.number, 2);
        assert_eq!(masks[1].count(), 50);
        assert_ne!(masks[0].descriptor.tracking_uid, masks[1].descriptor.tracking_uid);
    }

    #[test]
    fn test_fewer_labels_than_requested() {
        let map = label_map(&[(3, 4), (7, 9)]);
        let masks = Selector::default().select(&map).unwrap();
        assert_eq!(masks.len(), 2);
        let numbers: Vec<u16> = masks.iter().map(|m| m.descriptor.number).collect();
        assert_eq!(numbers, [1, 2]);
        for m in &masks {
            assert_eq!(m.count(), map.count(m.descriptor.label));
        }
    }

    #[test]
    fn test_tie_break_by_label() {
        let map = label_map(&[(9, 6), (2, 6), (40, 6), (3, 1)]);
        let chosen = Selector::new(nz(3)).choose(&map).unwrap();
        assert_eq!(chosen, vec![(2, 6), (9, 6), (40, 6)]);
        // 同样的分布多次选择结果一致.
        assert_eq!(Selector::new(nz(3)).choose(&map).unwrap(), chosen);
    }

    #[test]
    fn test_empty_and_unknown() {
        let empty = label_map(&[]);
        assert!(matches!(
            Selector::default().select(&empty),
            Err(SelectError::EmptySelection)
        ));
        let bad = label_map(&[(1, 3), (105, 2)]);
        assert!(matches!(
            Selector::default().select(&bad),
            Err(SelectError::UnknownLabel { label: 105, count: 2 })
        ));
    }

    #[test]
    fn test_descriptor_codes() {
        let map = label_map(&[(104, 1)]);
        let m = &Selector::default().select(&map).unwrap()[0];
        assert_eq!(m.descriptor.name, "urinary_bladder");
        assert_eq!(m.descriptor.category.value, "85756007");
        assert_eq!(m.descriptor.kind.value, "181769001");
        assert_eq!(m.descriptor.algorithm.family.value, "113037");
        assert_eq!(m.descriptor.algorithm.kind, "AUTOMATIC");
        assert_eq!(m.descriptor.algorithm.name, "MONAI Whole Body CT Segmentation");
    }
}
