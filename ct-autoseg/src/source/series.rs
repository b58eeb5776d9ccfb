//! 已排序的源图像切片序列.
//!
//! 读取目录、解析文件的工作由外部完成 (启用 `dicom` feature 时可以使用
//! [`read_series_dir`](super::read_series_dir)). 这里只关心:
//!
//! 1. 按实例号稳定排序;
//! 2. 缺失的管理类字段填默认值, 核心流程不会因此失败;
//! 3. 由像素数据和位置/方向信息构建 [`Volume`], 使网络输入与输出对象共用一套几何.
//!
//! # 坐标约定
//!
//! 切片位置/方向以 LPS 世界坐标给出. 构建的 `Volume` 以 `[列, 行, 切片]` 访问,
//! 切片轴按实例号 **倒序** 排列 (第 `0` 张是实例号最大的切片), 并换算到 RAS 世界坐标.
//! [`Reconciler`](crate::reconcile::Reconciler) 依赖这一约定把标签图还原为
//! `[帧, 行, 列]` 的序列顺序.

use ndarray::{s, Array2, Array3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{check_affine, LoadError, VolumeSource};
use crate::data::{Affine, Volume};

/// 病人信息.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PatientInfo {
    /// 病人 ID.
    pub id: String,

    /// 病人姓名.
    pub name: String,

    /// 出生日期.
    pub birth_date: String,

    /// 性别.
    pub sex: String,
}

/// 检查 (study) 信息.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StudyInfo {
    /// Study Instance UID.
    pub instance_uid: String,

    /// Study ID.
    pub id: String,

    /// 检查日期.
    pub date: String,

    /// 检查时间.
    pub time: String,

    /// Accession Number.
    pub accession_number: String,
}

/// 序列 (series) 信息.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SeriesInfo {
    /// Series Instance UID.
    pub instance_uid: String,

    /// 序列号.
    pub number: i32,

    /// 模态.
    pub modality: String,

    /// 制造商.
    pub manufacturer: String,

    /// Frame of Reference UID.
    pub frame_of_reference_uid: String,
}

impl Default for SeriesInfo {
    fn default() -> Self {
        Self {
            instance_uid: String::new(),
            number: 1,
            modality: String::from("SEG"),
            manufacturer: String::new(),
            frame_of_reference_uid: String::new(),
        }
    }
}

/// 单张切片的空间几何.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SliceGeometry {
    /// 左上角像素中心的 LPS 坐标 (Image Position Patient).
    pub position: [f64; 3],

    /// 行方向与列方向的 LPS 单位向量 (Image Orientation Patient).
    pub orientation: [f64; 6],

    /// (行间距, 列间距), 以毫米为单位.
    pub pixel_spacing: [f64; 2],
}

impl Default for SliceGeometry {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: [1.0, 1.0],
        }
    }
}

/// 一张源切片.
#[derive(Debug, Clone)]
pub struct SliceRecord {
    /// 病人信息.
    pub patient: PatientInfo,

    /// 检查信息.
    pub study: StudyInfo,

    /// 序列信息.
    pub series: SeriesInfo,

    /// SOP Instance UID.
    pub sop_instance_uid: String,

    /// SOP Class UID.
    pub sop_class_uid: String,

    /// 传输语法 UID.
    pub transfer_syntax_uid: String,

    /// 实例号, 序列按它排序.
    pub instance_number: i32,

    /// 空间几何.
    pub geometry: SliceGeometry,

    /// 像素值换算斜率.
    pub rescale_slope: f64,

    /// 像素值换算截距.
    pub rescale_intercept: f64,

    /// 原始存储值, 形状为 `(行, 列)`.
    pub pixels: Array2<f32>,
}

impl Default for SliceRecord {
    fn default() -> Self {
        Self {
            patient: PatientInfo::default(),
            study: StudyInfo::default(),
            series: SeriesInfo::default(),
            sop_instance_uid: String::new(),
            sop_class_uid: String::new(),
            transfer_syntax_uid: String::new(),
            instance_number: 1,
            geometry: SliceGeometry::default(),
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            pixels: Array2::zeros((0, 0)),
        }
    }
}

impl SliceRecord {
    /// 只给出几何与像素, 其余管理类字段全部使用默认值.
    pub fn with_defaults(instance_number: i32, geometry: SliceGeometry, pixels: Array2<f32>) -> Self {
        Self {
            instance_number,
            geometry,
            pixels,
            ..Self::default()
        }
    }

    /// `(行, 列)`.
    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    /// 换算后的像素值 (HU).
    #[inline]
    pub fn value(&self, stored: f32) -> f32 {
        (f64::from(stored) * self.rescale_slope + self.rescale_intercept) as f32
    }
}

/// 输出对象需要从源序列复制的几何信息.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SeriesGeometry {
    /// 行数.
    pub rows: usize,

    /// 列数.
    pub cols: usize,

    /// 帧数 (切片个数).
    pub frames: usize,

    /// (行间距, 列间距).
    pub pixel_spacing: [f64; 2],

    /// 相邻切片中心的距离.
    pub slice_spacing: f64,

    /// 行/列方向余弦.
    pub orientation: [f64; 6],

    /// 每一帧的位置, 按序列顺序.
    pub positions: Vec<[f64; 3]>,

    /// Frame of Reference UID.
    pub frame_of_reference_uid: String,
}

/// 按实例号升序排列的源切片序列.
#[derive(Debug, Clone)]
pub struct SourceSeries {
    slices: Vec<SliceRecord>,
}

impl SourceSeries {
    /// 由任意顺序的切片构建.
    ///
    /// 按实例号稳定排序 (相同实例号保持原有先后). 序列为空或切片尺寸不一致时失败.
    pub fn new(mut slices: Vec<SliceRecord>) -> Result<Self, LoadError> {
        let first = slices.first().ok_or(LoadError::EmptySeries)?;
        let expected = first.dim();
        if let Some((index, s)) = slices.iter().enumerate().find(|(_, s)| s.dim() != expected) {
            return Err(LoadError::InconsistentSlices {
                index,
                expected,
                found: s.dim(),
            });
        }
        slices.sort_by_key(|s| s.instance_number);
        Ok(Self { slices })
    }

    /// 切片个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// 序列总是非空的.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// 所有切片.
    #[inline]
    pub fn slices(&self) -> &[SliceRecord] {
        &self.slices
    }

    /// 第一张切片. 病人/检查/序列信息都取自它.
    #[inline]
    pub fn first(&self) -> &SliceRecord {
        // `new` 保证非空.
        &self.slices[0]
    }

    /// `(帧数, 行数, 列数)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        let (rows, cols) = self.first().dim();
        (self.len(), rows, cols)
    }

    /// 输出对象需要的几何信息.
    pub fn geometry(&self) -> SeriesGeometry {
        let first = self.first();
        let (rows, cols) = first.dim();
        let positions: Vec<[f64; 3]> = self.slices.iter().map(|s| s.geometry.position).collect();
        let slice_spacing = if positions.len() > 1 {
            let (a, b) = (positions[0], positions[positions.len() - 1]);
            let dist = (0..3usize).map(|w| (b[w] - a[w]).powi(2)).sum::<f64>().sqrt();
            dist / (positions.len() - 1) as f64
        } else {
            0.0
        };
        SeriesGeometry {
            rows,
            cols,
            frames: self.len(),
            pixel_spacing: first.geometry.pixel_spacing,
            slice_spacing,
            orientation: first.geometry.orientation,
            positions,
            frame_of_reference_uid: first.series.frame_of_reference_uid.clone(),
        }
    }

    /// 序列体素网格 (`[列, 行, 倒序切片]`) 的 RAS 仿射.
    pub fn affine(&self) -> Result<Affine, LoadError> {
        let n = self.len();
        if n < 2 {
            return Err(LoadError::TooFewSlices(n));
        }
        let first = &self.slices[0].geometry;
        let last = &self.slices[n - 1].geometry;
        let [row_spacing, col_spacing] = first.pixel_spacing;
        let o = first.orientation;

        // LPS.
        let col_axis = [o[0] * col_spacing, o[1] * col_spacing, o[2] * col_spacing];
        let row_axis = [o[3] * row_spacing, o[4] * row_spacing, o[5] * row_spacing];
        let step = (n - 1) as f64;
        let slice_axis = [0usize, 1, 2].map(|w| (first.position[w] - last.position[w]) / step);

        let lps_to_ras = |v: [f64; 3]| [-v[0], -v[1], v[2]];
        let affine = Affine {
            axes: [lps_to_ras(col_axis), lps_to_ras(row_axis), lps_to_ras(slice_axis)],
            origin: lps_to_ras(last.position),
        };
        check_affine(&affine)?;
        Ok(affine)
    }

    /// 由像素数据构建体数据, 换算斜率与截距.
    pub fn to_volume(&self) -> Result<Volume, LoadError> {
        let affine = self.affine()?;
        let (n, rows, cols) = self.shape();
        let mut data = Array3::<f32>::zeros((cols, rows, n));
        for (f, slice) in self.slices.iter().enumerate() {
            let k = n - 1 - f;
            let mut dst = data.slice_mut(s![.., .., k]);
            Zip::from(&mut dst)
                .and(&slice.pixels.t())
                .for_each(|d, p| *d = slice.value(*p));
        }
        log::debug!("由 {n} 张切片构建体数据, 形状 {:?}", data.dim());
        Ok(Volume::new(data, affine))
    }
}

impl VolumeSource for SourceSeries {
    #[inline]
    fn load(&self) -> Result<Volume, LoadError> {
        self.to_volume()
    }

    fn describe(&self) -> String {
        let (n, rows, cols) = self.shape();
        format!("series of {n} slices ({rows} x {cols})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GridAttr;

    fn slice(instance: i32, z: f64, fill: f32) -> SliceRecord {
        let geometry = SliceGeometry {
            position: [-100.0, -120.0, z],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: [0.5, 0.75],
        };
        let pixels = Array2::from_shape_fn((3, 4), |(r, c)| fill + (r * 10 + c) as f32);
        SliceRecord::with_defaults(instance, geometry, pixels)
    }

    #[test]
    fn test_defaults() {
        let s = SliceRecord::default();
        assert_eq!(s.series.number, 1);
        assert_eq!(s.instance_number, 1);
        assert_eq!(s.series.modality, "SEG");
        assert_eq!(s.patient.name, "");
        assert_eq!(s.study.instance_uid, "");
    }

    #[test]
    fn test_stable_sort() {
        let mut a = slice(2, 0.0, 0.0);
        a.sop_instance_uid = "a".into();
        let mut b = slice(1, 0.0, 0.0);
        b.sop_instance_uid = "b".into();
        let mut c = slice(2, 0.0, 0.0);
        c.sop_instance_uid = "c".into();
        let series = SourceSeries::new(vec![a, b, c]).unwrap();
        let order: Vec<&str> = series.slices().iter().map(|s| s.sop_instance_uid.as_str()).collect();
        assert_eq!(order, ["b", "a", "c"]);
    }

    #[test]
    fn test_empty_and_inconsistent() {
        assert!(matches!(SourceSeries::new(vec![]), Err(LoadError::EmptySeries)));
        let mut odd = slice(2, 0.0, 0.0);
        odd.pixels = Array2::zeros((5, 5));
        let err = SourceSeries::new(vec![slice(1, 0.0, 0.0), odd]).unwrap_err();
        assert!(matches!(err, LoadError::InconsistentSlices { index: 1, .. }));
    }

    #[test]
    fn test_to_volume_layout_and_affine() {
        // 实例号增大, z 减小.
        let series = SourceSeries::new(vec![
            slice(3, -6.0, 200.0),
            slice(1, 0.0, 0.0),
            slice(2, -3.0, 100.0),
        ])
        .unwrap();
        assert!(matches!(
            SourceSeries::new(vec![slice(1, 0.0, 0.0)]).unwrap().to_volume(),
            Err(LoadError::TooFewSlices(1))
        ));

        let v = series.load().unwrap();
        assert_eq!(v.dim(), (4, 3, 3));
        // k = 0 是实例号最大的切片.
        assert_eq!(v[(1, 2, 0)], 200.0 + 21.0);
        assert_eq!(v[(1, 2, 2)], 21.0);
        assert_eq!(v.axcodes(), ['L', 'P', 'S']);
        assert_eq!(v.spacing(), [0.75, 0.5, 3.0]);

        // 体素中心的世界坐标与切片位置一致 (RAS 与 LPS 相差 x, y 符号).
        let p = v.affine().world((2, 1, 2));
        assert_eq!(p, [100.0 - 1.5, 120.0 - 0.5, 0.0]);

        let g = series.geometry();
        assert_eq!((g.frames, g.rows, g.cols), (3, 3, 4));
        assert_eq!(g.slice_spacing, 3.0);
        assert_eq!(g.positions[2], [-100.0, -120.0, -6.0]);
    }

    #[test]
    fn test_rescale() {
        let mut s = slice(1, 0.0, 0.0);
        s.rescale_slope = 2.0;
        s.rescale_intercept = -1024.0;
        assert_eq!(s.value(10.0), -1004.0);
    }
}
