//! 分割对象的组装与写出.
//!
//! [`build`] 把选出的掩码叠成 `(帧, 行, 列, 分割)` 的四维数组, 并附上源序列的几何,
//! 引用信息和固定的设备信息. 写出由 [`SegWriter`] 完成:
//!
//! - [`ArchiveWriter`]: zlib 压缩的 bincode 归档 (需要 `serde` feature);
//! - [`MemoryWriter`]: 保存在内存中, 用于测试;
//! - `DicomSegWriter`: DICOM Segmentation Storage 文件 (需要 `dicom` feature).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array4, ArrayView3, Axis};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::identity::*;
use crate::select::{SegmentDescriptor, SegmentMask};
use crate::source::{PatientInfo, SeriesGeometry, SourceSeries, StudyInfo};

mod archive;

#[cfg(feature = "dicom")]
mod dicom;

#[cfg(feature = "serde")]
pub use archive::{read_archive, ArchiveWriter};
pub use archive::MemoryWriter;

#[cfg(feature = "dicom")]
pub use dicom::DicomSegWriter;

/// 分割对象组装失败.
#[derive(Debug, Error)]
pub enum BuildError {
    /// 没有任何掩码.
    #[error("没有可写出的分割")]
    NoSegments,

    /// 掩码与源序列的形状不一致.
    #[error("第 {index} 个掩码形状为 {found:?}, 源序列为 {expected:?}")]
    GeometryMismatch {
        /// 掩码下标.
        index: usize,

        /// 源序列 `(帧, 行, 列)`.
        expected: (usize, usize, usize),

        /// 掩码形状.
        found: (usize, usize, usize),
    },

    /// 分割序号不是 `1..=n`.
    #[error("第 {index} 个分割的序号为 {found}")]
    Numbering {
        /// 掩码下标.
        index: usize,

        /// 实际序号.
        found: u16,
    },
}

/// 分割对象写出失败.
#[derive(Debug, Error)]
pub enum WriteError {
    /// 文件系统错误.
    #[error("无法写入 `{path}`: {source}")]
    Io {
        /// 目标路径.
        path: PathBuf,

        /// 底层错误.
        source: std::io::Error,
    },

    /// 编码失败.
    #[error("编码失败: {0}")]
    Encode(String),
}

/// 被引用的源实例.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferencedInstance {
    /// SOP Class UID.
    pub sop_class_uid: String,

    /// SOP Instance UID.
    pub sop_instance_uid: String,
}

/// 固定的设备与序列信息.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// 制造商.
    pub manufacturer: String,

    /// 型号.
    pub model_name: String,

    /// 软件版本.
    pub software_versions: Vec<String>,

    /// 设备序列号.
    pub serial_number: String,

    /// 序列描述.
    pub series_description: String,

    /// 序列号.
    pub series_number: i32,

    /// 实例号.
    pub instance_number: i32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: MANUFACTURER.to_string(),
            model_name: MODEL_NAME.to_string(),
            software_versions: vec![SOFTWARE_VERSION.to_string()],
            serial_number: DEVICE_SERIAL_NUMBER.to_string(),
            series_description: SERIES_DESCRIPTION.to_string(),
            series_number: SERIES_NUMBER,
            instance_number: INSTANCE_NUMBER,
        }
    }
}

/// 多通道二值分割对象.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentationObject {
    /// `(帧, 行, 列, 分割)` 的二值数组.
    pub pixels: Array4<u8>,

    /// 分割描述, 与最后一维一一对应.
    pub segments: Vec<SegmentDescriptor>,

    /// 从源序列复制的几何.
    pub geometry: SeriesGeometry,

    /// 病人信息.
    pub patient: PatientInfo,

    /// 检查信息.
    pub study: StudyInfo,

    /// 源序列的 Series Instance UID.
    pub referenced_series_uid: String,

    /// 源序列的所有实例, 按帧顺序.
    pub referenced_instances: Vec<ReferencedInstance>,

    /// 新生成的 Series Instance UID.
    pub series_instance_uid: String,

    /// 新生成的 SOP Instance UID.
    pub sop_instance_uid: String,

    /// Frame of Reference UID. 源序列没有时新生成一个.
    pub frame_of_reference_uid: String,

    /// 内容创建日期, `YYYYMMDD`.
    pub content_date: String,

    /// 内容创建时间, `HHMMSS`.
    pub content_time: String,

    /// 设备信息.
    pub device: DeviceInfo,
}

impl SegmentationObject {
    /// 分割个数.
    #[inline]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// `(帧, 行, 列)`.
    #[inline]
    pub fn frame_shape(&self) -> (usize, usize, usize) {
        let (f, r, c, _) = self.pixels.dim();
        (f, r, c)
    }

    /// 第 `index` 个分割 (从 0 开始) 的掩码.
    #[inline]
    pub fn mask(&self, index: usize) -> ArrayView3<'_, u8> {
        self.pixels.index_axis(Axis(3), index)
    }
}

/// 组装分割对象.
///
/// 每个掩码的形状都必须是源序列的 `(帧, 行, 列)`. 分割序号必须依次为 `1..=n`.
pub fn build(series: &SourceSeries, masks: Vec<SegmentMask>) -> Result<SegmentationObject, BuildError> {
    if masks.is_empty() {
        return Err(BuildError::NoSegments);
    }
    let expected = series.shape();
    for (index, m) in masks.iter().enumerate() {
        if m.mask.dim() != expected {
            return Err(BuildError::GeometryMismatch {
                index,
                expected,
                found: m.mask.dim(),
            });
        }
        if usize::from(m.descriptor.number) != index + 1 {
            return Err(BuildError::Numbering {
                index,
                found: m.descriptor.number,
            });
        }
    }

    let (f, r, c) = expected;
    let mut pixels = Array4::<u8>::zeros((f, r, c, masks.len()));
    let mut segments = Vec::with_capacity(masks.len());
    for (mut dst, m) in pixels.axis_iter_mut(Axis(3)).zip(masks) {
        dst.assign(&m.mask.mapv(|p| u8::from(p != 0)));
        segments.push(m.descriptor);
    }

    let first = series.first();
    let geometry = series.geometry();
    let frame_of_reference_uid = if geometry.frame_of_reference_uid.is_empty() {
        log::warn!("源序列缺少 Frame of Reference UID, 将新生成一个");
        crate::uid::fresh()
    } else {
        geometry.frame_of_reference_uid.clone()
    };
    let now = chrono::Local::now();
    let referenced_instances = series
        .slices()
        .iter()
        .map(|s| ReferencedInstance {
            sop_class_uid: s.sop_class_uid.clone(),
            sop_instance_uid: s.sop_instance_uid.clone(),
        })
        .collect();
    let obj = SegmentationObject {
        pixels,
        segments,
        geometry,
        patient: first.patient.clone(),
        study: first.study.clone(),
        referenced_series_uid: first.series.instance_uid.clone(),
        referenced_instances,
        series_instance_uid: crate::uid::fresh(),
        sop_instance_uid: crate::uid::fresh(),
        frame_of_reference_uid,
        content_date: now.format("%Y%m%d").to_string(),
        content_time: now.format("%H%M%S").to_string(),
        device: DeviceInfo::default(),
    };
    log::info!(
        "组装分割对象: {} 个分割, 形状 {:?}",
        obj.num_segments(),
        obj.pixels.dim()
    );
    Ok(obj)
}

/// 先写入同目录下的临时文件, 成功后再改名为 `path`.
///
/// `encode` 失败时删除临时文件, `path` 处不会留下写了一半的内容.
#[cfg(any(feature = "serde", feature = "dicom"))]
pub(crate) fn write_atomic<F>(path: &Path, encode: F) -> Result<(), WriteError>
where
    F: FnOnce(&Path) -> Result<(), WriteError>,
{
    let tmp = partial_path(path);
    if let Err(e) = encode(&tmp) {
        discard(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path).map_err(|source| {
        discard(&tmp);
        WriteError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// `dir/name` 对应的临时文件 `dir/.name.part`.
#[cfg(any(feature = "serde", feature = "dicom"))]
fn partial_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(any(feature = "serde", feature = "dicom"))]
fn discard(tmp: &Path) {
    match std::fs::remove_file(tmp) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            log::warn!("无法删除临时文件 {tmp:?}: {e}");
        }
        _ => {}
    }
}

/// 分割对象写出器.
pub trait SegWriter {
    /// 将 `obj` 写入目录 `dir`, 返回写出的文件路径.
    fn write(&self, obj: &SegmentationObject, dir: &Path) -> Result<PathBuf, WriteError>;
}

impl<W: SegWriter + ?Sized> SegWriter for Box<W> {
    #[inline]
    fn write(&self, obj: &SegmentationObject, dir: &Path) -> Result<PathBuf, WriteError> {
        (**self).write(obj, dir)
    }
}

impl<W: SegWriter + ?Sized> SegWriter for Arc<W> {
    #[inline]
    fn write(&self, obj: &SegmentationObject, dir: &Path) -> Result<PathBuf, WriteError> {
        (**self).write(obj, dir)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::LabelMap;
    use crate::select::Selector;
    use crate::source::{SliceGeometry, SliceRecord};
    use ndarray::{Array2, Array3};

    /// `n` 张 `rows x cols` 的切片, 带齐管理类字段.
    pub(crate) fn series(n: usize, rows: usize, cols: usize) -> SourceSeries {
        let slices = (0..n)
            .map(|f| {
                let geometry = SliceGeometry {
                    position: [0.0, 0.0, -(f as f64) * 3.0],
                    ..SliceGeometry::default()
                };
                let mut s = SliceRecord::with_defaults(f as i32 + 1, geometry, Array2::zeros((rows, cols)));
                s.sop_instance_uid = format!("1.2.3.{}", f + 1);
                s.sop_class_uid = crate::consts::uids::CT_IMAGE_STORAGE.to_string();
                s.series.instance_uid = String::from("1.2.3");
                s.study.instance_uid = String::from("1.2");
                s.patient.name = String::from("Anonymous");
                s
            })
            .collect();
        SourceSeries::new(slices).unwrap()
    }

    pub(crate) fn masks(shape: (usize, usize, usize)) -> Vec<SegmentMask> {
        let data = Array3::from_shape_fn(shape, |(f, r, c)| match (f + r + c) % 4 {
            0 => 5,
            1 => 1,
            2 => 5,
            _ => 0,
        });
        Selector::default().select(&LabelMap::fake(data)).unwrap()
    }

    #[test]
    fn test_build() {
        let s = series(3, 4, 5);
        let m = masks(s.shape());
        let counts: Vec<usize> = m.iter().map(|m| m.count()).collect();
        let obj = build(&s, m).unwrap();

        assert_eq!(obj.pixels.dim(), (3, 4, 5, 2));
        assert_eq!(obj.frame_shape(), s.shape());
        let numbers: Vec<u16> = obj.segments.iter().map(|d| d.number).collect();
        assert_eq!(numbers, [1, 2]);
        for (i, n) in counts.iter().enumerate() {
            assert_eq!(obj.mask(i).iter().filter(|p| **p == 1).count(), *n);
        }
        assert_eq!(obj.geometry, s.geometry());
        assert_eq!(obj.referenced_series_uid, "1.2.3");
        assert_eq!(obj.referenced_instances.len(), 3);
        assert_eq!(obj.referenced_instances[2].sop_instance_uid, "1.2.3.3");
        assert_eq!(obj.study.instance_uid, "1.2");
        assert_eq!(obj.patient.name, "Anonymous");
        assert_ne!(obj.series_instance_uid, obj.sop_instance_uid);
        assert!(obj.frame_of_reference_uid.starts_with("2.25."));
        assert_eq!(obj.content_date.len(), 8);
        assert_eq!(obj.content_time.len(), 6);
        assert!(obj.content_date.chars().chain(obj.content_time.chars()).all(|c| c.is_ascii_digit()));
        assert_eq!(obj.device.series_number, 2);
        assert_eq!(obj.device.manufacturer, "MONAI");
        assert_eq!(obj.device.software_versions, ["0.1.0"]);
    }

    #[test]
    fn test_build_keeps_frame_of_reference() {
        let slices = (0..2)
            .map(|f| {
                let geometry = SliceGeometry {
                    position: [0.0, 0.0, f as f64],
                    ..SliceGeometry::default()
                };
                let mut s = SliceRecord::with_defaults(f + 1, geometry, Array2::zeros((2, 2)));
                s.series.frame_of_reference_uid = String::from("1.2.3.4");
                s
            })
            .collect();
        let s = SourceSeries::new(slices).unwrap();
        let obj = build(&s, masks(s.shape())).unwrap();
        assert_eq!(obj.frame_of_reference_uid, "1.2.3.4");
        assert_eq!(obj.geometry.frame_of_reference_uid, "1.2.3.4");
    }

    #[cfg(any(feature = "serde", feature = "dicom"))]
    #[test]
    fn test_write_atomic() {
        let dir = std::env::temp_dir().join(format!("ct-autoseg-atomic-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(crate::consts::SEG_FILE_NAME);
        let entries = || std::fs::read_dir(&dir).unwrap().count();

        // 写了一半就失败: 目录中什么都不留.
        let failed = write_atomic(&path, |tmp| {
            std::fs::write(tmp, b"half").unwrap();
            Err(WriteError::Encode(String::from("中断")))
        });
        assert!(matches!(failed, Err(WriteError::Encode(_))));
        assert!(!path.exists());
        assert_eq!(entries(), 0);

        write_atomic(&path, |tmp| {
            std::fs::write(tmp, b"full").map_err(|source| WriteError::Io {
                path: tmp.to_path_buf(),
                source,
            })
        })
        .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"full");
        assert_eq!(entries(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let s = series(3, 4, 5);
        assert!(matches!(build(&s, vec![]), Err(BuildError::NoSegments)));

        let wrong = masks((5, 4, 3));
        assert!(matches!(
            build(&s, wrong),
            Err(BuildError::GeometryMismatch { index: 0, .. })
        ));

        let mut renumbered = masks(s.shape());
        renumbered[1].descriptor.number = 7;
        assert!(matches!(
            build(&s, renumbered),
            Err(BuildError::Numbering { index: 1, found: 7 })
        ));
    }
}
