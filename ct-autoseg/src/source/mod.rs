//! 体数据来源.
//!
//! 流水线只通过 [`VolumeSource`] 获取待分割的 [`Volume`]. 具体来源包括
//! nii 文件 ([`NiftiSource`]), 已排序的切片序列 ([`SourceSeries`]) 以及内存中现成的数据
//! ([`MemorySource`], 主要用于测试).

use std::path::PathBuf;

use thiserror::Error;

use crate::data::{GridAttr, Volume};

mod nifti;
mod series;

#[cfg(feature = "dicom")]
mod dicom;

pub use self::nifti::NiftiSource;
pub use series::{PatientInfo, SeriesGeometry, SeriesInfo, SliceGeometry, SliceRecord, SourceSeries, StudyInfo};

#[cfg(feature = "dicom")]
pub use dicom::read_series_dir;

/// 体数据读取失败.
#[derive(Debug, Error)]
pub enum LoadError {
    /// 文件读取失败.
    #[error("无法读取 `{path}`: {source}")]
    Io {
        /// 出错的路径.
        path: PathBuf,

        /// 底层错误.
        source: std::io::Error,
    },

    /// nii 文件解码失败.
    #[error("nii 解码失败: {0}")]
    Nifti(#[from] ::nifti::NiftiError),

    /// DICOM 文件解码失败.
    #[error("DICOM 解码失败: {0}")]
    Dicom(String),

    /// 数据维度不是三维.
    #[error("期望三维体数据, 实际维度为 {0:?}")]
    NotVolume(Vec<usize>),

    /// 切片个数不足.
    #[error("至少需要 2 张切片, 实际只有 {0} 张")]
    TooFewSlices(usize),

    /// 序列为空.
    #[error("切片序列为空")]
    EmptySeries,

    /// 序列中切片的像素尺寸不一致.
    #[error("第 {index} 张切片尺寸为 {found:?}, 与首张切片的 {expected:?} 不一致")]
    InconsistentSlices {
        /// 切片在输入中的下标.
        index: usize,

        /// 首张切片的 (行, 列).
        expected: (usize, usize),

        /// 该切片的 (行, 列).
        found: (usize, usize),
    },

    /// 几何信息非法 (零间距, 非有限值等).
    #[error("几何信息非法: {0}")]
    Geometry(String),
}

/// 待分割体数据的来源.
pub trait VolumeSource {
    /// 解码得到体数据.
    fn load(&self) -> Result<Volume, LoadError>;

    /// 用于日志的简短描述.
    fn describe(&self) -> String {
        String::from("volume")
    }
}

impl<S: VolumeSource + ?Sized> VolumeSource for Box<S> {
    #[inline]
    fn load(&self) -> Result<Volume, LoadError> {
        (**self).load()
    }

    #[inline]
    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// 内存中已经存在的体数据.
#[derive(Debug, Clone)]
pub struct MemorySource {
    volume: Volume,
}

impl MemorySource {
    /// 包装一份体数据.
    #[inline]
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }
}

impl VolumeSource for MemorySource {
    #[inline]
    fn load(&self) -> Result<Volume, LoadError> {
        Ok(self.volume.clone())
    }

    fn describe(&self) -> String {
        format!("memory volume {:?}", self.volume.dim())
    }
}

/// 检查仿射的每个轴都是有限且非零的.
pub(crate) fn check_affine(affine: &crate::data::Affine) -> Result<(), LoadError> {
    let finite = affine
        .axes
        .iter()
        .flatten()
        .chain(affine.origin.iter())
        .all(|v| v.is_finite());
    if !finite {
        return Err(LoadError::Geometry(format!("仿射包含非有限值: {affine:?}")));
    }
    if affine.spacing().iter().any(|s| *s <= 0.0) {
        return Err(LoadError::Geometry(format!("体素间距必须为正: {:?}", affine.spacing())));
    }
    Ok(())
}
