//! DICOM 目录读取.
//!
//! 只支持未压缩 (native) 的 8/16 位单通道像素数据, 这覆盖了常见的 CT 序列.

use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use dicom_core::Tag;
use dicom_object::{open_file, DefaultDicomObject};
use ndarray::Array2;

use super::{LoadError, PatientInfo, SeriesInfo, SliceGeometry, SliceRecord, SourceSeries, StudyInfo};

/// 读取目录 `dir` 中所有 `.dcm` 文件 (不区分大小写), 组成按实例号排序的序列.
///
/// 缺失的管理类字段使用 [`SliceRecord::default`] 中的默认值.
pub fn read_series_dir<P: AsRef<Path>>(dir: P) -> Result<SourceSeries, LoadError> {
    let dir = dir.as_ref();
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case("dcm"))
        })
        .collect();
    // 目录遍历顺序不确定, 先按文件名排好, 使实例号相同的切片顺序可复现.
    files.sort();
    log::info!("在 {dir:?} 中找到 {} 个 DICOM 文件", files.len());

    let slices = files
        .iter()
        .map(|p| read_slice(p))
        .collect::<Result<Vec<_>, _>>()?;
    SourceSeries::new(slices)
}

/// 读取单个 DICOM 文件.
pub(crate) fn read_slice(path: &Path) -> Result<SliceRecord, LoadError> {
    let obj = open_file(path).map_err(|e| LoadError::Dicom(format!("{path:?}: {e}")))?;
    let defaults = SliceRecord::default();

    let patient = PatientInfo {
        id: text(&obj, tags::PATIENT_ID),
        name: text(&obj, tags::PATIENT_NAME),
        birth_date: text(&obj, tags::PATIENT_BIRTH_DATE),
        sex: text(&obj, tags::PATIENT_SEX),
    };
    let study = StudyInfo {
        instance_uid: text(&obj, tags::STUDY_INSTANCE_UID),
        id: text(&obj, tags::STUDY_ID),
        date: text(&obj, tags::STUDY_DATE),
        time: text(&obj, tags::STUDY_TIME),
        accession_number: text(&obj, tags::ACCESSION_NUMBER),
    };
    let series = SeriesInfo {
        instance_uid: text(&obj, tags::SERIES_INSTANCE_UID),
        number: int(&obj, tags::SERIES_NUMBER).unwrap_or(defaults.series.number),
        modality: text_or(&obj, tags::MODALITY, &defaults.series.modality),
        manufacturer: text(&obj, tags::MANUFACTURER),
        frame_of_reference_uid: text(&obj, tags::FRAME_OF_REFERENCE_UID),
    };

    let geometry = SliceGeometry {
        position: floats(&obj, tags::IMAGE_POSITION_PATIENT).unwrap_or(defaults.geometry.position),
        orientation: floats(&obj, tags::IMAGE_ORIENTATION_PATIENT)
            .unwrap_or(defaults.geometry.orientation),
        pixel_spacing: floats(&obj, tags::PIXEL_SPACING).unwrap_or(defaults.geometry.pixel_spacing),
    };

    Ok(SliceRecord {
        patient,
        study,
        series,
        sop_instance_uid: text(&obj, tags::SOP_INSTANCE_UID),
        sop_class_uid: text(&obj, tags::SOP_CLASS_UID),
        transfer_syntax_uid: clean(obj.meta().transfer_syntax()),
        instance_number: int(&obj, tags::INSTANCE_NUMBER).unwrap_or(defaults.instance_number),
        geometry,
        rescale_slope: float(&obj, tags::RESCALE_SLOPE).unwrap_or(defaults.rescale_slope),
        rescale_intercept: float(&obj, tags::RESCALE_INTERCEPT).unwrap_or(defaults.rescale_intercept),
        pixels: pixels(&obj, path)?,
    })
}

/// 去掉 UID/字符串尾部的填充字符.
fn clean(s: &str) -> String {
    s.trim_end_matches(['\0', ' ']).to_string()
}

fn text(obj: &DefaultDicomObject, tag: Tag) -> String {
    text_or(obj, tag, "")
}

fn text_or(obj: &DefaultDicomObject, tag: Tag, default: &str) -> String {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| clean(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn int(obj: &DefaultDicomObject, tag: Tag) -> Option<i32> {
    obj.element(tag).ok()?.to_int::<i32>().ok()
}

fn float(obj: &DefaultDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn floats<const N: usize>(obj: &DefaultDicomObject, tag: Tag) -> Option<[f64; N]> {
    let v = obj.element(tag).ok()?.to_multi_float64().ok()?;
    v.try_into().ok()
}

fn pixels(obj: &DefaultDicomObject, path: &Path) -> Result<Array2<f32>, LoadError> {
    let bad = |what: &str| LoadError::Dicom(format!("{path:?}: {what}"));
    let rows = int(obj, tags::ROWS).ok_or_else(|| bad("缺少 Rows"))? as usize;
    let cols = int(obj, tags::COLUMNS).ok_or_else(|| bad("缺少 Columns"))? as usize;
    let bits = int(obj, tags::BITS_ALLOCATED).unwrap_or(16);
    let signed = int(obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;
    let bytes = obj
        .element(tags::PIXEL_DATA)
        .map_err(|_| bad("缺少 PixelData"))?
        .to_bytes()
        .map_err(|_| bad("PixelData 不是原生格式"))?;

    let n = rows * cols;
    let values: Vec<f32> = match (bits, signed) {
        (8, false) => bytes.iter().take(n).map(|b| f32::from(*b)).collect(),
        (8, true) => bytes.iter().take(n).map(|b| f32::from(*b as i8)).collect(),
        (16, false) => bytes
            .chunks_exact(2)
            .take(n)
            .map(|c| f32::from(u16::from_le_bytes([c[0], c[1]])))
            .collect(),
        (16, true) => bytes
            .chunks_exact(2)
            .take(n)
            .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        _ => return Err(bad(&format!("不支持 {bits} 位像素"))),
    };
    if values.len() != n {
        return Err(bad(&format!("像素个数 {} 与 {rows} x {cols} 不符", values.len())));
    }
    Array2::from_shape_vec((rows, cols), values).map_err(|e| bad(&e.to_string()))
}
