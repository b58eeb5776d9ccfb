//! DICOM Segmentation Storage 写出.
//!
//! 二值分割, 每个 (分割, 源帧) 对应一帧, 帧按分割序号、再按源帧顺序排列.
//! 像素按位打包 (低位在前), 帧与帧之间不留填充.

use std::path::{Path, PathBuf};

use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use ndarray::Axis;
use num::ToPrimitive;

use super::{write_atomic, SegWriter, SegmentationObject, WriteError};
use crate::consts::codes::{SEGMENTATION_DERIVATION, SOURCE_IMAGE_FOR_PROCESSING};
use crate::consts::uids::{EXPLICIT_VR_LITTLE_ENDIAN, SEGMENTATION_STORAGE};
use crate::consts::SEG_FILE_NAME;
use crate::select::{CodedConcept, SegmentDescriptor};

/// 以 DICOM SEG 文件写出, 文件名为 `segmentation.dcm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomSegWriter;

impl SegWriter for DicomSegWriter {
    fn write(&self, obj: &SegmentationObject, dir: &Path) -> Result<PathBuf, WriteError> {
        let path = dir.join(SEG_FILE_NAME);
        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(SEGMENTATION_STORAGE)
            .media_storage_sop_instance_uid(obj.sop_instance_uid.as_str());
        let file = to_dataset(obj)?
            .with_meta(meta)
            .map_err(|e| WriteError::Encode(e.to_string()))?;
        write_atomic(&path, |tmp| {
            file.write_to_file(tmp)
                .map_err(|e| WriteError::Encode(format!("{tmp:?}: {e}")))
        })?;
        log::info!("DICOM SEG 已写入 {path:?}");
        Ok(path)
    }
}

fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn put_u16(obj: &mut InMemDicomObject, tag: Tag, value: u16) {
    obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

fn put_tag(obj: &mut InMemDicomObject, tag: Tag, value: Tag) {
    obj.put(DataElement::new(tag, VR::AT, PrimitiveValue::from(value)));
}

/// 十进制字符串 (DS) 多值.
fn put_ds(obj: &mut InMemDicomObject, tag: Tag, values: &[f64]) {
    let v = PrimitiveValue::Strs(values.iter().map(|x| format_ds(*x)).collect());
    obj.put(DataElement::new(tag, VR::DS, v));
}

/// DS 单值最多 16 个字符. 从 6 位小数起逐步降低精度, 直到放得下.
fn format_ds(x: f64) -> String {
    for digits in (0..=6).rev() {
        let s = trim_decimal(format!("{x:.digits$}"));
        if s.len() <= 16 {
            return s;
        }
    }
    format!("{x:.6e}")
}

/// 去掉小数部分末尾的 0, 以及随之多余的小数点. `-0` 记为 `0`.
fn trim_decimal(mut s: String) -> String {
    if s.contains('.') {
        let n = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(n);
    }
    if s == "-0" {
        s.remove(0);
    }
    s
}

fn put_seq(obj: &mut InMemDicomObject, tag: Tag, items: Vec<InMemDicomObject>) {
    obj.put(DataElement::new(tag, VR::SQ, DataSetSequence::from(items)));
}

fn code_item(c: &CodedConcept) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put_str(&mut item, tags::CODE_VALUE, VR::SH, &c.value);
    put_str(&mut item, tags::CODING_SCHEME_DESIGNATOR, VR::SH, &c.scheme);
    put_str(&mut item, tags::CODE_MEANING, VR::LO, &c.meaning);
    item
}

fn segment_item(d: &SegmentDescriptor) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put_u16(&mut item, tags::SEGMENT_NUMBER, d.number);
    put_str(&mut item, tags::SEGMENT_LABEL, VR::LO, &d.name);
    put_str(&mut item, tags::SEGMENT_ALGORITHM_TYPE, VR::CS, &d.algorithm.kind);
    put_str(&mut item, tags::SEGMENT_ALGORITHM_NAME, VR::LO, &d.algorithm.name);
    put_str(&mut item, tags::TRACKING_ID, VR::UT, &d.tracking_id);
    put_str(&mut item, tags::TRACKING_UID, VR::UI, &d.tracking_uid);
    put_seq(
        &mut item,
        tags::SEGMENTED_PROPERTY_CATEGORY_CODE_SEQUENCE,
        vec![code_item(&d.category)],
    );
    put_seq(
        &mut item,
        tags::SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE,
        vec![code_item(&d.kind)],
    );

    let mut algo = InMemDicomObject::new_empty();
    put_seq(&mut algo, tags::ALGORITHM_FAMILY_CODE_SEQUENCE, vec![code_item(&d.algorithm.family)]);
    put_str(&mut algo, tags::ALGORITHM_NAME, VR::LO, &d.algorithm.name);
    put_str(&mut algo, tags::ALGORITHM_VERSION, VR::LO, &d.algorithm.version);
    put_seq(&mut item, tags::SEGMENTATION_ALGORITHM_IDENTIFICATION_SEQUENCE, vec![algo]);
    item
}

/// 维度索引: 先按分割序号, 再按帧位置.
fn dimension_items(uid: &str) -> Vec<InMemDicomObject> {
    [
        (
            tags::REFERENCED_SEGMENT_NUMBER,
            tags::SEGMENT_IDENTIFICATION_SEQUENCE,
            "ReferencedSegmentNumber",
        ),
        (
            tags::IMAGE_POSITION_PATIENT,
            tags::PLANE_POSITION_SEQUENCE,
            "ImagePositionPatient",
        ),
    ]
    .into_iter()
    .map(|(pointer, group, label)| {
        let mut item = InMemDicomObject::new_empty();
        put_tag(&mut item, tags::DIMENSION_INDEX_POINTER, pointer);
        put_tag(&mut item, tags::FUNCTIONAL_GROUP_POINTER, group);
        put_str(&mut item, tags::DIMENSION_ORGANIZATION_UID, VR::UI, uid);
        put_str(&mut item, tags::DIMENSION_DESCRIPTION_LABEL, VR::LO, label);
        item
    })
    .collect()
}

/// 第 `frame` 帧、第 `segment` 个分割对应的功能组.
///
/// 调用方保证帧数放得进 `u32`.
fn frame_item(obj: &SegmentationObject, segment: usize, frame: usize) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    let number = obj.segments[segment].number;

    let mut content = InMemDicomObject::new_empty();
    content.put(DataElement::new(
        tags::DIMENSION_INDEX_VALUES,
        VR::UL,
        PrimitiveValue::from([u32::from(number), frame as u32 + 1]),
    ));
    put_seq(&mut item, tags::FRAME_CONTENT_SEQUENCE, vec![content]);

    let mut ident = InMemDicomObject::new_empty();
    put_u16(&mut ident, tags::REFERENCED_SEGMENT_NUMBER, number);
    put_seq(&mut item, tags::SEGMENT_IDENTIFICATION_SEQUENCE, vec![ident]);

    if let Some(p) = obj.geometry.positions.get(frame) {
        let mut pos = InMemDicomObject::new_empty();
        put_ds(&mut pos, tags::IMAGE_POSITION_PATIENT, p);
        put_seq(&mut item, tags::PLANE_POSITION_SEQUENCE, vec![pos]);
    }

    if let Some(r) = obj.referenced_instances.get(frame) {
        let mut source = InMemDicomObject::new_empty();
        put_str(&mut source, tags::REFERENCED_SOP_CLASS_UID, VR::UI, &r.sop_class_uid);
        put_str(&mut source, tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, &r.sop_instance_uid);
        put_seq(
            &mut source,
            tags::PURPOSE_OF_REFERENCE_CODE_SEQUENCE,
            vec![code_item(&CodedConcept::from(SOURCE_IMAGE_FOR_PROCESSING))],
        );
        let mut derivation = InMemDicomObject::new_empty();
        put_seq(
            &mut derivation,
            tags::DERIVATION_CODE_SEQUENCE,
            vec![code_item(&CodedConcept::from(SEGMENTATION_DERIVATION))],
        );
        put_seq(&mut derivation, tags::SOURCE_IMAGE_SEQUENCE, vec![source]);
        put_seq(&mut item, tags::DERIVATION_IMAGE_SEQUENCE, vec![derivation]);
    }
    item
}

fn shared_item(obj: &SegmentationObject) -> InMemDicomObject {
    let g = &obj.geometry;
    let mut orient = InMemDicomObject::new_empty();
    put_ds(&mut orient, tags::IMAGE_ORIENTATION_PATIENT, &g.orientation);
    let mut measures = InMemDicomObject::new_empty();
    put_ds(&mut measures, tags::PIXEL_SPACING, &g.pixel_spacing);
    put_ds(&mut measures, tags::SLICE_THICKNESS, &[g.slice_spacing]);
    put_ds(&mut measures, tags::SPACING_BETWEEN_SLICES, &[g.slice_spacing]);

    let mut item = InMemDicomObject::new_empty();
    put_seq(&mut item, tags::PLANE_ORIENTATION_SEQUENCE, vec![orient]);
    put_seq(&mut item, tags::PIXEL_MEASURES_SEQUENCE, vec![measures]);
    item
}

/// 把 `(帧, 行, 列, 分割)` 打包为按位存储的像素流.
///
/// 输出帧顺序: 先分割, 再源帧. 结果补齐到偶数字节.
pub(crate) fn pack_frames(obj: &SegmentationObject) -> Vec<u8> {
    let (f, r, c, n) = obj.pixels.dim();
    let total = f * r * c * n;
    let mut out = vec![0u8; (total + 7) / 8];
    let mut bit = 0usize;
    for seg in obj.pixels.axis_iter(Axis(3)) {
        for p in seg.iter() {
            if *p != 0 {
                out[bit / 8] |= 1 << (bit % 8);
            }
            bit += 1;
        }
    }
    if out.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn to_dataset(obj: &SegmentationObject) -> Result<InMemDicomObject, WriteError> {
    let (frames, rows, cols, n) = obj.pixels.dim();
    let too_large = || WriteError::Encode(format!("帧尺寸 {rows} x {cols} 超出 DICOM 范围"));
    let rows16 = rows.to_u16().ok_or_else(too_large)?;
    let cols16 = cols.to_u16().ok_or_else(too_large)?;
    let total = (frames * n)
        .to_u32()
        .ok_or_else(|| WriteError::Encode(format!("帧数 {frames} x {n} 超出 DICOM 范围")))?;
    let mut ds = InMemDicomObject::new_empty();

    put_str(&mut ds, tags::SOP_CLASS_UID, VR::UI, SEGMENTATION_STORAGE);
    put_str(&mut ds, tags::SOP_INSTANCE_UID, VR::UI, &obj.sop_instance_uid);
    put_str(&mut ds, tags::MODALITY, VR::CS, "SEG");
    put_str(&mut ds, tags::IMAGE_TYPE, VR::CS, "DERIVED\\PRIMARY");

    put_str(&mut ds, tags::PATIENT_ID, VR::LO, &obj.patient.id);
    put_str(&mut ds, tags::PATIENT_NAME, VR::PN, &obj.patient.name);
    put_str(&mut ds, tags::PATIENT_BIRTH_DATE, VR::DA, &obj.patient.birth_date);
    put_str(&mut ds, tags::PATIENT_SEX, VR::CS, &obj.patient.sex);

    put_str(&mut ds, tags::STUDY_INSTANCE_UID, VR::UI, &obj.study.instance_uid);
    put_str(&mut ds, tags::STUDY_ID, VR::SH, &obj.study.id);
    put_str(&mut ds, tags::STUDY_DATE, VR::DA, &obj.study.date);
    put_str(&mut ds, tags::STUDY_TIME, VR::TM, &obj.study.time);
    put_str(&mut ds, tags::ACCESSION_NUMBER, VR::SH, &obj.study.accession_number);

    let dev = &obj.device;
    put_str(&mut ds, tags::SERIES_INSTANCE_UID, VR::UI, &obj.series_instance_uid);
    put_str(&mut ds, tags::SERIES_NUMBER, VR::IS, &dev.series_number.to_string());
    put_str(&mut ds, tags::INSTANCE_NUMBER, VR::IS, &dev.instance_number.to_string());
    put_str(&mut ds, tags::SERIES_DESCRIPTION, VR::LO, &dev.series_description);
    put_str(&mut ds, tags::MANUFACTURER, VR::LO, &dev.manufacturer);
    put_str(&mut ds, tags::MANUFACTURER_MODEL_NAME, VR::LO, &dev.model_name);
    put_str(&mut ds, tags::DEVICE_SERIAL_NUMBER, VR::LO, &dev.serial_number);
    let versions = PrimitiveValue::Strs(dev.software_versions.iter().cloned().collect());
    ds.put(DataElement::new(tags::SOFTWARE_VERSIONS, VR::LO, versions));
    put_str(&mut ds, tags::FRAME_OF_REFERENCE_UID, VR::UI, &obj.frame_of_reference_uid);

    put_str(&mut ds, tags::CONTENT_DATE, VR::DA, &obj.content_date);
    put_str(&mut ds, tags::CONTENT_TIME, VR::TM, &obj.content_time);
    put_str(&mut ds, tags::CONTENT_LABEL, VR::CS, "SEGMENTATION");
    put_str(&mut ds, tags::CONTENT_DESCRIPTION, VR::LO, &dev.series_description);
    put_str(&mut ds, tags::CONTENT_CREATOR_NAME, VR::PN, "");
    put_str(&mut ds, tags::SEGMENTATION_TYPE, VR::CS, "BINARY");
    put_str(&mut ds, tags::LOSSY_IMAGE_COMPRESSION, VR::CS, "00");

    let mut referenced = InMemDicomObject::new_empty();
    put_str(&mut referenced, tags::SERIES_INSTANCE_UID, VR::UI, &obj.referenced_series_uid);
    let instances = obj
        .referenced_instances
        .iter()
        .map(|r| {
            let mut item = InMemDicomObject::new_empty();
            put_str(&mut item, tags::REFERENCED_SOP_CLASS_UID, VR::UI, &r.sop_class_uid);
            put_str(&mut item, tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, &r.sop_instance_uid);
            item
        })
        .collect();
    put_seq(&mut referenced, tags::REFERENCED_INSTANCE_SEQUENCE, instances);
    put_seq(&mut ds, tags::REFERENCED_SERIES_SEQUENCE, vec![referenced]);

    put_seq(
        &mut ds,
        tags::SEGMENT_SEQUENCE,
        obj.segments.iter().map(segment_item).collect(),
    );
    let dimension_uid = crate::uid::fresh();
    let mut organization = InMemDicomObject::new_empty();
    put_str(&mut organization, tags::DIMENSION_ORGANIZATION_UID, VR::UI, &dimension_uid);
    put_seq(&mut ds, tags::DIMENSION_ORGANIZATION_SEQUENCE, vec![organization]);
    put_str(&mut ds, tags::DIMENSION_ORGANIZATION_TYPE, VR::CS, "3D");
    put_seq(&mut ds, tags::DIMENSION_INDEX_SEQUENCE, dimension_items(&dimension_uid));

    put_seq(&mut ds, tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE, vec![shared_item(obj)]);
    let per_frame = (0..n)
        .flat_map(|s| (0..frames).map(move |f| (s, f)))
        .map(|(s, f)| frame_item(obj, s, f))
        .collect();
    put_seq(&mut ds, tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE, per_frame);

    put_u16(&mut ds, tags::SAMPLES_PER_PIXEL, 1);
    put_str(&mut ds, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
    put_u16(&mut ds, tags::ROWS, rows16);
    put_u16(&mut ds, tags::COLUMNS, cols16);
    put_str(&mut ds, tags::NUMBER_OF_FRAMES, VR::IS, &total.to_string());
    put_u16(&mut ds, tags::BITS_ALLOCATED, 1);
    put_u16(&mut ds, tags::BITS_STORED, 1);
    put_u16(&mut ds, tags::HIGH_BIT, 0);
    put_u16(&mut ds, tags::PIXEL_REPRESENTATION, 0);
    ds.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OB,
        PrimitiveValue::from(pack_frames(obj)),
    ));
    Ok(ds)
}
