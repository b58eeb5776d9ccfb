//! 通用常量.

/// 标签值与解剖结构名称.
pub mod labels {
    /// 标签图中, 背景的体素值.
    pub const BACKGROUND: u8 = 0;

    /// 解剖结构标签个数 (不含背景).
    pub const NUM_LABELS: usize = 104;

    /// 最大合法标签值.
    pub const MAX_LABEL: u8 = NUM_LABELS as u8;

    /// 标签 `1..=104` 对应的解剖结构名称. 第 `i` 项对应标签 `i + 1`.
    pub static NAMES: [&str; NUM_LABELS] = [
        "spleen",
        "kidney_right",
        "kidney_left",
        "gallbladder",
        "liver",
        "stomach",
        "aorta",
        "inferior_vena_cava",
        "portal_vein_and_splenic_vein",
        "pancreas",
        "adrenal_gland_right",
        "adrenal_gland_left",
        "lung_upper_lobe_left",
        "lung_lower_lobe_left",
        "lung_upper_lobe_right",
        "lung_middle_lobe_right",
        "lung_lower_lobe_right",
        "vertebrae_L5",
        "vertebrae_L4",
        "vertebrae_L3",
        "vertebrae_L2",
        "vertebrae_L1",
        "vertebrae_T12",
        "vertebrae_T11",
        "vertebrae_T10",
        "vertebrae_T9",
        "vertebrae_T8",
        "vertebrae_T7",
        "vertebrae_T6",
        "vertebrae_T5",
        "vertebrae_T4",
        "vertebrae_T3",
        "vertebrae_T2",
        "vertebrae_T1",
        "vertebrae_C7",
        "vertebrae_C6",
        "vertebrae_C5",
        "vertebrae_C4",
        "vertebrae_C3",
        "vertebrae_C2",
        "vertebrae_C1",
        "esophagus",
        "trachea",
        "heart_myocardium",
        "heart_atrium_left",
        "heart_ventricle_left",
        "heart_atrium_right",
        "heart_ventricle_right",
        "pulmonary_artery",
        "brain",
        "iliac_artery_left",
        "iliac_artery_right",
        "iliac_vena_left",
        "iliac_vena_right",
        "small_bowel",
        "duodenum",
        "colon",
        "rib_left_1",
        "rib_left_2",
        "rib_left_3",
        "rib_left_4",
        "rib_left_5",
        "rib_left_6",
        "rib_left_7",
        "rib_left_8",
        "rib_left_9",
        "rib_left_10",
        "rib_left_11",
        "rib_left_12",
        "rib_right_1",
        "rib_right_2",
        "rib_right_3",
        "rib_right_4",
        "rib_right_5",
        "rib_right_6",
        "rib_right_7",
        "rib_right_8",
        "rib_right_9",
        "rib_right_10",
        "rib_right_11",
        "rib_right_12",
        "humerus_left",
        "humerus_right",
        "scapula_left",
        "scapula_right",
        "clavicula_left",
        "clavicula_right",
        "femur_left",
        "femur_right",
        "hip_left",
        "hip_right",
        "sacrum",
        "face",
        "gluteus_maximus_left",
        "gluteus_maximus_right",
        "gluteus_medius_left",
        "gluteus_medius_right",
        "gluteus_minimus_left",
        "gluteus_minimus_right",
        "autochthon_left",
        "autochthon_right",
        "iliopsoas_left",
        "iliopsoas_right",
        "urinary_bladder",
    ];

    /// 获取标签 `label` 对应的解剖结构名称.
    ///
    /// 背景 (0) 或超出 `1..=104` 的值返回 `None`.
    #[inline]
    pub fn name(label: u8) -> Option<&'static str> {
        match label {
            1..=MAX_LABEL => Some(NAMES[label as usize - 1]),
            _ => None,
        }
    }

    /// 体素值是否是词表中的合法解剖结构标签?
    #[inline]
    pub const fn is_known(p: u8) -> bool {
        matches!(p, 1..=MAX_LABEL)
    }
}

/// 网络与推理参数.
pub mod network {
    /// 网络输入通道数.
    pub const IN_CHANNELS: usize = 1;

    /// 网络输出通道数 (背景 + 104 个解剖结构).
    pub const NUM_CLASSES: usize = super::labels::NUM_LABELS + 1;

    /// 重采样目标体素间距, 以毫米为单位 (三个方向相同).
    pub const TARGET_SPACING_MM: f64 = 3.0;

    /// 滑窗立方体边长.
    pub const ROI_SIZE: usize = 96;

    /// 相邻滑窗之间的重叠比例.
    pub const OVERLAP: f64 = 0.25;

    /// 高斯权重图的 sigma 与滑窗边长之比.
    pub const SIGMA_SCALE: f64 = 0.125;
}

/// 默认最多保留的分割个数.
pub const DEFAULT_MAX_SEGMENTS: usize = 10;

/// 模型目录中权重文件的文件名.
pub const MODEL_FILE_NAME: &str = "model.onnx";

/// DICOM 分割对象的输出文件名.
pub const SEG_FILE_NAME: &str = "segmentation.dcm";

/// 压缩归档格式分割对象的输出文件名.
pub const ARCHIVE_FILE_NAME: &str = "segmentation.seg.zz";

/// 输出对象中写死的算法与设备信息.
pub mod identity {
    /// 算法名称.
    pub const ALGORITHM_NAME: &str = "MONAI Whole Body CT Segmentation";

    /// 算法版本.
    pub const ALGORITHM_VERSION: &str = "0.1.0";

    /// 制造商.
    pub const MANUFACTURER: &str = "MONAI";

    /// 制造商型号名.
    pub const MODEL_NAME: &str = "Whole Body CT Segmentation";

    /// 软件版本.
    pub const SOFTWARE_VERSION: &str = "0.1.0";

    /// 设备序列号.
    pub const DEVICE_SERIAL_NUMBER: &str = "12345";

    /// 输出序列描述.
    pub const SERIES_DESCRIPTION: &str = "Whole Body CT Segmentation";

    /// 输出序列号.
    pub const SERIES_NUMBER: i32 = 2;

    /// 输出实例号.
    pub const INSTANCE_NUMBER: i32 = 1;

    /// 分割追踪 ID 前缀.
    pub const TRACKING_ID_PREFIX: &str = "MONAI_";
}

/// 编码概念 (值, 编码方案, 含义).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Code {
    /// 编码值.
    pub value: &'static str,

    /// 编码方案标识.
    pub scheme: &'static str,

    /// 人类可读含义.
    pub meaning: &'static str,
}

/// 输出对象使用的固定编码.
pub mod codes {
    use super::Code;

    /// 分割属性类别: 组织.
    pub const TISSUE: Code = Code {
        value: "85756007",
        scheme: "SCT",
        meaning: "Tissue",
    };

    /// 分割属性类型: 结缔组织.
    pub const CONNECTIVE_TISSUE: Code = Code {
        value: "181769001",
        scheme: "SCT",
        meaning: "Connective tissue",
    };

    /// 引用目的: 图像处理的源图像.
    pub const SOURCE_IMAGE_FOR_PROCESSING: Code = Code {
        value: "121322",
        scheme: "DCM",
        meaning: "Source image for image processing operation",
    };

    /// 派生方式: 分割.
    pub const SEGMENTATION_DERIVATION: Code = Code {
        value: "113076",
        scheme: "DCM",
        meaning: "Segmentation",
    };

    /// 算法家族: 人工智能.
    pub const ARTIFICIAL_INTELLIGENCE: Code = Code {
        value: "113037",
        scheme: "DCM",
        meaning: "Artificial Intelligence",
    };
}

/// 常用 UID.
pub mod uids {
    /// Segmentation Storage SOP Class.
    pub const SEGMENTATION_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.66.4";

    /// CT Image Storage SOP Class.
    pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

    /// Explicit VR Little Endian.
    pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

    /// UUID 派生 UID 的根.
    pub const UUID_ROOT: &str = "2.25";
}

#[cfg(test)]
mod tests {
    use super::labels::*;

    #[test]
    fn test_label_table_is_total() {
        for label in 1..=MAX_LABEL {
            assert!(name(label).is_some(), "标签 {label} 缺少名称");
        }
        assert_eq!(name(BACKGROUND), None);
        assert_eq!(name(MAX_LABEL + 1), None);
        assert_eq!(name(u8::MAX), None);
    }

    #[test]
    fn test_label_names() {
        assert_eq!(name(1), Some("spleen"));
        assert_eq!(name(5), Some("liver"));
        assert_eq!(name(12), Some("adrenal_gland_left"));
        assert_eq!(name(104), Some("urinary_bladder"));
    }

    #[test]
    fn test_names_are_unique() {
        use itertools::Itertools;
        assert!(NAMES.iter().all_unique());
        assert!(!is_known(BACKGROUND));
        assert!(is_known(MAX_LABEL));
    }
}
