use std::path::{Path, PathBuf};

use ::nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use ndarray::{Axis, Ix3, Ix4};

use super::{check_affine, LoadError, VolumeSource};
use crate::data::{Affine, Volume};

/// nii 格式的 3D CT 扫描文件.
///
/// 体素值按 header 中的 `scl_slope`/`scl_inter` 换算后以 `f32` 保存.
/// 仿射优先取自 sform, 其次 qform, 两者都缺失时退化为以 `pixdim` 为对角线.
#[derive(Debug, Clone)]
pub struct NiftiSource {
    path: PathBuf,
}

impl NiftiSource {
    /// 指向本地 nii / nii.gz 文件.
    #[inline]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VolumeSource for NiftiSource {
    fn load(&self) -> Result<Volume, LoadError> {
        if !self.path.is_file() {
            return Err(LoadError::Io {
                path: self.path.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let obj = ReaderOptions::new().read_file(&self.path)?;
        let affine = affine_from_header(obj.header());
        check_affine(&affine)?;

        let data = obj.into_volume().into_ndarray::<f32>()?;
        let shape = data.shape().to_vec();
        let data = match shape.len() {
            3 => data.into_dimensionality::<Ix3>().ok(),
            // 单时间点的 4D 数据.
            4 if shape[3] == 1 => data
                .into_dimensionality::<Ix4>()
                .ok()
                .map(|d| d.index_axis_move(Axis(3), 0)),
            _ => None,
        }
        .ok_or(LoadError::NotVolume(shape))?;

        log::debug!("读入 {:?}: 形状 {:?}, 仿射 {affine:?}", self.path, data.dim());
        Ok(Volume::new(data, affine))
    }

    fn describe(&self) -> String {
        format!("nii `{}`", self.path.display())
    }
}

/// 由 header 求体素到 RAS 世界坐标的仿射.
pub(crate) fn affine_from_header(h: &NiftiHeader) -> Affine {
    let pix = [h.pixdim[1], h.pixdim[2], h.pixdim[3]].map(|p| {
        let p = f64::from(p).abs();
        if p > 0.0 {
            p
        } else {
            1.0
        }
    });

    if h.sform_code > 0 {
        let rows = [h.srow_x, h.srow_y, h.srow_z];
        let mut axes = [[0.0; 3]; 3];
        for (d, axis) in axes.iter_mut().enumerate() {
            for (w, row) in rows.iter().enumerate() {
                axis[w] = f64::from(row[d]);
            }
        }
        let origin = rows.map(|row| f64::from(row[3]));
        return Affine { axes, origin };
    }

    if h.qform_code > 0 {
        let (b, c, d) = (
            f64::from(h.quatern_b),
            f64::from(h.quatern_c),
            f64::from(h.quatern_d),
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
        ];
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let scale = [pix[0], pix[1], pix[2] * qfac];
        let mut axes = [[0.0; 3]; 3];
        for (dd, axis) in axes.iter_mut().enumerate() {
            for (w, row) in r.iter().enumerate() {
                axis[w] = row[dd] * scale[dd];
            }
        }
        let origin = [h.quatern_x, h.quatern_y, h.quatern_z].map(f64::from);
        return Affine { axes, origin };
    }

    Affine::from_spacing(pix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_affine_fallback_to_pixdim() {
        let mut h = NiftiHeader::default();
        h.sform_code = 0;
        h.qform_code = 0;
        h.pixdim = [1.0, 0.8, 0.8, 2.5, 0.0, 0.0, 0.0, 0.0];
        let a = affine_from_header(&h);
        let s = a.spacing();
        assert!(f64_eq(s[0], 0.8) && f64_eq(s[1], 0.8) && f64_eq(s[2], 2.5), "{s:?}");
        assert_eq!(a.origin, [0.0; 3]);
    }

    #[test]
    fn test_affine_from_sform() {
        let mut h = NiftiHeader::default();
        h.sform_code = 1;
        h.srow_x = [-0.5, 0.0, 0.0, 90.0];
        h.srow_y = [0.0, -0.5, 0.0, 120.0];
        h.srow_z = [0.0, 0.0, 2.0, -40.0];
        let a = affine_from_header(&h);
        assert_eq!(a.axcodes(), ['L', 'P', 'S']);
        assert_eq!(a.world((2, 4, 1)), [89.0, 118.0, -38.0]);
    }

    #[test]
    fn test_affine_from_qform() {
        let mut h = NiftiHeader::default();
        h.sform_code = 0;
        h.qform_code = 1;
        // 绕 z 轴旋转 180 度: b = c = 0, d = 1. 体素轴 i, j 指向 L, P.
        h.quatern_b = 0.0;
        h.quatern_c = 0.0;
        h.quatern_d = 1.0;
        h.quatern_x = 10.0;
        h.quatern_y = 20.0;
        h.quatern_z = 30.0;
        h.pixdim = [1.0, 2.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0];
        let a = affine_from_header(&h);
        assert_eq!(a.axcodes(), ['L', 'P', 'S']);
        let p = a.world((1, 1, 1));
        assert!(f64_eq(p[0], 8.0) && f64_eq(p[1], 18.0) && f64_eq(p[2], 33.0), "{p:?}");

        // qfac < 0 时第三个轴反向.
        h.pixdim[0] = -1.0;
        assert_eq!(affine_from_header(&h).axcodes(), ['L', 'P', 'I']);
    }

    #[test]
    fn test_missing_file() {
        let src = NiftiSource::new("/nonexistent/ct-autoseg/volume.nii.gz");
        assert!(matches!(src.load(), Err(LoadError::Io { .. })));
    }
}
