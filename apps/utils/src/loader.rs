//! 模型权重目录的定位与检查.

use std::env;
use std::path::{Path, PathBuf};

use ct_autoseg::consts::MODEL_FILE_NAME;
use ct_autoseg::inference::ModelLoadError;

/// `$HOME/.autoseg/<it...>`.
pub fn home_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push(".autoseg");
    ans.extend(it);
    Some(ans)
}

/// 获取模型权重目录.
///
/// 1. 若环境变量 `$AUTOSEG_MODEL_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/.autoseg/model`.
pub fn model_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("AUTOSEG_MODEL_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dir_with(["model"]),
    }
}

/// 检查模型目录, 返回权重文件路径.
///
/// 目录不存在或为空时说明权重尚未下载; 目录非空但缺少 `model.onnx` 时拒绝使用.
/// 两种情况都返回 [`ModelLoadError::NotFound`].
pub fn check_model_dir<P: AsRef<Path>>(dir: P) -> Result<PathBuf, ModelLoadError> {
    let dir = dir.as_ref();
    let model = dir.join(MODEL_FILE_NAME);
    if model.is_file() {
        return Ok(model);
    }
    let empty = std::fs::read_dir(dir).map_or(true, |mut d| d.next().is_none());
    if empty {
        log::warn!("模型目录 {dir:?} 为空, 需要先下载权重");
    } else {
        log::error!("模型目录 {dir:?} 非空, 但缺少 {MODEL_FILE_NAME}");
    }
    Err(ModelLoadError::NotFound(model))
}
