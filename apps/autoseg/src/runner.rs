//! 程序运行函数.

use std::path::Path;

use ct_autoseg::pipeline::RunReport;

/// 实际运行: 读取 `series_dir` 中的 DICOM 序列, 在工作线程中完成分割,
/// 结果写回同一目录.
#[cfg(all(feature = "dicom", feature = "onnx"))]
pub fn run(series_dir: &Path, max_segments: &str) -> Result<RunReport, String> {
    use std::sync::Arc;

    use ct_autoseg::inference::OnnxLoader;
    use ct_autoseg::prelude::*;
    use utils::loader;

    let model_dir = loader::model_dir_from_env_or_home().ok_or("无法确定模型目录")?;
    let model = loader::check_model_dir(&model_dir).map_err(|e| e.to_string())?;
    let series = read_series_dir(series_dir).map_err(|e| e.to_string())?;
    log::info!("序列共 {} 帧, 模型 {model:?}", series.len());

    let pipeline = Pipeline::new(
        OnnxLoader::new(utils::cpus()),
        DicomSegWriter,
        Arc::new(LogSink),
    );
    let job = Job::new(Arc::new(series), model, series_dir).with_max_segments(max_segments);
    pipeline
        .spawn(job)
        .join()
        .map_err(|_| String::from("工作线程异常退出"))
}

/// 缺少读取序列或推理所需的 feature.
#[cfg(not(all(feature = "dicom", feature = "onnx")))]
pub fn run(_series_dir: &Path, _max_segments: &str) -> Result<RunReport, String> {
    Err(String::from("需要同时启用 `dicom` 与 `onnx` feature"))
}
