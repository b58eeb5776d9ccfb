//! 全身 CT 自动分割命令行工具.
//!
//! 用法: `autoseg <DICOM 序列目录> [最多分割个数]`.
//! 模型权重从 `$AUTOSEG_MODEL_DIR` 或 `$HOME/.autoseg/model` 读取,
//! 分割结果写在序列目录下的 `segmentation.dcm`.

mod runner;

use std::env;
use std::path::PathBuf;

fn main() {
    if let Err(e) = simple_logger::init_with_level(log::Level::Info) {
        eprintln!("日志初始化失败: {e}");
    }
    if let Err(err) = try_main() {
        eprintln!("错误: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), String> {
    let mut args = env::args().skip(1);
    let dir = args.next().map(PathBuf::from).ok_or_else(usage)?;
    let max_segments = args.next().unwrap_or_default();

    let report = runner::run(&dir, &max_segments)?;
    utils::sep();
    match report.output {
        Some(path) => {
            println!("状态: {}", report.state);
            println!("输出: {}", path.display());
            Ok(())
        }
        None => {
            if let Some(stage) = report.failed_at {
                println!("失败阶段: {stage}");
            }
            Err(report.error.unwrap_or_else(|| report.state.to_string()))
        }
    }
}

fn usage() -> String {
    String::from("用法: autoseg <DICOM 序列目录> [最多分割个数]")
}
