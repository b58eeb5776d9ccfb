//! 流水线编排.
//!
//! 状态按 `Idle -> Loading -> Inferring -> Postprocessing -> Reconciling ->
//! Selecting -> Building -> Saving -> Done` 线性推进, 任何阶段失败都直接进入
//! `Failed`. 每次状态变化都向注入的 [`ProgressSink`] 发送一条进度消息.
//! 失败时不会写出任何文件.
//!
//! 配置在 `Loading` 之前解析, 非法配置不会触发网络加载.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::config::{PipelineOptions, SegmentConfig};
use crate::error::PipelineError;
use crate::inference::{check_architecture, NetworkLoader};
use crate::output::{self, SegWriter};
use crate::postprocess::Postprocessor;
use crate::reconcile::Reconciler;
use crate::source::{SourceSeries, VolumeSource};

/// 流水线状态.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// 尚未开始.
    Idle,

    /// 加载模型与体数据.
    Loading,

    /// 滑窗推理.
    Inferring,

    /// 逆变换回原始网格.
    Postprocessing,

    /// 还原为源序列的帧顺序.
    Reconciling,

    /// 选择分割.
    Selecting,

    /// 组装分割对象.
    Building,

    /// 写出.
    Saving,

    /// 成功结束.
    Done,

    /// 失败结束.
    Failed,
}

impl PipelineState {
    /// 是否是终止状态?
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// 进入该状态时发送的进度消息.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Idle => "等待开始",
            Self::Loading => "正在加载模型与图像...",
            Self::Inferring => "正在推理...",
            Self::Postprocessing => "正在后处理...",
            Self::Reconciling => "正在还原切片方向...",
            Self::Selecting => "正在选择分割...",
            Self::Building => "正在生成分割对象...",
            Self::Saving => "正在保存...",
            Self::Done => "完成",
            Self::Failed => "失败",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 进度消息的接收者. 可能在工作线程中被调用.
pub trait ProgressSink: Send + Sync {
    /// 接收一条消息.
    fn log(&self, message: &str);
}

impl<F: Fn(&str) + Send + Sync> ProgressSink for F {
    #[inline]
    fn log(&self, message: &str) {
        self(message)
    }
}

/// 只保留最新一条消息.
#[derive(Debug, Default)]
pub struct LatestMessage {
    latest: Mutex<String>,
}

impl LatestMessage {
    /// 最新的消息.
    pub fn latest(&self) -> String {
        self.latest.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl ProgressSink for LatestMessage {
    fn log(&self, message: &str) {
        if let Ok(mut m) = self.latest.lock() {
            *m = message.to_string();
        }
    }
}

/// 转发给 `log::info!`.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogSink;

impl ProgressSink for LogSink {
    #[inline]
    fn log(&self, message: &str) {
        log::info!("{message}");
    }
}

/// 一次运行的输入.
pub struct Job {
    /// 源序列. 输出对象的引用和几何都取自它.
    pub series: Arc<SourceSeries>,

    /// 网络输入体数据的来源. 为空时由源序列构建.
    pub volume: Option<Box<dyn VolumeSource + Send>>,

    /// 模型权重路径.
    pub model_path: PathBuf,

    /// 输出目录.
    pub output_dir: PathBuf,

    /// 用户输入的分割个数, 尚未解析.
    pub max_segments: String,
}

impl Job {
    /// 以默认分割个数处理 `series`, 输出到 `output_dir`.
    pub fn new<P, Q>(series: Arc<SourceSeries>, model_path: P, output_dir: Q) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Self {
            series,
            volume: None,
            model_path: model_path.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            max_segments: String::new(),
        }
    }

    /// 指定网络输入的来源.
    pub fn with_volume<S: VolumeSource + Send + 'static>(mut self, source: S) -> Self {
        self.volume = Some(Box::new(source));
        self
    }

    /// 指定分割个数 (用户原始输入).
    pub fn with_max_segments<S: Into<String>>(mut self, text: S) -> Self {
        self.max_segments = text.into();
        self
    }
}

/// 一次运行的结果.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// 终止状态.
    pub state: PipelineState,

    /// 写出的文件. 失败时为空.
    pub output: Option<PathBuf>,

    /// 失败时的错误消息.
    pub error: Option<String>,

    /// 失败发生时所处的阶段. 成功时为空.
    pub failed_at: Option<PipelineState>,
}

impl RunReport {
    /// 是否成功?
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == PipelineState::Done
    }
}

/// 流水线编排器.
pub struct Pipeline<L, W> {
    loader: L,
    writer: W,
    sink: Arc<dyn ProgressSink>,
    options: PipelineOptions,
    state: PipelineState,
}

impl<L: NetworkLoader, W: SegWriter> Pipeline<L, W> {
    /// 使用默认固定参数.
    pub fn new(loader: L, writer: W, sink: Arc<dyn ProgressSink>) -> Self {
        Self::with_options(loader, writer, sink, PipelineOptions::default())
    }

    /// 指定固定参数.
    pub fn with_options(
        loader: L,
        writer: W,
        sink: Arc<dyn ProgressSink>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            loader,
            writer,
            sink,
            options,
            state: PipelineState::Idle,
        }
    }

    /// 当前状态.
    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 网络加载器.
    #[inline]
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// 写出器.
    #[inline]
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// 运行一次. 错误不会向外传播, 只体现在进度消息与返回的报告中.
    pub fn run(&mut self, job: Job) -> RunReport {
        let start = Instant::now();
        self.state = PipelineState::Idle;
        match self.execute(job) {
            Ok(path) => {
                self.enter(PipelineState::Done);
                self.sink.log(&format!("分割结果已保存到 {}", path.display()));
                log::info!("流水线完成, 耗时 {:.2?}", start.elapsed());
                RunReport {
                    state: self.state,
                    output: Some(path),
                    error: None,
                    failed_at: None,
                }
            }
            Err(e) => {
                let failed_at = self.state;
                self.enter(PipelineState::Failed);
                let message = e.to_string();
                log::error!("流水线在 {failed_at} 阶段失败: {message}");
                self.sink.log(&message);
                RunReport {
                    state: self.state,
                    output: None,
                    error: Some(message),
                    failed_at: Some(failed_at),
                }
            }
        }
    }

    fn enter(&mut self, state: PipelineState) {
        log::debug!("{} -> {}", self.state, state);
        self.state = state;
        self.sink.log(state.message());
    }

    fn execute(&mut self, job: Job) -> Result<PathBuf, PipelineError> {
        let config = SegmentConfig::parse(&job.max_segments)?;
        log::info!("最多输出 {} 个分割", config.max_segments);

        self.enter(PipelineState::Loading);
        let mut net = self.loader.load(&job.model_path)?;
        check_architecture(&*net)?;
        let source: &dyn VolumeSource = match &job.volume {
            Some(v) => &**v,
            None => &*job.series,
        };
        log::info!("读取 {}", source.describe());
        let volume = source.load()?;
        let (normalized, transform) = self.options.normalizer().normalize(&volume)?;

        self.enter(PipelineState::Inferring);
        let t = Instant::now();
        let logits = self
            .options
            .sliding_window()
            .infer(&mut *net, normalized.data())?;
        drop(net);
        log::info!("推理完成, 耗时 {:.2?}", t.elapsed());

        self.enter(PipelineState::Postprocessing);
        let label = Postprocessor::new(transform).run(logits.view())?;
        Postprocessor::check_alignment(&label, &volume)?;

        self.enter(PipelineState::Reconciling);
        let label = Reconciler.reconcile(&label);

        self.enter(PipelineState::Selecting);
        let masks = config.selector().select(&label)?;

        self.enter(PipelineState::Building);
        let obj = output::build(&job.series, masks)?;

        self.enter(PipelineState::Saving);
        let path = self.writer.write(&obj, &job.output_dir)?;
        Ok(path)
    }
}

impl<L, W> Pipeline<L, W>
where
    L: NetworkLoader + Send + 'static,
    W: SegWriter + Send + 'static,
{
    /// 在工作线程中运行.
    pub fn spawn(mut self, job: Job) -> JoinHandle<RunReport> {
        std::thread::spawn(move || self.run(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_message_wins() {
        let sink = LatestMessage::default();
        assert_eq!(sink.latest(), "");
        sink.log("a");
        sink.log("b");
        assert_eq!(sink.latest(), "b");
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |m: &str| s.lock().unwrap().push(m.to_string()));
        sink.log("x");
        LogSink.log("y");
        assert_eq!(*seen.lock().unwrap(), ["x"]);
    }

    #[test]
    fn test_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Saving.is_terminal());
        assert_eq!(PipelineState::Inferring.to_string(), "Inferring");
    }
}
