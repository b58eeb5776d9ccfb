//! 完整流水线的场景测试. 使用假网络, 内存体数据与内存写出器.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ct_autoseg::inference::fake::{FakeLoader, FnNetwork};
use ct_autoseg::prelude::*;
use ct_autoseg::select::SelectError;
use ct_autoseg::source::{LoadError, SliceGeometry};
use ndarray::{Array2, Array3};

/// 多个测试都会调用, 只有第一次生效.
fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

/// 测试用的小窗口, 避免分配 `105 x 96^3` 的输出.
fn small_options() -> PipelineOptions {
    PipelineOptions {
        roi_size: 8,
        ..PipelineOptions::default()
    }
}

/// `n` 帧 `rows x cols`, 各向 3mm. `value(f, r, c)` 给出存储值.
fn series_with<F: Fn(usize, usize, usize) -> f32>(n: usize, rows: usize, cols: usize, value: F) -> SourceSeries {
    let slices = (0..n)
        .map(|f| {
            let geometry = SliceGeometry {
                position: [0.0, 0.0, -3.0 * f as f64],
                pixel_spacing: [3.0, 3.0],
                ..SliceGeometry::default()
            };
            let pixels = Array2::from_shape_fn((rows, cols), |(r, c)| value(f, r, c));
            let mut s = SliceRecord::with_defaults(f as i32 + 1, geometry, pixels);
            s.sop_instance_uid = format!("1.2.826.0.1.{}", f + 1);
            s.series.instance_uid = String::from("1.2.826.0.1");
            s
        })
        .collect();
    SourceSeries::new(slices).unwrap()
}

/// 记录加载次数的体数据来源.
struct CountingSource {
    inner: MemorySource,
    loads: Arc<AtomicUsize>,
}

impl VolumeSource for CountingSource {
    fn load(&self) -> Result<Volume, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load()
    }
}

fn zero_cube() -> MemorySource {
    MemorySource::new(Volume::new(Array3::zeros((3, 3, 3)), Affine::from_spacing([3.0; 3])))
}

#[test]
fn test_background_only_fails_without_output() {
    init_logger();
    let sink = Arc::new(LatestMessage::default());
    let mut pipeline = Pipeline::with_options(
        FakeLoader::constant(0, 105),
        MemoryWriter::default(),
        sink.clone(),
        small_options(),
    );
    let series = Arc::new(series_with(3, 3, 3, |_, _, _| 0.0));
    let job = Job::new(series, "model.onnx", "/data/ct").with_volume(zero_cube());

    let report = pipeline.run(job);
    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(report.output.is_none());
    assert!(pipeline.writer().is_empty());
    let expected = PipelineError::from(SelectError::EmptySelection).to_string();
    assert_eq!(report.error.as_deref(), Some(expected.as_str()));
    assert_eq!(sink.latest(), expected);
}

#[test]
fn test_top_two_segments() {
    // 5 x 8 x 8 = 320 个体素, 其中 5 号 200 个, 1 号 50 个, 12 号 10 个.
    let series = series_with(5, 8, 8, |_, _, _| 0.0);
    let mut flat = vec![5u8; 200];
    flat.extend(std::iter::repeat(1).take(50));
    flat.extend(std::iter::repeat(12).take(10));
    flat.resize(320, 0);
    let label = LabelMap::fake(Array3::from_shape_vec(series.shape(), flat).unwrap());

    let config = SegmentConfig::parse("2").unwrap();
    let masks = config.selector().select(&label).unwrap();
    let obj = build(&series, masks).unwrap();
    assert_eq!(obj.num_segments(), 2);
    let picked: Vec<(u16, u8)> = obj.segments.iter().map(|d| (d.number, d.label)).collect();
    assert_eq!(picked, [(1, 5), (2, 1)]);
    assert_eq!(obj.mask(0).iter().filter(|p| **p == 1).count(), 200);
    assert_eq!(obj.mask(1).iter().filter(|p| **p == 1).count(), 50);

    let writer = MemoryWriter::default();
    let path = writer.write(&obj, Path::new("/data/ct")).unwrap();
    assert_eq!(path, Path::new("/data/ct").join(SEG_FILE_NAME));
}

/// 按存储顺序: 前 200 个体素 300, 接着 50 个 200, 再 10 个 100, 其余 -1000.
fn three_organs(f: usize, r: usize, c: usize) -> f32 {
    match f * 64 + r * 8 + c {
        0..=199 => 300.0,
        200..=249 => 200.0,
        250..=259 => 100.0,
        _ => -1000.0,
    }
}

/// 归一化后 -1000, 100, 200, 300 依次约为 -1, 0.69, 0.85, 1.
fn three_organ_loader() -> FakeLoader {
    FakeLoader::new(|| {
        Box::new(FnNetwork::new(105, |v| match v {
            v if v < -0.5 => 0,
            v if v < 0.77 => 12,
            v if v < 0.92 => 1,
            _ => 5,
        })) as Box<dyn Network>
    })
}

#[test]
fn test_top_two_segments_through_pipeline() {
    init_logger();
    let series = Arc::new(series_with(5, 8, 8, three_organs));
    let sink = Arc::new(LatestMessage::default());
    let mut pipeline = Pipeline::with_options(
        three_organ_loader(),
        MemoryWriter::default(),
        sink.clone(),
        small_options(),
    );
    let report = pipeline.run(Job::new(series.clone(), "model.onnx", "/data/ct").with_max_segments("2"));
    assert!(report.is_done(), "{:?}", report.error);
    assert_eq!(report.failed_at, None);

    let written = pipeline.writer().take();
    let obj = &written[0].1;
    let picked: Vec<(u16, u8)> = obj.segments.iter().map(|d| (d.number, d.label)).collect();
    assert_eq!(picked, [(1, 5), (2, 1)]);
    assert_eq!(obj.mask(0).iter().filter(|p| **p == 1).count(), 200);
    assert_eq!(obj.mask(1).iter().filter(|p| **p == 1).count(), 50);
    for ((f, r, c), p) in obj.mask(1).indexed_iter() {
        assert_eq!(*p, u8::from(three_organs(f, r, c) == 200.0), "({f}, {r}, {c})");
    }
}

#[test]
fn test_rerun_starts_from_idle() {
    let series = Arc::new(series_with(4, 6, 5, bright_corner));
    let mut pipeline = Pipeline::with_options(
        corner_loader(),
        MemoryWriter::default(),
        Arc::new(LogSink),
        small_options(),
    );
    let first = pipeline.run(Job::new(series.clone(), "model.onnx", "/data/ct"));
    assert!(first.is_done());
    assert_eq!(pipeline.state(), PipelineState::Done);

    // 配置在加载之前解析, 失败时应处于本次运行的起点.
    let second = pipeline.run(Job::new(series.clone(), "model.onnx", "/data/ct").with_max_segments("0"));
    assert_eq!(second.state, PipelineState::Failed);
    assert_eq!(second.failed_at, Some(PipelineState::Idle));

    let third = pipeline.run(Job::new(series, "model.onnx", "/data/ct"));
    assert!(third.is_done());
    assert_eq!(pipeline.loader().loads(), 2);
    assert_eq!(pipeline.writer().len(), 2);
}

#[test]
fn test_bad_max_segments_never_loads_model() {
    for text in ["0", "-3", "abc"] {
        let sink = Arc::new(LatestMessage::default());
        let mut pipeline = Pipeline::with_options(
            FakeLoader::constant(1, 105),
            MemoryWriter::default(),
            sink.clone(),
            small_options(),
        );
        let series = Arc::new(series_with(3, 3, 3, |_, _, _| 0.0));
        let job = Job::new(series, "model.onnx", "/data/ct")
            .with_volume(zero_cube())
            .with_max_segments(text);

        let report = pipeline.run(job);
        assert_eq!(report.state, PipelineState::Failed);
        assert_eq!(pipeline.loader().loads(), 0);
        assert!(pipeline.writer().is_empty());
        let expected = PipelineError::from(ConfigurationError::MaxSegments(text.to_string())).to_string();
        assert_eq!(sink.latest(), expected);
    }
}

#[test]
fn test_wrong_class_count_fails_before_volume() {
    let loads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: zero_cube(),
        loads: loads.clone(),
    };
    let sink = Arc::new(LatestMessage::default());
    let mut pipeline = Pipeline::with_options(
        FakeLoader::constant(1, 3),
        MemoryWriter::default(),
        sink.clone(),
        small_options(),
    );
    let series = Arc::new(series_with(3, 3, 3, |_, _, _| 0.0));
    let report = pipeline.run(Job::new(series, "model.onnx", "/data/ct").with_volume(source));

    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(pipeline.loader().loads(), 1);
    assert_eq!(loads.load(Ordering::SeqCst), 0);
    assert!(pipeline.writer().is_empty());
    assert!(sink.latest().contains("105"));
}

/// 第一帧的前两行是高密度区域, 网络把正值判为 5 号, 其余判为 1 号.
fn bright_corner(f: usize, r: usize, _: usize) -> f32 {
    if f == 0 && r < 2 {
        200.0
    } else {
        -1000.0
    }
}

fn corner_loader() -> FakeLoader {
    FakeLoader::new(|| {
        Box::new(FnNetwork::new(105, |v| if v > 0.0 { 5 } else { 1 })) as Box<dyn Network>
    })
}

#[test]
fn test_series_end_to_end() {
    init_logger();
    let series = Arc::new(series_with(4, 6, 5, bright_corner));
    let sink = Arc::new(LatestMessage::default());
    let mut pipeline = Pipeline::with_options(
        corner_loader(),
        MemoryWriter::default(),
        sink.clone(),
        small_options(),
    );
    let report = pipeline.run(Job::new(series.clone(), "model.onnx", "/data/ct").with_max_segments("2"));

    assert!(report.is_done(), "{:?}", report.error);
    assert_eq!(report.output.as_deref(), Some(Path::new("/data/ct/segmentation.dcm")));
    assert!(sink.latest().contains("segmentation.dcm"));
    assert_eq!(pipeline.loader().loads(), 1);

    let written = pipeline.writer().take();
    assert_eq!(written.len(), 1);
    let obj = &written[0].1;
    assert_eq!(obj.frame_shape(), series.shape());
    assert_eq!(obj.geometry, series.geometry());
    let picked: Vec<u8> = obj.segments.iter().map(|d| d.label).collect();
    assert_eq!(picked, [1, 5]);

    // 每个体素恰好属于一个分割, 且 5 号分割正好落在第一帧的前两行.
    let bright = obj.mask(1);
    for ((f, r, c), p) in bright.indexed_iter() {
        assert_eq!(*p, u8::from(f == 0 && r < 2), "({f}, {r}, {c})");
        assert_eq!(obj.mask(0)[(f, r, c)] + *p, 1);
    }
    assert_eq!(obj.referenced_instances[0].sop_instance_uid, "1.2.826.0.1.1");
}

#[test]
fn test_single_segment_limit() {
    let series = Arc::new(series_with(4, 6, 5, bright_corner));
    let mut pipeline = Pipeline::with_options(
        corner_loader(),
        MemoryWriter::default(),
        Arc::new(LogSink),
        small_options(),
    );
    let report = pipeline.run(Job::new(series, "model.onnx", "/data/ct").with_max_segments("1"));
    assert!(report.is_done());
    let written = pipeline.writer().take();
    let obj = &written[0].1;
    assert_eq!(obj.num_segments(), 1);
    assert_eq!(obj.segments[0].label, 1);
    assert_eq!(obj.segments[0].number, 1);
}

#[test]
fn test_spawn_on_worker_thread() {
    let loader = Arc::new(corner_loader());
    let writer = Arc::new(MemoryWriter::default());
    let sink = Arc::new(LatestMessage::default());
    let pipeline = Pipeline::with_options(loader.clone(), writer.clone(), sink.clone(), small_options());
    let series = Arc::new(series_with(4, 6, 5, bright_corner));

    let report = pipeline
        .spawn(Job::new(series, "model.onnx", "/data/ct"))
        .join()
        .unwrap();
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(loader.loads(), 1);
    assert_eq!(writer.len(), 1);
    assert!(sink.latest().starts_with("分割结果已保存到"));
}
