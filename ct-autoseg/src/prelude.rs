//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{Affine, GridAttr, LabelMap, OrientTransform, Volume};

pub use crate::consts::labels::{BACKGROUND, MAX_LABEL, NUM_LABELS};
pub use crate::consts::{DEFAULT_MAX_SEGMENTS, SEG_FILE_NAME};

pub use crate::config::{PipelineOptions, SegmentConfig};
pub use crate::error::{ConfigurationError, PipelineError};

pub use crate::source::{MemorySource, NiftiSource, SliceRecord, SourceSeries, VolumeSource};

#[cfg(feature = "dicom")]
pub use crate::source::read_series_dir;

pub use crate::inference::{Network, NetworkLoader, SlidingWindow};
pub use crate::preprocess::Normalizer;
pub use crate::postprocess::Postprocessor;
pub use crate::reconcile::Reconciler;
pub use crate::select::{SegmentMask, Selector};

pub use crate::output::{build, MemoryWriter, SegWriter, SegmentationObject};

#[cfg(feature = "serde")]
pub use crate::output::ArchiveWriter;

#[cfg(feature = "dicom")]
pub use crate::output::DicomSegWriter;

pub use crate::pipeline::{Job, LatestMessage, LogSink, Pipeline, PipelineState, ProgressSink, RunReport};
