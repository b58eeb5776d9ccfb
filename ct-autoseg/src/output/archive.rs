use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{SegWriter, SegmentationObject, WriteError};

/// 把分割对象保存在内存中的写出器. 主要用于测试.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    written: Mutex<Vec<(PathBuf, SegmentationObject)>>,
}

impl MemoryWriter {
    /// 已写出的对象个数.
    pub fn len(&self) -> usize {
        self.written.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// 是否从未写出?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出所有已写出的对象.
    pub fn take(&self) -> Vec<(PathBuf, SegmentationObject)> {
        self.written
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default()
    }
}

impl SegWriter for MemoryWriter {
    fn write(&self, obj: &SegmentationObject, dir: &Path) -> Result<PathBuf, WriteError> {
        let path = dir.join(crate::consts::SEG_FILE_NAME);
        let mut w = self
            .written
            .lock()
            .map_err(|_| WriteError::Encode(String::from("写出器锁已中毒")))?;
        w.push((path.clone(), obj.clone()));
        Ok(path)
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        use std::fs::File;
        use std::io::{BufReader, BufWriter, Write};

        use flate2::read::ZlibDecoder;
        use flate2::write::ZlibEncoder;
        use flate2::Compression;

        use super::write_atomic;
        use crate::consts::ARCHIVE_FILE_NAME;

        /// 以 zlib 压缩的 bincode 格式写出分割对象, 文件名为 `segmentation.seg.zz`.
        ///
        /// 掩码以 0/1 字节存储, 压缩率很高.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct ArchiveWriter;

        impl SegWriter for ArchiveWriter {
            fn write(&self, obj: &SegmentationObject, dir: &Path) -> Result<PathBuf, WriteError> {
                let path = dir.join(ARCHIVE_FILE_NAME);
                write_atomic(&path, |tmp| {
                    let io_err = |source| WriteError::Io {
                        path: tmp.to_path_buf(),
                        source,
                    };
                    let file = File::create(tmp).map_err(io_err)?;
                    let mut e = ZlibEncoder::new(BufWriter::new(file), Compression::best());
                    bincode::serialize_into(&mut e, obj).map_err(|err| WriteError::Encode(err.to_string()))?;
                    let mut inner = e.finish().map_err(io_err)?;
                    inner.flush().map_err(io_err)
                })?;
                log::info!("分割对象已写入 {path:?}");
                Ok(path)
            }
        }

        /// 读回 [`ArchiveWriter`] 写出的分割对象.
        pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<SegmentationObject, WriteError> {
            let path = path.as_ref();
            let file = File::open(path).map_err(|source| WriteError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let d = ZlibDecoder::new(BufReader::new(file));
            bincode::deserialize_from(d).map_err(|e| WriteError::Encode(e.to_string()))
        }
    }
}
