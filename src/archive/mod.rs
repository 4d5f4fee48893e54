//! 归档引擎：格式识别、解压与基于外部 7za 的压缩。

mod compress;
mod extract;
mod format;
mod process;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub use compress::compressor_path;
pub use format::ArchiveFormat;

#[derive(Clone, Debug)]
pub struct ArchiveEngine {
    compressor_dir: PathBuf,
    extractor: PathBuf,
    timeout: Option<Duration>,
}

impl ArchiveEngine {
    pub fn new(compressor_dir: PathBuf, extractor: PathBuf) -> Self {
        Self {
            compressor_dir,
            extractor,
            timeout: None,
        }
    }

    /// 为压缩与解压子进程设置超时，默认不限时。
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn detect(&self, path: &Path) -> io::Result<ArchiveFormat> {
        format::detect(path).await
    }

    /// 识别格式并解压到 `output_dir`。未识别格式时不触碰文件系统。
    pub async fn extract(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<ArchiveFormat, ArchiveError> {
        let detected = self.detect(input).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ArchiveError::MissingInput(input.to_path_buf()),
            _ => ArchiveError::Io(err),
        })?;
        if detected == ArchiveFormat::Unknown {
            return Err(ArchiveError::UnrecognizedFormat);
        }

        extract::extract_known(detected, input, output_dir, &self.extractor, self.timeout).await?;
        info!(format = %detected, input = ?input, output = ?output_dir, "extracted");
        Ok(detected)
    }

    /// 将文件或目录压缩为 7z 归档，已存在的输出会先被删除。
    pub async fn compress(&self, input: &Path, output: &Path) -> Result<(), ArchiveError> {
        compress::compress(&self.compressor_dir, self.timeout, input, output).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("input does not exist: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("unrecognized archive format")]
    UnrecognizedFormat,
    #[error("no bundled compressor for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
    #[error("cannot make {} executable: {source}", .path.display())]
    Permission { path: PathBuf, source: io::Error },
    #[error("compression failed: {0}")]
    CompressionFailed(String),
    #[error("{format} extraction failed: {message}")]
    ExtractionFailed {
        format: ArchiveFormat,
        message: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}
