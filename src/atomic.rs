//! 临时写入与原子替换的辅助方法。

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 可用于原子替换的临时文件封装。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件，必要时创建父目录。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target path"))?;
        fs::create_dir_all(parent).await?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    /// 一次性写入全部内容并替换目标文件。
    pub async fn write(target: &Path, content: &[u8]) -> io::Result<()> {
        let mut atomic = Self::new(target).await?;
        if let Err(err) = atomic.file.write_all(content).await {
            atomic.cleanup().await;
            return Err(err);
        }
        atomic.finalize().await
    }

    /// 将字节流写入并替换目标文件，返回写入字节数。
    pub async fn write_stream<S, E>(target: &Path, body: S) -> io::Result<u64>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let mut atomic = Self::new(target).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    atomic.cleanup().await;
                    return Err(io::Error::other(err.to_string()));
                }
            };
            if let Err(err) = atomic.file.write_all(&chunk).await {
                atomic.cleanup().await;
                return Err(err);
            }
            written += chunk.len() as u64;
        }
        atomic.finalize().await?;
        Ok(written)
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(self) -> io::Result<()> {
        let synced = self.file.sync_all().await;
        self.commit(synced).await
    }

    /// 落盘失败时删除临时文件，否则替换目标文件。
    async fn commit(self, synced: io::Result<()>) -> io::Result<()> {
        drop(self.file);
        if let Err(err) = synced {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    return fs::rename(&self.temp_path, &self.target).await;
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        Ok(())
    }
}
