//! 文件夹下载使用的临时归档：创建、随响应释放删除、过期清扫。

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TEMP_ARCHIVE_SUFFIX;

#[derive(Clone, Debug)]
pub struct TempArchives {
    dir: PathBuf,
    max_age: Duration,
}

impl TempArchives {
    pub fn new(dir: PathBuf, max_age: Duration) -> Self {
        Self { dir, max_age }
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 分配新的归档路径：毫秒时间戳前缀加随机段，同一毫秒内也不会重名。
    pub fn allocate(&self) -> TempArchive {
        let millis = unix_millis(SystemTime::now());
        let unique = Uuid::new_v4().simple();
        TempArchive {
            path: self.dir.join(format!("{millis}_{unique}{TEMP_ARCHIVE_SUFFIX}")),
        }
    }

    /// 删除时间戳前缀早于 `max_age` 的文件，返回删除数量。
    ///
    /// 无法解析前缀的文件与目录保持不动；单个文件失败只记录日志。
    pub async fn sweep(&self) -> io::Result<usize> {
        let now = unix_millis(SystemTime::now());
        let max_age = self.max_age.as_millis();
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(created) = parse_timestamp_prefix(&name.to_string_lossy()) else {
                continue;
            };
            if now.saturating_sub(created) <= max_age {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => {}
                _ => continue,
            }
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    info!(path = ?path, "removed expired temp archive");
                }
                Err(err) => warn!(path = ?path, error = %err, "failed to remove temp archive"),
            }
        }

        Ok(removed)
    }
}

/// 临时归档句柄，被释放时删除对应文件。
#[derive(Debug)]
pub struct TempArchive {
    path: PathBuf,
}

impl TempArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "temp archive removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = ?self.path, error = %err, "failed to remove temp archive"),
        }
    }
}

fn parse_timestamp_prefix(name: &str) -> Option<u128> {
    let (prefix, _) = name.split_once('_')?;
    prefix.parse().ok()
}

fn unix_millis(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_only_numeric_prefixes() {
        assert_eq!(parse_timestamp_prefix("1700000000000_folder.7z"), Some(1_700_000_000_000));
        assert_eq!(parse_timestamp_prefix("notes_folder.7z"), None);
        assert_eq!(parse_timestamp_prefix("1700000000000.7z"), None);
        assert_eq!(parse_timestamp_prefix("_folder.7z"), None);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_archives() {
        let temp = tempdir().unwrap();
        let archives = TempArchives::new(temp.path().to_path_buf(), Duration::from_secs(60));
        let now = unix_millis(SystemTime::now());
        let old = temp.path().join(format!("{}_folder.7z", now - 10 * 60 * 1000));
        let young = temp.path().join(format!("{}_folder.7z", now - 5 * 1000));
        let foreign = temp.path().join("keep-me.txt");
        let old_dir = temp.path().join(format!("{}_dir", now - 10 * 60 * 1000));
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&young, b"young").unwrap();
        std::fs::write(&foreign, b"foreign").unwrap();
        std::fs::create_dir(&old_dir).unwrap();

        let removed = archives.sweep().await.unwrap();

        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(young.exists());
        assert!(foreign.exists());
        assert!(old_dir.exists());
    }

    #[tokio::test]
    async fn allocations_never_collide_and_stay_sweepable() {
        let temp = tempdir().unwrap();
        let archives = TempArchives::new(temp.path().to_path_buf(), Duration::ZERO);
        let first = archives.allocate();
        let second = archives.allocate();
        assert_ne!(first.path(), second.path());

        for archive in [&first, &second] {
            let name = archive.path().file_name().unwrap().to_string_lossy().into_owned();
            assert!(parse_timestamp_prefix(&name).is_some(), "name {name}");
            std::fs::write(archive.path(), b"payload").unwrap();
        }
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(archives.sweep().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dropping_handle_deletes_archive() {
        let temp = tempdir().unwrap();
        let archives = TempArchives::new(temp.path().to_path_buf(), Duration::from_secs(60));
        let archive = archives.allocate();
        let path = archive.path().to_path_buf();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with(TEMP_ARCHIVE_SUFFIX)
        );
        std::fs::write(&path, b"payload").unwrap();

        drop(archive);

        assert!(!path.exists());
    }
}
