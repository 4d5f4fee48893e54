use chrono::{DateTime, Local};
use futures_util::future::{BoxFuture, FutureExt, try_join_all};
use serde::Serialize;
use std::cmp::Ordering;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, ErrorKind};
use tracing::debug;

const BINARY_PROBE_LEN: u64 = 512;
const NO_SIZE: &str = "—";

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    root_marker: String,
    folder_sizes: bool,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        let root = normalize_lexically(&root);
        let root_marker = to_slash(&root);
        Self {
            root,
            root_marker,
            folder_sizes: false,
        }
    }

    pub fn with_folder_sizes(mut self, enabled: bool) -> Self {
        self.folder_sizes = enabled;
        self
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将客户端提供的相对路径限制在根目录之内。
    ///
    /// 输入中出现的根目录绝对路径会被剥离；规范化后若逃逸出根目录，
    /// 则退回到根目录下的最后一个路径段。无法安全退回时返回 `PathEscape`。
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let input = relative.replace('\\', "/");
        let stripped = self.strip_root_marker(&input);
        let remainder = if stripped != input {
            stripped.trim_start_matches('/')
        } else {
            stripped.as_str()
        };

        let candidate = normalize_lexically(&self.root.join(remainder));
        if candidate.starts_with(&self.root) {
            return Ok(candidate);
        }

        let Some((_, last)) = input.rsplit_once('/') else {
            return Err(StorageError::PathEscape(relative.to_string()));
        };
        let fallback = normalize_lexically(&self.root.join(last));
        if fallback.starts_with(&self.root) {
            Ok(fallback)
        } else {
            Err(StorageError::PathEscape(relative.to_string()))
        }
    }

    fn strip_root_marker(&self, input: &str) -> String {
        let marker = self.root_marker.as_str();
        let bare = marker.trim_start_matches('/');
        if bare.is_empty() {
            return input.to_string();
        }
        input
            .replace(&format!("/{marker}"), "")
            .replace(marker, "")
            .replace(bare, "")
    }

    /// 解析路径并拒绝经过符号链接的访问。
    pub async fn resolve_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.reject_symlinks(&target, false).await?;
        Ok(target)
    }

    /// 逐级检查根目录下的路径分量，遇到符号链接即拒绝。
    ///
    /// 第一个不存在的分量之后无需再检查。`allow_leaf_link` 允许最后一段
    /// 本身是链接（删除、移动链接本身不会跟随它）。
    pub async fn reject_symlinks(
        &self,
        target: &Path,
        allow_leaf_link: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::PathEscape(target.display().to_string()))?;
        let mut current = self.root.clone();
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            let is_leaf = components.peek().is_none();
            match fs::symlink_metadata(&current).await {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    if is_leaf && allow_leaf_link {
                        return Ok(());
                    }
                    return Err(StorageError::SymlinkComponent(self.relative_of(&current)));
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// 返回 `target` 相对根目录的 `/` 分隔路径，根目录本身为空串。
    pub fn relative_of(&self, target: &Path) -> String {
        target
            .strip_prefix(&self.root)
            .map(to_slash)
            .unwrap_or_default()
    }

    pub async fn list_dir(&self, relative: &str) -> Result<Vec<DirectoryEntry>, StorageError> {
        let target = self.resolve_checked(relative).await?;
        let mut dir = fs::read_dir(&target).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let path = entry.path();
            let is_dir = metadata.is_dir();
            let size = if !is_dir {
                format_size(metadata.len())
            } else if self.folder_sizes {
                format_size(folder_size(&path).await)
            } else {
                NO_SIZE.to_string()
            };

            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: self.relative_of(&path),
                is_dir,
                size,
                modified_date: metadata
                    .modified()
                    .map(format_timestamp)
                    .unwrap_or_else(|_| NO_SIZE.to_string()),
            });
        }

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => compare_names(&a.name, &b.name),
        });

        if target != self.root {
            let parent = target.parent().unwrap_or(&self.root);
            entries.insert(
                0,
                DirectoryEntry {
                    name: "..".into(),
                    path: self.relative_of(parent),
                    is_dir: true,
                    size: NO_SIZE.into(),
                    modified_date: NO_SIZE.into(),
                },
            );
        }

        Ok(entries)
    }

    /// 删除文件或目录；路径含 `*` 时仅清空目录内容。
    pub async fn delete_path(&self, relative: &str) -> Result<(), StorageError> {
        if relative.contains('*') {
            let target = self.resolve_checked(&relative.replace('*', "")).await?;
            let mut dir = fs::read_dir(&target).await?;
            let mut removals = Vec::new();
            while let Some(entry) = dir.next_entry().await? {
                removals.push(remove_any(entry.path()));
            }
            try_join_all(removals).await?;
            return Ok(());
        }

        let target = self.resolve(relative)?;
        if target == self.root {
            return Err(StorageError::RootRemoval);
        }
        self.reject_symlinks(&target, true).await?;
        remove_any(target).await?;
        Ok(())
    }

    pub async fn create_dir(&self, relative: &str) -> Result<(), StorageError> {
        let target = self.resolve_checked(relative).await?;
        fs::create_dir_all(target).await?;
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.resolve(from)?;
        self.reject_symlinks(&source, true).await?;
        let destination = self.resolve_checked(to).await?;
        fs::rename(source, destination).await?;
        Ok(())
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.resolve_checked(from).await?;
        let destination = self.resolve_checked(to).await?;
        if source == destination {
            return Err(StorageError::CopyIntoSelf);
        }
        let metadata = fs::metadata(&source).await?;
        if metadata.is_dir() {
            if destination.starts_with(&source) {
                return Err(StorageError::CopyIntoSelf);
            }
            copy_tree(source, destination).await?;
        } else {
            fs::copy(source, destination).await?;
        }
        Ok(())
    }

    /// 读取文本内容；前 512 字节出现 0 字节即视为二进制文件。
    pub async fn read_text(&self, relative: &str) -> Result<String, StorageError> {
        let target = self.resolve_checked(relative).await?;
        let metadata = fs::metadata(&target).await?;
        if metadata.is_dir() {
            return Err(StorageError::NotAFile);
        }

        let mut probe = Vec::with_capacity(BINARY_PROBE_LEN as usize);
        fs::File::open(&target)
            .await?
            .take(BINARY_PROBE_LEN)
            .read_to_end(&mut probe)
            .await?;
        if probe.contains(&0) {
            return Err(StorageError::BinaryContent);
        }

        let bytes = fs::read(&target).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

async fn remove_any(path: PathBuf) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(&path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

/// 递归复制目录，同级条目并发复制后汇合。符号链接不复制。
fn copy_tree(source: PathBuf, destination: PathBuf) -> BoxFuture<'static, io::Result<()>> {
    async move {
        fs::create_dir_all(&destination).await?;
        let mut dir = fs::read_dir(&source).await?;
        let mut children = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let from = entry.path();
            let to = destination.join(entry.file_name());
            let kind = entry.file_type().await?;
            if kind.is_symlink() {
                debug!(path = ?from, "skip symlink while copying");
            } else if kind.is_dir() {
                children.push(copy_tree(from, to));
            } else {
                children.push(async move { fs::copy(from, to).await.map(|_| ()) }.boxed());
            }
        }
        try_join_all(children).await?;
        Ok(())
    }
    .boxed()
}

async fn folder_size(root: &Path) -> u64 {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    total
}

/// 按词法规则折叠 `.` 与 `..`，不访问文件系统。
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let at_anchor = matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                );
                if at_anchor {
                    if normalized.as_os_str().is_empty() {
                        normalized.push("..");
                    }
                } else if normalized.ends_with("..") {
                    normalized.push("..");
                } else {
                    normalized.pop();
                }
            }
        }
    }
    normalized
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, usize); 4] = [("Bytes", 0), ("KB", 1), ("MB", 2), ("GB", 2)];
    let mut value = bytes as f64;
    let mut index = 0;
    while value >= 1024.0 && index < UNITS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    let (unit, precision) = UNITS[index];
    format!("{value:.precision$} {unit}")
}

fn format_timestamp(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%d/%m/%Y %H:%M:%S").to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("path escapes the root directory: {0}")]
    PathEscape(String),
    #[error("refusing to delete the root directory")]
    RootRemoval,
    #[error("cannot copy a path onto itself or into its own subtree")]
    CopyIntoSelf,
    #[error("path goes through a symbolic link: {0}")]
    SymlinkComponent(String),
    #[error("path is not a file")]
    NotAFile,
    #[error("binary file detected, cannot be read as text")]
    BinaryContent,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: String,
    pub modified_date: String,
}
