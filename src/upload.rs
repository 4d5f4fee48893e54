//! multipart 文件上传处理器。

use axum::body::Bytes;
use axum::extract::{Extension, Multipart, Query};
use axum::response::Json as JsonResponse;
use futures_util::Stream;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::error::ApiError;
use crate::files::OptionalPathQuery;
use crate::http::Reply;
use crate::storage::Storage;

const FILE_FIELD: &str = "file";

/// 接收 `file` 字段并写入 `path` 指定的目录，同名文件直接覆盖。
pub async fn upload_file(
    Query(query): Query<OptionalPathQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<Reply>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "skip multipart field");
            continue;
        }
        let Some(file_name) = field.file_name().and_then(sanitize_file_name) else {
            return Err(ApiError::BadRequest("file name is required".into()));
        };
        let (target, bytes) = persist_upload(&storage, &query.path, &file_name, field).await?;
        info!(path = ?target, bytes, "upload file");
        return Ok(JsonResponse(Reply::ok("File uploaded.")));
    }
    Err(ApiError::BadRequest("no file uploaded".into()))
}

/// 将上传内容写入目标目录，返回最终路径与字节数。
pub(crate) async fn persist_upload<S, E>(
    storage: &Storage,
    directory: &str,
    file_name: &str,
    body: S,
) -> Result<(PathBuf, u64), ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let target = storage.resolve_checked(directory).await?.join(file_name);
    storage.reject_symlinks(&target, false).await?;
    let bytes = AtomicFile::write_stream(&target, body)
        .await
        .map_err(|err| ApiError::Internal(format!("failed to store upload: {err}")))?;
    Ok((target, bytes))
}

/// 客户端文件名只保留最后一段。
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}
