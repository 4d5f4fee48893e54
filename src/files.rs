//! 文件列表、读写、复制移动、删除与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Json, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::atomic::AtomicFile;
use crate::error::ApiError;
use crate::http::{Reply, attachment_disposition};
use crate::storage::{DirectoryEntry, Storage};

#[derive(Deserialize)]
pub(crate) struct OptionalPathQuery {
    #[serde(default)]
    pub(crate) path: String,
}

#[derive(Deserialize)]
pub(crate) struct PathBody {
    path: String,
}

#[derive(Deserialize)]
pub(crate) struct ContentBody {
    path: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MoveBody {
    old_path: String,
    new_path: String,
}

#[derive(Debug, Serialize)]
pub struct ListReply {
    success: bool,
    files: Vec<DirectoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct ContentReply {
    success: bool,
    content: String,
}

/// 创建或覆盖文件。
pub async fn create_file(
    Extension(storage): Extension<Arc<Storage>>,
    Json(ContentBody { path, content }): Json<ContentBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    let target = storage.resolve_checked(&path).await?;
    AtomicFile::write(&target, content.as_bytes())
        .await
        .map_err(|err| ApiError::Internal(format!("failed to create file: {err}")))?;
    info!(path, bytes = content.len(), "create file");
    Ok(JsonResponse(Reply::ok("File created.")))
}

/// 创建目录（含父级）。
pub async fn create_directory(
    Extension(storage): Extension<Arc<Storage>>,
    Json(PathBody { path }): Json<PathBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    storage.create_dir(&path).await?;
    info!(path, "create directory");
    Ok(JsonResponse(Reply::ok("Directory created.")))
}

/// 列出目录内容。
pub async fn list_files(
    Query(query): Query<OptionalPathQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<ListReply>, ApiError> {
    let files = storage.list_dir(&query.path).await?;
    info!(path = query.path, count = files.len(), "list files");
    Ok(JsonResponse(ListReply {
        success: true,
        files,
    }))
}

pub async fn rename_move(
    Extension(storage): Extension<Arc<Storage>>,
    Json(MoveBody { old_path, new_path }): Json<MoveBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    storage.rename(&old_path, &new_path).await?;
    info!(from = old_path, to = new_path, "rename");
    Ok(JsonResponse(Reply::ok("Renamed.")))
}

pub async fn copy_entry(
    Extension(storage): Extension<Arc<Storage>>,
    Json(MoveBody { old_path, new_path }): Json<MoveBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    storage.copy(&old_path, &new_path).await?;
    info!(from = old_path, to = new_path, "copy");
    Ok(JsonResponse(Reply::ok("Copied.")))
}

/// 删除文件或目录；`dir/*` 只清空目录内容。
pub async fn delete_entry(
    Extension(storage): Extension<Arc<Storage>>,
    Json(PathBody { path }): Json<PathBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    storage.delete_path(&path).await?;
    info!(path, "delete entry");
    let message = if path.contains('*') {
        "Directory contents deleted."
    } else {
        "Deleted."
    };
    Ok(JsonResponse(Reply::ok(message)))
}

/// 覆盖已存在的文件，不存在时返回 404。
pub async fn edit_file(
    Extension(storage): Extension<Arc<Storage>>,
    Json(ContentBody { path, content }): Json<ContentBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    let target = storage.resolve_checked(&path).await?;
    let exists = fs::try_exists(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    if !exists {
        return Err(ApiError::NotFound("file not found".into()));
    }
    AtomicFile::write(&target, content.as_bytes())
        .await
        .map_err(|err| ApiError::Internal(format!("failed to edit file: {err}")))?;
    info!(path, bytes = content.len(), "edit file");
    Ok(JsonResponse(Reply::ok("File saved.")))
}

pub async fn get_file_content(
    Extension(storage): Extension<Arc<Storage>>,
    Json(PathBody { path }): Json<PathBody>,
) -> Result<JsonResponse<ContentReply>, ApiError> {
    let content = storage.read_text(&path).await?;
    Ok(JsonResponse(ContentReply {
        success: true,
        content,
    }))
}

/// 以附件形式下载文件。
pub async fn download_file(
    Query(query): Query<OptionalPathQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let target = storage.resolve_checked(&query.path).await?;
    let metadata = match fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(_) => return Err(ApiError::NotFound("file not found".into())),
    };
    if metadata.is_dir() {
        return Err(ApiError::BadRequest("path is not a file".into()));
    }
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".into());
    let mime = mime_guess::from_path(&target).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(header::CONTENT_DISPOSITION, attachment_disposition(&file_name));
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    info!(path = query.path, size = metadata.len(), "download file");
    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
