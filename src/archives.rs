//! 解压、压缩与文件夹打包下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Json, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::archive::ArchiveEngine;
use crate::error::ApiError;
use crate::files::OptionalPathQuery;
use crate::http::{Reply, attachment_disposition};
use crate::storage::Storage;
use crate::temp::TempArchives;

#[derive(Deserialize)]
pub(crate) struct ArchiveBody {
    path: String,
}

/// 识别归档格式并解压到源文件所在目录。
pub async fn extract_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(engine): Extension<Arc<ArchiveEngine>>,
    Json(ArchiveBody { path }): Json<ArchiveBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    let source = storage.resolve_checked(&path).await?;
    let output_dir = source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| storage.root_path().to_path_buf());
    let format = engine.extract(&source, &output_dir).await?;
    info!(path, %format, "extract file");
    Ok(JsonResponse(Reply::ok(format!("{format} archive extracted."))))
}

/// 压缩为同目录下的 `<path>.7z`。
pub async fn compress_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(engine): Extension<Arc<ArchiveEngine>>,
    Json(ArchiveBody { path }): Json<ArchiveBody>,
) -> Result<JsonResponse<Reply>, ApiError> {
    let source = storage.resolve_checked(&path).await?;
    let output = with_7z_suffix(&source);
    engine.compress(&source, &output).await?;
    info!(path, output = ?output, "compress file");
    Ok(JsonResponse(Reply::ok("Compressed.")))
}

/// 将目录压缩到临时归档并作为附件下载，响应体释放后删除归档。
pub async fn download_folder(
    Query(query): Query<OptionalPathQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(engine): Extension<Arc<ArchiveEngine>>,
    Extension(temp): Extension<Arc<TempArchives>>,
) -> Result<Response, ApiError> {
    let source = storage.resolve_checked(&query.path).await?;
    if !fs::try_exists(&source).await.unwrap_or(false) {
        return Err(ApiError::NotFound("folder not found".into()));
    }

    let archive = temp.allocate();
    engine.compress(&source, archive.path()).await?;
    let file = File::open(archive.path())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .len();

    let download_name = folder_download_name(&storage.relative_of(&source));
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-7z-compressed"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        attachment_disposition(&download_name),
    );
    info!(path = query.path, archive = ?archive.path(), size, "download folder");

    // 归档句柄随响应体一同释放
    let body = ReaderStream::new(file).map(move |chunk| {
        let _archive = &archive;
        chunk
    });
    Ok((StatusCode::OK, headers, AxumBody::from_stream(body)).into_response())
}

fn with_7z_suffix(source: &Path) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(".7z");
    PathBuf::from(name)
}

/// `docs/2024` → `docs-2024 Download.7z`，根目录为 `Root Download.7z`。
fn folder_download_name(relative: &str) -> String {
    let trimmed = relative.trim_matches('/');
    let stem = if trimmed.is_empty() {
        "Root".to_string()
    } else {
        trimmed.replace('/', "-")
    };
    format!("{stem} Download.7z")
}
