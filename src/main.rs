//! File Warden server binary.
//!
//! Serves a web file manager confined to a single root directory: JSON file
//! operations, multipart upload, streamed downloads and archive handling
//! through an external 7-Zip. The static frontend is served as a fallback.

mod archive;
mod archives;
mod atomic;
mod background;
mod config;
mod error;
mod files;
mod http;
mod logging;
mod storage;
mod temp;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::archive::{ArchiveEngine, compressor_path};
use crate::background::spawn_background_tasks;
use crate::config::{Args, expand_home};
use crate::http::build_cors_layer;
use crate::storage::Storage;
use crate::temp::TempArchives;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(args.root_path()).with_folder_sizes(args.folder_sizes));
    storage.ensure_root().await?;

    let temp_archives = Arc::new(TempArchives::new(args.temp_path(), args.temp_max_age()));
    temp_archives.ensure_dir().await?;

    let compressor_dir = expand_home(&args.compressor_dir);
    match compressor_path(&compressor_dir) {
        Ok(path) if path.is_file() => info!(path = ?path, "using bundled compressor"),
        Ok(path) => warn!(path = ?path, "bundled compressor not found, compression will fail"),
        Err(err) => warn!(error = %err, "compression unavailable on this platform"),
    }
    let engine = Arc::new(
        ArchiveEngine::new(compressor_dir, PathBuf::from(&args.extractor_bin))
            .with_timeout(args.archive_timeout()),
    );

    info!(
        root = ?storage.root_path(),
        temp = ?temp_archives.dir(),
        public = args.public_dir,
        "storage configured"
    );

    let mut app = Router::new()
        .route("/create-file", post(files::create_file))
        .route("/create-dir", post(files::create_directory))
        .route("/list-files", get(files::list_files))
        .route("/extract-file", post(archives::extract_file))
        .route("/compress-file", post(archives::compress_file))
        .route("/rename-move", post(files::rename_move))
        .route("/copy-file", post(files::copy_entry))
        .route("/delete", delete(files::delete_entry))
        .route(
            "/upload-file",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/download-file", get(files::download_file))
        .route("/edit-file", post(files::edit_file))
        .route("/get-file-content", post(files::get_file_content))
        .route("/download-folder", get(archives::download_folder))
        .fallback_service(ServeDir::new(&args.public_dir))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = %http::client_ip(request),
                        method = %request.method(),
                        path = request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(engine))
        .layer(Extension(temp_archives.clone()));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("Starting HTTP server at {}", http_addr);

    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    let sweeper = spawn_background_tasks(temp_archives, args.sweep_interval());
    tokio::select! {
        result = http_server => result?,
        _ = shutdown_signal(handle) => {}
    }
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
