//! 调用随附的 7za 二进制进行压缩。

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use super::ArchiveError;
use super::process::ExternalCommand;

#[cfg(windows)]
const COMPRESSOR_BIN: &str = "7za.exe";
#[cfg(not(windows))]
const COMPRESSOR_BIN: &str = "7za";

/// 按当前操作系统与 CPU 架构定位压缩器，每次调用时重新计算。
pub fn compressor_path(compressor_dir: &Path) -> Result<PathBuf, ArchiveError> {
    compressor_path_for(compressor_dir, std::env::consts::OS, std::env::consts::ARCH)
}

fn compressor_path_for(
    compressor_dir: &Path,
    os: &str,
    arch: &str,
) -> Result<PathBuf, ArchiveError> {
    let unsupported = || ArchiveError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    };
    let os_dir = match os {
        "linux" => "linux",
        "macos" => "mac",
        "windows" => "win",
        _ => return Err(unsupported()),
    };
    let arch_dir = match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        "arm" => "arm",
        _ => return Err(unsupported()),
    };
    Ok(compressor_dir.join(os_dir).join(arch_dir).join(COMPRESSOR_BIN))
}

pub(super) async fn compress(
    compressor_dir: &Path,
    timeout: Option<Duration>,
    input: &Path,
    output: &Path,
) -> Result<(), ArchiveError> {
    let metadata = fs::metadata(input)
        .await
        .map_err(|_| ArchiveError::MissingInput(input.to_path_buf()))?;
    if !metadata.is_dir() && !metadata.is_file() {
        return Err(ArchiveError::MissingInput(input.to_path_buf()));
    }

    remove_stale_output(output).await;

    let binary = compressor_path(compressor_dir)?;
    ensure_executable(&binary).await?;

    let result = ExternalCommand::new(&binary)
        .arg("a")
        .arg("-t7z")
        .arg(output)
        .arg(input)
        .arg("-y")
        .timeout(timeout)
        .run()
        .await
        .map_err(|err| ArchiveError::CompressionFailed(err.to_string()))?;
    debug!(stdout = %result.stdout.trim(), "compressor finished");

    if !fs::try_exists(output).await.unwrap_or(false) {
        return Err(ArchiveError::CompressionFailed(format!(
            "compressor exited successfully but {} was not created",
            output.display()
        )));
    }
    info!(input = ?input, output = ?output, "compressed");
    Ok(())
}

async fn remove_stale_output(output: &Path) {
    if fs::remove_file(output).await.is_err() {
        let _ = fs::remove_dir_all(output).await;
    }
}

#[cfg(unix)]
async fn ensure_executable(binary: &Path) -> Result<(), ArchiveError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(binary).await.map_err(|err| {
        ArchiveError::CompressionFailed(format!(
            "compressor {} unavailable: {err}",
            binary.display()
        ))
    })?;
    let mut permissions = metadata.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0 {
        return Ok(());
    }

    permissions.set_mode(mode | 0o111);
    fs::set_permissions(binary, permissions)
        .await
        .map_err(|source| ArchiveError::Permission {
            path: binary.to_path_buf(),
            source,
        })?;
    info!(binary = ?binary, "granted execute permission to compressor");
    Ok(())
}

#[cfg(not(unix))]
async fn ensure_executable(binary: &Path) -> Result<(), ArchiveError> {
    if fs::try_exists(binary).await.unwrap_or(false) {
        Ok(())
    } else {
        Err(ArchiveError::CompressionFailed(format!(
            "compressor {} unavailable",
            binary.display()
        )))
    }
}
