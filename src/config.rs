//! CLI 参数与服务默认配置。

use clap::Parser;
use shadow_rs::formatcp;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_HTTP_PORT: u16 = 3001;
pub const DEFAULT_TEMP_MAX_AGE_MINS: u64 = 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_EXTRACTOR_BIN: &str = "7z";
pub const TEMP_ARCHIVE_SUFFIX: &str = "_folder.7z";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "file-warden", version = VERSION_INFO, about = "Confined web file manager")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "FW_ROOT_DIR",
        default_value = "~/files",
        help = "Root directory all operations are confined to"
    )]
    pub root_dir: String,
    #[arg(
        long,
        env = "FW_TEMP_DIR",
        default_value = "temp",
        help = "Directory for temporary folder-download archives"
    )]
    pub temp_dir: String,
    #[arg(
        long,
        env = "FW_PUBLIC_DIR",
        default_value = "public",
        help = "Static frontend directory"
    )]
    pub public_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "FW_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "FW_HTTP_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(long, env = "FW_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "FW_FOLDER_SIZES",
        default_value_t = false,
        help = "Compute folder sizes recursively when listing (slow on big trees)"
    )]
    pub folder_sizes: bool,
    #[arg(
        long,
        env = "FW_TEMP_MAX_AGE_MINS",
        default_value_t = DEFAULT_TEMP_MAX_AGE_MINS,
        help = "Age in minutes after which temp archives are swept"
    )]
    pub temp_max_age_mins: u64,
    #[arg(
        long,
        env = "FW_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        help = "Temp archive sweep interval in seconds (0 to disable)"
    )]
    pub sweep_interval_secs: u64,
    #[arg(
        long,
        env = "FW_COMPRESSOR_DIR",
        default_value = "bin/7zip",
        help = "Directory holding <os>/<arch>/7za compressor binaries"
    )]
    pub compressor_dir: String,
    #[arg(
        long,
        env = "FW_EXTRACTOR_BIN",
        default_value = DEFAULT_EXTRACTOR_BIN,
        help = "7z binary used to extract 7z and rar archives"
    )]
    pub extractor_bin: String,
    #[arg(
        long,
        env = "FW_ARCHIVE_TIMEOUT_SECS",
        help = "Kill compressor/extractor processes after this many seconds (unset waits forever)"
    )]
    pub archive_timeout_secs: Option<u64>,
}

impl Args {
    pub fn root_path(&self) -> PathBuf {
        expand_home(&self.root_dir)
    }

    pub fn temp_path(&self) -> PathBuf {
        expand_home(&self.temp_dir)
    }

    pub fn temp_max_age(&self) -> Duration {
        Duration::from_secs(self.temp_max_age_mins.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn archive_timeout(&self) -> Option<Duration> {
        self.archive_timeout_secs.map(Duration::from_secs)
    }
}

/// 展开 `~` 前缀并转换为绝对路径。
pub fn expand_home(value: &str) -> PathBuf {
    let expanded = match value.strip_prefix('~') {
        Some(rest) => match home::home_dir() {
            Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    };
    absolutize(&expanded)
}

fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_replaces_tilde() {
        let Some(home) = home::home_dir() else {
            return;
        };
        assert_eq!(expand_home("~/files"), home.join("files"));
    }

    #[test]
    fn zero_sweep_interval_disables_sweep() {
        let args = Args::parse_from(["file-warden", "--sweep-interval-secs", "0"]);
        assert!(args.sweep_interval().is_none());
        assert_eq!(args.temp_max_age(), Duration::from_secs(60 * 60));
        assert!(args.archive_timeout().is_none());
    }
}
