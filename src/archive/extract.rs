//! 按格式分派的解压实现。

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::ArchiveError;
use super::format::ArchiveFormat;
use super::process::ExternalCommand;
use crate::storage::normalize_lexically;

/// 执行解压。调用方需保证 `format` 已识别且不为 `Unknown`。
pub(super) async fn extract_known(
    format: ArchiveFormat,
    input: &Path,
    output_dir: &Path,
    extractor: &Path,
    timeout: Option<Duration>,
) -> Result<(), ArchiveError> {
    tokio::fs::create_dir_all(output_dir).await?;
    let input_buf = input.to_path_buf();
    let output_buf = output_dir.to_path_buf();

    match format {
        ArchiveFormat::Zip => run_blocking(format, move || unpack_zip(&input_buf, &output_buf)).await,
        ArchiveFormat::Tar => run_blocking(format, move || unpack_tar(&input_buf, &output_buf)).await,
        ArchiveFormat::Gzip | ArchiveFormat::Bzip2 => {
            let written = run_blocking(format, move || {
                decompress_stream(format, &input_buf, &output_buf)
            })
            .await?;
            info!(format = %format, output = ?written, "stream decompressed");
            Ok(())
        }
        ArchiveFormat::SevenZip | ArchiveFormat::Rar => {
            let mut out_flag = std::ffi::OsString::from("-o");
            out_flag.push(output_dir.as_os_str());
            ExternalCommand::new(extractor)
                .arg("x")
                .arg("-y")
                .arg(out_flag)
                .arg(input)
                .timeout(timeout)
                .run()
                .await
                .map_err(|err| ArchiveError::ExtractionFailed {
                    format,
                    message: err.to_string(),
                })?;
            Ok(())
        }
        ArchiveFormat::Unknown => Err(ArchiveError::UnrecognizedFormat),
    }
}

async fn run_blocking<T, F>(format: ArchiveFormat, job: F) -> Result<T, ArchiveError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| err.to_string())
        .and_then(|result| result)
        .map_err(|message| ArchiveError::ExtractionFailed { format, message })
}

fn unpack_zip(input: &Path, output_dir: &Path) -> Result<(), String> {
    let file = File::open(input).map_err(|err| err.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| err.to_string())?;
    archive.extract(output_dir).map_err(|err| err.to_string())
}

fn unpack_tar(input: &Path, output_dir: &Path) -> Result<(), String> {
    let file = File::open(input).map_err(|err| err.to_string())?;
    let mut archive = tar::Archive::new(file);
    archive.set_overwrite(true);
    for entry in archive.entries().map_err(|err| err.to_string())? {
        let mut entry = entry.map_err(|err| err.to_string())?;
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let path = entry.path().map_err(|err| err.to_string())?.into_owned();
            let target = entry
                .link_name()
                .map_err(|err| err.to_string())?
                .map(|target| target.into_owned());
            if !link_stays_inside(output_dir, &path, target.as_deref(), kind.is_symlink()) {
                warn!(entry = ?path, target = ?target, "skip link entry escaping the output");
                continue;
            }
        }
        entry.unpack_in(output_dir).map_err(|err| err.to_string())?;
    }
    Ok(())
}

/// 链接目标必须是相对路径，且解析后仍位于输出目录内。
///
/// 符号链接相对其所在目录解析，硬链接相对归档根解析。
fn link_stays_inside(
    output_dir: &Path,
    entry: &Path,
    target: Option<&Path>,
    symbolic: bool,
) -> bool {
    let Some(target) = target else {
        return false;
    };
    if target.has_root() {
        return false;
    }
    let base = if symbolic {
        output_dir
            .join(entry)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| output_dir.to_path_buf())
    } else {
        output_dir.to_path_buf()
    };
    let output_dir = normalize_lexically(output_dir);
    let resolved = normalize_lexically(&base.join(target));
    resolved.starts_with(&output_dir) && resolved != output_dir
}

fn decompress_stream(
    format: ArchiveFormat,
    input: &Path,
    output_dir: &Path,
) -> Result<PathBuf, String> {
    let file = File::open(input).map_err(|err| err.to_string())?;
    let mut decoder: Box<dyn io::Read> = match format {
        ArchiveFormat::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        ArchiveFormat::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
        other => return Err(format!("{other} is not a single-stream format")),
    };
    let target = output_dir.join(stream_output_name(input, format));
    let mut output = File::create(&target).map_err(|err| err.to_string())?;
    io::copy(&mut decoder, &mut output).map_err(|err| err.to_string())?;
    Ok(target)
}

/// 去掉压缩后缀得到输出文件名；无已知后缀时追加 `.out`。
fn stream_output_name(input: &Path, format: ArchiveFormat) -> String {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lowered = name.to_ascii_lowercase();
    for (suffix, replacement) in format.stream_suffixes() {
        if lowered.len() > suffix.len() && lowered.ends_with(suffix) {
            return format!("{}{}", &name[..name.len() - suffix.len()], replacement);
        }
    }
    format!("{name}.out")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in entries {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn stream_output_names() {
        let gz = ArchiveFormat::Gzip;
        assert_eq!(stream_output_name(Path::new("/a/log.txt.gz"), gz), "log.txt");
        assert_eq!(stream_output_name(Path::new("/a/BUNDLE.TGZ"), gz), "BUNDLE.tar");
        assert_eq!(stream_output_name(Path::new("/a/data.gzip"), gz), "data");
        assert_eq!(stream_output_name(Path::new("/a/blob"), gz), "blob.out");
        assert_eq!(stream_output_name(Path::new("/a/.gz"), gz), ".gz.out");
        let bz = ArchiveFormat::Bzip2;
        assert_eq!(stream_output_name(Path::new("/a/dump.sql.bz2"), bz), "dump.sql");
        assert_eq!(stream_output_name(Path::new("/a/src.tbz2"), bz), "src.tar");
    }

    #[tokio::test]
    async fn zip_entries_overwrite_existing_files() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("bundle.zip");
        write_zip(&archive, &[("a.txt", b"fresh"), ("nested/b.txt", b"bee")]);
        let out = temp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("a.txt"), b"stale contents").unwrap();

        extract_known(ArchiveFormat::Zip, &archive, &out, Path::new("7z"), None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"fresh");
        assert_eq!(std::fs::read(out.join("nested/b.txt")).unwrap(), b"bee");
    }

    #[tokio::test]
    async fn tar_preserves_structure() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("bundle.tar");
        {
            let mut builder = tar::Builder::new(File::create(&archive).unwrap());
            let data = b"tar payload";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "dir/inner/file.txt", &data[..])
                .unwrap();
            builder.finish().unwrap();
        }
        let out = temp.path().join("out");

        extract_known(ArchiveFormat::Tar, &archive, &out, Path::new("7z"), None)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(out.join("dir/inner/file.txt")).unwrap(),
            b"tar payload"
        );
    }

    #[test]
    fn link_targets_must_stay_inside() {
        let out = Path::new("/data/out");
        let inside = |entry: &str, target: &str, symbolic: bool| {
            link_stays_inside(out, Path::new(entry), Some(Path::new(target)), symbolic)
        };
        assert!(inside("dir/link", "../file.txt", true));
        assert!(inside("dir/link", "sibling.txt", true));
        assert!(!inside("link", "/etc/passwd", true));
        assert!(!inside("dir/link", "../../outside", true));
        assert!(!inside("link", ".", true));
        assert!(inside("copy", "dir/file.txt", false));
        assert!(!inside("copy", "../outside", false));
        assert!(!link_stays_inside(out, Path::new("link"), None, true));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tar_escaping_links_are_skipped() {
        let temp = tempdir().unwrap();
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), b"TOP SECRET").unwrap();
        let archive = temp.path().join("links.tar");
        {
            let mut builder = tar::Builder::new(File::create(&archive).unwrap());
            let mut link = tar::Header::new_gnu();
            link.set_entry_type(tar::EntryType::Symlink);
            link.set_size(0);
            link.set_mode(0o777);
            builder.append_link(&mut link, "link", &outside).unwrap();

            let mut relative = tar::Header::new_gnu();
            relative.set_entry_type(tar::EntryType::Symlink);
            relative.set_size(0);
            relative.set_mode(0o777);
            builder.append_link(&mut relative, "alias.txt", "plain.txt").unwrap();

            let data = b"plain";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "plain.txt", &data[..]).unwrap();
            builder.finish().unwrap();
        }
        let out = temp.path().join("out");

        extract_known(ArchiveFormat::Tar, &archive, &out, Path::new("7z"), None)
            .await
            .unwrap();

        assert!(std::fs::symlink_metadata(out.join("link")).is_err());
        assert_eq!(std::fs::read(out.join("plain.txt")).unwrap(), b"plain");
        assert_eq!(std::fs::read(out.join("alias.txt")).unwrap(), b"plain");
    }

    #[tokio::test]
    async fn gzip_writes_beside_without_suffix() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("notes.txt.gz");
        {
            let mut encoder = flate2::write::GzEncoder::new(
                File::create(&archive).unwrap(),
                flate2::Compression::default(),
            );
            encoder.write_all(b"line one\nline two\n").unwrap();
            encoder.finish().unwrap();
        }

        extract_known(ArchiveFormat::Gzip, &archive, temp.path(), Path::new("7z"), None)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(temp.path().join("notes.txt")).unwrap(),
            b"line one\nline two\n"
        );
    }

    #[tokio::test]
    async fn bzip2_stream_is_decompressed() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("dump.sql.bz2");
        {
            let mut encoder = bzip2::write::BzEncoder::new(
                File::create(&archive).unwrap(),
                bzip2::Compression::default(),
            );
            encoder.write_all(b"select 1;").unwrap();
            encoder.finish().unwrap();
        }

        extract_known(ArchiveFormat::Bzip2, &archive, temp.path(), Path::new("7z"), None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(temp.path().join("dump.sql")).unwrap(), b"select 1;");
    }

    #[tokio::test]
    async fn corrupt_zip_reports_extraction_failure() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("broken.zip");
        std::fs::write(&archive, [0x50, 0x4B, 0x03, 0x04, 0xFF, 0xFF]).unwrap();

        let result =
            extract_known(ArchiveFormat::Zip, &archive, temp.path(), Path::new("7z"), None).await;

        assert!(matches!(
            result,
            Err(ArchiveError::ExtractionFailed {
                format: ArchiveFormat::Zip,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn seven_zip_without_extractor_is_distinct_failure() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("bundle.7z");
        std::fs::write(&archive, [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]).unwrap();

        let result = extract_known(
            ArchiveFormat::SevenZip,
            &archive,
            temp.path(),
            Path::new("/nonexistent/7z-extractor"),
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(ArchiveError::ExtractionFailed {
                format: ArchiveFormat::SevenZip,
                ..
            })
        ));
    }
}
