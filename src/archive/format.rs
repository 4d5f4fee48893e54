//! 魔数签名表与格式识别。

use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    Tar,
    Bzip2,
    SevenZip,
    Rar,
    Unknown,
}

struct Signature {
    format: ArchiveFormat,
    offset: usize,
    magic: &'static [u8],
}

/// Canonical signature table. The first matching row wins.
static SIGNATURES: &[Signature] = &[
    Signature {
        format: ArchiveFormat::Zip,
        offset: 0,
        magic: &[0x50, 0x4B, 0x03, 0x04],
    },
    Signature {
        format: ArchiveFormat::Gzip,
        offset: 0,
        magic: &[0x1F, 0x8B],
    },
    Signature {
        format: ArchiveFormat::Bzip2,
        offset: 0,
        magic: b"BZh",
    },
    Signature {
        format: ArchiveFormat::SevenZip,
        offset: 0,
        magic: &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C],
    },
    Signature {
        format: ArchiveFormat::Rar,
        offset: 0,
        magic: &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07],
    },
    Signature {
        format: ArchiveFormat::Tar,
        offset: 257,
        magic: b"ustar",
    },
];

/// Bytes needed to evaluate every row of the signature table.
pub const HEADER_LEN: usize = 262;

impl Signature {
    fn matches(&self, header: &[u8]) -> bool {
        header
            .get(self.offset..self.offset + self.magic.len())
            .is_some_and(|window| window == self.magic)
    }
}

impl ArchiveFormat {
    /// 根据文件头字节识别格式，数据不足时返回 `Unknown`。
    pub fn sniff(header: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|signature| signature.matches(header))
            .map(|signature| signature.format)
            .unwrap_or(ArchiveFormat::Unknown)
    }

    /// Suffix rewrites used when a single-stream format is decompressed.
    pub(crate) fn stream_suffixes(self) -> &'static [(&'static str, &'static str)] {
        match self {
            ArchiveFormat::Gzip => &[(".tgz", ".tar"), (".gzip", ""), (".gz", "")],
            ArchiveFormat::Bzip2 => &[(".tbz2", ".tar"), (".tbz", ".tar"), (".bz2", "")],
            _ => &[],
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Bzip2 => "bzip2",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Rar => "rar",
            ArchiveFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// 读取文件头并识别格式。截断文件不会报错。
pub async fn detect(path: &Path) -> std::io::Result<ArchiveFormat> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    File::open(path)
        .await?
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .await?;
    Ok(ArchiveFormat::sniff(&header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut data = prefix.to_vec();
        data.resize(HEADER_LEN + 64, 0xAA);
        data
    }

    #[test]
    fn sniff_known_headers() {
        let cases: [(&[u8], ArchiveFormat); 5] = [
            (&[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00], ArchiveFormat::Zip),
            (&[0x1F, 0x8B, 0x08, 0x00], ArchiveFormat::Gzip),
            (b"BZh91AY&SY", ArchiveFormat::Bzip2),
            (&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04], ArchiveFormat::SevenZip),
            (b"Rar!\x1a\x07\x01\x00", ArchiveFormat::Rar),
        ];
        for (header, expected) in cases {
            assert_eq!(ArchiveFormat::sniff(header), expected);
            assert_eq!(ArchiveFormat::sniff(&padded(header)), expected);
        }
    }

    #[test]
    fn sniff_tar_at_offset() {
        let mut header = vec![0u8; 512];
        header[257..263].copy_from_slice(b"ustar\0");
        assert_eq!(ArchiveFormat::sniff(&header), ArchiveFormat::Tar);
        assert_eq!(ArchiveFormat::sniff(&header[..HEADER_LEN]), ArchiveFormat::Tar);
    }

    #[test]
    fn sniff_short_input_is_unknown() {
        assert_eq!(ArchiveFormat::sniff(&[]), ArchiveFormat::Unknown);
        assert_eq!(ArchiveFormat::sniff(&[0x50, 0x4B, 0x03]), ArchiveFormat::Unknown);
        assert_eq!(ArchiveFormat::sniff(&[0x1F]), ArchiveFormat::Unknown);
        assert_eq!(ArchiveFormat::sniff(&[0u8; 260]), ArchiveFormat::Unknown);
    }

    #[test]
    fn sniff_unrelated_bytes_is_unknown() {
        assert_eq!(
            ArchiveFormat::sniff(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00]),
            ArchiveFormat::Unknown
        );
        assert_eq!(ArchiveFormat::sniff(b"hello world"), ArchiveFormat::Unknown);
    }

    #[tokio::test]
    async fn detect_empty_and_truncated_files() {
        let temp = tempdir().expect("tempdir");
        let empty = temp.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(detect(&empty).await.unwrap(), ArchiveFormat::Unknown);

        let short = temp.path().join("short.zip");
        std::fs::write(&short, [0x50, 0x4B]).unwrap();
        assert_eq!(detect(&short).await.unwrap(), ArchiveFormat::Unknown);
    }

    #[tokio::test]
    async fn detect_reads_header_only() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("fake.rar");
        let mut data = b"Rar!\x1a\x07\x00".to_vec();
        data.extend(std::iter::repeat_n(0x42, 4096));
        std::fs::write(&path, data).unwrap();
        assert_eq!(detect(&path).await.unwrap(), ArchiveFormat::Rar);
    }
}
