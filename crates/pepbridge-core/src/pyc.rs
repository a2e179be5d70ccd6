//! Compiled module cache (`.pyc`) naming and header codec.
//!
//! The 16-byte header is laid out as: 4-byte magic, 4-byte little-endian
//! flag word, then either an 8-byte source hash (bit 0 set) or a 4-byte
//! source mtime followed by a 4-byte source size.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 16;
pub const ALL_OPT_LEVELS: [u8; 3] = [0, 1, 2];
pub const SOURCE_SUFFIX: &str = ".py";
pub const CACHE_SUFFIXES: [&str; 2] = [".pyc", ".pyo"];

const FLAG_HASH_BASED: u32 = 0b01;
const FLAG_CHECK_SOURCE: u32 = 0b10;
const KNOWN_FLAGS: u32 = FLAG_HASH_BASED | FLAG_CHECK_SOURCE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    Timestamp { mtime: u32, size: u32 },
    Hash { hash: [u8; 8], check_source: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PycHeader {
    pub magic: [u8; 4],
    pub invalidation: Invalidation,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("header too short ({0} bytes)")]
    TooShort(usize),
    #[error("magic {} does not match the interpreter", hex::encode(.0))]
    MagicMismatch([u8; 4]),
    #[error("reserved flag bits set ({0:#x})")]
    ReservedFlags(u32),
    #[error("check_source flag set for timestamp invalidation")]
    CheckSourceWithoutHash,
}

impl PycHeader {
    /// Decodes the header from the start of `bytes`.
    ///
    /// # Errors
    /// Any structural problem yields a [`HeaderError`]; callers treat all of
    /// them as one "invalid" outcome.
    pub fn parse(bytes: &[u8], expected_magic: [u8; 4]) -> Result<Self, HeaderError> {
        let Some(header) = bytes.get(..HEADER_LEN) else {
            return Err(HeaderError::TooShort(bytes.len()));
        };
        let magic = word(header, 0);
        if magic != expected_magic {
            return Err(HeaderError::MagicMismatch(magic));
        }
        let flags = u32::from_le_bytes(word(header, 4));
        if flags & !KNOWN_FLAGS != 0 {
            return Err(HeaderError::ReservedFlags(flags));
        }
        let invalidation = if flags & FLAG_HASH_BASED != 0 {
            let mut hash = [0_u8; 8];
            hash.copy_from_slice(&header[8..16]);
            Invalidation::Hash {
                hash,
                check_source: flags & FLAG_CHECK_SOURCE != 0,
            }
        } else {
            if flags & FLAG_CHECK_SOURCE != 0 {
                return Err(HeaderError::CheckSourceWithoutHash);
            }
            Invalidation::Timestamp {
                mtime: u32::from_le_bytes(word(header, 8)),
                size: u32::from_le_bytes(word(header, 12)),
            }
        };
        Ok(Self {
            magic,
            invalidation,
        })
    }

    /// Reads at most [`HEADER_LEN`] bytes and decodes them.
    ///
    /// # Errors
    /// The outer result carries read failures, the inner one header problems.
    pub fn read_from<R: Read>(
        reader: R,
        expected_magic: [u8; 4],
    ) -> io::Result<Result<Self, HeaderError>> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        reader.take(HEADER_LEN as u64).read_to_end(&mut buf)?;
        Ok(Self::parse(&buf, expected_magic))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0_u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.magic);
        match self.invalidation {
            Invalidation::Timestamp { mtime, size } => {
                out[8..12].copy_from_slice(&mtime.to_le_bytes());
                out[12..16].copy_from_slice(&size.to_le_bytes());
            }
            Invalidation::Hash { hash, check_source } => {
                let mut flags = FLAG_HASH_BASED;
                if check_source {
                    flags |= FLAG_CHECK_SOURCE;
                }
                out[4..8].copy_from_slice(&flags.to_le_bytes());
                out[8..16].copy_from_slice(&hash);
            }
        }
        out
    }
}

fn word(header: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0_u8; 4];
    out.copy_from_slice(&header[offset..offset + 4]);
    out
}

/// Path of the cache for `source` at `level`, mirroring
/// `importlib.util.cache_from_source`.
#[must_use]
pub fn cache_from_source(source: &Path, cache_tag: &str, level: u8) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match file_name.rsplit_once('.') {
        Some(("", rest)) => rest,
        Some((base, _)) => base,
        None => file_name.as_str(),
    };
    let mut cache_name = format!("{stem}.{cache_tag}");
    if level != 0 {
        cache_name.push_str(&format!(".opt-{level}"));
    }
    cache_name.push_str(CACHE_SUFFIXES[0]);
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    dir.join("__pycache__").join(cache_name)
}

#[must_use]
pub fn is_source(path: &Path) -> bool {
    has_suffix(path, &[SOURCE_SUFFIX])
}

#[must_use]
pub fn is_cache(path: &Path) -> bool {
    has_suffix(path, &CACHE_SUFFIXES)
}

fn has_suffix(path: &Path, suffixes: &[&str]) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| suffixes.iter().any(|suffix| name.ends_with(suffix)))
}

/// Parses `--optimize`: a comma-separated list of levels or `all`.
///
/// # Errors
/// Returns a configuration error for unknown levels.
pub fn parse_optimize_levels(value: &str) -> Result<Vec<u8>> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.contains(&"all") {
        return Ok(ALL_OPT_LEVELS.to_vec());
    }
    let mut levels = Vec::new();
    for part in parts {
        let level = part
            .parse::<u8>()
            .ok()
            .filter(|level| ALL_OPT_LEVELS.contains(level))
            .ok_or_else(|| {
                Error::config(format!(
                    "invalid optimization level '{part}' (expected 0, 1, 2 or all)"
                ))
            })?;
        levels.push(level);
    }
    levels.sort_unstable();
    levels.dedup();
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = [0xcb, 0x0d, 0x0d, 0x0a];

    fn raw(flags: u32, tail: [u8; 8]) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&tail);
        out
    }

    #[test]
    fn timestamp_header_recovers_mtime_and_size() {
        let header = PycHeader {
            magic: MAGIC,
            invalidation: Invalidation::Timestamp {
                mtime: 1_700_000_000,
                size: 4242,
            },
        };
        let decoded = PycHeader::parse(&header.to_bytes(), MAGIC).expect("valid");
        assert_eq!(
            decoded.invalidation,
            Invalidation::Timestamp {
                mtime: 1_700_000_000,
                size: 4242
            }
        );
    }

    #[test]
    fn hash_header_recovers_hash() {
        let bytes = raw(1, *b"\x01\x02\x03\x04\x05\x06\x07\x08");
        let decoded = PycHeader::parse(&bytes, MAGIC).expect("valid");
        assert_eq!(
            decoded.invalidation,
            Invalidation::Hash {
                hash: *b"\x01\x02\x03\x04\x05\x06\x07\x08",
                check_source: false
            }
        );
        let checked = PycHeader::parse(&raw(3, [0; 8]), MAGIC).expect("valid");
        assert!(matches!(
            checked.invalidation,
            Invalidation::Hash {
                check_source: true,
                ..
            }
        ));
    }

    #[test]
    fn invalid_flag_words_are_rejected() {
        assert_eq!(
            PycHeader::parse(&raw(2, [0; 8]), MAGIC),
            Err(HeaderError::CheckSourceWithoutHash)
        );
        assert_eq!(
            PycHeader::parse(&raw(4, [0; 8]), MAGIC),
            Err(HeaderError::ReservedFlags(4))
        );
        assert_eq!(
            PycHeader::parse(&raw(0x8000_0001, [0; 8]), MAGIC),
            Err(HeaderError::ReservedFlags(0x8000_0001))
        );
    }

    #[test]
    fn short_or_foreign_headers_are_rejected() {
        assert_eq!(
            PycHeader::parse(&raw(0, [0; 8])[..15], MAGIC),
            Err(HeaderError::TooShort(15))
        );
        let mut foreign = raw(0, [0; 8]);
        foreign[0] = 0x55;
        assert!(matches!(
            PycHeader::parse(&foreign, MAGIC),
            Err(HeaderError::MagicMismatch(_))
        ));
    }

    #[test]
    fn read_from_ignores_code_after_header() -> io::Result<()> {
        let mut bytes = raw(0, [1, 0, 0, 0, 2, 0, 0, 0]);
        bytes.extend_from_slice(b"marshalled code object");
        let header = PycHeader::read_from(bytes.as_slice(), MAGIC)?.expect("valid");
        assert_eq!(
            header.invalidation,
            Invalidation::Timestamp { mtime: 1, size: 2 }
        );
        Ok(())
    }

    #[test]
    fn cache_paths_follow_importlib_naming() {
        let source = Path::new("/usr/lib/python3.12/site-packages/foo/bar.py");
        assert_eq!(
            cache_from_source(source, "cpython-312", 0),
            PathBuf::from("/usr/lib/python3.12/site-packages/foo/__pycache__/bar.cpython-312.pyc")
        );
        assert_eq!(
            cache_from_source(source, "cpython-312", 2),
            PathBuf::from(
                "/usr/lib/python3.12/site-packages/foo/__pycache__/bar.cpython-312.opt-2.pyc"
            )
        );
        assert_eq!(
            cache_from_source(Path::new("/x/.hidden.py"), "cpython-312", 0),
            PathBuf::from("/x/__pycache__/.hidden.cpython-312.pyc")
        );
    }

    #[test]
    fn optimize_levels_parse() {
        assert_eq!(parse_optimize_levels("all").expect("all"), vec![0, 1, 2]);
        assert_eq!(parse_optimize_levels("2,1,2").expect("list"), vec![1, 2]);
        assert!(parse_optimize_levels("3").is_err());
        assert!(parse_optimize_levels("").is_err());
    }

    #[test]
    fn suffix_classification() {
        assert!(is_source(Path::new("a/b.py")));
        assert!(!is_source(Path::new("a/b.pyi")));
        assert!(is_cache(Path::new("a/__pycache__/b.cpython-312.pyc")));
        assert!(is_cache(Path::new("a/b.pyo")));
    }
}
