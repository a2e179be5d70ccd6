//! Wheel `RECORD` files: parsing, hashing and rendering.

use std::io::{self, Write};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub path: String,
    pub hash: Option<String>,
    pub size: Option<u64>,
}

impl RecordEntry {
    #[must_use]
    pub fn new(path: impl Into<String>, hash: String, size: u64) -> Self {
        Self {
            path: path.into(),
            hash: Some(hash),
            size: Some(size),
        }
    }

    #[must_use]
    pub fn unhashed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: None,
            size: None,
        }
    }

    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{}",
            quote(&self.path),
            self.hash.as_deref().unwrap_or_default(),
            self.size.map(|size| size.to_string()).unwrap_or_default()
        )
    }
}

/// `sha256=<urlsafe base64, unpadded>` for `bytes`.
#[must_use]
pub fn record_hash(bytes: &[u8]) -> String {
    format_digest(&Sha256::digest(bytes))
}

fn format_digest(digest: &[u8]) -> String {
    format!("sha256={}", URL_SAFE_NO_PAD.encode(digest))
}

/// Parses RECORD content.
///
/// # Errors
/// Returns a description of the first malformed line.
pub fn parse_record(contents: &str) -> Result<Vec<RecordEntry>, String> {
    let mut entries = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(line).map_err(|reason| format!("line {}: {reason}", index + 1))?;
        let [path, hash, size] = fields.as_slice() else {
            return Err(format!(
                "line {}: expected 3 fields, found {}",
                index + 1,
                fields.len()
            ));
        };
        let size = if size.is_empty() {
            None
        } else {
            Some(
                size.parse::<u64>()
                    .map_err(|_| format!("line {}: invalid size '{size}'", index + 1))?,
            )
        };
        entries.push(RecordEntry {
            path: path.clone(),
            hash: (!hash.is_empty()).then(|| hash.clone()),
            size,
        });
    }
    Ok(entries)
}

fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' if quoted => quoted = false,
            '"' if current.is_empty() => quoted = true,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    if quoted {
        return Err("unterminated quote".to_string());
    }
    fields.push(current);
    Ok(fields)
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Tees everything written through it into a sha256 digest.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Returns the wrapped writer, the RECORD hash and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        let hash = format_digest(&self.hasher.finalize());
        (self.inner, hash, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_known_digest() {
        assert_eq!(
            record_hash(b""),
            "sha256=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU"
        );
    }

    #[test]
    fn parses_quoted_paths_and_blank_fields() {
        let record = "foo/a.py,sha256=abc,12\n\"odd,name.txt\",,\nfoo-0.dist-info/RECORD,,\n";
        let entries = parse_record(record).expect("valid");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], RecordEntry::new("foo/a.py", "sha256=abc".into(), 12));
        assert_eq!(entries[1], RecordEntry::unhashed("odd,name.txt"));
        assert_eq!(entries[2].to_line(), "foo-0.dist-info/RECORD,,");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_record("only,two").is_err());
        assert!(parse_record("a,sha256=x,notanumber").is_err());
        assert!(parse_record("\"open,,").is_err());
    }

    #[test]
    fn quoting_round_trips() {
        let entry = RecordEntry::new("we\"ird,path", "sha256=x".into(), 1);
        let parsed = parse_record(&entry.to_line()).expect("valid");
        assert_eq!(parsed, vec![entry]);
    }

    #[test]
    fn hashing_writer_counts_and_hashes() -> io::Result<()> {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"hello ")?;
        writer.write_all(b"world")?;
        let (bytes, hash, size) = writer.finish();
        assert_eq!(bytes, b"hello world");
        assert_eq!(size, 11);
        assert_eq!(hash, record_hash(b"hello world"));
        Ok(())
    }
}
