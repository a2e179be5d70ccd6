use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

const COMPARE_CHUNK: usize = 64 * 1024;

/// Reinterprets an absolute install path below a staging root.
#[must_use]
pub fn with_destdir(destdir: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_)))
        .collect();
    destdir.join(relative)
}

/// Maps a staged path back to the path it will have once installed.
#[must_use]
pub fn strip_destdir(destdir: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(destdir) {
        Ok(relative) => Path::new("/").join(relative),
        Err(_) => path.to_path_buf(),
    }
}

/// `..` repeated once per directory level of `relative`'s parent.
#[must_use]
pub fn parent_hops(relative: &Path) -> PathBuf {
    let depth = relative
        .parent()
        .map_or(0, |parent| parent.components().count());
    (0..depth).map(|_| Component::ParentDir).collect()
}

/// Byte-for-byte comparison of two files, following symlinks.
///
/// # Errors
/// Returns an error when either file cannot be opened or read.
pub fn files_identical(left: &Path, right: &Path) -> io::Result<bool> {
    if fs::metadata(left)?.len() != fs::metadata(right)?.len() {
        return Ok(false);
    }
    let mut left = File::open(left)?;
    let mut right = File::open(right)?;
    let mut left_buf = vec![0_u8; COMPARE_CHUNK];
    let mut right_buf = vec![0_u8; COMPARE_CHUNK];
    loop {
        let read = read_full(&mut left, &mut left_buf)?;
        let other = read_full(&mut right, &mut right_buf)?;
        if read != other || left_buf[..read] != right_buf[..other] {
            return Ok(false);
        }
        if read == 0 {
            return Ok(true);
        }
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Whether an I/O error means "nothing at this path".
pub(crate) fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
