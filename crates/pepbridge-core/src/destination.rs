//! Writes wheel entries into a staged install tree.
//!
//! The writer owns three policies: replacing files that already exist,
//! replacing library files with symlinks into an identical reference tree,
//! and linking identical bytecode caches across optimization levels.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use pathdiff::diff_paths;
use tracing::debug;

use crate::error::{Error, IoContext, Result};
use crate::fs::{files_identical, is_missing, parent_hops, with_destdir};
use crate::platform::{BytecodeCompiler, CompileJob};
use crate::pyc::{cache_from_source, is_source};
use crate::record::{HashingWriter, RecordEntry};
use crate::scheme::{Scheme, SchemeKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritePolicy {
    /// Replace files that already exist instead of failing.
    pub overwrite: bool,
    /// Reference tree: relative to the staged `purelib` directory, or an
    /// absolute install path reinterpreted under the staging root.
    pub symlink_to: Option<PathBuf>,
    /// Link identical caches of adjacent optimization levels.
    pub symlink_pyc: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub files: usize,
    pub symlinked: usize,
    pub compiled: usize,
    pub pyc_symlinked: usize,
}

struct Bytecode<'a> {
    compiler: &'a dyn BytecodeCompiler,
    levels: Vec<u8>,
    cache_tag: Option<String>,
}

pub struct Destination<'a> {
    scheme: Scheme,
    destdir: PathBuf,
    root: SchemeKey,
    policy: WritePolicy,
    reference: Option<PathBuf>,
    bytecode: Option<Bytecode<'a>>,
    sources: Vec<CompileJob>,
    records: Vec<RecordEntry>,
    linked: usize,
}

impl<'a> Destination<'a> {
    /// Validates `policy` against `scheme` before anything is written.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when symlinks are requested on a
    /// platform without them, when `purelib` and `platlib` differ, or when the
    /// reference tree is the tree being installed.
    pub fn new(
        scheme: Scheme,
        destdir: &Path,
        root: SchemeKey,
        policy: WritePolicy,
    ) -> Result<Self> {
        let destdir = std::path::absolute(destdir)
            .io_context(|| format!("failed to resolve {}", destdir.display()))?;
        let destdir = destdir.clean();
        if !cfg!(unix) && (policy.symlink_to.is_some() || policy.symlink_pyc) {
            return Err(Error::config(
                "--symlink-to and --symlink-pyc are not supported on this platform",
            ));
        }
        let reference = match &policy.symlink_to {
            None => None,
            Some(target) => Some(reference_root(&scheme, &destdir, target)?),
        };
        Ok(Self {
            scheme,
            destdir,
            root,
            policy,
            reference,
            bytecode: None,
            sources: Vec::new(),
            records: Vec::new(),
            linked: 0,
        })
    }

    /// Compiles written library sources at `levels` when finishing.
    #[must_use]
    pub fn with_bytecode(
        mut self,
        compiler: &'a dyn BytecodeCompiler,
        levels: &[u8],
        cache_tag: Option<&str>,
    ) -> Self {
        self.bytecode = Some(Bytecode {
            compiler,
            levels: levels.to_vec(),
            cache_tag: cache_tag.map(str::to_string),
        });
        self
    }

    /// Writes one file below the `scheme` directory.
    ///
    /// # Errors
    /// Returns [`Error::FileExists`] on a conflict the policy does not allow,
    /// [`Error::ReferenceMissing`] when the reference tree is gone, and I/O
    /// errors otherwise.
    pub fn write_file(
        &mut self,
        scheme: SchemeKey,
        path: &str,
        contents: &[u8],
        executable: bool,
    ) -> Result<()> {
        let installed = self.scheme.path(scheme).join(path);
        let target = with_destdir(&self.destdir, &installed);
        let (hash, size) = self.write_new(&target, contents, executable)?;

        if scheme.is_site() {
            if let Some(reference) = self.reference.clone() {
                if self.link_duplicate(&target, Path::new(path), &reference)? {
                    self.linked += 1;
                }
            }
            if is_source(&target) {
                self.sources.push(CompileJob {
                    source: target,
                    display: installed.clone(),
                });
            }
        }

        let record_path = self.record_path(&installed);
        self.records.push(RecordEntry::new(record_path, hash, size));
        Ok(())
    }

    /// Writes an executable into `scripts`.
    ///
    /// # Errors
    /// Same as [`Destination::write_file`].
    pub fn write_script(&mut self, name: &str, contents: &[u8]) -> Result<()> {
        self.write_file(SchemeKey::Scripts, name, contents, true)
    }

    /// Writes RECORD into `dist_info` and compiles the written sources.
    ///
    /// # Errors
    /// Returns an error when RECORD cannot be written, compilation fails or
    /// cache linking is requested without a cache tag.
    pub fn finish(self, dist_info: &str) -> Result<WriteStats> {
        let record_path = format!("{dist_info}/RECORD");
        let mut body = String::new();
        for entry in &self.records {
            body.push_str(&entry.to_line());
            body.push('\n');
        }
        body.push_str(&RecordEntry::unhashed(record_path.as_str()).to_line());
        body.push('\n');
        let target = with_destdir(
            &self.destdir,
            &self.scheme.path(self.root).join(&record_path),
        );
        self.write_new(&target, body.as_bytes(), false)?;

        let mut stats = WriteStats {
            files: self.records.len(),
            symlinked: self.linked,
            ..WriteStats::default()
        };
        let Some(bytecode) = &self.bytecode else {
            return Ok(stats);
        };
        if bytecode.levels.is_empty() || self.sources.is_empty() {
            return Ok(stats);
        }
        debug!(
            sources = self.sources.len(),
            levels = ?bytecode.levels,
            "compiling bytecode"
        );
        bytecode.compiler.compile(&self.sources, &bytecode.levels)?;
        stats.compiled = self.sources.len();
        if self.policy.symlink_pyc {
            let tag = bytecode.cache_tag.as_deref().ok_or_else(|| {
                Error::config("--symlink-pyc requires an interpreter with a cache tag")
            })?;
            for job in &self.sources {
                stats.pyc_symlinked += link_cache_levels(&job.source, tag, &bytecode.levels)?;
            }
        }
        Ok(stats)
    }

    fn write_new(&self, target: &Path, contents: &[u8], executable: bool) -> Result<(String, u64)> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = match create_exclusive(target) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if !self.policy.overwrite {
                    return Err(Error::FileExists {
                        path: target.to_path_buf(),
                    });
                }
                debug!(path = %target.display(), "replacing existing file");
                fs::remove_file(target)
                    .io_context(|| format!("failed to remove {}", target.display()))?;
                create_exclusive(target).map_err(|err| {
                    if err.kind() == io::ErrorKind::AlreadyExists {
                        Error::FileExists {
                            path: target.to_path_buf(),
                        }
                    } else {
                        io_error(target, err)
                    }
                })?
            }
            Err(err) => return Err(io_error(target, err)),
        };
        let mut writer = HashingWriter::new(file);
        writer
            .write_all(contents)
            .io_context(|| format!("failed to write {}", target.display()))?;
        let (file, hash, size) = writer.finish();
        if executable {
            mark_executable(&file)
                .io_context(|| format!("failed to set mode of {}", target.display()))?;
        }
        Ok((hash, size))
    }

    /// Replaces `target` with a link when the reference tree holds the same
    /// bytes at `relative`.
    fn link_duplicate(&self, target: &Path, relative: &Path, reference: &Path) -> Result<bool> {
        let mut candidate = reference.join(relative).clean();
        let mut followed = false;
        let mut visited = HashSet::new();
        loop {
            match fs::symlink_metadata(&candidate) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    if !visited.insert(candidate.clone()) {
                        return Err(Error::config(format!(
                            "symlink chain at {} loops",
                            candidate.display()
                        )));
                    }
                    let text = fs::read_link(&candidate)
                        .io_context(|| format!("failed to read link {}", candidate.display()))?;
                    let parent = candidate.parent().unwrap_or_else(|| Path::new("/"));
                    candidate = parent.join(text).clean();
                    followed = true;
                }
                Ok(meta) => {
                    if !meta.is_file() || candidate == target {
                        return Ok(false);
                    }
                    break;
                }
                Err(err) if is_missing(&err) => {
                    if let Err(err) = fs::metadata(reference) {
                        if is_missing(&err) {
                            return Err(Error::ReferenceMissing {
                                path: reference.to_path_buf(),
                            });
                        }
                        return Err(io_error(reference, err));
                    }
                    debug!(path = %target.display(), "no reference copy, keeping file");
                    return Ok(false);
                }
                Err(err) => return Err(io_error(&candidate, err)),
            }
        }

        let same = files_identical(target, &candidate).io_context(|| {
            format!(
                "failed to compare {} with {}",
                target.display(),
                candidate.display()
            )
        })?;
        if !same {
            debug!(path = %target.display(), "reference copy differs, keeping file");
            return Ok(false);
        }

        let directory = target.parent().unwrap_or_else(|| Path::new("/"));
        let text = match &self.policy.symlink_to {
            Some(symlink_to) if !followed && symlink_to.is_relative() => {
                parent_hops(relative).join(symlink_to).join(relative)
            }
            _ => diff_paths(&candidate, directory).unwrap_or_else(|| candidate.clone()),
        };
        fs::remove_file(target).io_context(|| format!("failed to remove {}", target.display()))?;
        make_symlink(&text, target)
            .io_context(|| format!("failed to link {}", target.display()))?;
        debug!(path = %target.display(), link = %text.display(), "linked to reference copy");
        Ok(true)
    }

    fn record_path(&self, installed: &Path) -> String {
        diff_paths(installed, self.scheme.path(self.root))
            .unwrap_or_else(|| installed.to_path_buf())
            .to_string_lossy()
            .into_owned()
    }
}

fn reference_root(scheme: &Scheme, destdir: &Path, symlink_to: &Path) -> Result<PathBuf> {
    if scheme.path(SchemeKey::Purelib) != scheme.path(SchemeKey::Platlib) {
        return Err(Error::config(
            "--symlink-to requires purelib and platlib to be the same directory",
        ));
    }
    let purelib = with_destdir(destdir, scheme.path(SchemeKey::Purelib));
    let reference = if symlink_to.is_absolute() {
        with_destdir(destdir, symlink_to).clean()
    } else {
        purelib.join(symlink_to).clean()
    };
    if reference == purelib {
        return Err(Error::config(format!(
            "--symlink-to {} points at the tree being installed",
            symlink_to.display()
        )));
    }
    Ok(reference)
}

/// Links each cache to the earliest preceding level with identical bytes.
fn link_cache_levels(source: &Path, cache_tag: &str, levels: &[u8]) -> Result<usize> {
    let mut linked = 0;
    let mut previous: Option<PathBuf> = None;
    for &level in levels {
        let cache = cache_from_source(source, cache_tag, level);
        if let Some(earlier) = &previous {
            let same = files_identical(&cache, earlier)
                .io_context(|| format!("failed to compare {}", cache.display()))?;
            if same {
                let name = earlier.file_name().map(PathBuf::from).unwrap_or_default();
                fs::remove_file(&cache)
                    .io_context(|| format!("failed to remove {}", cache.display()))?;
                make_symlink(&name, &cache)
                    .io_context(|| format!("failed to link {}", cache.display()))?;
                debug!(cache = %cache.display(), "linked to {}", name.display());
                linked += 1;
                continue;
            }
        }
        previous = Some(cache);
    }
    Ok(linked)
}

fn create_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn io_error(path: &Path, source: io::Error) -> Error {
    Error::Io {
        context: format!("failed to write {}", path.display()),
        source,
    }
}

#[cfg(unix)]
fn mark_executable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = file.metadata()?.permissions();
    let mode = permissions.mode();
    permissions.set_mode(mode | ((mode & 0o444) >> 2));
    file.set_permissions(permissions)
}

#[cfg(not(unix))]
fn mark_executable(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(text: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(text, at)
}

#[cfg(not(unix))]
fn make_symlink(_text: &Path, _at: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}
