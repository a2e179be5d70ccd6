//! Post-install check of compiled module caches.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};
use crate::fs::{strip_destdir, with_destdir};
use crate::platform::{PlatformInfo, SourceHasher};
use crate::pyc::{cache_from_source, is_cache, is_source, Invalidation, PycHeader, ALL_OPT_LEVELS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mismatch {
    Hash,
    Timestamp,
    Size,
}

impl Mismatch {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mismatch::Hash => "hash",
            Mismatch::Timestamp => "timestamp",
            Mismatch::Size => "size",
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Findings keyed by staged paths; `(cache, source)` pairs unless noted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub missing: BTreeSet<(PathBuf, PathBuf)>,
    pub invalid: BTreeSet<(PathBuf, PathBuf)>,
    pub mismatched: BTreeSet<(PathBuf, PathBuf, Mismatch)>,
    /// Caches with no source at a standard optimization level.
    pub stray: BTreeSet<PathBuf>,
}

impl Report {
    #[must_use]
    pub fn len(&self) -> usize {
        self.missing.len() + self.invalid.len() + self.mismatched.len() + self.stray.len()
    }

    /// No findings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `kind:path[:path[:tag]]` lines with installed paths.
    #[must_use]
    pub fn lines(&self, destdir: &Path) -> Vec<String> {
        let show = |path: &Path| strip_destdir(destdir, path).display().to_string();
        let mut lines = Vec::with_capacity(self.len());
        for (cache, source) in &self.missing {
            lines.push(format!("missing:{}:{}", show(cache), show(source)));
        }
        for (cache, source) in &self.invalid {
            lines.push(format!("invalid:{}:{}", show(cache), show(source)));
        }
        for (cache, source, kind) in &self.mismatched {
            lines.push(format!("mismatched:{}:{}:{kind}", show(cache), show(source)));
        }
        for cache in &self.stray {
            lines.push(format!("stray:{}", show(cache)));
        }
        lines
    }
}

pub struct Verifier<'a> {
    platform: &'a PlatformInfo,
    hasher: &'a dyn SourceHasher,
}

struct HashCheck {
    cache: PathBuf,
    source: PathBuf,
    expected: [u8; 8],
}

impl<'a> Verifier<'a> {
    #[must_use]
    pub fn new(platform: &'a PlatformInfo, hasher: &'a dyn SourceHasher) -> Self {
        Self { platform, hasher }
    }

    /// Checks the caches of every source below the staged `site_dirs`.
    ///
    /// # Errors
    /// Integrity problems go into the report; only I/O failures, a missing
    /// cache tag or a failing source hasher are errors.
    pub fn verify(&self, destdir: &Path, site_dirs: &[&Path]) -> Result<Report> {
        let cache_tag = self.platform.cache_tag()?;
        let mut report = Report::default();
        let mut hash_checks = Vec::new();

        for site in site_dirs {
            let top = with_destdir(destdir, site);
            if !top.is_dir() {
                debug!(path = %top.display(), "site directory absent, skipping");
                continue;
            }
            let (sources, mut caches) = scan(&top)?;
            for source in &sources {
                let meta = fs::metadata(source)
                    .io_context(|| format!("failed to stat {}", source.display()))?;
                for level in ALL_OPT_LEVELS {
                    let cache = cache_from_source(source, cache_tag, level);
                    if !caches.remove(&cache) {
                        report.missing.insert((cache, source.clone()));
                        continue;
                    }
                    let file = File::open(&cache)
                        .io_context(|| format!("failed to open {}", cache.display()))?;
                    let header = PycHeader::read_from(file, self.platform.magic)
                        .io_context(|| format!("failed to read {}", cache.display()))?;
                    let Ok(header) = header else {
                        report.invalid.insert((cache, source.clone()));
                        continue;
                    };
                    match header.invalidation {
                        Invalidation::Hash { hash, .. } => hash_checks.push(HashCheck {
                            cache,
                            source: source.clone(),
                            expected: hash,
                        }),
                        Invalidation::Timestamp { mtime, size } => {
                            if mtime_seconds(meta.modified().ok()) != i64::from(mtime) {
                                report.mismatched.insert((
                                    cache.clone(),
                                    source.clone(),
                                    Mismatch::Timestamp,
                                ));
                            }
                            if meta.len() != u64::from(size) {
                                report.mismatched.insert((cache, source.clone(), Mismatch::Size));
                            }
                        }
                    }
                }
            }
            report.stray.extend(caches);
        }

        if !hash_checks.is_empty() {
            let sources: Vec<PathBuf> = hash_checks
                .iter()
                .map(|check| check.source.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let hashes = self.hasher.hash_sources(&sources)?;
            for check in hash_checks {
                let actual = hashes.get(&check.source).ok_or_else(|| {
                    Error::Platform(format!("no source hash for {}", check.source.display()))
                })?;
                if *actual != check.expected {
                    report
                        .mismatched
                        .insert((check.cache, check.source, Mismatch::Hash));
                }
            }
        }
        Ok(report)
    }
}

fn scan(top: &Path) -> Result<(BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
    let mut sources = BTreeSet::new();
    let mut caches = BTreeSet::new();
    for entry in WalkDir::new(top) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(top).to_path_buf();
            Error::Io {
                context: format!("failed to walk {}", path.display()),
                source: err.into(),
            }
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.into_path();
        if is_source(&path) {
            sources.insert(path);
        } else if is_cache(&path) {
            caches.insert(path);
        }
    }
    Ok((sources, caches))
}

/// Whole seconds since the epoch, truncated toward zero.
fn mtime_seconds(modified: Option<SystemTime>) -> i64 {
    let Some(modified) = modified else {
        return i64::MIN;
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    }
}
