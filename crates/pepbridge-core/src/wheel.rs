//! Reading wheel archives.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{Error, IoContext, Result};
use crate::record::{parse_record, record_hash, RecordEntry};
use crate::scheme::SchemeKey;
use crate::scripts::{parse_entry_points, EntryPoint};

const RECORD_FILES: [&str; 3] = ["RECORD", "RECORD.jws", "RECORD.p7s"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub distribution: String,
    pub version: String,
    pub build: Option<String>,
    pub python: String,
    pub abi: String,
    pub platform: String,
}

impl WheelFilename {
    #[must_use]
    pub fn parse(filename: &str) -> Option<Self> {
        let stem = filename.strip_suffix(".whl")?;
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return None;
        }
        let (build, tags) = match parts.len() {
            5 => (None, &parts[2..]),
            6 => (Some(parts[2].to_string()), &parts[3..]),
            _ => return None,
        };
        Some(Self {
            distribution: parts[0].to_string(),
            version: parts[1].to_string(),
            build,
            python: tags[0].to_string(),
            abi: tags[1].to_string(),
            platform: tags[2].to_string(),
        })
    }
}

/// One file from the archive, already checked against RECORD.
#[derive(Debug)]
pub struct WheelEntry {
    pub scheme: SchemeKey,
    pub path: String,
    pub contents: Vec<u8>,
    pub executable: bool,
}

pub struct WheelSource {
    path: PathBuf,
    archive: ZipArchive<File>,
    filename: WheelFilename,
    dist_info: String,
    data_dir: String,
    root_scheme: SchemeKey,
    records: HashMap<String, RecordEntry>,
}

impl WheelSource {
    /// Opens a wheel and reads its `WHEEL` and `RECORD` metadata.
    ///
    /// # Errors
    /// Returns [`Error::InvalidWheel`] for malformed names or metadata and
    /// I/O or zip errors for unreadable archives.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::invalid_wheel(path, "file name is not valid UTF-8"))?;
        let filename = WheelFilename::parse(name)
            .ok_or_else(|| Error::invalid_wheel(path, "not a valid wheel file name"))?;
        let file = File::open(path).io_context(|| format!("failed to open {}", path.display()))?;
        let mut archive = ZipArchive::new(file)?;

        let dist_info = find_dist_info(&archive, &filename.distribution)
            .map_err(|reason| Error::invalid_wheel(path, reason))?;
        let wheel_meta = read_member(&mut archive, &format!("{dist_info}/WHEEL"))?
            .ok_or_else(|| Error::invalid_wheel(path, format!("{dist_info}/WHEEL is missing")))?;
        let root_scheme = match metadata_value(&wheel_meta, "Root-Is-Purelib")
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("true") => SchemeKey::Purelib,
            Some("false") => SchemeKey::Platlib,
            _ => {
                return Err(Error::invalid_wheel(
                    path,
                    "WHEEL does not declare Root-Is-Purelib",
                ))
            }
        };
        let record = read_member(&mut archive, &format!("{dist_info}/RECORD"))?
            .ok_or_else(|| Error::invalid_wheel(path, format!("{dist_info}/RECORD is missing")))?;
        let records = parse_record(&record)
            .map_err(|reason| Error::invalid_wheel(path, format!("RECORD: {reason}")))?
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect();
        let data_dir = format!(
            "{}.data",
            dist_info.strip_suffix(".dist-info").unwrap_or(&dist_info)
        );

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            filename,
            dist_info,
            data_dir,
            root_scheme,
            records,
        })
    }

    #[must_use]
    pub fn distribution(&self) -> &str {
        &self.filename.distribution
    }

    #[must_use]
    pub fn dist_info_dir(&self) -> &str {
        &self.dist_info
    }

    /// `purelib` or `platlib`, per `Root-Is-Purelib`.
    #[must_use]
    pub fn root_scheme(&self) -> SchemeKey {
        self.root_scheme
    }

    /// Number of archive members, for use with [`WheelSource::entry`].
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    /// Console and GUI scripts declared by the distribution.
    ///
    /// # Errors
    /// Returns an error when `entry_points.txt` cannot be read.
    pub fn entry_points(&mut self) -> Result<Vec<EntryPoint>> {
        let name = format!("{}/entry_points.txt", self.dist_info);
        Ok(read_member(&mut self.archive, &name)?
            .map(|contents| parse_entry_points(&contents))
            .unwrap_or_default())
    }

    /// Reads the archive member at `index`.
    ///
    /// Directories and the RECORD files are skipped (`None`).
    ///
    /// # Errors
    /// Returns [`Error::InvalidWheel`] when the member escapes the archive,
    /// is absent from RECORD, fails its RECORD hash, or targets an unknown
    /// scheme.
    pub fn entry(&mut self, index: usize) -> Result<Option<WheelEntry>> {
        let (name, contents, executable) = {
            let mut member = self.archive.by_index(index)?;
            if member.is_dir() {
                return Ok(None);
            }
            let name = member.name().to_string();
            let contained = member.enclosed_name().is_some()
                && Path::new(&name)
                    .components()
                    .all(|part| matches!(part, Component::Normal(_) | Component::CurDir));
            if !contained {
                return Err(Error::invalid_wheel(
                    &self.path,
                    format!("{name} escapes the archive root"),
                ));
            }
            let executable = member.unix_mode().is_some_and(|mode| mode & 0o111 != 0);
            let mut contents = Vec::new();
            member
                .read_to_end(&mut contents)
                .io_context(|| format!("failed to read {name} from {}", self.path.display()))?;
            (name, contents, executable)
        };
        if self.is_record_file(&name) {
            return Ok(None);
        }
        self.check_record(&name, &contents)?;

        let (scheme, path) = match name.strip_prefix(&format!("{}/", self.data_dir)) {
            Some(rest) => {
                let (scheme_name, path) = rest.split_once('/').ok_or_else(|| {
                    Error::invalid_wheel(&self.path, format!("{name} is not inside a scheme directory"))
                })?;
                let scheme = SchemeKey::from_name(scheme_name).ok_or_else(|| {
                    Error::invalid_wheel(&self.path, format!("{name} uses unknown scheme '{scheme_name}'"))
                })?;
                (scheme, path.to_string())
            }
            None => (self.root_scheme, name.clone()),
        };
        Ok(Some(WheelEntry {
            scheme,
            path,
            contents,
            executable,
        }))
    }

    fn is_record_file(&self, name: &str) -> bool {
        name.strip_prefix(&self.dist_info)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|file| RECORD_FILES.contains(&file))
    }

    fn check_record(&self, name: &str, contents: &[u8]) -> Result<()> {
        let record = self.records.get(name).ok_or_else(|| {
            Error::invalid_wheel(&self.path, format!("{name} is not listed in RECORD"))
        })?;
        let Some(expected) = record.hash.as_deref() else {
            return Ok(());
        };
        if !expected.starts_with("sha256=") {
            return Err(Error::invalid_wheel(
                &self.path,
                format!("{name} uses an unsupported RECORD hash '{expected}'"),
            ));
        }
        if record_hash(contents) != expected {
            return Err(Error::invalid_wheel(
                &self.path,
                format!("{name} does not match its RECORD hash"),
            ));
        }
        if record.size.is_some_and(|size| size != contents.len() as u64) {
            return Err(Error::invalid_wheel(
                &self.path,
                format!("{name} does not match its RECORD size"),
            ));
        }
        Ok(())
    }
}

fn find_dist_info(archive: &ZipArchive<File>, distribution: &str) -> Result<String, String> {
    let wanted = canonical_name(distribution);
    let candidates: BTreeSet<&str> = archive
        .file_names()
        .filter_map(|name| name.split_once('/').map(|(top, _)| top))
        .filter(|top| top.ends_with(".dist-info"))
        .filter(|top| canonical_name(top.split('-').next().unwrap_or_default()) == wanted)
        .collect();
    let mut candidates = candidates.into_iter();
    match (candidates.next(), candidates.next()) {
        (Some(only), None) => Ok(only.to_string()),
        (None, _) => Err(format!("no .dist-info directory for {distribution}")),
        (Some(_), Some(_)) => Err(format!(
            "multiple .dist-info directories for {distribution}"
        )),
    }
}

fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut separator = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | '.') {
            separator = true;
            continue;
        }
        if separator && !out.is_empty() {
            out.push('_');
        }
        separator = false;
        out.push(ch.to_ascii_lowercase());
    }
    out
}

fn metadata_value<'a>(contents: &'a str, key: &str) -> Option<&'a str> {
    contents.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case(key).then(|| value.trim())
    })
}

fn read_member(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<String>> {
    let mut member = match archive.by_name(name) {
        Ok(member) => member,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut contents = String::new();
    member
        .read_to_string(&mut contents)
        .io_context(|| format!("failed to read {name}"))?;
    Ok(Some(contents))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;

    use zip::write::FileOptions;
    use zip::ZipWriter;

    use super::*;

    /// Builds a wheel with a matching RECORD; `(name, contents, mode)`.
    pub(crate) fn build_wheel(
        dir: &Path,
        filename: &str,
        purelib: bool,
        files: &[(&str, &[u8], u32)],
    ) -> PathBuf {
        let parsed = WheelFilename::parse(filename).expect("wheel name");
        let dist_info = format!("{}-{}.dist-info", parsed.distribution, parsed.version);
        let path = dir.join(filename);
        let mut writer = ZipWriter::new(File::create(&path).expect("create wheel"));
        let mut record = String::new();
        let wheel_meta = format!(
            "Wheel-Version: 1.0\nGenerator: tests\nRoot-Is-Purelib: {purelib}\nTag: py3-none-any\n"
        );
        let mut all: Vec<(String, Vec<u8>, u32)> = files
            .iter()
            .map(|(name, contents, mode)| ((*name).to_string(), contents.to_vec(), *mode))
            .collect();
        all.push((format!("{dist_info}/WHEEL"), wheel_meta.into_bytes(), 0o644));
        all.push((format!("{dist_info}/METADATA"), b"Name: x\n".to_vec(), 0o644));
        for (name, contents, mode) in &all {
            writer
                .start_file(name.as_str(), FileOptions::default().unix_permissions(*mode))
                .expect("start file");
            writer.write_all(contents).expect("write file");
            record.push_str(
                &RecordEntry::new(name.as_str(), record_hash(contents), contents.len() as u64)
                    .to_line(),
            );
            record.push('\n');
        }
        record.push_str(&format!("{dist_info}/RECORD,,\n"));
        writer
            .start_file(format!("{dist_info}/RECORD"), FileOptions::default())
            .expect("start record");
        writer.write_all(record.as_bytes()).expect("write record");
        writer.finish().expect("finish wheel");
        path
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    use super::testing::build_wheel;
    use super::*;

    #[test]
    fn parses_wheel_filenames() {
        let name = WheelFilename::parse("test-1-py3-none-any.whl").expect("valid");
        assert_eq!(name.distribution, "test");
        assert_eq!(name.version, "1");
        assert_eq!(name.build, None);
        let built = WheelFilename::parse("foo_bar-2.0-1-cp312-cp312-linux_x86_64.whl").expect("valid");
        assert_eq!(built.build.as_deref(), Some("1"));
        assert_eq!(built.platform, "linux_x86_64");
        assert!(WheelFilename::parse("foo-1.0.tar.gz").is_none());
        assert!(WheelFilename::parse("foo-1.0-py3.whl").is_none());
    }

    #[test]
    fn maps_entries_to_schemes() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let wheel = build_wheel(
            temp.path(),
            "test-1-py3-none-any.whl",
            true,
            &[
                ("testpkg/__init__.py", b"\"\"\"A test package\"\"\"\n", 0o644),
                ("test-1.data/scripts/oldscript", b"#!python\nprint(1)\n", 0o755),
                ("test-1.data/headers/test.h", b"#define TEST_HEADER 1\n", 0o644),
            ],
        );
        let mut source = WheelSource::open(&wheel)?;
        assert_eq!(source.distribution(), "test");
        assert_eq!(source.dist_info_dir(), "test-1.dist-info");
        assert_eq!(source.root_scheme(), SchemeKey::Purelib);

        let mut seen = Vec::new();
        for index in 0..source.entry_count() {
            if let Some(entry) = source.entry(index)? {
                seen.push((entry.scheme, entry.path, entry.executable));
            }
        }
        assert!(seen.contains(&(SchemeKey::Purelib, "testpkg/__init__.py".into(), false)));
        assert!(seen.contains(&(SchemeKey::Scripts, "oldscript".into(), true)));
        assert!(seen.contains(&(SchemeKey::Headers, "test.h".into(), false)));
        assert!(seen.contains(&(SchemeKey::Purelib, "test-1.dist-info/WHEEL".into(), false)));
        assert!(!seen.iter().any(|(_, path, _)| path.ends_with("RECORD")));
        Ok(())
    }

    #[test]
    fn platlib_root_and_unknown_scheme() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let wheel = build_wheel(
            temp.path(),
            "ext-1-cp312-cp312-linux_x86_64.whl",
            false,
            &[("ext-1.data/nowhere/file", b"x", 0o644)],
        );
        let mut source = WheelSource::open(&wheel)?;
        assert_eq!(source.root_scheme(), SchemeKey::Platlib);
        let mut errors = 0;
        for index in 0..source.entry_count() {
            if let Err(err) = source.entry(index) {
                assert!(err.to_string().contains("unknown scheme 'nowhere'"));
                errors += 1;
            }
        }
        assert_eq!(errors, 1);
        Ok(())
    }

    #[test]
    fn tampered_entry_fails_record_check() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("bad-1-py3-none-any.whl");
        let mut writer = ZipWriter::new(File::create(&path)?);
        writer.start_file("bad-1.dist-info/WHEEL", FileOptions::default())?;
        writer.write_all(b"Root-Is-Purelib: true\n")?;
        writer.start_file("bad/__init__.py", FileOptions::default())?;
        writer.write_all(b"tampered")?;
        writer.start_file("bad/extra.py", FileOptions::default())?;
        writer.write_all(b"")?;
        writer.start_file("bad-1.dist-info/RECORD", FileOptions::default())?;
        writer.write_all(
            format!(
                "bad/__init__.py,{},8\nbad-1.dist-info/WHEEL,,\nbad-1.dist-info/RECORD,,\n",
                record_hash(b"original")
            )
            .as_bytes(),
        )?;
        writer.finish()?;

        let mut source = WheelSource::open(&path)?;
        let mut messages = Vec::new();
        for index in 0..source.entry_count() {
            if let Err(err) = source.entry(index) {
                messages.push(err.to_string());
            }
        }
        assert_eq!(messages.len(), 2, "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("does not match its RECORD hash")));
        assert!(messages.iter().any(|m| m.contains("not listed in RECORD")));
        Ok(())
    }

    #[test]
    fn missing_metadata_is_invalid() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("nometa-1-py3-none-any.whl");
        let mut writer = ZipWriter::new(File::create(&path)?);
        writer.start_file("nometa/__init__.py", FileOptions::default())?;
        writer.finish()?;
        let err = WheelSource::open(&path).err().expect("invalid");
        assert!(matches!(err, Error::InvalidWheel { .. }));
        Ok(())
    }

    #[test]
    fn canonical_names_ignore_separators_and_case() {
        assert_eq!(canonical_name("Foo.Bar-baz"), canonical_name("foo_bar__baz"));
    }
}
