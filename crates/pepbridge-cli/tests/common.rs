#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use pepbridge_core::record::{record_hash, RecordEntry};
use zip::write::FileOptions;
use zip::ZipWriter;

pub fn find_python() -> Option<String> {
    let candidates = [
        std::env::var("PYTHON").ok(),
        Some("python3".to_string()),
        Some("python".to_string()),
    ];
    for candidate in candidates.into_iter().flatten() {
        let status = std::process::Command::new(&candidate)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        if matches!(status, Ok(code) if code.success()) {
            return Some(candidate);
        }
    }
    None
}

/// Whether the interpreter's default scheme shares one site directory, which
/// `--symlink-to` requires.
pub fn single_site_dir(python: &str) -> bool {
    let output = std::process::Command::new(python)
        .args([
            "-c",
            "import sysconfig; print(sysconfig.get_path('purelib') == sysconfig.get_path('platlib'))",
        ])
        .output();
    matches!(output, Ok(out) if out.status.success() && out.stdout.starts_with(b"True"))
}

pub fn stdout_of(assert: &Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

pub fn stderr_of(assert: &Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stderr).into_owned()
}

/// Writes `demo-1.0-py3-none-any.whl` with a module, a `#!python` script
/// and a console entry point.
pub fn demo_wheel(dir: &Path) -> PathBuf {
    write_wheel(
        dir,
        "demo",
        &[
            ("demo/__init__.py", b"def main():\n    return 0\n".as_slice(), 0o644),
            ("demo/util.py", b"VALUE = 1\n".as_slice(), 0o644),
            (
                "demo-1.0.data/scripts/demo-sh",
                b"#!python\nprint('hi')\n".as_slice(),
                0o755,
            ),
            (
                "demo-1.0.dist-info/entry_points.txt",
                b"[console_scripts]\ndemo = demo:main\n".as_slice(),
                0o644,
            ),
        ],
    )
}

pub fn write_wheel(dir: &Path, name: &str, files: &[(&str, &[u8], u32)]) -> PathBuf {
    let dist_info = format!("{name}-1.0.dist-info");
    let path = dir.join(format!("{name}-1.0-py3-none-any.whl"));
    let mut writer = ZipWriter::new(File::create(&path).expect("create wheel"));
    let mut entries: Vec<(String, Vec<u8>, u32)> = files
        .iter()
        .map(|(name, contents, mode)| ((*name).to_string(), contents.to_vec(), *mode))
        .collect();
    entries.push((
        format!("{dist_info}/WHEEL"),
        b"Wheel-Version: 1.0\nGenerator: tests\nRoot-Is-Purelib: true\nTag: py3-none-any\n"
            .to_vec(),
        0o644,
    ));
    entries.push((
        format!("{dist_info}/METADATA"),
        format!("Metadata-Version: 2.1\nName: {name}\nVersion: 1.0\n").into_bytes(),
        0o644,
    ));

    let mut record = String::new();
    for (entry, contents, mode) in &entries {
        writer
            .start_file(entry.as_str(), FileOptions::default().unix_permissions(*mode))
            .expect("start entry");
        writer.write_all(contents).expect("write entry");
        let line = RecordEntry::new(entry.as_str(), record_hash(contents), contents.len() as u64);
        record.push_str(&line.to_line());
        record.push('\n');
    }
    record.push_str(&format!("{dist_info}/RECORD,,\n"));
    writer
        .start_file(format!("{dist_info}/RECORD"), FileOptions::default())
        .expect("start RECORD");
    writer.write_all(record.as_bytes()).expect("write RECORD");
    writer.finish().expect("finish wheel");
    path
}

/// First file below `root` whose path ends with `suffix`.
pub fn find_file(root: &Path, suffix: &str) -> Option<PathBuf> {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).ok()? {
            let path = entry.ok()?.path();
            if path.is_dir() && !path.is_symlink() {
                pending.push(path);
            } else if path.to_string_lossy().ends_with(suffix) {
                return Some(path);
            }
        }
    }
    None
}
