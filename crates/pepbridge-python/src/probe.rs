use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use pepbridge_core::{Error, PlatformInfo, Result, SourceHasher};
use serde::de::DeserializeOwned;
use serde_json::from_slice;
use which::which;

const PLATFORM_SCRIPT: &str = r#"import importlib.util, json, os, sys, sysconfig
get_scheme = getattr(sysconfig, "get_default_scheme", None) or sysconfig._get_default_scheme
config_vars = {
    key: str(value)
    for key, value in sysconfig.get_config_vars().items()
    if isinstance(value, (str, int))
}
print(json.dumps({
    "implementation": sys.implementation.name,
    "version": list(sys.version_info[:2]),
    "os_name": os.name,
    "magic": importlib.util.MAGIC_NUMBER.hex(),
    "cache_tag": sys.implementation.cache_tag,
    "path_templates": sysconfig.get_paths(scheme=get_scheme(), expand=False),
    "config_vars": config_vars,
}))
"#;

const SOURCE_HASH_SCRIPT: &str = r#"import importlib.util, json, sys
hashes = {}
for path in json.load(sys.stdin):
    with open(path, "rb") as source:
        hashes[path] = importlib.util.source_hash(source.read()).hex()
print(json.dumps(hashes))
"#;

/// Finds the interpreter to probe and to run backends with.
///
/// # Errors
///
/// Returns [`Error::Platform`] when no interpreter is given and none is on
/// `PATH`.
pub fn detect_interpreter(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(explicit) = explicit {
        return Ok(explicit.to_path_buf());
    }
    for candidate in ["python3", "python"] {
        if let Ok(path) = which(candidate) {
            return Ok(path);
        }
    }
    Err(Error::Platform(
        "no python interpreter found; pass --python or set PEPBRIDGE_PYTHON".to_string(),
    ))
}

/// Captures scheme templates, bytecode magic and cache tag of `python`.
///
/// # Errors
///
/// Returns [`Error::Platform`] when the interpreter cannot be run or prints
/// an unexpected payload.
pub fn probe_platform(python: &Path) -> Result<PlatformInfo> {
    probe_python(python, PLATFORM_SCRIPT, None, "platform")
}

/// Source hashes from `importlib.util.source_hash`, one interpreter run per
/// batch.
#[derive(Debug, Clone)]
pub struct PythonSourceHasher {
    python: PathBuf,
}

impl PythonSourceHasher {
    #[must_use]
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl SourceHasher for PythonSourceHasher {
    fn hash_sources(&self, sources: &[PathBuf]) -> Result<BTreeMap<PathBuf, [u8; 8]>> {
        let names = sources
            .iter()
            .map(|path| utf8(path).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        let input = serde_json::to_vec(&names)
            .map_err(|err| Error::Platform(format!("failed to encode hash request: {err}")))?;
        let payload: BTreeMap<String, String> =
            probe_python(&self.python, SOURCE_HASH_SCRIPT, Some(&input), "source hash")?;

        let mut hashes = BTreeMap::new();
        for (path, digest) in payload {
            let bytes = hex::decode(&digest)
                .ok()
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .ok_or_else(|| {
                    Error::Platform(format!("invalid source hash '{digest}' for {path}"))
                })?;
            hashes.insert(PathBuf::from(path), bytes);
        }
        Ok(hashes)
    }
}

pub(crate) fn utf8(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Platform(format!("path {} is not valid UTF-8", path.display())))
}

pub(crate) fn probe_python<T>(
    python: &Path,
    script: &str,
    input: Option<&[u8]>,
    guide: &str,
) -> Result<T>
where
    T: DeserializeOwned,
{
    let mut child = Command::new(python)
        .arg("-c")
        .arg(script)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            Error::Platform(format!(
                "failed to run {guide} probe via {}: {err}",
                python.display()
            ))
        })?;
    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(input)
            .map_err(|err| Error::Platform(format!("failed to send {guide} request: {err}")))?;
    }
    let output = child
        .wait_with_output()
        .map_err(|err| Error::Platform(format!("{guide} probe did not finish: {err}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Platform(format!(
            "python {guide} probe failed: {}",
            stderr.trim()
        )));
    }
    from_slice(&output.stdout)
        .map_err(|err| Error::Platform(format!("invalid {guide} payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::find_python;

    #[test]
    fn explicit_interpreter_is_used_verbatim() -> anyhow::Result<()> {
        let python = detect_interpreter(Some(Path::new("/opt/python/bin/python3.12")))?;
        assert_eq!(python, PathBuf::from("/opt/python/bin/python3.12"));
        Ok(())
    }

    #[test]
    fn probes_a_real_interpreter() -> anyhow::Result<()> {
        let Some(python) = find_python() else {
            eprintln!("skipping platform probe test (python not found)");
            return Ok(());
        };
        let platform = probe_platform(&python)?;
        assert_eq!(platform.magic[2..], [0x0d, 0x0a]);
        assert!(platform.path_templates.contains_key("purelib"));
        assert!(platform.path_templates.contains_key("include"));
        Ok(())
    }

    #[test]
    fn hashes_sources_in_one_batch() -> anyhow::Result<()> {
        let Some(python) = find_python() else {
            eprintln!("skipping source hash test (python not found)");
            return Ok(());
        };
        let temp = tempfile::tempdir()?;
        let a = temp.path().join("a.py");
        let b = temp.path().join("b.py");
        std::fs::write(&a, "x = 1\n")?;
        std::fs::write(&b, "x = 1\n")?;
        let hashes = PythonSourceHasher::new(python).hash_sources(&[a.clone(), b.clone()])?;
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[&a], hashes[&b]);
        Ok(())
    }

    #[test]
    fn missing_interpreter_is_a_platform_error() {
        let err = probe_platform(Path::new("/nonexistent/python-for-pepbridge")).unwrap_err();
        assert!(matches!(err, Error::Platform(_)), "{err}");
    }
}
