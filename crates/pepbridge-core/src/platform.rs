//! Facts about the target interpreter that the installer and verifier need.
//!
//! Everything here is plain data captured once per run; see
//! `pepbridge_python::probe_platform` for the interpreter-backed source.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub implementation: String,
    pub version: (u8, u8),
    pub os_name: String,
    #[serde(with = "magic_hex")]
    pub magic: [u8; 4],
    pub cache_tag: Option<String>,
    pub path_templates: BTreeMap<String, String>,
    pub config_vars: BTreeMap<String, String>,
}

impl PlatformInfo {
    /// Cache tag used in `__pycache__` file names, e.g. `cpython-312`.
    ///
    /// # Errors
    /// Returns a configuration error for interpreters that do not write
    /// bytecode caches.
    pub fn cache_tag(&self) -> Result<&str> {
        self.cache_tag.as_deref().ok_or_else(|| {
            Error::config(format!(
                "{} {}.{} does not support bytecode caches (cache_tag is None)",
                self.implementation, self.version.0, self.version.1
            ))
        })
    }

    pub(crate) fn template(&self, name: &str) -> Result<&str> {
        self.path_templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::config(format!("install scheme has no '{name}' path")))
    }
}

/// Computes the interpreter's source hash for hash-based bytecode caches.
pub trait SourceHasher {
    /// Hashes every path in one batch.
    ///
    /// # Errors
    /// Returns an error when a source cannot be read or the hash provider
    /// fails.
    fn hash_sources(&self, sources: &[PathBuf]) -> Result<BTreeMap<PathBuf, [u8; 8]>>;
}

/// One installed source to byte-compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileJob {
    /// Staged location of the source, read and written next to.
    pub source: PathBuf,
    /// Installed location embedded in the bytecode.
    pub display: PathBuf,
}

/// Writes `__pycache__` entries for installed sources.
pub trait BytecodeCompiler {
    /// Compiles every job at every level in `levels`.
    ///
    /// # Errors
    /// Returns an error when the compiler cannot be run or rejects a source.
    fn compile(&self, jobs: &[CompileJob], levels: &[u8]) -> Result<()>;
}

mod magic_hex {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(magic: &[u8; 4], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(magic))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 4], D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(raw.trim()).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| D::Error::custom(format!("magic must be 4 bytes, got {}", bytes.len())))
    }
}

#[cfg(test)]
pub(crate) fn sample_platform() -> PlatformInfo {
    let templates = [
        ("purelib", "{base}/lib/python{py_version_short}/site-packages"),
        (
            "platlib",
            "{platbase}/{platlibdir}/python{py_version_short}/site-packages",
        ),
        (
            "include",
            "{installed_base}/include/python{py_version_short}{abiflags}",
        ),
        ("scripts", "{base}/bin"),
        ("data", "{base}"),
        (
            "stdlib",
            "{installed_base}/{platlibdir}/python{py_version_short}",
        ),
    ];
    let vars = [
        ("py_version_short", "3.12"),
        ("platlibdir", "lib"),
        ("abiflags", ""),
        ("base", "/usr"),
        ("platbase", "/usr"),
        ("installed_base", "/usr"),
        ("installed_platbase", "/usr"),
    ];
    PlatformInfo {
        implementation: "cpython".to_string(),
        version: (3, 12),
        os_name: "posix".to_string(),
        magic: [0xcb, 0x0d, 0x0d, 0x0a],
        cache_tag: Some("cpython-312".to_string()),
        path_templates: templates
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        config_vars: vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    }
}
