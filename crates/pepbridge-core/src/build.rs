//! PEP 517 build orchestration.
//!
//! Backends are resolved through a [`BackendRegistry`]; nothing here imports
//! or runs Python code itself.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use toml_edit::{DocumentMut, Item};
use tracing::info;

use crate::error::{Error, IoContext, Result};
use crate::install::{install_wheel, InstallRequest, InstallSummary};
use crate::platform::{BytecodeCompiler, PlatformInfo};
use crate::sysroot::SysrootOverlay;

/// The `[build-system]` table of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSystem {
    pub backend: Option<String>,
    pub backend_path: Vec<PathBuf>,
}

/// Reads `[build-system]` from `pyproject`; a missing file is an empty table.
///
/// # Errors
/// Returns a configuration error for unparsable TOML or mistyped keys.
pub fn load_build_system(pyproject: &Path) -> Result<BuildSystem> {
    let contents = match fs::read_to_string(pyproject) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BuildSystem::default()),
        Err(err) => {
            return Err(Error::Io {
                context: format!("failed to read {}", pyproject.display()),
                source: err,
            })
        }
    };
    let doc: DocumentMut = contents
        .parse()
        .map_err(|err| Error::config(format!("failed to parse {}: {err}", pyproject.display())))?;
    let Some(table) = doc.get("build-system").and_then(Item::as_table_like) else {
        return Ok(BuildSystem::default());
    };

    let backend = match table.get("build-backend") {
        None => None,
        Some(item) => Some(
            item.as_str()
                .ok_or_else(|| Error::config("build-system.build-backend must be a string"))?
                .to_string(),
        ),
    };
    let backend_path = match table.get("backend-path") {
        None => Vec::new(),
        Some(item) => {
            if let Some(single) = item.as_str() {
                vec![PathBuf::from(single)]
            } else {
                let array = item.as_array().ok_or_else(|| {
                    Error::config("build-system.backend-path must be a list of strings")
                })?;
                array
                    .iter()
                    .map(|value| {
                        value.as_str().map(PathBuf::from).ok_or_else(|| {
                            Error::config("build-system.backend-path must be a list of strings")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        }
    };
    Ok(BuildSystem {
        backend,
        backend_path,
    })
}

/// The `build-backend` string for `get-backend`, if declared.
///
/// # Errors
/// Same as [`load_build_system`].
pub fn get_backend(pyproject: &Path) -> Result<Option<String>> {
    Ok(load_build_system(pyproject)?.backend)
}

/// Picks the backend: explicit, then declared, then the fallback.
///
/// # Errors
/// Returns a configuration error when none of them is available.
pub fn select_backend(
    explicit: Option<&str>,
    declared: Option<&str>,
    fallback: Option<&str>,
) -> Result<String> {
    explicit.or(declared).or(fallback).map(str::to_string).ok_or_else(|| {
        Error::config(
            "pyproject.toml is missing or does not specify build-backend and \
             --no-fallback-backend specified",
        )
    })
}

/// A parsed `module[:object.path]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub reference: String,
    pub module: String,
    pub object: Vec<String>,
    pub backend_path: Vec<PathBuf>,
}

impl BackendSpec {
    /// # Errors
    /// Returns a configuration error for empty module or attribute segments.
    pub fn parse(reference: &str, backend_path: Vec<PathBuf>) -> Result<Self> {
        let (module, object) = match reference.split_once(':') {
            Some((module, object)) => (module.trim(), Some(object.trim())),
            None => (reference.trim(), None),
        };
        if module.is_empty() || module.split('.').any(str::is_empty) {
            return Err(Error::config(format!(
                "invalid backend reference '{reference}': bad module name"
            )));
        }
        let object = match object {
            None => Vec::new(),
            Some(path) => {
                let parts: Vec<String> = path.split('.').map(str::to_string).collect();
                if parts.iter().any(String::is_empty) {
                    return Err(Error::config(format!(
                        "invalid backend reference '{reference}': bad object path"
                    )));
                }
                parts
            }
        };
        Ok(Self {
            reference: reference.to_string(),
            module: module.to_string(),
            object,
            backend_path,
        })
    }
}

/// Everything a backend host needs besides the output directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildSettings {
    pub config_settings: Option<Map<String, Value>>,
    pub allow_compressed: bool,
    pub sysroot: Option<SysrootOverlay>,
}

impl BuildSettings {
    /// Decodes `--config-json`, which must be a JSON object.
    ///
    /// # Errors
    /// Returns a configuration error for invalid JSON or non-objects.
    pub fn parse_config_json(raw: &str) -> Result<Map<String, Value>> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(Error::config("--config-json must be a JSON object")),
            Err(err) => Err(Error::config(format!("--config-json is not valid JSON: {err}"))),
        }
    }
}

pub trait BuildBackend {
    /// Builds a wheel into `wheel_dir` and returns its file name.
    ///
    /// # Errors
    /// Returns [`Error::Backend`] when the backend cannot be loaded or fails.
    fn build_wheel(&self, wheel_dir: &Path, settings: &BuildSettings) -> Result<String>;
}

pub trait BackendFactory {
    /// # Errors
    /// Returns [`Error::Backend`] when no backend can be created for `spec`.
    fn create(&self, spec: &BackendSpec) -> Result<Box<dyn BuildBackend>>;
}

/// Maps backend references to factories, with an optional catch-all.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, Box<dyn BackendFactory>>,
    fallback: Option<Box<dyn BackendFactory>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reference: impl Into<String>, factory: Box<dyn BackendFactory>) {
        self.factories.insert(reference.into(), factory);
    }

    #[must_use]
    pub fn with_fallback(mut self, factory: Box<dyn BackendFactory>) -> Self {
        self.fallback = Some(factory);
        self
    }

    /// # Errors
    /// Returns [`Error::Backend`] when nothing handles `spec`, or the
    /// factory's own error.
    pub fn resolve(&self, spec: &BackendSpec) -> Result<Box<dyn BuildBackend>> {
        let factory = self
            .factories
            .get(&spec.reference)
            .or(self.fallback.as_ref())
            .ok_or_else(|| Error::backend(&spec.reference, "no backend registered"))?;
        factory.create(spec)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub pyproject: PathBuf,
    pub backend: Option<String>,
    /// `None` disables the fallback.
    pub fallback_backend: Option<String>,
    pub settings: BuildSettings,
}

/// Builds a wheel into `wheel_dir` and returns its file name.
///
/// # Errors
/// Returns configuration errors for missing or malformed backend
/// declarations and [`Error::Backend`] when the backend fails or reports a
/// wheel that does not exist.
pub fn build_wheel(
    request: &BuildRequest,
    wheel_dir: &Path,
    registry: &BackendRegistry,
) -> Result<String> {
    let system = load_build_system(&request.pyproject)?;
    let reference = select_backend(
        request.backend.as_deref(),
        system.backend.as_deref(),
        request.fallback_backend.as_deref(),
    )?;
    let spec = BackendSpec::parse(&reference, system.backend_path)?;
    let backend = registry.resolve(&spec)?;

    fs::create_dir_all(wheel_dir)
        .io_context(|| format!("failed to create {}", wheel_dir.display()))?;
    info!("Building wheel via backend {reference}");
    let name = backend.build_wheel(wheel_dir, &request.settings)?;
    let wheel = wheel_dir.join(&name);
    if name.is_empty() || !wheel.is_file() {
        return Err(Error::backend(
            reference,
            format!("reported wheel '{name}' was not found in {}", wheel_dir.display()),
        ));
    }
    info!("The backend produced {}", wheel.display());
    Ok(name)
}

/// Builds into a temporary directory and installs the result.
///
/// # Errors
/// Any error from [`build_wheel`] or [`install_wheel`].
pub fn install_from_source(
    build: &BuildRequest,
    install: &InstallRequest,
    registry: &BackendRegistry,
    platform: &PlatformInfo,
    compiler: &dyn BytecodeCompiler,
) -> Result<InstallSummary> {
    let staging = tempfile::Builder::new()
        .prefix("pepbridge-build-")
        .tempdir()
        .io_context(|| "failed to create a temporary wheel directory".to_string())?;
    let name = build_wheel(build, staging.path(), registry)?;
    install_wheel(&staging.path().join(name), install, platform, compiler)
}
