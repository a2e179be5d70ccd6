use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use pepbridge_core::{
    BackendFactory, BackendSpec, BuildBackend, BuildSettings, Error, IoContext, Result,
    SysrootOverlay,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::probe::utf8;

const BACKEND_HOST: &str = include_str!("backend_host.py");

#[derive(Serialize)]
struct HostRequest<'a> {
    module: &'a str,
    object: &'a [String],
    backend_path: Vec<&'a str>,
    wheel_dir: &'a str,
    config_settings: Option<&'a Map<String, Value>>,
    allow_compressed: bool,
    sysroot: Option<&'a SysrootOverlay>,
}

#[derive(Deserialize)]
struct HostResult {
    wheel: String,
}

/// Creates backends that run inside a child interpreter.
#[derive(Debug, Clone)]
pub struct PythonBackendFactory {
    python: PathBuf,
}

impl PythonBackendFactory {
    #[must_use]
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl BackendFactory for PythonBackendFactory {
    fn create(&self, spec: &BackendSpec) -> Result<Box<dyn BuildBackend>> {
        Ok(Box::new(PythonBackend {
            python: self.python.clone(),
            spec: spec.clone(),
        }))
    }
}

/// A PEP 517 backend imported by a fresh interpreter for each build.
///
/// The child inherits the working directory and both output streams, so
/// backend chatter lands where the user expects it. Import side effects,
/// zip patching and the sysconfig overlay stay confined to the child.
#[derive(Debug, Clone)]
pub struct PythonBackend {
    python: PathBuf,
    spec: BackendSpec,
}

impl BuildBackend for PythonBackend {
    fn build_wheel(&self, wheel_dir: &Path, settings: &BuildSettings) -> Result<String> {
        let backend_path = self
            .spec
            .backend_path
            .iter()
            .map(|path| utf8(path))
            .collect::<Result<Vec<_>>>()?;
        let request = HostRequest {
            module: &self.spec.module,
            object: &self.spec.object,
            backend_path,
            wheel_dir: utf8(wheel_dir)?,
            config_settings: settings.config_settings.as_ref(),
            allow_compressed: settings.allow_compressed,
            sysroot: settings.sysroot.as_ref(),
        };

        let scratch = tempfile::Builder::new()
            .prefix("pepbridge-host-")
            .tempdir()
            .io_context(|| "failed to create backend scratch directory".to_string())?;
        let request_path = scratch.path().join("request.json");
        let result_path = scratch.path().join("result.json");
        let encoded = serde_json::to_vec(&request)
            .map_err(|err| self.failure(format!("failed to encode request: {err}")))?;
        fs::write(&request_path, encoded)
            .io_context(|| format!("failed to write {}", request_path.display()))?;

        debug!(python = %self.python.display(), backend = %self.spec.reference, "starting backend host");
        let status = Command::new(&self.python)
            .arg("-c")
            .arg(BACKEND_HOST)
            .arg(&request_path)
            .arg(&result_path)
            .status()
            .map_err(|err| {
                self.failure(format!("failed to run {}: {err}", self.python.display()))
            })?;
        if !status.success() {
            return Err(self.failure(format!("backend host exited with {status}")));
        }

        let raw = fs::read(&result_path)
            .map_err(|err| self.failure(format!("backend host reported no result: {err}")))?;
        let result: HostResult = serde_json::from_slice(&raw)
            .map_err(|err| self.failure(format!("invalid backend host result: {err}")))?;
        Ok(result.wheel)
    }
}

impl PythonBackend {
    fn failure(&self, reason: String) -> Error {
        Error::backend(self.spec.reference.clone(), reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::find_python;

    const TOY_BACKEND: &str = r#"import os, zipfile

class Api:
    def build_wheel(self, wheel_directory, config_settings=None):
        name = "toy-1.0-py3-none-any.whl"
        label = (config_settings or {}).get("label", "none")
        with zipfile.ZipFile(os.path.join(wheel_directory, name), "w", zipfile.ZIP_DEFLATED) as archive:
            archive.writestr("toy/__init__.py", ("label = %r\n" % label) * 64)
        return name

api = Api()
"#;

    fn spec(dir: &Path, reference: &str) -> anyhow::Result<BackendSpec> {
        Ok(BackendSpec::parse(reference, vec![dir.to_path_buf()])?)
    }

    #[test]
    fn builds_through_nested_object_with_stored_members() -> anyhow::Result<()> {
        let Some(python) = find_python() else {
            eprintln!("skipping backend host test (python not found)");
            return Ok(());
        };
        let temp = tempfile::tempdir()?;
        let backend_dir = temp.path().join("backend");
        fs::create_dir_all(&backend_dir)?;
        fs::write(backend_dir.join("toy_backend.py"), TOY_BACKEND)?;
        let wheel_dir = temp.path().join("dist");

        let backend = PythonBackendFactory::new(python)
            .create(&spec(&backend_dir, "toy_backend:api")?)?;
        let settings = BuildSettings {
            config_settings: Some(BuildSettings::parse_config_json(r#"{"label": "x"}"#)?),
            ..BuildSettings::default()
        };
        let wheel = backend.build_wheel(&wheel_dir, &settings)?;
        assert_eq!(wheel, "toy-1.0-py3-none-any.whl");

        let file = fs::File::open(wheel_dir.join(&wheel))?;
        let mut archive = zip::ZipArchive::new(file)?;
        let member = archive.by_name("toy/__init__.py")?;
        assert_eq!(member.compression(), zip::CompressionMethod::Stored);
        Ok(())
    }

    #[test]
    fn import_failure_is_a_backend_error() -> anyhow::Result<()> {
        let Some(python) = find_python() else {
            eprintln!("skipping backend host test (python not found)");
            return Ok(());
        };
        let temp = tempfile::tempdir()?;
        let backend = PythonBackendFactory::new(python)
            .create(&spec(temp.path(), "pepbridge_no_such_backend")?)?;
        let err = backend
            .build_wheel(&temp.path().join("dist"), &BuildSettings::default())
            .unwrap_err();
        assert!(matches!(err, Error::Backend { .. }), "{err}");
        Ok(())
    }
}
