use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_PREFIX: &str = "/usr";
pub const DEFAULT_FALLBACK_BACKEND: &str = "setuptools.build_meta:__legacy__";
pub const DEFAULT_PYPROJECT: &str = "pyproject.toml";

const PYTHON_VAR: &str = "PEPBRIDGE_PYTHON";
const LOG_VAR: &str = "PEPBRIDGE_LOG";

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.var(key).map(str::trim).filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Process-wide settings read from the environment once at startup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    python: Option<PathBuf>,
    log_filter: Option<String>,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    #[must_use]
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        Self {
            python: snapshot.non_empty(PYTHON_VAR).map(PathBuf::from),
            log_filter: snapshot.non_empty(LOG_VAR).map(ToOwned::to_owned),
        }
    }

    /// Interpreter requested through `PEPBRIDGE_PYTHON`, if any.
    #[must_use]
    pub fn python(&self) -> Option<&Path> {
        self.python.as_deref()
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.log_filter.as_deref()
    }

    #[must_use]
    pub fn with_python(mut self, python: Option<PathBuf>) -> Self {
        if python.is_some() {
            self.python = python;
        }
        self
    }
}
