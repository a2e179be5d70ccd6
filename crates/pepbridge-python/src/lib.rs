//! Interpreter-backed implementations of the `pepbridge-core` seams.
//!
//! Every operation here runs a short Python program in a child process and
//! exchanges JSON with it, so the calling process never imports backend or
//! build code.

mod backend;
mod compile;
mod probe;

pub use crate::backend::{PythonBackend, PythonBackendFactory};
pub use crate::compile::PythonCompiler;
pub use crate::probe::{detect_interpreter, probe_platform, PythonSourceHasher};

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;

    pub(crate) fn find_python() -> Option<PathBuf> {
        let candidates = [
            std::env::var("PYTHON").ok(),
            Some("python3".to_string()),
            Some("python".to_string()),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(|candidate| which::which(candidate).ok())
    }
}
