use std::path::PathBuf;

use pepbridge_core::{BytecodeCompiler, CompileJob, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::probe::{probe_python, utf8};

const COMPILE_SCRIPT: &str = r#"import json, py_compile, sys
request = json.load(sys.stdin)
compiled = 0
for source, display in request["jobs"]:
    for level in request["levels"]:
        py_compile.compile(source, dfile=display, optimize=level, doraise=True)
        compiled += 1
print(json.dumps({"compiled": compiled}))
"#;

#[derive(Serialize)]
struct CompileRequest<'a> {
    jobs: Vec<(&'a str, &'a str)>,
    levels: &'a [u8],
}

#[derive(Deserialize)]
struct CompileResult {
    compiled: usize,
}

/// Byte-compiles installed sources with `py_compile` in one interpreter run.
#[derive(Debug, Clone)]
pub struct PythonCompiler {
    python: PathBuf,
}

impl PythonCompiler {
    #[must_use]
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl BytecodeCompiler for PythonCompiler {
    fn compile(&self, jobs: &[CompileJob], levels: &[u8]) -> Result<()> {
        if jobs.is_empty() || levels.is_empty() {
            return Ok(());
        }
        let jobs = jobs
            .iter()
            .map(|job| Ok((utf8(&job.source)?, utf8(&job.display)?)))
            .collect::<Result<Vec<_>>>()?;
        let request = CompileRequest { jobs, levels };
        let input = serde_json::to_vec(&request)
            .map_err(|err| Error::Platform(format!("failed to encode compile request: {err}")))?;
        let result: CompileResult =
            probe_python(&self.python, COMPILE_SCRIPT, Some(&input), "bytecode compile")?;
        debug!(compiled = result.compiled, "byte-compiled sources");
        Ok(())
    }
}
