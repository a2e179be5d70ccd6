use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::destination::{Destination, WritePolicy};
use crate::error::Result;
use crate::platform::{BytecodeCompiler, PlatformInfo};
use crate::scheme::{SchemeKey, SchemeResolver};
use crate::scripts::fix_shebang;
use crate::wheel::WheelSource;

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub destdir: PathBuf,
    pub prefix: PathBuf,
    /// Interpreter written into script shebangs.
    pub interpreter: String,
    /// Sorted, de-duplicated optimization levels.
    pub optimize: Vec<u8>,
    pub policy: WritePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    pub distribution: String,
    pub files: usize,
    pub symlinked: usize,
    pub compiled: usize,
}

/// Installs `wheel` below `request.destdir`.
///
/// # Errors
/// Fails on invalid wheels, write conflicts the policy does not allow, an
/// unusable symlink configuration, compiler failures and I/O errors. Files
/// written before the failure are left in place.
pub fn install_wheel(
    wheel: &Path,
    request: &InstallRequest,
    platform: &PlatformInfo,
    compiler: &dyn BytecodeCompiler,
) -> Result<InstallSummary> {
    let mut source = WheelSource::open(wheel)?;
    let scheme = SchemeResolver::new(platform).resolve(&request.prefix, source.distribution())?;
    let cache_tag = if request.policy.symlink_pyc && !request.optimize.is_empty() {
        Some(platform.cache_tag()?)
    } else {
        None
    };
    let mut destination = Destination::new(
        scheme,
        &request.destdir,
        source.root_scheme(),
        request.policy.clone(),
    )?
    .with_bytecode(compiler, &request.optimize, cache_tag);

    info!(
        "Installing {} into {}",
        wheel.display(),
        request.destdir.display()
    );
    for index in 0..source.entry_count() {
        let Some(entry) = source.entry(index)? else {
            continue;
        };
        let contents = if entry.scheme == SchemeKey::Scripts {
            fix_shebang(&entry.contents, &request.interpreter).unwrap_or(entry.contents)
        } else {
            entry.contents
        };
        destination.write_file(entry.scheme, &entry.path, &contents, entry.executable)?;
    }
    for entry_point in source.entry_points()? {
        debug!(script = %entry_point.name, "generating launcher");
        destination.write_script(&entry_point.name, &entry_point.launcher(&request.interpreter))?;
    }

    let stats = destination.finish(source.dist_info_dir())?;
    info!("Installation complete");
    Ok(InstallSummary {
        distribution: source.distribution().to_string(),
        files: stats.files,
        symlinked: stats.symlinked + stats.pyc_symlinked,
        compiled: stats.compiled,
    })
}
