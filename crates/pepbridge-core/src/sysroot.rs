//! Cross-compilation support: locating the target's sysconfig data.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{Error, IoContext, Result};
use crate::fs::{is_missing, with_destdir};
use crate::platform::PlatformInfo;
use crate::scheme::SchemeResolver;

const SYSCONFIGDATA_PREFIX: &str = "_sysconfigdata_";

/// A target root whose `_sysconfigdata_*.py` replaces the build
/// interpreter's configuration variables while a backend runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SysrootOverlay {
    pub sysroot: PathBuf,
    pub sysconfigdata: PathBuf,
}

impl SysrootOverlay {
    /// Finds the single sysconfig data module below the sysroot's stdlib.
    ///
    /// # Errors
    /// Returns a configuration error on Windows, when the stdlib path is not
    /// absolute, or when zero or several candidate files exist.
    pub fn discover(sysroot: &Path, platform: &PlatformInfo, prefix: Option<&Path>) -> Result<Self> {
        if cfg!(windows) {
            return Err(Error::config("--sysroot is not supported on Windows"));
        }
        let stdlib = SchemeResolver::new(platform).stdlib(prefix)?;
        let directory = with_destdir(sysroot, &stdlib);
        info!("Searching for sysconfig in {}", directory.display());

        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) if is_missing(&err) => {
                return Err(Error::config(format!(
                    "should have found one _sysconfigdata file in {}, the directory does not exist",
                    directory.display()
                )))
            }
            Err(err) => {
                return Err(err)
                    .io_context(|| format!("failed to list {}", directory.display()))
            }
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("failed to list {}", directory.display()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SYSCONFIGDATA_PREFIX) && name.ends_with(".py") {
                found.push(entry.path());
            }
        }
        found.sort();
        let [sysconfigdata] = <[PathBuf; 1]>::try_from(found).map_err(|found| {
            Error::config(format!(
                "should have found one _sysconfigdata file, found {found:?}"
            ))
        })?;
        info!("Using sysconfig from {}", sysconfigdata.display());
        Ok(Self {
            sysroot: sysroot.to_path_buf(),
            sysconfigdata,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::platform::sample_platform;

    #[test]
    fn finds_the_single_data_module() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let stdlib = temp.path().join("usr/lib/python3.12");
        fs::create_dir_all(&stdlib)?;
        let data = stdlib.join("_sysconfigdata__linux_aarch64-linux-gnu.py");
        fs::write(&data, "build_time_vars = {}\n")?;
        fs::write(stdlib.join("os.py"), "")?;

        let overlay = SysrootOverlay::discover(temp.path(), &sample_platform(), None)?;
        assert_eq!(overlay.sysconfigdata, data);
        assert_eq!(overlay.sysroot, temp.path());
        Ok(())
    }

    #[test]
    fn honours_the_prefix() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let stdlib = temp.path().join("opt/py/lib/python3.12");
        fs::create_dir_all(&stdlib)?;
        fs::write(stdlib.join("_sysconfigdata_x.py"), "")?;
        let overlay =
            SysrootOverlay::discover(temp.path(), &sample_platform(), Some(Path::new("/opt/py")))?;
        assert!(overlay.sysconfigdata.starts_with(&stdlib));
        Ok(())
    }

    #[test]
    fn ambiguous_or_missing_data_is_rejected() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let platform = sample_platform();
        let missing = SysrootOverlay::discover(temp.path(), &platform, None).unwrap_err();
        assert!(matches!(missing, Error::Configuration(_)));

        let stdlib = temp.path().join("usr/lib/python3.12");
        fs::create_dir_all(&stdlib)?;
        let empty = SysrootOverlay::discover(temp.path(), &platform, None).unwrap_err();
        assert!(empty.to_string().contains("found []"), "{empty}");

        fs::write(stdlib.join("_sysconfigdata_a.py"), "")?;
        fs::write(stdlib.join("_sysconfigdata_b.py"), "")?;
        let many = SysrootOverlay::discover(temp.path(), &platform, None).unwrap_err();
        assert!(matches!(many, Error::Configuration(_)));
        Ok(())
    }
}
