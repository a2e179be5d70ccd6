use std::path::{Path, PathBuf};

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};
use pepbridge_core::config::{DEFAULT_FALLBACK_BACKEND, DEFAULT_PREFIX, DEFAULT_PYPROJECT};
use pepbridge_core::pyc::parse_optimize_levels;

#[derive(Parser, Debug)]
#[command(
    name = "pepbridge",
    author,
    version,
    about = "Build Python wheels through PEP 517 backends and install them into a staging root",
    disable_help_subcommand = true
)]
pub struct PepbridgeCli {
    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Only report warnings and errors"
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging (-vv reaches trace)"
    )]
    pub verbose: u8,
    #[arg(
        long,
        global = true,
        value_parser = value_parser!(PathBuf),
        help = "Interpreter to probe and to run backends with (default: PEPBRIDGE_PYTHON, then python3 on PATH)"
    )]
    pub python: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(about = "Print build-backend from pyproject.toml")]
    GetBackend(GetBackendArgs),
    #[command(about = "Build a wheel from sources")]
    BuildWheel(BuildWheelArgs),
    #[command(about = "Install the specified wheel")]
    InstallWheel(InstallWheelArgs),
    #[command(about = "Build and install a wheel from sources without keeping the wheel")]
    InstallFromSource(InstallFromSourceArgs),
    #[command(
        about = "Verify that all installed modules were byte-compiled and no stray caches exist"
    )]
    VerifyPyc(VerifyPycArgs),
}

#[derive(Args, Debug)]
pub struct GetBackendArgs {
    #[arg(long, default_value_t = 1, help = "FD to use for output")]
    pub output_fd: i32,
    #[arg(long, default_value = DEFAULT_PYPROJECT, help = "Path to pyproject.toml file")]
    pub pyproject_toml: PathBuf,
}

#[derive(Args, Debug)]
pub struct BuildWheelArgs {
    #[arg(long, help = "FD to output the wheel name to")]
    pub output_fd: i32,
    #[arg(long, help = "Directory to write the wheel into")]
    pub wheel_dir: PathBuf,
    #[arg(long, help = "Prefix used to locate the sysroot's stdlib")]
    pub prefix: Option<PathBuf>,
    #[command(flatten)]
    pub build: BuildOptions,
}

#[derive(Args, Debug)]
pub struct InstallWheelArgs {
    #[command(flatten)]
    pub target: InstallTarget,
    #[command(flatten)]
    pub install: InstallOptions,
    #[arg(value_name = "WHEEL", help = "Wheel to install")]
    pub wheel: PathBuf,
}

#[derive(Args, Debug)]
pub struct InstallFromSourceArgs {
    #[command(flatten)]
    pub target: InstallTarget,
    #[command(flatten)]
    pub build: BuildOptions,
    #[command(flatten)]
    pub install: InstallOptions,
}

#[derive(Args, Debug)]
pub struct VerifyPycArgs {
    #[command(flatten)]
    pub target: InstallTarget,
}

#[derive(Args, Debug)]
pub struct InstallTarget {
    #[arg(
        long,
        help = "Staging directory for the install (prepended to all paths)"
    )]
    pub destdir: PathBuf,
    #[arg(long, help = "Prefix to install to [default: /usr]")]
    pub prefix: Option<PathBuf>,
}

impl InstallTarget {
    /// The install prefix, `/usr` unless given.
    pub fn prefix(&self) -> &Path {
        self.prefix
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_PREFIX))
    }
}

#[derive(Args, Debug)]
pub struct BuildOptions {
    #[arg(
        long,
        help = "Backend to use (defaults to reading from pyproject.toml)"
    )]
    pub backend: Option<String>,
    #[arg(
        long,
        default_value = DEFAULT_FALLBACK_BACKEND,
        conflicts_with = "no_fallback_backend",
        help = "Backend to use if pyproject.toml does not exist or does not specify one"
    )]
    pub fallback_backend: String,
    #[arg(
        long,
        help = "Require a backend declaration in pyproject.toml"
    )]
    pub no_fallback_backend: bool,
    #[arg(
        long,
        default_value = DEFAULT_PYPROJECT,
        help = "Path to pyproject.toml (used only if --backend is not specified)"
    )]
    pub pyproject_toml: PathBuf,
    #[arg(long, help = "Allow the backend to write compressed zip members")]
    pub allow_compressed: bool,
    #[arg(
        long,
        value_name = "JSON",
        help = "JSON-encoded dictionary of config_settings to pass to the backend"
    )]
    pub config_json: Option<String>,
    #[arg(
        long,
        help = "Use the sysconfig data of this sysroot (experimental cross-compilation support)"
    )]
    pub sysroot: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InstallOptions {
    #[arg(
        long,
        help = "Interpreter to put in script shebangs (default: the probed interpreter)"
    )]
    pub interpreter: Option<PathBuf>,
    #[arg(
        long,
        value_name = "LEVELS",
        value_parser = parse_levels,
        help = "Comma-separated optimization levels to compile bytecode for, or 'all' (default: none)"
    )]
    pub optimize: Option<OptimizeLevels>,
    #[arg(long, help = "Replace files that already exist in the destination")]
    pub overwrite: bool,
    #[arg(
        long,
        help = "Symlink higher optimization level caches to identical lower level ones"
    )]
    pub symlink_pyc: bool,
    #[arg(
        long,
        value_name = "PATH",
        help = "Symlink files identical to those below this site directory (absolute, or relative to the installed one)"
    )]
    pub symlink_to: Option<PathBuf>,
}

/// Sorted, de-duplicated `--optimize` levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeLevels(pub Vec<u8>);

fn parse_levels(value: &str) -> Result<OptimizeLevels, String> {
    parse_optimize_levels(value)
        .map(OptimizeLevels)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        PepbridgeCli::command().debug_assert();
    }

    #[test]
    fn optimize_accepts_lists_and_all() {
        let cli = PepbridgeCli::try_parse_from([
            "pepbridge",
            "install-wheel",
            "--destdir",
            "/tmp/image",
            "--optimize",
            "2,0,2",
            "demo.whl",
        ])
        .expect("parse");
        let CommandGroupCli::InstallWheel(args) = cli.command else {
            panic!("expected install-wheel");
        };
        assert_eq!(args.install.optimize, Some(OptimizeLevels(vec![0, 2])));
        assert_eq!(args.target.prefix, None);
        assert_eq!(args.target.prefix(), Path::new("/usr"));

        let cli = PepbridgeCli::try_parse_from([
            "pepbridge",
            "install-wheel",
            "--destdir",
            "/tmp/image",
            "--optimize",
            "all",
            "demo.whl",
        ])
        .expect("parse");
        let CommandGroupCli::InstallWheel(args) = cli.command else {
            panic!("expected install-wheel");
        };
        assert_eq!(args.install.optimize, Some(OptimizeLevels(vec![0, 1, 2])));
    }

    #[test]
    fn rejects_unknown_optimization_level() {
        let err = PepbridgeCli::try_parse_from([
            "pepbridge",
            "install-wheel",
            "--destdir",
            "/tmp/image",
            "--optimize",
            "3",
            "demo.whl",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn fallback_flags_conflict() {
        let err = PepbridgeCli::try_parse_from([
            "pepbridge",
            "build-wheel",
            "--output-fd",
            "1",
            "--wheel-dir",
            "dist",
            "--fallback-backend",
            "flit_core.buildapi",
            "--no-fallback-backend",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
