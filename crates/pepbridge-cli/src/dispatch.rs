use std::path::{Path, PathBuf};

use color_eyre::Result;
use pepbridge_core::{
    build_wheel, get_backend, install_from_source, install_wheel, BackendRegistry, BuildRequest,
    BuildSettings, Config, InstallRequest, InstallSummary, PlatformInfo, SchemeResolver,
    SysrootOverlay, Verifier, WritePolicy,
};
use pepbridge_python::{
    detect_interpreter, probe_platform, PythonBackendFactory, PythonCompiler, PythonSourceHasher,
};
use tracing::debug;

use crate::cli::{
    BuildOptions, BuildWheelArgs, CommandGroupCli, GetBackendArgs, InstallFromSourceArgs,
    InstallOptions, InstallTarget, InstallWheelArgs, VerifyPycArgs,
};
use crate::output::emit_line;

/// Runs one subcommand and returns the process exit code.
pub fn dispatch_command(config: &Config, group: &CommandGroupCli) -> Result<i32> {
    match group {
        CommandGroupCli::GetBackend(args) => dispatch_get_backend(args),
        CommandGroupCli::BuildWheel(args) => dispatch_build_wheel(config, args),
        CommandGroupCli::InstallWheel(args) => dispatch_install_wheel(config, args),
        CommandGroupCli::InstallFromSource(args) => dispatch_install_from_source(config, args),
        CommandGroupCli::VerifyPyc(args) => dispatch_verify_pyc(config, args),
    }
}

fn dispatch_get_backend(args: &GetBackendArgs) -> Result<i32> {
    let backend = get_backend(&args.pyproject_toml)?;
    emit_line(args.output_fd, backend.as_deref().unwrap_or_default())?;
    Ok(0)
}

fn dispatch_build_wheel(config: &Config, args: &BuildWheelArgs) -> Result<i32> {
    let python = detect_interpreter(config.python())?;
    // Only a sysroot needs the interpreter's scheme templates.
    let sysroot = if args.build.sysroot.is_some() {
        sysroot_overlay(&args.build, args.prefix.as_deref(), &probe_platform(&python)?)?
    } else {
        None
    };
    let request = build_request(&args.build, sysroot)?;
    let registry = backend_registry(&python);
    let name = build_wheel(&request, &args.wheel_dir, &registry)?;
    emit_line(args.output_fd, &name)?;
    Ok(0)
}

fn dispatch_install_wheel(config: &Config, args: &InstallWheelArgs) -> Result<i32> {
    let python = detect_interpreter(config.python())?;
    let platform = probe_platform(&python)?;
    let request = install_request(&args.target, &args.install, &python);
    let summary = install_wheel(
        &args.wheel,
        &request,
        &platform,
        &PythonCompiler::new(&python),
    )?;
    log_summary(&summary);
    Ok(0)
}

fn dispatch_install_from_source(config: &Config, args: &InstallFromSourceArgs) -> Result<i32> {
    let python = detect_interpreter(config.python())?;
    let platform = probe_platform(&python)?;
    let sysroot = sysroot_overlay(&args.build, args.target.prefix.as_deref(), &platform)?;
    let build = build_request(&args.build, sysroot)?;
    let install = install_request(&args.target, &args.install, &python);
    let summary = install_from_source(
        &build,
        &install,
        &backend_registry(&python),
        &platform,
        &PythonCompiler::new(&python),
    )?;
    log_summary(&summary);
    Ok(0)
}

fn dispatch_verify_pyc(config: &Config, args: &VerifyPycArgs) -> Result<i32> {
    let python = detect_interpreter(config.python())?;
    let platform = probe_platform(&python)?;
    let scheme = SchemeResolver::new(&platform).resolve(args.target.prefix(), "")?;
    let hasher = PythonSourceHasher::new(&python);
    let report = Verifier::new(&platform, &hasher).verify(&args.target.destdir, &scheme.site_dirs())?;
    for line in report.lines(&args.target.destdir) {
        println!("{line}");
    }
    Ok(i32::from(!report.is_empty()))
}

fn backend_registry(python: &Path) -> BackendRegistry {
    BackendRegistry::new().with_fallback(Box::new(PythonBackendFactory::new(python)))
}

fn sysroot_overlay(
    options: &BuildOptions,
    prefix: Option<&Path>,
    platform: &PlatformInfo,
) -> Result<Option<SysrootOverlay>> {
    let overlay = options
        .sysroot
        .as_deref()
        .map(|sysroot| SysrootOverlay::discover(sysroot, platform, prefix))
        .transpose()?;
    Ok(overlay)
}

fn build_request(options: &BuildOptions, sysroot: Option<SysrootOverlay>) -> Result<BuildRequest> {
    let config_settings = options
        .config_json
        .as_deref()
        .map(BuildSettings::parse_config_json)
        .transpose()?;
    Ok(BuildRequest {
        pyproject: options.pyproject_toml.clone(),
        backend: options.backend.clone(),
        fallback_backend: fallback_backend(options),
        settings: BuildSettings {
            config_settings,
            allow_compressed: options.allow_compressed,
            sysroot,
        },
    })
}

fn fallback_backend(options: &BuildOptions) -> Option<String> {
    (!options.no_fallback_backend).then(|| options.fallback_backend.clone())
}

fn install_request(target: &InstallTarget, options: &InstallOptions, python: &Path) -> InstallRequest {
    let interpreter: PathBuf = options
        .interpreter
        .clone()
        .unwrap_or_else(|| python.to_path_buf());
    InstallRequest {
        destdir: target.destdir.clone(),
        prefix: target.prefix().to_path_buf(),
        interpreter: interpreter.to_string_lossy().into_owned(),
        optimize: options
            .optimize
            .as_ref()
            .map(|levels| levels.0.clone())
            .unwrap_or_default(),
        policy: WritePolicy {
            overwrite: options.overwrite,
            symlink_to: options.symlink_to.clone(),
            symlink_pyc: options.symlink_pyc,
        },
    }
}

fn log_summary(summary: &InstallSummary) {
    debug!(
        distribution = %summary.distribution,
        files = summary.files,
        symlinked = summary.symlinked,
        compiled = summary.compiled,
        "install summary"
    );
}
