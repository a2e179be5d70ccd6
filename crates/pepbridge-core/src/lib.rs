#![deny(clippy::all)]

mod build;
pub mod config;
mod destination;
mod error;
pub mod fs;
mod install;
mod platform;
pub mod pyc;
pub mod record;
mod scheme;
pub mod scripts;
mod sysroot;
mod verify;
pub mod wheel;

pub use crate::build::{
    build_wheel, get_backend, install_from_source, load_build_system, select_backend,
    BackendFactory, BackendRegistry, BackendSpec, BuildBackend, BuildRequest, BuildSettings,
    BuildSystem,
};
pub use crate::config::{Config, EnvSnapshot};
pub use crate::destination::{Destination, WritePolicy, WriteStats};
pub use crate::error::{Error, IoContext, Result};
pub use crate::install::{install_wheel, InstallRequest, InstallSummary};
pub use crate::platform::{BytecodeCompiler, CompileJob, PlatformInfo, SourceHasher};
pub use crate::scheme::{Scheme, SchemeKey, SchemeResolver};
pub use crate::sysroot::SysrootOverlay;
pub use crate::verify::{Mismatch, Report, Verifier};
