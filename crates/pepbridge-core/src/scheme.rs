//! Installation scheme resolution.
//!
//! The interpreter reports its default scheme as unexpanded `sysconfig`
//! templates; they are expanded here for an arbitrary prefix.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use path_clean::PathClean;

use crate::error::{Error, Result};
use crate::platform::PlatformInfo;

const PREFIX_VARS: [&str; 4] = ["base", "platbase", "installed_base", "installed_platbase"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemeKey {
    Purelib,
    Platlib,
    Scripts,
    Headers,
    Data,
}

impl SchemeKey {
    pub const ALL: [SchemeKey; 5] = [
        SchemeKey::Purelib,
        SchemeKey::Platlib,
        SchemeKey::Scripts,
        SchemeKey::Headers,
        SchemeKey::Data,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SchemeKey::Purelib => "purelib",
            SchemeKey::Platlib => "platlib",
            SchemeKey::Scripts => "scripts",
            SchemeKey::Headers => "headers",
            SchemeKey::Data => "data",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }

    /// Library locations, the only ones that hold importable modules.
    #[must_use]
    pub fn is_site(self) -> bool {
        matches!(self, SchemeKey::Purelib | SchemeKey::Platlib)
    }
}

impl fmt::Display for SchemeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absolute target directories for one prefix and distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    paths: BTreeMap<SchemeKey, PathBuf>,
}

impl Scheme {
    #[must_use]
    pub fn path(&self, key: SchemeKey) -> &Path {
        &self.paths[&key]
    }

    /// The distinct `purelib`/`platlib` directories.
    #[must_use]
    pub fn site_dirs(&self) -> Vec<&Path> {
        let mut dirs = vec![self.path(SchemeKey::Purelib)];
        let platlib = self.path(SchemeKey::Platlib);
        if !dirs.contains(&platlib) {
            dirs.push(platlib);
        }
        dirs
    }
}

pub struct SchemeResolver<'a> {
    platform: &'a PlatformInfo,
}

impl<'a> SchemeResolver<'a> {
    #[must_use]
    pub fn new(platform: &'a PlatformInfo) -> Self {
        Self { platform }
    }

    /// Resolves every scheme location below `prefix`.
    ///
    /// `headers` is the interpreter's include directory for the prefix with
    /// the distribution name appended.
    ///
    /// # Errors
    /// Returns a configuration error when a template cannot be expanded or
    /// expands to a relative path.
    pub fn resolve(&self, prefix: &Path, dist_name: &str) -> Result<Scheme> {
        let vars = self.vars_for(Some(prefix), &PREFIX_VARS)?;
        let mut paths = BTreeMap::new();
        for key in [
            SchemeKey::Purelib,
            SchemeKey::Platlib,
            SchemeKey::Scripts,
            SchemeKey::Data,
        ] {
            let path = self.expand(key.as_str(), &vars)?;
            paths.insert(key, path);
        }
        let include = self.expand("include", &vars)?;
        let headers = if dist_name.is_empty() {
            include
        } else {
            include.join(dist_name)
        };
        paths.insert(SchemeKey::Headers, headers);
        Ok(Scheme { paths })
    }

    /// The standard library directory, relocated to `prefix` when given.
    ///
    /// # Errors
    /// Returns a configuration error when the expanded path is not absolute.
    pub fn stdlib(&self, prefix: Option<&Path>) -> Result<PathBuf> {
        let vars = self.vars_for(prefix, &["installed_base"])?;
        self.expand("stdlib", &vars)
    }

    fn vars_for(
        &self,
        prefix: Option<&Path>,
        overridden: &[&str],
    ) -> Result<BTreeMap<String, String>> {
        let mut vars = self.platform.config_vars.clone();
        if let Some(prefix) = prefix {
            let prefix = prefix.to_str().ok_or_else(|| {
                Error::config(format!("prefix {} is not valid UTF-8", prefix.display()))
            })?;
            for name in overridden {
                vars.insert((*name).to_string(), prefix.to_string());
            }
        }
        Ok(vars)
    }

    fn expand(&self, name: &str, vars: &BTreeMap<String, String>) -> Result<PathBuf> {
        let template = self.platform.template(name)?;
        let expanded = PathBuf::from(expand_template(template, vars)?).clean();
        if !expanded.is_absolute() {
            return Err(Error::config(format!(
                "{name} path {} is not absolute",
                expanded.display()
            )));
        }
        Ok(expanded)
    }
}

/// Expands `{name}` placeholders, falling back to the process environment.
pub(crate) fn expand_template(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::config(format!(
                                "unterminated placeholder in path template '{template}'"
                            )))
                        }
                    }
                }
                let value = match vars.get(&name) {
                    Some(value) => value.clone(),
                    None => env::var(&name).map_err(|_| {
                        Error::config(format!(
                            "path template '{template}' references unknown variable '{name}'"
                        ))
                    })?,
                };
                out.push_str(&value);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}
