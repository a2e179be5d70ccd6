//! Script shebang rewriting and entry point launchers.

use std::fmt::Write as _;

use tracing::warn;

const MAX_SIMPLE_SHEBANG: usize = 127;
const PLACEHOLDER_SHEBANG: &[u8] = b"#!python";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSection {
    Console,
    Gui,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub module: String,
    pub attr: String,
    pub section: ScriptSection,
}

impl EntryPoint {
    /// Launcher source: shebang plus a stub that imports and calls `attr`.
    #[must_use]
    pub fn launcher(&self, interpreter: &str) -> Vec<u8> {
        let import_name = self.attr.split('.').next().unwrap_or(&self.attr);
        let mut code = String::new();
        code.push_str("# -*- coding: utf-8 -*-\n");
        code.push_str("import re\n");
        code.push_str("import sys\n");
        let _ = writeln!(code, "from {} import {import_name}", self.module);
        code.push_str("if __name__ == '__main__':\n");
        code.push_str("    sys.argv[0] = re.sub(r'(-script\\.pyw|\\.exe)?$', '', sys.argv[0])\n");
        let _ = writeln!(code, "    sys.exit({}())", self.attr);

        let mut out = build_shebang(interpreter);
        out.push(b'\n');
        out.extend_from_slice(code.as_bytes());
        out
    }
}

/// Shebang line (without trailing newline) that runs `interpreter`.
///
/// Paths with spaces or longer than the portable limit go through a
/// `/bin/sh` re-exec that is also a Python string literal.
#[must_use]
pub fn build_shebang(interpreter: &str) -> Vec<u8> {
    let simple = !interpreter.contains(' ') && interpreter.len() + 3 <= MAX_SIMPLE_SHEBANG;
    if simple {
        return format!("#!{interpreter}").into_bytes();
    }
    let mut shebang = String::from("#!/bin/sh\n");
    let _ = writeln!(
        shebang,
        "'''exec' {} \"$0\" \"$@\"",
        shell_quote(interpreter)
    );
    shebang.push_str("'''");
    shebang.into_bytes()
}

/// Replaces a `#!python` first line with a real shebang.
///
/// Returns `None` when the script carries no placeholder.
#[must_use]
pub fn fix_shebang(contents: &[u8], interpreter: &str) -> Option<Vec<u8>> {
    if !contents.starts_with(PLACEHOLDER_SHEBANG) {
        return None;
    }
    let rest = contents
        .iter()
        .position(|byte| *byte == b'\n')
        .map_or(&[][..], |newline| &contents[newline + 1..]);
    let mut out = build_shebang(interpreter);
    out.push(b'\n');
    out.extend_from_slice(rest);
    Some(out)
}

/// Reads `console_scripts` and `gui_scripts` from `entry_points.txt`.
#[must_use]
pub fn parse_entry_points(contents: &str) -> Vec<EntryPoint> {
    let mut entries = Vec::new();
    let mut section = None;
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = match trimmed.trim_start_matches('[').trim_end_matches(']').trim() {
                "console_scripts" => Some(ScriptSection::Console),
                "gui_scripts" => Some(ScriptSection::Gui),
                _ => None,
            };
            continue;
        }
        let Some(section) = section else {
            continue;
        };
        let Some((name, target)) = trimmed.split_once('=') else {
            continue;
        };
        let target = target.split('[').next().unwrap_or(target).trim();
        let Some((module, attr)) = target.split_once(':') else {
            warn!(entry = name.trim(), "skipping entry point without a callable");
            continue;
        };
        entries.push(EntryPoint {
            name: name.trim().to_string(),
            module: module.trim().to_string(),
            attr: attr.trim().to_string(),
            section,
        });
    }
    entries
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "@%+=:,./-_".contains(ch));
    if safe {
        return value.to_string();
    }
    let mut escaped = String::from("'");
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}
