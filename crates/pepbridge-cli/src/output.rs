use std::fs::OpenOptions;
use std::io::{self, Write};

use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;

/// Opens the descriptor passed via `--output-fd` for writing.
///
/// 1 and 2 map to the process streams; anything else is reopened through
/// `/dev/fd` so the caller's descriptor stays open after we exit.
pub fn open_output(fd: i32) -> Result<Box<dyn Write>> {
    match fd {
        0 => bail!("--output-fd 0 is standard input and cannot be written to"),
        1 => Ok(Box::new(io::stdout())),
        2 => Ok(Box::new(io::stderr())),
        fd if fd < 0 => bail!("invalid --output-fd {fd}"),
        fd => {
            let path = format!("/dev/fd/{fd}");
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .wrap_err_with(|| format!("failed to open output fd {fd}"))?;
            Ok(Box::new(file))
        }
    }
}

/// Writes one line and flushes, so the reader sees it before we exit.
pub fn emit_line(fd: i32, line: &str) -> Result<()> {
    let mut out = open_output(fd)?;
    writeln!(out, "{line}").wrap_err("failed to write output")?;
    out.flush().wrap_err("failed to flush output")?;
    Ok(())
}
