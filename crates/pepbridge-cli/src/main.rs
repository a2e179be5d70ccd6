use clap::Parser;
use color_eyre::Result;
use pepbridge_core::Config;
use tracing_subscriber::EnvFilter;

mod cli;
mod dispatch;
mod output;

use cli::PepbridgeCli;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PepbridgeCli::parse();
    let config = Config::from_env().with_python(cli.python.clone());
    init_tracing(&config, cli.quiet, cli.verbose);

    let code = dispatch::dispatch_command(&config, &cli.command)?;
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(config: &Config, quiet: bool, verbose: u8) {
    let filter = match config.log_filter() {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::new(default_directives(quiet, verbose)),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn default_directives(quiet: bool, verbose: u8) -> String {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    format!("pepbridge={level},pepbridge_core={level},pepbridge_python={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert!(default_directives(true, 0).starts_with("pepbridge=warn,"));
        assert!(default_directives(false, 0).starts_with("pepbridge=info,"));
        assert!(default_directives(false, 1).starts_with("pepbridge=debug,"));
        assert!(default_directives(false, 3).ends_with("pepbridge_python=trace"));
    }
}
