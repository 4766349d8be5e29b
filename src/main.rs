//! svdlink - SVD register access and flash programming over GDB RSP
//!
//! Talks to a debug probe's GDB server (Black Magic Probe, OpenOCD, ...) and
//! gives named access to a microcontroller's peripheral registers as
//! described by its SVD file, programs Intel HEX images into flash and runs
//! small stubs in RAM.
//!
//! Settings come from `svdlink.toml` (or `--config`); command line flags
//! override the file.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::Context;
use svdlink_core::config::Config;

use std::path::Path;

/// Configuration file looked up in the working directory
const DEFAULT_CONFIG: &str = "svdlink.toml";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    let ctx = Context::new(config);

    match cli.command {
        Commands::Targets => commands::target::run_targets(&ctx),
        Commands::Info => commands::target::run_info(&ctx),
        Commands::Read { address, length } => commands::memory::run_read(&ctx, address, length),
        Commands::Write32 { address, value } => commands::memory::run_write32(&ctx, address, value),
        Commands::Get { path } => commands::register::run_get(&ctx, &path),
        Commands::Set {
            path,
            value,
            bit_band,
        } => commands::register::run_set(&ctx, &path, &value, bit_band),
        Commands::Dump { path } => commands::register::run_dump(&ctx, &path),
        Commands::Svd { path } => commands::register::run_svd(&ctx, path.as_deref()),
        Commands::Flash { input, no_erase } => commands::flash::run_flash(&ctx, &input, !no_erase),
        Commands::RunStub {
            input,
            address,
            args,
            timeout_ms,
        } => commands::stub::run_stub(&ctx, &input, address, &args, timeout_ms),
        Commands::Monitor { command } => commands::target::run_monitor(&ctx, &command.join(" ")),
        Commands::Reset => commands::target::run_reset(&ctx),
    }
}

/// Load the configuration from `path`, or the default file when present
fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(Config::from_file(path)?);
    }
    let default = Path::new(DEFAULT_CONFIG);
    if default.is_file() {
        log::debug!("Using {}", default.display());
        Ok(Config::from_file(default)?)
    } else {
        Ok(Config::default())
    }
}

/// Command line flags take precedence over the configuration file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(connection) = &cli.connection {
        config.connection.target = Some(connection.clone());
    }
    if let Some(svd) = &cli.svd {
        config.device.svd = Some(svd.clone());
    }
    if cli.scan.is_some() {
        config.connection.scan = cli.scan;
    }
    if cli.attach.is_some() {
        config.connection.attach = cli.attach;
    }
}
