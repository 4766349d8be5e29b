//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a debug port scan kind
fn parse_scan(s: &str) -> Result<svdlink_core::config::ScanKind, String> {
    s.parse().map_err(|e: svdlink_core::Error| e.to_string())
}

#[derive(Parser)]
#[command(name = "svdlink")]
#[command(author, version, about = "SVD register access and flash programming over GDB RSP", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to ./svdlink.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// GDB server to talk to: dev=<path>[:<baud>] or ip=<host>:<port>
    #[arg(short = 'c', long, global = true)]
    pub connection: Option<String>,

    /// SVD file describing the device (overrides the config file)
    #[arg(long, global = true)]
    pub svd: Option<PathBuf>,

    /// Scan the debug port before attaching: swd or jtag
    #[arg(long, global = true, value_parser = parse_scan)]
    pub scan: Option<svdlink_core::config::ScanKind>,

    /// Target index to attach to
    #[arg(long, global = true)]
    pub attach: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the debug port and list the targets the probe found
    Targets,

    /// Show remote features, memory map and attached target
    Info,

    /// Read target memory and print a hex dump
    Read {
        /// Start address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes
        #[arg(default_value = "4", value_parser = parse_hex_u32)]
        length: u32,
    },

    /// Write one 32-bit word to target memory
    Write32 {
        /// Word-aligned address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Value to write
        #[arg(value_parser = parse_hex_u32)]
        value: u32,
    },

    /// Read a register or field by path, e.g. GPIOA.ODR.ODR5
    Get {
        /// Dotted register or field path
        path: String,
    },

    /// Write a register or field by path
    Set {
        /// Dotted register or field path
        path: String,

        /// Number, or an enumerated value name for fields
        value: String,

        /// Use bit-band aliases for single-bit fields
        #[arg(long)]
        bit_band: bool,
    },

    /// Read a peripheral, cluster or register and print its fields
    Dump {
        /// Dotted path
        path: String,
    },

    /// Browse the SVD model without a target
    Svd {
        /// Dotted path (lists the peripherals when omitted)
        path: Option<String>,
    },

    /// Program an Intel HEX file into flash
    Flash {
        /// Intel HEX file
        input: PathBuf,

        /// Don't erase blocks before programming
        #[arg(long)]
        no_erase: bool,
    },

    /// Load a raw binary into RAM, run it and wait for it to trap
    RunStub {
        /// Raw binary to load
        input: PathBuf,

        /// Load address (overrides the config file)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Arguments passed in r0-r3
        #[arg(value_parser = parse_hex_u32)]
        args: Vec<u32>,

        /// Timeout in milliseconds (overrides the config file)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run a probe monitor command and print its output
    Monitor {
        /// Command words, joined with spaces
        #[arg(required = true)]
        command: Vec<String>,
    },

    /// Reset the target
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x20000000"), Ok(0x2000_0000));
        assert_eq!(parse_hex_u32("16"), Ok(16));
        assert!(parse_hex_u32("0xG").is_err());
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "svdlink",
            "get",
            "GPIOA.ODR",
            "-c",
            "ip=localhost:3333",
            "--scan",
            "swd",
        ])
        .unwrap();
        assert_eq!(cli.connection.as_deref(), Some("ip=localhost:3333"));
        assert_eq!(cli.scan, Some(svdlink_core::config::ScanKind::Swd));
        assert!(matches!(cli.command, Commands::Get { ref path } if path == "GPIOA.ODR"));
    }

    #[test]
    fn test_run_stub_args() {
        let cli = Cli::try_parse_from([
            "svdlink", "run-stub", "stub.bin", "-a", "0x20000100", "1", "0x10",
        ])
        .unwrap();
        match cli.command {
            Commands::RunStub { address, args, .. } => {
                assert_eq!(address, Some(0x2000_0100));
                assert_eq!(args, vec![1, 0x10]);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
