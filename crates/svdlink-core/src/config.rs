//! TOML configuration file
//!
//! ```toml
//! [connection]
//! target = "dev=/dev/ttyBmpGdb"
//! scan = "swd"
//! attach = 1
//! timeout_ms = 3000
//!
//! [device]
//! svd = "STM32F103.svd"
//! bit_band = true
//!
//! [stub]
//! load_address = 0x20000000
//! timeout_ms = 3000
//!
//! # Optional declared geometry, used instead of the target memory map
//! [[flash]]
//! start = 0x08000000
//! length = "0x10000"
//! block_size = 0x400
//!
//! [[ram]]
//! start = 0x20000000
//! length = 0x5000
//! ```
//!
//! Every section is optional. Integer fields accept TOML integers or strings
//! in decimal or `0x` hex.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::flash::{FlashSegment, MemoryMap, RamRegion};

/// Default receive timeout for one logical RSP reply
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default time a stub may run before it is considered hung
pub const DEFAULT_STUB_TIMEOUT_MS: u64 = 3000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// How to reach the probe
    pub connection: ConnectionConfig,
    /// Register model options
    pub device: DeviceConfig,
    /// Stub execution options
    pub stub: StubConfig,
    /// Declared flash geometry
    pub flash: Vec<FlashConfig>,
    /// Declared RAM regions
    pub ram: Vec<RamConfig>,
}

/// `[connection]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection string (`dev=<path>[:<baud>]` or `ip=<host>:<port>`)
    pub target: Option<String>,
    /// Scan to run before attaching
    pub scan: Option<ScanKind>,
    /// Target index to attach to
    pub attach: Option<u32>,
    /// Receive timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: None,
            scan: None,
            attach: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Debug port scan performed by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Serial Wire Debug
    Swd,
    /// JTAG chain
    Jtag,
}

impl ScanKind {
    /// Monitor command that runs this scan
    pub fn monitor_command(self) -> &'static str {
        match self {
            ScanKind::Swd => "swdp_scan",
            ScanKind::Jtag => "jtag_scan",
        }
    }
}

impl std::str::FromStr for ScanKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "swd" | "swdp" => Ok(ScanKind::Swd),
            "jtag" => Ok(ScanKind::Jtag),
            other => Err(Error::InvalidArgument(format!("unknown scan kind: {}", other))),
        }
    }
}

/// `[device]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// SVD file describing the device
    pub svd: Option<PathBuf>,
    /// Use Cortex-M3/M4 bit-band aliases for single-bit fields
    pub bit_band: bool,
}

/// `[stub]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StubConfig {
    /// Address stubs are loaded and started at
    #[serde(deserialize_with = "deserialize_opt_hex_u32")]
    pub load_address: Option<u32>,
    /// How long a stub may run, in milliseconds
    pub timeout_ms: u64,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            load_address: None,
            timeout_ms: DEFAULT_STUB_TIMEOUT_MS,
        }
    }
}

/// `[[flash]]` entry
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlashConfig {
    /// Start address
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub start: u32,
    /// Length in bytes
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub length: u32,
    /// Erase block size in bytes
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub block_size: u32,
}

/// `[[ram]]` entry
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RamConfig {
    /// Start address
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub start: u32,
    /// Length in bytes
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub length: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_opt_hex_u32<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_hex_u32(deserializer).map(Some)
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex {:?}: {}", s, e))
    } else {
        s.parse().map_err(|e| format!("invalid number {:?}: {}", s, e))
    }
}

impl Config {
    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            Error::Parse { detail, .. } => Error::parse(path.display().to_string(), detail),
            other => other,
        })?;
        log::debug!("config: loaded {}", path.display());
        Ok(config)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::parse("config", e.message().to_string()))
    }

    /// Declared memory map, if any flash or RAM is configured
    pub fn memory_map(&self) -> Result<Option<MemoryMap>> {
        if self.flash.is_empty() && self.ram.is_empty() {
            return Ok(None);
        }
        let flash = self
            .flash
            .iter()
            .map(|f| FlashSegment::new(f.start, f.length, f.block_size))
            .collect::<Result<Vec<_>>>()?;
        let ram = self
            .ram
            .iter()
            .map(|r| RamRegion {
                start: r.start,
                length: r.length,
            })
            .collect();
        Ok(Some(MemoryMap { flash, ram }))
    }
}
