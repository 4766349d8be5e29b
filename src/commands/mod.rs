//! CLI command implementations
//!
//! Every command gets a [`Context`] holding the merged configuration. Commands
//! that need a target open their own session through it, so offline commands
//! (`svd`) never touch the probe.

pub mod flash;
pub mod memory;
pub mod register;
pub mod stub;
pub mod target;

use std::time::Duration;

use svdlink_core::config::Config;
use svdlink_core::svd::Device;
use svdlink_rsp::{Target, Transport};

/// An open session over whichever transport the connection string named
pub type Session = Target<Box<dyn Transport>>;

/// Merged configuration shared by all commands
pub struct Context {
    config: Config,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect, select the configured target and apply declared geometry
    pub fn open(&self) -> Result<Session, Box<dyn std::error::Error>> {
        let connection = self
            .config
            .connection
            .target
            .as_deref()
            .ok_or("No connection given: use -c dev=... / ip=... or set [connection] target")?;

        let mut target = svdlink_rsp::connect(connection, &self.config.connection)?;
        target.set_stub_timeout(Duration::from_millis(self.config.stub.timeout_ms));
        if let Some(map) = self.config.memory_map()? {
            log::debug!("Using declared memory map");
            target.set_memory_map(map);
        }
        Ok(target)
    }

    /// Load the SVD model named by the configuration
    pub fn device(&self) -> Result<Device, Box<dyn std::error::Error>> {
        let path = self
            .config
            .device
            .svd
            .as_deref()
            .ok_or("No SVD file given: use --svd or set [device] svd")?;
        let device = Device::from_file(path)?;
        log::info!(
            "Loaded {} with {} peripherals",
            device.name(),
            device.peripheral_names().count()
        );
        Ok(device)
    }
}

/// Format a byte count
fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
