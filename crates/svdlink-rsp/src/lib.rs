//! svdlink-rsp - GDB Remote Serial Protocol client
//!
//! This crate talks to a GDB server (a debug probe's built-in stub, OpenOCD,
//! pyOCD, QEMU, ...) and exposes the target as a
//! [`MemoryAccess`](svdlink_core::access::MemoryAccess) and
//! [`FlashBackend`](svdlink_core::flash::FlashBackend) for the register
//! model and flash programmer in `svdlink-core`.
//!
//! # Supported Transports
//!
//! - Serial port: `dev=/dev/ttyACM0` or `dev=/dev/ttyACM0:115200`
//! - TCP socket: `ip=localhost:3333`
//!
//! # Example
//!
//! ```no_run
//! use svdlink_core::config::ScanKind;
//! use svdlink_rsp::open_target;
//!
//! let mut target = open_target("dev=/dev/ttyACM0", None)?;
//! for t in target.scan(ScanKind::Swd)? {
//!     println!("{}: {}", t.index, t.name);
//! }
//! target.attach(1)?;
//! let idcode = target.read_memory(0xE004_2000, 4)?;
//! println!("DBGMCU_IDCODE: {:02X?}", idcode);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

pub mod connection;
pub mod device;
pub mod features;
pub mod flash;
pub mod memory;
pub mod monitor;
pub mod packet;
pub mod protocol;
pub mod shared;
pub mod stub;
pub mod transport;

#[cfg(test)]
mod mock;

use std::time::Duration;

use svdlink_core::config::ConnectionConfig;
use svdlink_core::{Error, Result};

// Re-exports
pub use connection::Rsp;
pub use device::Target;
pub use features::Features;
pub use monitor::TargetInfo;
pub use shared::SharedTarget;
pub use stub::StopReason;
#[cfg(feature = "serial")]
pub use transport::serial::SerialTransport;
pub use transport::tcp::TcpTransport;
pub use transport::Transport;

/// How to reach a GDB server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RspConnection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyACM0" or "COM3")
        device: String,
        /// Baud rate (None for the default)
        baud: Option<u32>,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl RspConnection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyACM0` - Serial with default baud
    /// - `dev=/dev/ttyACM0:115200` - Serial with specified baud
    /// - `ip=host:port` - TCP connection
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(dev) = s.strip_prefix("dev=") {
            match dev.rsplit_once(':') {
                // Windows device names like "COM3" never contain ':'
                Some((device, baud_str)) if !device.is_empty() => {
                    let baud = baud_str
                        .parse()
                        .map_err(|_| Error::InvalidArgument(format!("Invalid baud rate: {}", baud_str)))?;
                    Ok(RspConnection::Serial {
                        device: device.to_string(),
                        baud: Some(baud),
                    })
                }
                _ => Ok(RspConnection::Serial {
                    device: dev.to_string(),
                    baud: None,
                }),
            }
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port_str) = ip
                .rsplit_once(':')
                .ok_or_else(|| Error::InvalidArgument("Missing port in ip= parameter".to_string()))?;
            let port = port_str
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("Invalid port: {}", port_str)))?;
            Ok(RspConnection::Tcp {
                host: host.to_string(),
                port,
            })
        } else {
            Err(Error::InvalidArgument(format!(
                "Invalid connection string: {}. Use dev=... or ip=...",
                s
            )))
        }
    }

    /// Open the byte transport
    pub fn open(&self) -> Result<Box<dyn Transport>> {
        match self {
            #[cfg(feature = "serial")]
            RspConnection::Serial { device, baud } => {
                Ok(Box::new(SerialTransport::open(device, *baud)?))
            }
            #[cfg(not(feature = "serial"))]
            RspConnection::Serial { device, .. } => Err(Error::ConnectionFailed(format!(
                "{}: built without serial port support",
                device
            ))),
            RspConnection::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(host, *port)?)),
        }
    }
}

/// Open a session to the GDB server named by `connection`
pub fn open_target(connection: &str, timeout: Option<Duration>) -> Result<Target<Box<dyn Transport>>> {
    let transport = RspConnection::parse(connection)?.open()?;
    match timeout {
        Some(timeout) => Target::with_timeout(transport, timeout),
        None => Target::new(transport),
    }
}

/// Open a session and select a target as configured
///
/// With a scan kind set, the probe scans its debug port and the configured
/// index (or the first one listed) is attached. Without a scan, only an
/// explicitly configured index is attached; plain GDB servers are usually
/// attached already.
pub fn connect(connection: &str, config: &ConnectionConfig) -> Result<Target<Box<dyn Transport>>> {
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut target = open_target(connection, Some(timeout))?;
    select_target(&mut target, config)?;
    Ok(target)
}

/// Scan and attach on an open session, see [`connect`]
pub fn select_target<T: Transport>(target: &mut Target<T>, config: &ConnectionConfig) -> Result<()> {
    let index = match config.scan {
        Some(kind) => {
            let found = target.scan(kind)?;
            for t in &found {
                log::info!("Found target {}: {}", t.index, t.name);
            }
            match config.attach {
                Some(index) => Some(index),
                None => Some(
                    found
                        .first()
                        .map(|t| t.index)
                        .ok_or_else(|| Error::ConnectionFailed("scan found no targets".to_string()))?,
                ),
            }
        }
        None => config.attach,
    };
    if let Some(index) = index {
        target.attach(index)?;
    }
    Ok(())
}
