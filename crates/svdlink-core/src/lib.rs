//! svdlink-core - Core library for SVD-driven target access
//!
//! This crate holds everything that does not need a live connection:
//!
//! - [`svd`] - builds a [`svd::Device`] tree from a System View Description
//!   and provides bit-accurate register/field accessors on top of
//!   [`access::MemoryAccess`]
//! - [`flash`] - flash segment staging, Intel HEX loading, memory map parsing
//!   and the commit algorithm over a [`flash::FlashBackend`]
//! - [`config`] - TOML configuration shared by the CLI
//!
//! Transports implement [`access::MemoryAccess`] and [`flash::FlashBackend`];
//! see the `svdlink-rsp` crate for the GDB Remote Serial Protocol backend.
//!
//! # Example
//!
//! ```ignore
//! use svdlink_core::svd::Device;
//!
//! let device = Device::from_file("STM32F103xx.svd")?;
//! let odr = device.peripheral("GPIOA")?.register("ODR")?;
//! println!("{} is at 0x{:08X}", odr.path(), odr.address());
//!
//! // `target` is anything implementing `MemoryAccess`
//! let pin = odr.field("ODR5")?;
//! pin.set(&mut target, 1)?;
//! println!("{}", pin.get(&mut target)?);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod access;
pub mod config;
pub mod error;
pub mod flash;
pub mod svd;

pub use error::{Error, FlashOp, Result};
