//! RSP protocol constants for Cortex-M targets

use std::time::Duration;

/// Packet size assumed when `qSupported` does not report one
pub const DEFAULT_PACKET_SIZE: usize = 0x100;

/// Bytes of an `X`/`vFlashWrite` packet taken by the command and address
pub const WRITE_OVERHEAD: usize = 44;

/// Out-of-band interrupt byte (Ctrl-C)
pub const INTERRUPT: u8 = 0x03;

/// Bytes requested per `qXfer:memory-map:read` page
pub const MEMORY_MAP_CHUNK: u32 = 512;

/// Arguments passed to a stub in r0-r3
pub const MAX_STUB_ARGS: usize = 4;

/// Default timeout for a single packet exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for a stub to reach its breakpoint
pub const DEFAULT_STUB_TIMEOUT: Duration = Duration::from_secs(3);

/// NVIC Interrupt Clear-Enable Registers
pub const NVIC_ICER: u32 = 0xE000_E180;
/// NVIC Interrupt Clear-Pending Registers
pub const NVIC_ICPR: u32 = 0xE000_E280;
/// Bytes covered by each NVIC clear bank (8 words)
pub const NVIC_BANK_LEN: usize = 32;

/// Stop signals reported in `S`/`T` replies
pub mod signal {
    /// Interrupted by the debugger
    pub const SIGINT: u8 = 2;
    /// Breakpoint reached
    pub const SIGTRAP: u8 = 5;
    /// Memory fault
    pub const SIGSEGV: u8 = 11;
    /// Target lost
    pub const SIGLOST: u8 = 29;

    /// Human readable signal name
    pub fn name(signal: u8) -> &'static str {
        match signal {
            SIGINT => "SIGINT",
            SIGTRAP => "SIGTRAP",
            SIGSEGV => "SIGSEGV",
            SIGLOST => "SIGLOST",
            _ => "unknown signal",
        }
    }
}

/// Cortex-M core register indices in the `g`/`G` register file
pub mod reg {
    /// Stack pointer (r13)
    pub const SP: usize = 13;
    /// Link register (r14)
    pub const LR: usize = 14;
    /// Program counter
    pub const PC: usize = 15;
    /// Program status register
    pub const XPSR: usize = 16;
    /// Main stack pointer
    pub const MSP: usize = 17;
    /// Process stack pointer
    pub const PSP: usize = 18;
}
