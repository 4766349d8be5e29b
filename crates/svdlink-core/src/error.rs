//! Error types shared by all svdlink crates

use core::fmt;
use thiserror::Error;

/// Flash operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// Staging data into the segment model
    Stage,
    /// `vFlashErase`
    Erase,
    /// `vFlashWrite`
    Write,
    /// `vFlashDone`
    Done,
}

impl fmt::Display for FlashOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage => write!(f, "stage"),
            Self::Erase => write!(f, "erase"),
            Self::Write => write!(f, "write"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// svdlink error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed packet, unexpected reply or broken framing
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No complete packet arrived before the deadline
    #[error("Timed out waiting for target response")]
    Timeout,

    /// Target stopped with a different signal than expected
    #[error("Unexpected stop reply {reply:?} (signal {received:?}, expected {expected})")]
    StubResponse {
        /// Signal number that was expected
        expected: u8,
        /// Signal number decoded from the reply, if any
        received: Option<u8>,
        /// Raw reply payload
        reply: String,
    },

    /// Error, empty or short reply to a memory access
    #[error("Target memory access failed at 0x{addr:08X}: {reason}")]
    TargetMemory {
        /// Address of the failing access
        addr: u32,
        /// What went wrong
        reason: String,
    },

    /// Flash erase/write/done failure
    #[error("Flash {op} failed at 0x{addr:08X}: {reason}")]
    Flash {
        /// Failing operation
        op: FlashOp,
        /// Address of the failing operation
        addr: u32,
        /// What went wrong
        reason: String,
    },

    /// Malformed descriptor, memory map or HEX record
    #[error("Parse error in {context}: {detail}")]
    Parse {
        /// What was being parsed (element name, line number, ...)
        context: String,
        /// What was wrong with it
        detail: String,
    },

    /// Ambiguous or missing bit specification, unresolved derivation,
    /// unknown node name
    #[error("Model error: {0}")]
    Model(String),

    /// 32-bit access to an address that is not word aligned
    #[error("Address 0x{0:08X} is not 4-byte aligned")]
    Misaligned(u32),

    /// Caller passed something out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failed to open or configure the connection to the probe
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// I/O error during communication or file access
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Parse`]
    pub fn parse(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// Build a [`Error::TargetMemory`]
    pub fn memory(addr: u32, reason: impl Into<String>) -> Self {
        Self::TargetMemory {
            addr,
            reason: reason.into(),
        }
    }

    /// Build a [`Error::Flash`]
    pub fn flash(op: FlashOp, addr: u32, reason: impl Into<String>) -> Self {
        Self::Flash {
            op,
            addr,
            reason: reason.into(),
        }
    }
}

/// Result type alias using the svdlink Error type
pub type Result<T> = core::result::Result<T, Error>;
