//! Running small code blobs on the target
//!
//! A stub is a flat binary loaded into RAM and entered with up to four
//! arguments in r0-r3. It signals completion by hitting a breakpoint, which
//! the GDB server reports as a SIGTRAP stop.

use std::time::{Duration, Instant};

use svdlink_core::{Error, Result};

use crate::device::{LoadedStub, Target};
use crate::packet::printable;
use crate::protocol::{reg, signal, MAX_STUB_ARGS, NVIC_BANK_LEN, NVIC_ICER, NVIC_ICPR};
use crate::transport::Transport;

/// A decoded stop reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `S`/`T` reply with a signal number
    Signal(u8),
    /// `W` reply: the program exited
    Exited(u8),
    /// `X` reply: the program was terminated by a signal
    Terminated(u8),
}

/// Decode the stop reply in `reply`, `None` if it is not one
pub fn parse_stop_reply(reply: &[u8]) -> Option<StopReason> {
    let (&kind, rest) = reply.split_first()?;
    let code = rest.get(..2)?;
    let code = u8::from_str_radix(std::str::from_utf8(code).ok()?, 16).ok()?;
    match kind {
        b'S' | b'T' => Some(StopReason::Signal(code)),
        b'W' => Some(StopReason::Exited(code)),
        b'X' => Some(StopReason::Terminated(code)),
        _ => None,
    }
}

/// Console output carried by an `O<hex>` packet
fn console_output(reply: &[u8]) -> Option<String> {
    let hex_text = reply.strip_prefix(b"O")?;
    if hex_text.is_empty() {
        return None;
    }
    hex::decode(hex_text)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

impl<T: Transport> Target<T> {
    /// Load `binary` at `load_address` and run it until it traps
    ///
    /// `args` go into r0-r3. The stack pointers are set to the top of the
    /// first known RAM region. Reloading is skipped when the same binary is
    /// already resident at the same address.
    pub fn run_stub(
        &mut self,
        binary: &[u8],
        load_address: u32,
        args: &[u32],
        timeout: Option<Duration>,
    ) -> Result<()> {
        if args.len() > MAX_STUB_ARGS {
            return Err(Error::InvalidArgument(format!(
                "a stub takes at most {} arguments, got {}",
                MAX_STUB_ARGS,
                args.len()
            )));
        }
        let stack_top = self
            .memory_map
            .as_ref()
            .and_then(|map| map.ram.first())
            .map(|ram| ram.top())
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "no RAM region known: probe the memory map or declare one".to_string(),
                )
            })?;

        let resident = self
            .loaded_stub
            .as_ref()
            .is_some_and(|s| s.address == load_address && s.binary == binary);
        if resident {
            log::debug!("stub: reusing resident stub at 0x{:08X}", load_address);
        } else {
            self.loaded_stub = None;
            log::debug!(
                "stub: loading {} bytes at 0x{:08X}",
                binary.len(),
                load_address
            );
            self.write_memory(load_address, binary)?;
            self.disable_interrupts()?;
            self.loaded_stub = Some(LoadedStub {
                address: load_address,
                binary: binary.to_vec(),
            });
        }

        let mut registers = self.read_registers()?;
        if registers.len() <= reg::PSP {
            return Err(Error::Protocol(format!(
                "register file has only {} registers",
                registers.len()
            )));
        }
        registers[..args.len()].copy_from_slice(args);
        registers[reg::PC] = load_address;
        registers[reg::MSP] = stack_top;
        registers[reg::PSP] = stack_top;
        self.write_registers(&registers)?;

        let pc = self.read_registers()?.get(reg::PC).copied();
        if pc != Some(load_address) {
            return Err(Error::Protocol(format!(
                "PC readback {} does not match entry point 0x{:08X}",
                pc.map_or_else(|| "missing".to_string(), |v| format!("0x{:08X}", v)),
                load_address
            )));
        }

        self.resume()?;
        let timeout = timeout.unwrap_or(self.stub_timeout);
        self.await_stop(signal::SIGTRAP, timeout)
    }

    /// Mask and clear every NVIC interrupt
    fn disable_interrupts(&mut self) -> Result<()> {
        let ones = [0xFFu8; NVIC_BANK_LEN];
        self.write_memory(NVIC_ICER, &ones)?;
        self.write_memory(NVIC_ICPR, &ones)
    }

    /// Continue execution (`c`) without waiting for a stop
    pub fn resume(&mut self) -> Result<()> {
        self.rsp.send_packet(b"c")
    }

    /// Wait for a stop reply carrying `expected`
    ///
    /// Console output packets are logged and skipped. Any other stop, or
    /// any other reply, is a [`Error::StubResponse`].
    pub fn await_stop(&mut self, expected: u8, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let reply = self.rsp.receive_packet_timeout(remaining)?;
            if reply.is_empty() {
                continue;
            }
            if let Some(text) = console_output(&reply) {
                log::info!("target: {}", text.trim_end());
                continue;
            }

            let received = match parse_stop_reply(&reply) {
                Some(StopReason::Signal(sig)) => Some(sig),
                _ => None,
            };
            if received == Some(expected) {
                log::debug!("stub: stopped with {}", signal::name(expected));
                return Ok(());
            }
            return Err(Error::StubResponse {
                expected,
                received,
                reply: printable(&reply),
            });
        }
    }

    /// Halt a running target
    ///
    /// Sends the out-of-band interrupt byte and waits for the SIGINT stop.
    /// The resident stub is forgotten since the core state is unknown.
    pub fn interrupt(&mut self) -> Result<()> {
        self.loaded_stub = None;
        self.rsp.send_interrupt()?;
        let timeout = self.rsp.timeout();
        self.await_stop(signal::SIGINT, timeout)
    }
}
