//! Packet exchange over a [`Transport`]
//!
//! RSP is strictly half-duplex: every packet we send must be acknowledged
//! with `+` before anything else happens, and every packet we receive is
//! acknowledged by us.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use svdlink_core::{Error, Result};

use crate::packet::{self, printable, Decoded, Deframer, ACK, NAK, START};
use crate::protocol::{DEFAULT_TIMEOUT, INTERRUPT};
use crate::transport::Transport;

const READ_CHUNK: usize = 512;

/// Packet-level connection to a GDB server
pub struct Rsp<T: Transport> {
    transport: T,
    rx: VecDeque<u8>,
    timeout: Duration,
}

impl<T: Transport> Rsp<T> {
    /// Wrap a transport with the default receive timeout
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            rx: VecDeque::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Receive timeout applied to each packet
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the receive timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Access the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the connection, returning the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write raw bytes without framing
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.write(bytes)
    }

    /// Send the out-of-band interrupt byte
    pub fn send_interrupt(&mut self) -> Result<()> {
        log::debug!("rsp: -> interrupt");
        self.transport.write(&[INTERRUPT])
    }

    /// Drop buffered and pending input
    pub fn discard_input(&mut self) -> Result<()> {
        self.rx.clear();
        self.transport.discard_input()
    }

    /// Send a packet and wait for its acknowledgement
    pub fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        log::trace!("rsp: -> {}", printable(payload));
        self.transport.write(&packet::frame(payload))?;

        let deadline = Instant::now() + self.timeout;
        match self.next_byte(deadline)? {
            ACK => Ok(()),
            START => {
                let mut deframer = Deframer::new();
                deframer.push(START);
                let stray = self.read_frame(&mut deframer, deadline)?;
                log::warn!(
                    "rsp: received packet {} instead of an ack",
                    printable(&stray)
                );
                Err(Error::Protocol(format!(
                    "expected ack, received packet {}",
                    printable(&stray)
                )))
            }
            NAK => Err(Error::Protocol(
                "packet rejected by the remote (negative ack)".to_string(),
            )),
            other => Err(Error::Protocol(format!(
                "expected ack, received 0x{:02X}",
                other
            ))),
        }
    }

    /// Receive one packet using the configured timeout
    pub fn receive_packet(&mut self) -> Result<Vec<u8>> {
        self.receive_packet_timeout(self.timeout)
    }

    /// Receive one packet
    ///
    /// Frames with a bad checksum are answered with `-` and the remote gets
    /// to resend until `timeout` expires.
    pub fn receive_packet_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut deframer = Deframer::new();
        self.read_frame(&mut deframer, deadline)
    }

    /// Send a packet and return the reply
    pub fn command(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.send_packet(payload)?;
        self.receive_packet()
    }

    fn read_frame(&mut self, deframer: &mut Deframer, deadline: Instant) -> Result<Vec<u8>> {
        loop {
            let byte = self.next_byte(deadline)?;
            match deframer.push(byte) {
                None => {}
                Some(Decoded::Packet(payload)) => {
                    self.transport.write(&[ACK])?;
                    log::trace!("rsp: <- {}", printable(&payload));
                    return Ok(payload);
                }
                Some(Decoded::BadChecksum) => {
                    log::debug!("rsp: checksum mismatch, requesting retransmission");
                    self.transport.write(&[NAK])?;
                }
            }
        }
    }

    fn next_byte(&mut self, deadline: Instant) -> Result<u8> {
        loop {
            if let Some(byte) = self.rx.pop_front() {
                return Ok(byte);
            }
            self.fill(deadline)?;
        }
    }

    fn fill(&mut self, deadline: Instant) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let n = self.transport.read_nonblock(&mut buf, deadline - now)?;
            if n > 0 {
                self.rx.extend(&buf[..n]);
                return Ok(());
            }
        }
    }
}
