//! Scripted transport for unit tests

use std::collections::VecDeque;
use std::time::Duration;

use svdlink_core::Result;

use crate::packet::{self, Decoded, Deframer};
use crate::transport::Transport;

/// Replays a fixed byte script and records everything written
pub struct ScriptedTransport {
    pub input: VecDeque<u8>,
    pub written: Vec<u8>,
    pub discards: usize,
}

impl ScriptedTransport {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            written: Vec::new(),
            discards: 0,
        }
    }

    /// Packets the host sent, in order
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        let mut deframer = Deframer::new();
        self.written
            .iter()
            .filter_map(|&b| match deframer.push(b) {
                Some(Decoded::Packet(p)) => Some(p),
                _ => None,
            })
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn read_nonblock(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    // The script is the future, not stale input
    fn discard_input(&mut self) -> Result<()> {
        self.discards += 1;
        Ok(())
    }
}

/// Ack followed by a framed reply
pub fn reply(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![packet::ACK];
    out.extend_from_slice(&packet::frame(payload));
    out
}

/// Concatenate several acked replies
pub fn replies<P: AsRef<[u8]>>(payloads: &[P]) -> Vec<u8> {
    payloads.iter().flat_map(|p| reply(p.as_ref())).collect()
}
