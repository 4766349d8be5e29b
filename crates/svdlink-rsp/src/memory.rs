//! Memory and register access (`m`, `X`, `g`, `G`)

use svdlink_core::access::MemoryAccess;
use svdlink_core::{Error, Result};

use crate::device::Target;
use crate::packet::printable;
use crate::protocol::WRITE_OVERHEAD;
use crate::transport::Transport;

/// `OK` reply, anything else is a failure
pub(crate) fn is_ok(reply: &[u8]) -> bool {
    reply == b"OK"
}

/// `Exx` error reply. Hex data always has an even length, so a 3-byte reply
/// starting with `E` cannot be data.
pub(crate) fn is_error_reply(reply: &[u8]) -> bool {
    reply.len() == 3 && reply[0] == b'E'
}

impl<T: Transport> Target<T> {
    /// Largest read per `m` packet: the hex reply doubles the size
    pub fn max_read_len(&self) -> usize {
        (self.packet_size() / 2).max(1)
    }

    /// Largest binary payload per `X`/`vFlashWrite` packet
    pub fn max_write_len(&self) -> usize {
        self.packet_size().saturating_sub(WRITE_OVERHEAD).max(1)
    }

    /// Read `len` bytes at `addr`
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let chunk_len = self.max_read_len();
        while out.len() < len {
            let chunk_addr = addr.wrapping_add(out.len() as u32);
            let want = (len - out.len()).min(chunk_len);
            let request = format!("m{:08X},{:08X}", chunk_addr, want);
            let reply = self.rsp.command(request.as_bytes())?;

            if reply.is_empty() {
                return Err(Error::memory(chunk_addr, "empty reply"));
            }
            if is_error_reply(&reply) {
                return Err(Error::memory(
                    chunk_addr,
                    format!("target replied {}", printable(&reply)),
                ));
            }
            let data = hex::decode(&reply).map_err(|e| {
                Error::memory(chunk_addr, format!("malformed reply {}: {}", printable(&reply), e))
            })?;
            if data.len() != want {
                return Err(Error::memory(
                    chunk_addr,
                    format!("short read: {} of {} bytes", data.len(), want),
                ));
            }
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    /// Write `data` at `addr`
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let chunk_len = self.max_write_len();
        let mut chunk_addr = addr;
        for chunk in data.chunks(chunk_len) {
            let mut request = format!("X{:08X},{:08X}:", chunk_addr, chunk.len()).into_bytes();
            request.extend_from_slice(chunk);
            let reply = self.rsp.command(&request)?;
            if !is_ok(&reply) {
                return Err(Error::memory(
                    chunk_addr,
                    format!("write rejected: {}", printable(&reply)),
                ));
            }
            chunk_addr = chunk_addr.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }

    /// Read the core register file in architecture order
    pub fn read_registers(&mut self) -> Result<Vec<u32>> {
        let reply = self.rsp.command(b"g")?;
        if reply.is_empty() || is_error_reply(&reply) {
            return Err(Error::Protocol(format!(
                "register read failed: {}",
                printable(&reply)
            )));
        }
        let bytes = hex::decode(&reply)
            .map_err(|e| Error::Protocol(format!("malformed register file: {}", e)))?;
        if bytes.len() % 4 != 0 {
            return Err(Error::Protocol(format!(
                "register file of {} bytes is not whole words",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    /// Write the whole core register file
    pub fn write_registers(&mut self, registers: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = registers.iter().flat_map(|r| r.to_le_bytes()).collect();
        let request = format!("G{}", hex::encode(bytes));
        let reply = self.rsp.command(request.as_bytes())?;
        if !is_ok(&reply) {
            return Err(Error::Protocol(format!(
                "register write rejected: {}",
                printable(&reply)
            )));
        }
        Ok(())
    }
}

impl<T: Transport> MemoryAccess for Target<T> {
    fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        Target::read_memory(self, addr, len)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        Target::write_memory(self, addr, data)
    }
}
