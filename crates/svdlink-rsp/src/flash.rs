//! Flash programming and memory-map discovery
//!
//! The staging model lives in [`svdlink_core::flash`]; this module provides
//! the `vFlash*` backend and reads the target's memory-map XML.

use svdlink_core::flash::{CommitProgress, CommitSummary, FlashBackend, MemoryMap};
use svdlink_core::{Error, FlashOp, Result};

use crate::device::Target;
use crate::memory::is_ok;
use crate::packet::printable;
use crate::protocol::MEMORY_MAP_CHUNK;
use crate::transport::Transport;

impl<T: Transport> FlashBackend for Target<T> {
    fn max_write_len(&self) -> usize {
        Target::max_write_len(self)
    }

    fn flash_erase(&mut self, addr: u32, length: u32) -> Result<()> {
        let request = format!("vFlashErase:{:08X},{:08X}", addr, length);
        let reply = self.rsp.command(request.as_bytes())?;
        check_flash_reply(&reply, FlashOp::Erase, addr)
    }

    fn flash_write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut request = format!("vFlashWrite:{:08X}:", addr).into_bytes();
        request.extend_from_slice(data);
        let reply = self.rsp.command(&request)?;
        check_flash_reply(&reply, FlashOp::Write, addr)
    }

    fn flash_done(&mut self, base: u32) -> Result<()> {
        let reply = self.rsp.command(b"vFlashDone")?;
        check_flash_reply(&reply, FlashOp::Done, base)
    }
}

fn check_flash_reply(reply: &[u8], op: FlashOp, addr: u32) -> Result<()> {
    if is_ok(reply) {
        Ok(())
    } else if reply.is_empty() {
        Err(Error::flash(op, addr, "not supported by the remote"))
    } else {
        Err(Error::flash(op, addr, format!("remote replied {}", printable(reply))))
    }
}

impl<T: Transport> Target<T> {
    /// Fetch the raw memory-map XML with paged `qXfer` reads
    pub fn read_memory_map_xml(&mut self) -> Result<String> {
        let mut xml = Vec::new();
        let mut offset = 0u32;
        loop {
            let request = format!(
                "qXfer:memory-map:read::{:08X},{:08X}",
                offset, MEMORY_MAP_CHUNK
            );
            let reply = self.rsp.command(request.as_bytes())?;
            let Some((&kind, data)) = reply.split_first() else {
                return Err(Error::Protocol(
                    "memory map not supported by the remote".to_string(),
                ));
            };
            match kind {
                b'm' | b'l' => {
                    xml.extend_from_slice(data);
                    offset += data.len() as u32;
                    if kind == b'l' {
                        break;
                    }
                    if data.is_empty() {
                        return Err(Error::Protocol(
                            "memory map transfer made no progress".to_string(),
                        ));
                    }
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "memory map read failed: {}",
                        printable(&reply)
                    )))
                }
            }
        }
        String::from_utf8(xml)
            .map_err(|e| Error::parse("memory map", format!("not UTF-8: {}", e)))
    }

    /// Read and parse the target memory map, replacing any known map
    pub fn probe(&mut self) -> Result<&MemoryMap> {
        let xml = self.read_memory_map_xml()?;
        let map = MemoryMap::from_xml(&xml)?;
        log::info!(
            "Memory map: {} flash segment(s), {} RAM region(s)",
            map.flash.len(),
            map.ram.len()
        );
        Ok(self.memory_map.insert(map))
    }

    /// Known memory map, probing the target if none is set
    pub fn ensure_memory_map(&mut self) -> Result<&MemoryMap> {
        if self.memory_map.is_none() {
            self.probe()?;
        }
        self.memory_map
            .as_ref()
            .ok_or_else(|| Error::Protocol("no memory map".to_string()))
    }

    /// Stage data for programming. Nothing is sent until [`Target::flash_commit`].
    pub fn flash_stage(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.ensure_memory_map()?;
        self.map_mut()?.stage(addr, data)
    }

    /// Erase and program every dirty block, one `vFlashDone` per segment
    pub fn flash_commit<P: CommitProgress>(
        &mut self,
        erase: bool,
        progress: &mut P,
    ) -> Result<Vec<CommitSummary>> {
        // The map is taken out so `self` can act as the backend
        let mut map = self
            .memory_map
            .take()
            .ok_or_else(|| Error::InvalidArgument("nothing staged: no memory map".to_string()))?;
        let result = map.commit_all(self, erase, progress);
        self.memory_map = Some(map);
        result
    }

    /// Stage an Intel HEX image and commit it
    ///
    /// Returns the lowest and one-past-highest staged address along with the
    /// per-segment summaries.
    pub fn flash_write_hex<P: CommitProgress>(
        &mut self,
        text: &str,
        erase: bool,
        progress: &mut P,
    ) -> Result<((u32, u32), Vec<CommitSummary>)> {
        self.ensure_memory_map()?;
        let range = self.map_mut()?.stage_ihex(text)?;
        let summaries = self.flash_commit(erase, progress)?;
        Ok((range, summaries))
    }

    fn map_mut(&mut self) -> Result<&mut MemoryMap> {
        self.memory_map
            .as_mut()
            .ok_or_else(|| Error::Protocol("no memory map".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{replies, reply, ScriptedTransport};
    use svdlink_core::flash::{FlashSegment, NoProgress};

    const XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE memory-map PUBLIC "+//IDN gnu.org//DTD GDB Memory Map V1.0//EN" "http://sourceware.org/gdb/gdb-memory-map.dtd">
<memory-map>
  <memory type="ram" start="0x20000000" length="0x5000"/>
  <memory type="flash" start="0x8000000" length="0x800">
    <property name="blocksize">0x400</property>
  </memory>
</memory-map>"#;

    fn target(script: &[u8]) -> Target<ScriptedTransport> {
        let mut input = reply(b"PacketSize=100");
        input.extend_from_slice(script);
        let mut t = Target::new(ScriptedTransport::new(&input)).unwrap();
        t.set_timeout(std::time::Duration::from_millis(50));
        t
    }

    fn sent(t: Target<ScriptedTransport>) -> Vec<Vec<u8>> {
        t.into_inner().sent_packets().into_iter().skip(1).collect()
    }

    #[test]
    fn test_probe_pages_memory_map() {
        let (first, rest) = XML.as_bytes().split_at(100);
        let page1 = [&b"m"[..], first].concat();
        let page2 = [&b"l"[..], rest].concat();
        let mut t = target(&replies(&[page1.as_slice(), page2.as_slice()]));
        let map = t.probe().unwrap();
        assert_eq!(map.flash.len(), 1);
        assert_eq!(map.ram[0].top(), 0x2000_5000);

        let sent = sent(t);
        assert_eq!(sent[0], b"qXfer:memory-map:read::00000000,00000200");
        assert_eq!(sent[1], b"qXfer:memory-map:read::00000064,00000200");
    }

    #[test]
    fn test_probe_unsupported() {
        let mut t = target(&reply(b""));
        assert!(matches!(t.probe(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_commit_sends_vflash_packets() {
        // 0x100 - 44 = 212 bytes per write, so a 1 KiB block takes 5 writes
        let mut t = target(&replies(&[b"OK"; 7]));
        let mut map = MemoryMap::new();
        map.flash.push(FlashSegment::new(0x0800_0000, 0x800, 0x400).unwrap());
        t.set_memory_map(map);

        t.flash_stage(0x0800_0404, &[1, 2, 3]).unwrap();
        let summaries = t.flash_commit(true, &mut NoProgress).unwrap();
        assert_eq!(summaries[0].blocks_written, 1);
        assert!(!t.memory_map().unwrap().is_dirty());

        let sent = sent(t);
        assert_eq!(sent.len(), 1 + 5 + 1);
        assert_eq!(sent[0], b"vFlashErase:08000400,00000400");
        assert!(sent[1].starts_with(b"vFlashWrite:08000400:\xFF\xFF\xFF\xFF\x01\x02\x03\xFF"));
        assert!(sent[5].starts_with(b"vFlashWrite:08000750:"));
        assert_eq!(sent[6], b"vFlashDone");
    }

    #[test]
    fn test_commit_failure_names_operation() {
        let mut t = target(&replies(&[b"E01"]));
        let mut map = MemoryMap::new();
        map.flash.push(FlashSegment::new(0x0800_0000, 0x400, 0x400).unwrap());
        t.set_memory_map(map);
        t.flash_stage(0x0800_0000, &[0]).unwrap();

        match t.flash_commit(true, &mut NoProgress) {
            Err(Error::Flash { op, addr, .. }) => {
                assert_eq!(op, FlashOp::Erase);
                assert_eq!(addr, 0x0800_0000);
            }
            other => panic!("unexpected {:?}", other),
        }
        // Staged data survives a failed commit
        assert!(t.memory_map().unwrap().is_dirty());
    }

    #[test]
    fn test_stage_outside_flash_is_rejected() {
        let mut t = target(b"");
        t.set_memory_map(MemoryMap::new());
        assert!(matches!(
            t.flash_stage(0x2000_0000, &[0]),
            Err(Error::Flash { op: FlashOp::Stage, .. })
        ));
    }
}
