//! svdlink-dummy - Simulated GDB stub for testing
//!
//! [`DummyStub`] implements [`Transport`] and answers RSP packets from an
//! in-memory Cortex-M target: sparse memory, a core register file, flash
//! regions that obey erase/program rules, a probe-style `monitor` command
//! set and stop replies for `c` and the interrupt byte. Every request is
//! logged so tests can assert on exactly what went over the wire.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::time::Duration;

use svdlink_core::flash::MemoryMap;
use svdlink_core::Result;
use svdlink_rsp::packet::{self, Decoded, Deframer, ACK, NAK};
use svdlink_rsp::protocol::{signal, INTERRUPT};
use svdlink_rsp::Transport;

#[cfg(test)]
mod e2e;

/// Number of registers in the simulated register file
pub const REGISTER_COUNT: usize = 20;

/// Configuration for the simulated stub
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// PacketSize reported in `qSupported`
    pub packet_size: usize,
    /// Memory-map XML served through `qXfer:memory-map:read`
    pub memory_map_xml: Option<String>,
    /// Word returned for memory that was never written
    pub default_word: u32,
    /// Targets listed by `monitor targets`
    pub targets: Vec<String>,
    /// Signal reported when the core is resumed, `None` to keep running
    pub stop_signal: Option<u8>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            packet_size: 0x400,
            memory_map_xml: None,
            default_word: 0,
            targets: vec!["Simulated Cortex-M".to_string()],
            stop_signal: Some(signal::SIGTRAP),
        }
    }
}

/// Simulated GDB stub
pub struct DummyStub {
    config: DummyConfig,
    flash: Vec<Range<u32>>,
    memory: BTreeMap<u32, u8>,
    registers: Vec<u32>,
    read_faults: Vec<Range<u32>>,
    console: Vec<String>,
    attached: Option<u32>,
    running: bool,
    deframer: Deframer,
    outgoing: VecDeque<u8>,
    last_reply: Vec<u8>,
    corrupt_replies: usize,
    requests: Vec<Vec<u8>>,
}

impl DummyStub {
    /// Create a stub with the given configuration
    ///
    /// Flash regions are taken from the memory-map XML, if it parses.
    pub fn new(config: DummyConfig) -> Self {
        let flash = config
            .memory_map_xml
            .as_deref()
            .and_then(|xml| MemoryMap::from_xml(xml).ok())
            .map(|map| {
                map.flash
                    .iter()
                    .map(|s| s.offset()..s.offset() + s.length())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            config,
            flash,
            memory: BTreeMap::new(),
            registers: vec![0; REGISTER_COUNT],
            read_faults: Vec::new(),
            console: Vec::new(),
            attached: None,
            running: false,
            deframer: Deframer::new(),
            outgoing: VecDeque::new(),
            last_reply: Vec::new(),
            corrupt_replies: 0,
            requests: Vec::new(),
        }
    }

    /// Create a stub with default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Send the next `count` frames with a wrong checksum
    ///
    /// A negative ack resends only the most recent reply, so this is meant
    /// for commands answered with a single packet.
    pub fn corrupt_next_replies(&mut self, count: usize) {
        self.corrupt_replies = count;
    }

    /// Answer reads touching `range` with an error
    pub fn fail_reads(&mut self, range: Range<u32>) {
        self.read_faults.push(range);
    }

    /// Emit `text` as console output the next time the core is resumed
    pub fn queue_console_output(&mut self, text: &str) {
        self.console.push(text.to_string());
    }

    /// Store bytes directly, bypassing the protocol
    pub fn poke(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.memory.insert(addr.wrapping_add(i as u32), b);
        }
    }

    /// Read bytes directly, bypassing the protocol
    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.byte_at(addr.wrapping_add(i)))
            .collect()
    }

    /// Little-endian word at `addr`
    pub fn word(&self, addr: u32) -> u32 {
        let bytes = self.peek(addr, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Core register file
    pub fn registers(&self) -> &[u32] {
        &self.registers
    }

    /// Currently attached target index
    pub fn attached(&self) -> Option<u32> {
        self.attached
    }

    /// Whether the simulated core is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Every packet received, in order
    pub fn requests(&self) -> &[Vec<u8>] {
        &self.requests
    }

    /// Number of received packets starting with `prefix`
    pub fn count_requests(&self, prefix: &[u8]) -> usize {
        self.requests.iter().filter(|r| r.starts_with(prefix)).count()
    }

    /// Forget the request log
    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    fn byte_at(&self, addr: u32) -> u8 {
        if let Some(&b) = self.memory.get(&addr) {
            return b;
        }
        if self.flash.iter().any(|r| r.contains(&addr)) {
            return 0xFF;
        }
        self.config.default_word.to_le_bytes()[(addr & 3) as usize]
    }

    fn in_flash(&self, addr: u32, len: u32) -> bool {
        let end = addr.saturating_add(len);
        self.flash
            .iter()
            .any(|r| addr >= r.start && end <= r.end)
    }

    fn queue(&mut self, payload: &[u8]) {
        self.last_reply = packet::frame(payload);
        self.emit_last_reply();
    }

    fn emit_last_reply(&mut self) {
        let mut wire = self.last_reply.clone();
        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            if let Some(digit) = wire.last_mut() {
                *digit = if *digit == b'0' { b'1' } else { b'0' };
            }
        }
        self.outgoing.extend(wire);
    }

    fn receive(&mut self, byte: u8) {
        if !self.deframer.in_frame() {
            match byte {
                INTERRUPT => {
                    log::debug!("dummy: interrupt");
                    if self.running {
                        self.running = false;
                        self.queue(format!("T{:02X}", signal::SIGINT).as_bytes());
                    }
                    return;
                }
                ACK => return,
                NAK => {
                    log::debug!("dummy: resending last reply");
                    self.emit_last_reply();
                    return;
                }
                _ => {}
            }
        }
        match self.deframer.push(byte) {
            None => {}
            Some(Decoded::BadChecksum) => self.outgoing.push_back(NAK),
            Some(Decoded::Packet(payload)) => {
                self.outgoing.push_back(ACK);
                self.requests.push(payload.clone());
                self.handle(&payload);
            }
        }
    }

    fn handle(&mut self, payload: &[u8]) {
        let (command, args) = split_command(payload);
        log::trace!("dummy: {}", String::from_utf8_lossy(command));
        match command {
            b"qSupported" => {
                let mut reply = format!("PacketSize={:X}", self.config.packet_size);
                if self.config.memory_map_xml.is_some() {
                    reply.push_str(";qXfer:memory-map:read+");
                }
                self.queue(reply.as_bytes());
            }
            b"?" => {
                let reply = format!("S{:02X}", signal::SIGTRAP);
                self.queue(reply.as_bytes());
            }
            b"m" => {
                let reply = self.read_request(args);
                self.queue(&reply);
            }
            b"X" => {
                let reply = self.write_request(args);
                self.queue(reply);
            }
            b"g" => {
                let bytes: Vec<u8> = self.registers.iter().flat_map(|r| r.to_le_bytes()).collect();
                self.queue(hex::encode(bytes).as_bytes());
            }
            b"G" => {
                let reply = self.write_registers(args);
                self.queue(reply);
            }
            b"c" => self.resume(),
            b"D" => {
                self.attached = None;
                self.queue(b"OK");
            }
            b"r" => {
                self.running = false;
                self.registers = vec![0; REGISTER_COUNT];
            }
            b"qRcmd" => self.monitor(args),
            b"vAttach" => {
                let reply = self.attach(args);
                self.queue(&reply);
            }
            b"qXfer:memory-map:read" => {
                let reply = self.memory_map_request(args);
                self.queue(&reply);
            }
            b"vFlashErase" => {
                let reply = self.flash_erase(args);
                self.queue(reply);
            }
            b"vFlashWrite" => {
                let reply = self.flash_write(args);
                self.queue(reply);
            }
            b"vFlashDone" => self.queue(b"OK"),
            _ => self.queue(b""),
        }
    }

    fn read_request(&self, args: &[u8]) -> Vec<u8> {
        let Some((addr, len)) = parse_addr_len(args) else {
            return b"E01".to_vec();
        };
        let end = addr.saturating_add(len as u32);
        if self
            .read_faults
            .iter()
            .any(|r| addr < r.end && r.start < end)
        {
            return b"E03".to_vec();
        }
        hex::encode(self.peek(addr, len)).into_bytes()
    }

    fn write_request(&mut self, args: &[u8]) -> &'static [u8] {
        let Some(colon) = args.iter().position(|&b| b == b':') else {
            return b"E01";
        };
        let (header, data) = (&args[..colon], &args[colon + 1..]);
        match parse_addr_len(header) {
            Some((addr, len)) if len == data.len() => {
                self.poke(addr, data);
                b"OK"
            }
            _ => b"E01",
        }
    }

    fn write_registers(&mut self, args: &[u8]) -> &'static [u8] {
        let Ok(bytes) = hex::decode(args) else {
            return b"E01";
        };
        if bytes.len() % 4 != 0 {
            return b"E01";
        }
        let values: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        for (slot, value) in self.registers.iter_mut().zip(values) {
            *slot = value;
        }
        b"OK"
    }

    fn resume(&mut self) {
        for text in std::mem::take(&mut self.console) {
            let reply = format!("O{}", hex::encode(text));
            self.queue(reply.as_bytes());
        }
        match self.config.stop_signal {
            Some(sig) => {
                self.running = false;
                self.queue(format!("T{:02X}", sig).as_bytes());
            }
            None => self.running = true,
        }
    }

    fn monitor(&mut self, args: &[u8]) {
        let command = hex::decode(args)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let output = match command.trim() {
            "targets" => self.target_listing(),
            "swdp_scan" | "jtag_scan" => {
                format!("Target voltage: 3.3V\n{}", self.target_listing())
            }
            "version" => "svdlink dummy stub\n".to_string(),
            other => format!("Unknown command: {}\n", other),
        };
        let reply = format!("O{}", hex::encode(output));
        self.queue(reply.as_bytes());
        self.queue(b"OK");
    }

    fn target_listing(&self) -> String {
        let mut out = String::from("Available Targets:\nNo. Att Driver\n");
        for (i, name) in self.config.targets.iter().enumerate() {
            let index = i as u32 + 1;
            let mark = if self.attached == Some(index) { "*" } else { " " };
            out.push_str(&format!(" {}   {}  {}\n", index, mark, name));
        }
        out
    }

    fn attach(&mut self, args: &[u8]) -> Vec<u8> {
        let index = std::str::from_utf8(args)
            .ok()
            .and_then(|s| u32::from_str_radix(s, 16).ok());
        match index {
            Some(i) if i >= 1 && (i as usize) <= self.config.targets.len() => {
                self.attached = Some(i);
                format!("T{:02X}", signal::SIGTRAP).into_bytes()
            }
            _ => b"E01".to_vec(),
        }
    }

    fn memory_map_request(&self, args: &[u8]) -> Vec<u8> {
        let Some(xml) = self.config.memory_map_xml.as_deref() else {
            return Vec::new();
        };
        let Some((offset, len)) = args.strip_prefix(b"::").and_then(parse_addr_len) else {
            return b"E01".to_vec();
        };
        let xml = xml.as_bytes();
        let start = (offset as usize).min(xml.len());
        let end = start.saturating_add(len).min(xml.len());
        let kind = if end == xml.len() { b'l' } else { b'm' };
        let mut reply = vec![kind];
        reply.extend_from_slice(&xml[start..end]);
        reply
    }

    fn flash_erase(&mut self, args: &[u8]) -> &'static [u8] {
        match parse_addr_len(args) {
            Some((addr, len)) if self.in_flash(addr, len as u32) => {
                for a in addr..addr + len as u32 {
                    self.memory.insert(a, 0xFF);
                }
                b"OK"
            }
            _ => b"E01",
        }
    }

    fn flash_write(&mut self, args: &[u8]) -> &'static [u8] {
        let Some(colon) = args.iter().position(|&b| b == b':') else {
            return b"E01";
        };
        let addr = std::str::from_utf8(&args[..colon])
            .ok()
            .and_then(|s| u32::from_str_radix(s, 16).ok());
        let data = &args[colon + 1..];
        match addr {
            Some(addr) if self.in_flash(addr, data.len() as u32) => {
                // Programming can only clear bits
                for (i, &b) in data.iter().enumerate() {
                    let a = addr + i as u32;
                    let old = self.byte_at(a);
                    self.memory.insert(a, old & b);
                }
                b"OK"
            }
            _ => b"E01",
        }
    }
}

impl Transport for DummyStub {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            self.receive(byte);
        }
        Ok(())
    }

    fn read_nonblock(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(self.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.outgoing.clear();
        Ok(())
    }
}

/// Split a packet into its command and arguments
///
/// `qXfer:memory-map:read::0,200` splits after `read`; `vFlashWrite:...`,
/// `vAttach;...` and `qRcmd,...` split at their separator; single-letter
/// commands split after the letter.
fn split_command(payload: &[u8]) -> (&[u8], &[u8]) {
    const LONG: [&[u8]; 7] = [
        b"qXfer:memory-map:read",
        b"qSupported",
        b"qRcmd",
        b"vAttach",
        b"vFlashErase",
        b"vFlashWrite",
        b"vFlashDone",
    ];
    for name in LONG {
        if let Some(rest) = payload.strip_prefix(name) {
            let rest = match rest.first() {
                Some(b':' | b';' | b',') if name != b"qXfer:memory-map:read" => &rest[1..],
                _ => rest,
            };
            return (name, rest);
        }
    }
    if payload.is_empty() {
        return (payload, payload);
    }
    payload.split_at(1)
}

/// Parse `ADDR,LEN` in hex
fn parse_addr_len(args: &[u8]) -> Option<(u32, usize)> {
    let text = std::str::from_utf8(args).ok()?;
    let (addr, len) = text.split_once(',')?;
    Some((
        u32::from_str_radix(addr, 16).ok()?,
        usize::from_str_radix(len, 16).ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(stub: &mut DummyStub, payload: &[u8]) -> Vec<u8> {
        stub.write(&packet::frame(payload)).unwrap();
        let mut buf = [0u8; 4096];
        let n = stub.read_nonblock(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(buf[0], ACK);
        packet::deframe(&buf[1..n]).unwrap()
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command(b"m100,4"), (&b"m"[..], &b"100,4"[..]));
        assert_eq!(split_command(b"vAttach;1"), (&b"vAttach"[..], &b"1"[..]));
        assert_eq!(
            split_command(b"qXfer:memory-map:read::0,200"),
            (&b"qXfer:memory-map:read"[..], &b"::0,200"[..])
        );
        assert_eq!(split_command(b"vFlashDone"), (&b"vFlashDone"[..], &b""[..]));
    }

    #[test]
    fn test_default_word_for_unwritten_memory() {
        let mut stub = DummyStub::new(DummyConfig {
            default_word: 1,
            ..Default::default()
        });
        assert_eq!(exchange(&mut stub, b"m40000000,4"), b"01000000");
        assert_eq!(exchange(&mut stub, b"X40000000,2:\xAA\xBB"), b"OK");
        assert_eq!(exchange(&mut stub, b"m40000000,4"), b"aabb0000");
    }

    #[test]
    fn test_read_fault() {
        let mut stub = DummyStub::new_default();
        stub.fail_reads(0x1000..0x1004);
        assert_eq!(exchange(&mut stub, b"m1002,4"), b"E03");
        assert_eq!(exchange(&mut stub, b"m1004,4"), b"00000000");
    }

    #[test]
    fn test_flash_write_only_clears_bits() {
        let xml = r#"<memory-map><memory type="flash" start="0x0" length="0x100">
            <property name="blocksize">0x80</property></memory></memory-map>"#;
        let mut stub = DummyStub::new(DummyConfig {
            memory_map_xml: Some(xml.to_string()),
            ..Default::default()
        });
        assert_eq!(stub.peek(0, 1), [0xFF]);
        assert_eq!(exchange(&mut stub, b"vFlashWrite:0:\x0F"), b"OK");
        assert_eq!(exchange(&mut stub, b"vFlashWrite:0:\xF0"), b"OK");
        assert_eq!(stub.peek(0, 1), [0x00]);
        assert_eq!(exchange(&mut stub, b"vFlashErase:0,80"), b"OK");
        assert_eq!(stub.peek(0, 1), [0xFF]);
        assert_eq!(exchange(&mut stub, b"vFlashErase:100,80"), b"E01");
    }

    #[test]
    fn test_interrupt_only_while_running() {
        let mut stub = DummyStub::new(DummyConfig {
            stop_signal: None,
            ..Default::default()
        });
        stub.write(&[INTERRUPT]).unwrap();
        assert!(stub.outgoing.is_empty());

        stub.write(&packet::frame(b"c")).unwrap();
        assert!(stub.is_running());
        stub.write(&[INTERRUPT]).unwrap();
        assert!(!stub.is_running());
        let out: Vec<u8> = stub.outgoing.drain(..).collect();
        assert_eq!(packet::deframe(&out).unwrap(), b"T02");
    }

    #[test]
    fn test_nak_resends_last_reply() {
        let mut stub = DummyStub::new_default();
        stub.corrupt_next_replies(1);
        stub.write(&packet::frame(b"?")).unwrap();
        let first: Vec<u8> = stub.outgoing.drain(..).collect();
        assert_eq!(packet::deframe(&first), None);

        stub.write(&[NAK]).unwrap();
        let second: Vec<u8> = stub.outgoing.drain(..).collect();
        assert_eq!(packet::deframe(&second).unwrap(), b"S05");
    }
}
