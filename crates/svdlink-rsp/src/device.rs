//! A debug target reached through a GDB server

use std::time::Duration;

use svdlink_core::flash::MemoryMap;
use svdlink_core::Result;

use crate::connection::Rsp;
use crate::features::Features;
use crate::packet::ACK;
use crate::protocol::DEFAULT_STUB_TIMEOUT;
use crate::transport::Transport;

/// Binary currently resident in target RAM
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoadedStub {
    pub address: u32,
    pub binary: Vec<u8>,
}

/// A target behind a GDB stub
///
/// Memory, register, flash, stub and monitor operations are implemented on
/// this type in their own modules. Every operation needs `&mut self`: the
/// protocol carries one request at a time. Use
/// [`SharedTarget`](crate::SharedTarget) to share a target between threads.
pub struct Target<T: Transport> {
    pub(crate) rsp: Rsp<T>,
    features: Features,
    pub(crate) memory_map: Option<MemoryMap>,
    pub(crate) loaded_stub: Option<LoadedStub>,
    pub(crate) stub_timeout: Duration,
}

impl<T: Transport> Target<T> {
    /// Open a session over `transport` with the default timeout
    pub fn new(transport: T) -> Result<Self> {
        Self::with_rsp(Rsp::new(transport))
    }

    /// Open a session with a custom receive timeout
    pub fn with_timeout(transport: T, timeout: Duration) -> Result<Self> {
        let mut rsp = Rsp::new(transport);
        rsp.set_timeout(timeout);
        Self::with_rsp(rsp)
    }

    fn with_rsp(mut rsp: Rsp<T>) -> Result<Self> {
        // Acknowledge anything the server may still be waiting on
        rsp.send_raw(&[ACK])?;
        rsp.discard_input()?;

        let reply = rsp.command(b"qSupported")?;
        let features = Features::parse(&reply);
        log::debug!(
            "rsp: remote supports {:?}, PacketSize=0x{:X}",
            features.supported().collect::<Vec<_>>(),
            features.packet_size()
        );

        Ok(Self {
            rsp,
            features,
            memory_map: None,
            loaded_stub: None,
            stub_timeout: DEFAULT_STUB_TIMEOUT,
        })
    }

    /// Features reported by `qSupported`
    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Maximum packet size the remote accepts
    pub fn packet_size(&self) -> usize {
        self.features.packet_size()
    }

    /// Receive timeout for ordinary replies
    pub fn timeout(&self) -> Duration {
        self.rsp.timeout()
    }

    /// Change the receive timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.rsp.set_timeout(timeout);
    }

    /// Default time a stub may run
    pub fn stub_timeout(&self) -> Duration {
        self.stub_timeout
    }

    /// Change the default stub timeout
    pub fn set_stub_timeout(&mut self, timeout: Duration) {
        self.stub_timeout = timeout;
    }

    /// Packet-level access for commands not wrapped by this type
    pub fn rsp_mut(&mut self) -> &mut Rsp<T> {
        &mut self.rsp
    }

    /// Known memory map, if probed or declared
    pub fn memory_map(&self) -> Option<&MemoryMap> {
        self.memory_map.as_ref()
    }

    /// Use a declared memory map instead of probing the target
    pub fn set_memory_map(&mut self, map: MemoryMap) {
        self.memory_map = Some(map);
    }

    /// Forget the resident stub so the next run reloads it
    pub fn invalidate_stub(&mut self) {
        self.loaded_stub = None;
    }

    /// Consume the target, returning the transport
    pub fn into_inner(self) -> T {
        self.rsp.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{reply, ScriptedTransport};

    #[test]
    fn test_handshake() {
        let transport = ScriptedTransport::new(&reply(b"PacketSize=4000;qXfer:memory-map:read+"));
        let target = Target::new(transport).unwrap();
        assert_eq!(target.packet_size(), 0x4000);
        assert!(target.features().is_supported("qXfer:memory-map:read"));

        let transport = target.into_inner();
        assert_eq!(transport.discards, 1);
        assert!(transport.written.starts_with(b"+$qSupported#37"));
        assert_eq!(transport.sent_packets(), vec![b"qSupported".to_vec()]);
    }
}
