//! Session lock for multi-threaded callers

use std::sync::{Arc, Mutex, MutexGuard};

use svdlink_core::access::MemoryAccess;
use svdlink_core::{Error, Result};

use crate::device::Target;
use crate::transport::Transport;

/// A [`Target`] shared between threads
///
/// Each [`MemoryAccess`] call holds the lock for its whole duration, so a
/// read-modify-write bit operation cannot interleave with another host
/// thread. Longer sequences should hold [`SharedTarget::lock`] themselves.
pub struct SharedTarget<T: Transport> {
    inner: Arc<Mutex<Target<T>>>,
}

impl<T: Transport> Clone for SharedTarget<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedTarget<T> {
    /// Wrap a target
    pub fn new(target: Target<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(target)),
        }
    }

    /// Take the session lock
    pub fn lock(&self) -> Result<MutexGuard<'_, Target<T>>> {
        self.inner
            .lock()
            .map_err(|_| Error::Protocol("session lock poisoned by a panicked thread".to_string()))
    }
}

impl<T: Transport> MemoryAccess for SharedTarget<T> {
    fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.lock()?.read_memory(addr, len)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.lock()?.write_memory(addr, data)
    }

    fn set_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        MemoryAccess::set_bit(&mut *self.lock()?, addr, bit)
    }

    fn clear_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        MemoryAccess::clear_bit(&mut *self.lock()?, addr, bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{replies, reply, ScriptedTransport};

    #[test]
    fn test_clones_share_one_session() {
        let mut script = reply(b"");
        script.extend_from_slice(&replies(&[&b"01000000"[..], b"OK"]));
        let target = Target::new(ScriptedTransport::new(&script)).unwrap();
        let mut a = SharedTarget::new(target);
        let b = a.clone();

        std::thread::spawn(move || a.set_bit(0x2000_0000, 1))
            .join()
            .unwrap()
            .unwrap();

        let mut guard = b.lock().unwrap();
        let sent = guard.rsp_mut().transport_mut().sent_packets();
        assert_eq!(sent[1], b"m20000000,00000004");
        assert_eq!(sent[2], b"X20000000,00000004:\x03\x00\x00\x00");
    }
}
