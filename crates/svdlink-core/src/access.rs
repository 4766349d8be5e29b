//! Memory access seam between the register model and a transport
//!
//! [`MemoryAccess`] is the only thing the SVD accessors need from a target.
//! Implementors provide byte-level `read_memory`/`write_memory`; 32-bit word
//! access and single-bit operations have default implementations.
//!
//! The default bit operations are read-modify-write and therefore **not**
//! atomic with respect to the target itself (an interrupt handler or DMA may
//! change the word between the read and the write). Targets that expose
//! hardware set/clear aliases can override them; [`BitBand`] does this for
//! the Cortex-M3/M4 bit-band regions.

use crate::error::{Error, Result};

/// Byte and word access to target memory
pub trait MemoryAccess {
    /// Read `len` bytes starting at `addr`
    fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>>;

    /// Write `data` starting at `addr`
    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Read a little-endian 32-bit word. `addr` must be 4-byte aligned.
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        check_word_aligned(addr)?;
        let bytes = self.read_memory(addr, 4)?;
        let word: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::memory(addr, format!("expected 4 bytes, got {}", bytes.len())))?;
        let value = u32::from_le_bytes(word);
        log::trace!("read32 0x{:08X} = 0x{:08X}", addr, value);
        Ok(value)
    }

    /// Write a little-endian 32-bit word. `addr` must be 4-byte aligned.
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        check_word_aligned(addr)?;
        log::trace!("write32 0x{:08X} <- 0x{:08X}", addr, value);
        self.write_memory(addr, &value.to_le_bytes())
    }

    /// Set one bit of the word at `addr`
    fn set_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        let mask = bit_mask(bit)?;
        let value = self.read_u32(addr)?;
        self.write_u32(addr, value | mask)
    }

    /// Clear one bit of the word at `addr`
    fn clear_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        let mask = bit_mask(bit)?;
        let value = self.read_u32(addr)?;
        self.write_u32(addr, value & !mask)
    }

    /// Test one bit of the word at `addr`
    fn is_bit_set(&mut self, addr: u32, bit: u8) -> Result<bool> {
        let mask = bit_mask(bit)?;
        Ok(self.read_u32(addr)? & mask != 0)
    }
}

impl<M: MemoryAccess + ?Sized> MemoryAccess for &mut M {
    fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        (**self).read_memory(addr, len)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).write_memory(addr, data)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        (**self).write_u32(addr, value)
    }

    fn set_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        (**self).set_bit(addr, bit)
    }

    fn clear_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        (**self).clear_bit(addr, bit)
    }

    fn is_bit_set(&mut self, addr: u32, bit: u8) -> Result<bool> {
        (**self).is_bit_set(addr, bit)
    }
}

impl<M: MemoryAccess + ?Sized> MemoryAccess for Box<M> {
    fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        (**self).read_memory(addr, len)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).write_memory(addr, data)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        (**self).write_u32(addr, value)
    }

    fn set_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        (**self).set_bit(addr, bit)
    }

    fn clear_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        (**self).clear_bit(addr, bit)
    }

    fn is_bit_set(&mut self, addr: u32, bit: u8) -> Result<bool> {
        (**self).is_bit_set(addr, bit)
    }
}

/// Reject word accesses to unaligned addresses
pub fn check_word_aligned(addr: u32) -> Result<()> {
    if addr & 3 != 0 {
        return Err(Error::Misaligned(addr));
    }
    Ok(())
}

fn bit_mask(bit: u8) -> Result<u32> {
    if bit >= 32 {
        return Err(Error::InvalidArgument(format!("bit {} out of range", bit)));
    }
    Ok(1 << bit)
}

/// Bit-band region: (region start, region length, alias base)
const BIT_BAND_REGIONS: [(u32, u32, u32); 2] = [
    // SRAM
    (0x2000_0000, 0x0010_0000, 0x2200_0000),
    // Peripherals
    (0x4000_0000, 0x0010_0000, 0x4200_0000),
];

/// Cortex-M3/M4 bit-band strategy
///
/// Bits inside the SRAM and peripheral bit-band regions are set, cleared and
/// tested with a single word access to their alias address, which the core
/// performs atomically. Anything outside those regions falls back to the
/// wrapped target's own bit operations.
pub struct BitBand<M> {
    inner: M,
}

impl<M: MemoryAccess> BitBand<M> {
    /// Wrap a target
    pub fn new(inner: M) -> Self {
        Self { inner }
    }

    /// Unwrap the target
    pub fn into_inner(self) -> M {
        self.inner
    }

    /// Borrow the wrapped target
    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    /// Alias word address for `bit` of the word at `addr`, if it is bit-banded
    pub fn alias_address(addr: u32, bit: u8) -> Option<u32> {
        if bit >= 32 {
            return None;
        }
        BIT_BAND_REGIONS
            .iter()
            .find(|(start, len, _)| addr >= *start && addr - start < *len)
            .map(|(start, _, alias)| alias + (addr - start) * 32 + u32::from(bit) * 4)
    }
}

impl<M: MemoryAccess> MemoryAccess for BitBand<M> {
    fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.inner.read_memory(addr, len)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.inner.write_memory(addr, data)
    }

    fn set_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        match Self::alias_address(addr, bit) {
            Some(alias) => self.inner.write_u32(alias, 1),
            None => self.inner.set_bit(addr, bit),
        }
    }

    fn clear_bit(&mut self, addr: u32, bit: u8) -> Result<()> {
        match Self::alias_address(addr, bit) {
            Some(alias) => self.inner.write_u32(alias, 0),
            None => self.inner.clear_bit(addr, bit),
        }
    }

    fn is_bit_set(&mut self, addr: u32, bit: u8) -> Result<bool> {
        match Self::alias_address(addr, bit) {
            Some(alias) => Ok(self.inner.read_u32(alias)? & 1 != 0),
            None => self.inner.is_bit_set(addr, bit),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Sparse memory that records every access
    #[derive(Default)]
    pub(crate) struct MockMemory {
        pub bytes: BTreeMap<u32, u8>,
        pub reads: Vec<(u32, usize)>,
        pub writes: Vec<(u32, Vec<u8>)>,
    }

    impl MockMemory {
        pub fn with_word(addr: u32, value: u32) -> Self {
            let mut mem = Self::default();
            for (i, b) in value.to_le_bytes().iter().enumerate() {
                mem.bytes.insert(addr + i as u32, *b);
            }
            mem
        }

        pub fn word(&self, addr: u32) -> u32 {
            let mut buf = [0u8; 4];
            for (i, b) in buf.iter_mut().enumerate() {
                *b = *self.bytes.get(&(addr + i as u32)).unwrap_or(&0);
            }
            u32::from_le_bytes(buf)
        }
    }

    impl MemoryAccess for MockMemory {
        fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
            self.reads.push((addr, len));
            Ok((0..len as u32)
                .map(|i| *self.bytes.get(&(addr + i)).unwrap_or(&0))
                .collect())
        }

        fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
            self.writes.push((addr, data.to_vec()));
            for (i, b) in data.iter().enumerate() {
                self.bytes.insert(addr + i as u32, *b);
            }
            Ok(())
        }
    }

    #[test]
    fn test_word_roundtrip_little_endian() {
        let mut mem = MockMemory::default();
        mem.write_u32(0x100, 0x1234_5678).unwrap();
        assert_eq!(mem.writes[0].1, vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(mem.read_u32(0x100).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_misaligned_word_access_rejected() {
        let mut mem = MockMemory::default();
        assert!(matches!(mem.read_u32(0x102), Err(Error::Misaligned(0x102))));
        assert!(matches!(
            mem.write_u32(0x101, 0),
            Err(Error::Misaligned(0x101))
        ));
        assert!(mem.reads.is_empty());
        assert!(mem.writes.is_empty());
    }

    #[test]
    fn test_rmw_bit_operations() {
        let mut mem = MockMemory::with_word(0x40, 0b1000);
        mem.set_bit(0x40, 0).unwrap();
        assert_eq!(mem.word(0x40), 0b1001);
        mem.clear_bit(0x40, 3).unwrap();
        assert_eq!(mem.word(0x40), 0b0001);
        assert!(mem.is_bit_set(0x40, 0).unwrap());
        assert!(!mem.is_bit_set(0x40, 3).unwrap());
        assert!(mem.set_bit(0x40, 32).is_err());
    }

    #[test]
    fn test_bit_band_alias_address() {
        assert_eq!(BitBand::<MockMemory>::alias_address(0x2000_0000, 0), Some(0x2200_0000));
        assert_eq!(BitBand::<MockMemory>::alias_address(0x2000_0004, 3), Some(0x2200_008C));
        assert_eq!(BitBand::<MockMemory>::alias_address(0x4001_080C, 5), Some(0x4221_0194));
        assert_eq!(BitBand::<MockMemory>::alias_address(0x0800_0000, 0), None);
        assert_eq!(BitBand::<MockMemory>::alias_address(0x2010_0000, 0), None);
    }

    #[test]
    fn test_bit_band_uses_single_write() {
        let mut banded = BitBand::new(MockMemory::default());
        banded.set_bit(0x4001_080C, 5).unwrap();
        let mem = banded.into_inner();
        assert!(mem.reads.is_empty());
        assert_eq!(mem.writes, vec![(0x4221_0194, vec![1, 0, 0, 0])]);
    }

    #[test]
    fn test_bit_band_falls_back_outside_regions() {
        let mut banded = BitBand::new(MockMemory::with_word(0xE000_E100, 0));
        banded.set_bit(0xE000_E100, 2).unwrap();
        assert_eq!(banded.inner_mut().word(0xE000_E100), 0b100);
        assert_eq!(banded.inner_mut().reads.len(), 1);
    }
}
