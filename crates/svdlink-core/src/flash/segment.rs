//! Flash segment with per-block staging

use crate::error::{Error, FlashOp, Result};

/// Value of erased flash
pub const ERASE_VALUE: u8 = 0xFF;

/// A contiguous flash region with a fixed erase block size
///
/// Writes are staged into blocks in host memory. A block is either unset
/// (nothing staged, will not be touched on commit) or holds exactly
/// `block_size` bytes, where any byte that was never staged reads as
/// [`ERASE_VALUE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSegment {
    offset: u32,
    length: u32,
    block_size: u32,
    blocks: Vec<Option<Vec<u8>>>,
}

impl FlashSegment {
    /// Create an empty segment
    ///
    /// `length` must be a non-zero multiple of `block_size`.
    pub fn new(offset: u32, length: u32, block_size: u32) -> Result<Self> {
        if block_size == 0 || length == 0 || length % block_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "flash segment at 0x{:08X}: length 0x{:X} is not a multiple of block size 0x{:X}",
                offset, length, block_size
            )));
        }
        if offset.checked_add(length - 1).is_none() {
            return Err(Error::InvalidArgument(format!(
                "flash segment at 0x{:08X} with length 0x{:X} wraps the address space",
                offset, length
            )));
        }
        let count = (length / block_size) as usize;
        Ok(Self {
            offset,
            length,
            block_size,
            blocks: vec![None; count],
        })
    }

    /// Start address
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Length in bytes
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Erase block size in bytes
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Check if an address is within this segment
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.offset && addr - self.offset < self.length
    }

    /// Bytes available from `addr` to the end of the segment
    pub fn remaining_from(&self, addr: u32) -> u32 {
        self.offset + (self.length - 1) - addr + 1
    }

    /// Whether any block has staged data
    pub fn is_dirty(&self) -> bool {
        self.blocks.iter().any(Option::is_some)
    }

    /// Number of blocks with staged data
    pub fn dirty_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    /// Staged content of block `index`, if any
    pub fn block(&self, index: usize) -> Option<&[u8]> {
        self.blocks.get(index).and_then(|b| b.as_deref())
    }

    /// Iterate over staged blocks as (start address, content)
    pub fn dirty_blocks(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.blocks.iter().enumerate().filter_map(move |(i, b)| {
            b.as_deref()
                .map(|data| (self.offset + i as u32 * self.block_size, data))
        })
    }

    /// Splice `data` into the blocks starting at `addr`
    ///
    /// The whole range must lie inside this segment.
    pub fn stage(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.contains(addr) || (data.len() as u64) > u64::from(self.remaining_from(addr)) {
            return Err(Error::flash(
                FlashOp::Stage,
                addr,
                format!(
                    "{} bytes do not fit in segment 0x{:08X}+0x{:X}",
                    data.len(),
                    self.offset,
                    self.length
                ),
            ));
        }

        let block_size = self.block_size as usize;
        let mut rel = (addr - self.offset) as usize;
        let mut rest = data;
        while !rest.is_empty() {
            let index = rel / block_size;
            let within = rel % block_size;
            let take = rest.len().min(block_size - within);

            let block = self.blocks[index].get_or_insert_with(|| vec![ERASE_VALUE; block_size]);
            block[within..within + take].copy_from_slice(&rest[..take]);

            rest = &rest[take..];
            rel += take;
        }
        Ok(())
    }

    /// Full segment image with unset blocks as erased flash
    pub fn image(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length as usize);
        for block in &self.blocks {
            match block {
                Some(data) => out.extend_from_slice(data),
                None => out.resize(out.len() + self.block_size as usize, ERASE_VALUE),
            }
        }
        out
    }

    /// Drop all staged data
    pub fn clear(&mut self) {
        for block in &mut self.blocks {
            *block = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_geometry() {
        assert!(FlashSegment::new(0, 0x1000, 0).is_err());
        assert!(FlashSegment::new(0, 0x1001, 0x400).is_err());
        assert!(FlashSegment::new(0xFFFF_F000, 0x2000, 0x400).is_err());
        let seg = FlashSegment::new(0x0800_0000, 0x1000, 0x400).unwrap();
        assert_eq!(seg.block_count(), 4);
        assert!(!seg.is_dirty());
    }

    #[test]
    fn test_stage_middle_of_block_pads_with_erase_value() {
        let mut seg = FlashSegment::new(0x0800_0000, 0x1000, 0x400).unwrap();
        seg.stage(0x0800_0410, &[0xAA; 10]).unwrap();

        assert_eq!(seg.dirty_count(), 1);
        assert!(seg.block(0).is_none());
        let block = seg.block(1).unwrap();
        assert_eq!(block.len(), 0x400);
        assert!(block[..0x10].iter().all(|&b| b == 0xFF));
        assert_eq!(&block[0x10..0x1A], &[0xAA; 10]);
        assert!(block[0x1A..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_stage_spanning_blocks_and_merging() {
        let mut seg = FlashSegment::new(0, 0x800, 0x400).unwrap();
        seg.stage(0x3FE, &[1, 2, 3, 4]).unwrap();
        assert_eq!(seg.dirty_count(), 2);
        assert_eq!(&seg.block(0).unwrap()[0x3FE..], &[1, 2]);
        assert_eq!(&seg.block(1).unwrap()[..2], &[3, 4]);

        // A later partial write keeps the earlier content around it
        seg.stage(0x3FF, &[9]).unwrap();
        assert_eq!(&seg.block(0).unwrap()[0x3FE..], &[1, 9]);
    }

    #[test]
    fn test_stage_outside_segment_fails() {
        let mut seg = FlashSegment::new(0x1000, 0x400, 0x400).unwrap();
        assert!(seg.stage(0x0FFF, &[0]).is_err());
        assert!(seg.stage(0x13FF, &[0, 0]).is_err());
        assert!(seg.stage(0x13FF, &[0]).is_ok());
    }

    #[test]
    fn test_image_and_clear() {
        let mut seg = FlashSegment::new(0, 0x20, 0x10).unwrap();
        seg.stage(0x12, &[0x00]).unwrap();
        let image = seg.image();
        assert_eq!(image.len(), 0x20);
        assert_eq!(image[0x12], 0x00);
        assert_eq!(image.iter().filter(|&&b| b == 0xFF).count(), 0x1F);

        seg.clear();
        assert!(!seg.is_dirty());
        assert_eq!(seg.dirty_blocks().count(), 0);
    }
}
