//! Flash programming model
//!
//! Flash programming happens in two phases:
//!
//! 1. **Staging** - data is spliced into the blocks of a [`FlashSegment`]
//!    in host memory ([`MemoryMap::stage`], [`MemoryMap::stage_ihex`]).
//! 2. **Commit** - every block with staged data is erased and written
//!    through a [`FlashBackend`], then the segment is closed with a single
//!    "done" and its staging state is cleared.
//!
//! Only dirty blocks are touched, so committing a segment with nothing
//! staged performs no I/O at all. A failed commit is not rolled back: the
//! caller must re-verify or re-flash.

mod ihex;
mod memmap;
mod segment;

pub use ihex::{parse_ihex, DataRecord};
pub use segment::{FlashSegment, ERASE_VALUE};

use crate::error::{Error, FlashOp, Result};
use crc::{Crc, CRC_32_ISO_HDLC};

/// CRC used for commit summaries (same polynomial as zlib's crc32)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Flash operations provided by a transport
///
/// Maps onto the GDB `vFlashErase`, `vFlashWrite` and `vFlashDone` packets.
pub trait FlashBackend {
    /// Largest payload accepted by a single [`FlashBackend::flash_write`]
    fn max_write_len(&self) -> usize;

    /// Erase `length` bytes starting at `addr`
    fn flash_erase(&mut self, addr: u32, length: u32) -> Result<()>;

    /// Program `data` at `addr` (at most [`FlashBackend::max_write_len`] bytes)
    fn flash_write(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Finish the erase/write operations of the segment at `base`
    fn flash_done(&mut self, base: u32) -> Result<()>;
}

/// Callback for progress reporting during commit
pub trait CommitProgress {
    /// Called before block `done` (1-based) of `total` is erased and written
    fn block(&mut self, addr: u32, done: usize, total: usize);
}

/// A no-op progress reporter
pub struct NoProgress;

impl CommitProgress for NoProgress {
    fn block(&mut self, _addr: u32, _done: usize, _total: usize) {}
}

/// Plain callbacks receive the percentage of blocks started so far
impl<F: FnMut(u32)> CommitProgress for F {
    fn block(&mut self, _addr: u32, done: usize, total: usize) {
        self((done * 100 / total.max(1)) as u32)
    }
}

/// Result of committing one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    /// Segment start address
    pub base: u32,
    /// Segment length in bytes
    pub length: u32,
    /// CRC32 of the whole segment image (unstaged blocks as 0xFF)
    pub crc32: u32,
    /// Number of blocks that were erased/written
    pub blocks_written: usize,
}

/// A RAM region from the target memory map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamRegion {
    /// Start address
    pub start: u32,
    /// Length in bytes
    pub length: u32,
}

impl RamRegion {
    /// One past the last address, used as initial stack pointer for stubs
    pub fn top(&self) -> u32 {
        self.start.wrapping_add(self.length)
    }
}

/// Flash segments and RAM regions of a target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMap {
    /// Flash segments in declaration order
    pub flash: Vec<FlashSegment>,
    /// RAM regions in declaration order
    pub ram: Vec<RamRegion>,
}

impl MemoryMap {
    /// Create an empty memory map
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any segment has staged data
    pub fn is_dirty(&self) -> bool {
        self.flash.iter().any(FlashSegment::is_dirty)
    }

    /// Stage `data` at `addr`, splitting across adjacent segments
    ///
    /// Every byte must land in some flash segment.
    pub fn stage(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let segment = self
                .flash
                .iter_mut()
                .find(|s| s.contains(addr))
                .ok_or_else(|| {
                    Error::flash(FlashOp::Stage, addr, "address is not inside any flash segment")
                })?;
            let take = rest.len().min(segment.remaining_from(addr) as usize);
            segment.stage(addr, &rest[..take])?;
            rest = &rest[take..];
            addr = addr.wrapping_add(take as u32);
        }
        Ok(())
    }

    /// Stage every data record of an Intel HEX image
    ///
    /// Returns the lowest address and one past the highest address staged.
    pub fn stage_ihex(&mut self, text: &str) -> Result<(u32, u32)> {
        let records = parse_ihex(text)?;
        let mut lowest = u32::MAX;
        let mut highest = 0u32;
        for record in &records {
            self.stage(record.address, &record.data)?;
            lowest = lowest.min(record.address);
            highest = highest.max(record.address.saturating_add(record.data.len() as u32));
        }
        log::debug!(
            "flash: staged {} HEX records covering 0x{:08X}..0x{:08X}",
            records.len(),
            lowest,
            highest
        );
        Ok((lowest, highest))
    }

    /// Commit every segment, in order
    pub fn commit_all<B, P>(
        &mut self,
        backend: &mut B,
        erase: bool,
        progress: &mut P,
    ) -> Result<Vec<CommitSummary>>
    where
        B: FlashBackend + ?Sized,
        P: CommitProgress,
    {
        self.flash
            .iter_mut()
            .map(|segment| commit(segment, backend, erase, progress))
            .collect()
    }
}

/// Erase and program every dirty block of `segment`, then close it
///
/// Returns the segment base, length and the CRC32 of the full segment image
/// as staged. On success the segment has no pending writes. On failure the
/// error names the operation and address; already programmed blocks are left
/// as they are and the staged data is kept.
pub fn commit<B, P>(
    segment: &mut FlashSegment,
    backend: &mut B,
    erase: bool,
    progress: &mut P,
) -> Result<CommitSummary>
where
    B: FlashBackend + ?Sized,
    P: CommitProgress,
{
    let summary = CommitSummary {
        base: segment.offset(),
        length: segment.length(),
        crc32: CRC32.checksum(&segment.image()),
        blocks_written: segment.dirty_count(),
    };

    let total = summary.blocks_written;
    if total == 0 {
        log::debug!("flash: segment 0x{:08X} has nothing staged", summary.base);
        return Ok(summary);
    }

    let chunk_len = backend.max_write_len().max(1);
    let block_size = segment.block_size();

    for (done, (block_addr, data)) in segment.dirty_blocks().enumerate() {
        progress.block(block_addr, done + 1, total);

        if erase {
            log::trace!("flash: erasing 0x{:08X}+0x{:X}", block_addr, block_size);
            backend.flash_erase(block_addr, block_size)?;
        }

        let mut addr = block_addr;
        for chunk in data.chunks(chunk_len) {
            backend.flash_write(addr, chunk)?;
            addr += chunk.len() as u32;
        }
    }

    backend.flash_done(summary.base)?;
    segment.clear();

    log::info!(
        "flash: committed {} block(s) in segment 0x{:08X}+0x{:X}, crc32 0x{:08X}",
        total,
        summary.base,
        summary.length,
        summary.crc32
    );
    Ok(summary)
}
