//! Flash programming command

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use svdlink_core::flash::CommitProgress;

use super::{format_size, Context};

/// Block progress on an indicatif bar
///
/// The bar is created lazily because the block count is only known once the
/// commit starts.
struct BlockProgress {
    bar: Option<ProgressBar>,
}

impl BlockProgress {
    fn new() -> Self {
        Self { bar: None }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message("done");
        }
    }
}

impl CommitProgress for BlockProgress {
    fn block(&mut self, addr: u32, done: usize, total: usize) {
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar
        });
        // A new segment restarts the count
        if bar.length() != Some(total as u64) {
            bar.set_length(total as u64);
        }
        bar.set_position(done.saturating_sub(1) as u64);
        bar.set_message(format!("0x{:08X}", addr));
    }
}

/// Program an Intel HEX file
pub fn run_flash(ctx: &Context, input: &Path, erase: bool) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(input)?;
    let mut target = ctx.open()?;

    let mut progress = BlockProgress::new();
    let result = target.flash_write_hex(&text, erase, &mut progress);
    progress.finish();
    let ((low, high), summaries) = result?;

    println!(
        "Programmed 0x{:08X} - 0x{:08X} ({})",
        low,
        high,
        format_size(high - low)
    );
    for summary in &summaries {
        println!(
            "  segment 0x{:08X}: {} block(s) written, CRC32 0x{:08X}",
            summary.base, summary.blocks_written, summary.crc32
        );
    }
    Ok(())
}
