//! Stub execution command

use std::path::Path;
use std::time::Duration;

use super::Context;

/// Load a raw binary, run it to its breakpoint and report
pub fn run_stub(
    ctx: &Context,
    input: &Path,
    address: Option<u32>,
    args: &[u32],
    timeout_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let binary = std::fs::read(input)?;
    let address = address
        .or(ctx.config().stub.load_address)
        .ok_or("No load address: use --address or set [stub] load_address")?;
    let timeout = timeout_ms.map(Duration::from_millis);

    let mut target = ctx.open()?;
    target.ensure_memory_map()?;
    log::info!(
        "Running {} ({} bytes) at 0x{:08X}",
        input.display(),
        binary.len(),
        address
    );
    target.run_stub(&binary, address, args, timeout)?;

    let registers = target.read_registers()?;
    println!("Stub returned r0 = 0x{:08X}", registers.first().copied().unwrap_or_default());
    Ok(())
}
