//! Probe and target management commands

use super::{format_size, Context};

/// List the targets the probe knows about
///
/// With a scan configured, opening the session has already scanned.
pub fn run_targets(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let mut target = ctx.open()?;
    let targets = target.targets()?;

    if targets.is_empty() {
        println!("No targets found");
        return Ok(());
    }
    println!("{:>4}  {:<4} Name", "No.", "Att");
    for t in &targets {
        println!(
            "{:>4}  {:<4} {}",
            t.index,
            if t.connected { "*" } else { "" },
            t.name
        );
    }
    Ok(())
}

/// Show what the remote supports and what it is attached to
pub fn run_info(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let mut target = ctx.open()?;

    println!("Packet size: {} bytes", target.packet_size());
    let features: Vec<&str> = target.features().supported().collect();
    println!("Features: {}", features.join(" "));

    match target.target_name() {
        Ok(Some(name)) => println!("Attached: {}", name),
        Ok(None) => println!("Attached: none"),
        // Plain GDB servers have no target list
        Err(e) => log::debug!("No target list: {}", e),
    }

    let map = target.ensure_memory_map()?;
    for segment in &map.flash {
        println!(
            "Flash: 0x{:08X} - 0x{:08X} ({}, {} blocks of {})",
            segment.offset(),
            segment.offset() + segment.length(),
            format_size(segment.length()),
            segment.block_count(),
            format_size(segment.block_size())
        );
    }
    for ram in &map.ram {
        println!(
            "RAM:   0x{:08X} - 0x{:08X} ({})",
            ram.start,
            ram.top(),
            format_size(ram.length)
        );
    }
    Ok(())
}

/// Run a monitor command and print what it prints
pub fn run_monitor(ctx: &Context, command: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut target = ctx.open()?;
    let output = target.monitor_text(command)?;
    print!("{}", output);
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

/// Reset the target
pub fn run_reset(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let mut target = ctx.open()?;
    target.reset()?;
    println!("Target reset");
    Ok(())
}
