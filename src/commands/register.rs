//! SVD register commands

use std::fmt::Write as _;

use svdlink_core::access::{BitBand, MemoryAccess};
use svdlink_core::config::parse_number;
use svdlink_core::svd::{Device, FieldRef, Resolved};

use super::Context;

/// Read a register or field and print its value
pub fn run_get(ctx: &Context, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let device = ctx.device()?;
    let mut target = ctx.open()?;
    let value = device.bind(&mut target).read(path)?;
    println!("{} = {}", path, value);
    Ok(())
}

/// Write a register or field
///
/// Bit-band aliases are used for single-bit fields when requested on the
/// command line or in the configuration.
pub fn run_set(
    ctx: &Context,
    path: &str,
    value: &str,
    bit_band: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = ctx.device()?;
    let mut target = ctx.open()?;
    if bit_band || ctx.config().device.bit_band {
        set_path(&device, &mut BitBand::new(&mut target), path, value)?;
    } else {
        set_path(&device, &mut target, path, value)?;
    }
    log::info!("{} <- {}", path, value);
    Ok(())
}

/// Read and render a peripheral, cluster, register or field
pub fn run_dump(ctx: &Context, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let device = ctx.device()?;
    let mut target = ctx.open()?;
    print!("{}", device.bind(&mut target).dump(path)?);
    Ok(())
}

/// Describe the model without a target
pub fn run_svd(ctx: &Context, path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let device = ctx.device()?;
    print!("{}", describe(&device, path)?);
    Ok(())
}

/// Write a number, or an enumerated value name if `value` is not a number
fn set_path<M: MemoryAccess>(
    device: &Device,
    mem: &mut M,
    path: &str,
    value: &str,
) -> svdlink_core::Result<()> {
    match parse_number(value) {
        Ok(number) => device.bind(mem).write(path, number),
        Err(_) => match device.resolve(path)? {
            Resolved::Field(f) => f.set_named(mem, value),
            other => Err(svdlink_core::Error::InvalidArgument(format!(
                "{}: {:?} is not a number, and only fields have named values",
                other.path(),
                value
            ))),
        },
    }
}

/// Text description of the node at `path`, or of the whole device
fn describe(device: &Device, path: Option<&str>) -> svdlink_core::Result<String> {
    let mut out = String::new();
    let Some(path) = path else {
        let _ = write!(out, "{}", device.name());
        if let Some(cpu) = device.cpu() {
            let _ = write!(out, " ({}", cpu.name);
            if let Some(revision) = &cpu.revision {
                let _ = write!(out, " {}", revision);
            }
            out.push(')');
        }
        out.push('\n');
        for p in device.peripherals() {
            let _ = writeln!(
                out,
                "  0x{:08X}  {:<16} {}",
                p.address(),
                p.name(),
                p.description().unwrap_or_default()
            );
        }
        return Ok(out);
    };

    match device.resolve(path)? {
        Resolved::Peripheral(p) => {
            if let Some(base) = p.derived_from() {
                let _ = writeln!(out, "{} (derived from {})", p.name(), base);
            }
            for r in p.registers() {
                let _ = writeln!(out, "  0x{:08X}  {}", r.address(), r.path());
            }
        }
        Resolved::Cluster(c) => {
            for r in c.registers() {
                let _ = writeln!(out, "  0x{:08X}  {}", r.address(), r.path());
            }
        }
        Resolved::Register(r) => {
            let _ = writeln!(
                out,
                "0x{:08X}  {}  {}",
                r.address(),
                r.path(),
                r.description().unwrap_or_default()
            );
            let mut fields = r.fields();
            fields.sort_by_key(|f| std::cmp::Reverse(f.bit_offset()));
            for f in &fields {
                let _ = writeln!(out, "  {:<7} {:<16} {}", bits(f), f.name(), f.description().unwrap_or_default());
            }
        }
        Resolved::Field(f) => {
            let _ = writeln!(
                out,
                "0x{:08X}  {}  {}  {}",
                f.address(),
                bits(&f),
                f.path(),
                f.description().unwrap_or_default()
            );
            for e in f.model().enums.iter() {
                let _ = writeln!(
                    out,
                    "  {:<16} {:?}  {}",
                    e.name,
                    e.matcher,
                    e.description.as_deref().unwrap_or_default()
                );
            }
        }
        Resolved::ClusterGroup(g) => {
            for c in g.iter() {
                let _ = writeln!(out, "  0x{:08X}  {}", c.address(), c.path());
            }
        }
        Resolved::RegisterGroup(g) => {
            for r in g.iter() {
                let _ = writeln!(out, "  0x{:08X}  {}", r.address(), r.path());
            }
        }
        Resolved::FieldGroup(g) => {
            for f in g.iter() {
                let _ = writeln!(out, "  {:<7} {}", bits(f), f.path());
            }
        }
    }
    Ok(out)
}

/// `[hi:lo]`, or `[n]` for one bit
fn bits(f: &FieldRef<'_>) -> String {
    let lo = f.bit_offset();
    let hi = lo + f.bit_width() - 1;
    if hi == lo {
        format!("[{}]", lo)
    } else {
        format!("[{}:{}]", hi, lo)
    }
}
