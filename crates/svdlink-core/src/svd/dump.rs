//! Register dump rendering
//!
//! ```text
//!             GPIOA.CRL
//!             | Port configuration register low
//! 0x40010800: 0x   4   4   4   4   4   4   4   4
//!             0b01000100010001000100010001000100
//!                                           ^^^^
//!                                           | +    MODE0 = 0x0 | Port 0 mode
//!                                           +--     CNF0 = 0x1 | Port 0 configuration
//! ```
//!
//! The register is read once and every field is decoded from that value.

use super::access::RegisterRef;
use crate::access::MemoryAccess;
use crate::error::Result;

const PAD: &str = "            ";
const WRAP: usize = 60;

/// Read and render several registers, separated by blank lines
pub fn render_registers<M: MemoryAccess + ?Sized>(
    registers: &[RegisterRef<'_>],
    mem: &mut M,
) -> Result<String> {
    let mut out = String::new();
    for register in registers {
        let value = register.get(mem)?;
        out.push_str(&render_register(register, value));
        out.push('\n');
    }
    Ok(out)
}

/// Render one register holding `value`
pub fn render_register(register: &RegisterRef<'_>, value: u32) -> String {
    let mut out = String::new();
    out.push_str(PAD);
    out.push_str(register.path());
    out.push('\n');

    if let Some(description) = register.description() {
        for line in wrap(description, WRAP) {
            out.push_str(PAD);
            out.push_str("| ");
            out.push_str(&line);
            out.push('\n');
        }
    }

    let digits: String = format!("{:08x}", value)
        .chars()
        .map(|c| format!("   {}", c))
        .collect();
    out.push_str(&format!("0x{:08x}: 0x{}\n", register.address(), digits));

    let mut fields = register.fields();
    fields.sort_by_key(|f| f.bit_offset());

    let mut lines = vec![format!("0b{:032b}", value)];
    if !fields.is_empty() {
        let mut underline = [' '; 32];
        for f in &fields {
            for bit in f.bit_offset()..f.bit_offset() + f.bit_width() {
                underline[31 - usize::from(bit)] = '^';
            }
        }
        lines.push(format!("  {}", String::from_iter(underline)));

        for (i, f) in fields.iter().enumerate() {
            let offset = usize::from(f.bit_offset());
            let mut map = [' '; 32];
            map[31 - offset] = '+';
            for c in &mut map[32 - offset..] {
                *c = '-';
            }
            for later in &fields[i + 1..] {
                map[31 - usize::from(later.bit_offset())] = '|';
            }

            let shown = format!("{} = {}", f.name(), f.decode(value));
            let line = format!(
                "  {} {:>14} | {}",
                String::from_iter(map),
                shown,
                f.description().unwrap_or_default()
            );
            lines.push(line.trim_end().to_string());
        }
    }

    for line in lines {
        out.push_str(PAD);
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Greedy word wrap
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
