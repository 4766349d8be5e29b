//! Raw memory commands

use svdlink_core::access::MemoryAccess;

use super::Context;

/// Read `length` bytes at `address` and print a hex dump
pub fn run_read(ctx: &Context, address: u32, length: u32) -> Result<(), Box<dyn std::error::Error>> {
    let mut target = ctx.open()?;
    let data = target.read_memory(address, length as usize)?;
    print!("{}", hex_dump(address, &data));
    Ok(())
}

/// Write one word
pub fn run_write32(ctx: &Context, address: u32, value: u32) -> Result<(), Box<dyn std::error::Error>> {
    let mut target = ctx.open()?;
    target.write_u32(address, value)?;
    log::info!("Wrote 0x{:08X} to 0x{:08X}", value, address);
    Ok(())
}

/// Sixteen bytes per line, with an ASCII column
fn hex_dump(address: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "0x{:08x}: {:<47}  {}\n",
            address.wrapping_add((i * 16) as u32),
            hex.join(" "),
            ascii
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump() {
        let data: Vec<u8> = (0x41..0x41 + 18).collect();
        let text = hex_dump(0x2000_0000, &data);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0x20000000: 41 42 43"));
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].starts_with("0x20000010: 51 52"));
        assert!(lines[1].ends_with("QR"));
    }

    #[test]
    fn test_hex_dump_masks_control_bytes() {
        let text = hex_dump(0, &[0x00, 0x7F, b'a']);
        assert!(text.trim_end().ends_with("..a"));
    }
}
