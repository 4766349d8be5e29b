//! GDB memory-map XML parsing
//!
//! Parses the document returned by `qXfer:memory-map:read`:
//!
//! ```xml
//! <memory-map>
//!   <memory type="ram" start="0x20000000" length="0x5000"/>
//!   <memory type="flash" start="0x8000000" length="0x10000">
//!     <property name="blocksize">0x400</property>
//!   </memory>
//! </memory-map>
//! ```

use super::{FlashSegment, MemoryMap, RamRegion};
use crate::config::parse_number;
use crate::error::{Error, Result};

const CONTEXT: &str = "memory map";

impl MemoryMap {
    /// Build a memory map from GDB memory-map XML
    ///
    /// Regions of any type other than `flash` and `ram` are logged and
    /// skipped.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut options = roxmltree::ParsingOptions::default();
        options.allow_dtd = true;
        let doc = roxmltree::Document::parse_with_options(xml, options)
            .map_err(|e| Error::parse(CONTEXT, e.to_string()))?;

        let mut map = MemoryMap::new();
        for memory in doc
            .root_element()
            .descendants()
            .filter(|n| n.has_tag_name("memory"))
        {
            let kind = memory.attribute("type").unwrap_or_default();
            match kind {
                "flash" => {
                    let start = number_attr(memory, "start")?;
                    let length = number_attr(memory, "length")?;
                    let block_size = memory
                        .children()
                        .find(|p| p.has_tag_name("property") && p.attribute("name") == Some("blocksize"))
                        .and_then(|p| p.text())
                        .ok_or_else(|| {
                            Error::parse(
                                CONTEXT,
                                format!("flash region at 0x{:08X} has no blocksize", start),
                            )
                        })?;
                    let block_size = parse_number(block_size)
                        .map_err(|e| Error::parse(CONTEXT, format!("blocksize: {}", e)))?;
                    map.flash.push(FlashSegment::new(start, length, block_size)?);
                }
                "ram" => {
                    map.ram.push(RamRegion {
                        start: number_attr(memory, "start")?,
                        length: number_attr(memory, "length")?,
                    });
                }
                other => {
                    log::warn!("memory map: skipping region of unknown type {:?}", other);
                }
            }
        }

        log::debug!(
            "memory map: {} flash segment(s), {} RAM region(s)",
            map.flash.len(),
            map.ram.len()
        );
        Ok(map)
    }
}

fn number_attr(node: roxmltree::Node<'_, '_>, name: &str) -> Result<u32> {
    let raw = node
        .attribute(name)
        .ok_or_else(|| Error::parse(CONTEXT, format!("<memory> without {} attribute", name)))?;
    parse_number(raw).map_err(|e| Error::parse(CONTEXT, format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BMP_MAP: &str = r#"<?xml version="1.0"?>
<!DOCTYPE memory-map PUBLIC "+//IDN gnu.org//DTD GDB Memory Map V1.0//EN" "http://sourceware.org/gdb/gdb-memory-map.dtd">
<memory-map>
  <memory type="ram" start="0x20000000" length="0x5000"/>
  <memory type="flash" start="0x8000000" length="0x10000">
    <property name="blocksize">0x400</property>
  </memory>
  <memory type="rom" start="0x1ffff000" length="0x800"/>
</memory-map>"#;

    #[test]
    fn test_parse_blackmagic_map() {
        let map = MemoryMap::from_xml(BMP_MAP).unwrap();
        assert_eq!(
            map.ram,
            vec![RamRegion {
                start: 0x2000_0000,
                length: 0x5000
            }]
        );
        assert_eq!(map.flash.len(), 1);
        assert_eq!(map.flash[0].offset(), 0x0800_0000);
        assert_eq!(map.flash[0].length(), 0x10000);
        assert_eq!(map.flash[0].block_size(), 0x400);
        assert_eq!(map.ram[0].top(), 0x2000_5000);
    }

    #[test]
    fn test_decimal_numbers_and_multiple_segments() {
        let xml = r#"<memory-map>
  <memory type="flash" start="0" length="2048"><property name="blocksize">1024</property></memory>
  <memory type="flash" start="2048" length="4096"><property name="blocksize">2048</property></memory>
</memory-map>"#;
        let map = MemoryMap::from_xml(xml).unwrap();
        assert_eq!(map.flash.len(), 2);
        assert_eq!(map.flash[1].block_count(), 2);
    }

    #[test]
    fn test_flash_without_blocksize_is_error() {
        let xml = r#"<memory-map><memory type="flash" start="0" length="1024"/></memory-map>"#;
        assert!(matches!(MemoryMap::from_xml(xml), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(MemoryMap::from_xml("<memory-map><memory").is_err());
    }
}
