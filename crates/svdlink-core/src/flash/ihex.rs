//! Intel HEX parsing
//!
//! Only the record types needed for flashing 32-bit microcontrollers are
//! handled:
//!
//! | Type | Meaning                    | Handling                  |
//! |------|----------------------------|---------------------------|
//! | 00   | Data                       | returned as a record      |
//! | 01   | End of file                | stops parsing             |
//! | 02   | Extended segment address   | base = value << 4         |
//! | 03   | Start segment address      | ignored                   |
//! | 04   | Extended linear address    | base = value << 16        |
//! | 05   | Start linear address       | ignored                   |

use crate::error::{Error, Result};

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_SEGMENT: u8 = 0x02;
const RECORD_START_SEGMENT: u8 = 0x03;
const RECORD_EXT_LINEAR: u8 = 0x04;
const RECORD_START_LINEAR: u8 = 0x05;

/// A data record with its absolute address resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// Absolute load address
    pub address: u32,
    /// Record payload
    pub data: Vec<u8>,
}

/// Parse an Intel HEX image into absolute data records
///
/// Every record's length and checksum are validated. Unknown record types
/// are an error.
pub fn parse_ihex(text: &str) -> Result<Vec<DataRecord>> {
    let mut records = Vec::new();
    let mut linear_base: u32 = 0;
    let mut segment_base: u32 = 0;

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let context = format!("HEX line {}", index + 1);

        let digits = line
            .strip_prefix(':')
            .ok_or_else(|| Error::parse(&context, "record does not start with ':'"))?;
        let bytes = hex::decode(digits).map_err(|e| Error::parse(&context, format!("invalid hex: {}", e)))?;
        if bytes.len() < 5 {
            return Err(Error::parse(&context, "record too short"));
        }

        let reclen = bytes[0] as usize;
        if bytes.len() != reclen + 5 {
            return Err(Error::parse(
                &context,
                format!("length byte says {} data bytes, found {}", reclen, bytes.len() - 5),
            ));
        }
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(Error::parse(&context, "checksum mismatch"));
        }

        let offset = u16::from_be_bytes([bytes[1], bytes[2]]);
        let rectype = bytes[3];
        let payload = &bytes[4..4 + reclen];

        match rectype {
            RECORD_DATA => {
                let address = linear_base
                    .wrapping_add(segment_base)
                    .wrapping_add(u32::from(offset));
                records.push(DataRecord {
                    address,
                    data: payload.to_vec(),
                });
            }
            RECORD_EOF => break,
            RECORD_EXT_SEGMENT => {
                segment_base = u32::from(be_u16(payload, &context)?) << 4;
            }
            RECORD_EXT_LINEAR => {
                linear_base = u32::from(be_u16(payload, &context)?) << 16;
            }
            RECORD_START_SEGMENT | RECORD_START_LINEAR => {
                log::debug!("ihex: ignoring start address record on {}", context);
            }
            other => {
                return Err(Error::parse(
                    &context,
                    format!("unknown record type 0x{:02X}", other),
                ));
            }
        }
    }

    Ok(records)
}

fn be_u16(payload: &[u8], context: &str) -> Result<u16> {
    match payload {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(Error::parse(context, "address record must carry 2 bytes")),
    }
}
