//! Enumerated field values
//!
//! An `<enumeratedValue>` either names one value or, with `isDefault`, every
//! value of the field not named by another entry. Values are written in
//! decimal, `0x` hex, or binary with a `0b` or `#` prefix. Binary patterns may
//! contain `x` for don't-care bits, so `0b1x` names both 2 and 3.

use crate::config::parse_number;
use crate::error::{Error, Result};

/// Which raw values an entry names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Values where `raw & mask == value`
    Bits {
        /// Required bit values
        value: u32,
        /// Bits that must match
        mask: u32,
    },
    /// Everything not matched by an explicit entry
    Default,
}

impl Matcher {
    /// Parse a `<value>` text
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim().to_ascii_lowercase();
        let binary = text.strip_prefix("0b").or_else(|| text.strip_prefix('#'));
        let Some(bits) = binary else {
            let value = parse_number(&text).map_err(|e| Error::parse("enumeratedValue", e))?;
            return Ok(Matcher::Bits {
                value,
                mask: u32::MAX,
            });
        };

        if bits.is_empty() || bits.len() > 32 {
            return Err(Error::parse(
                "enumeratedValue",
                format!("binary pattern {:?} must have 1 to 32 digits", text),
            ));
        }
        let mut value = 0u32;
        let mut dont_care = 0u32;
        for c in bits.chars() {
            value <<= 1;
            dont_care <<= 1;
            match c {
                '0' => {}
                '1' => value |= 1,
                'x' => dont_care |= 1,
                _ => {
                    return Err(Error::parse(
                        "enumeratedValue",
                        format!("invalid binary digit {:?} in {:?}", c, text),
                    ))
                }
            }
        }
        Ok(Matcher::Bits {
            value,
            mask: !dont_care,
        })
    }

    /// Whether an explicit pattern matches `raw`. Always false for
    /// [`Matcher::Default`].
    pub fn matches(&self, raw: u32) -> bool {
        match *self {
            Matcher::Bits { value, mask } => raw & mask == value,
            Matcher::Default => false,
        }
    }
}

/// One named value of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedValue {
    /// Value name
    pub name: String,
    /// Whitespace-normalised description
    pub description: Option<String>,
    /// Values this entry names
    pub matcher: Matcher,
}

/// All enumerated values of a field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumTable {
    values: Vec<EnumeratedValue>,
}

impl EnumTable {
    /// Build a table. At most one entry should be a default.
    pub fn new(values: Vec<EnumeratedValue>) -> Self {
        Self { values }
    }

    /// Entry naming `raw`, explicit entries first
    pub fn lookup(&self, raw: u32) -> Option<&EnumeratedValue> {
        self.values
            .iter()
            .find(|e| e.matcher.matches(raw))
            .or_else(|| self.values.iter().find(|e| e.matcher == Matcher::Default))
    }

    /// Entry with the given name
    pub fn by_name(&self, name: &str) -> Option<&EnumeratedValue> {
        self.values.iter().find(|e| e.name == name)
    }

    /// Entries in declaration order
    pub fn iter(&self) -> std::slice::Iter<'_, EnumeratedValue> {
        self.values.iter()
    }

    /// Whether the field has no enumerated values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
