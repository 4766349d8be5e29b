//! `qSupported` reply parsing

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::DEFAULT_PACKET_SIZE;

/// Features advertised by the remote stub
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    supported: BTreeSet<String>,
    unsupported: BTreeSet<String>,
    properties: BTreeMap<String, String>,
}

impl Features {
    /// Parse a reply like `PacketSize=4000;qXfer:memory-map:read+;vContSupported-`
    pub fn parse(reply: &[u8]) -> Self {
        let mut features = Self::default();
        for item in String::from_utf8_lossy(reply).split(';') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if let Some((key, value)) = item.split_once('=') {
                features
                    .properties
                    .insert(key.to_string(), value.to_string());
            } else if let Some(name) = item.strip_suffix('+') {
                features.supported.insert(name.to_string());
            } else if let Some(name) = item.strip_suffix('-') {
                features.unsupported.insert(name.to_string());
            } else {
                log::debug!("rsp: ignoring qSupported entry {:?}", item);
            }
        }
        features
    }

    /// Whether the remote marked `name` with `+`
    pub fn is_supported(&self, name: &str) -> bool {
        self.supported.contains(name)
    }

    /// Whether the remote marked `name` with `-`
    pub fn is_unsupported(&self, name: &str) -> bool {
        self.unsupported.contains(name)
    }

    /// Raw `key=value` property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Property parsed as a hex number
    pub fn numeric(&self, key: &str) -> Option<u64> {
        self.property(key)
            .and_then(|v| u64::from_str_radix(v, 16).ok())
    }

    /// Maximum packet size the remote accepts
    pub fn packet_size(&self) -> usize {
        self.numeric("PacketSize")
            .and_then(|v| usize::try_from(v).ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_PACKET_SIZE)
    }

    /// Names of supported features
    pub fn supported(&self) -> impl Iterator<Item = &str> {
        self.supported.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bmp_reply() {
        let f = Features::parse(
            b"PacketSize=400;qXfer:memory-map:read+;qXfer:features:read+;vContSupported-",
        );
        assert_eq!(f.packet_size(), 0x400);
        assert!(f.is_supported("qXfer:memory-map:read"));
        assert!(f.is_unsupported("vContSupported"));
        assert!(!f.is_supported("vContSupported"));
        assert_eq!(f.supported().count(), 2);
    }

    #[test]
    fn test_default_packet_size() {
        assert_eq!(Features::parse(b"").packet_size(), DEFAULT_PACKET_SIZE);
        assert_eq!(
            Features::parse(b"PacketSize=zz").packet_size(),
            DEFAULT_PACKET_SIZE
        );
    }

    #[test]
    fn test_non_numeric_property_kept() {
        let f = Features::parse(b"Qbtrace:bts+;vendor=acme");
        assert_eq!(f.property("vendor"), Some("acme"));
        assert_eq!(f.numeric("vendor"), None);
    }
}
