//! SVD XML to [`Device`] tree
//!
//! Only what is needed to build the tree is checked. Unknown elements are
//! ignored.

use std::fs;
use std::path::Path;

use roxmltree::Node as XmlNode;

use super::enums::{EnumTable, EnumeratedValue, Matcher};
use super::model::{Cluster, Cpu, Device, Field, Named, Node, Peripheral, Register, RegisterBlock};
use crate::config::parse_number;
use crate::error::{Error, Result};

impl Device {
    /// Load a device from an SVD file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        log::debug!("svd: parsing {}", path.display());
        Self::from_svd_str(&text)
    }

    /// Build a device from SVD text
    pub fn from_svd_str(xml: &str) -> Result<Self> {
        let mut options = roxmltree::ParsingOptions::default();
        options.allow_dtd = true;
        let doc = roxmltree::Document::parse_with_options(xml, options)
            .map_err(|e| Error::parse("SVD", e.to_string()))?;

        let root = doc.root_element();
        if !root.has_tag_name("device") {
            return Err(Error::parse(
                "SVD",
                format!("root element is <{}>, expected <device>", root.tag_name().name()),
            ));
        }

        let name = required_text(root, "name", "device")?;
        let cpu = child(root, "cpu")
            .map(|cpu| -> Result<Cpu> {
                Ok(Cpu {
                    name: required_text(cpu, "name", "cpu")?,
                    revision: text(cpu, "revision").map(str::to_string),
                })
            })
            .transpose()?;

        let mut device = Device::new(name, cpu);
        if let Some(peripherals) = child(root, "peripherals") {
            for node in children(peripherals, "peripheral") {
                let peripheral = build_peripheral(node, &device)?;
                if device.push(peripheral) {
                    log::warn!("svd: duplicate peripheral replaced an earlier one");
                }
            }
        }

        log::debug!(
            "svd: device {} with {} peripherals",
            device.name,
            device.peripherals.len()
        );
        Ok(device)
    }
}

fn build_peripheral(node: XmlNode<'_, '_>, device: &Device) -> Result<Peripheral> {
    let name = required_text(node, "name", "peripheral")?;
    let context = format!("peripheral {}", name);
    let description = description(node);
    let base_address = int(node, "baseAddress", &context)?;

    let mut peripheral = match node.attribute("derivedFrom") {
        Some(source_name) => {
            let source = device.find(source_name).ok_or_else(|| {
                Error::Model(format!(
                    "{} is derived from unknown peripheral {}",
                    name, source_name
                ))
            })?;
            let block = source.block.clone();
            if !block.same_layout(&source.block) {
                return Err(Error::Model(format!(
                    "{}: copy of {} has a different register layout",
                    name, source_name
                )));
            }
            Peripheral {
                name,
                description: description.or_else(|| source.description.clone()),
                base_address: base_address.unwrap_or(source.base_address),
                derived_from: Some(source_name.to_string()),
                block,
            }
        }
        None => Peripheral {
            base_address: base_address
                .ok_or_else(|| Error::parse(&context, "missing <baseAddress>"))?,
            name,
            description,
            derived_from: None,
            block: RegisterBlock::default(),
        },
    };

    if let Some(registers) = child(node, "registers") {
        merge_block(&mut peripheral.block, registers, &context)?;
    }
    Ok(peripheral)
}

/// Add every `<register>` and `<cluster>` below `node` to `block`
fn merge_block(block: &mut RegisterBlock, node: XmlNode<'_, '_>, context: &str) -> Result<()> {
    for element in node.children().filter(XmlNode::is_element) {
        match element.tag_name().name() {
            "register" => {
                let register = build_register(element, context)?;
                for item in expand(element, register, context)? {
                    block.registers.insert(item);
                }
            }
            "cluster" => {
                let cluster = build_cluster(element, context)?;
                for item in expand(element, cluster, context)? {
                    block.clusters.insert(item);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn build_cluster(node: XmlNode<'_, '_>, parent: &str) -> Result<Cluster> {
    let name = required_text(node, "name", parent)?;
    let context = format!("{}.{}", parent, name);
    let offset = int(node, "addressOffset", &context)?
        .ok_or_else(|| Error::parse(&context, "missing <addressOffset>"))?;

    let mut block = RegisterBlock::default();
    merge_block(&mut block, node, &context)?;

    Ok(Cluster {
        name,
        description: description(node),
        offset,
        block,
    })
}

fn build_register(node: XmlNode<'_, '_>, parent: &str) -> Result<Register> {
    let name = required_text(node, "name", parent)?;
    let context = format!("{}.{}", parent, name);
    let offset = int(node, "addressOffset", &context)?
        .ok_or_else(|| Error::parse(&context, "missing <addressOffset>"))?;

    let mut register = Register {
        name,
        description: description(node),
        offset,
        fields: Default::default(),
    };
    if let Some(fields) = child(node, "fields") {
        for element in children(fields, "field") {
            let field = build_field(element, &context)?;
            for item in expand(element, field, &context)? {
                register.fields.insert(item);
            }
        }
    }
    Ok(register)
}

fn build_field(node: XmlNode<'_, '_>, parent: &str) -> Result<Field> {
    let name = required_text(node, "name", parent)?;
    let context = format!("{}.{}", parent, name);
    if let Some(source) = node.attribute("derivedFrom") {
        return Err(Error::Model(format!(
            "{}: derived fields are not supported (derivedFrom={})",
            context, source
        )));
    }

    let (bit_offset, bit_width) = bit_position(node, &context)?;
    let enums = match child(node, "enumeratedValues") {
        Some(values) => build_enums(values, &context)?,
        None => EnumTable::default(),
    };

    Ok(Field {
        name,
        description: description(node),
        bit_offset,
        bit_width,
        enums,
    })
}

/// Decode exactly one of bitOffset/bitWidth, lsb/msb or bitRange
fn bit_position(node: XmlNode<'_, '_>, context: &str) -> Result<(u8, u8)> {
    let offset = int(node, "bitOffset", context)?;
    let lsb = int(node, "lsb", context)?;
    let range = text(node, "bitRange");

    let given = [offset.is_some(), lsb.is_some(), range.is_some()]
        .iter()
        .filter(|&&b| b)
        .count();
    if given != 1 {
        return Err(Error::Model(format!(
            "{}: expected exactly one of bitOffset/bitWidth, lsb/msb or bitRange, found {}",
            context, given
        )));
    }

    let (low, width) = if let Some(offset) = offset {
        let width = int(node, "bitWidth", context)?
            .ok_or_else(|| Error::Model(format!("{}: bitOffset without bitWidth", context)))?;
        (offset, width)
    } else if let Some(lsb) = lsb {
        let msb = int(node, "msb", context)?
            .ok_or_else(|| Error::Model(format!("{}: lsb without msb", context)))?;
        (lsb, msb.wrapping_sub(lsb).wrapping_add(1))
    } else {
        let range = range.unwrap_or_default();
        let (msb, lsb) = range
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .and_then(|r| r.split_once(':'))
            .ok_or_else(|| {
                Error::Model(format!("{}: bitRange {:?} is not [msb:lsb]", context, range))
            })?;
        let msb = parse_number(msb).map_err(|e| Error::parse(context, e))?;
        let lsb = parse_number(lsb).map_err(|e| Error::parse(context, e))?;
        (lsb, msb.wrapping_sub(lsb).wrapping_add(1))
    };

    if width == 0 || width > 32 || low >= 32 || low + width > 32 {
        return Err(Error::Model(format!(
            "{}: bits {}..{} do not fit in a 32-bit register",
            context,
            low,
            u64::from(low) + u64::from(width)
        )));
    }
    Ok((low as u8, width as u8))
}

fn build_enums(node: XmlNode<'_, '_>, context: &str) -> Result<EnumTable> {
    let mut values = Vec::new();
    for element in children(node, "enumeratedValue") {
        let name = required_text(element, "name", context)?;
        let matcher = match text(element, "value") {
            Some(value) => Matcher::parse(value)
                .map_err(|e| Error::parse(format!("{}.{}", context, name), e.to_string()))?,
            None if text(element, "isDefault").is_some_and(parse_bool) => Matcher::Default,
            None => {
                log::warn!(
                    "svd: {}: enumerated value {} has neither value nor isDefault",
                    context,
                    name
                );
                continue;
            }
        };
        values.push(EnumeratedValue {
            name,
            description: description(element),
            matcher,
        });
    }
    Ok(EnumTable::new(values))
}

/// `dim`, `dimIncrement` and the index tokens of a dimensioned element
struct DimSpec {
    increment: u32,
    indices: Vec<String>,
}

fn dim_spec(node: XmlNode<'_, '_>, context: &str) -> Result<Option<DimSpec>> {
    let Some(count) = int(node, "dim", context)? else {
        return Ok(None);
    };
    let increment = int(node, "dimIncrement", context)?
        .ok_or_else(|| Error::parse(context, "dim without dimIncrement"))?;

    let indices = match text(node, "dimIndex") {
        Some(index) => parse_dim_index(index, context)?,
        None => (0..count).map(|i| i.to_string()).collect(),
    };
    if indices.len() != count as usize {
        return Err(Error::Model(format!(
            "{}: dim is {} but dimIndex names {} elements",
            context,
            count,
            indices.len()
        )));
    }
    Ok(Some(DimSpec { increment, indices }))
}

/// `A,B,C`, `0-3` or `A-D`
fn parse_dim_index(index: &str, context: &str) -> Result<Vec<String>> {
    if index.contains(',') {
        return Ok(index.split(',').map(|t| t.trim().to_string()).collect());
    }
    let Some((first, last)) = index.split_once('-') else {
        return Ok(vec![index.to_string()]);
    };
    let (first, last) = (first.trim(), last.trim());

    if let (Ok(a), Ok(b)) = (first.parse::<u32>(), last.parse::<u32>()) {
        return Ok((a..=b).map(|i| i.to_string()).collect());
    }
    let mut a = first.chars();
    let mut b = last.chars();
    match (a.next(), a.next(), b.next(), b.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            Ok((a..=b).map(String::from).collect())
        }
        _ => Err(Error::parse(
            context,
            format!("unsupported dimIndex {:?}", index),
        )),
    }
}

/// Elements that can be replicated by `dim`
trait Dimensioned: Named + Clone {
    fn shift(&mut self, by: u32, context: &str) -> Result<()>;
    fn rename(&mut self, name: String);
}

impl Dimensioned for Register {
    fn shift(&mut self, by: u32, context: &str) -> Result<()> {
        self.offset = self
            .offset
            .checked_add(by)
            .ok_or_else(|| Error::Model(format!("{}: offset overflows", context)))?;
        Ok(())
    }

    fn rename(&mut self, name: String) {
        self.name = name;
    }
}

impl Dimensioned for Cluster {
    fn shift(&mut self, by: u32, context: &str) -> Result<()> {
        self.offset = self
            .offset
            .checked_add(by)
            .ok_or_else(|| Error::Model(format!("{}: offset overflows", context)))?;
        Ok(())
    }

    fn rename(&mut self, name: String) {
        self.name = name;
    }
}

impl Dimensioned for Field {
    fn shift(&mut self, by: u32, context: &str) -> Result<()> {
        let offset = u32::from(self.bit_offset) + by;
        if offset + u32::from(self.bit_width) > 32 {
            return Err(Error::Model(format!(
                "{}: element at bit {} does not fit in the register",
                context, offset
            )));
        }
        self.bit_offset = offset as u8;
        Ok(())
    }

    fn rename(&mut self, name: String) {
        self.name = name;
    }
}

/// Replicate `template` according to its `dim` elements
///
/// A name ending in `[%s]` becomes one indexable group, any other `%s` name
/// becomes distinct siblings.
fn expand<T: Dimensioned>(node: XmlNode<'_, '_>, template: T, parent: &str) -> Result<Vec<Node<T>>> {
    let context = format!("{}.{}", parent, template.name());
    let Some(dim) = dim_spec(node, &context)? else {
        return Ok(vec![Node::Single(template)]);
    };

    let pattern = template.name().to_string();
    if !pattern.contains("%s") {
        return Err(Error::Model(format!(
            "{}: dimensioned element name has no %s",
            context
        )));
    }

    let mut elements = Vec::with_capacity(dim.indices.len());
    for (i, token) in dim.indices.iter().enumerate() {
        let mut element = template.clone();
        element.shift(i as u32 * dim.increment, &context)?;
        element.rename(pattern.replace("%s", token));
        elements.push(element);
    }

    Ok(match pattern.strip_suffix("[%s]") {
        Some(group) => vec![Node::Group {
            name: group.to_string(),
            elements,
        }],
        None => elements.into_iter().map(Node::Single).collect(),
    })
}

fn child<'a, 'input>(node: XmlNode<'a, 'input>, tag: &str) -> Option<XmlNode<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn children<'a, 'input: 'a>(
    node: XmlNode<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = XmlNode<'a, 'input>> + 'a {
    node.children().filter(move |n| n.has_tag_name(tag))
}

/// Trimmed text of a child element, `None` if absent or empty
fn text<'a>(node: XmlNode<'a, '_>, tag: &str) -> Option<&'a str> {
    child(node, tag)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn required_text(node: XmlNode<'_, '_>, tag: &str, context: &str) -> Result<String> {
    text(node, tag)
        .map(str::to_string)
        .ok_or_else(|| Error::parse(context, format!("<{}> without <{}>", node.tag_name().name(), tag)))
}

fn int(node: XmlNode<'_, '_>, tag: &str, context: &str) -> Result<Option<u32>> {
    text(node, tag)
        .map(|t| parse_number(t).map_err(|e| Error::parse(context, format!("<{}>: {}", tag, e))))
        .transpose()
}

fn parse_bool(text: &str) -> bool {
    matches!(text.to_ascii_lowercase().as_str(), "1" | "true")
}

fn description(node: XmlNode<'_, '_>) -> Option<String> {
    text(node, "description").map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
}
