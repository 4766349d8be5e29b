//! Device tree built from an SVD file
//!
//! The tree only stores offsets. Absolute addresses are computed by the
//! navigation handles in [`super::access`] as parent address plus offset.

use std::collections::HashMap;

use super::enums::EnumTable;

/// Anything stored in a [`NodeList`]
pub trait Named {
    /// Name used for lookup
    fn name(&self) -> &str;
}

/// A single element, or the elements of a `NAME[%s]` array
#[derive(Debug, Clone, PartialEq)]
pub enum Node<T> {
    /// Plain element
    Single(T),
    /// Indexable array, element names are `NAME[<index>]`
    Group {
        /// Array name without the `[%s]` suffix
        name: String,
        /// Elements in index order
        elements: Vec<T>,
    },
}

impl<T: Named> Node<T> {
    /// Name used for lookup
    pub fn name(&self) -> &str {
        match self {
            Node::Single(item) => item.name(),
            Node::Group { name, .. } => name,
        }
    }

    /// The element, or all elements of the group
    pub fn elements(&self) -> &[T] {
        match self {
            Node::Single(item) => std::slice::from_ref(item),
            Node::Group { elements, .. } => elements,
        }
    }
}

/// Ordered nodes with a name index
#[derive(Debug, Clone, PartialEq)]
pub struct NodeList<T> {
    nodes: Vec<Node<T>>,
    index: HashMap<String, usize>,
}

impl<T> Default for NodeList<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Named> NodeList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, replacing an existing one with the same name in place
    ///
    /// Returns true if a node was replaced.
    pub fn insert(&mut self, node: Node<T>) -> bool {
        match self.index.get(node.name()) {
            Some(&i) => {
                self.nodes[i] = node;
                true
            }
            None => {
                self.index.insert(node.name().to_string(), self.nodes.len());
                self.nodes.push(node);
                false
            }
        }
    }

    /// Look up a node by name
    pub fn get(&self, name: &str) -> Option<&Node<T>> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Nodes in declaration order
    pub fn iter(&self) -> std::slice::Iter<'_, Node<T>> {
        self.nodes.iter()
    }

    /// Node names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().map(Node::name)
    }

    /// Every element, with groups flattened
    pub fn leaves(&self) -> impl Iterator<Item = &T> + '_ {
        self.nodes.iter().flat_map(Node::elements)
    }

    /// Number of nodes (a group counts once)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// CPU description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    /// Core name, e.g. `CM3`
    pub name: String,
    /// Core revision, e.g. `r1p1`
    pub revision: Option<String>,
}

/// A microcontroller: peripherals in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub(crate) name: String,
    pub(crate) cpu: Option<Cpu>,
    pub(crate) peripherals: Vec<Peripheral>,
    pub(crate) index: HashMap<String, usize>,
}

impl Device {
    pub(crate) fn new(name: String, cpu: Option<Cpu>) -> Self {
        Self {
            name,
            cpu,
            peripherals: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn push(&mut self, peripheral: Peripheral) -> bool {
        match self.index.get(&peripheral.name) {
            Some(&i) => {
                self.peripherals[i] = peripheral;
                true
            }
            None => {
                self.index
                    .insert(peripheral.name.clone(), self.peripherals.len());
                self.peripherals.push(peripheral);
                false
            }
        }
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Peripheral> {
        self.index.get(name).map(|&i| &self.peripherals[i])
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CPU description, if the file has one
    pub fn cpu(&self) -> Option<&Cpu> {
        self.cpu.as_ref()
    }

    /// Peripheral names in declaration order
    pub fn peripheral_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.peripherals.iter().map(|p| p.name.as_str())
    }
}

/// A memory-mapped peripheral
#[derive(Debug, Clone, PartialEq)]
pub struct Peripheral {
    /// Peripheral name
    pub name: String,
    /// Whitespace-normalised description
    pub description: Option<String>,
    /// Base address
    pub base_address: u32,
    /// Peripheral this one was cloned from
    pub derived_from: Option<String>,
    /// Registers and clusters
    pub block: RegisterBlock,
}

impl Named for Peripheral {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Registers and clusters of a peripheral or cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterBlock {
    /// Registers in declaration order
    pub registers: NodeList<Register>,
    /// Clusters in declaration order
    pub clusters: NodeList<Cluster>,
}

impl RegisterBlock {
    /// Whether both blocks have the same register and cluster names,
    /// recursively through nested clusters
    pub fn same_layout(&self, other: &RegisterBlock) -> bool {
        let mut ours: Vec<&str> = self.registers.names().collect();
        let mut theirs: Vec<&str> = other.registers.names().collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        if ours != theirs {
            return false;
        }

        let mut ours: Vec<&str> = self.clusters.names().collect();
        let mut theirs: Vec<&str> = other.clusters.names().collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        if ours != theirs {
            return false;
        }

        self.clusters.iter().all(|node| {
            let Some(other_node) = other.clusters.get(node.name()) else {
                return false;
            };
            node.elements().len() == other_node.elements().len()
                && node
                    .elements()
                    .iter()
                    .zip(other_node.elements())
                    .all(|(a, b)| a.block.same_layout(&b.block))
        })
    }
}

/// A group of registers at an offset from its parent
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Whitespace-normalised description
    pub description: Option<String>,
    /// Offset from the parent address
    pub offset: u32,
    /// Nested registers and clusters
    pub block: RegisterBlock,
}

impl Named for Cluster {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A 32-bit register
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    /// Register name
    pub name: String,
    /// Whitespace-normalised description
    pub description: Option<String>,
    /// Offset from the parent address
    pub offset: u32,
    /// Bit fields
    pub fields: NodeList<Field>,
}

impl Named for Register {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A bit range within a register
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Whitespace-normalised description
    pub description: Option<String>,
    /// Lowest bit
    pub bit_offset: u8,
    /// Width in bits, 1..=32
    pub bit_width: u8,
    /// Enumerated value names
    pub enums: EnumTable,
}

impl Field {
    /// Mask of the field's value before shifting
    pub fn value_mask(&self) -> u32 {
        if self.bit_width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bit_width) - 1
        }
    }

    /// Mask of the field's bits within the register
    pub fn register_mask(&self) -> u32 {
        self.value_mask() << self.bit_offset
    }
}

impl Named for Field {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(name: &str, offset: u32) -> Register {
        Register {
            name: name.to_string(),
            description: None,
            offset,
            fields: NodeList::new(),
        }
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut list = NodeList::new();
        assert!(!list.insert(Node::Single(register("CR", 0))));
        assert!(!list.insert(Node::Single(register("SR", 4))));
        assert!(list.insert(Node::Single(register("CR", 8))));

        assert_eq!(list.names().collect::<Vec<_>>(), vec!["CR", "SR"]);
        assert_eq!(list.get("CR").unwrap().elements()[0].offset, 8);
    }

    #[test]
    fn test_group_leaves() {
        let mut list = NodeList::new();
        list.insert(Node::Group {
            name: "DATA".to_string(),
            elements: vec![register("DATA[0]", 0), register("DATA[1]", 4)],
        });
        list.insert(Node::Single(register("CTRL", 8)));
        assert_eq!(list.len(), 2);
        assert_eq!(list.leaves().count(), 3);
        assert!(list.get("DATA[0]").is_none());
    }

    #[test]
    fn test_field_masks() {
        let field = Field {
            name: "MODE".to_string(),
            description: None,
            bit_offset: 4,
            bit_width: 2,
            enums: EnumTable::default(),
        };
        assert_eq!(field.value_mask(), 0b11);
        assert_eq!(field.register_mask(), 0b11_0000);

        let full = Field {
            bit_offset: 0,
            bit_width: 32,
            ..field
        };
        assert_eq!(full.register_mask(), u32::MAX);
    }

    #[test]
    fn test_same_layout_checks_nested_clusters() {
        let mut inner = RegisterBlock::default();
        inner.registers.insert(Node::Single(register("A", 0)));
        let mut a = RegisterBlock::default();
        a.clusters.insert(Node::Single(Cluster {
            name: "CH".to_string(),
            description: None,
            offset: 0x10,
            block: inner.clone(),
        }));
        let b = a.clone();
        assert!(a.same_layout(&b));

        let mut c = a.clone();
        inner.registers.insert(Node::Single(register("B", 4)));
        c.clusters.insert(Node::Single(Cluster {
            name: "CH".to_string(),
            description: None,
            offset: 0x10,
            block: inner,
        }));
        assert!(!a.same_layout(&c));
    }
}
