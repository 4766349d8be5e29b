//! Navigation handles binding the device tree to target memory
//!
//! Handles borrow the [`Device`] and carry the address of their parent, so
//! every address is computed as parent address plus own offset. Nothing is
//! read or written until `get`/`set` is called with a [`MemoryAccess`].

use std::fmt;
use std::ops::Range;

use super::model::{Cluster, Device, Field, Named, Node, NodeList, Peripheral, Register, RegisterBlock};
use crate::access::MemoryAccess;
use crate::error::{Error, Result};

/// A field (or register) value with its width and enumerated name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    /// Extracted integer
    pub value: u32,
    /// Width in bits
    pub width: u8,
    /// Name of the matching enumerated value
    pub enum_name: Option<String>,
}

impl FieldValue {
    /// Number of hex digits needed for `width` bits
    pub fn hex_digits(&self) -> usize {
        1 + (usize::from(self.width.max(1)) - 1) / 4
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0width$x}", self.value, width = self.hex_digits())?;
        if let Some(name) = &self.enum_name {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

impl From<FieldValue> for u32 {
    fn from(v: FieldValue) -> u32 {
        v.value
    }
}

/// Nodes that accept an integer write
pub trait Writable {
    /// Write `value` to the node
    fn write<M: MemoryAccess + ?Sized>(&self, mem: &mut M, value: u32) -> Result<()>;
}

/// Any node reached by path resolution
#[derive(Debug, Clone)]
pub enum Resolved<'a> {
    /// A peripheral
    Peripheral(PeripheralRef<'a>),
    /// A cluster
    Cluster(ClusterRef<'a>),
    /// A register
    Register(RegisterRef<'a>),
    /// A field
    Field(FieldRef<'a>),
    /// An array of clusters
    ClusterGroup(GroupRef<ClusterRef<'a>>),
    /// An array of registers
    RegisterGroup(GroupRef<RegisterRef<'a>>),
    /// An array of fields
    FieldGroup(GroupRef<FieldRef<'a>>),
}

impl<'a> Resolved<'a> {
    /// Dotted path of the node
    pub fn path(&self) -> &str {
        match self {
            Resolved::Peripheral(p) => p.name(),
            Resolved::Cluster(c) => c.path(),
            Resolved::Register(r) => r.path(),
            Resolved::Field(f) => f.path(),
            Resolved::ClusterGroup(g) => g.path(),
            Resolved::RegisterGroup(g) => g.path(),
            Resolved::FieldGroup(g) => g.path(),
        }
    }

    fn child(self, component: &str) -> Result<Resolved<'a>> {
        match self {
            Resolved::Peripheral(p) => p.scope().child(component),
            Resolved::Cluster(c) => c.scope().child(component),
            Resolved::Register(r) => r.child(component),
            Resolved::Field(f) => Err(Error::Model(format!(
                "{} is a field and has no {}",
                f.path(),
                component
            ))),
            Resolved::ClusterGroup(_) | Resolved::RegisterGroup(_) | Resolved::FieldGroup(_) => {
                Err(Error::Model(format!(
                    "{} is an array, index it before accessing {}",
                    self.path(),
                    component
                )))
            }
        }
    }
}

/// Split `NAME[INDEX]` into its parts
fn split_index(component: &str) -> Result<(&str, Option<&str>)> {
    match component.split_once('[') {
        None => Ok((component, None)),
        Some((name, rest)) => rest
            .strip_suffix(']')
            .filter(|index| !index.is_empty())
            .map(|index| (name, Some(index)))
            .ok_or_else(|| Error::Model(format!("malformed path component {:?}", component))),
    }
}

/// Pick one element of a group by index token or position
fn pick<'n, T: Named>(elements: &'n [T], group: &str, index: &str) -> Option<&'n T> {
    let full = format!("{}[{}]", group, index);
    elements
        .iter()
        .find(|e| e.name() == full)
        .or_else(|| index.parse::<usize>().ok().and_then(|i| elements.get(i)))
}

/// Register block with the absolute address of its owner
#[derive(Debug, Clone)]
struct Scope<'a> {
    block: &'a RegisterBlock,
    address: u32,
    path: String,
}

impl<'a> Scope<'a> {
    fn child_path(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    fn register_ref(&self, register: &'a Register) -> RegisterRef<'a> {
        RegisterRef {
            register,
            parent_address: self.address,
            path: self.child_path(&register.name),
        }
    }

    fn cluster_ref(&self, cluster: &'a Cluster) -> ClusterRef<'a> {
        ClusterRef {
            cluster,
            parent_address: self.address,
            path: self.child_path(&cluster.name),
        }
    }

    fn register(&self, name: &str) -> Result<RegisterRef<'a>> {
        match self.block.registers.get(name) {
            Some(Node::Single(register)) => Ok(self.register_ref(register)),
            Some(Node::Group { .. }) => Err(Error::Model(format!(
                "{} is a register array",
                self.child_path(name)
            ))),
            None => Err(Error::Model(format!("no register {} in {}", name, self.path))),
        }
    }

    fn register_group(&self, name: &str) -> Result<GroupRef<RegisterRef<'a>>> {
        match self.block.registers.get(name) {
            Some(Node::Group { elements, .. }) => Ok(GroupRef {
                path: self.child_path(name),
                elements: elements.iter().map(|r| self.register_ref(r)).collect(),
            }),
            _ => Err(Error::Model(format!(
                "no register array {} in {}",
                name, self.path
            ))),
        }
    }

    fn cluster(&self, name: &str) -> Result<ClusterRef<'a>> {
        match self.block.clusters.get(name) {
            Some(Node::Single(cluster)) => Ok(self.cluster_ref(cluster)),
            Some(Node::Group { .. }) => Err(Error::Model(format!(
                "{} is a cluster array",
                self.child_path(name)
            ))),
            None => Err(Error::Model(format!("no cluster {} in {}", name, self.path))),
        }
    }

    fn cluster_group(&self, name: &str) -> Result<GroupRef<ClusterRef<'a>>> {
        match self.block.clusters.get(name) {
            Some(Node::Group { elements, .. }) => Ok(GroupRef {
                path: self.child_path(name),
                elements: elements.iter().map(|c| self.cluster_ref(c)).collect(),
            }),
            _ => Err(Error::Model(format!(
                "no cluster array {} in {}",
                name, self.path
            ))),
        }
    }

    fn child(&self, component: &str) -> Result<Resolved<'a>> {
        let (name, index) = split_index(component)?;

        if let Some(node) = self.block.registers.get(name) {
            return match (node, index) {
                (Node::Single(r), None) => Ok(Resolved::Register(self.register_ref(r))),
                (Node::Group { .. }, None) => self.register_group(name).map(Resolved::RegisterGroup),
                (Node::Group { elements, .. }, Some(index)) => pick(elements, name, index)
                    .map(|r| Resolved::Register(self.register_ref(r)))
                    .ok_or_else(|| self.bad_index(component)),
                (Node::Single(_), Some(_)) => Err(self.bad_index(component)),
            };
        }

        if let Some(node) = self.block.clusters.get(name) {
            return match (node, index) {
                (Node::Single(c), None) => Ok(Resolved::Cluster(self.cluster_ref(c))),
                (Node::Group { .. }, None) => self.cluster_group(name).map(Resolved::ClusterGroup),
                (Node::Group { elements, .. }, Some(index)) => pick(elements, name, index)
                    .map(|c| Resolved::Cluster(self.cluster_ref(c)))
                    .ok_or_else(|| self.bad_index(component)),
                (Node::Single(_), Some(_)) => Err(self.bad_index(component)),
            };
        }

        Err(Error::Model(format!(
            "no register or cluster {} in {}",
            name, self.path
        )))
    }

    fn bad_index(&self, component: &str) -> Error {
        Error::Model(format!("{} does not exist", self.child_path(component)))
    }

    /// Every register below this scope, sorted by address
    fn registers(&self) -> Vec<RegisterRef<'a>> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out.sort_by_key(RegisterRef::address);
        out
    }

    fn collect(&self, out: &mut Vec<RegisterRef<'a>>) {
        out.extend(self.block.registers.leaves().map(|r| self.register_ref(r)));
        for cluster in self.block.clusters.leaves() {
            self.cluster_ref(cluster).scope().collect(out);
        }
    }
}

/// Handle to a peripheral
#[derive(Debug, Clone, Copy)]
pub struct PeripheralRef<'a> {
    peripheral: &'a Peripheral,
}

impl<'a> PeripheralRef<'a> {
    /// Peripheral name
    pub fn name(&self) -> &'a str {
        &self.peripheral.name
    }

    /// Description, if any
    pub fn description(&self) -> Option<&'a str> {
        self.peripheral.description.as_deref()
    }

    /// Base address
    pub fn address(&self) -> u32 {
        self.peripheral.base_address
    }

    /// Name of the peripheral this one was derived from
    pub fn derived_from(&self) -> Option<&'a str> {
        self.peripheral.derived_from.as_deref()
    }

    /// Underlying model node
    pub fn model(&self) -> &'a Peripheral {
        self.peripheral
    }

    fn scope(&self) -> Scope<'a> {
        Scope {
            block: &self.peripheral.block,
            address: self.peripheral.base_address,
            path: self.peripheral.name.clone(),
        }
    }

    /// Register by name
    pub fn register(&self, name: &str) -> Result<RegisterRef<'a>> {
        self.scope().register(name)
    }

    /// Register array by name (without `[%s]`)
    pub fn register_group(&self, name: &str) -> Result<GroupRef<RegisterRef<'a>>> {
        self.scope().register_group(name)
    }

    /// Cluster by name
    pub fn cluster(&self, name: &str) -> Result<ClusterRef<'a>> {
        self.scope().cluster(name)
    }

    /// Cluster array by name (without `[%s]`)
    pub fn cluster_group(&self, name: &str) -> Result<GroupRef<ClusterRef<'a>>> {
        self.scope().cluster_group(name)
    }

    /// Register and cluster names in declaration order
    pub fn child_names(&self) -> Vec<&'a str> {
        block_names(&self.peripheral.block)
    }

    /// Every register, including those in clusters, sorted by address
    pub fn registers(&self) -> Vec<RegisterRef<'a>> {
        self.scope().registers()
    }
}

fn block_names(block: &RegisterBlock) -> Vec<&str> {
    block.registers.names().chain(block.clusters.names()).collect()
}

/// Handle to a cluster
#[derive(Debug, Clone)]
pub struct ClusterRef<'a> {
    cluster: &'a Cluster,
    parent_address: u32,
    path: String,
}

impl<'a> ClusterRef<'a> {
    /// Cluster name
    pub fn name(&self) -> &'a str {
        &self.cluster.name
    }

    /// Dotted path from the peripheral
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Description, if any
    pub fn description(&self) -> Option<&'a str> {
        self.cluster.description.as_deref()
    }

    /// Absolute address
    pub fn address(&self) -> u32 {
        self.parent_address.wrapping_add(self.cluster.offset)
    }

    fn scope(&self) -> Scope<'a> {
        Scope {
            block: &self.cluster.block,
            address: self.address(),
            path: self.path.clone(),
        }
    }

    /// Register by name
    pub fn register(&self, name: &str) -> Result<RegisterRef<'a>> {
        self.scope().register(name)
    }

    /// Register array by name
    pub fn register_group(&self, name: &str) -> Result<GroupRef<RegisterRef<'a>>> {
        self.scope().register_group(name)
    }

    /// Nested cluster by name
    pub fn cluster(&self, name: &str) -> Result<ClusterRef<'a>> {
        self.scope().cluster(name)
    }

    /// Nested cluster array by name
    pub fn cluster_group(&self, name: &str) -> Result<GroupRef<ClusterRef<'a>>> {
        self.scope().cluster_group(name)
    }

    /// Register and cluster names in declaration order
    pub fn child_names(&self) -> Vec<&'a str> {
        block_names(&self.cluster.block)
    }

    /// Every register below this cluster, sorted by address
    pub fn registers(&self) -> Vec<RegisterRef<'a>> {
        self.scope().registers()
    }
}

/// Handle to a register
#[derive(Debug, Clone)]
pub struct RegisterRef<'a> {
    register: &'a Register,
    parent_address: u32,
    path: String,
}

impl<'a> RegisterRef<'a> {
    /// Register name
    pub fn name(&self) -> &'a str {
        &self.register.name
    }

    /// Dotted path from the peripheral
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Description, if any
    pub fn description(&self) -> Option<&'a str> {
        self.register.description.as_deref()
    }

    /// Absolute address
    pub fn address(&self) -> u32 {
        self.parent_address.wrapping_add(self.register.offset)
    }

    fn field_ref(&self, field: &'a Field) -> FieldRef<'a> {
        FieldRef {
            field,
            register_address: self.address(),
            path: format!("{}.{}", self.path, field.name),
        }
    }

    /// Field by name
    pub fn field(&self, name: &str) -> Result<FieldRef<'a>> {
        match self.register.fields.get(name) {
            Some(Node::Single(field)) => Ok(self.field_ref(field)),
            Some(Node::Group { .. }) => Err(Error::Model(format!(
                "{}.{} is a field array",
                self.path, name
            ))),
            None => Err(Error::Model(format!("no field {} in {}", name, self.path))),
        }
    }

    /// Field array by name
    pub fn field_group(&self, name: &str) -> Result<GroupRef<FieldRef<'a>>> {
        match self.register.fields.get(name) {
            Some(Node::Group { elements, .. }) => Ok(GroupRef {
                path: format!("{}.{}", self.path, name),
                elements: elements.iter().map(|f| self.field_ref(f)).collect(),
            }),
            _ => Err(Error::Model(format!(
                "no field array {} in {}",
                name, self.path
            ))),
        }
    }

    /// Every field, arrays flattened, in declaration order
    pub fn fields(&self) -> Vec<FieldRef<'a>> {
        self.register
            .fields
            .leaves()
            .map(|f| self.field_ref(f))
            .collect()
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> Vec<&'a str> {
        self.register.fields.names().collect()
    }

    fn child(&self, component: &str) -> Result<Resolved<'a>> {
        let (name, index) = split_index(component)?;
        let fields: &'a NodeList<Field> = &self.register.fields;
        let missing = || Error::Model(format!("{}.{} does not exist", self.path, component));
        match (fields.get(name), index) {
            (Some(Node::Single(f)), None) => Ok(Resolved::Field(self.field_ref(f))),
            (Some(Node::Group { .. }), None) => self.field_group(name).map(Resolved::FieldGroup),
            (Some(Node::Group { elements, .. }), Some(index)) => pick(elements, name, index)
                .map(|f| Resolved::Field(self.field_ref(f)))
                .ok_or_else(missing),
            _ => Err(missing()),
        }
    }

    /// Read the register
    pub fn get<M: MemoryAccess + ?Sized>(&self, mem: &mut M) -> Result<u32> {
        mem.read_u32(self.address())
    }

    /// Write the whole register
    pub fn set<M: MemoryAccess + ?Sized>(&self, mem: &mut M, value: u32) -> Result<()> {
        mem.write_u32(self.address(), value)
    }

    /// Set one bit
    pub fn set_bit<M: MemoryAccess + ?Sized>(&self, mem: &mut M, bit: u8) -> Result<()> {
        mem.set_bit(self.address(), bit)
    }

    /// Clear one bit
    pub fn clear_bit<M: MemoryAccess + ?Sized>(&self, mem: &mut M, bit: u8) -> Result<()> {
        mem.clear_bit(self.address(), bit)
    }

    /// Test one bit
    pub fn is_bit_set<M: MemoryAccess + ?Sized>(&self, mem: &mut M, bit: u8) -> Result<bool> {
        mem.is_bit_set(self.address(), bit)
    }
}

impl Writable for RegisterRef<'_> {
    fn write<M: MemoryAccess + ?Sized>(&self, mem: &mut M, value: u32) -> Result<()> {
        self.set(mem, value)
    }
}

/// Handle to a field
#[derive(Debug, Clone)]
pub struct FieldRef<'a> {
    field: &'a Field,
    register_address: u32,
    path: String,
}

impl<'a> FieldRef<'a> {
    /// Field name
    pub fn name(&self) -> &'a str {
        &self.field.name
    }

    /// Dotted path from the peripheral
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Description, if any
    pub fn description(&self) -> Option<&'a str> {
        self.field.description.as_deref()
    }

    /// Address of the containing register
    pub fn address(&self) -> u32 {
        self.register_address
    }

    /// Lowest bit
    pub fn bit_offset(&self) -> u8 {
        self.field.bit_offset
    }

    /// Width in bits
    pub fn bit_width(&self) -> u8 {
        self.field.bit_width
    }

    /// Underlying model node
    pub fn model(&self) -> &'a Field {
        self.field
    }

    /// Interpret the field's bits of a register word
    pub fn decode(&self, register_value: u32) -> FieldValue {
        self.value_of((register_value >> self.field.bit_offset) & self.field.value_mask())
    }

    fn value_of(&self, value: u32) -> FieldValue {
        FieldValue {
            value,
            width: self.field.bit_width,
            enum_name: self.field.enums.lookup(value).map(|e| e.name.clone()),
        }
    }

    /// Read the field
    pub fn get<M: MemoryAccess + ?Sized>(&self, mem: &mut M) -> Result<FieldValue> {
        let addr = self.register_address;
        let raw = match self.field.bit_width {
            1 => u32::from(mem.is_bit_set(addr, self.field.bit_offset)?),
            32 => mem.read_u32(addr)?,
            _ => (mem.read_u32(addr)? >> self.field.bit_offset) & self.field.value_mask(),
        };
        Ok(self.value_of(raw))
    }

    /// Write the field without disturbing the rest of the register
    ///
    /// `value` is masked to the field width.
    pub fn set<M: MemoryAccess + ?Sized>(&self, mem: &mut M, value: u32) -> Result<()> {
        let addr = self.register_address;
        let masked = value & self.field.value_mask();
        if masked != value {
            log::warn!(
                "{}: value 0x{:X} truncated to {} bit(s) as 0x{:X}",
                self.path,
                value,
                self.field.bit_width,
                masked
            );
        }

        match self.field.bit_width {
            1 if masked != 0 => mem.set_bit(addr, self.field.bit_offset),
            1 => mem.clear_bit(addr, self.field.bit_offset),
            32 => mem.write_u32(addr, masked),
            _ => {
                let current = mem.read_u32(addr)?;
                let updated = (current & !self.field.register_mask()) | (masked << self.field.bit_offset);
                mem.write_u32(addr, updated)
            }
        }
    }

    /// Write an enumerated value by name
    pub fn set_named<M: MemoryAccess + ?Sized>(&self, mem: &mut M, name: &str) -> Result<()> {
        let entry = self
            .field
            .enums
            .by_name(name)
            .ok_or_else(|| Error::Model(format!("{} has no value named {}", self.path, name)))?;
        match entry.matcher {
            super::enums::Matcher::Bits { value, .. } => self.set(mem, value),
            super::enums::Matcher::Default => Err(Error::Model(format!(
                "{}: {} is a catch-all and has no single value",
                self.path, name
            ))),
        }
    }
}

impl Writable for FieldRef<'_> {
    fn write<M: MemoryAccess + ?Sized>(&self, mem: &mut M, value: u32) -> Result<()> {
        self.set(mem, value)
    }
}

/// Handle to an array of registers, clusters or fields
#[derive(Debug, Clone)]
pub struct GroupRef<T> {
    path: String,
    elements: Vec<T>,
}

impl<T> GroupRef<T> {
    /// Dotted path of the array
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Result<&T> {
        self.elements.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "{}[{}] out of range (len {})",
                self.path,
                index,
                self.elements.len()
            ))
        })
    }

    /// Elements in index order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }
}

impl<T: Writable> GroupRef<T> {
    /// Write one element
    pub fn set<M: MemoryAccess + ?Sized>(&self, mem: &mut M, index: usize, value: u32) -> Result<()> {
        self.get(index)?.write(mem, value)
    }

    /// Write `values` to the elements in `range`, in order
    ///
    /// Nothing is written if the lengths differ or the range is out of bounds.
    pub fn assign<M: MemoryAccess + ?Sized>(
        &self,
        mem: &mut M,
        range: Range<usize>,
        values: &[u32],
    ) -> Result<()> {
        if range.end > self.elements.len() || range.start > range.end {
            return Err(Error::InvalidArgument(format!(
                "{}[{}..{}] out of range (len {})",
                self.path,
                range.start,
                range.end,
                self.elements.len()
            )));
        }
        if range.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{}: {} values for {} elements",
                self.path,
                values.len(),
                range.len()
            )));
        }
        for (element, &value) in self.elements[range].iter().zip(values) {
            element.write(mem, value)?;
        }
        Ok(())
    }
}

impl<'a> GroupRef<RegisterRef<'a>> {
    /// Read every register of the array
    pub fn get_all<M: MemoryAccess + ?Sized>(&self, mem: &mut M) -> Result<Vec<u32>> {
        self.elements.iter().map(|r| r.get(mem)).collect()
    }
}

impl<'a> GroupRef<FieldRef<'a>> {
    /// Read every field of the array
    pub fn get_all<M: MemoryAccess + ?Sized>(&self, mem: &mut M) -> Result<Vec<FieldValue>> {
        self.elements.iter().map(|f| f.get(mem)).collect()
    }
}

impl Device {
    /// Peripheral by name
    pub fn peripheral(&self, name: &str) -> Result<PeripheralRef<'_>> {
        self.find(name)
            .map(|peripheral| PeripheralRef { peripheral })
            .ok_or_else(|| Error::Model(format!("no peripheral {} in {}", name, self.name)))
    }

    /// Peripherals in declaration order
    pub fn peripherals(&self) -> impl Iterator<Item = PeripheralRef<'_>> + '_ {
        self.peripherals.iter().map(|peripheral| PeripheralRef { peripheral })
    }

    /// Resolve a dotted path such as `DMA1.CH[2].CCR.EN`
    pub fn resolve(&self, path: &str) -> Result<Resolved<'_>> {
        let mut components = path.trim().split('.');
        let first = components.next().unwrap_or_default();
        let (name, index) = split_index(first)?;
        if index.is_some() {
            return Err(Error::Model(format!("peripheral {} cannot be indexed", name)));
        }

        let mut node = Resolved::Peripheral(self.peripheral(name)?);
        for component in components {
            node = node.child(component)?;
        }
        Ok(node)
    }

    /// Bind this device to target memory
    pub fn bind<M: MemoryAccess>(&self, mem: M) -> BoundDevice<'_, M> {
        BoundDevice { device: self, mem }
    }
}

/// A device bound to target memory for path-based access
pub struct BoundDevice<'d, M> {
    device: &'d Device,
    mem: M,
}

impl<'d, M: MemoryAccess> BoundDevice<'d, M> {
    /// The device model
    pub fn device(&self) -> &'d Device {
        self.device
    }

    /// The bound memory
    pub fn memory(&mut self) -> &mut M {
        &mut self.mem
    }

    /// Unbind and return the memory
    pub fn into_inner(self) -> M {
        self.mem
    }

    /// Read a register or field by path
    ///
    /// Registers are returned as 32-bit values without enumeration.
    pub fn read(&mut self, path: &str) -> Result<FieldValue> {
        match self.device.resolve(path)? {
            Resolved::Register(r) => Ok(FieldValue {
                value: r.get(&mut self.mem)?,
                width: 32,
                enum_name: None,
            }),
            Resolved::Field(f) => f.get(&mut self.mem),
            other => Err(Error::Model(format!(
                "{} is not a register or field",
                other.path()
            ))),
        }
    }

    /// Write a register or field by path
    pub fn write(&mut self, path: &str, value: u32) -> Result<()> {
        match self.device.resolve(path)? {
            Resolved::Register(r) => r.set(&mut self.mem, value),
            Resolved::Field(f) => f.set(&mut self.mem, value),
            other => Err(Error::Model(format!(
                "{} is not a register or field",
                other.path()
            ))),
        }
    }

    /// Render a peripheral, cluster, register or array as a register dump
    pub fn dump(&mut self, path: &str) -> Result<String> {
        let registers = match self.device.resolve(path)? {
            Resolved::Peripheral(p) => p.registers(),
            Resolved::Cluster(c) => c.registers(),
            Resolved::Register(r) => vec![r],
            Resolved::RegisterGroup(g) => g.elements,
            Resolved::ClusterGroup(g) => g.iter().flat_map(ClusterRef::registers).collect(),
            Resolved::Field(f) => {
                let value = f.get(&mut self.mem)?;
                return Ok(format!("{} = {}\n", f.path(), value));
            }
            Resolved::FieldGroup(g) => {
                let mut out = String::new();
                for f in g.iter() {
                    out.push_str(&format!("{} = {}\n", f.path(), f.get(&mut self.mem)?));
                }
                return Ok(out);
            }
        };
        super::dump::render_registers(&registers, &mut self.mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tests::MockMemory;
    use crate::svd::enums::EnumTable;

    const SVD: &str = r#"<device><name>TEST</name><peripherals>
<peripheral><name>GPIOA</name><baseAddress>0x40010800</baseAddress><registers>
  <register><name>CRL</name><addressOffset>0x0</addressOffset><fields>
    <field><name>MODE0</name><bitOffset>0</bitOffset><bitWidth>2</bitWidth>
      <enumeratedValues>
        <enumeratedValue><name>Input</name><value>0</value></enumeratedValue>
        <enumeratedValue><name>Output</name><value>0b1x</value></enumeratedValue>
      </enumeratedValues></field>
    <field><name>CNF0</name><bitOffset>2</bitOffset><bitWidth>2</bitWidth></field>
  </fields></register>
  <register><name>ODR</name><addressOffset>0xC</addressOffset><fields>
    <field><dim>16</dim><dimIncrement>1</dimIncrement><name>ODR[%s]</name>
      <bitOffset>0</bitOffset><bitWidth>1</bitWidth></field>
    <field><name>ALL</name><bitOffset>0</bitOffset><bitWidth>32</bitWidth></field>
  </fields></register>
  <cluster><dim>2</dim><dimIncrement>0x20</dimIncrement><name>CH[%s]</name>
    <addressOffset>0x40</addressOffset>
    <register><name>CFG</name><addressOffset>0x4</addressOffset></register>
    <cluster><name>SUB</name><addressOffset>0x10</addressOffset>
      <register><name>VAL</name><addressOffset>0x8</addressOffset></register>
    </cluster>
  </cluster>
</registers></peripheral>
<peripheral derivedFrom="GPIOA"><name>GPIOB</name><baseAddress>0x40010C00</baseAddress></peripheral>
</peripherals></device>"#;

    fn device() -> Device {
        Device::from_svd_str(SVD).unwrap()
    }

    #[test]
    fn test_addresses_are_parent_plus_offset() {
        let device = device();
        let gpioa = device.peripheral("GPIOA").unwrap();
        assert_eq!(gpioa.register("ODR").unwrap().address(), 0x4001_080C);

        let ch1 = gpioa.cluster_group("CH").unwrap();
        let ch1 = ch1.get(1).unwrap();
        assert_eq!(ch1.address(), 0x4001_0860);
        assert_eq!(ch1.register("CFG").unwrap().address(), 0x4001_0864);
        let val = ch1.cluster("SUB").unwrap().register("VAL").unwrap();
        assert_eq!(val.address(), 0x4001_0878);
        assert_eq!(val.path(), "GPIOA.CH[1].SUB.VAL");

        // Derived peripheral: same layout at its own base
        let gpiob = device.peripheral("GPIOB").unwrap();
        assert_eq!(gpiob.register("ODR").unwrap().address(), 0x4001_0C0C);
        let val = gpiob.cluster_group("CH").unwrap();
        let val = val.get(0).unwrap().cluster("SUB").unwrap().register("VAL").unwrap();
        assert_eq!(val.address(), 0x4001_0C58);
    }

    #[test]
    fn test_resolve_paths() {
        let device = device();
        match device.resolve("GPIOA.CH[1].SUB.VAL").unwrap() {
            Resolved::Register(r) => assert_eq!(r.address(), 0x4001_0878),
            other => panic!("unexpected {other:?}"),
        }
        match device.resolve("GPIOA.ODR.ODR[3]").unwrap() {
            Resolved::Field(f) => assert_eq!(f.bit_offset(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            device.resolve("GPIOA.ODR.ODR").unwrap(),
            Resolved::FieldGroup(g) if g.len() == 16
        ));
        assert!(matches!(device.resolve("GPIOA"), Ok(Resolved::Peripheral(_))));
        assert!(matches!(device.resolve("GPIOC.ODR"), Err(Error::Model(_))));
        assert!(matches!(device.resolve("GPIOA.CH.CFG"), Err(Error::Model(_))));
        assert!(matches!(device.resolve("GPIOA.CH[2]"), Err(Error::Model(_))));
        assert!(matches!(device.resolve("GPIOA.CRL.MODE0.X"), Err(Error::Model(_))));
        assert!(matches!(device.resolve("GPIOA.CRL[0]"), Err(Error::Model(_))));
    }

    #[test]
    fn test_field_read_with_enum() {
        let device = device();
        let mode = device
            .peripheral("GPIOA")
            .unwrap()
            .register("CRL")
            .unwrap()
            .field("MODE0")
            .unwrap();

        let mut mem = MockMemory::with_word(0x4001_0800, 0b1111_0011);
        let value = mode.get(&mut mem).unwrap();
        assert_eq!(value.value, 3);
        assert_eq!(value.enum_name.as_deref(), Some("Output"));
        assert_eq!(value.to_string(), "0x3 (Output)");

        let mut mem = MockMemory::with_word(0x4001_0800, 0b0100);
        assert_eq!(mode.get(&mut mem).unwrap().to_string(), "0x0 (Input)");
    }

    #[test]
    fn test_field_value_display() {
        let v = FieldValue {
            value: 0x1F,
            width: 12,
            enum_name: None,
        };
        assert_eq!(v.to_string(), "0x01f");
        let v = FieldValue {
            value: 0xAB,
            width: 32,
            enum_name: None,
        };
        assert_eq!(v.to_string(), "0x000000ab");
        assert_eq!(u32::from(v), 0xAB);
    }

    fn test_field(bit_offset: u8, bit_width: u8) -> Field {
        Field {
            name: "F".to_string(),
            description: None,
            bit_offset,
            bit_width,
            enums: EnumTable::default(),
        }
    }

    #[test]
    fn test_field_write_read_all_widths_preserves_siblings() {
        const BACKGROUND: u32 = 0xA5C3_5A3C;
        for width in 1..=32u8 {
            let max_offset = 32 - width;
            for offset in [0, max_offset / 2, max_offset] {
                let field = test_field(offset, width);
                let handle = FieldRef {
                    field: &field,
                    register_address: 0x100,
                    path: "P.R.F".to_string(),
                };
                let mask = field.value_mask();
                for value in [0, mask, 0x1234_5678 & mask, !BACKGROUND & mask] {
                    let mut mem = MockMemory::with_word(0x100, BACKGROUND);
                    handle.set(&mut mem, value).unwrap();
                    assert_eq!(
                        handle.get(&mut mem).unwrap().value,
                        value,
                        "width {} offset {}",
                        width,
                        offset
                    );
                    let outside = !field.register_mask();
                    assert_eq!(mem.word(0x100) & outside, BACKGROUND & outside);
                }
            }
        }
    }

    #[test]
    fn test_field_write_masks_to_width() {
        let field = test_field(4, 2);
        let handle = FieldRef {
            field: &field,
            register_address: 0x100,
            path: "P.R.F".to_string(),
        };
        let mut mem = MockMemory::with_word(0x100, 0);
        handle.set(&mut mem, 0b111).unwrap();
        assert_eq!(mem.word(0x100), 0b11_0000);
    }

    #[test]
    fn test_single_bit_field_uses_bit_operations() {
        let device = device();
        let odr = device.peripheral("GPIOA").unwrap().register("ODR").unwrap();
        let pins = odr.field_group("ODR").unwrap();

        let mut mem = MockMemory::with_word(0x4001_080C, 0);
        pins.set(&mut mem, 5, 1).unwrap();
        assert_eq!(mem.word(0x4001_080C), 1 << 5);
        assert_eq!(mem.writes.len(), 1);

        pins.assign(&mut mem, 0..3, &[1, 1, 0]).unwrap();
        assert_eq!(mem.word(0x4001_080C), (1 << 5) | 0b011);
        assert!(matches!(
            pins.assign(&mut mem, 0..3, &[1]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(pins.assign(&mut mem, 15..17, &[1, 1]).is_err());

        let all = odr.field("ALL").unwrap();
        assert_eq!(all.get(&mut mem).unwrap().value, (1 << 5) | 0b011);
        assert_eq!(
            pins.get_all(&mut mem).unwrap()[..6]
                .iter()
                .map(|v| v.value)
                .collect::<Vec<_>>(),
            vec![1, 1, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_set_named_value() {
        let device = device();
        let mode = device
            .peripheral("GPIOA")
            .unwrap()
            .register("CRL")
            .unwrap()
            .field("MODE0")
            .unwrap();
        let mut mem = MockMemory::with_word(0x4001_0800, 0b1100);
        mode.set_named(&mut mem, "Output").unwrap();
        assert_eq!(mem.word(0x4001_0800), 0b1110);
        assert!(mode.set_named(&mut mem, "Bogus").is_err());
    }

    #[test]
    fn test_bound_device_read_write() {
        let device = device();
        let mut bound = device.bind(MockMemory::with_word(0x4001_0800, 0x44));
        assert_eq!(bound.read("GPIOA.CRL.CNF0").unwrap().value, 1);
        bound.write("GPIOA.CRL.CNF0", 2).unwrap();
        assert_eq!(bound.read("GPIOA.CRL").unwrap().value, 0x48);
        assert_eq!(bound.read("GPIOA.CRL").unwrap().to_string(), "0x00000048");
        assert!(bound.read("GPIOA.CH").is_err());
        assert!(bound.write("GPIOA", 0).is_err());
    }

    #[test]
    fn test_peripheral_registers_sorted() {
        let device = device();
        let gpioa = device.peripheral("GPIOA").unwrap();
        let paths: Vec<String> = gpioa
            .registers()
            .iter()
            .map(|r| format!("{}@{:X}", r.path(), r.address()))
            .collect();
        assert_eq!(
            paths,
            vec![
                "GPIOA.CRL@40010800",
                "GPIOA.ODR@4001080C",
                "GPIOA.CH[0].CFG@40010844",
                "GPIOA.CH[0].SUB.VAL@40010858",
                "GPIOA.CH[1].CFG@40010864",
                "GPIOA.CH[1].SUB.VAL@40010878",
            ]
        );
        assert_eq!(gpioa.child_names(), vec!["CRL", "ODR", "CH"]);
    }
}
