//! SVD register model
//!
//! A [`Device`] is parsed once from a System View Description file and is
//! immutable afterwards. Navigation handles ([`PeripheralRef`],
//! [`ClusterRef`], [`RegisterRef`], [`FieldRef`], [`GroupRef`]) compute
//! absolute addresses and turn field reads and writes into word accesses on
//! any [`MemoryAccess`](crate::access::MemoryAccess) implementation:
//!
//! | Field width | Read              | Write                         |
//! |-------------|-------------------|-------------------------------|
//! | 1           | `is_bit_set`      | `set_bit` / `clear_bit`       |
//! | 32          | whole register    | whole register                |
//! | other       | read, shift, mask | read-modify-write             |

pub mod access;
pub mod dump;
pub mod enums;
pub mod model;
mod parse;

pub use access::{
    BoundDevice, ClusterRef, FieldRef, FieldValue, GroupRef, PeripheralRef, RegisterRef, Resolved,
    Writable,
};
pub use enums::{EnumTable, EnumeratedValue, Matcher};
pub use model::{Cluster, Cpu, Device, Field, Named, Node, NodeList, Peripheral, Register, RegisterBlock};
