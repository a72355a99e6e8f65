//! Value-level types shared by subgraphs and runtimes.

use std::fmt;
use std::ops::BitOr;

/// Element type of a tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Fp32,
    Int32,
}

impl Datatype {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Datatype::Fp32 | Datatype::Int32 => 4,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Fp32 => f.write_str("fp32"),
            Datatype::Int32 => f.write_str("int32"),
        }
    }
}

/// Handle of a tensor value inside a subgraph.
///
/// External values occupy `0..external_value_count`; internal values are
/// numbered after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Role flags passed to `define_tensor_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValueFlags(u32);

impl ValueFlags {
    pub const NONE: Self = Self(0);
    pub const EXTERNAL_INPUT: Self = Self(1);
    pub const EXTERNAL_OUTPUT: Self = Self(1 << 1);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_external(&self) -> bool {
        self.0 & (Self::EXTERNAL_INPUT.0 | Self::EXTERNAL_OUTPUT.0) != 0
    }
}

impl BitOr for ValueFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Caller memory bound to an external input for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExternalInput<'a> {
    pub id: ValueId,
    pub data: &'a [u8],
}

/// Caller memory bound to an external output for one invocation.
#[derive(Debug)]
pub struct ExternalOutput<'a> {
    pub id: ValueId,
    pub data: &'a mut [u8],
}
