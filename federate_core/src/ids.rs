#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies a federate within a federation. Assigned at program-generation
/// time; carried on the wire as a `u16`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FederateId(u16);

impl FederateId {
    pub const fn new(id: u16) -> Self {
        FederateId(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for FederateId {
    fn from(id: u16) -> Self {
        FederateId(id)
    }
}

impl std::fmt::Display for FederateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fed{}", self.0)
    }
}

/// Identifies an input port of a reactor within the destination federate.
/// Carried on the wire as a `u16`; mapped to a local trigger handle by the
/// reactor runtime via `PortResolver::action_for_port`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PortId(u16);

impl PortId {
    pub const fn new(id: u16) -> Self {
        PortId(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for PortId {
    fn from(id: u16) -> Self {
        PortId(id)
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port{}", self.0)
    }
}
