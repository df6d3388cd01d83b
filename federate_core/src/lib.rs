//! Foundational types shared between the federate runtime and anything that
//! speaks the federation wire protocol: a nanosecond-resolution time type and
//! the small identifiers (`FederateId`, `PortId`) carried in wire frames.

mod ids;
mod time;

pub use ids::{FederateId, PortId};
pub use time::Timestamp;
