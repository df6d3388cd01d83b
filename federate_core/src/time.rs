use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point in time, expressed as nanoseconds.
///
/// Used for both physical (wall-clock) readings and logical time values
/// (`start_time`, `granted_tag`, the argument to `next_event_time`). The two
/// are distinguished by context, not by type, mirroring the single `instant_t`
/// the protocol carries on the wire as a plain `i64`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Sentinel that compares less than any timestamp a federate will ever
    /// observe. Used as the initial value of `granted_tag` before any TAG has
    /// been received.
    pub const NEVER: Timestamp = Timestamp(i64::MIN);

    /// Sentinel that compares greater than any timestamp a federate will ever
    /// observe. Used as a stop tag placeholder before a stop has been
    /// requested.
    pub const FOREVER: Timestamp = Timestamp(i64::MAX);

    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Duration since `origin`, as nanoseconds. May be negative if `self`
    /// precedes `origin`.
    pub fn since(self, origin: Timestamp) -> i64 {
        self.0.saturating_sub(origin.0)
    }

    pub fn checked_add(self, delay_nanos: i64) -> Option<Timestamp> {
        self.0.checked_add(delay_nanos).map(Timestamp)
    }

    pub fn saturating_add(self, delay_nanos: i64) -> Timestamp {
        Timestamp(self.0.saturating_add(delay_nanos))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Timestamp::NEVER => write!(f, "NEVER"),
            Timestamp::FOREVER => write!(f, "FOREVER"),
            Timestamp(ns) => write!(f, "{ns}ns"),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(nanos: i64) -> Self {
        Timestamp(nanos)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_less_than_everything() {
        assert!(Timestamp::NEVER < Timestamp::from_nanos(0));
        assert!(Timestamp::NEVER < Timestamp::from_nanos(i64::MIN + 1));
    }

    #[test]
    fn forever_is_greater_than_everything() {
        assert!(Timestamp::FOREVER > Timestamp::from_nanos(0));
        assert!(Timestamp::FOREVER > Timestamp::from_nanos(i64::MAX - 1));
    }

    #[test]
    fn since_computes_signed_delta() {
        let origin = Timestamp::from_nanos(1_000);
        assert_eq!(Timestamp::from_nanos(1_500).since(origin), 500);
        assert_eq!(Timestamp::from_nanos(500).since(origin), -500);
    }
}
