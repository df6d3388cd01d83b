//! Top-level error taxonomy (spec.md §7). Each layer gets its own error
//! type; this is the enum exposed across module boundaries so callers can
//! `match` on error category rather than string contents.

use thiserror::Error;

use crate::connection::ConnectError;
use crate::wire::CodecError;

#[derive(Debug, Error)]
pub enum FederateError {
    #[error("connection setup failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("wire protocol error: {0}")]
    Codec(#[from] CodecError),

    /// Corruption that cannot be recovered from: wrong `dest_fed`, a port id
    /// with no matching trigger, an unexpected message on an established
    /// connection.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
