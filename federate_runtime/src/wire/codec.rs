//! Fixed-endian primitive encode/decode and framed read/write helpers
//! (spec.md §4.2). All multi-byte integers on the wire are little-endian,
//! regardless of host byte order.

use std::io::{self, Read, Write};

/// A framed I/O operation failed. Distinguishes a clean peer close from a
/// transport-level break, per spec.md §4.2/§7.
#[derive(Debug, thiserror::Error)]
pub enum FrameIoError {
    /// The peer closed the connection at a frame boundary. Clean
    /// termination, not an error condition by itself.
    #[error("peer closed the connection")]
    Closed,
    /// The transport failed, or the peer closed mid-frame.
    #[error("transport error: {0}")]
    Broken(#[from] io::Error),
}

/// Read exactly `buf.len()` bytes. Returns [`FrameIoError::Closed`] only if
/// EOF occurs before any byte of this call has been read (i.e. at a frame
/// boundary); any truncation after that is [`FrameIoError::Broken`], since it
/// indicates a peer that died mid-frame.
pub fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), FrameIoError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(FrameIoError::Closed),
            Ok(0) => {
                return Err(FrameIoError::Broken(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameIoError::Broken(e)),
        }
    }
    Ok(())
}

/// Write exactly `buf`. Higher layers never issue partial writes directly.
pub fn write_all(writer: &mut impl Write, buf: &[u8]) -> Result<(), FrameIoError> {
    writer.write_all(buf).map_err(FrameIoError::Broken)
}

pub fn read_u8(reader: &mut impl Read) -> Result<u8, FrameIoError> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf)?;
    Ok(buf[0])
}

pub fn write_u8(writer: &mut impl Write, value: u8) -> Result<(), FrameIoError> {
    write_all(writer, &[value])
}

pub fn read_u16_le(reader: &mut impl Read) -> Result<u16, FrameIoError> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn write_u16_le(writer: &mut impl Write, value: u16) -> Result<(), FrameIoError> {
    write_all(writer, &value.to_le_bytes())
}

pub fn read_u32_le(reader: &mut impl Read) -> Result<u32, FrameIoError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_u32_le(writer: &mut impl Write, value: u32) -> Result<(), FrameIoError> {
    write_all(writer, &value.to_le_bytes())
}

pub fn read_i64_le(reader: &mut impl Read) -> Result<i64, FrameIoError> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn write_i64_le(writer: &mut impl Write, value: i64) -> Result<(), FrameIoError> {
    write_all(writer, &value.to_le_bytes())
}
