//! Bitcode: the on-disk form of an IR program.
//!
//! Layout: 4-byte magic, little-endian u32 format version, bincode-encoded
//! [`Program`], and a trailing crc32 of the encoded payload. Readers reject
//! bad magic, unknown versions, and checksum mismatches before decoding.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use super::Program;

const MAGIC: &[u8; 4] = b"FBCD";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BitcodeError {
    #[error("bitcode I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bitcode encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("not a bitcode file (bad magic)")]
    BadMagic,

    #[error("unsupported bitcode version {0}")]
    BadVersion(u32),

    #[error("bitcode checksum mismatch")]
    Checksum,
}

/// Serialize a program to `path`.
pub fn write_bitcode(program: &Program, path: &Path) -> Result<(), BitcodeError> {
    let payload = bincode::serialize(program)?;
    let crc = crc32fast::hash(&payload);

    let mut bytes = Vec::with_capacity(payload.len() + 12);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc.to_le_bytes());

    fs::write(path, bytes)?;
    Ok(())
}

/// Read a program back from `path`.
pub fn read_bitcode(path: &Path) -> Result<Program, BitcodeError> {
    let bytes = fs::read(path)?;
    if bytes.len() < 12 || &bytes[0..4] != MAGIC {
        return Err(BitcodeError::BadMagic);
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(BitcodeError::BadVersion(version));
    }

    let payload = &bytes[8..bytes.len() - 4];
    let crc_stored = u32::from_le_bytes([
        bytes[bytes.len() - 4],
        bytes[bytes.len() - 3],
        bytes[bytes.len() - 2],
        bytes[bytes.len() - 1],
    ]);
    if crc32fast::hash(payload) != crc_stored {
        return Err(BitcodeError::Checksum);
    }

    Ok(bincode::deserialize(payload)?)
}
