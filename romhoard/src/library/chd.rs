//! CHD (MAME Compressed Hunks of Data) header reading
//!
//! Disc images in CHD form carry the SHA1 of their uncompressed data in the
//! header; that hash identifies the disc without decompressing it.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

use super::extensions::full_extension;

const CHD_MAGIC: &[u8; 8] = b"MComprHD";

#[derive(Error, Debug)]
pub enum ChdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CHD header truncated ({0} bytes)")]
    Truncated(usize),
}

pub fn is_chd_file(name: &str) -> bool {
    full_extension(name) == ".chd"
}

/// Offset of the raw-data SHA1 for a header version
fn sha1_offset(version: u32) -> Option<usize> {
    match version {
        3 => Some(80),
        4 => Some(48),
        5 => Some(84),
        _ => None,
    }
}

/// SHA1 of the uncompressed data, lowercase hex
///
/// `None` when the file is not a CHD or uses an unsupported header version.
pub fn extract_chd_sha1(path: &Path) -> Result<Option<String>, ChdError> {
    let mut header = Vec::with_capacity(128);
    File::open(path)?.take(128).read_to_end(&mut header)?;
    parse_header_sha1(&header)
}

fn parse_header_sha1(header: &[u8]) -> Result<Option<String>, ChdError> {
    if header.len() < 16 || &header[..8] != CHD_MAGIC {
        return Ok(None);
    }

    let version = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let Some(offset) = sha1_offset(version) else {
        return Ok(None);
    };

    let sha1 = header
        .get(offset..offset + 20)
        .ok_or(ChdError::Truncated(header.len()))?;
    Ok(Some(sha1.iter().map(|b| format!("{:02x}", b)).collect()))
}
