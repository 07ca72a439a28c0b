use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{BridgeError, Result};

/// The four-byte magic number identifying a GGUF file: ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = [0x47, 0x47, 0x55, 0x46];

/// GGUF versions llama.cpp still accepts.
pub const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

/// Length of the fixed-size part of a GGUF header.
pub const HEADER_LEN: usize = 24;

/// The fixed-size prefix of a GGUF file: enough to tell a model file from
/// anything else before llama.cpp is asked to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub n_tensors: u64,
    pub n_kv: u64,
}

/// Little-endian integer from up to eight bytes.
fn le(bytes: &[u8]) -> u64 {
    bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | u64::from(b))
}

impl GgufHeader {
    /// Read the header prefix, rejecting foreign magic before anything else
    /// is read and versions llama.cpp no longer loads.
    pub fn parse(reader: &mut impl Read) -> Result<GgufHeader> {
        let mut raw = [0u8; HEADER_LEN];
        let (magic, rest) = raw.split_at_mut(GGUF_MAGIC.len());
        reader.read_exact(magic)?;
        if *magic != GGUF_MAGIC {
            return Err(BridgeError::InvalidMagic([magic[0], magic[1], magic[2], magic[3]]));
        }
        reader.read_exact(rest)?;

        let version = le(&raw[4..8]) as u32;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(BridgeError::UnsupportedVersion(version));
        }
        Ok(GgufHeader {
            version,
            n_tensors: le(&raw[8..16]),
            n_kv: le(&raw[16..24]),
        })
    }
}

/// Check that `path` names a readable GGUF file before any backend state is
/// touched.
pub fn probe(path: &Path) -> Result<GgufHeader> {
    let file = File::open(path)?;
    GgufHeader::parse(&mut BufReader::new(file))
}
