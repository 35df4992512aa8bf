//! Payload (de)compression for the binary return slot.
//!
//! Mirrors `protocol.cpp`'s `decompress`: an empty input short-circuits
//! regardless of declared type, `UNCOMPRESSED` returns the buffer as-is,
//! and `LZ4` decompresses into a buffer sized by the declared
//! uncompressed length, shrinking it if the actual decompressed size
//! differs.

use crate::error::Error;
use frt_conf::CompressionType;
use serde::{Deserialize, Serialize};

/// Describes the binary slot of a reply: its compression scheme and the
/// size it will decompress to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionInfo {
    #[serde(rename = "compressionType")]
    pub compression_type: CompressionTypeWire,
    #[serde(rename = "uncompressedSize")]
    pub uncompressed_size: u32,
}

/// Wire representation of `CompressionType`, kept distinct from
/// `frt_conf::CompressionType` so the two can evolve independently even
/// though today they carry the same two variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionTypeWire {
    #[serde(rename = "UNCOMPRESSED")]
    Uncompressed,
    #[serde(rename = "LZ4")]
    Lz4,
}

impl From<CompressionType> for CompressionTypeWire {
    fn from(t: CompressionType) -> Self {
        match t {
            CompressionType::Uncompressed => Self::Uncompressed,
            CompressionType::Lz4 => Self::Lz4,
        }
    }
}

/// Compress `input` with LZ4, for use in tests and by any in-process fake
/// server double. Production traffic only ever decompresses; the server
/// side of the protocol is explicitly out of scope.
pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4::block::compress(input, None, false).expect("lz4 block compression is infallible for valid input")
}

/// Decompress a reply's binary slot.
///
/// `declared_uncompressed_size` is the `uncompressedSize` field read from
/// the reply's `CompressionInfo`; it is a hint used to size the output
/// buffer and used as the authoritative `size` by `lz4::block::decompress`,
/// which needs it up front rather than discovering it incrementally.
pub fn decompress(
    input: &[u8],
    kind: CompressionTypeWire,
    declared_uncompressed_size: u32,
) -> Result<Vec<u8>, Error> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    match kind {
        CompressionTypeWire::Uncompressed => Ok(input.to_vec()),
        CompressionTypeWire::Lz4 => {
            lz4::block::decompress(input, Some(declared_uncompressed_size as i32))
                .map_err(|e| Error::Decompress(e.to_string()))
        }
    }
}
