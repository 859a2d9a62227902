//! Archive payload decompression for Atlas
//!
//! Remote assets and packaged metadata arrive as LZ4 frames. This crate
//! parses the frame header, decodes blocks incrementally from any reader and
//! hands back the complete payload, or an error and nothing at all.
//!
//! # Example
//!
//! ```no_run
//! let bytes = atlas_archive::extract(std::path::Path::new("banners.lz4"))?;
//! # Ok::<(), atlas_archive::CodecError>(())
//! ```

mod decoder;
mod extract;
mod frame;

pub use decoder::{FrameDecoder, Progress};
pub use extract::{READ_CHUNK_SIZE, decode, extract, extract_to};
pub use frame::{BlockSize, FrameInfo, MAGIC, MAX_HEADER_SIZE, MIN_HEADER_SIZE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Not an LZ4 frame (magic {0:#010x})")]
    BadMagic(u32),

    #[error("Unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    #[error("Reserved bits set in frame descriptor")]
    ReservedBits,

    #[error("Invalid block size code: {0}")]
    InvalidBlockSize(u8),

    #[error("Header checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    HeaderChecksum { expected: u8, actual: u8 },

    #[error("Frames with a dictionary are not supported (dictionary id {0})")]
    DictionaryUnsupported(u32),

    #[error("Block of {len} bytes exceeds the frame block size of {max} bytes")]
    BlockTooLarge { len: usize, max: usize },

    #[error("Block checksum mismatch")]
    BlockChecksum,

    #[error("Content checksum mismatch")]
    ContentChecksum,

    #[error("Content size mismatch: header declares {expected} bytes, decoded {actual}")]
    ContentSize { expected: u64, actual: u64 },

    #[error("Frame ended before the end mark")]
    Truncated,

    #[error("Block decode failed: {0}")]
    Block(#[from] lz4_flex::block::DecompressError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
