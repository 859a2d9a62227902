//! LZ4 frame header

use crate::CodecError;
use std::hash::Hasher;
use twox_hash::XxHash32;

/// Frame magic number, little endian on the wire
pub const MAGIC: u32 = 0x184D_2204;

/// Magic + FLG + BD + HC
pub const MIN_HEADER_SIZE: usize = 7;

/// Header with both the content size and the dictionary id present
pub const MAX_HEADER_SIZE: usize = 19;

const FLG_VERSION_SHIFT: u8 = 6;
const FLG_BLOCK_INDEPENDENCE: u8 = 0b0010_0000;
const FLG_BLOCK_CHECKSUM: u8 = 0b0001_0000;
const FLG_CONTENT_SIZE: u8 = 0b0000_1000;
const FLG_CONTENT_CHECKSUM: u8 = 0b0000_0100;
const FLG_RESERVED: u8 = 0b0000_0010;
const FLG_DICT_ID: u8 = 0b0000_0001;
const BD_RESERVED: u8 = 0b1000_1111;

/// Maximum decoded size of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    Max64KB,
    Max256KB,
    Max1MB,
    Max4MB,
}

impl BlockSize {
    /// Map a BD block size code to its class
    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            4 => Ok(Self::Max64KB),
            5 => Ok(Self::Max256KB),
            6 => Ok(Self::Max1MB),
            7 => Ok(Self::Max4MB),
            other => Err(CodecError::InvalidBlockSize(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Max64KB => 4,
            Self::Max256KB => 5,
            Self::Max1MB => 6,
            Self::Max4MB => 7,
        }
    }

    /// Decoded block capacity in bytes
    pub fn bytes(self) -> usize {
        match self {
            Self::Max64KB => 1 << 16,
            Self::Max256KB => 1 << 18,
            Self::Max1MB => 1 << 20,
            Self::Max4MB => 1 << 22,
        }
    }
}

/// Parsed frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub block_size: BlockSize,
    /// Blocks do not reference data from earlier blocks
    pub independent_blocks: bool,
    pub block_checksums: bool,
    pub content_checksum: bool,
    /// Uncompressed size, when the encoder recorded it
    pub content_size: Option<u64>,
}

impl FrameInfo {
    /// Parse a frame header from the start of `header`.
    ///
    /// `header` may hold more bytes than the header itself (callers usually
    /// read [`MAX_HEADER_SIZE`] bytes up front); the returned length tells
    /// how many of them belonged to the header.
    pub fn parse(header: &[u8]) -> Result<(Self, usize), CodecError> {
        if header.len() < MIN_HEADER_SIZE {
            return Err(CodecError::Truncated);
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }

        let flg = header[4];
        let bd = header[5];

        let version = flg >> FLG_VERSION_SHIFT;
        if version != 1 {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let block_size = BlockSize::from_code((bd >> 4) & 0b0111)?;

        if flg & FLG_RESERVED != 0 || bd & BD_RESERVED != 0 {
            return Err(CodecError::ReservedBits);
        }

        let has_content_size = flg & FLG_CONTENT_SIZE != 0;
        let has_dict_id = flg & FLG_DICT_ID != 0;

        let len = MIN_HEADER_SIZE
            + if has_content_size { 8 } else { 0 }
            + if has_dict_id { 4 } else { 0 };
        if header.len() < len {
            return Err(CodecError::Truncated);
        }

        let mut pos = 6;
        let content_size = if has_content_size {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&header[pos..pos + 8]);
            pos += 8;
            Some(u64::from_le_bytes(raw))
        } else {
            None
        };

        let dict_id = if has_dict_id {
            let id = u32::from_le_bytes([
                header[pos],
                header[pos + 1],
                header[pos + 2],
                header[pos + 3],
            ]);
            pos += 4;
            Some(id)
        } else {
            None
        };

        let expected = header[pos];
        let actual = header_checksum(&header[4..pos]);
        if expected != actual {
            return Err(CodecError::HeaderChecksum { expected, actual });
        }

        if let Some(id) = dict_id {
            return Err(CodecError::DictionaryUnsupported(id));
        }

        let info = Self {
            block_size,
            independent_blocks: flg & FLG_BLOCK_INDEPENDENCE != 0,
            block_checksums: flg & FLG_BLOCK_CHECKSUM != 0,
            content_checksum: flg & FLG_CONTENT_CHECKSUM != 0,
            content_size,
        };

        Ok((info, len))
    }
}

/// xxHash32 with seed 0, as used by every checksum in the format
pub(crate) fn xxh32(data: &[u8]) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(data);
    hasher.finish() as u32
}

/// Second byte of the descriptor hash
pub(crate) fn header_checksum(descriptor: &[u8]) -> u8 {
    ((xxh32(descriptor) >> 8) & 0xFF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal header for the given FLG/BD bytes with a valid checksum
    fn header(flg: u8, bd: u8) -> Vec<u8> {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.push(flg);
        bytes.push(bd);
        bytes.push(header_checksum(&[flg, bd]));
        bytes
    }

    #[test]
    fn test_block_size_codes() {
        assert_eq!(BlockSize::from_code(4).unwrap().bytes(), 64 * 1024);
        assert_eq!(BlockSize::from_code(5).unwrap().bytes(), 256 * 1024);
        assert_eq!(BlockSize::from_code(6).unwrap().bytes(), 1024 * 1024);
        assert_eq!(BlockSize::from_code(7).unwrap().bytes(), 4 * 1024 * 1024);

        for code in [0, 1, 2, 3] {
            assert!(matches!(
                BlockSize::from_code(code),
                Err(CodecError::InvalidBlockSize(c)) if c == code
            ));
        }
    }

    #[test]
    fn test_parse_minimal_header() {
        let bytes = header(0b0110_0000, 0b0110_0000);
        let (info, len) = FrameInfo::parse(&bytes).unwrap();

        assert_eq!(len, MIN_HEADER_SIZE);
        assert_eq!(info.block_size, BlockSize::Max1MB);
        assert!(info.independent_blocks);
        assert!(!info.block_checksums);
        assert!(!info.content_checksum);
        assert_eq!(info.content_size, None);
    }

    #[test]
    fn test_parse_ignores_trailing_bytes() {
        let mut bytes = header(0b0110_0100, 0b0100_0000);
        bytes.extend_from_slice(&[0xAA; 12]);

        let (info, len) = FrameInfo::parse(&bytes).unwrap();
        assert_eq!(len, MIN_HEADER_SIZE);
        assert!(info.content_checksum);
        assert_eq!(info.block_size, BlockSize::Max64KB);
    }

    #[test]
    fn test_parse_content_size() {
        let flg = 0b0110_1000;
        let bd = 0b0111_0000;
        let mut descriptor = vec![flg, bd];
        descriptor.extend_from_slice(&1234u64.to_le_bytes());

        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&descriptor);
        bytes.push(header_checksum(&descriptor));

        let (info, len) = FrameInfo::parse(&bytes).unwrap();
        assert_eq!(len, 15);
        assert_eq!(info.content_size, Some(1234));
        assert_eq!(info.block_size, BlockSize::Max4MB);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = header(0b0110_0000, 0b0100_0000);
        bytes[0] = 0;
        assert!(matches!(
            FrameInfo::parse(&bytes),
            Err(CodecError::BadMagic(_))
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_block_size() {
        let bytes = header(0b0110_0000, 0b0011_0000);
        assert!(matches!(
            FrameInfo::parse(&bytes),
            Err(CodecError::InvalidBlockSize(3))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let mut bytes = header(0b0110_0000, 0b0100_0000);
        bytes[6] ^= 0xFF;
        assert!(matches!(
            FrameInfo::parse(&bytes),
            Err(CodecError::HeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_version_and_reserved_bits() {
        let bytes = header(0b1010_0000, 0b0100_0000);
        assert!(matches!(
            FrameInfo::parse(&bytes),
            Err(CodecError::UnsupportedVersion(2))
        ));

        let bytes = header(0b0110_0010, 0b0100_0000);
        assert!(matches!(
            FrameInfo::parse(&bytes),
            Err(CodecError::ReservedBits)
        ));
    }

    #[test]
    fn test_parse_short_header() {
        let bytes = header(0b0110_1000, 0b0100_0000);
        // Content size flag promises 8 more bytes than we have
        assert!(matches!(FrameInfo::parse(&bytes), Err(CodecError::Truncated)));
        assert!(matches!(FrameInfo::parse(&bytes[..3]), Err(CodecError::Truncated)));
    }
}
