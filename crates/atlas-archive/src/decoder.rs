//! Incremental block decoder for one LZ4 frame

use crate::CodecError;
use crate::frame::{FrameInfo, xxh32};
use std::hash::Hasher;
use twox_hash::XxHash32;

/// Linked blocks may reference this much previously decoded data
const HISTORY_SIZE: usize = 64 * 1024;

const STORED_BLOCK_FLAG: u32 = 0x8000_0000;

/// Outcome of one [`FrameDecoder::decompress`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Input bytes taken; the rest must be offered again
    pub consumed: usize,
    /// Bytes written to the front of the output buffer
    pub produced: usize,
    /// End mark (and checksum) seen and all output delivered
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    BlockHeader,
    Block { len: usize, stored: bool },
    ContentChecksum,
    Finished,
}

/// Decodes the blocks following a frame header.
///
/// Input may be split anywhere: partial block headers, block data and
/// checksums are staged internally until complete. Decoded data is held in a
/// buffer of exactly one block and drained into the caller's output, so a
/// small output buffer simply takes more calls.
pub struct FrameDecoder {
    info: FrameInfo,
    stage: Stage,
    staging: Vec<u8>,
    block: Vec<u8>,
    block_len: usize,
    delivered: usize,
    history: Vec<u8>,
    content_hash: Option<XxHash32>,
    total_out: u64,
}

impl FrameDecoder {
    pub fn new(info: FrameInfo) -> Self {
        let block_bytes = info.block_size.bytes();
        Self {
            info,
            stage: Stage::BlockHeader,
            staging: Vec::new(),
            block: vec![0u8; block_bytes],
            block_len: 0,
            delivered: 0,
            history: Vec::new(),
            content_hash: info.content_checksum.then(|| XxHash32::with_seed(0)),
            total_out: 0,
        }
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    /// Total decoded bytes so far
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished && self.delivered == self.block_len
    }

    /// Feed `input` and drain decoded bytes into `output`.
    ///
    /// Stops when the input is used up, the output is full, or the frame is
    /// complete. At most one block is decoded per call once the output has
    /// been filled.
    pub fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress, CodecError> {
        let mut consumed = 0;
        let mut produced = 0;

        loop {
            if self.delivered < self.block_len {
                let n = (self.block_len - self.delivered).min(output.len() - produced);
                output[produced..produced + n]
                    .copy_from_slice(&self.block[self.delivered..self.delivered + n]);
                produced += n;
                self.delivered += n;

                if self.delivered < self.block_len || produced == output.len() {
                    break;
                }
            }

            let need = match self.stage {
                Stage::Finished => break,
                Stage::BlockHeader | Stage::ContentChecksum => 4,
                Stage::Block { len, .. } => len + if self.info.block_checksums { 4 } else { 0 },
            };

            let take = (need - self.staging.len()).min(input.len() - consumed);
            self.staging
                .extend_from_slice(&input[consumed..consumed + take]);
            consumed += take;

            if self.staging.len() < need {
                break;
            }

            let unit = std::mem::take(&mut self.staging);
            let result = self.process(&unit);
            self.staging = unit;
            self.staging.clear();
            result?;
        }

        Ok(Progress {
            consumed,
            produced,
            finished: self.is_finished(),
        })
    }

    fn process(&mut self, unit: &[u8]) -> Result<(), CodecError> {
        match self.stage {
            Stage::BlockHeader => {
                let raw = read_u32(unit);
                if raw == 0 {
                    self.stage = if self.info.content_checksum {
                        Stage::ContentChecksum
                    } else {
                        self.finish()?
                    };
                    return Ok(());
                }

                let stored = raw & STORED_BLOCK_FLAG != 0;
                let len = (raw & !STORED_BLOCK_FLAG) as usize;
                let max = self.block.len();
                if len > max {
                    return Err(CodecError::BlockTooLarge { len, max });
                }
                self.stage = Stage::Block { len, stored };
            }
            Stage::Block { len, stored } => {
                let data = &unit[..len];
                if self.info.block_checksums && xxh32(data) != read_u32(&unit[len..]) {
                    return Err(CodecError::BlockChecksum);
                }
                self.decode_block(data, stored)?;
                self.stage = Stage::BlockHeader;
            }
            Stage::ContentChecksum => {
                let expected = read_u32(unit);
                let actual = self
                    .content_hash
                    .as_ref()
                    .map(|h| h.finish() as u32)
                    .unwrap_or(expected);
                if expected != actual {
                    return Err(CodecError::ContentChecksum);
                }
                self.stage = self.finish()?;
            }
            Stage::Finished => {}
        }
        Ok(())
    }

    fn decode_block(&mut self, data: &[u8], stored: bool) -> Result<(), CodecError> {
        let len = if stored {
            self.block[..data.len()].copy_from_slice(data);
            data.len()
        } else if self.info.independent_blocks {
            lz4_flex::block::decompress_into(data, &mut self.block)?
        } else {
            lz4_flex::block::decompress_into_with_dict(data, &mut self.block, &self.history)?
        };

        let decoded = &self.block[..len];
        if let Some(hash) = self.content_hash.as_mut() {
            hash.write(decoded);
        }
        if !self.info.independent_blocks {
            self.history.extend_from_slice(decoded);
            if self.history.len() > HISTORY_SIZE {
                let excess = self.history.len() - HISTORY_SIZE;
                self.history.drain(..excess);
            }
        }

        self.total_out += len as u64;
        self.block_len = len;
        self.delivered = 0;
        Ok(())
    }

    fn finish(&self) -> Result<Stage, CodecError> {
        if let Some(expected) = self.info.content_size
            && expected != self.total_out
        {
            return Err(CodecError::ContentSize {
                expected,
                actual: self.total_out,
            });
        }
        Ok(Stage::Finished)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
