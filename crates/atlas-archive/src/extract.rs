//! Whole-payload decoding from readers and files

use crate::CodecError;
use crate::decoder::FrameDecoder;
use crate::frame::{FrameInfo, MAX_HEADER_SIZE};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Bytes requested from the source per read
pub const READ_CHUNK_SIZE: usize = 1 << 16;

/// Decode one LZ4 frame from `source`.
///
/// `capacity_hint` pre-sizes the output (callers pass the compressed size);
/// the vector still grows past it when needed. On error nothing is returned.
pub fn decode<R: Read>(mut source: R, capacity_hint: usize) -> Result<Vec<u8>, CodecError> {
    let mut header = [0u8; MAX_HEADER_SIZE];
    let header_read = read_up_to(&mut source, &mut header)?;
    let (info, header_len) = FrameInfo::parse(&header[..header_read])?;
    tracing::debug!(
        "Frame header used {} bytes, block size {} bytes",
        header_len,
        info.block_size.bytes()
    );

    let mut decoder = FrameDecoder::new(info);
    let mut block = vec![0u8; info.block_size.bytes()];
    let mut input = vec![0u8; READ_CHUNK_SIZE];

    // Whatever the header read pulled in past the header is block data
    let mut pending = header_read - header_len;
    input[..pending].copy_from_slice(&header[header_len..header_read]);

    let mut out = Vec::with_capacity(capacity_hint);
    let mut exhausted = false;

    loop {
        if !exhausted && pending < input.len() {
            let n = read_some(&mut source, &mut input[pending..])?;
            if n == 0 {
                exhausted = true;
            }
            pending += n;
        }

        let progress = decoder.decompress(&input[..pending], &mut block)?;
        out.extend_from_slice(&block[..progress.produced]);

        // Keep unconsumed bytes, the next read tops them up
        input.copy_within(progress.consumed..pending, 0);
        pending -= progress.consumed;

        if progress.finished {
            break;
        }
        if exhausted && progress.consumed == 0 && progress.produced == 0 {
            return Err(CodecError::Truncated);
        }
    }

    if pending > 0 {
        tracing::debug!("Ignoring {} bytes after the end of the frame", pending);
    }

    Ok(out)
}

/// Decode an LZ4 compressed file into memory
pub fn extract(path: &Path) -> Result<Vec<u8>, CodecError> {
    tracing::info!("Extracting {}", path.display());

    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let data = decode(BufReader::new(file), file_size as usize)?;

    let ratio = if file_size == 0 {
        0.0
    } else {
        data.len() as f64 / file_size as f64
    };
    tracing::info!(
        "Finished extracting {}: {} -> {} bytes ({:.1}x)",
        path.display(),
        file_size,
        data.len(),
        ratio
    );

    Ok(data)
}

/// Decode `path` and write the payload to `dest`, creating parent directories
pub fn extract_to(path: &Path, dest: &Path) -> Result<u64, CodecError> {
    let data = extract(path)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, &data)?;

    Ok(data.len() as u64)
}

/// Fill as much of `buf` as the source allows
fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_some(source, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn read_some<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize, CodecError> {
    loop {
        match source.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
