//! Register block frames exchanged with a STPM3x device.
//!
//! A read request is `[addr][count]` and is answered with `[count × 4 bytes][crc]`. A write
//! request is `[addr][count | WRITE_FLAG][count × 4 bytes][crc]` and is not answered. Words are
//! sent least significant byte first. The CRC is CRC-8 (polynomial 0x07, init 0x00) accumulated
//! over address, count byte and payload; for a response the address and count of the request
//! seed the check.

use crc::{Crc, CRC_8_SMBUS};
use heapless::Vec;

use crate::register::MAX_BLOCK_WORDS;

const CRC_STPM: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Bit of the count byte marking a write request.
pub const WRITE_FLAG: u8 = 0x80;

/// Address and count bytes.
pub const HEADER_LEN: usize = 2;

/// Trailing check byte.
pub const CRC_LEN: usize = 1;

/// Longest frame on the wire, a full write block.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + 4 * MAX_BLOCK_WORDS + CRC_LEN;

/// Raw frame bytes.
pub type FrameBuf = Vec<u8, MAX_FRAME_LEN>;

/// Words carried by a frame.
pub type Words = Vec<u32, MAX_BLOCK_WORDS>;

/// Represents the possible frame decoding errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// The check byte does not match the frame content.
    CrcError,
    /// The frame is shorter than its header announces.
    Truncated,
    /// The payload is not a whole number of words, or longer than announced.
    MisalignedLength,
    /// The block is empty or exceeds [`MAX_BLOCK_WORDS`].
    Oversized
}

/// Identifies an outstanding read request, needed to validate its response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadRequest {
    pub addr: u8,
    pub count: u8
}

impl ReadRequest {
    /// Number of bytes of the response, check byte included.
    pub fn response_len(&self) -> usize {
        4 * self.count as usize + CRC_LEN
    }
}

/// Builds a read request for `count` words starting at `addr`.
pub fn build_read_frame(addr: u8, count: usize) -> Result<(ReadRequest, [u8; HEADER_LEN]), FrameError> {
    let count = block_len(count)?;
    Ok((ReadRequest { addr, count }, [addr, count]))
}

/// Builds a write request carrying `words` to be stored starting at `addr`.
pub fn build_write_frame(addr: u8, words: &[u32]) -> Result<FrameBuf, FrameError> {
    let count = block_len(words.len())?;
    let mut frame = FrameBuf::new();
    push(&mut frame, &[addr, count | WRITE_FLAG])?;
    for word in words {
        push(&mut frame, &word.to_le_bytes())?;
    }
    let crc = CRC_STPM.checksum(&frame);
    push(&mut frame, &[crc])?;
    Ok(frame)
}

/// Parses a write frame, returning the target address and the carried words. The check byte is
/// verified before any length is interpreted.
pub fn parse_frame(bytes: &[u8]) -> Result<(u8, Words), FrameError> {
    if bytes.len() < HEADER_LEN + CRC_LEN {
        return Err(FrameError::Truncated);
    }
    let (body, crc) = bytes.split_at(bytes.len() - CRC_LEN);
    if CRC_STPM.checksum(body) != crc[0] {
        return Err(FrameError::CrcError);
    }
    let count = (body[1] & !WRITE_FLAG) as usize;
    let payload = &body[HEADER_LEN..];
    if payload.len() % 4 != 0 {
        return Err(FrameError::MisalignedLength);
    }
    if payload.len() / 4 < count {
        return Err(FrameError::Truncated);
    }
    if payload.len() / 4 > count {
        return Err(FrameError::MisalignedLength);
    }
    Ok((body[0], words_of(payload)?))
}

/// Parses the response to `request`.
pub fn parse_response(request: ReadRequest, bytes: &[u8]) -> Result<Words, FrameError> {
    if bytes.len() < request.response_len() {
        return Err(FrameError::Truncated);
    }
    if bytes.len() > request.response_len() {
        return Err(FrameError::MisalignedLength);
    }
    let (payload, crc) = bytes.split_at(bytes.len() - CRC_LEN);
    let mut digest = CRC_STPM.digest();
    digest.update(&[request.addr, request.count]);
    digest.update(payload);
    if digest.finalize() != crc[0] {
        return Err(FrameError::CrcError);
    }
    words_of(payload)
}

/// Builds the response a device sends to `request`. Used by device simulators and tests.
pub fn build_response(request: ReadRequest, words: &[u32]) -> Result<FrameBuf, FrameError> {
    if words.len() != request.count as usize {
        return Err(FrameError::MisalignedLength);
    }
    let mut frame = FrameBuf::new();
    for word in words {
        push(&mut frame, &word.to_le_bytes())?;
    }
    let mut digest = CRC_STPM.digest();
    digest.update(&[request.addr, request.count]);
    digest.update(&frame);
    let crc = digest.finalize();
    push(&mut frame, &[crc])?;
    Ok(frame)
}

fn block_len(count: usize) -> Result<u8, FrameError> {
    if count == 0 || count > MAX_BLOCK_WORDS {
        return Err(FrameError::Oversized);
    }
    Ok(count as u8)
}

fn push(frame: &mut FrameBuf, bytes: &[u8]) -> Result<(), FrameError> {
    frame.extend_from_slice(bytes).map_err(|_| FrameError::Oversized)
}

fn words_of(payload: &[u8]) -> Result<Words, FrameError> {
    let mut words = Words::new();
    for chunk in payload.chunks_exact(4) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        words.push(word).map_err(|_| FrameError::Oversized)?;
    }
    Ok(words)
}
