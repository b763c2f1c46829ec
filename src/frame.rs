// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Block framing
//!
//! `marker | seq | 255 - seq | payload (128 or 1024) | checksum (1) or CRC (2)`

use std::fmt;
use thiserror::Error;
use crate::checksum::DetectionCode;
use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload of {len} bytes exceeds {block_size}-byte block")]
    InvalidPayload { len: usize, block_size: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected start marker 0x{0:02X}")]
    BadMarker(u8),

    #[error("start marker 0x{marker:02X} does not match {expected}-byte blocks")]
    SizeMismatch { marker: u8, expected: usize },

    #[error("frame is {actual} bytes, expected {expected}")]
    Length { actual: usize, expected: usize },

    #[error("sequence {sequence} and complement {complement} do not sum to 255")]
    Complement { sequence: u8, complement: u8 },

    #[error("checksum mismatch: received 0x{received:02X}, computed 0x{computed:02X}")]
    Checksum { received: u8, computed: u8 },

    #[error("CRC mismatch: received 0x{received:04X}, computed 0x{computed:04X}")]
    Crc { received: u16, computed: u16 },
}

impl DecodeError {
    /// Structural damage (marker, length, complement) as opposed to a detection mismatch.
    pub fn is_frame_error(&self) -> bool {
        !matches!(self, DecodeError::Checksum { .. } | DecodeError::Crc { .. })
    }
}

// ============================================================================
// Block
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub sequence: u8,
    pub block_size: BlockSize,
    /// Always exactly `block_size.payload_len()` bytes.
    pub payload: Vec<u8>,
    pub detection: DetectionCode,
}

impl Block {
    pub fn marker(&self) -> u8 {
        self.block_size.marker().as_byte()
    }

    pub fn complement(&self) -> u8 {
        255 - self.sequence
    }

    pub fn mode(&self) -> DetectionMode {
        self.detection.mode()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame_len(self.block_size, self.mode()));
        out.push(self.marker());
        out.push(self.sequence);
        out.push(self.complement());
        out.extend_from_slice(&self.payload);
        self.detection.write_to(&mut out);
        out
    }
}

/// One-line dissection of the frame, for traces.
impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let padding = self.payload.iter().rev().take_while(|&&b| b == PAD).count();
        write!(
            f,
            "block {} [{} {:02X} {:02X} | {} data + {} pad | {}]",
            self.sequence,
            self.block_size.marker(),
            self.sequence,
            self.complement(),
            self.payload.len() - padding,
            padding,
            self.detection
        )
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Frames `payload`, padding it with Ctrl-Z up to the block size.
pub fn encode(
    sequence: u8,
    payload: &[u8],
    mode: DetectionMode,
    block_size: BlockSize,
) -> Result<Block, EncodeError> {
    let size = block_size.payload_len();
    if payload.len() > size {
        return Err(EncodeError::InvalidPayload { len: payload.len(), block_size: size });
    }

    let mut padded = payload.to_vec();
    padded.resize(size, PAD);

    Ok(Block {
        sequence,
        block_size,
        detection: DetectionCode::compute(mode, &padded),
        payload: padded,
    })
}

/// Validates one complete on-wire frame, marker included.
///
/// Pure: the caller decides whether a failure is worth a NAK.
pub fn decode(raw: &[u8], mode: DetectionMode, expected_block_size: BlockSize) -> Result<Block, DecodeError> {
    let marker = *raw.first().ok_or(DecodeError::Length { actual: 0, expected: frame_len(expected_block_size, mode) })?;

    let block_size = BlockSize::from_marker(marker).ok_or(DecodeError::BadMarker(marker))?;
    if block_size != expected_block_size {
        return Err(DecodeError::SizeMismatch { marker, expected: expected_block_size.payload_len() });
    }

    let expected = frame_len(block_size, mode);
    if raw.len() != expected {
        return Err(DecodeError::Length { actual: raw.len(), expected });
    }

    let sequence = raw[1];
    let complement = raw[2];
    if sequence.wrapping_add(complement) != 0xFF {
        return Err(DecodeError::Complement { sequence, complement });
    }

    let payload = &raw[3..3 + block_size.payload_len()];
    let trailer = &raw[3 + block_size.payload_len()..];
    let received = DetectionCode::from_wire(mode, trailer)
        .ok_or(DecodeError::Length { actual: raw.len(), expected })?;
    let computed = DetectionCode::compute(mode, payload);

    match (received, computed) {
        (DetectionCode::Checksum(received), DetectionCode::Checksum(computed)) if received != computed => {
            Err(DecodeError::Checksum { received, computed })
        }
        (DetectionCode::Crc(received), DetectionCode::Crc(computed)) if received != computed => {
            Err(DecodeError::Crc { received, computed })
        }
        _ => Ok(Block {
            sequence,
            block_size,
            payload: payload.to_vec(),
            detection: received,
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
