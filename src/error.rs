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

//! Terminal session errors
//!
//! Per-block problems (bad frames, checksum mismatches, timeouts) are retried
//! inside the state machines and only show up here once the retry budget is
//! spent.

use thiserror::Error;
use crate::frame::{DecodeError, EncodeError};
use crate::protocol::describe_byte;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("receiver never requested a transfer ({attempts} attempts)")]
    NoHandshake { attempts: u32 },

    #[error("no sender responded to handshake ({attempts} attempts)")]
    NoSender { attempts: u32 },

    #[error("block {sequence}: retries exhausted after {attempts} attempts, last response: {}", describe_response(.last_response))]
    RetriesExhausted { sequence: u8, attempts: u32, last_response: Option<u8> },

    #[error("block {sequence}: too many errors ({attempts} attempts){}", describe_fault(.last_error))]
    TooManyErrors { sequence: u8, attempts: u32, last_error: Option<BlockFault> },

    #[error("cancelled by peer at block {sequence}")]
    PeerCancelled { sequence: u8 },

    #[error("cancelled locally at block {sequence}")]
    Cancelled { sequence: u8 },

    #[error("all {bytes} bytes delivered but EOT was not acknowledged after {attempts} attempts")]
    EotNotAcked { attempts: u32, bytes: u64 },

    #[error("cannot frame block: {0}")]
    Encode(#[from] EncodeError),
}

/// Why the receiver rejected one incoming block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockFault {
    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("block {got} out of sequence, expected {expected}")]
    Sequence { got: u8, expected: u8 },

    #[error("unexpected byte {}", describe_noise(.0))]
    Noise(u8),

    #[error("timed out mid-block")]
    Truncated,
}

impl TransferError {
    /// Only the final EOT handshake failed; the payload itself was delivered.
    pub fn is_soft(&self) -> bool {
        matches!(self, TransferError::EotNotAcked { .. })
    }

    /// Sequence number of the block the session failed on, where there is one.
    pub fn sequence(&self) -> Option<u8> {
        match self {
            TransferError::RetriesExhausted { sequence, .. }
            | TransferError::TooManyErrors { sequence, .. }
            | TransferError::PeerCancelled { sequence }
            | TransferError::Cancelled { sequence } => Some(*sequence),
            _ => None,
        }
    }
}

fn describe_response(response: &Option<u8>) -> String {
    match response {
        Some(byte) => describe_byte(*byte),
        None => "no response".to_string(),
    }
}

fn describe_noise(byte: &u8) -> String {
    describe_byte(*byte)
}

fn describe_fault(error: &Option<BlockFault>) -> String {
    match error {
        Some(e) => format!(", last error: {}", e),
        None => String::new(),
    }
}
