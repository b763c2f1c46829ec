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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use crate::protocol::{BlockSize, DetectionMode};

pub const DEFAULT_RETRY_LIMIT: u32 = 16;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Block size the sender emits. The receiver follows the first block it sees.
    pub block_size: BlockSize,
    /// Attempts per block, per handshake and per EOT.
    pub retry_limit: u32,
    /// Bound on every single wait for the peer.
    pub timeout: Duration,
    /// Receiver: handshakes sent as 'C' before falling back to NAK.
    pub crc_attempts: u32,
    /// Receiver: declared file size. Bytes past it are never delivered to the sink.
    pub expected_length: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::Standard,
            retry_limit: DEFAULT_RETRY_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            crc_attempts: DEFAULT_RETRY_LIMIT / 2,
            expected_length: None,
        }
    }
}

impl TransferConfig {
    #[must_use]
    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Also resets `crc_attempts` to half the new limit.
    #[must_use]
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self.crc_attempts = retry_limit / 2;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_crc_attempts(mut self, crc_attempts: u32) -> Self {
        self.crc_attempts = crc_attempts;
        self
    }

    #[must_use]
    pub fn with_expected_length(mut self, expected_length: Option<u64>) -> Self {
        self.expected_length = expected_length;
        self
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Caller-side abort switch. Checked between blocks, never mid-block.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// State of one transfer, owned by the state machine driving it.
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    pub mode: DetectionMode,
    pub block_size: BlockSize,
    pub retry_limit: u32,
    pub timeout: Duration,
    /// Sender: sequence of the block in flight. Receiver: sequence expected next.
    pub sequence: u8,
    pub bytes_transferred: u64,
    pub blocks: u32,
    pub retransmissions: u32,
}

impl Session {
    pub fn new(role: Role, config: &TransferConfig) -> Self {
        let mode = match role {
            Role::Receiver if config.crc_attempts == 0 => DetectionMode::Checksum,
            _ => DetectionMode::Crc,
        };
        Self {
            role,
            mode,
            block_size: config.block_size,
            retry_limit: config.retry_limit,
            timeout: config.timeout,
            sequence: 1,
            bytes_transferred: 0,
            blocks: 0,
            retransmissions: 0,
        }
    }

    /// Moves to the next sequence number. 255 wraps to 0.
    pub fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.blocks += 1;
    }

    pub fn previous_sequence(&self) -> u8 {
        self.sequence.wrapping_sub(1)
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            mode: self.mode,
            block_size: self.block_size,
            blocks: self.blocks,
            bytes: self.bytes_transferred,
            retransmissions: self.retransmissions,
        }
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub mode: DetectionMode,
    pub block_size: BlockSize,
    /// Blocks accepted (receiver) or acknowledged (sender); duplicates excluded.
    pub blocks: u32,
    /// Sender: source bytes acknowledged. Receiver: bytes written to the sink.
    pub bytes: u64,
    /// Retransmissions sent (sender) or requested (receiver).
    pub retransmissions: u32,
}
