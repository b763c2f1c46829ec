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

use std::marker::PhantomData;
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use crate::error::{BlockFault, TransferError};
use crate::frame::{self, Block};
use crate::protocol::*;
use crate::retry::{with_retries, Attempt};
use crate::serial::{drain, is_timeout, read_byte, read_byte_until, read_exact_timeout, send_byte, Transport};
use crate::session::{CancelToken, Role, Session, TransferConfig, TransferSummary};
use crate::stream::ByteSink;

/// Longest quiet gap waited for while draining line noise.
const PURGE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// States
// ============================================================================

pub struct Init;
pub struct AwaitBlock;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn Transport>,
    sink: Box<dyn ByteSink>,
    session: Session,
    cancel: CancelToken,
    crc_attempts: u32,
    expected_length: Option<u64>,
    // Set once the first block fixes the session's block size
    size_locked: bool,
    // Start marker already consumed by the handshake
    pending_marker: Option<u8>,
}

// ============================================================================
// Trait
// ============================================================================

pub enum ReceiverStep {
    Next(Box<dyn ReceiverState>),
    Done(TransferSummary),
}

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<ReceiverStep, TransferError>;
}

/// What one successful read of the line produced.
enum Incoming {
    Block(Block),
    Duplicate(u8),
    Eot,
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S: Send + 'static> ReceiverFsm<S> {
    fn transition<T: Send + 'static>(self) -> ReceiverStep
    where
        ReceiverFsm<T>: ReceiverState,
    {
        ReceiverStep::Next(Box::new(ReceiverFsm::<T> {
            state: PhantomData,
            serial: self.serial,
            sink: self.sink,
            session: self.session,
            cancel: self.cancel,
            crc_attempts: self.crc_attempts,
            expected_length: self.expected_length,
            size_locked: self.size_locked,
            pending_marker: self.pending_marker,
        }))
    }

    fn io_error(e: std::io::Error) -> TransferError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        TransferError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    /// Tells the sender to stop, then surfaces `err`.
    fn fail(mut self, err: TransferError) -> Result<ReceiverStep, TransferError> {
        warn!("Aborting transfer: {}", err);
        if self.serial.write_all(&[CAN, CAN]).and_then(|_| self.serial.flush()).is_err() {
            debug!("Could not deliver CAN to sender");
        }
        Err(err)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<Init> {
    fn step(self: Box<Self>) -> Result<ReceiverStep, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.session.timeout;
        let sequence = fsm.session.sequence;
        let crc_attempts = fsm.crc_attempts;
        let serial = &mut fsm.serial;

        let outcome = with_retries::<_, Option<u8>, _>(fsm.session.retry_limit, |attempt| {
            let mode = if attempt <= crc_attempts { DetectionMode::Crc } else { DetectionMode::Checksum };
            let handshake = mode.handshake();
            send_byte(serial.as_mut(), handshake.as_byte()).map_err(Self::io_error)?;
            debug!("Sent: {}", handshake);

            let deadline = Instant::now() + timeout;
            loop {
                let Some(byte) = read_byte_until(serial.as_mut(), deadline).map_err(Self::io_error)? else {
                    debug!("No sender yet (attempt {})", attempt);
                    return Ok(Attempt::Retry(None));
                };
                match Control::from_byte(byte) {
                    Some(Control::Soh | Control::Stx | Control::Eot) => return Ok(Attempt::Done((mode, byte))),
                    Some(Control::Can) => return Err(TransferError::PeerCancelled { sequence }),
                    _ => debug!("Ignoring {} while waiting for sender", describe_byte(byte)),
                }
            }
        })?;

        match outcome {
            Ok((mode, marker)) => {
                info!("Sender started, {} mode", mode);
                fsm.session.mode = mode;
                fsm.pending_marker = Some(marker);
                Ok(fsm.transition::<AwaitBlock>())
            }
            Err(exhausted) => fsm.fail(TransferError::NoSender { attempts: exhausted.attempts }),
        }
    }
}

impl ReceiverState for ReceiverFsm<AwaitBlock> {
    fn step(self: Box<Self>) -> Result<ReceiverStep, TransferError> {
        let mut fsm = *self;
        let expected = fsm.session.sequence;

        if fsm.cancel.is_cancelled() {
            return fsm.fail(TransferError::Cancelled { sequence: expected });
        }

        let timeout = fsm.session.timeout;
        let mode = fsm.session.mode;
        let locked_size = fsm.size_locked.then_some(fsm.session.block_size);
        // Nothing to duplicate before the first block lands
        let previous = (fsm.session.blocks > 0).then(|| fsm.session.previous_sequence());
        let mut pending = fsm.pending_marker.take();
        let mut naks = 0;
        let serial = &mut fsm.serial;

        let outcome = with_retries(fsm.session.retry_limit, |_attempt| {
            let mut nak = |serial: &mut dyn Transport, fault: Option<BlockFault>| -> Result<Attempt<Incoming, Option<BlockFault>>, TransferError> {
                match &fault {
                    Some(fault) => warn!("Block {}: {}, sending NAK", expected, fault),
                    None => warn!("Block {}: timed out, sending NAK", expected),
                }
                send_byte(serial, NAK).map_err(Self::io_error)?;
                naks += 1;
                Ok(Attempt::Retry(fault))
            };

            let marker = match pending.take() {
                Some(marker) => marker,
                None => match read_byte(serial.as_mut(), timeout).map_err(Self::io_error)? {
                    Some(marker) => marker,
                    None => return nak(serial.as_mut(), None),
                },
            };

            let size = match Control::from_byte(marker) {
                Some(Control::Eot) => return Ok(Attempt::Done(Incoming::Eot)),
                Some(Control::Can) => return Err(TransferError::PeerCancelled { sequence: expected }),
                _ => match BlockSize::from_marker(marker) {
                    Some(size) => size,
                    None => {
                        let dropped = drain(serial.as_mut(), timeout.min(PURGE_TIMEOUT), timeout).map_err(Self::io_error)?;
                        debug!("Purged {} bytes after {}", dropped, describe_byte(marker));
                        return nak(serial.as_mut(), Some(BlockFault::Noise(marker)));
                    }
                },
            };

            // Read at the marker's size so the line stays in step even when it is wrong
            let mut raw = vec![0u8; frame_len(size, mode)];
            raw[0] = marker;
            match read_exact_timeout(serial.as_mut(), &mut raw[1..], timeout) {
                Ok(()) => {}
                Err(e) if is_timeout(&e) => return nak(serial.as_mut(), Some(BlockFault::Truncated)),
                Err(e) => return Err(Self::io_error(e)),
            }

            match frame::decode(&raw, mode, locked_size.unwrap_or(size)) {
                Ok(block) if block.sequence == expected => Ok(Attempt::Done(Incoming::Block(block))),
                Ok(block) if Some(block.sequence) == previous => Ok(Attempt::Done(Incoming::Duplicate(block.sequence))),
                Ok(block) => nak(serial.as_mut(), Some(BlockFault::Sequence { got: block.sequence, expected })),
                Err(e) => nak(serial.as_mut(), Some(e.into())),
            }
        })?;
        fsm.session.retransmissions += naks;

        let incoming = match outcome {
            Ok(incoming) => incoming,
            Err(exhausted) => {
                return fsm.fail(TransferError::TooManyErrors {
                    sequence: expected,
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_failure,
                });
            }
        };

        match incoming {
            Incoming::Block(block) => {
                if !fsm.size_locked {
                    fsm.session.block_size = block.block_size;
                    fsm.size_locked = true;
                }
                if let Err(e) = fsm.deliver(&block.payload) {
                    return fsm.fail(TransferError::Io(e));
                }
                send_byte(fsm.serial.as_mut(), ACK).map_err(Self::io_error)?;
                debug!("Received: {}, sent ACK", block);
                fsm.session.advance();
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Incoming::Duplicate(sequence) => {
                send_byte(fsm.serial.as_mut(), ACK).map_err(Self::io_error)?;
                debug!("Received: duplicate block {}, sent ACK", sequence);
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Incoming::Eot => {
                send_byte(fsm.serial.as_mut(), ACK).map_err(Self::io_error)?;
                debug!("Received: EOT, sent ACK");
                let summary = fsm.session.summary();
                info!("Received {} bytes in {} blocks", summary.bytes, summary.blocks);
                Ok(ReceiverStep::Done(summary))
            }
        }
    }
}

impl ReceiverFsm<AwaitBlock> {
    /// Hands an accepted payload to the sink, cut short at the declared length if one is known.
    fn deliver(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let keep = match self.expected_length {
            Some(limit) => {
                let remaining = limit.saturating_sub(self.session.bytes_transferred);
                payload.len().min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            None => payload.len(),
        };
        if keep > 0 {
            self.sink.append(&payload[..keep])?;
            self.session.bytes_transferred += keep as u64;
        }
        Ok(())
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<Init> {
    pub fn new(
        serial: Box<dyn Transport>,
        sink: Box<dyn ByteSink>,
        config: &TransferConfig,
        cancel: CancelToken,
    ) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<Init>,
            serial,
            sink,
            session: Session::new(Role::Receiver, config),
            cancel,
            crc_attempts: config.crc_attempts,
            expected_length: config.expected_length,
            size_locked: false,
            pending_marker: None,
        })
    }
}

/// Drives a receiver to completion.
pub fn run(mut state: Box<dyn ReceiverState>) -> Result<TransferSummary, TransferError> {
    loop {
        match state.step()? {
            ReceiverStep::Next(next) => state = next,
            ReceiverStep::Done(summary) => return Ok(summary),
        }
    }
}

/// Receives one transfer from `serial` into `sink`.
pub fn receive(
    serial: Box<dyn Transport>,
    sink: Box<dyn ByteSink>,
    config: &TransferConfig,
    cancel: CancelToken,
) -> Result<TransferSummary, TransferError> {
    run(ReceiverFsm::new(serial, sink, config, cancel))
}

// ============================================================================
// Tests
// ============================================================================
