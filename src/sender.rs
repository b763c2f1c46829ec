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
use std::time::Instant;
use log::{debug, info, warn};
use crate::error::TransferError;
use crate::frame;
use crate::protocol::*;
use crate::retry::{with_retries, Attempt};
use crate::serial::{read_byte_until, Transport};
use crate::session::{CancelToken, Role, Session, TransferConfig, TransferSummary};
use crate::stream::ByteSource;

// ============================================================================
// States
// ============================================================================

pub struct AwaitHandshake;
pub struct SendBlock;
pub struct AwaitAck;
pub struct SendEot;
pub struct AwaitEotAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn Transport>,
    source: Box<dyn ByteSource>,
    session: Session,
    cancel: CancelToken,
    // Encoded block in flight, resent verbatim on NAK
    frame: Vec<u8>,
    // Source bytes carried by `frame`, before padding
    frame_len: usize,
}

// ============================================================================
// Trait
// ============================================================================

pub enum SenderStep {
    Next(Box<dyn SenderState>),
    Done(TransferSummary),
}

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S: Send + 'static> SenderFsm<S> {
    fn transition<T: Send + 'static>(self) -> SenderStep
    where
        SenderFsm<T>: SenderState,
    {
        SenderStep::Next(Box::new(SenderFsm::<T> {
            state: PhantomData,
            serial: self.serial,
            source: self.source,
            session: self.session,
            cancel: self.cancel,
            frame: self.frame,
            frame_len: self.frame_len,
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

    /// Tells the receiver to stop, then surfaces `err`.
    fn fail(mut self, err: TransferError) -> Result<SenderStep, TransferError> {
        warn!("Aborting transfer: {}", err);
        if self.serial.write_all(&[CAN, CAN]).and_then(|_| self.serial.flush()).is_err() {
            debug!("Could not deliver CAN to receiver");
        }
        Err(err)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<AwaitHandshake> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.session.timeout;
        let sequence = fsm.session.sequence;
        let serial = &mut fsm.serial;

        let outcome = with_retries::<_, Option<u8>, _>(fsm.session.retry_limit, |attempt| {
            let deadline = Instant::now() + timeout;
            loop {
                let Some(byte) = read_byte_until(serial.as_mut(), deadline).map_err(Self::io_error)? else {
                    debug!("No handshake yet (attempt {})", attempt);
                    return Ok(Attempt::Retry(None));
                };
                if let Some(mode) = DetectionMode::from_handshake(byte) {
                    debug!("Received: {}", describe_byte(byte));
                    return Ok(Attempt::Done(mode));
                }
                if byte == CAN {
                    return Err(TransferError::PeerCancelled { sequence });
                }
                debug!("Ignoring {} while waiting for handshake", describe_byte(byte));
            }
        })?;

        match outcome {
            Ok(mode) => {
                info!("Receiver requested {} mode", mode);
                fsm.session.mode = mode;
                fsm.session.sequence = 1;
                Ok(fsm.transition::<SendBlock>())
            }
            Err(exhausted) => fsm.fail(TransferError::NoHandshake { attempts: exhausted.attempts }),
        }
    }
}

impl SenderState for SenderFsm<SendBlock> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        let sequence = fsm.session.sequence;

        if fsm.cancel.is_cancelled() {
            return fsm.fail(TransferError::Cancelled { sequence });
        }

        let chunk = match fsm.source.next_chunk(fsm.session.block_size.payload_len()) {
            Ok(chunk) => chunk,
            Err(e) => return fsm.fail(TransferError::Io(e)),
        };

        let Some(data) = chunk else {
            debug!("Source exhausted after {} bytes", fsm.session.bytes_transferred);
            return Ok(fsm.transition::<SendEot>());
        };

        let block = match frame::encode(sequence, &data, fsm.session.mode, fsm.session.block_size) {
            Ok(block) => block,
            Err(e) => return fsm.fail(e.into()),
        };
        fsm.frame = block.to_bytes();
        fsm.frame_len = data.len();

        fsm.serial.write_all(&fsm.frame).map_err(Self::io_error)?;
        fsm.serial.flush().map_err(Self::io_error)?;
        debug!("Sent: {}", block);

        Ok(fsm.transition::<AwaitAck>())
    }
}

impl SenderState for SenderFsm<AwaitAck> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.session.timeout;
        let sequence = fsm.session.sequence;
        // Receivers re-signal 'C' until the first block lands
        let first_block = fsm.session.blocks == 0;
        let serial = &mut fsm.serial;
        let frame = &fsm.frame;
        let retransmissions = &mut fsm.session.retransmissions;

        let outcome = with_retries(fsm.session.retry_limit, |attempt| {
            if attempt > 1 {
                serial.write_all(frame).map_err(Self::io_error)?;
                serial.flush().map_err(Self::io_error)?;
                *retransmissions += 1;
                debug!("Sent: block {} again (attempt {})", sequence, attempt);
            }

            let deadline = Instant::now() + timeout;
            loop {
                let Some(byte) = read_byte_until(serial.as_mut(), deadline).map_err(Self::io_error)? else {
                    warn!("Block {}: no response", sequence);
                    return Ok(Attempt::Retry(None));
                };
                match Control::from_byte(byte) {
                    Some(Control::Ack) => {
                        debug!("Received: ACK for block {}", sequence);
                        return Ok(Attempt::Done(()));
                    }
                    Some(Control::Can) => return Err(TransferError::PeerCancelled { sequence }),
                    Some(Control::CrcRequest) if first_block => {
                        debug!("Ignoring repeated handshake");
                    }
                    _ => {
                        warn!("Block {}: received {}", sequence, describe_byte(byte));
                        return Ok(Attempt::Retry(Some(byte)));
                    }
                }
            }
        })?;

        match outcome {
            Ok(()) => {
                fsm.session.bytes_transferred += fsm.frame_len as u64;
                fsm.session.advance();
                Ok(fsm.transition::<SendBlock>())
            }
            Err(exhausted) => fsm.fail(TransferError::RetriesExhausted {
                sequence,
                attempts: exhausted.attempts,
                last_response: exhausted.last_failure,
            }),
        }
    }
}

impl SenderState for SenderFsm<SendEot> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        fsm.serial.write_all(&[EOT]).map_err(Self::io_error)?;
        fsm.serial.flush().map_err(Self::io_error)?;
        debug!("Sent: EOT");
        Ok(fsm.transition::<AwaitEotAck>())
    }
}

impl SenderState for SenderFsm<AwaitEotAck> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.session.timeout;
        let sequence = fsm.session.sequence;
        let serial = &mut fsm.serial;

        let outcome = with_retries::<_, Option<u8>, _>(fsm.session.retry_limit, |attempt| {
            if attempt > 1 {
                serial.write_all(&[EOT]).map_err(Self::io_error)?;
                serial.flush().map_err(Self::io_error)?;
                debug!("Sent: EOT again (attempt {})", attempt);
            }

            let deadline = Instant::now() + timeout;
            match read_byte_until(serial.as_mut(), deadline).map_err(Self::io_error)? {
                Some(ACK) => {
                    debug!("Received: ACK for EOT");
                    Ok(Attempt::Done(()))
                }
                Some(CAN) => Err(TransferError::PeerCancelled { sequence }),
                other => {
                    warn!("EOT not acknowledged: {}", other.map(describe_byte).unwrap_or_else(|| "no response".into()));
                    Ok(Attempt::Retry(other))
                }
            }
        })?;

        match outcome {
            Ok(()) => {
                let summary = fsm.session.summary();
                info!("Sent {} bytes in {} blocks", summary.bytes, summary.blocks);
                Ok(SenderStep::Done(summary))
            }
            Err(exhausted) => {
                let bytes = fsm.session.bytes_transferred;
                fsm.fail(TransferError::EotNotAcked { attempts: exhausted.attempts, bytes })
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<AwaitHandshake> {
    pub fn new(
        serial: Box<dyn Transport>,
        source: Box<dyn ByteSource>,
        config: &TransferConfig,
        cancel: CancelToken,
    ) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<AwaitHandshake>,
            serial,
            source,
            session: Session::new(Role::Sender, config),
            cancel,
            frame: Vec::new(),
            frame_len: 0,
        })
    }
}

/// Drives a sender to completion.
pub fn run(mut state: Box<dyn SenderState>) -> Result<TransferSummary, TransferError> {
    loop {
        match state.step()? {
            SenderStep::Next(next) => state = next,
            SenderStep::Done(summary) => return Ok(summary),
        }
    }
}

/// Sends everything `source` yields over `serial`.
pub fn send(
    serial: Box<dyn Transport>,
    source: Box<dyn ByteSource>,
    config: &TransferConfig,
    cancel: CancelToken,
) -> Result<TransferSummary, TransferError> {
    run(SenderFsm::new(serial, source, config, cancel))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::Ordering;
    use crate::serial::MockSerialPort;

    fn block(sequence: u8, data: &[u8], mode: DetectionMode, size: BlockSize) -> Vec<u8> {
        frame::encode(sequence, data, mode, size).unwrap().to_bytes()
    }

    fn sender(mock: MockSerialPort, data: &[u8], config: &TransferConfig) -> Box<dyn SenderState> {
        SenderFsm::new(Box::new(mock), Box::new(Cursor::new(data.to_vec())), config, CancelToken::new())
    }

    #[test]
    fn test_sender_full_transfer_checksum() {
        let content: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let responses = vec![Some(NAK), Some(ACK), Some(ACK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        for (i, chunk) in content.chunks(128).enumerate() {
            expected_writes.extend(block(i as u8 + 1, chunk, DetectionMode::Checksum, BlockSize::Standard));
        }
        expected_writes.push(EOT);

        let mock = MockSerialPort::new(responses, expected_writes);
        let summary = run(sender(mock, &content, &TransferConfig::default())).expect("transfer");

        assert_eq!(summary.mode, DetectionMode::Checksum);
        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.bytes, 300);
        assert_eq!(summary.retransmissions, 0);
    }

    #[test]
    fn test_sender_crc_1k() {
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK)];

        let mut expected_writes = block(1, b"Test data", DetectionMode::Crc, BlockSize::OneK);
        expected_writes.push(EOT);

        let mock = MockSerialPort::new(responses, expected_writes);
        let config = TransferConfig::default().with_block_size(BlockSize::OneK);
        let summary = run(sender(mock, b"Test data", &config)).expect("transfer");

        assert_eq!(summary.mode, DetectionMode::Crc);
        assert_eq!(summary.block_size, BlockSize::OneK);
        assert_eq!(summary.bytes, 9);
    }

    #[test]
    fn test_sender_nak_resends_identical_block() {
        let responses = vec![Some(CRC_REQUEST), Some(NAK), Some(ACK), Some(ACK)];

        let first = block(1, b"retry", DetectionMode::Crc, BlockSize::Standard);
        let mut expected_writes = first.clone();
        expected_writes.extend(&first);
        expected_writes.push(EOT);

        let mock = MockSerialPort::new(responses, expected_writes);
        let summary = run(sender(mock, b"retry", &TransferConfig::default())).expect("transfer");

        assert_eq!(summary.blocks, 1);
        assert_eq!(summary.retransmissions, 1);
    }

    #[test]
    fn test_sender_garbage_counts_as_nak() {
        let responses = vec![Some(CRC_REQUEST), Some(b'?'), Some(ACK), Some(ACK)];

        let first = block(1, b"noise", DetectionMode::Crc, BlockSize::Standard);
        let mut expected_writes = first.clone();
        expected_writes.extend(&first);
        expected_writes.push(EOT);

        let mock = MockSerialPort::new(responses, expected_writes);
        run(sender(mock, b"noise", &TransferConfig::default())).expect("transfer");
    }

    #[test]
    fn test_sender_ignores_repeated_handshake_on_first_block() {
        let responses = vec![Some(CRC_REQUEST), Some(CRC_REQUEST), Some(ACK), Some(ACK)];

        let mut expected_writes = block(1, b"x", DetectionMode::Crc, BlockSize::Standard);
        expected_writes.push(EOT);

        let mock = MockSerialPort::new(responses, expected_writes);
        let summary = run(sender(mock, b"x", &TransferConfig::default())).expect("transfer");
        assert_eq!(summary.retransmissions, 0);
    }

    #[test]
    fn test_sender_handshake_ignores_noise_then_retries() {
        let responses = vec![Some(0x55), None, Some(NAK), Some(ACK)];

        let mock = MockSerialPort::new(responses, vec![EOT]);
        let summary = run(sender(mock, b"", &TransferConfig::default())).expect("empty transfer");

        assert_eq!(summary.blocks, 0);
        assert_eq!(summary.bytes, 0);
    }

    #[test]
    fn test_sender_no_handshake() {
        let responses = vec![None, None, None];

        let mock = MockSerialPort::new(responses, vec![CAN, CAN]);
        let config = TransferConfig::default().with_retry_limit(3);
        let err = run(sender(mock, b"data", &config)).unwrap_err();

        assert!(matches!(err, TransferError::NoHandshake { attempts: 3 }), "{:?}", err);
    }

    #[test]
    fn test_sender_silent_receiver_exhausts_exactly_limit() {
        let responses = vec![Some(CRC_REQUEST)];

        let first = block(1, b"lost", DetectionMode::Crc, BlockSize::Standard);
        let mut expected_writes = Vec::new();
        for _ in 0..4 {
            expected_writes.extend(&first);
        }
        expected_writes.extend([CAN, CAN]);

        let mock = MockSerialPort::new(responses, expected_writes);
        let read_calls = mock.read_calls();
        let config = TransferConfig::default().with_retry_limit(4);
        let err = run(sender(mock, b"lost", &config)).unwrap_err();

        assert!(matches!(
            err,
            TransferError::RetriesExhausted { sequence: 1, attempts: 4, last_response: None }
        ), "{:?}", err);
        // handshake + one read per exchange
        assert_eq!(read_calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_sender_peer_cancel_stops_immediately() {
        let content = vec![0x42u8; 300];
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(CAN)];

        let mut expected_writes = block(1, &content[..128], DetectionMode::Crc, BlockSize::Standard);
        expected_writes.extend(block(2, &content[128..256], DetectionMode::Crc, BlockSize::Standard));

        let mock = MockSerialPort::new(responses, expected_writes);
        let read_calls = mock.read_calls();
        let err = run(sender(mock, &content, &TransferConfig::default())).unwrap_err();

        assert!(matches!(err, TransferError::PeerCancelled { sequence: 2 }), "{:?}", err);
        assert_eq!(read_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_sender_eot_not_acked_is_soft() {
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(NAK), None];

        let mut expected_writes = block(1, b"hello", DetectionMode::Crc, BlockSize::Standard);
        expected_writes.extend([EOT, EOT, CAN, CAN]);

        let mock = MockSerialPort::new(responses, expected_writes);
        let config = TransferConfig::default().with_retry_limit(2);
        let err = run(sender(mock, b"hello", &config)).unwrap_err();

        assert!(err.is_soft());
        assert!(matches!(err, TransferError::EotNotAcked { attempts: 2, bytes: 5 }), "{:?}", err);
    }

    #[test]
    fn test_sender_local_cancel_between_blocks() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let mock = MockSerialPort::new(vec![Some(CRC_REQUEST)], vec![CAN, CAN]);
        let fsm = SenderFsm::new(
            Box::new(mock),
            Box::new(Cursor::new(b"never sent".to_vec())),
            &TransferConfig::default(),
            cancel,
        );
        let err = run(fsm).unwrap_err();

        assert!(matches!(err, TransferError::Cancelled { sequence: 1 }), "{:?}", err);
    }

    #[test]
    fn test_sender_sequence_wraps() {
        let content: Vec<u8> = (0..257 * 128).map(|i| (i / 128) as u8).collect();

        let mut responses = vec![Some(CRC_REQUEST)];
        responses.extend(std::iter::repeat(Some(ACK)).take(258));

        let mut expected_writes = Vec::new();
        for (i, chunk) in content.chunks(128).enumerate() {
            expected_writes.extend(block((i + 1) as u8, chunk, DetectionMode::Crc, BlockSize::Standard));
        }
        expected_writes.push(EOT);

        // block 256 travels as sequence 0
        let offset = 255 * 133;
        assert_eq!(&expected_writes[offset..offset + 3], &[SOH, 0, 255]);

        let mock = MockSerialPort::new(responses, expected_writes);
        let summary = run(sender(mock, &content, &TransferConfig::default())).expect("transfer");
        assert_eq!(summary.blocks, 257);
    }

    #[test]
    fn test_sender_handshake_retry() {
        let responses = vec![None, Some(CRC_REQUEST)];

        let mock = MockSerialPort::new(responses, block(1, b"abc", DetectionMode::Crc, BlockSize::Standard));
        let mut fsm = sender(mock, b"abc", &TransferConfig::default());

        for _ in 0..2 {
            fsm = match fsm.step().expect("Should succeed") {
                SenderStep::Next(next) => next,
                SenderStep::Done(_) => panic!("finished early"),
            };
        }
    }
}
