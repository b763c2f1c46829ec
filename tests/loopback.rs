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

//! Sender and receiver talking to each other over an in-memory line.

use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use xmlink::protocol::{ACK, EOT, NAK, PAD, SOH, STX};
use xmlink::{
    BlockSize, CancelToken, DetectionMode, TransferConfig, TransferError, TransferSummary, Transport,
};

// ============================================================================
// In-memory line
// ============================================================================

/// Damage applied to the Nth block frame written on an endpoint, counting retransmissions.
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Flip the detection code's last byte.
    Corrupt(usize),
    /// Put line noise in front of the frame.
    NoiseBefore(usize),
}

struct Endpoint {
    tx: Sender<u8>,
    rx: Receiver<u8>,
    // Bytes as the engine wrote them, before any fault
    written: Arc<Mutex<Vec<u8>>>,
    faults: Vec<Fault>,
    frames: usize,
}

fn line() -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let a = Endpoint { tx: a_tx, rx: a_rx, written: Default::default(), faults: Vec::new(), frames: 0 };
    let b = Endpoint { tx: b_tx, rx: b_rx, written: Default::default(), faults: Vec::new(), frames: 0 };
    (a, b)
}

impl Transport for Endpoint {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => buf[0] = byte,
            Err(RecvTimeoutError::Timeout) => return Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
            Err(RecvTimeoutError::Disconnected) => return Err(io::Error::new(ErrorKind::BrokenPipe, "peer hung up")),
        }
        let mut n = 1;
        while n < buf.len() {
            match self.rx.try_recv() {
                Ok(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                Err(_) => break,
            }
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.written.lock().unwrap().extend_from_slice(buf);

        let mut out = buf.to_vec();
        if buf.len() > 1 && (buf[0] == SOH || buf[0] == STX) {
            let index = self.frames;
            self.frames += 1;
            for fault in &self.faults {
                match *fault {
                    Fault::Corrupt(n) if n == index => {
                        let last = out.len() - 1;
                        out[last] ^= 0xFF;
                    }
                    Fault::NoiseBefore(n) if n == index => {
                        out.splice(0..0, [0x55, 0xAA, 0x55]);
                    }
                    _ => {}
                }
            }
        }

        for byte in out {
            self.tx.send(byte).map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "peer hung up"))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Source that trips a cancel token once `after` bytes have been read from it.
struct CancelAfter {
    inner: Cursor<Vec<u8>>,
    after: u64,
    token: CancelToken,
}

impl Read for CancelAfter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if self.inner.position() >= self.after {
            self.token.cancel();
        }
        Ok(n)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Outcome {
    sent: Result<TransferSummary, TransferError>,
    received: Result<TransferSummary, TransferError>,
    data: Vec<u8>,
    sender_wrote: Vec<u8>,
    receiver_wrote: Vec<u8>,
}

fn exchange<S>(source: S, send_config: TransferConfig, recv_config: TransferConfig, faults: Vec<Fault>, cancel: CancelToken) -> Outcome
where
    S: Read + Send + 'static,
{
    let (mut sender_end, receiver_end) = line();
    sender_end.faults = faults;
    let sender_wrote = sender_end.written.clone();
    let receiver_wrote = receiver_end.written.clone();
    let sink = SharedSink::default();

    let sending = thread::spawn(move || xmlink::send(Box::new(sender_end), Box::new(source), &send_config, cancel));
    let receiving = {
        let sink = sink.clone();
        thread::spawn(move || xmlink::receive(Box::new(receiver_end), Box::new(sink), &recv_config, CancelToken::new()))
    };

    let sent = sending.join().unwrap();
    let received = receiving.join().unwrap();
    let data = sink.0.lock().unwrap().clone();
    let sender_wrote = sender_wrote.lock().unwrap().clone();
    let receiver_wrote = receiver_wrote.lock().unwrap().clone();
    Outcome { sent, received, data, sender_wrote, receiver_wrote }
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn config() -> TransferConfig {
    TransferConfig::default().with_timeout(Duration::from_secs(2))
}

fn count(bytes: &[u8], byte: u8) -> usize {
    bytes.iter().filter(|&&b| b == byte).count()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_checksum_transfer_of_300_bytes() {
    let file = content(300);
    let outcome = exchange(
        Cursor::new(file.clone()),
        config(),
        config().with_crc_attempts(0),
        Vec::new(),
        CancelToken::new(),
    );

    let sent = outcome.sent.expect("send");
    let received = outcome.received.expect("receive");
    assert_eq!(sent.blocks, 3);
    assert_eq!(sent.bytes, 300);
    assert_eq!(sent.mode, DetectionMode::Checksum);
    assert_eq!(received.blocks, 3);

    // Padding is left for the caller to trim
    assert_eq!(outcome.data.len(), 384);
    assert!(outcome.data[300..].iter().all(|&b| b == PAD));
    assert_eq!(&outcome.data[..300], &file[..]);

    // One handshake, an ACK per block, one EOT and its ACK
    assert_eq!(outcome.receiver_wrote, vec![NAK, ACK, ACK, ACK, ACK]);
    assert_eq!(outcome.sender_wrote.len(), 3 * 132 + 1);
    assert_eq!(outcome.sender_wrote.last(), Some(&EOT));
}

#[test]
fn test_corrupted_block_is_resent_identically() {
    let file = content(300);
    let outcome = exchange(
        Cursor::new(file.clone()),
        config(),
        config().with_crc_attempts(0),
        vec![Fault::Corrupt(1)],
        CancelToken::new(),
    );

    let sent = outcome.sent.expect("send");
    let received = outcome.received.expect("receive");
    assert_eq!(sent.retransmissions, 1);
    assert_eq!(received.blocks, 3);
    assert_eq!(received.retransmissions, 1);
    assert_eq!(&outcome.data[..300], &file[..]);

    // Handshake NAK plus the NAK for the damaged frame
    assert_eq!(count(&outcome.receiver_wrote, NAK), 2);
    assert_eq!(count(&outcome.receiver_wrote, ACK), 4);

    // Block 2 goes out twice, byte for byte
    let frames = &outcome.sender_wrote;
    assert_eq!(frames.len(), 4 * 132 + 1);
    assert_eq!(frames[132..264], frames[264..396]);
    assert_eq!(frames[133], 2);
}

#[test]
fn test_crc_1k_transfer_with_known_length() {
    let file = content(3000);
    let outcome = exchange(
        Cursor::new(file.clone()),
        config().with_block_size(BlockSize::OneK),
        config().with_expected_length(Some(3000)),
        Vec::new(),
        CancelToken::new(),
    );

    let sent = outcome.sent.expect("send");
    let received = outcome.received.expect("receive");
    assert_eq!(sent.mode, DetectionMode::Crc);
    assert_eq!(sent.blocks, 3);
    assert_eq!(received.block_size, BlockSize::OneK);
    assert_eq!(received.bytes, 3000);
    assert_eq!(outcome.data, file);
    assert_eq!(outcome.sender_wrote.len(), 3 * 1029 + 1);
}

#[test]
fn test_noise_before_block_is_purged_and_retried() {
    let file = content(200);
    let outcome = exchange(
        Cursor::new(file.clone()),
        config(),
        config().with_expected_length(Some(200)),
        vec![Fault::NoiseBefore(1)],
        CancelToken::new(),
    );

    let sent = outcome.sent.expect("send");
    outcome.received.expect("receive");
    assert_eq!(sent.retransmissions, 1);
    assert_eq!(outcome.data, file);
}

#[test]
fn test_local_cancel_reaches_receiver() {
    let cancel = CancelToken::new();
    let source = CancelAfter { inner: Cursor::new(content(600)), after: 128, token: cancel.clone() };
    let outcome = exchange(source, config(), config(), Vec::new(), cancel);

    assert!(matches!(outcome.sent, Err(TransferError::Cancelled { sequence: 2 })), "{:?}", outcome.sent);
    assert!(matches!(outcome.received, Err(TransferError::PeerCancelled { sequence: 2 })), "{:?}", outcome.received);
    assert_eq!(outcome.data.len(), 128);
    // Receiver hangs up without answering the CAN
    assert_eq!(outcome.receiver_wrote.last(), Some(&ACK));
}

#[test]
fn test_empty_source_sends_only_eot() {
    let outcome = exchange(Cursor::new(Vec::new()), config(), config(), Vec::new(), CancelToken::new());

    let sent = outcome.sent.expect("send");
    let received = outcome.received.expect("receive");
    assert_eq!(sent.blocks, 0);
    assert_eq!(received.bytes, 0);
    assert!(outcome.data.is_empty());
    assert_eq!(outcome.sender_wrote, vec![EOT]);
}
