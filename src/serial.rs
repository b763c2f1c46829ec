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

use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use serialport::{SerialPort as SerialPortTrait, ClearBuffer, DataBits, FlowControl, Parity, StopBits};

// ============================================================================
// Transport Trait
// ============================================================================

/// Byte link the protocol engine runs over.
///
/// `read_timeout` must block for at most `timeout` and report an expired
/// wait as `ErrorKind::TimedOut`.
pub trait Transport: Send {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

fn timed_out() -> io::Error {
    io::Error::new(ErrorKind::TimedOut, "read timed out")
}

/// Reads a single byte. `Ok(None)` on timeout.
pub fn read_byte(transport: &mut dyn Transport, timeout: Duration) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match transport.read_timeout(&mut buf, timeout) {
        Ok(1) => Ok(Some(buf[0])),
        Ok(_) => Ok(None),
        Err(e) if is_timeout(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads a single byte, waiting no later than `deadline`.
pub fn read_byte_until(transport: &mut dyn Transport, deadline: Instant) -> io::Result<Option<u8>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Ok(None);
    }
    read_byte(transport, remaining)
}

/// Fills `buf` completely. Each underlying read may wait up to `timeout`,
/// so a slow but steady line never times out mid-block.
pub fn read_exact_timeout(transport: &mut dyn Transport, buf: &mut [u8], timeout: Duration) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match transport.read_timeout(&mut buf[filled..], timeout) {
            Ok(0) => return Err(timed_out()),
            Ok(n) => filled += n,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Discards input until the line stays quiet for `quiet`, or `limit` has
/// passed in total. Returns the number of bytes dropped.
pub fn drain(transport: &mut dyn Transport, quiet: Duration, limit: Duration) -> io::Result<usize> {
    let deadline = Instant::now() + limit;
    let mut buf = [0u8; 64];
    let mut dropped = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(dropped);
        }
        match transport.read_timeout(&mut buf, quiet.min(remaining)) {
            Ok(0) => return Ok(dropped),
            Ok(n) => dropped += n,
            Err(e) if is_timeout(&e) => return Ok(dropped),
            Err(e) => return Err(e),
        }
    }
}

/// Writes and flushes one control byte.
pub fn send_byte(transport: &mut dyn Transport, byte: u8) -> io::Result<()> {
    transport.write_all(&[byte])?;
    transport.flush()
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Line settings for opening a real port.
#[derive(Debug, Clone)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

/// Serial port transport backed by the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(port_name: &str, settings: &PortSettings) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(settings.flow_control)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }

    /// Drops anything left over in the driver's buffers from a previous session.
    pub fn clear_buffers(&mut self) -> Result<(), serialport::Error> {
        self.port.clear(ClearBuffer::All)
    }
}

impl Transport for RealSerialPort {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(io::Error::other)?;
        self.port.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

/// Scripted stand-in for a serial port.
///
/// Each `Some(byte)` in the script is line data, each `None` one read that
/// times out. Reading past the end keeps timing out. On drop the whole script
/// must have been read and the bytes written must match `expected` exactly.
#[cfg(test)]
pub struct MockSerialPort {
    script: std::collections::VecDeque<Option<u8>>,
    consumed: usize,
    read_calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    written: Vec<u8>,
    expected: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(script: Vec<Option<u8>>, expected: Vec<u8>) -> Self {
        MockSerialPort {
            script: script.into(),
            consumed: 0,
            read_calls: Default::default(),
            written: Vec::new(),
            expected,
        }
    }

    /// Counter of `read_timeout` calls, still readable after the mock is boxed.
    pub fn read_calls(&self) -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        self.read_calls.clone()
    }
}

#[cfg(test)]
impl Transport for MockSerialPort {
    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        self.read_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        match self.script.front() {
            None => return Err(timed_out()),
            Some(None) => {
                self.script.pop_front();
                self.consumed += 1;
                return Err(timed_out());
            }
            Some(Some(_)) => {}
        }

        // Hand out bytes up to the next scripted timeout
        let mut n = 0;
        while n < buf.len() {
            let Some(&Some(byte)) = self.script.front() else { break };
            self.script.pop_front();
            self.consumed += 1;
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.written.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            self.script.is_empty(),
            "{} scripted reads left over after consuming {}: {:02X?}",
            self.script.len(),
            self.consumed,
            self.script
        );
        assert_eq!(
            self.written, self.expected,
            "unexpected bytes on the line\nwanted {:02X?}\n   got {:02X?}",
            self.expected, self.written
        );
    }
}
