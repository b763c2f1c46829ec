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

//! XMODEM protocol constants

use std::fmt;

/// Start of header - begins a 128-byte block
pub const SOH: u8 = 0x01;

/// Start of text - begins a 1024-byte block (XMODEM-1k)
pub const STX: u8 = 0x02;

/// End of transmission - sender has no more blocks
pub const EOT: u8 = 0x04;

/// Acknowledge - receiver accepted the block or EOT
pub const ACK: u8 = 0x06;

/// Negative acknowledge - retransmit, or checksum-mode handshake
pub const NAK: u8 = 0x15;

/// Cancel - aborts the session from either side
pub const CAN: u8 = 0x18;

/// CRC-mode handshake
pub const CRC_REQUEST: u8 = b'C';

/// Ctrl-Z, fills the tail of a short final block
pub const PAD: u8 = 0x1A;

/// Every control byte that can appear on the wire outside of a block body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Soh,
    Stx,
    Eot,
    Ack,
    Nak,
    Can,
    CrcRequest,
}

impl Control {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOH => Some(Control::Soh),
            STX => Some(Control::Stx),
            EOT => Some(Control::Eot),
            ACK => Some(Control::Ack),
            NAK => Some(Control::Nak),
            CAN => Some(Control::Can),
            CRC_REQUEST => Some(Control::CrcRequest),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Control::Soh => SOH,
            Control::Stx => STX,
            Control::Eot => EOT,
            Control::Ack => ACK,
            Control::Nak => NAK,
            Control::Can => CAN,
            Control::CrcRequest => CRC_REQUEST,
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Control::Soh => "SOH",
            Control::Stx => "STX",
            Control::Eot => "EOT",
            Control::Ack => "ACK",
            Control::Nak => "NAK",
            Control::Can => "CAN",
            Control::CrcRequest => "'C'",
        };
        f.write_str(name)
    }
}

/// Human readable name for a byte seen on the line, used in logs and errors.
pub fn describe_byte(byte: u8) -> String {
    match Control::from_byte(byte) {
        Some(control) => control.to_string(),
        None => format!("0x{:02X}", byte),
    }
}

/// Payload size of a block, selected by its start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSize {
    /// 128 bytes, framed with SOH
    Standard,
    /// 1024 bytes, framed with STX
    OneK,
}

impl BlockSize {
    pub fn payload_len(self) -> usize {
        match self {
            BlockSize::Standard => 128,
            BlockSize::OneK => 1024,
        }
    }

    pub fn marker(self) -> Control {
        match self {
            BlockSize::Standard => Control::Soh,
            BlockSize::OneK => Control::Stx,
        }
    }

    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            SOH => Some(BlockSize::Standard),
            STX => Some(BlockSize::OneK),
            _ => None,
        }
    }
}

/// Error detection scheme, fixed for the whole session by the receiver's handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionMode {
    /// 8-bit additive checksum, requested with NAK
    Checksum,
    /// CRC-16/XMODEM, requested with 'C'
    Crc,
}

impl DetectionMode {
    /// Trailer length in bytes.
    pub fn code_len(self) -> usize {
        match self {
            DetectionMode::Checksum => 1,
            DetectionMode::Crc => 2,
        }
    }

    /// Handshake byte a receiver sends to request this mode.
    pub fn handshake(self) -> Control {
        match self {
            DetectionMode::Checksum => Control::Nak,
            DetectionMode::Crc => Control::CrcRequest,
        }
    }

    pub fn from_handshake(byte: u8) -> Option<Self> {
        match Control::from_byte(byte)? {
            Control::Nak => Some(DetectionMode::Checksum),
            Control::CrcRequest => Some(DetectionMode::Crc),
            _ => None,
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMode::Checksum => f.write_str("checksum"),
            DetectionMode::Crc => f.write_str("CRC-16"),
        }
    }
}

/// Total on-wire length of a block: marker, sequence, complement, payload, trailer.
pub fn frame_len(block_size: BlockSize, mode: DetectionMode) -> usize {
    3 + block_size.payload_len() + mode.code_len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_bytes_round_trip() {
        for byte in [SOH, STX, EOT, ACK, NAK, CAN, CRC_REQUEST] {
            let control = Control::from_byte(byte).expect("known control byte");
            assert_eq!(control.as_byte(), byte);
        }
        assert_eq!(Control::from_byte(PAD), None);
        assert_eq!(Control::from_byte(b'X'), None);
    }

    #[test]
    fn test_describe_byte() {
        assert_eq!(describe_byte(ACK), "ACK");
        assert_eq!(describe_byte(CRC_REQUEST), "'C'");
        assert_eq!(describe_byte(0x7F), "0x7F");
    }

    #[test]
    fn test_block_size_markers() {
        assert_eq!(BlockSize::from_marker(SOH), Some(BlockSize::Standard));
        assert_eq!(BlockSize::from_marker(STX), Some(BlockSize::OneK));
        assert_eq!(BlockSize::from_marker(EOT), None);
        assert_eq!(BlockSize::OneK.marker(), Control::Stx);
    }

    #[test]
    fn test_handshake_selects_mode() {
        assert_eq!(DetectionMode::from_handshake(NAK), Some(DetectionMode::Checksum));
        assert_eq!(DetectionMode::from_handshake(b'C'), Some(DetectionMode::Crc));
        assert_eq!(DetectionMode::from_handshake(ACK), None);
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(BlockSize::Standard, DetectionMode::Checksum), 132);
        assert_eq!(frame_len(BlockSize::Standard, DetectionMode::Crc), 133);
        assert_eq!(frame_len(BlockSize::OneK, DetectionMode::Crc), 1029);
    }
}
