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

//! Block error detection: 8-bit additive checksum and CRC-16/XMODEM

use std::fmt;
use crate::protocol::DetectionMode;

/// CRC-16/XMODEM lookup table (poly 0x1021, MSB first).
const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Sum of all bytes, modulo 256.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/XMODEM: initial value 0, no reflection, no final xor.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &b| {
        let index = ((crc >> 8) ^ b as u16) as usize;
        (crc << 8) ^ CRC16_TABLE[index]
    })
}

/// Detection trailer of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionCode {
    Checksum(u8),
    Crc(u16),
}

impl DetectionCode {
    pub fn compute(mode: DetectionMode, payload: &[u8]) -> Self {
        match mode {
            DetectionMode::Checksum => DetectionCode::Checksum(checksum8(payload)),
            DetectionMode::Crc => DetectionCode::Crc(crc16_xmodem(payload)),
        }
    }

    /// Reads a trailer in wire order. `bytes` must be exactly `mode.code_len()` long.
    pub fn from_wire(mode: DetectionMode, bytes: &[u8]) -> Option<Self> {
        match (mode, bytes) {
            (DetectionMode::Checksum, [sum]) => Some(DetectionCode::Checksum(*sum)),
            (DetectionMode::Crc, [hi, lo]) => Some(DetectionCode::Crc(u16::from_be_bytes([*hi, *lo]))),
            _ => None,
        }
    }

    pub fn mode(&self) -> DetectionMode {
        match self {
            DetectionCode::Checksum(_) => DetectionMode::Checksum,
            DetectionCode::Crc(_) => DetectionMode::Crc,
        }
    }

    /// Appends the trailer in wire order (CRC high byte first).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            DetectionCode::Checksum(sum) => out.push(*sum),
            DetectionCode::Crc(crc) => out.extend_from_slice(&crc.to_be_bytes()),
        }
    }
}

impl fmt::Display for DetectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionCode::Checksum(sum) => write!(f, "checksum 0x{:02X}", sum),
            DetectionCode::Crc(crc) => write!(f, "CRC 0x{:04X}", crc),
        }
    }
}
