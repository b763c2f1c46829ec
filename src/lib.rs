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

//! XMODEM and XMODEM-1k file transfer over a serial line
//!
//! The engine runs over any [`Transport`]: a [`RealSerialPort`] in the
//! `xmlink` binary, or an in-memory link in tests. Data comes from a
//! [`ByteSource`] and goes to a [`ByteSink`], so files, buffers and pipes
//! all work the same way.

pub mod checksum;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod receiver;
pub mod retry;
pub mod sender;
pub mod serial;
pub mod session;
pub mod stream;

pub use error::{BlockFault, TransferError};
pub use protocol::{BlockSize, DetectionMode};
pub use receiver::receive;
pub use sender::send;
pub use serial::{PortSettings, RealSerialPort, Transport};
pub use session::{CancelToken, TransferConfig, TransferSummary};
pub use stream::{ByteSink, ByteSource};
