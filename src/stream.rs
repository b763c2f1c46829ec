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

//! Byte source and sink for the data being transferred

use std::io::{self, ErrorKind, Read, Write};

/// Data to send, pulled one block at a time.
pub trait ByteSource: Send {
    /// Returns up to `block_size` bytes, fewer only at the end of the data.
    /// `Ok(None)` once the source is exhausted.
    fn next_chunk(&mut self, block_size: usize) -> io::Result<Option<Vec<u8>>>;
}

/// Destination for accepted payloads, appended in sequence order.
pub trait ByteSink: Send {
    fn append(&mut self, data: &[u8]) -> io::Result<()>;
}

impl<R: Read + Send> ByteSource for R {
    fn next_chunk(&mut self, block_size: usize) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; block_size];
        let mut filled = 0;
        while filled < block_size {
            match self.read(&mut chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        Ok(Some(chunk))
    }
}

impl<W: Write + Send> ByteSink for W {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)
    }
}
