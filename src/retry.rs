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

//! Bounded retry loop shared by every exchange in a session
//!
//! Timeouts, NAKs, garbage and bad frames all spend one attempt from the same
//! budget. A fatal error returned by the attempt (peer cancel, I/O failure)
//! leaves the loop immediately without being retried.

use log::warn;
use crate::error::TransferError;

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T, F = Option<u8>> {
    Done(T),
    /// Try again. Carries what went wrong, reported if the budget runs out.
    Retry(F),
}

/// Budget ran out before an attempt succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<F> {
    pub attempts: u32,
    pub last_failure: F,
}

/// Runs `attempt` with 1-based attempt numbers until it finishes, fails
/// fatally, or `limit` attempts have been spent.
///
/// A `limit` of zero still makes one attempt.
pub fn with_retries<T, F, A>(limit: u32, mut attempt: A) -> Result<Result<T, Exhausted<F>>, TransferError>
where
    F: Default,
    A: FnMut(u32) -> Result<Attempt<T, F>, TransferError>,
{
    let limit = limit.max(1);
    let mut last_failure = F::default();

    for n in 1..=limit {
        match attempt(n)? {
            Attempt::Done(value) => return Ok(Ok(value)),
            Attempt::Retry(failure) => {
                if n < limit {
                    warn!("Attempt {}/{} failed, retrying", n, limit);
                }
                last_failure = failure;
            }
        }
    }

    Ok(Err(Exhausted { attempts: limit, last_failure }))
}
