// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Kernel operations either fail up front with an [`abi::KernelError`],
//! or they succeed with a [`Completion`] describing where the result
//! went. Nothing in between: once an operation has parked its caller, its
//! outcome travels through the woken process's saved state, never through
//! this return path.

use abi::OK;

/// Outcome of a kernel operation that may suspend its caller.
///
/// This is marked `must_use` because dropping one silently loses the
/// distinction between "the caller has its answer" and "the caller is
/// blocked and someone else is running now" -- and acting on the wrong
/// assumption there would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum Completion {
    /// The operation finished in the caller's context; this is the value
    /// the caller observes.
    Done(i32),
    /// The caller was parked and the scheduler has moved on. Its eventual
    /// result will be deposited into its saved state by whatever wakes
    /// it: a signal, a message, a deletion, or the tick handler's timeout
    /// scan.
    Pending,
}

impl Completion {
    /// Shorthand for the common "finished, succeeded" outcome.
    pub fn ok() -> Self {
        Self::Done(OK)
    }
}
