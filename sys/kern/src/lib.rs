// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel core: a single-address-space executive that schedules a fixed
//! population of lightweight processes on one CPU, coordinates them with
//! counting semaphores and bounded message channels, and drives time from
//! a periodic tick.
//!
//! The code outside the `arch` module is portable; everything the CPU
//! actually has to do (save registers, swap stacks, mask interrupts) is
//! behind the `arch` interface. Hosted builds get a recording fake of that
//! interface, which is also how the test suite drives the kernel.
//!
//! # Design principles
//!
//! 1. Static configuration. Every table has a compile-time size from
//!    `abi`; the kernel performs no allocation of its own.
//! 2. All mutable kernel state is one owned [`state::Kernel`] value.
//!    Operations are plain functions over `&mut Kernel`, so the whole
//!    kernel can be exercised as a state machine from tests.
//! 3. A preference for simple and clear algorithms over fast and clever
//!    algorithms.
//! 4. Operations that can suspend the caller never pretend to have a
//!    result: they return [`err::Completion::Pending`] and the eventual
//!    result is deposited into the process's saved state by whatever
//!    wakes it.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod atomic;
pub mod clock;
pub mod err;
pub mod fail;
pub mod gate;
pub mod mailbox;
pub mod mem;
pub mod msg;
pub mod port;
pub mod proc;
pub mod profiling;
pub mod queue;
pub mod sched;
pub mod sem;
pub mod startup;
pub mod state;
pub mod syscalls;
pub mod util;
