// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel online profiling support.
//!
//! This is intended to help measure the timing of kernel events, the
//! duration of system calls, and the like, as an aid to debugging or
//! optimization work.
//!
//! Because the kernel is platform-independent, this module does not
//! assume any particular way of getting profiling information out.
//! Instead, a platform that wants profiling populates an `EventsTable`
//! and hands it to `configure_events_table` from its startup routine. A
//! typical implementation sets and clears GPIOs that an external logic
//! analyzer watches; keep the handlers fast.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Hooks provided by platform setup code if it wants profiling. If you
/// provide a table, you provide every hook; stub the ones you don't care
/// about with `|_| ()` / `|| ()`.
pub struct EventsTable {
    /// Called on entry to the system call dispatcher.
    pub syscall_enter: fn(u32),
    /// Called on exit from the system call dispatcher.
    pub syscall_exit: fn(),
    /// Called whenever the running process changes, with the new
    /// process's table index.
    pub context_switch: fn(usize),
}

/// Supplies the kernel with an events table.
pub fn configure_events_table(table: &'static EventsTable) {
    EVENTS_TABLE.store(table as *const _ as *mut _, Ordering::Relaxed);
}

/// Internal pointer written by `configure_events_table`. If this is
/// null, no event table has been provided. All accesses use `Relaxed`
/// because the table is written once at startup and read many times.
static EVENTS_TABLE: AtomicPtr<EventsTable> =
    AtomicPtr::new(core::ptr::null_mut());

fn table() -> Option<&'static EventsTable> {
    let p = EVENTS_TABLE.load(Ordering::Relaxed);
    if p.is_null() {
        None
    } else {
        // We only write this pointer from a valid `&'static`, and we're
        // handing out a shared reference, so this should be ok...
        unsafe { Some(&*p) }
    }
}

pub(crate) fn event_syscall_enter(nr: u32) {
    if let Some(t) = table() {
        (t.syscall_enter)(nr)
    }
}

pub(crate) fn event_syscall_exit() {
    if let Some(t) = table() {
        (t.syscall_exit)()
    }
}

pub(crate) fn event_context_switch(idx: usize) {
    if let Some(t) = table() {
        (t.context_switch)(idx)
    }
}
