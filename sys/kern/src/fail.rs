// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel panics such that they can be found by
//! tooling.
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`. It is cleared to zero
//!   (false) at boot, and set to one (true) if the kernel reaches the
//!   `die` function. If it contains any other value, the kernel has
//!   either not yet booted, or has corrupted memory on the way down.
//!
//! - `kern::fail::KERNEL_EPITAPH` is an array of `u8`. The `die` routine
//!   writes as much of the failure reason into this buffer (as UTF-8) as
//!   possible, truncating if the buffer fills. The number of bytes
//!   written isn't recorded anywhere; instead, for printing, trim off
//!   any trailing NUL bytes.
//!
//! `die` is for kernel-internal malfunction only -- interrupt-context
//! misuse, corrupted tables. User errors come back as result codes and
//! never land here.

use core::fmt::{Display, Write};

/// Flag that gets set to `true` by all failure reporting functions,
/// giving tools a one-stop-shop for doing kernel triage.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

/// The "epitaph" buffer records up to `EPITAPH_LEN` bytes of description
/// of the event that caused the kernel to fail, padded with NULs.
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: we only access this from this one site, and only zero or
    // one times in practice -- never from a context where concurrency or
    // interrupts are enabled.
    let previous_fail = unsafe {
        core::ptr::replace(
            core::ptr::addr_of_mut!(KERNEL_HAS_FAILED),
            true,
        )
    };
    if previous_fail {
        // Welp, you've called begin_epitaph twice, suggesting a
        // recursive panic. We can't very well panic in response to this
        // since it'll just make the problem worse.
        loop {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }

    // Safety: we can get a mutable reference to the epitaph because only
    // one execution of this function will successfully set that flag.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Formats `msg` into `dest`, truncating rather than failing when it
/// doesn't fit.
fn compose(dest: &mut [u8], msg: &dyn Display) {
    let mut writer = Eulogist { dest };
    write!(writer, "{msg}").ok();
}

/// Records the reason and halts the system. Never returns, never
/// recovers; interrupts stay disabled.
#[inline(never)]
pub fn die(msg: impl Display) -> ! {
    let _mask = crate::gate::disable();
    let buf = begin_epitaph();
    compose(buf, &msg);
    halt(buf)
}

#[cfg(target_os = "none")]
fn halt(_buf: &[u8]) -> ! {
    loop {
        // Platform-independent NOP.
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(not(target_os = "none"))]
fn halt(buf: &[u8]) -> ! {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    panic!(
        "kernel died: {}",
        core::str::from_utf8(&buf[..end]).unwrap_or("(unprintable)")
    )
}

struct Eulogist<'a> {
    dest: &'a mut [u8],
}

impl Write for Eulogist<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_writes_the_message() {
        let mut buf = [0u8; 32];
        compose(&mut buf, &"tick handler inconsistency");
        assert_eq!(&buf[..26], b"tick handler inconsistency");
        assert!(buf[26..].iter().all(|&b| b == 0));
    }

    #[test]
    fn compose_truncates_instead_of_failing() {
        let mut buf = [0u8; 8];
        compose(&mut buf, &format_args!("pid {} state {}", 12, 34));
        assert_eq!(&buf, b"pid 12 s");
    }

    #[test]
    fn compose_handles_multiple_fragments() {
        let mut buf = [0u8; 16];
        compose(&mut buf, &format_args!("{}-{}", "left", "right"));
        assert_eq!(&buf[..10], b"left-right");
    }
}
