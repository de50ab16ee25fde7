// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted stand-in for the architecture layer.
//!
//! Nothing here touches a real CPU. Context switches are recorded rather
//! than performed, the interrupt flag is a thread-local bool, and stack
//! frames are laid out arithmetically against addresses that are never
//! dereferenced. This is enough to run the entire kernel state machine
//! under `cargo test`.

use core::sync::atomic::Ordering;
use std::cell::Cell;

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

macro_rules! klog {
    ($($args:tt)*) => {
        println!($($args)*)
    };
}

/// Address a new process "returns" to when its entry function falls off
/// the end. A real port points this at the process-exit stub; here it only
/// has to be recognizable.
pub const EXIT_TRAMPOLINE: u32 = 0xfff0_0000;

/// Number of words in an initial frame besides the entry arguments: saved
/// r4-r12 plus r0-r3 slots (13), a zero frame pointer, the entry PC, and
/// the trampoline return address.
const FRAME_FIXED_WORDS: u32 = 16;

thread_local! {
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
    static CTX_SWITCHES: Cell<u32> = const { Cell::new(0) };
    static LAST_SWITCH: Cell<Option<(u32, u32)>> = const { Cell::new(None) };
}

/// Per-process register save area.
///
/// The fake keeps just enough to make scheduling and result delivery
/// observable: the saved stack pointer, the entry PC, and the register
/// that carries a system call's return value back to the process.
#[derive(Copy, Clone, Debug, Default)]
pub struct SavedState {
    sp: u32,
    pc: u32,
    ret: i32,
}

impl SavedState {
    /// Saved stack pointer.
    pub fn sp(&self) -> u32 {
        self.sp
    }

    /// The cell `ctxsw` stores the outgoing stack pointer into.
    pub fn sp_cell(&mut self) -> &mut u32 {
        &mut self.sp
    }

    /// Program counter the process will resume at.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Writes the value the process will observe as its system call
    /// result when it next runs.
    pub fn set_syscall_return(&mut self, v: i32) {
        self.ret = v;
    }

    /// Reads back the deposited system call result.
    pub fn syscall_return(&self) -> i32 {
        self.ret
    }
}

/// Context switch: store the outgoing stack pointer, adopt the incoming
/// one. The fake records the pair and returns immediately.
pub fn ctxsw(old_sp: &mut u32, new_sp: u32) {
    let old = *old_sp;
    CTX_SWITCHES.with(|c| c.set(c.get() + 1));
    LAST_SWITCH.with(|c| c.set(Some((old, new_sp))));
}

/// Number of context switches recorded on this thread.
pub fn ctx_switch_count() -> u32 {
    CTX_SWITCHES.with(|c| c.get())
}

/// The most recent `(old_sp, new_sp)` pair, if any switch has happened.
pub fn last_switch() -> Option<(u32, u32)> {
    LAST_SWITCH.with(|c| c.get())
}

/// Lays out the initial stack frame for a new process and fills in its
/// saved state.
///
/// The frame, from the high end of the stack down: the `args` words (as
/// the entry function's spilled arguments), the return address pointing at
/// the exit trampoline, the entry PC, a zero frame pointer, and the
/// callee-save register block. The saved stack pointer ends up below all
/// of that. A real port writes these words to memory; the fake only does
/// the arithmetic.
pub fn init_stack_frame(
    save: &mut SavedState,
    stack_top: u32,
    entry: u32,
    args: &[u32],
) {
    uassert!(stack_top % 4 == 0);
    save.sp = stack_top - 4 * (args.len() as u32 + FRAME_FIXED_WORDS);
    save.pc = entry;
    save.ret = 0;
}

/// Reads the current interrupt-enable flag and disables interrupts.
/// Returns the prior flag for `restore_interrupts`.
pub fn disable_interrupts() -> bool {
    INTERRUPTS_ENABLED.with(|c| c.replace(false))
}

/// Restores the interrupt-enable flag saved by `disable_interrupts`.
pub fn restore_interrupts(enabled: bool) {
    INTERRUPTS_ENABLED.with(|c| c.set(enabled));
}

/// Observes the interrupt-enable flag.
pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.with(|c| c.get())
}

/// Programs the periodic timer hardware. The fake has no hardware.
pub fn program_timer(_tick_divisor: u32) {}

/// Copies a process name out of user memory. The fake cannot dereference
/// user pointers, so names arriving through the raw syscall path are
/// empty; kernel-mode callers pass names through `proc::create` directly.
pub fn user_name(_ptr: u32) -> &'static str {
    ""
}

/// Hands the CPU to the first process. On hardware this loads the saved
/// state and drops to process context; the fake has nowhere to go.
pub fn start_first_process(_save: &SavedState) -> ! {
    panic!("entering process context")
}

impl crate::atomic::AtomicExt for core::sync::atomic::AtomicBool {
    type Primitive = bool;
    fn swap_polyfill(
        &self,
        value: Self::Primitive,
        ordering: Ordering,
    ) -> Self::Primitive {
        self.swap(value, ordering)
    }
}
