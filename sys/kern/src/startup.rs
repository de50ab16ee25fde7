// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;
use crate::atomic::AtomicExt;
use crate::state::Kernel;

/// Guards the one `&mut Kernel` in existence.
///
/// All kernel state lives in the single value in `KERNEL_SPACE`, and
/// both syscall dispatch and interrupt stubs reach it through
/// `with_kernel`. This flag is how a second entry gets caught -- a
/// reentrant call, or a call before `start_kernel` has written the
/// state at all, which is why it starts out `true` and only
/// `start_kernel` clears it.
static KERNEL_IN_USE: AtomicBool = AtomicBool::new(true);

static mut KERNEL_SPACE: MaybeUninit<Kernel> = MaybeUninit::uninit();

/// The main kernel entry point.
///
/// The platform's reset path does basic hardware setup and then calls
/// this. `tick_divisor` is its way of converting machine time into
/// kernel ticks (CPU cycles per tick on a cycle-counter timer).
///
/// Boot state: the tables are empty and the null process (PID 0) owns
/// the CPU, running on the boot stack. Platform code brings up the rest
/// of the system from timer callbacks and interrupt-driven syscalls.
///
/// # Safety
///
/// Must be called exactly once per boot, from the boot stack, with
/// interrupts masked. It must not be called reentrantly.
pub unsafe fn start_kernel(tick_divisor: u32) -> ! {
    klog!("kernel start");
    arch::program_timer(tick_divisor);

    // Safety: KERNEL_IN_USE is still true, so `with_kernel` cannot hand
    // out a reference yet, and the once-per-boot contract means no other
    // writer exists.
    let space = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_SPACE) };
    let kernel = space.write(Kernel::new());

    KERNEL_IN_USE.store(false, Ordering::Release);
    arch::start_first_process(kernel.pcb(abi::Pid::NULL).save())
}

/// Runs `body` on the kernel state.
///
/// There is one `Kernel` and at most one `&mut` to it at a time. A
/// nested call from inside `body` would mint a second, so it panics
/// instead; on hardware the critical-section gate keeps interrupt
/// handlers from ever getting that far, and hitting the panic means a
/// kernel bug rather than bad timing.
pub fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    if KERNEL_IN_USE.swap_polyfill(true, Ordering::Acquire) {
        panic!(); // reentered, or called before start_kernel
    }
    // Safety: the flag was false, which only happens once start_kernel
    // has written KERNEL_SPACE and only while no other `with_kernel`
    // body is live, so this reference is the only one into the state.
    let kernel = unsafe {
        (*core::ptr::addr_of_mut!(KERNEL_SPACE)).assume_init_mut()
    };
    let r = body(kernel);
    KERNEL_IN_USE.store(false, Ordering::Release);
    r
}
