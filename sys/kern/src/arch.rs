// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here
//! in the `arch` module, tailored for the current target.
//!
//! Each architecture support module must define the same set of names:
//!
//! - `SavedState`: the per-process register save area, including the saved
//!   stack pointer cell.
//! - `ctxsw(old_sp, new_sp)`: the context switch primitive. Semantically
//!   it stores the outgoing CPU state, records the outgoing stack pointer
//!   in `old_sp`, and resumes execution on `new_sp`; it returns only when
//!   the outgoing side is later switched back in.
//! - `init_stack_frame`: lay out a new process's initial stack so that the
//!   first dispatch lands in its entry function with the argument words in
//!   place and a return address aiming at the process-exit trampoline.
//! - Interrupt flag control for the critical-section gate.
//! - `klog!` and `uassert!` macros.
//!
//! The hosted module (`fake`) records context switches instead of
//! performing them, which is what lets the rest of the kernel run under
//! `cargo test`.

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    } else {
        compile_error!("no context-switch support for this target yet");
    }
}
