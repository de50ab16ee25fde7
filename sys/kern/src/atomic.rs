// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel atomic type support.
//!
//! Some targets this kernel is meant to reach lack the read-modify-write
//! atomics that `core::sync::atomic` exposes on larger machines, and the
//! libcore `cfg`s that decide are not ours to inspect. This trait names
//! the one operation the kernel relies on, so each architecture module can
//! route it to the native instruction or a masked-interrupt polyfill.

use core::sync::atomic::Ordering;

/// An atomic type with the operations we need in the kernel.
///
/// Implementations of this trait live in the `arch::whatever` module for
/// the target architecture.
pub(crate) trait AtomicExt {
    type Primitive;
    fn swap_polyfill(
        &self,
        value: Self::Primitive,
        ordering: Ordering,
    ) -> Self::Primitive;
}
