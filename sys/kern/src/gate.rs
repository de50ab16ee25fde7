// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The critical-section gate.
//!
//! Every public kernel operation runs between a matched `disable` /
//! `restore` pair, so no interrupt handler observes intermediate state of
//! any kernel structure. Nesting is handled by mask passing rather than a
//! counter: each caller restores exactly the flag state it saw, so only
//! the outermost `restore` actually re-enables interrupts.

use crate::arch;

/// Saved interrupt state, returned by [`disable`] and consumed by
/// [`restore`]. Deliberately opaque so a mask can't be fabricated or
/// reused.
#[must_use]
pub struct IntMask(bool);

/// Disables interrupts, returning the previous state for `restore`.
///
/// May be called with interrupts already disabled; the returned mask
/// remembers that, and the matching `restore` leaves them disabled.
pub fn disable() -> IntMask {
    IntMask(arch::disable_interrupts())
}

/// Restores the interrupt state captured by the matching [`disable`].
pub fn restore(mask: IntMask) {
    arch::restore_interrupts(mask.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;

    #[test]
    fn disable_restore_round_trip() {
        assert!(arch::interrupts_enabled());
        let m = disable();
        assert!(!arch::interrupts_enabled());
        restore(m);
        assert!(arch::interrupts_enabled());
    }

    #[test]
    fn nested_sections_reenable_only_at_outermost() {
        let outer = disable();
        let inner = disable();
        restore(inner);
        // Inner restore must not re-enable; the outer section is still
        // open.
        assert!(!arch::interrupts_enabled());
        restore(outer);
        assert!(arch::interrupts_enabled());
    }
}
