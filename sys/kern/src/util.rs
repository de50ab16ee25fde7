// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common utility functions used in various places in the kernel.

use abi::Pid;

use crate::proc::Pcb;

/// Borrows two *different* processes out of the process table at once.
///
/// The context switch needs this: `ctxsw` stores into the outgoing
/// PCB's stack-pointer cell while reading the incoming PCB's saved
/// stack pointer, so both ends of the switch have to be held
/// simultaneously. Splitting the table at the higher index yields two
/// disjoint regions, one per PCB, with no raw pointers involved.
///
/// Panics if `a` and `b` name the same slot; the scheduler never
/// switches a process to itself, so reaching that panic means the
/// scheduler's bookkeeping is wrong.
pub(crate) fn pcb_pair(
    procs: &mut [Pcb],
    a: Pid,
    b: Pid,
) -> (&mut Pcb, &mut Pcb) {
    let (i, j) = (a.index(), b.index());
    uassert!(i != j);
    if i < j {
        let (lo, hi) = procs.split_at_mut(j);
        (&mut lo[i], &mut hi[0])
    } else {
        let (lo, hi) = procs.split_at_mut(i);
        (&mut hi[0], &mut lo[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::{Priority, ProcState};

    fn table() -> [Pcb; 4] {
        core::array::from_fn(|i| {
            Pcb::new(
                ProcState::Susp,
                Priority(i as u8),
                "x",
            )
        })
    }

    #[test]
    fn pair_is_disjoint_in_either_order() {
        let mut procs = table();
        let (a, b) = pcb_pair(&mut procs, Pid(0), Pid(3));
        assert_eq!(a.priority(), Priority(0));
        assert_eq!(b.priority(), Priority(3));

        // Same pair, reversed: each side still names its own slot.
        let (a, b) = pcb_pair(&mut procs, Pid(3), Pid(0));
        assert_eq!(a.priority(), Priority(3));
        assert_eq!(b.priority(), Priority(0));

        // Both halves are live mutable borrows at once.
        let (a, b) = pcb_pair(&mut procs, Pid(1), Pid(2));
        a.set_state(ProcState::Ready);
        b.set_state(ProcState::Curr);
        assert_eq!(procs[1].state(), ProcState::Ready);
        assert_eq!(procs[2].state(), ProcState::Curr);
    }

    #[test]
    #[should_panic]
    fn same_slot_panics() {
        let mut procs = table();
        let _ = pcb_pair(&mut procs, Pid(2), Pid(2));
    }
}
