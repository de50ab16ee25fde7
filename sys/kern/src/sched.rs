// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler.
//!
//! One priority-ordered ready list, descending, FIFO within a priority.
//! `resched` preempts only for a *strictly* higher priority arrival;
//! equals share cooperatively, rotated by `yield_now` (which the tick
//! handler invokes on quantum expiry).
//!
//! The null process is never linked into the ready list. When it loses
//! the CPU it is simply marked READY, and the empty-list fallback in
//! `switch_from` re-selects it.

use abi::{Pid, ProcState};

use crate::arch;
use crate::profiling;
use crate::state::Kernel;
use crate::util;

/// Deferred-reschedule control state.
#[derive(Default)]
pub(crate) struct SchedCtl {
    pub(crate) deferred: bool,
    pub(crate) pending: bool,
}

/// Marks `pid` READY and links it into the ready list (unless it is the
/// null process). Does not reschedule; callers decide when.
pub(crate) fn ready(k: &mut Kernel, pid: Pid) {
    k.procs[pid.index()].set_state(ProcState::Ready);
    if pid != Pid::NULL {
        let prio = i32::from(k.procs[pid.index()].priority().0);
        uassert!(k.queues.insert(pid, k.ready_q, prio).is_ok());
    }
}

/// Reschedules.
///
/// If the running process is still CURR and the head of the ready list
/// does not strictly beat its priority, nothing happens. Otherwise the
/// running process (if still CURR) is demoted into the ready list, the
/// most favored READY process takes the CPU (the null process if none),
/// and the context switch primitive runs.
pub fn resched(k: &mut Kernel) {
    if k.sched.deferred {
        k.sched.pending = true;
        return;
    }
    let old = k.current;
    if k.procs[old.index()].state() == ProcState::Curr {
        let preempt = match k.queues.first(k.ready_q) {
            Some(head) => k.procs[head.index()]
                .priority()
                .is_more_important_than(k.procs[old.index()].priority()),
            None => false,
        };
        if !preempt {
            return;
        }
        demote(k, old);
    }
    switch_from(k, old);
}

/// Voluntarily gives up the CPU. Unlike `resched`, this rotates among
/// equal priorities: the caller goes to the tail of its priority class
/// and the head of the list (possibly an equal) runs next.
pub fn yield_now(k: &mut Kernel) {
    if k.sched.deferred {
        k.sched.pending = true;
        return;
    }
    let old = k.current;
    if k.procs[old.index()].state() == ProcState::Curr {
        demote(k, old);
    }
    switch_from(k, old);
}

/// Controls deferred-reschedule mode. While deferred, `resched` and
/// `yield_now` only record that a reschedule is wanted; turning deferral
/// off flushes any pending reschedule. Returns the previous mode, so
/// nested users can restore what they saw.
pub fn resched_cntl(k: &mut Kernel, defer: bool) -> bool {
    let old = k.sched.deferred;
    k.sched.deferred = defer;
    if !defer && core::mem::take(&mut k.sched.pending) {
        resched(k);
    }
    old
}

fn demote(k: &mut Kernel, old: Pid) {
    k.procs[old.index()].set_state(ProcState::Ready);
    if old != Pid::NULL {
        let prio = i32::from(k.procs[old.index()].priority().0);
        uassert!(k.queues.insert(old, k.ready_q, prio).is_ok());
    }
}

fn switch_from(k: &mut Kernel, old: Pid) {
    let new = k.queues.dequeue(k.ready_q).unwrap_or(Pid::NULL);
    k.procs[new.index()].set_state(ProcState::Curr);
    k.current = new;
    if old != new {
        profiling::event_context_switch(new.index());
        let (o, n) = util::pcb_pair(&mut k.procs, old, new);
        arch::ctxsw(o.save_mut().sp_cell(), n.save().sp());
    }
}
