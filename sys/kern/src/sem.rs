// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores.
//!
//! The semaphore table invariant, maintained by every operation here and
//! audited by the tests: `count < 0` exactly when the wait queue is
//! non-empty, and then `-count` equals the queue length. A waiter that
//! leaves the queue by any road other than a grant (kill, timeout) must
//! credit the count back.
//!
//! Free slots are threaded into a free list through the count field, the
//! classic trick: an unallocated semaphore's count holds the index of the
//! next free slot.
//!
//! Parking and waking: a process that must block records what it was
//! doing in its PCB ([`Pending`]) and joins the FIFO wait queue. `signal`
//! hands the grant to the longest waiter, finishes its pending operation
//! on its behalf (for the compound mailbox/port operations), deposits its
//! result, and makes it READY. Deletion and reset drain the queue with a
//! distinct result, so blocked processes are never silently lost.

use abi::{KernelError, Pid, ProcState, Sid, NSEM, OK, SYSERR};

use crate::clock;
use crate::err::Completion;
use crate::proc::{self, Pending};
use crate::queue::{Qid, QueueTable};
use crate::sched;
use crate::state::Kernel;
use crate::{mailbox, port};

/// Free-list terminator in the count field.
const FREE_END: i32 = -1;

pub(crate) struct Sem {
    alloc: bool,
    /// Semaphore count when allocated; next-free link when not.
    count: i32,
    /// FIFO queue of waiting processes. Allocated once at boot and kept
    /// across alloc/free cycles.
    queue: Qid,
}

pub(crate) struct SemTable {
    slots: [Sem; NSEM],
    free_head: i32,
}

impl SemTable {
    pub(crate) fn new(queues: &mut QueueTable) -> Self {
        let slots = core::array::from_fn(|i| Sem {
            alloc: false,
            count: if i + 1 < NSEM {
                (i + 1) as i32
            } else {
                FREE_END
            },
            queue: queues.new_queue(),
        });
        Self {
            slots,
            free_head: 0,
        }
    }

    pub(crate) fn queue_of(&self, sid: Sid) -> Qid {
        self.slots[sid.index()].queue
    }

    /// Restores the count after a waiter left the queue without being
    /// granted (killed, or timed out).
    pub(crate) fn credit_lost_waiter(&mut self, sid: Sid) {
        self.slots[sid.index()].count += 1;
    }

    fn check(&self, sid: Sid) -> Result<(), KernelError> {
        if sid.is_in_range() && self.slots[sid.index()].alloc {
            Ok(())
        } else {
            Err(KernelError::BadId)
        }
    }

    /// Number of free semaphore slots. Diagnostic.
    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.alloc).count()
    }
}

/// Why a waiter is being taken off a wait queue.
pub(crate) enum Wake {
    /// A signal reached it; finish its operation and report success.
    Granted,
    /// The semaphore was deleted out from under it.
    Deleted,
    /// The semaphore was reset; plain waits release cleanly.
    Reset,
}

/// Takes `pid` off whatever it was blocked in the middle of, finishes or
/// abandons that operation according to `how`, deposits the result it
/// will observe, and makes it READY. Does not reschedule.
pub(crate) fn wake_waiter(k: &mut Kernel, pid: Pid, how: Wake) {
    let pending = k.procs[pid.index()].take_pending();
    match how {
        Wake::Granted => match pending {
            Pending::Sem => proc::deposit(k, pid, OK),
            Pending::MboxSend { owner, msg } => {
                mailbox::finish_send(k, owner, msg);
                proc::deposit(k, pid, OK);
            }
            Pending::MboxRecv { owner } => {
                let m = mailbox::finish_recv(k, owner);
                k.msg_stats.received += 1;
                proc::deposit(k, pid, m.0 as i32);
            }
            Pending::PortSend { port, msg } => {
                port::finish_send(k, port, msg);
                proc::deposit(k, pid, OK);
            }
            Pending::PortRecv { port } => {
                let m = port::finish_recv(k, port);
                k.msg_stats.received += 1;
                proc::deposit(k, pid, m.0 as i32);
            }
            // Sleepers and single-slot receivers never park on
            // semaphores.
            Pending::None | Pending::Receive | Pending::Sleep => {
                uassert!(false)
            }
        },
        Wake::Deleted => proc::deposit(k, pid, SYSERR),
        Wake::Reset => {
            let v = if pending == Pending::Sem { OK } else { SYSERR };
            proc::deposit(k, pid, v);
        }
    }
    sched::ready(k, pid);
}

/// Non-blocking acquire: decrements the count only if it is positive.
pub(crate) fn take(k: &mut Kernel, sid: Sid) -> bool {
    let s = &mut k.sems.slots[sid.index()];
    if s.count > 0 {
        s.count -= 1;
        true
    } else {
        false
    }
}

/// Acquire that must succeed: used where a protocol guarantees the
/// semaphore is available (mailbox access mutexes under the gate).
pub(crate) fn take_must(k: &mut Kernel, sid: Sid) {
    uassert!(take(k, sid));
}

/// Signal without rescheduling. Increments the count; if any process was
/// waiting, the longest waiter is granted.
pub(crate) fn give(k: &mut Kernel, sid: Sid) {
    let s = &mut k.sems.slots[sid.index()];
    s.count += 1;
    if s.count <= 0 {
        let q = k.sems.queue_of(sid);
        match k.queues.dequeue(q) {
            Some(pid) => wake_waiter(k, pid, Wake::Granted),
            // count <= 0 with an empty queue breaks the semaphore
            // invariant.
            None => uassert!(false),
        }
    }
}

/// Outcome of an acquire-or-park attempt.
pub(crate) enum Reserve {
    /// The count covered the caller; proceed.
    Acquired,
    /// The caller is parked on the wait queue; the scheduler has moved
    /// on.
    Parked,
    /// The caller may not block (it is the null process).
    Refused,
}

/// Decrements the count; if it goes negative, parks the caller at the
/// tail of the FIFO wait queue with `pending` recorded for the eventual
/// waker, plus an optional expiry for the tick handler, and reschedules.
pub(crate) fn reserve(
    k: &mut Kernel,
    sid: Sid,
    pending: Pending,
    deadline: Option<u64>,
) -> Reserve {
    let me = k.current;
    {
        let s = &mut k.sems.slots[sid.index()];
        if s.count <= 0 && me == Pid::NULL {
            // The null process must always be runnable; it cannot park.
            return Reserve::Refused;
        }
        s.count -= 1;
        if s.count >= 0 {
            return Reserve::Acquired;
        }
    }
    let q = k.sems.queue_of(sid);
    uassert!(k.queues.enqueue(me, q).is_ok());
    k.procs[me.index()].park(
        ProcState::Wait,
        Some(sid),
        deadline,
        pending,
    );
    sched::resched(k);
    Reserve::Parked
}

/// Allocates a semaphore with the given non-negative initial count.
pub fn semcreate(k: &mut Kernel, count: i32) -> Result<Sid, KernelError> {
    if count < 0 {
        return Err(KernelError::BadState);
    }
    if k.sems.free_head == FREE_END {
        return Err(KernelError::NoSlot);
    }
    let sid = Sid(k.sems.free_head as u16);
    let s = &mut k.sems.slots[sid.index()];
    k.sems.free_head = s.count;
    s.alloc = true;
    s.count = count;
    uassert!(k.queues.is_empty(s.queue));
    Ok(sid)
}

/// Deletes a semaphore. Every waiter is made READY and observes SYSERR
/// from its wait; the slot returns to the free list.
pub fn semdelete(k: &mut Kernel, sid: Sid) -> Result<(), KernelError> {
    k.sems.check(sid)?;
    let q = k.sems.queue_of(sid);
    while let Some(pid) = k.queues.dequeue(q) {
        wake_waiter(k, pid, Wake::Deleted);
    }
    let s = &mut k.sems.slots[sid.index()];
    s.alloc = false;
    s.count = k.sems.free_head;
    k.sems.free_head = i32::from(sid.0);
    sched::resched(k);
    Ok(())
}

/// Resets a semaphore to a new non-negative count, draining any waiters.
pub fn semreset(
    k: &mut Kernel,
    sid: Sid,
    count: i32,
) -> Result<(), KernelError> {
    if count < 0 {
        return Err(KernelError::BadState);
    }
    k.sems.check(sid)?;
    let q = k.sems.queue_of(sid);
    while let Some(pid) = k.queues.dequeue(q) {
        wake_waiter(k, pid, Wake::Reset);
    }
    k.sems.slots[sid.index()].count = count;
    sched::resched(k);
    Ok(())
}

/// The P operation: decrement, blocking while the count is negative.
pub fn wait(k: &mut Kernel, sid: Sid) -> Result<Completion, KernelError> {
    k.sems.check(sid)?;
    match reserve(k, sid, Pending::Sem, None) {
        Reserve::Acquired => Ok(Completion::ok()),
        Reserve::Parked => Ok(Completion::Pending),
        Reserve::Refused => Err(KernelError::BadState),
    }
}

/// Non-blocking P: acquires only if the count is positive; otherwise
/// reports `WouldBlock` without mutating anything.
pub fn trywait(k: &mut Kernel, sid: Sid) -> Result<(), KernelError> {
    k.sems.check(sid)?;
    if take(k, sid) {
        Ok(())
    } else {
        Err(KernelError::WouldBlock)
    }
}

/// P with a timeout. If no signal arrives within `ms`, the tick handler
/// removes the caller from the wait queue, restores the count, and the
/// caller observes TIMEOUT.
pub fn timedwait(
    k: &mut Kernel,
    sid: Sid,
    ms: u32,
) -> Result<Completion, KernelError> {
    k.sems.check(sid)?;
    let deadline = k.clock.ticks() + clock::ms_to_ticks(ms);
    match reserve(k, sid, Pending::Sem, Some(deadline)) {
        Reserve::Acquired => Ok(Completion::ok()),
        Reserve::Parked => Ok(Completion::Pending),
        Reserve::Refused => Err(KernelError::BadState),
    }
}

/// The V operation: increment, releasing the longest waiter if any, then
/// reschedule to honor a possibly higher-priority waiter.
pub fn signal(k: &mut Kernel, sid: Sid) -> Result<(), KernelError> {
    k.sems.check(sid)?;
    give(k, sid);
    sched::resched(k);
    Ok(())
}

/// Signals `n > 0` times, rescheduling only once at the end.
pub fn signaln(
    k: &mut Kernel,
    sid: Sid,
    n: i32,
) -> Result<(), KernelError> {
    k.sems.check(sid)?;
    if n <= 0 {
        return Err(KernelError::BadState);
    }
    for _ in 0..n {
        give(k, sid);
    }
    sched::resched(k);
    Ok(())
}

/// The current count. Observational.
pub fn semcount(k: &Kernel, sid: Sid) -> Result<i32, KernelError> {
    k.sems.check(sid)?;
    Ok(k.sems.slots[sid.index()].count)
}

/// Count and number of waiters. Observational.
pub fn seminfo(
    k: &Kernel,
    sid: Sid,
) -> Result<(i32, usize), KernelError> {
    k.sems.check(sid)?;
    let s = &k.sems.slots[sid.index()];
    Ok((s.count, k.queues.len(s.queue)))
}
