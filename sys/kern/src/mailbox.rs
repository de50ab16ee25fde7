// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-process bounded mailboxes.
//!
//! A mailbox is a ring of `MBOX_DEPTH` message words guarded by three
//! semaphores: a binary access mutex, an items semaphore counting full
//! slots (initially 0), and a slots semaphore counting free slots
//! (initially the capacity). Send is wait(slots), wait(mutex), write,
//! signal(mutex), signal(items); receive is symmetric. The mutex can
//! never actually be contended -- the whole operation runs inside the
//! critical-section gate and nothing blocks while holding it -- but the
//! counts are kept honestly so the channel invariant is auditable.
//!
//! Because a blocked producer or consumer is parked *inside* its
//! operation, the grant path (`sem::wake_waiter`) finishes the ring
//! transfer on the parked process's behalf before making it READY. The
//! parked process only ever observes the finished result.

use abi::{KernelError, Message, Pid, Sid, MBOX_DEPTH, NPROC};

use crate::err::Completion;
use crate::proc::Pending;
use crate::sched;
use crate::sem::{self, Reserve};
use crate::state::Kernel;

/// Fixed-capacity message ring. Also used by `port`.
#[derive(Clone, Debug)]
pub(crate) struct Ring<const N: usize> {
    buf: [Message; N],
    head: usize,
    tail: usize,
    count: usize,
}

impl<const N: usize> Default for Ring<N> {
    fn default() -> Self {
        Self {
            buf: [Message(0); N],
            head: 0,
            tail: 0,
            count: 0,
        }
    }
}

impl<const N: usize> Ring<N> {
    pub(crate) fn push(&mut self, m: Message) {
        uassert!(self.count < N);
        self.buf[self.tail] = m;
        self.tail = (self.tail + 1) % N;
        self.count += 1;
    }

    pub(crate) fn pop(&mut self) -> Message {
        uassert!(self.count > 0);
        let m = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.count -= 1;
        m
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

/// One process's mailbox. Inactive until `mailbox_create`.
#[derive(Clone, Debug)]
pub struct Mailbox {
    active: bool,
    /// Usable capacity, `1..=MBOX_DEPTH`. The slots semaphore enforces
    /// it; the ring array is always `MBOX_DEPTH` long.
    depth: usize,
    ring: Ring<MBOX_DEPTH>,
    mutex: Sid,
    items: Sid,
    slots: Sid,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self {
            active: false,
            depth: 0,
            ring: Ring::default(),
            mutex: Sid(0),
            items: Sid(0),
            slots: Sid(0),
        }
    }
}

fn check_pid(pid: Pid) -> Result<(), KernelError> {
    if pid.index() < NPROC {
        Ok(())
    } else {
        Err(KernelError::BadId)
    }
}

fn active_box(k: &Kernel, pid: Pid) -> Result<&Mailbox, KernelError> {
    check_pid(pid)?;
    let mb = &k.boxes[pid.index()];
    if mb.active {
        Ok(mb)
    } else {
        Err(KernelError::BadId)
    }
}

/// Creates `pid`'s mailbox with the given capacity (up to
/// `MBOX_DEPTH`): an empty ring and the three freshly allocated
/// semaphores, which live until `mailbox_delete`.
pub fn mailbox_create(
    k: &mut Kernel,
    pid: Pid,
    depth: usize,
) -> Result<(), KernelError> {
    check_pid(pid)?;
    if depth == 0 || depth > MBOX_DEPTH {
        return Err(KernelError::BadState);
    }
    if k.boxes[pid.index()].active {
        return Err(KernelError::BadState);
    }
    let mutex = sem::semcreate(k, 1)?;
    let items = match sem::semcreate(k, 0) {
        Ok(s) => s,
        Err(e) => {
            let _ = sem::semdelete(k, mutex);
            return Err(e);
        }
    };
    let slots = match sem::semcreate(k, depth as i32) {
        Ok(s) => s,
        Err(e) => {
            let _ = sem::semdelete(k, mutex);
            let _ = sem::semdelete(k, items);
            return Err(e);
        }
    };
    k.boxes[pid.index()] = Mailbox {
        active: true,
        depth,
        ring: Ring::default(),
        mutex,
        items,
        slots,
    };
    Ok(())
}

/// Tears down `pid`'s mailbox. Deleting the semaphores releases every
/// blocked producer and consumer with SYSERR; buffered messages are
/// discarded.
pub fn mailbox_delete(k: &mut Kernel, pid: Pid) -> Result<(), KernelError> {
    let (mutex, items, slots) = {
        let mb = active_box(k, pid)?;
        (mb.mutex, mb.items, mb.slots)
    };
    k.boxes[pid.index()].active = false;
    sem::semdelete(k, mutex)?;
    sem::semdelete(k, items)?;
    sem::semdelete(k, slots)?;
    k.boxes[pid.index()] = Mailbox::default();
    Ok(())
}

/// Ring write half of a send, run once the slots semaphore has admitted
/// the message. Called either inline (fast path) or by the grant path on
/// behalf of a parked producer.
pub(crate) fn finish_send(k: &mut Kernel, owner: Pid, msg: Message) {
    let (mutex, items) = {
        let mb = &k.boxes[owner.index()];
        (mb.mutex, mb.items)
    };
    sem::take_must(k, mutex);
    k.boxes[owner.index()].ring.push(msg);
    sem::give(k, mutex);
    sem::give(k, items);
}

/// Ring read half of a receive, run once the items semaphore has
/// admitted the caller.
pub(crate) fn finish_recv(k: &mut Kernel, owner: Pid) -> Message {
    let (mutex, slots) = {
        let mb = &k.boxes[owner.index()];
        (mb.mutex, mb.slots)
    };
    sem::take_must(k, mutex);
    let m = k.boxes[owner.index()].ring.pop();
    sem::give(k, mutex);
    sem::give(k, slots);
    m
}

/// Sends into `pid`'s mailbox, blocking while it is full.
pub fn mailbox_send(
    k: &mut Kernel,
    pid: Pid,
    msg: Message,
) -> Result<Completion, KernelError> {
    let slots = active_box(k, pid)?.slots;
    match sem::reserve(
        k,
        slots,
        Pending::MboxSend { owner: pid, msg },
        None,
    ) {
        Reserve::Acquired => {
            finish_send(k, pid, msg);
            k.msg_stats.sent += 1;
            sched::resched(k);
            Ok(Completion::ok())
        }
        Reserve::Parked => {
            k.msg_stats.sent += 1;
            Ok(Completion::Pending)
        }
        Reserve::Refused => Err(KernelError::BadState),
    }
}

/// Non-blocking send; fails rather than waiting for a free slot.
pub fn mailbox_send_nb(
    k: &mut Kernel,
    pid: Pid,
    msg: Message,
) -> Result<(), KernelError> {
    let slots = active_box(k, pid)?.slots;
    if !sem::take(k, slots) {
        k.msg_stats.failed += 1;
        return Err(KernelError::WouldBlock);
    }
    finish_send(k, pid, msg);
    k.msg_stats.sent += 1;
    sched::resched(k);
    Ok(())
}

/// Receives from the calling process's own mailbox, blocking while it is
/// empty.
pub fn mailbox_recv(k: &mut Kernel) -> Result<Completion, KernelError> {
    let me = k.current;
    let items = active_box(k, me)?.items;
    match sem::reserve(k, items, Pending::MboxRecv { owner: me }, None) {
        Reserve::Acquired => {
            let m = finish_recv(k, me);
            k.msg_stats.received += 1;
            sched::resched(k);
            Ok(Completion::Done(m.0 as i32))
        }
        Reserve::Parked => Ok(Completion::Pending),
        Reserve::Refused => Err(KernelError::BadState),
    }
}

/// Non-blocking receive from the caller's mailbox.
pub fn mailbox_recv_nb(k: &mut Kernel) -> Result<Message, KernelError> {
    let me = k.current;
    let items = active_box(k, me)?.items;
    if !sem::take(k, items) {
        return Err(KernelError::WouldBlock);
    }
    let m = finish_recv(k, me);
    k.msg_stats.received += 1;
    sched::resched(k);
    Ok(m)
}

/// Receive from the caller's mailbox with a timeout, via a timed wait on
/// the items semaphore.
pub fn mailbox_recv_timeout(
    k: &mut Kernel,
    ms: u32,
) -> Result<Completion, KernelError> {
    let me = k.current;
    let items = active_box(k, me)?.items;
    let deadline = k.clock.ticks() + crate::clock::ms_to_ticks(ms);
    match sem::reserve(
        k,
        items,
        Pending::MboxRecv { owner: me },
        Some(deadline),
    ) {
        Reserve::Acquired => {
            let m = finish_recv(k, me);
            k.msg_stats.received += 1;
            sched::resched(k);
            Ok(Completion::Done(m.0 as i32))
        }
        Reserve::Parked => Ok(Completion::Pending),
        Reserve::Refused => Err(KernelError::BadState),
    }
}

/// Number of buffered messages in `pid`'s mailbox.
pub fn mailbox_count(k: &Kernel, pid: Pid) -> Result<usize, KernelError> {
    Ok(active_box(k, pid)?.ring.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::TestPool;
    use crate::proc;
    use crate::sem::semcount;
    use abi::{Priority, ProcState, OK, SYSERR, TIMEOUT};

    const ENTRY: u32 = 0x1000_0000;

    fn spawn_running(
        k: &mut Kernel,
        pool: &mut TestPool,
        prio: u8,
    ) -> Pid {
        let pid =
            proc::create(k, pool, ENTRY, 512, Priority(prio), "mb", &[])
                .unwrap();
        proc::resume(k, pid).unwrap();
        pid
    }

    fn assert_channel_invariant(k: &Kernel, pid: Pid) {
        let mb = &k.boxes[pid.index()];
        let count = mb.ring.len() as i32;
        assert_eq!(semcount(k, mb.items).unwrap(), count);
        assert_eq!(
            semcount(k, mb.slots).unwrap(),
            mb.depth as i32 - count
        );
        assert_eq!(semcount(k, mb.mutex).unwrap(), 1);
    }

    #[test]
    fn create_is_idempotent_only_once() {
        let mut k = Kernel::new();
        mailbox_create(&mut k, Pid::NULL, 4).unwrap();
        assert_eq!(
            mailbox_create(&mut k, Pid::NULL, 4),
            Err(KernelError::BadState)
        );
        mailbox_delete(&mut k, Pid::NULL).unwrap();
        mailbox_create(&mut k, Pid::NULL, 4).unwrap();
    }

    #[test]
    fn create_keeps_its_semaphores_alive() {
        let mut k = Kernel::new();
        let free_before = k.sems.free_count();
        mailbox_create(&mut k, Pid::NULL, 4).unwrap();
        assert_eq!(k.sems.free_count(), free_before - 3);
        // And delete gives them all back.
        mailbox_delete(&mut k, Pid::NULL).unwrap();
        assert_eq!(k.sems.free_count(), free_before);
    }

    #[test]
    fn fifo_through_the_ring() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        mailbox_create(&mut k, a, MBOX_DEPTH).unwrap();
        for v in 1..=3 {
            assert_eq!(
                mailbox_send(&mut k, a, Message(v)),
                Ok(Completion::ok())
            );
        }
        assert_eq!(mailbox_count(&k, a), Ok(3));
        assert_channel_invariant(&k, a);
        for v in 1..=3 {
            assert_eq!(
                mailbox_recv(&mut k),
                Ok(Completion::Done(v as i32))
            );
        }
        assert_eq!(mailbox_count(&k, a), Ok(0));
        assert_channel_invariant(&k, a);
    }

    #[test]
    fn nonblocking_variants_refuse_instead_of_waiting() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        mailbox_create(&mut k, a, MBOX_DEPTH).unwrap();
        assert_eq!(
            mailbox_recv_nb(&mut k),
            Err(KernelError::WouldBlock)
        );
        for v in 0..MBOX_DEPTH as u32 {
            mailbox_send_nb(&mut k, a, Message(v)).unwrap();
        }
        assert_eq!(
            mailbox_send_nb(&mut k, a, Message(99)),
            Err(KernelError::WouldBlock)
        );
        assert_channel_invariant(&k, a);
    }

    #[test]
    fn full_mailbox_parks_the_producer() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let cons = spawn_running(&mut k, &mut pool, 10);
        mailbox_create(&mut k, cons, MBOX_DEPTH).unwrap();
        let prod = spawn_running(&mut k, &mut pool, 20);

        // Producer (current, higher priority) fills the ring...
        for v in 0..MBOX_DEPTH as u32 {
            assert_eq!(
                mailbox_send(&mut k, cons, Message(v)),
                Ok(Completion::ok())
            );
        }
        // ...and the next send parks it.
        assert_eq!(
            mailbox_send(&mut k, cons, Message(100)),
            Ok(Completion::Pending)
        );
        assert_eq!(k.pcb(prod).state(), ProcState::Wait);
        assert_eq!(k.current(), cons);

        // Consumer pops one; the parked producer's message lands and
        // the producer (higher priority) preempts.
        assert_eq!(mailbox_recv(&mut k), Ok(Completion::Done(0)));
        assert_eq!(k.current(), prod);
        assert_eq!(k.pcb(prod).save().syscall_return(), OK);
        assert_eq!(mailbox_count(&k, cons), Ok(MBOX_DEPTH));
        assert_channel_invariant(&k, cons);
    }

    #[test]
    fn empty_mailbox_parks_the_consumer() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let cons = spawn_running(&mut k, &mut pool, 20);
        mailbox_create(&mut k, cons, MBOX_DEPTH).unwrap();
        assert_eq!(mailbox_recv(&mut k), Ok(Completion::Pending));
        assert_eq!(k.pcb(cons).state(), ProcState::Wait);
        assert_eq!(k.current(), Pid::NULL);

        // A send from elsewhere completes the parked receive and the
        // consumer preempts the sender.
        let _prod = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(
            mailbox_send(&mut k, cons, Message(42)),
            Ok(Completion::ok())
        );
        assert_eq!(k.current(), cons);
        assert_eq!(k.pcb(cons).save().syscall_return(), 42);
        assert_eq!(mailbox_count(&k, cons), Ok(0));
        assert_channel_invariant(&k, cons);
    }

    #[test]
    fn delete_releases_blocked_processes_with_error() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let cons = spawn_running(&mut k, &mut pool, 10);
        mailbox_create(&mut k, cons, MBOX_DEPTH).unwrap();
        assert_eq!(mailbox_recv(&mut k), Ok(Completion::Pending));

        mailbox_delete(&mut k, cons).unwrap();
        assert_eq!(k.pcb(cons).save().syscall_return(), SYSERR);
        // The mailbox is gone for good measure.
        assert_eq!(mailbox_count(&k, cons), Err(KernelError::BadId));
    }

    #[test]
    fn timed_receive_expires() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let cons = spawn_running(&mut k, &mut pool, 10);
        mailbox_create(&mut k, cons, MBOX_DEPTH).unwrap();
        assert_eq!(
            mailbox_recv_timeout(&mut k, 5),
            Ok(Completion::Pending)
        );
        for _ in 0..5 {
            crate::clock::clock_tick(&mut k);
        }
        assert_eq!(k.pcb(cons).save().syscall_return(), TIMEOUT);
        assert_eq!(k.pcb(cons).state(), ProcState::Curr);
        // The items count was restored; the channel still balances.
        assert_channel_invariant(&k, cons);
    }
}
