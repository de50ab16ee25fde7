// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-slot message passing.
//!
//! Every PCB carries one message word and a full/empty flag. `send`
//! refuses to overwrite an unread message; there is no buffering here.
//! For buffered channels see `mailbox` and `port`.

use abi::{KernelError, Message, Pid, ProcState};

use crate::clock;
use crate::err::Completion;
use crate::proc::{self, Pending};
use crate::sched;
use crate::state::Kernel;

/// Counters for the message subsystem. Diagnostic.
#[derive(Copy, Clone, Debug, Default)]
pub struct MsgStats {
    pub sent: u64,
    pub received: u64,
    pub failed: u64,
    pub timeouts: u64,
}

/// Sends a one-word message to `pid`.
///
/// Fails if the target already holds an undelivered message. If the
/// target is blocked in receive, it is handed the message directly and
/// made READY; a higher-priority receiver preempts the sender before
/// `send` returns.
pub fn send(
    k: &mut Kernel,
    pid: Pid,
    msg: Message,
) -> Result<(), KernelError> {
    if !pid.is_in_range() || !k.procs[pid.index()].state().is_alive() {
        k.msg_stats.failed += 1;
        return Err(KernelError::BadId);
    }
    if k.procs[pid.index()].has_msg() {
        k.msg_stats.failed += 1;
        return Err(KernelError::SlotFull);
    }
    k.msg_stats.sent += 1;
    if k.procs[pid.index()].state() == ProcState::Recv {
        // Receiver is parked: deliver directly, consuming the slot on
        // its behalf.
        k.msg_stats.received += 1;
        proc::settle(k, pid, msg.0 as i32);
        sched::ready(k, pid);
        sched::resched(k);
    } else {
        k.procs[pid.index()].put_msg(msg);
    }
    Ok(())
}

/// Receives a message, blocking until one arrives.
pub fn receive(k: &mut Kernel) -> Result<Completion, KernelError> {
    let me = k.current;
    if let Some(m) = k.procs[me.index()].take_msg() {
        k.msg_stats.received += 1;
        return Ok(Completion::Done(m.0 as i32));
    }
    if me == Pid::NULL {
        return Err(KernelError::BadState);
    }
    k.procs[me.index()].park(
        ProcState::Recv,
        None,
        None,
        Pending::Receive,
    );
    sched::resched(k);
    Ok(Completion::Pending)
}

/// Non-blocking receive: consumes and returns a pending message, or
/// returns zero.
pub fn recvclr(k: &mut Kernel) -> Message {
    let me = k.current;
    if let Some(m) = k.procs[me.index()].take_msg() {
        k.msg_stats.received += 1;
        m
    } else {
        Message(0)
    }
}

/// Receive with a timeout. A message that arrives within `ms` is
/// returned; otherwise the tick handler wakes the caller with TIMEOUT.
pub fn recvtime(
    k: &mut Kernel,
    ms: u32,
) -> Result<Completion, KernelError> {
    let me = k.current;
    if let Some(m) = k.procs[me.index()].take_msg() {
        k.msg_stats.received += 1;
        return Ok(Completion::Done(m.0 as i32));
    }
    if ms == 0 {
        return Err(KernelError::Timeout);
    }
    if me == Pid::NULL {
        return Err(KernelError::BadState);
    }
    let deadline = k.clock.ticks() + clock::ms_to_ticks(ms);
    k.procs[me.index()].park(
        ProcState::Recv,
        None,
        Some(deadline),
        Pending::Receive,
    );
    sched::resched(k);
    Ok(Completion::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::TestPool;
    use crate::proc;
    use abi::Priority;

    const ENTRY: u32 = 0x1000_0000;

    fn spawn_running(
        k: &mut Kernel,
        pool: &mut TestPool,
        prio: u8,
    ) -> Pid {
        let pid =
            proc::create(k, pool, ENTRY, 512, Priority(prio), "m", &[])
                .unwrap();
        proc::resume(k, pid).unwrap();
        pid
    }

    #[test]
    fn send_then_receive_passes_the_word() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        // Self-send: legal, and keeps a current for the receive.
        assert_eq!(send(&mut k, a, Message(0x1234)), Ok(()));
        assert!(k.pcb(a).has_msg());
        assert_eq!(
            receive(&mut k),
            Ok(Completion::Done(0x1234))
        );
        assert!(!k.pcb(a).has_msg());
    }

    #[test]
    fn second_send_is_refused() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        send(&mut k, a, Message(1)).unwrap();
        assert_eq!(
            send(&mut k, a, Message(2)),
            Err(KernelError::SlotFull)
        );
        assert_eq!(k.msg_stats().failed, 1);
        // The original message survives.
        assert_eq!(receive(&mut k), Ok(Completion::Done(1)));
    }

    #[test]
    fn receive_blocks_until_send() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(receive(&mut k), Ok(Completion::Pending));
        assert_eq!(k.pcb(a).state(), ProcState::Recv);
        assert_eq!(k.current(), Pid::NULL);

        // Send from the null process wakes and preempts to a.
        assert_eq!(send(&mut k, a, Message(77)), Ok(()));
        assert_eq!(k.current(), a);
        // The message was consumed on wake and deposited as the result
        // of the pending receive.
        assert_eq!(k.pcb(a).save().syscall_return(), 77);
        assert!(!k.pcb(a).has_msg());
    }

    #[test]
    fn recvclr_is_nonblocking() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(recvclr(&mut k), Message(0));
        send(&mut k, a, Message(9)).unwrap();
        assert_eq!(recvclr(&mut k), Message(9));
        assert_eq!(recvclr(&mut k), Message(0));
    }

    #[test]
    fn send_to_dead_pid_fails() {
        let mut k = Kernel::new();
        assert_eq!(
            send(&mut k, Pid(5), Message(1)),
            Err(KernelError::BadId)
        );
        assert_eq!(
            send(&mut k, Pid(4000), Message(1)),
            Err(KernelError::BadId)
        );
        assert_eq!(k.msg_stats().failed, 2);
    }

    #[test]
    fn recvtime_zero_reports_timeout_immediately() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let _a = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(recvtime(&mut k, 0), Err(KernelError::Timeout));
    }

    #[test]
    fn recvtime_delivers_if_message_arrives() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(recvtime(&mut k, 50), Ok(Completion::Pending));
        assert_eq!(k.current(), Pid::NULL);
        send(&mut k, a, Message(5)).unwrap();
        assert_eq!(k.current(), a);
        assert_eq!(k.pcb(a).save().syscall_return(), 5);
        // No stale deadline remains to fire later.
        for _ in 0..100 {
            crate::clock::clock_tick(&mut k);
        }
        assert_eq!(k.pcb(a).state(), ProcState::Curr);
        assert_eq!(k.pcb(a).save().syscall_return(), 5);
    }
}
