// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of processes.
//!
//! The fields of [`Pcb`] are private to this crate so that we can
//! maintain the process invariants. These mostly have to do with keeping
//! state changes and queue membership consistent -- for example, a
//! process may be linked into at most one kernel queue, and which queue
//! that is follows from its state.

use abi::{
    KernelError, Message, Pid, PortId, Priority, ProcState, Sid, MINSTK,
    NAMELEN, NPROC,
};

use crate::arch;
use crate::mem::MemPool;
use crate::sched;
use crate::state::Kernel;

/// What a parked process is in the middle of. Whoever wakes the process
/// consults this to finish the operation on its behalf and decide what to
/// deposit as its result.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub(crate) enum Pending {
    /// Not parked, or parked with nothing to finish.
    #[default]
    None,
    /// Plain semaphore wait; deposit OK on grant.
    Sem,
    /// Blocked in `receive`/`recvtime`; `send` deposits the message.
    Receive,
    /// In the sleep delta list; the tick handler deposits OK.
    Sleep,
    /// Parked on a mailbox's slots semaphore with a message to deliver.
    MboxSend { owner: Pid, msg: Message },
    /// Parked on a mailbox's items semaphore.
    MboxRecv { owner: Pid },
    /// Parked on a port's slots semaphore with a message to deliver.
    PortSend { port: PortId, msg: Message },
    /// Parked on a port's items semaphore.
    PortRecv { port: PortId },
}

/// Internal representation of a process.
#[derive(Clone, Debug, Default)]
pub struct Pcb {
    /// Saved machine state of the process.
    save: arch::SavedState,
    /// Scheduling state.
    state: ProcState,
    /// Current priority.
    priority: Priority,
    /// Fixed-length name, NUL-padded.
    name: [u8; NAMELEN],
    /// High end of the process stack, as handed out by `getstk`.
    stkbase: u32,
    /// Stack length in bytes.
    stklen: u32,
    /// Single-slot message buffer.
    msg: Message,
    /// Whether `msg` holds an undelivered message.
    has_msg: bool,
    /// The semaphore this process is blocked on while in WAIT.
    wait_sem: Option<Sid>,
    /// Absolute tick at which a timed wait expires.
    deadline: Option<u64>,
    /// Operation to finish when the process is woken.
    pending: Pending,
}

impl Pcb {
    pub(crate) fn new(
        state: ProcState,
        priority: Priority,
        name: &str,
    ) -> Self {
        let mut p = Self {
            state,
            priority,
            ..Self::default()
        };
        p.set_name(name);
        p
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub(crate) fn set_state(&mut self, s: ProcState) {
        self.state = s;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The process name, up to the first NUL.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        // The name was copied in from a &str and truncated at a char
        // boundary check in set_name, so this cannot fail.
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = [0; NAMELEN];
        let mut n = name.len().min(NAMELEN - 1);
        while n > 0 && !name.is_char_boundary(n) {
            n -= 1;
        }
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
    }

    pub fn save(&self) -> &arch::SavedState {
        &self.save
    }

    pub(crate) fn save_mut(&mut self) -> &mut arch::SavedState {
        &mut self.save
    }

    pub fn has_msg(&self) -> bool {
        self.has_msg
    }

    pub(crate) fn put_msg(&mut self, m: Message) {
        self.msg = m;
        self.has_msg = true;
    }

    pub(crate) fn take_msg(&mut self) -> Option<Message> {
        if self.has_msg {
            self.has_msg = false;
            Some(self.msg)
        } else {
            None
        }
    }

    pub fn stkbase(&self) -> u32 {
        self.stkbase
    }

    pub fn stklen(&self) -> u32 {
        self.stklen
    }

    pub(crate) fn wait_sem(&self) -> Option<Sid> {
        self.wait_sem
    }

    pub(crate) fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub(crate) fn park(
        &mut self,
        state: ProcState,
        wait_sem: Option<Sid>,
        deadline: Option<u64>,
        pending: Pending,
    ) {
        self.state = state;
        self.wait_sem = wait_sem;
        self.deadline = deadline;
        self.pending = pending;
    }

    /// Clears the blocking bookkeeping and says what the process was in
    /// the middle of. Every wake path goes through this.
    pub(crate) fn take_pending(&mut self) -> Pending {
        self.wait_sem = None;
        self.deadline = None;
        core::mem::take(&mut self.pending)
    }
}

/// Rounds a requested stack size up to the minimum and to word alignment.
fn stack_size(requested: u32) -> u32 {
    (requested.max(MINSTK) + 3) & !3
}

/// Finds a free PCB slot, scanning from a rotating hint so ids are not
/// reused immediately. PID 0 is never allocable.
fn alloc_pid(k: &mut Kernel) -> Result<Pid, KernelError> {
    for step in 0..NPROC {
        let i = (k.pid_hint + step) % NPROC;
        if i == 0 {
            continue;
        }
        if k.procs[i].state == ProcState::Free {
            k.pid_hint = (i + 1) % NPROC;
            return Ok(Pid(i as u16));
        }
    }
    Err(KernelError::NoSlot)
}

/// Creates a new process in the SUSPENDED state.
///
/// `entry` is the address of the process entry function; `args` are the
/// argument words placed in its initial frame. The stack request is
/// rounded up to `MINSTK` and word alignment. Use `resume` to start the
/// new process.
pub fn create(
    k: &mut Kernel,
    pool: &mut dyn MemPool,
    entry: u32,
    stack_bytes: u32,
    priority: Priority,
    name: &str,
    args: &[u32],
) -> Result<Pid, KernelError> {
    if entry == 0 {
        return Err(KernelError::BadState);
    }
    let ssize = stack_size(stack_bytes);
    let pid = alloc_pid(k)?;
    let stktop = pool.getstk(ssize)?;

    let p = &mut k.procs[pid.index()];
    *p = Pcb::new(ProcState::Susp, priority, name);
    p.stkbase = stktop;
    p.stklen = ssize;
    arch::init_stack_frame(&mut p.save, stktop, entry, args);
    Ok(pid)
}

/// Terminates a process and releases everything it holds.
///
/// A process blocked on a semaphore is unlinked from the wait queue and
/// the count is credited back, so the semaphore invariant survives the
/// disappearance. Killing the running process reschedules.
pub fn kill(
    k: &mut Kernel,
    pool: &mut dyn MemPool,
    pid: Pid,
) -> Result<(), KernelError> {
    if !pid.is_in_range() {
        return Err(KernelError::BadId);
    }
    if pid == Pid::NULL {
        return Err(KernelError::BadState);
    }
    match k.procs[pid.index()].state {
        ProcState::Free => return Err(KernelError::BadId),
        ProcState::Ready => {
            k.queues.remove(pid, k.ready_q)?;
        }
        ProcState::Sleep => {
            k.queues.remove_delta(pid, k.sleep_q)?;
        }
        ProcState::Wait => {
            let sid = k.procs[pid.index()].wait_sem.ok_or(
                KernelError::BadState,
            )?;
            k.queues.remove(pid, k.sems.queue_of(sid))?;
            k.sems.credit_lost_waiter(sid);
        }
        ProcState::Curr | ProcState::Recv | ProcState::Susp => (),
    }

    let (stkbase, stklen) = {
        let p = &k.procs[pid.index()];
        (p.stkbase, p.stklen)
    };
    if stklen > 0 {
        pool.freestk(stkbase, stklen)?;
    }
    k.procs[pid.index()] = Pcb::default();

    if pid == k.current {
        sched::resched(k);
    }
    Ok(())
}

/// Terminates the calling process. The kernel-facing half of the exit
/// trampoline: a process entry function returning lands here.
pub fn exit(k: &mut Kernel, pool: &mut dyn MemPool) {
    let me = k.current;
    // The null process cannot exit; everything else can.
    if kill(k, pool, me).is_err() {
        klog!("null process attempted exit");
    }
}

/// The id of the running process.
pub fn getpid(k: &Kernel) -> Pid {
    k.current
}

fn live(k: &Kernel, pid: Pid) -> Result<&Pcb, KernelError> {
    if !pid.is_in_range() {
        return Err(KernelError::BadId);
    }
    let p = &k.procs[pid.index()];
    if p.state.is_alive() {
        Ok(p)
    } else {
        Err(KernelError::BadId)
    }
}

/// A process's current priority.
pub fn getprio(k: &Kernel, pid: Pid) -> Result<Priority, KernelError> {
    Ok(live(k, pid)?.priority)
}

/// A process's current state.
pub fn getstate(k: &Kernel, pid: Pid) -> Result<ProcState, KernelError> {
    if !pid.is_in_range() {
        return Err(KernelError::BadId);
    }
    Ok(k.procs[pid.index()].state)
}

/// Copies a process's name into `buf`, NUL-terminated. `buf` must hold at
/// least two bytes.
pub fn getname(
    k: &Kernel,
    pid: Pid,
    buf: &mut [u8],
) -> Result<(), KernelError> {
    if buf.len() < 2 {
        return Err(KernelError::BadState);
    }
    let name = live(k, pid)?.name();
    let n = name.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&name.as_bytes()[..n]);
    buf[n] = 0;
    Ok(())
}

/// Number of live (non-FREE) processes.
pub fn prcount(k: &Kernel) -> usize {
    k.procs
        .iter()
        .filter(|p| p.state.is_alive())
        .count()
}

/// Changes a process's priority, returning the old one.
///
/// A READY process is repositioned in the ready list; if the change could
/// affect who should be running, the scheduler reruns.
pub fn chprio(
    k: &mut Kernel,
    pid: Pid,
    newprio: Priority,
) -> Result<Priority, KernelError> {
    let old = live(k, pid)?.priority;
    let state = k.procs[pid.index()].state;
    k.procs[pid.index()].priority = newprio;
    if state == ProcState::Ready && pid != Pid::NULL {
        k.queues.remove(pid, k.ready_q)?;
        k.queues.insert(pid, k.ready_q, i32::from(newprio.0))?;
    }
    if pid == k.current || state == ProcState::Ready {
        sched::resched(k);
    }
    Ok(old)
}

/// Suspends a READY or CURRENT process, returning its priority.
pub fn suspend(k: &mut Kernel, pid: Pid) -> Result<Priority, KernelError> {
    if !pid.is_in_range() {
        return Err(KernelError::BadId);
    }
    if pid == Pid::NULL {
        return Err(KernelError::BadState);
    }
    let (state, prio) = {
        let p = &k.procs[pid.index()];
        (p.state, p.priority)
    };
    match state {
        ProcState::Curr => {
            k.procs[pid.index()].state = ProcState::Susp;
            sched::resched(k);
        }
        ProcState::Ready => {
            k.queues.remove(pid, k.ready_q)?;
            k.procs[pid.index()].state = ProcState::Susp;
        }
        _ => return Err(KernelError::BadState),
    }
    Ok(prio)
}

/// Resumes a SUSPENDED process, returning its priority.
pub fn resume(k: &mut Kernel, pid: Pid) -> Result<Priority, KernelError> {
    if !pid.is_in_range() {
        return Err(KernelError::BadId);
    }
    let (state, prio) = {
        let p = &k.procs[pid.index()];
        (p.state, p.priority)
    };
    if state != ProcState::Susp {
        return Err(KernelError::BadState);
    }
    sched::ready(k, pid);
    sched::resched(k);
    Ok(prio)
}

/// Deposits a system call result into a (typically parked) process.
pub(crate) fn deposit(k: &mut Kernel, pid: Pid, v: i32) {
    k.procs[pid.index()].save_mut().set_syscall_return(v);
}

/// Wakes a process out of SLEEP or RECV bookkeeping with `v` as its
/// result, without inserting it anywhere. Callers follow up with
/// `sched::ready`.
pub(crate) fn settle(k: &mut Kernel, pid: Pid, v: i32) {
    let _ = k.procs[pid.index()].take_pending();
    deposit(k, pid, v);
}

/// `yield` is in `sched`; re-exported here so the process API reads
/// complete.
pub use crate::sched::yield_now;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::TestPool;
    use crate::state::Kernel;

    fn uut() -> (Kernel, TestPool) {
        (Kernel::new(), TestPool::new())
    }

    const ENTRY: u32 = 0x1000_0000;

    #[test]
    fn create_leaves_process_suspended() {
        let (mut k, mut pool) = uut();
        let pid = create(
            &mut k,
            &mut pool,
            ENTRY,
            1024,
            Priority(20),
            "worker",
            &[],
        )
        .unwrap();
        assert_ne!(pid, Pid::NULL);
        let p = k.pcb(pid);
        assert_eq!(p.state(), ProcState::Susp);
        assert_eq!(p.priority(), Priority(20));
        assert_eq!(p.name(), "worker");
        assert_eq!(p.stklen(), 1024);
        // Not running, not queued.
        assert_eq!(k.current(), Pid::NULL);
    }

    #[test]
    fn create_rounds_stack_up() {
        let (mut k, mut pool) = uut();
        let pid =
            create(&mut k, &mut pool, ENTRY, 10, Priority(1), "tiny", &[])
                .unwrap();
        // Below-minimum requests get the minimum.
        assert_eq!(k.pcb(pid).stklen(), MINSTK);
        let pid2 =
            create(&mut k, &mut pool, ENTRY, 1001, Priority(1), "odd", &[])
                .unwrap();
        // Odd sizes get word alignment.
        assert_eq!(k.pcb(pid2).stklen(), 1004);
    }

    #[test]
    fn create_builds_the_initial_frame() {
        let (mut k, mut pool) = uut();
        let pid = create(
            &mut k,
            &mut pool,
            ENTRY,
            1024,
            Priority(5),
            "argful",
            &[7, 8, 9],
        )
        .unwrap();
        let p = k.pcb(pid);
        // Frame: 3 argument words plus the fixed 16-word block, below the
        // stack top.
        assert_eq!(p.save().sp(), p.stkbase() - 4 * (3 + 16));
        assert_eq!(p.save().pc(), ENTRY);
    }

    #[test]
    fn create_kill_round_trips_the_pool() {
        let (mut k, mut pool) = uut();
        let before = pool.stack_outstanding();
        let live_before = prcount(&k);
        let pid = create(
            &mut k,
            &mut pool,
            ENTRY,
            2048,
            Priority(9),
            "fleeting",
            &[],
        )
        .unwrap();
        assert_eq!(pool.stack_outstanding(), before + 2048);
        kill(&mut k, &mut pool, pid).unwrap();
        assert_eq!(pool.stack_outstanding(), before);
        assert_eq!(prcount(&k), live_before);
        assert_eq!(k.pcb(pid).state(), ProcState::Free);
    }

    #[test]
    fn pid_allocation_rotates() {
        let (mut k, mut pool) = uut();
        let a =
            create(&mut k, &mut pool, ENTRY, 256, Priority(1), "a", &[])
                .unwrap();
        kill(&mut k, &mut pool, a).unwrap();
        let b =
            create(&mut k, &mut pool, ENTRY, 256, Priority(1), "b", &[])
                .unwrap();
        // The freshly freed slot is not immediately reused.
        assert_ne!(a, b);
    }

    #[test]
    fn pid_zero_is_protected() {
        let (mut k, mut pool) = uut();
        assert_eq!(
            kill(&mut k, &mut pool, Pid::NULL),
            Err(KernelError::BadState)
        );
        assert_eq!(suspend(&mut k, Pid::NULL), Err(KernelError::BadState));
    }

    #[test]
    fn table_exhaustion_reports_no_slot() {
        let (mut k, mut pool) = uut();
        for i in 0..NPROC - 1 {
            let r = create(
                &mut k,
                &mut pool,
                ENTRY,
                256,
                Priority(1),
                "filler",
                &[],
            );
            assert!(r.is_ok(), "slot {i} should have been free");
        }
        assert_eq!(
            create(&mut k, &mut pool, ENTRY, 256, Priority(1), "one-too-many", &[]),
            Err(KernelError::NoSlot)
        );
    }

    #[test]
    fn suspend_resume_round_trip() {
        let (mut k, mut pool) = uut();
        let pid = create(
            &mut k,
            &mut pool,
            ENTRY,
            512,
            Priority(10),
            "pausable",
            &[],
        )
        .unwrap();
        // Fresh processes are already suspended; resume starts them.
        assert_eq!(resume(&mut k, pid), Ok(Priority(10)));
        // Priority 10 beats the null process; it is now current.
        assert_eq!(k.current(), pid);
        assert_eq!(suspend(&mut k, pid), Ok(Priority(10)));
        assert_eq!(k.pcb(pid).state(), ProcState::Susp);
        assert_eq!(k.current(), Pid::NULL);
        // Suspending an already-suspended process fails.
        assert_eq!(suspend(&mut k, pid), Err(KernelError::BadState));
    }

    #[test]
    fn getname_truncates_and_terminates() {
        let (mut k, mut pool) = uut();
        let pid = create(
            &mut k,
            &mut pool,
            ENTRY,
            256,
            Priority(1),
            "a-name-well-beyond-the-limit",
            &[],
        )
        .unwrap();
        let mut buf = [0xffu8; NAMELEN];
        getname(&k, pid, &mut buf).unwrap();
        assert_eq!(&buf[..NAMELEN - 1], b"a-name-well-bey");
        assert_eq!(buf[NAMELEN - 1], 0);
    }

    #[test]
    fn dead_ids_are_rejected() {
        let (k, _) = uut();
        assert_eq!(getprio(&k, Pid(5)), Err(KernelError::BadId));
        assert_eq!(getprio(&k, Pid(999)), Err(KernelError::BadId));
        // The null process is alive, though.
        assert_eq!(getprio(&k, Pid::NULL), Ok(Priority::MIN));
    }
}
