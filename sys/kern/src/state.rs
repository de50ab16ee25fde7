// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel state value.
//!
//! Every mutable table in the system -- processes, queues, semaphores,
//! clock, timers, mailboxes, ports, dispatch statistics -- lives in one
//! owned [`Kernel`]. Operations are functions over `&mut Kernel`, which
//! keeps mutation single-threaded by construction; on hardware the
//! critical-section gate provides the same guarantee against interrupt
//! handlers, and `startup::with_kernel` guards against reentry.

use abi::{Pid, Priority, ProcState, NPORTS, NPROC};

use crate::clock::{Clock, TimerTable};
use crate::mailbox::Mailbox;
use crate::msg::MsgStats;
use crate::port::Port;
use crate::proc::Pcb;
use crate::queue::{Qid, QueueTable};
use crate::sched::SchedCtl;
use crate::sem::SemTable;
use crate::syscalls::DispatchStats;

pub struct Kernel {
    pub(crate) procs: [Pcb; NPROC],
    pub(crate) current: Pid,
    pub(crate) pid_hint: usize,
    pub(crate) queues: QueueTable,
    pub(crate) ready_q: Qid,
    pub(crate) sleep_q: Qid,
    pub(crate) sems: SemTable,
    pub(crate) clock: Clock,
    pub(crate) timers: TimerTable,
    pub(crate) boxes: [Mailbox; NPROC],
    pub(crate) ports: [Port; NPORTS],
    pub(crate) sched: SchedCtl,
    pub(crate) stats: DispatchStats,
    pub(crate) msg_stats: MsgStats,
}

impl Kernel {
    /// Builds the boot state: empty tables, and the null process (PID 0)
    /// running at minimum priority. The null process uses the boot stack,
    /// so it owns no allocation.
    pub fn new() -> Self {
        let mut queues = QueueTable::new();
        let ready_q = queues.new_queue();
        let sleep_q = queues.new_queue();
        let sems = SemTable::new(&mut queues);

        let mut procs: [Pcb; NPROC] =
            core::array::from_fn(|_| Pcb::default());
        procs[0] = Pcb::new(ProcState::Curr, Priority::MIN, "null");

        Self {
            procs,
            current: Pid::NULL,
            pid_hint: 1,
            queues,
            ready_q,
            sleep_q,
            sems,
            clock: Clock::new(),
            timers: TimerTable::new(),
            boxes: core::array::from_fn(|_| Mailbox::default()),
            ports: core::array::from_fn(|_| Port::default()),
            sched: SchedCtl::default(),
            stats: DispatchStats::new(),
            msg_stats: MsgStats::default(),
        }
    }

    /// The running process.
    pub fn current(&self) -> Pid {
        self.current
    }

    /// Read access to a PCB. Panics on an out-of-range id; this is a
    /// diagnostic interface, not a syscall.
    pub fn pcb(&self, pid: Pid) -> &Pcb {
        &self.procs[pid.index()]
    }

    /// Ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    /// The ready list, most favored first. Diagnostic.
    pub fn ready_queue(&self) -> impl Iterator<Item = Pid> + '_ {
        self.queues.iter(self.ready_q)
    }

    /// The sleep delta list with each entry's remaining delta.
    /// Diagnostic.
    pub fn sleep_queue(&self) -> impl Iterator<Item = (Pid, i32)> + '_ {
        self.queues
            .iter(self.sleep_q)
            .map(move |p| (p, self.queues.key(p)))
    }

    /// Whether `pid`'s link node is threaded into any kernel queue.
    /// Diagnostic.
    pub fn is_queued(&self, pid: Pid) -> bool {
        self.queues.is_linked(pid)
    }

    /// Dispatch statistics. Diagnostic.
    pub fn dispatch_stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Message statistics. Diagnostic.
    pub fn msg_stats(&self) -> &MsgStats {
        &self.msg_stats
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
