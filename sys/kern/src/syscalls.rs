// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent system call dispatch.
//!
//! The platform's trap stub decodes the call number and argument words
//! from the saved registers and hands them here. The dispatcher validates
//! the number against the table, counts the call, invokes the operation,
//! and deposits the result in the caller's saved state -- immediately for
//! operations that complete, or later via the wake path for operations
//! that park the caller.
//!
//! Call numbers are ABI (see [`abi::Sysnum`]); the gaps in the numbering
//! are reserved and permanently disabled.

use abi::{
    KernelError, Message, Pid, Priority, Sid, Sysnum, NPROC, NSEM,
    NSYSCALLS, OK, SYSERR,
};

use crate::arch;
use crate::err::Completion;
use crate::gate;
use crate::mem::MemPool;
use crate::profiling;
use crate::state::Kernel;
use crate::{clock, msg, proc, sched, sem};

/// Dispatch bookkeeping: the enable mask and the counters the kernel
/// maintains per the dispatcher contract.
pub struct DispatchStats {
    total: u64,
    errors: u64,
    calls: [u64; NSYSCALLS],
    enabled: [bool; NSYSCALLS],
}

impl DispatchStats {
    pub(crate) fn new() -> Self {
        let mut enabled = [false; NSYSCALLS];
        for (i, slot) in enabled.iter_mut().enumerate() {
            *slot = Sysnum::try_from(i as u32).is_ok();
        }
        Self {
            total: 0,
            errors: 0,
            calls: [0; NSYSCALLS],
            enabled,
        }
    }

    /// Total successfully-dispatched calls.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Rejected dispatches (bad or disabled numbers).
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Dispatch count for one call number.
    pub fn calls(&self, nr: u32) -> u64 {
        self.calls.get(nr as usize).copied().unwrap_or(0)
    }

    /// Whether a call number is wired up.
    pub fn is_enabled(&self, nr: u32) -> bool {
        self.enabled
            .get(nr as usize)
            .copied()
            .unwrap_or(false)
    }
}

/// Raw argument words as decoded from the caller's saved registers.
pub type SyscallArgs = [u32; 6];

/// Dispatches one system call on behalf of the current process.
///
/// Returns the value deposited in the caller's saved state. If the call
/// parked the caller, the returned value is `OK` and the real result
/// arrives in the caller's saved state when it wakes.
pub fn dispatch(
    k: &mut Kernel,
    pool: &mut dyn MemPool,
    nr: u32,
    args: &SyscallArgs,
) -> i32 {
    let mask = gate::disable();
    profiling::event_syscall_enter(nr);
    let r = dispatch_inner(k, pool, nr, args);
    profiling::event_syscall_exit();
    gate::restore(mask);
    r
}

fn dispatch_inner(
    k: &mut Kernel,
    pool: &mut dyn MemPool,
    nr: u32,
    args: &SyscallArgs,
) -> i32 {
    let num = match Sysnum::try_from(nr) {
        Ok(num)
            if (nr as usize) < NSYSCALLS
                && k.stats.enabled[nr as usize] =>
        {
            num
        }
        _ => {
            k.stats.errors += 1;
            return SYSERR;
        }
    };
    k.stats.total += 1;
    k.stats.calls[nr as usize] += 1;

    let caller = k.current;
    match invoke(k, pool, num, args) {
        Ok(Completion::Done(v)) => {
            proc::deposit(k, caller, v);
            v
        }
        Ok(Completion::Pending) => OK,
        Err(e) => {
            let v = e.code();
            proc::deposit(k, caller, v);
            v
        }
    }
}

fn arg_pid(a: u32) -> Result<Pid, KernelError> {
    if (a as usize) < NPROC {
        Ok(Pid(a as u16))
    } else {
        Err(KernelError::BadId)
    }
}

fn arg_sid(a: u32) -> Result<Sid, KernelError> {
    if (a as usize) < NSEM {
        Ok(Sid(a as u16))
    } else {
        Err(KernelError::BadId)
    }
}

fn invoke(
    k: &mut Kernel,
    pool: &mut dyn MemPool,
    num: Sysnum,
    args: &SyscallArgs,
) -> Result<Completion, KernelError> {
    match num {
        Sysnum::Create => {
            let name = arch::user_name(args[3]);
            let pid = proc::create(
                k,
                pool,
                args[0],
                args[1],
                Priority::clamp_from(args[2]),
                name,
                &[],
            )?;
            Ok(Completion::Done(i32::from(pid.0)))
        }
        Sysnum::Kill => {
            proc::kill(k, pool, arg_pid(args[0])?)?;
            Ok(Completion::ok())
        }
        Sysnum::GetPid => {
            Ok(Completion::Done(i32::from(proc::getpid(k).0)))
        }
        Sysnum::Suspend => {
            let prio = proc::suspend(k, arg_pid(args[0])?)?;
            Ok(Completion::Done(i32::from(prio.0)))
        }
        Sysnum::Resume => {
            let prio = proc::resume(k, arg_pid(args[0])?)?;
            Ok(Completion::Done(i32::from(prio.0)))
        }
        Sysnum::Yield => {
            sched::yield_now(k);
            Ok(Completion::ok())
        }
        Sysnum::Sleep => clock::sleep(k, args[0]),
        Sysnum::SleepMs => clock::sleep_ms(k, args[0]),
        Sysnum::Exit => {
            proc::exit(k, pool);
            Ok(Completion::ok())
        }
        Sysnum::GetPrio => {
            let prio = proc::getprio(k, arg_pid(args[0])?)?;
            Ok(Completion::Done(i32::from(prio.0)))
        }
        Sysnum::SetPrio => {
            let old = proc::chprio(
                k,
                arg_pid(args[0])?,
                Priority::clamp_from(args[1]),
            )?;
            Ok(Completion::Done(i32::from(old.0)))
        }
        Sysnum::GetMem => {
            let addr = pool.getmem(args[0])?;
            Ok(Completion::Done(addr as i32))
        }
        Sysnum::FreeMem => {
            pool.freemem(args[0], args[1])?;
            Ok(Completion::ok())
        }
        Sysnum::SemCreate => {
            let sid = sem::semcreate(k, args[0] as i32)?;
            Ok(Completion::Done(i32::from(sid.0)))
        }
        Sysnum::SemDelete => {
            sem::semdelete(k, arg_sid(args[0])?)?;
            Ok(Completion::ok())
        }
        Sysnum::Wait => sem::wait(k, arg_sid(args[0])?),
        Sysnum::Signal => {
            sem::signal(k, arg_sid(args[0])?)?;
            Ok(Completion::ok())
        }
        Sysnum::SignalN => {
            sem::signaln(k, arg_sid(args[0])?, args[1] as i32)?;
            Ok(Completion::ok())
        }
        Sysnum::SemCount => {
            let count = sem::semcount(k, arg_sid(args[0])?)?;
            Ok(Completion::Done(count))
        }
        Sysnum::Send => {
            msg::send(k, arg_pid(args[0])?, Message(args[1]))?;
            Ok(Completion::ok())
        }
        Sysnum::Receive => msg::receive(k),
        Sysnum::RecvClr => {
            Ok(Completion::Done(msg::recvclr(k).0 as i32))
        }
        Sysnum::RecvTime => msg::recvtime(k, args[0]),
        Sysnum::GetTime => {
            Ok(Completion::Done(clock::gettime(k) as i32))
        }
        Sysnum::GetTicks => {
            Ok(Completion::Done(clock::getticks(k) as u32 as i32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::TestPool;
    use abi::TIMEOUT;

    const NO_ARGS: SyscallArgs = [0; 6];

    #[test]
    fn bad_numbers_are_counted_and_rejected() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        assert_eq!(dispatch(&mut k, &mut pool, 999, &NO_ARGS), SYSERR);
        // 10 is a reserved gap in the table.
        assert_eq!(dispatch(&mut k, &mut pool, 10, &NO_ARGS), SYSERR);
        assert_eq!(k.dispatch_stats().errors(), 2);
        assert_eq!(k.dispatch_stats().total(), 0);
        assert!(!k.dispatch_stats().is_enabled(10));
        assert!(k.dispatch_stats().is_enabled(3));
    }

    #[test]
    fn counters_track_each_call() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        assert_eq!(dispatch(&mut k, &mut pool, 3, &NO_ARGS), 0); // getpid
        assert_eq!(dispatch(&mut k, &mut pool, 61, &NO_ARGS), 0); // getticks
        assert_eq!(dispatch(&mut k, &mut pool, 3, &NO_ARGS), 0);
        let stats = k.dispatch_stats();
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.calls(3), 2);
        assert_eq!(stats.calls(61), 1);
        assert_eq!(stats.errors(), 0);
    }

    #[test]
    fn results_are_deposited_in_the_caller() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let sid = dispatch(&mut k, &mut pool, 30, &[2, 0, 0, 0, 0, 0]);
        assert!(sid >= 0);
        // semcount through the ABI.
        let args = [sid as u32, 0, 0, 0, 0, 0];
        assert_eq!(dispatch(&mut k, &mut pool, 35, &args), 2);
        assert_eq!(
            k.pcb(abi::Pid::NULL).save().syscall_return(),
            2
        );
    }

    #[test]
    fn errors_map_onto_the_sentinel_space() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        // Wait on a never-created semaphore.
        assert_eq!(
            dispatch(&mut k, &mut pool, 32, &[7, 0, 0, 0, 0, 0]),
            SYSERR
        );
        // recvtime(0) with no message pending times out immediately.
        assert_eq!(
            dispatch(&mut k, &mut pool, 53, &NO_ARGS),
            TIMEOUT
        );
        // Out-of-range pid arguments never reach the tables.
        assert_eq!(
            dispatch(&mut k, &mut pool, 2, &[70000, 0, 0, 0, 0, 0]),
            SYSERR
        );
    }

    #[test]
    fn memory_calls_reach_the_pool() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let addr = dispatch(&mut k, &mut pool, 20, &[64, 0, 0, 0, 0, 0]);
        assert!(addr > 0);
        assert_eq!(pool.heap_outstanding(), 64);
        let args = [addr as u32, 64, 0, 0, 0, 0];
        assert_eq!(dispatch(&mut k, &mut pool, 21, &args), 0);
        assert_eq!(pool.heap_outstanding(), 0);
    }

    #[test]
    fn gate_is_released_after_dispatch() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let _ = dispatch(&mut k, &mut pool, 3, &NO_ARGS);
        assert!(crate::arch::interrupts_enabled());
    }
}
