// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel time: the tick handler, the sleep delta list, software timers,
//! and the preemption quantum.
//!
//! The platform programs a periodic timer at `CLKFREQ` Hz and arranges
//! for [`clock_tick`] to run on each interrupt, inside the gate. Each
//! tick:
//!
//! 1. advances the tick counter and the wall-clock derivations;
//! 2. if ticks are deferred, counts the tick for later replay and stops;
//! 3. fires expired software timers (callbacks run right here, in
//!    interrupt context, gate held);
//! 4. ages the sleep delta list and wakes everything that hit zero, and
//!    expires timed waits whose deadline has passed;
//! 5. charges the running process's quantum, rotating equals when it
//!    hits zero.
//!
//! Scheduling effects are batched: the body runs in deferred-reschedule
//! mode and the switch happens at most once, on the way out.

use abi::{KernelError, Pid, ProcState, TimerId, CLKFREQ, DEFAULT_QUANTUM,
    NPROC, NTIMERS, OK, TIMEOUT};

use crate::err::Completion;
use crate::proc::{self, Pending};
use crate::sched;
use crate::state::Kernel;

const MS_PER_SEC: u32 = 1000;
const MS_PER_TICK: u32 = MS_PER_SEC / CLKFREQ;

/// Longest single sleep, in ticks.
const MAX_SLEEP: u32 = i32::MAX as u32;

/// Converts milliseconds to ticks, rounding up so that a non-zero
/// request never becomes a zero-tick wait.
pub(crate) fn ms_to_ticks(ms: u32) -> u64 {
    u64::from(ms.div_ceil(MS_PER_TICK))
}

/// Wall-clock decomposition of the uptime.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Uptime {
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

pub struct Clock {
    ticks: u64,
    ms_of_sec: u32,
    seconds: u32,
    /// 0 = ticks processed normally; n > 0 = deferral armed, with n - 1
    /// ticks waiting to be replayed.
    defer: u32,
    quantum: u32,
    quantum_left: u32,
    uptime: Uptime,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            ticks: 0,
            ms_of_sec: 0,
            seconds: 0,
            defer: 0,
            quantum: DEFAULT_QUANTUM,
            quantum_left: DEFAULT_QUANTUM,
            uptime: Uptime::default(),
        }
    }

    pub(crate) fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// The clock interrupt handler. Runs with the gate held.
pub fn clock_tick(k: &mut Kernel) {
    k.clock.ticks += 1;
    k.clock.ms_of_sec += MS_PER_TICK;
    if k.clock.ms_of_sec >= MS_PER_SEC {
        k.clock.ms_of_sec = 0;
        k.clock.seconds += 1;
        roll_uptime(&mut k.clock.uptime);
    }

    if k.clock.defer > 0 {
        k.clock.defer += 1;
        return;
    }

    let prev = sched::resched_cntl(k, true);
    process_timers(k);
    let mut woke = drain_sleepers(k);
    if expire_deadlines(k) {
        woke = true;
    }
    if woke {
        k.sched.pending = true;
    }

    k.clock.quantum_left = k.clock.quantum_left.saturating_sub(1);
    let rotate = k.clock.quantum_left == 0;
    if rotate {
        k.clock.quantum_left = k.clock.quantum;
    }

    sched::resched_cntl(k, prev);
    if rotate {
        // Quantum exhaustion rotates equal-priority peers; a plain
        // resched would not.
        sched::yield_now(k);
    }
}

fn roll_uptime(u: &mut Uptime) {
    u.seconds += 1;
    if u.seconds >= 60 {
        u.seconds = 0;
        u.minutes += 1;
        if u.minutes >= 60 {
            u.minutes = 0;
            u.hours += 1;
            if u.hours >= 24 {
                u.hours = 0;
                u.days += 1;
            }
        }
    }
}

/// Arms tick deferral: subsequent ticks only count until
/// [`undefer_clock`] replays them.
pub fn defer_clock(k: &mut Kernel) {
    if k.clock.defer == 0 {
        k.clock.defer = 1;
    }
}

/// Disarms tick deferral, replaying the timer-fire and sleeper-drain
/// work once per tick that arrived while deferred.
pub fn undefer_clock(k: &mut Kernel) {
    if k.clock.defer <= 1 {
        k.clock.defer = 0;
        return;
    }
    let replay = k.clock.defer - 1;
    k.clock.defer = 0;
    let prev = sched::resched_cntl(k, true);
    let mut woke = false;
    for _ in 0..replay {
        process_timers(k);
        if drain_sleepers(k) {
            woke = true;
        }
        if expire_deadlines(k) {
            woke = true;
        }
    }
    if woke {
        k.sched.pending = true;
    }
    sched::resched_cntl(k, prev);
}

/// Ages the head of the sleep delta list by one tick and wakes every
/// entry that has reached zero.
fn drain_sleepers(k: &mut Kernel) -> bool {
    let Some(head) = k.queues.first(k.sleep_q) else {
        return false;
    };
    k.queues.add_key(head, -1);
    let mut woke = false;
    while let Some(h) = k.queues.first(k.sleep_q) {
        if k.queues.key(h) > 0 {
            break;
        }
        k.queues.dequeue(k.sleep_q);
        uassert!(k.procs[h.index()].state() == ProcState::Sleep);
        proc::settle(k, h, OK);
        sched::ready(k, h);
        woke = true;
    }
    woke
}

/// Expires timed waits. A WAIT process past its deadline leaves the
/// semaphore queue with the count restored; a RECV process just wakes.
/// Both observe TIMEOUT.
fn expire_deadlines(k: &mut Kernel) -> bool {
    let now = k.clock.ticks;
    let mut woke = false;
    for i in 0..NPROC {
        let pid = Pid(i as u16);
        let (state, deadline, wait_sem) = {
            let p = &k.procs[i];
            (p.state(), p.deadline(), p.wait_sem())
        };
        let Some(dl) = deadline else { continue };
        if dl > now {
            continue;
        }
        match state {
            ProcState::Wait => {
                let sid = match wait_sem {
                    Some(sid) => sid,
                    None => {
                        uassert!(false);
                        continue;
                    }
                };
                uassert!(k
                    .queues
                    .remove(pid, k.sems.queue_of(sid))
                    .is_ok());
                k.sems.credit_lost_waiter(sid);
            }
            ProcState::Recv => {
                k.msg_stats.timeouts += 1;
            }
            // Deadlines only ever belong to timed waits.
            _ => {
                uassert!(false);
                continue;
            }
        }
        proc::settle(k, pid, TIMEOUT);
        sched::ready(k, pid);
        woke = true;
    }
    woke
}

/// Puts the calling process to sleep for `ticks` clock ticks.
pub fn sleep(k: &mut Kernel, ticks: u32) -> Result<Completion, KernelError> {
    if ticks == 0 {
        return Ok(Completion::ok());
    }
    if ticks > MAX_SLEEP {
        return Err(KernelError::BadState);
    }
    let me = k.current;
    if me == Pid::NULL {
        return Err(KernelError::BadState);
    }
    k.procs[me.index()].park(
        ProcState::Sleep,
        None,
        None,
        Pending::Sleep,
    );
    uassert!(k.queues.insertd(me, k.sleep_q, ticks as i32).is_ok());
    sched::resched(k);
    Ok(Completion::Pending)
}

/// Sleeps for `ms` milliseconds, rounded up to whole ticks.
pub fn sleep_ms(k: &mut Kernel, ms: u32) -> Result<Completion, KernelError> {
    sleep(k, ms_to_ticks(ms) as u32)
}

/// Pulls a sleeping process out of the delta list early. Its remaining
/// delta folds into its successor, so everyone behind it still wakes on
/// schedule. The process becomes READY (no reschedule) and its sleep
/// completes with OK.
pub fn unsleep(k: &mut Kernel, pid: Pid) -> Result<(), KernelError> {
    if !pid.is_in_range() {
        return Err(KernelError::BadId);
    }
    if k.procs[pid.index()].state() != ProcState::Sleep {
        return Err(KernelError::BadState);
    }
    k.queues.remove_delta(pid, k.sleep_q)?;
    proc::settle(k, pid, OK);
    sched::ready(k, pid);
    Ok(())
}

/// Seconds since boot.
pub fn gettime(k: &Kernel) -> u32 {
    k.clock.seconds
}

/// Ticks since boot.
pub fn getticks(k: &Kernel) -> u64 {
    k.clock.ticks
}

/// Structured uptime.
pub fn uptime(k: &Kernel) -> Uptime {
    k.clock.uptime
}

/// Replaces the scheduling quantum (minimum one tick), returning the old
/// value. Takes effect at the next recharge.
pub fn set_quantum(k: &mut Kernel, quantum: u32) -> u32 {
    let old = k.clock.quantum;
    k.clock.quantum = quantum.max(1);
    old
}

/// The current scheduling quantum.
pub fn quantum(k: &Kernel) -> u32 {
    k.clock.quantum
}

/// A software timer callback. Runs in interrupt context with the gate
/// held and reschedules deferred; keep it short.
pub type TimerFn = fn(&mut Kernel, usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerState {
    Free,
    Active,
    Expired,
    Stopped,
}

#[derive(Copy, Clone)]
struct Timer {
    state: TimerState,
    /// Absolute expiry tick.
    expires: u64,
    /// Reload interval; 0 for one-shot.
    period: u32,
    /// Tick at which the timer was last armed.
    armed_at: u64,
    cb: Option<TimerFn>,
    arg: usize,
}

const IDLE_TIMER: Timer = Timer {
    state: TimerState::Free,
    expires: 0,
    period: 0,
    armed_at: 0,
    cb: None,
    arg: 0,
};

pub struct TimerTable {
    slots: [Timer; NTIMERS],
}

impl TimerTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: [IDLE_TIMER; NTIMERS],
        }
    }
}

fn check_timer(k: &Kernel, id: TimerId) -> Result<(), KernelError> {
    if id.is_in_range()
        && k.timers.slots[id.index()].state != TimerState::Free
    {
        Ok(())
    } else {
        Err(KernelError::BadId)
    }
}

/// Arms a timer to call `cb(arg)` after `delay > 0` ticks; a non-zero
/// `period` makes it reload every `period` ticks after that.
pub fn timer_create(
    k: &mut Kernel,
    cb: TimerFn,
    arg: usize,
    delay: u32,
    period: u32,
) -> Result<TimerId, KernelError> {
    if delay == 0 {
        return Err(KernelError::BadState);
    }
    let slot = k
        .timers
        .slots
        .iter()
        .position(|t| t.state == TimerState::Free)
        .ok_or(KernelError::NoSlot)?;
    let now = k.clock.ticks;
    k.timers.slots[slot] = Timer {
        state: TimerState::Active,
        expires: now + u64::from(delay),
        period,
        armed_at: now,
        cb: Some(cb),
        arg,
    };
    Ok(TimerId(slot as u8))
}

/// Halts an ACTIVE timer without freeing it.
pub fn timer_stop(k: &mut Kernel, id: TimerId) -> Result<(), KernelError> {
    check_timer(k, id)?;
    let t = &mut k.timers.slots[id.index()];
    if t.state != TimerState::Active {
        return Err(KernelError::BadState);
    }
    t.state = TimerState::Stopped;
    Ok(())
}

/// (Re)starts a stopped or expired timer. A non-zero `delay` arms a
/// fresh expiry; zero keeps the previous one.
pub fn timer_start(
    k: &mut Kernel,
    id: TimerId,
    delay: u32,
) -> Result<(), KernelError> {
    check_timer(k, id)?;
    let now = k.clock.ticks;
    let t = &mut k.timers.slots[id.index()];
    if delay > 0 {
        t.expires = now + u64::from(delay);
        t.armed_at = now;
    }
    t.state = TimerState::Active;
    Ok(())
}

/// Frees a timer slot.
pub fn timer_delete(k: &mut Kernel, id: TimerId) -> Result<(), KernelError> {
    check_timer(k, id)?;
    k.timers.slots[id.index()] = IDLE_TIMER;
    Ok(())
}

/// The state of a timer slot. Observational.
pub fn timer_state(k: &Kernel, id: TimerId) -> Result<TimerState, KernelError> {
    if id.is_in_range() {
        Ok(k.timers.slots[id.index()].state)
    } else {
        Err(KernelError::BadId)
    }
}

/// Fires every ACTIVE timer whose expiry has arrived. Periodic timers
/// reload to `now + period`; one-shots become EXPIRED. Callbacks run
/// after the whole table has settled, so a callback that manipulates
/// timers sees consistent state.
fn process_timers(k: &mut Kernel) {
    let now = k.clock.ticks;
    let mut fired: [Option<(TimerFn, usize)>; NTIMERS] = [None; NTIMERS];
    let mut n = 0;
    for t in k.timers.slots.iter_mut() {
        if t.state == TimerState::Active && t.expires <= now {
            uassert!(t.expires >= t.armed_at);
            if t.period > 0 {
                t.expires = now + u64::from(t.period);
            } else {
                t.state = TimerState::Expired;
            }
            if let Some(cb) = t.cb {
                fired[n] = Some((cb, t.arg));
                n += 1;
            }
        }
    }
    for f in fired.iter().take(n) {
        if let Some((cb, arg)) = f {
            cb(k, *arg);
        }
    }
}
