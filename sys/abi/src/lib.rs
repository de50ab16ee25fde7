// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and host-side tooling.
//!
//! Everything here is part of the stable surface: table sizes, identifier
//! types, the process state machine, result sentinels, and the system call
//! numbering.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of slots in the process table. Process 0 is the null process and
/// is born at boot, so `NPROC - 1` slots are allocatable.
pub const NPROC: usize = 32;

/// Number of slots in the semaphore table. Mailboxes and ports consume
/// three semaphores apiece, which is why this is generous relative to
/// `NPROC`.
pub const NSEM: usize = 256;

/// Number of slots in the software timer table.
pub const NTIMERS: usize = 32;

/// Number of named message ports.
pub const NPORTS: usize = 32;

/// Messages buffered per mailbox.
pub const MBOX_DEPTH: usize = 16;

/// Messages buffered per named port.
pub const PORT_DEPTH: usize = 8;

/// Size of the system call dispatch table. Call numbers are valid in
/// `[0, NSYSCALLS)`.
pub const NSYSCALLS: usize = 128;

/// Fixed length of a process name, including the implied terminator slot.
pub const NAMELEN: usize = 16;

/// Minimum stack allocation, in bytes. `create` silently rounds smaller
/// requests up to this.
pub const MINSTK: u32 = 256;

/// Clock tick rate in Hz. One tick is one millisecond.
pub const CLKFREQ: u32 = 1000;

/// Default scheduling quantum, in ticks.
pub const DEFAULT_QUANTUM: u32 = 10;

/// Success sentinel.
pub const OK: i32 = 0;

/// General failure sentinel.
pub const SYSERR: i32 = -1;

/// Timed operation expired without completing.
pub const TIMEOUT: i32 = -2;

/// Names a process table slot.
///
/// Process ids are dense small integers in `[0, NPROC)`; they are reused
/// as soon as a slot is freed, so a `Pid` held across a `kill` may name a
/// different process later. Code that needs to detect that must consult
/// the process state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Pid(pub u16);

impl Pid {
    /// The null process, which exists from boot to shutdown and runs when
    /// nothing else is ready.
    pub const NULL: Self = Self(0);

    /// This id as a process table index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Checks whether the id can name a process table slot at all.
    pub fn is_in_range(self) -> bool {
        self.index() < NPROC
    }
}

/// Indicates priority of a process.
///
/// Priorities are small numbers; numerically *larger* priorities are more
/// favored, so priority 200 beats priority 10 for the CPU. The null
/// process runs at `Priority::MIN`.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/
/// `Ord`, to keep us from confusing ourselves about which direction is
/// "more important." Use `is_more_important_than`.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Least favored priority; reserved for the null process in practice.
    pub const MIN: Self = Self(0);

    /// Most favored priority.
    pub const MAX: Self = Self(255);

    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Clamps an arbitrary user-supplied value into the valid priority
    /// range.
    pub fn clamp_from(raw: u32) -> Self {
        Self(raw.min(u32::from(Self::MAX.0)) as u8)
    }
}

/// A message, as carried by the single-slot, mailbox, and port channels.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct Message(pub u32);

/// Process state machine.
///
/// A PCB is in exactly one of these states, and the state determines which
/// (single) kernel queue the PCB may be linked into: READY processes live
/// in the ready list, SLEEP processes in the sleep delta list, WAIT
/// processes in a semaphore queue, and nothing else is queued.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
pub enum ProcState {
    /// Slot is unoccupied.
    #[default]
    Free,
    /// The running process. Exactly one PCB is in this state.
    Curr,
    /// Eligible to run; linked into the ready list (except the null
    /// process, which is selected by fallback instead).
    Ready,
    /// Blocked waiting for a single-slot message.
    Recv,
    /// Blocked in the sleep delta list.
    Sleep,
    /// Suspended; will not run until resumed.
    Susp,
    /// Blocked in a semaphore wait queue.
    Wait,
}

impl ProcState {
    /// Checks whether the slot holds a process at all.
    pub fn is_alive(self) -> bool {
        self != Self::Free
    }
}

/// Names a semaphore table slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Sid(pub u16);

impl Sid {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_in_range(self) -> bool {
        self.index() < NSEM
    }
}

/// Names a software timer slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TimerId(pub u8);

impl TimerId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_in_range(self) -> bool {
        self.index() < NTIMERS
    }
}

/// Names a message port slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PortId(pub u8);

impl PortId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_in_range(self) -> bool {
        self.index() < NPORTS
    }
}

/// Errors surfaced by kernel entry points.
///
/// These never cross the ABI boundary as structured data; the dispatcher
/// folds them onto the sentinel space via `code`. The distinction matters
/// inside the kernel and in hosted tests, where the precise failure is
/// asserted on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KernelError {
    /// Identifier is out of range or names a FREE slot.
    BadId,
    /// No free slot in the relevant table (PCB, semaphore, timer, port,
    /// mailbox).
    NoSlot,
    /// The operation's precondition on the target's state failed (kill
    /// the null process, resume a non-suspended process, and so on).
    BadState,
    /// A timed wait expired before the operation could complete.
    /// (Blocked processes released by a deletion observe the plain
    /// failure sentinel instead; that distinction is drawn at the wake
    /// path, not here.)
    Timeout,
    /// The non-blocking variant would have had to block.
    WouldBlock,
    /// The target already holds an undelivered message.
    SlotFull,
    /// The external allocator refused the request.
    NoMem,
    /// A name argument was empty, too long, or already taken.
    BadName,
}

impl KernelError {
    /// The sentinel this error is reported as at the ABI boundary.
    pub fn code(self) -> i32 {
        match self {
            Self::Timeout => TIMEOUT,
            _ => SYSERR,
        }
    }
}

/// Enumeration of system call numbers.
///
/// The numeric values are part of the ABI and mirror the dispatch table;
/// gaps are reserved. We use an explicit `TryFrom` rather than a derive
/// crate because this is the only place one would be needed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u32)]
pub enum Sysnum {
    Create = 1,
    Kill = 2,
    GetPid = 3,
    Suspend = 4,
    Resume = 5,
    Yield = 6,
    Sleep = 7,
    SleepMs = 8,
    Exit = 9,
    GetPrio = 11,
    SetPrio = 12,
    GetMem = 20,
    FreeMem = 21,
    SemCreate = 30,
    SemDelete = 31,
    Wait = 32,
    Signal = 33,
    SignalN = 34,
    SemCount = 35,
    Send = 50,
    Receive = 51,
    RecvClr = 52,
    RecvTime = 53,
    GetTime = 60,
    GetTicks = 61,
}

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            1 => Ok(Self::Create),
            2 => Ok(Self::Kill),
            3 => Ok(Self::GetPid),
            4 => Ok(Self::Suspend),
            5 => Ok(Self::Resume),
            6 => Ok(Self::Yield),
            7 => Ok(Self::Sleep),
            8 => Ok(Self::SleepMs),
            9 => Ok(Self::Exit),
            11 => Ok(Self::GetPrio),
            12 => Ok(Self::SetPrio),
            20 => Ok(Self::GetMem),
            21 => Ok(Self::FreeMem),
            30 => Ok(Self::SemCreate),
            31 => Ok(Self::SemDelete),
            32 => Ok(Self::Wait),
            33 => Ok(Self::Signal),
            34 => Ok(Self::SignalN),
            35 => Ok(Self::SemCount),
            50 => Ok(Self::Send),
            51 => Ok(Self::Receive),
            52 => Ok(Self::RecvClr),
            53 => Ok(Self::RecvTime),
            60 => Ok(Self::GetTime),
            61 => Ok(Self::GetTicks),
            _ => Err(()),
        }
    }
}
