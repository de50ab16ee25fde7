// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named message ports.
//!
//! A port is the mailbox protocol with a name instead of a process: a
//! bounded ring guarded by mutex/items/slots semaphores, looked up by a
//! unique name string, owned by the process that created it. Only the
//! owner may delete it. Capacity is `PORT_DEPTH`, independent of the
//! mailbox depth.

use abi::{
    KernelError, Message, Pid, PortId, Sid, NAMELEN, NPORTS, PORT_DEPTH,
};

use crate::err::Completion;
use crate::mailbox::Ring;
use crate::proc::Pending;
use crate::sched;
use crate::sem::{self, Reserve};
use crate::state::Kernel;

/// One named port. Inactive until `port_create`.
#[derive(Clone, Debug)]
pub struct Port {
    active: bool,
    name: [u8; NAMELEN],
    owner: Pid,
    ring: Ring<PORT_DEPTH>,
    mutex: Sid,
    items: Sid,
    slots: Sid,
}

impl Default for Port {
    fn default() -> Self {
        Self {
            active: false,
            name: [0; NAMELEN],
            owner: Pid::NULL,
            ring: Ring::default(),
            mutex: Sid(0),
            items: Sid(0),
            slots: Sid(0),
        }
    }
}

impl Port {
    fn name(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..end]
    }
}

fn active_port(k: &Kernel, id: PortId) -> Result<&Port, KernelError> {
    if !id.is_in_range() {
        return Err(KernelError::BadId);
    }
    let p = &k.ports[id.index()];
    if p.active {
        Ok(p)
    } else {
        Err(KernelError::BadId)
    }
}

fn valid_name(name: &str) -> Result<(), KernelError> {
    if name.is_empty() || name.len() > NAMELEN - 1 {
        Err(KernelError::BadName)
    } else {
        Ok(())
    }
}

/// Creates a port with a unique name, owned by the calling process.
pub fn port_create(
    k: &mut Kernel,
    name: &str,
) -> Result<PortId, KernelError> {
    valid_name(name)?;
    if k.ports
        .iter()
        .any(|p| p.active && p.name() == name.as_bytes())
    {
        return Err(KernelError::BadName);
    }
    let slot = k
        .ports
        .iter()
        .position(|p| !p.active)
        .ok_or(KernelError::NoSlot)?;

    let mutex = sem::semcreate(k, 1)?;
    let items = match sem::semcreate(k, 0) {
        Ok(s) => s,
        Err(e) => {
            let _ = sem::semdelete(k, mutex);
            return Err(e);
        }
    };
    let slots = match sem::semcreate(k, PORT_DEPTH as i32) {
        Ok(s) => s,
        Err(e) => {
            let _ = sem::semdelete(k, mutex);
            let _ = sem::semdelete(k, items);
            return Err(e);
        }
    };

    let p = &mut k.ports[slot];
    *p = Port {
        active: true,
        name: [0; NAMELEN],
        owner: k.current,
        ring: Ring::default(),
        mutex,
        items,
        slots,
    };
    p.name[..name.len()].copy_from_slice(name.as_bytes());
    Ok(PortId(slot as u8))
}

/// Finds a port by name.
pub fn port_lookup(k: &Kernel, name: &str) -> Result<PortId, KernelError> {
    valid_name(name)?;
    k.ports
        .iter()
        .position(|p| p.active && p.name() == name.as_bytes())
        .map(|i| PortId(i as u8))
        .ok_or(KernelError::BadId)
}

/// Deletes a port. Only the owner may; blocked senders and receivers are
/// released with SYSERR.
pub fn port_delete(k: &mut Kernel, id: PortId) -> Result<(), KernelError> {
    let (owner, mutex, items, slots) = {
        let p = active_port(k, id)?;
        (p.owner, p.mutex, p.items, p.slots)
    };
    if owner != k.current {
        return Err(KernelError::BadState);
    }
    k.ports[id.index()].active = false;
    sem::semdelete(k, mutex)?;
    sem::semdelete(k, items)?;
    sem::semdelete(k, slots)?;
    k.ports[id.index()] = Port::default();
    Ok(())
}

/// Ring write half of a port send; see `mailbox::finish_send`.
pub(crate) fn finish_send(k: &mut Kernel, id: PortId, msg: Message) {
    let (mutex, items) = {
        let p = &k.ports[id.index()];
        (p.mutex, p.items)
    };
    sem::take_must(k, mutex);
    k.ports[id.index()].ring.push(msg);
    sem::give(k, mutex);
    sem::give(k, items);
}

/// Ring read half of a port receive; see `mailbox::finish_recv`.
pub(crate) fn finish_recv(k: &mut Kernel, id: PortId) -> Message {
    let (mutex, slots) = {
        let p = &k.ports[id.index()];
        (p.mutex, p.slots)
    };
    sem::take_must(k, mutex);
    let m = k.ports[id.index()].ring.pop();
    sem::give(k, mutex);
    sem::give(k, slots);
    m
}

/// Sends to a port, blocking while it is full.
pub fn port_send(
    k: &mut Kernel,
    id: PortId,
    msg: Message,
) -> Result<Completion, KernelError> {
    let slots = active_port(k, id)?.slots;
    match sem::reserve(k, slots, Pending::PortSend { port: id, msg }, None)
    {
        Reserve::Acquired => {
            finish_send(k, id, msg);
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

/// Receives from a port, blocking while it is empty.
pub fn port_recv(
    k: &mut Kernel,
    id: PortId,
) -> Result<Completion, KernelError> {
    let items = active_port(k, id)?.items;
    match sem::reserve(k, items, Pending::PortRecv { port: id }, None) {
        Reserve::Acquired => {
            let m = finish_recv(k, id);
            k.msg_stats.received += 1;
            sched::resched(k);
            Ok(Completion::Done(m.0 as i32))
        }
        Reserve::Parked => Ok(Completion::Pending),
        Reserve::Refused => Err(KernelError::BadState),
    }
}

/// Number of buffered messages in a port.
pub fn port_count(k: &Kernel, id: PortId) -> Result<usize, KernelError> {
    Ok(active_port(k, id)?.ring.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::TestPool;
    use crate::proc;
    use abi::{Priority, ProcState, SYSERR};

    const ENTRY: u32 = 0x1000_0000;

    fn spawn_running(
        k: &mut Kernel,
        pool: &mut TestPool,
        prio: u8,
    ) -> Pid {
        let pid =
            proc::create(k, pool, ENTRY, 512, Priority(prio), "pt", &[])
                .unwrap();
        proc::resume(k, pid).unwrap();
        pid
    }

    #[test]
    fn names_are_unique_and_findable() {
        let mut k = Kernel::new();
        let id = port_create(&mut k, "console").unwrap();
        assert_eq!(port_lookup(&k, "console"), Ok(id));
        assert_eq!(
            port_create(&mut k, "console"),
            Err(KernelError::BadName)
        );
        assert_eq!(
            port_lookup(&k, "missing"),
            Err(KernelError::BadId)
        );
        assert_eq!(port_lookup(&k, ""), Err(KernelError::BadName));
    }

    #[test]
    fn only_the_owner_may_delete() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        // Created while null is current: null owns it.
        let id = port_create(&mut k, "owned").unwrap();
        let intruder = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(
            port_delete(&mut k, id),
            Err(KernelError::BadState)
        );
        // Back as the owner it works, and the name becomes reusable.
        proc::suspend(&mut k, intruder).unwrap();
        port_delete(&mut k, id).unwrap();
        assert!(port_create(&mut k, "owned").is_ok());
    }

    #[test]
    fn send_and_recv_round_trip() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let a = spawn_running(&mut k, &mut pool, 10);
        let id = port_create(&mut k, "pipe").unwrap();
        for v in 10..13 {
            assert_eq!(
                port_send(&mut k, id, Message(v)),
                Ok(Completion::ok())
            );
        }
        assert_eq!(port_count(&k, id), Ok(3));
        for v in 10..13 {
            assert_eq!(
                port_recv(&mut k, id),
                Ok(Completion::Done(v as i32))
            );
        }
        assert_eq!(port_count(&k, id), Ok(0));
        let _ = a;
    }

    #[test]
    fn receiver_parks_until_a_send() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let id = port_create(&mut k, "rendezvous").unwrap();
        let rx = spawn_running(&mut k, &mut pool, 30);
        assert_eq!(port_recv(&mut k, id), Ok(Completion::Pending));
        assert_eq!(k.pcb(rx).state(), ProcState::Wait);

        let _tx = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(
            port_send(&mut k, id, Message(7)),
            Ok(Completion::ok())
        );
        // The higher-priority receiver preempted the sender and saw the
        // message.
        assert_eq!(k.current(), rx);
        assert_eq!(k.pcb(rx).save().syscall_return(), 7);
    }

    #[test]
    fn delete_releases_blocked_receivers() {
        let mut k = Kernel::new();
        let mut pool = TestPool::new();
        let id = port_create(&mut k, "doomed").unwrap();
        let rx = spawn_running(&mut k, &mut pool, 10);
        assert_eq!(port_recv(&mut k, id), Ok(Completion::Pending));
        // rx parked; null (the owner) deletes.
        assert_eq!(k.current(), Pid::NULL);
        port_delete(&mut k, id).unwrap();
        assert_eq!(k.pcb(rx).save().syscall_return(), SYSERR);
        assert_eq!(port_count(&k, id), Err(KernelError::BadId));
    }
}
