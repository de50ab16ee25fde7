// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queues of process ids.
//!
//! All kernel queues (the ready list, the sleep delta list, and every
//! semaphore's wait queue) share one fixed arena of doubly-linked entries.
//! The first `NPROC` entries are the link nodes for the processes
//! themselves, one per PID; the remaining entries are head/tail sentinel
//! pairs handed out to queues at boot.
//!
//! Giving each PID exactly one link node is what makes "a PCB is in at
//! most one queue at a time" structural: linking a process into a second
//! queue is not a subtle corruption, it is an immediate [`QueueError`].
//!
//! Three insertion disciplines share the node format:
//!
//! - plain FIFO (`enqueue`), key unused;
//! - descending key order (`insert`), used with priorities for the ready
//!   list, ties appended after their equals so arrival order survives;
//! - delta order (`insertd`), where each entry's key is the ticks beyond
//!   its predecessor and the prefix sum is the absolute time to wake.

use abi::{Pid, NPROC, NSEM};

/// Entries in the arena: one per PID, plus a sentinel pair per queue
/// (ready list, sleep list, and one wait queue per semaphore slot).
pub(crate) const NQENT: usize = NPROC + 2 * (NSEM + 2);

/// Null link.
const NIL: u16 = u16::MAX;

#[derive(Copy, Clone, Debug)]
struct QEntry {
    key: i32,
    next: u16,
    prev: u16,
}

const UNLINKED: QEntry = QEntry {
    key: 0,
    next: NIL,
    prev: NIL,
};

/// Names a queue. Internally this is the index of the queue's head
/// sentinel; the tail sentinel is always the next entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Qid(u16);

/// Structural misuse of the arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueueError {
    /// The process is already linked into some queue.
    Linked,
    /// The process is not in the queue it was claimed to be in.
    NotLinked,
}

impl From<QueueError> for abi::KernelError {
    fn from(_: QueueError) -> Self {
        abi::KernelError::BadState
    }
}

pub struct QueueTable {
    entries: [QEntry; NQENT],
    next_sentinel: u16,
}

impl QueueTable {
    pub fn new() -> Self {
        Self {
            entries: [UNLINKED; NQENT],
            next_sentinel: NPROC as u16,
        }
    }

    /// Allocates a queue from the sentinel region. Queues live forever;
    /// there is no corresponding free operation.
    pub fn new_queue(&mut self) -> Qid {
        let head = self.next_sentinel;
        let tail = head + 1;
        uassert!(usize::from(tail) < NQENT);
        self.next_sentinel += 2;

        self.entries[usize::from(head)] = QEntry {
            key: i32::MAX,
            next: tail,
            prev: NIL,
        };
        self.entries[usize::from(tail)] = QEntry {
            key: i32::MIN,
            next: NIL,
            prev: head,
        };
        Qid(head)
    }

    fn tail(q: Qid) -> u16 {
        q.0 + 1
    }

    /// Checks whether `pid`'s link node is threaded into any queue.
    pub fn is_linked(&self, pid: Pid) -> bool {
        self.entries[pid.index()].next != NIL
    }

    fn link_before(&mut self, node: u16, at: u16) {
        let prev = self.entries[usize::from(at)].prev;
        self.entries[usize::from(node)].next = at;
        self.entries[usize::from(node)].prev = prev;
        self.entries[usize::from(prev)].next = node;
        self.entries[usize::from(at)].prev = node;
    }

    fn unlink(&mut self, node: u16) -> i32 {
        let e = self.entries[usize::from(node)];
        self.entries[usize::from(e.prev)].next = e.next;
        self.entries[usize::from(e.next)].prev = e.prev;
        self.entries[usize::from(node)] = UNLINKED;
        e.key
    }

    fn claim(&mut self, pid: Pid) -> Result<u16, QueueError> {
        uassert!(pid.is_in_range());
        if self.is_linked(pid) {
            return Err(QueueError::Linked);
        }
        Ok(pid.0)
    }

    /// Appends `pid` at the tail of `q`.
    pub fn enqueue(&mut self, pid: Pid, q: Qid) -> Result<(), QueueError> {
        let node = self.claim(pid)?;
        self.link_before(node, Self::tail(q));
        Ok(())
    }

    /// Removes and returns the process at the head of `q`.
    pub fn dequeue(&mut self, q: Qid) -> Option<Pid> {
        let first = self.entries[usize::from(q.0)].next;
        if first == Self::tail(q) {
            return None;
        }
        self.unlink(first);
        Some(Pid(first))
    }

    /// The process at the head of `q`, if any.
    pub fn first(&self, q: Qid) -> Option<Pid> {
        let first = self.entries[usize::from(q.0)].next;
        if first == Self::tail(q) {
            None
        } else {
            Some(Pid(first))
        }
    }

    pub fn is_empty(&self, q: Qid) -> bool {
        self.first(q).is_none()
    }

    pub fn len(&self, q: Qid) -> usize {
        self.iter(q).count()
    }

    /// Inserts `pid` into `q` in descending `key` order. Among equal
    /// keys, the new entry goes last, so FIFO order holds within a key.
    pub fn insert(
        &mut self,
        pid: Pid,
        q: Qid,
        key: i32,
    ) -> Result<(), QueueError> {
        let node = self.claim(pid)?;
        let tail = Self::tail(q);
        let mut at = self.entries[usize::from(q.0)].next;
        while at != tail && self.entries[usize::from(at)].key >= key {
            at = self.entries[usize::from(at)].next;
        }
        self.link_before(node, at);
        self.entries[usize::from(node)].key = key;
        Ok(())
    }

    /// Inserts `pid` into the delta list `q` with `delta` ticks beyond
    /// the list's current contents that precede it. The entry it lands in
    /// front of has its own delta reduced, so every absolute expiry after
    /// the insertion point is preserved.
    pub fn insertd(
        &mut self,
        pid: Pid,
        q: Qid,
        delta: i32,
    ) -> Result<(), QueueError> {
        uassert!(delta >= 0);
        let node = self.claim(pid)?;
        let tail = Self::tail(q);
        let mut rem = delta;
        let mut at = self.entries[usize::from(q.0)].next;
        while at != tail && rem >= self.entries[usize::from(at)].key {
            rem -= self.entries[usize::from(at)].key;
            at = self.entries[usize::from(at)].next;
        }
        if at != tail {
            self.entries[usize::from(at)].key -= rem;
        }
        self.link_before(node, at);
        self.entries[usize::from(node)].key = rem;
        Ok(())
    }

    /// Removes `pid` from `q`, returning its key. Walks the queue, so a
    /// claim that `pid` is in some *other* queue is caught and reported.
    pub fn remove(&mut self, pid: Pid, q: Qid) -> Result<i32, QueueError> {
        let tail = Self::tail(q);
        let mut at = self.entries[usize::from(q.0)].next;
        while at != tail {
            if at == pid.0 {
                return Ok(self.unlink(at));
            }
            at = self.entries[usize::from(at)].next;
        }
        Err(QueueError::NotLinked)
    }

    /// Removes `pid` from the delta list `q`. The removed entry's delta
    /// is folded into its successor, keeping subsequent absolute expiry
    /// times correct.
    pub fn remove_delta(
        &mut self,
        pid: Pid,
        q: Qid,
    ) -> Result<i32, QueueError> {
        let tail = Self::tail(q);
        let mut at = self.entries[usize::from(q.0)].next;
        while at != tail {
            if at == pid.0 {
                let succ = self.entries[usize::from(at)].next;
                let key = self.unlink(at);
                if succ != tail {
                    self.entries[usize::from(succ)].key += key;
                }
                return Ok(key);
            }
            at = self.entries[usize::from(at)].next;
        }
        Err(QueueError::NotLinked)
    }

    /// The key stored in `pid`'s link node.
    pub fn key(&self, pid: Pid) -> i32 {
        self.entries[pid.index()].key
    }

    /// Adjusts the key stored in `pid`'s link node. The tick handler uses
    /// this to age the head of the sleep delta list.
    pub fn add_key(&mut self, pid: Pid, dk: i32) {
        self.entries[pid.index()].key += dk;
    }

    /// Walks `q` head to tail.
    pub fn iter(&self, q: Qid) -> impl Iterator<Item = Pid> + '_ {
        let tail = Self::tail(q);
        let mut at = self.entries[usize::from(q.0)].next;
        core::iter::from_fn(move || {
            if at == tail {
                None
            } else {
                let pid = Pid(at);
                at = self.entries[usize::from(at)].next;
                Some(pid)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uut() -> (QueueTable, Qid) {
        let mut t = QueueTable::new();
        let q = t.new_queue();
        (t, q)
    }

    fn drain(t: &mut QueueTable, q: Qid) -> Vec<u16> {
        let mut out = vec![];
        while let Some(p) = t.dequeue(q) {
            out.push(p.0);
        }
        out
    }

    #[test]
    fn new_queue_is_empty() {
        let (t, q) = uut();
        assert!(t.is_empty(q));
        assert_eq!(t.first(q), None);
        assert_eq!(t.len(q), 0);
    }

    #[test]
    fn enqueue_is_fifo() {
        let (mut t, q) = uut();
        for pid in [3, 1, 4, 1 + 1, 5] {
            t.enqueue(Pid(pid), q).unwrap();
        }
        assert_eq!(t.len(q), 5);
        assert_eq!(drain(&mut t, q), [3, 1, 4, 2, 5]);
        assert!(t.is_empty(q));
    }

    #[test]
    fn double_link_is_refused() {
        let (mut t, q) = uut();
        let q2 = t.new_queue();
        t.enqueue(Pid(7), q).unwrap();
        assert_eq!(t.enqueue(Pid(7), q), Err(QueueError::Linked));
        // Not even into a different queue.
        assert_eq!(t.insert(Pid(7), q2, 50), Err(QueueError::Linked));
        // After removal it's allowed again.
        t.dequeue(q);
        t.enqueue(Pid(7), q2).unwrap();
    }

    #[test]
    fn insert_orders_descending_with_fifo_ties() {
        let (mut t, q) = uut();
        t.insert(Pid(1), q, 30).unwrap();
        t.insert(Pid(2), q, 50).unwrap();
        t.insert(Pid(3), q, 30).unwrap();
        t.insert(Pid(4), q, 40).unwrap();
        // 50 first, then 40, then the two 30s in arrival order.
        assert_eq!(drain(&mut t, q), [2, 4, 1, 3]);
    }

    #[test]
    fn insertd_builds_the_classic_delta_shape() {
        let (mut t, q) = uut();
        // sleep(5), sleep(3), sleep(7) issued in that order with no
        // intervening ticks.
        t.insertd(Pid(1), q, 5).unwrap();
        t.insertd(Pid(2), q, 3).unwrap();
        t.insertd(Pid(3), q, 7).unwrap();
        let order: Vec<_> = t.iter(q).map(|p| (p.0, t.key(p))).collect();
        assert_eq!(order, [(2, 3), (1, 2), (3, 2)]);
    }

    #[test]
    fn insertd_ties_preserve_arrival_order() {
        let (mut t, q) = uut();
        t.insertd(Pid(1), q, 4).unwrap();
        t.insertd(Pid(2), q, 4).unwrap();
        let order: Vec<_> = t.iter(q).map(|p| (p.0, t.key(p))).collect();
        assert_eq!(order, [(1, 4), (2, 0)]);
    }

    #[test]
    fn remove_delta_repairs_the_successor() {
        let (mut t, q) = uut();
        t.insertd(Pid(1), q, 5).unwrap();
        t.insertd(Pid(2), q, 3).unwrap();
        t.insertd(Pid(3), q, 7).unwrap();
        // Pull P1 (delta 2) out of the middle; P3's delta must absorb it
        // so its absolute expiry stays at 7.
        assert_eq!(t.remove_delta(Pid(1), q), Ok(2));
        let order: Vec<_> = t.iter(q).map(|p| (p.0, t.key(p))).collect();
        assert_eq!(order, [(2, 3), (3, 4)]);
    }

    #[test]
    fn remove_validates_membership() {
        let (mut t, q) = uut();
        let q2 = t.new_queue();
        t.enqueue(Pid(1), q).unwrap();
        // P1 is linked, but not into q2; the claim is rejected.
        assert_eq!(t.remove(Pid(1), q2), Err(QueueError::NotLinked));
        assert_eq!(t.remove(Pid(1), q), Ok(0));
        assert!(!t.is_linked(Pid(1)));
    }
}
