//! # Synchronization Primitives
//!
//! The blocking primitives of the kernel (mutex and counting semaphore) and
//! the interrupt-safe critical section used to guard all shared kernel
//! state.
//!
//! The structs here hold only the primitive's own bookkeeping: lock/count
//! state and a bounded FIFO queue of blocked task slot indices. The task
//! state transitions that go with blocking and waking live in the scheduler,
//! which owns the task table.
//!
//! All mutations happen inside critical sections or trap handlers, which on
//! the single-core target serialize against each other by construction, so
//! no finer-grained locking exists anywhere in the kernel.

use crate::config::{MUTEX_QUEUE_LEN, SEMAPHORE_QUEUE_LEN};

/// Execute a closure within a critical section.
///
/// On the bare-metal target this masks interrupts for the duration
/// (`cortex-m`'s single-core critical-section implementation); on a host
/// build the std implementation serializes through a process-wide lock.
/// Keep the enclosed work short.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(critical_section::CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

// ---------------------------------------------------------------------------
// Bounded FIFO wait queue
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO of blocked task slot indices.
///
/// `push` on a full queue reports failure and the primitive leaves the task
/// blocked with no queue entry — a deliberate capacity assumption, not an
/// error path. `remove` exists for the kill reclamation path.
#[derive(Debug, Clone, Copy)]
pub struct WaitQueue<const N: usize> {
    slots: [u8; N],
    len: usize,
}

impl<const N: usize> WaitQueue<N> {
    pub const EMPTY: WaitQueue<N> = WaitQueue {
        slots: [0; N],
        len: 0,
    };

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a waiter. Returns false if the queue is full.
    pub fn push(&mut self, task: u8) -> bool {
        if self.len == N {
            log::warn!("wait queue full, task {task} blocked without a slot");
            return false;
        }
        self.slots[self.len] = task;
        self.len += 1;
        true
    }

    /// Pop the earliest-blocked waiter.
    pub fn pop_front(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let head = self.slots[0];
        self.slots.copy_within(1..self.len, 0);
        self.len -= 1;
        Some(head)
    }

    /// Drop `task` from the queue wherever it sits, preserving FIFO order
    /// of the others. Returns whether it was present.
    pub fn remove(&mut self, task: u8) -> bool {
        match self.slots[..self.len].iter().position(|&t| t == task) {
            Some(at) => {
                self.slots.copy_within(at + 1..self.len, at);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Queued waiters in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots[..self.len].iter().copied()
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Binary, owned lock. If `locked` is false the queue is empty and there is
/// no owner; if true, `owner` names exactly one task slot.
#[derive(Debug, Clone, Copy)]
pub struct Mutex {
    pub locked: bool,
    pub owner: Option<u8>,
    pub queue: WaitQueue<MUTEX_QUEUE_LEN>,
}

impl Mutex {
    pub const INIT: Mutex = Mutex {
        locked: false,
        owner: None,
        queue: WaitQueue::EMPTY,
    };

    /// Non-blocking acquisition attempt by task slot `task`.
    pub fn try_lock(&mut self, task: u8) -> bool {
        if self.locked {
            return false;
        }
        self.locked = true;
        self.owner = Some(task);
        true
    }

    /// Unlock protocol: hand the lock to the earliest waiter without a
    /// release/re-acquire window, or drop it entirely if nobody waits.
    /// Returns the new owner, whom the caller must mark Ready.
    pub fn release_to_next(&mut self) -> Option<u8> {
        match self.queue.pop_front() {
            Some(next) => {
                self.owner = Some(next);
                Some(next)
            }
            None => {
                self.locked = false;
                self.owner = None;
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Counting semaphore
// ---------------------------------------------------------------------------

/// Counting semaphore. Invariant: `count > 0` implies the queue is empty.
#[derive(Debug, Clone, Copy)]
pub struct Semaphore {
    pub count: u32,
    pub queue: WaitQueue<SEMAPHORE_QUEUE_LEN>,
}

impl Semaphore {
    pub const INIT: Semaphore = Semaphore {
        count: 0,
        queue: WaitQueue::EMPTY,
    };

    /// Non-blocking wait: take one unit if available.
    pub fn try_wait(&mut self) -> bool {
        if self.count > 0 {
            self.count -= 1;
            true
        } else {
            false
        }
    }

    /// Post protocol: a queued waiter inherits the unit directly (count is
    /// not incremented), otherwise the unit is banked. Returns the waiter,
    /// whom the caller must mark Ready.
    pub fn post(&mut self) -> Option<u8> {
        match self.queue.pop_front() {
            Some(next) => Some(next),
            None => {
                self.count += 1;
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_queue_is_fifo_and_bounded() {
        let mut q: WaitQueue<2> = WaitQueue::EMPTY;
        assert!(q.push(3));
        assert!(q.push(7));
        assert!(!q.push(9)); // full, silently rejected
        assert_eq!(q.pop_front(), Some(3));
        assert_eq!(q.pop_front(), Some(7));
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn wait_queue_remove_preserves_order() {
        let mut q: WaitQueue<4> = WaitQueue::EMPTY;
        for t in [1, 2, 3, 4] {
            q.push(t);
        }
        assert!(q.remove(2));
        assert!(!q.remove(2));
        assert_eq!(q.pop_front(), Some(1));
        assert_eq!(q.pop_front(), Some(3));
        assert_eq!(q.pop_front(), Some(4));
    }

    #[test]
    fn mutex_hands_off_in_fifo_order() {
        let mut m = Mutex::INIT;
        assert!(m.try_lock(0));
        assert!(!m.try_lock(1));
        m.queue.push(1);
        m.queue.push(2);

        // Ownership transfers directly; the lock never opens in between.
        assert_eq!(m.release_to_next(), Some(1));
        assert!(m.locked);
        assert_eq!(m.owner, Some(1));

        assert_eq!(m.release_to_next(), Some(2));
        assert_eq!(m.release_to_next(), None);
        assert!(!m.locked);
        assert_eq!(m.owner, None);
    }

    #[test]
    fn semaphore_conserves_units_across_handoff() {
        let mut s = Semaphore::INIT;
        s.count = 1;

        assert!(s.try_wait());
        assert!(!s.try_wait()); // would block

        s.queue.push(4);
        // A post into a non-empty queue transfers the unit, count stays 0.
        assert_eq!(s.post(), Some(4));
        assert_eq!(s.count, 0);

        // A post with nobody waiting banks the unit.
        assert_eq!(s.post(), None);
        assert_eq!(s.count, 1);
    }
}
