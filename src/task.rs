//! # Task Control Block
//!
//! Defines the task model for WardOS. Each task is an independent unit of
//! execution with its own heap-allocated stack, a static priority, and an
//! MPU access mask describing exactly the memory windows it may touch.
//!
//! Tasks are identified externally by the address of their entry function
//! (`TaskId`), never by their slot index: slot indices are reused after a
//! kill, entry addresses are not.

use crate::config::TASK_NAME_LEN;
use crate::mm::AccessMask;

/// Task entry point. Tasks never return; a task that wants to stop must be
/// killed through the kernel API.
pub type TaskEntry = extern "C" fn() -> !;

/// Stable task identity: the address of the task's entry function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(usize);

impl TaskId {
    /// Derive the identity of a task from its entry function.
    #[inline]
    pub fn of(entry: TaskEntry) -> Self {
        TaskId(entry as usize)
    }

    /// Raw identity value, for diagnostics.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Rebuild an identity from its raw value, as decoded from a trap
    /// argument.
    #[inline]
    pub const fn from_raw(value: usize) -> Self {
        TaskId(value)
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///          create()              switch out/in
///   ┌─────┐      ┌───────┐ first dispatch ┌───────┐
///   │Invld│ ───► │ Unrun │ ─────────────► │ Ready │ ◄──┐
///   └─────┘      └───────┘                └───┬───┘    │
///                                 sleep() /   │        │ tick expiry /
///                                 wait()  /   ▼        │ post() / unlock()
///                                 lock()  ┌────────────┴──┐
///                                         │ Delayed /     │
///                                         │ BlockedSem /  │
///                                         │ BlockedMutex  │
///                                         └───────────────┘
///   any state ──kill()──► Killed (terminal until restart())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Empty slot: no task was ever created here, or the record was cleared.
    Invalid,
    /// Created but never dispatched. The saved context holds only the
    /// hardware exception frame; no software-saved registers exist yet.
    Unrun,
    /// Has run before and can be resumed at any time.
    Ready,
    /// Sleeping; `ticks` holds the remaining delay.
    Delayed,
    /// Blocked on a semaphore wait queue.
    BlockedSemaphore,
    /// Blocked on a mutex wait queue.
    BlockedMutex,
    /// Killed. The slot keeps its identity so the task can be restarted.
    Killed,
}

// ---------------------------------------------------------------------------
// Diagnostic name
// ---------------------------------------------------------------------------

/// Fixed-size, NUL-padded task label used by the diagnostic dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskName([u8; TASK_NAME_LEN]);

impl TaskName {
    pub const EMPTY: TaskName = TaskName([0; TASK_NAME_LEN]);

    /// Build a name from a string slice, truncating to `TASK_NAME_LEN`.
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; TASK_NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(TASK_NAME_LEN);
        buf[..n].copy_from_slice(&bytes[..n]);
        TaskName(buf)
    }

    /// The label as a string slice, without the NUL padding.
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_LEN);
        // Only ever written from a &str in new(), so this cannot fail.
        core::str::from_utf8(&self.0[..end]).unwrap_or("?")
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block — one fixed-size record per task slot.
///
/// TCBs live in the scheduler's static array; all cross-references between
/// kernel objects use slot indices, and ownership of a slot transitions
/// through `state` alone.
#[derive(Debug, Clone, Copy)]
pub struct Tcb {
    /// Current state in the task state machine.
    pub state: TaskState,

    /// Entry function. `None` only while the slot is `Invalid`. Doubles as
    /// the task identity and as the restart target.
    pub entry: Option<TaskEntry>,

    /// Saved process stack pointer. Valid only while the task is suspended;
    /// while the task is executing this is stale by definition.
    pub sp: usize,

    /// Base address of the stack allocation inside the block heap.
    pub stack_base: usize,

    /// Originally requested stack size, kept so `restart` can rebuild the
    /// allocation from scratch.
    pub stack_bytes: usize,

    /// Static priority, 0 = highest.
    pub priority: u8,

    /// Effective priority used by the scheduler. Differs from `priority`
    /// only while a priority-inheritance boost is active.
    pub current_priority: u8,

    /// Remaining sleep ticks. Meaningful only in state `Delayed`.
    pub ticks: u32,

    /// MPU subregion-open bits for this task. Always equals the allocator's
    /// current grant for this task, and is applied at every dispatch.
    pub srd: AccessMask,

    /// Diagnostic label.
    pub name: TaskName,

    /// Index of the mutex blocking this task. Valid only in `BlockedMutex`.
    pub blocking_mutex: Option<u8>,

    /// Index of the semaphore blocking this task. Valid only in
    /// `BlockedSemaphore`.
    pub blocking_semaphore: Option<u8>,
}

impl Tcb {
    /// An empty (Invalid) slot. Used to initialize the static table.
    pub const EMPTY: Tcb = Tcb {
        state: TaskState::Invalid,
        entry: None,
        sp: 0,
        stack_base: 0,
        stack_bytes: 0,
        priority: 0,
        current_priority: 0,
        ticks: 0,
        srd: AccessMask::NONE,
        name: TaskName::EMPTY,
        blocking_mutex: None,
        blocking_semaphore: None,
    };

    /// The task's identity, if the slot is occupied.
    #[inline]
    pub fn id(&self) -> Option<TaskId> {
        self.entry.map(TaskId::of)
    }

    /// Whether the scheduler may pick this task.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Unrun)
    }

    /// Whether the slot holds a task record (in any state but `Invalid`).
    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.state != TaskState::Invalid
    }
}

// ---------------------------------------------------------------------------
// Diagnostic snapshot
// ---------------------------------------------------------------------------

/// Read-only copy of one task record, as reported by the `ps`-style dump.
/// Not used by any scheduling logic.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub name: TaskName,
    pub id: TaskId,
    pub state: TaskState,
    pub sp: usize,
    pub mask: AccessMask,
    pub priority: u8,
    pub current_priority: u8,
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop_entry() -> ! {
        loop {
            core::hint::black_box(0u32);
        }
    }

    #[test]
    fn empty_slot_is_invalid_and_unrunnable() {
        let tcb = Tcb::EMPTY;
        assert_eq!(tcb.state, TaskState::Invalid);
        assert!(!tcb.is_occupied());
        assert!(!tcb.is_runnable());
        assert!(tcb.id().is_none());
    }

    #[test]
    fn identity_follows_entry_function() {
        let mut tcb = Tcb::EMPTY;
        tcb.entry = Some(noop_entry);
        tcb.state = TaskState::Unrun;
        assert_eq!(tcb.id(), Some(TaskId::of(noop_entry)));
        assert!(tcb.is_runnable());
    }

    #[test]
    fn name_truncates_to_fixed_width() {
        let name = TaskName::new("a-task-name-well-beyond-the-limit");
        assert_eq!(name.as_str().len(), TASK_NAME_LEN);
        assert_eq!(name.as_str(), "a-task-name-well");

        let short = TaskName::new("Idle");
        assert_eq!(short.as_str(), "Idle");
    }

    #[test]
    fn only_ready_and_unrun_are_runnable() {
        let mut tcb = Tcb::EMPTY;
        tcb.entry = Some(noop_entry);
        for (state, runnable) in [
            (TaskState::Unrun, true),
            (TaskState::Ready, true),
            (TaskState::Delayed, false),
            (TaskState::BlockedSemaphore, false),
            (TaskState::BlockedMutex, false),
            (TaskState::Killed, false),
        ] {
            tcb.state = state;
            assert_eq!(tcb.is_runnable(), runnable, "{state:?}");
        }
    }
}
