//! # Scheduler
//!
//! The kernel core: the task table and every operation that mutates it.
//! One `Scheduler` value owns the TCB array, the mutexes and semaphores,
//! and the block heap, so all cross-references between kernel objects are
//! plain slot indices and the borrow checker sees a single owner.
//!
//! ## Scheduling disciplines
//!
//! - **Priority** (default): linear scan of the whole table; the runnable
//!   task with the numerically lowest `current_priority` wins, lowest slot
//!   index on ties.
//! - **Round-robin**: circular scan starting just after the current slot,
//!   wrapping at the table bound, first runnable task wins.
//!
//! By convention at least one idle task at the lowest priority is always
//! created and never exits, so a scheduling decision always finds a task.
//!
//! ## Concurrency model
//!
//! Single core, no parallelism. Everything here runs either inside a trap
//! handler or inside a critical section in task context before a trap is
//! requested; the trap priority ordering guarantees handlers never nest,
//! so a woken task's Ready state is always visible before the next
//! scheduling decision.

use crate::arch;
use crate::config::{MAX_MUTEXES, MAX_SEMAPHORES, MAX_TASKS, NUM_PRIORITIES};
use crate::mm::{AccessMask, BlockHeap};
use crate::sync::{Mutex, Semaphore};
use crate::task::{TaskEntry, TaskId, TaskInfo, TaskName, TaskState, Tcb};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure modes reported to kernel API callers. Capacity exhaustion is a
/// normal outcome, never a panic; callers are expected to check and halt
/// startup if a required task fails to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// `kernel::init()` has not run yet.
    NotInitialized,
    /// No free slot in the task table.
    TableFull,
    /// The entry function is already registered.
    DuplicateEntry,
    /// The block heap cannot satisfy the stack allocation.
    OutOfMemory,
    /// No task with that identity exists.
    NoSuchTask,
    /// Priority outside `0..NUM_PRIORITIES`.
    BadPriority,
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            KernelError::NotInitialized => "kernel not initialized",
            KernelError::TableFull => "task table full",
            KernelError::DuplicateEntry => "entry already registered",
            KernelError::OutOfMemory => "out of heap memory",
            KernelError::NoSuchTask => "no such task",
            KernelError::BadPriority => "priority out of range",
        };
        f.write_str(s)
    }
}

/// Process-wide scheduling discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Lowest `current_priority` value wins, lowest slot index on ties.
    Priority,
    /// Circular scan from just after the current slot.
    RoundRobin,
}

/// What the context-switch core needs to resume the incoming task.
#[derive(Debug, Clone, Copy)]
pub struct Dispatch {
    /// Saved stack pointer to resume from.
    pub sp: usize,
    /// True if the task has never run: its context image holds only the
    /// hardware frame, so no software-saved registers must be popped.
    pub first_run: bool,
    /// Access mask to apply strictly before the stack pointer swap.
    pub mask: AccessMask,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The kernel core. Stored as a global in `kernel.rs`; tests build local
/// instances and drive the same operations directly.
pub struct Scheduler {
    tasks: [Tcb; MAX_TASKS],
    mutexes: [Mutex; MAX_MUTEXES],
    semaphores: [Semaphore; MAX_SEMAPHORES],
    heap: BlockHeap,

    /// Slot index of the last dispatched task.
    task_current: usize,
    /// Number of occupied slots (including Killed ones), for diagnostics.
    task_count: usize,

    policy: SchedPolicy,
    preemption: bool,
    priority_inheritance: bool,

    tick_count: u64,
    needs_reschedule: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Scheduler {
            tasks: [Tcb::EMPTY; MAX_TASKS],
            mutexes: [Mutex::INIT; MAX_MUTEXES],
            semaphores: [Semaphore::INIT; MAX_SEMAPHORES],
            heap: BlockHeap::new(),
            task_current: 0,
            task_count: 0,
            policy: SchedPolicy::Priority,
            preemption: false,
            priority_inheritance: false,
            tick_count: 0,
            needs_reschedule: false,
        }
    }

    /// Clear all kernel state (one-time bring-up).
    pub fn reset(&mut self) {
        *self = Scheduler::new();
    }

    // -- process-wide switches ------------------------------------------------

    pub fn set_policy(&mut self, policy: SchedPolicy) {
        self.policy = policy;
    }

    pub fn set_preemption(&mut self, on: bool) {
        self.preemption = on;
    }

    pub fn set_priority_inheritance(&mut self, on: bool) {
        self.priority_inheritance = on;
    }

    // -- primitive bring-up ---------------------------------------------------

    /// Initialize a mutex. Valid only at system start; returns false for a
    /// bad index.
    pub fn init_mutex(&mut self, index: usize) -> bool {
        let ok = index < MAX_MUTEXES;
        if ok {
            self.mutexes[index] = Mutex::INIT;
        }
        ok
    }

    /// Initialize a counting semaphore with `count` initial units.
    pub fn init_semaphore(&mut self, index: usize, count: u32) -> bool {
        let ok = index < MAX_SEMAPHORES;
        if ok {
            self.semaphores[index] = Semaphore::INIT;
            self.semaphores[index].count = count;
        }
        ok
    }

    // -- task lifecycle -------------------------------------------------------

    /// Register a task. Fails without side effects if the table is full,
    /// the entry is already registered, or the stack allocation fails.
    pub fn create_thread(
        &mut self,
        entry: TaskEntry,
        name: &str,
        priority: u8,
        stack_bytes: usize,
    ) -> Result<usize, KernelError> {
        if priority >= NUM_PRIORITIES {
            return Err(KernelError::BadPriority);
        }
        let id = TaskId::of(entry);
        if self.find_slot(id).is_some() {
            return Err(KernelError::DuplicateEntry);
        }
        let slot = self
            .tasks
            .iter()
            .position(|t| !t.is_occupied())
            .ok_or(KernelError::TableFull)?;

        let alloc = self
            .heap
            .allocate(id, stack_bytes)
            .ok_or(KernelError::OutOfMemory)?;
        let sp = arch::seed_stack(alloc.base + alloc.size_in_bytes, entry);

        self.tasks[slot] = Tcb {
            state: TaskState::Unrun,
            entry: Some(entry),
            sp,
            stack_base: alloc.base,
            stack_bytes,
            priority,
            current_priority: priority,
            ticks: 0,
            srd: alloc.mask,
            name: TaskName::new(name),
            blocking_mutex: None,
            blocking_semaphore: None,
        };
        self.task_count += 1;
        log::debug!("created task '{name}' in slot {slot}, stack at {:#010x}", alloc.base);
        Ok(slot)
    }

    /// Kill a task: release its heap blocks, purge it from every wait
    /// queue, hand off any mutex it owns, and mark the slot Killed. The
    /// identity stays in the slot so the task can be restarted.
    pub fn kill_thread(&mut self, id: TaskId) -> Result<(), KernelError> {
        let slot = self.find_slot(id).ok_or(KernelError::NoSuchTask)?;
        if self.tasks[slot].state == TaskState::Killed {
            return Ok(());
        }
        self.reclaim(slot);
        self.tasks[slot].state = TaskState::Killed;
        if slot == self.task_current {
            self.needs_reschedule = true;
        }
        log::debug!("killed task '{}' in slot {slot}", self.tasks[slot].name.as_str());
        Ok(())
    }

    /// Restart a task in its existing slot as if freshly created: fresh
    /// stack allocation, fresh initial context, static priority restored.
    pub fn restart_thread(&mut self, id: TaskId) -> Result<(), KernelError> {
        let slot = self.find_slot(id).ok_or(KernelError::NoSuchTask)?;
        if self.tasks[slot].state != TaskState::Killed {
            // Live task: tear down its queue entries and grants first.
            self.reclaim(slot);
        }
        let Some(entry) = self.tasks[slot].entry else {
            return Err(KernelError::NoSuchTask);
        };
        let alloc = self
            .heap
            .allocate(id, self.tasks[slot].stack_bytes)
            .ok_or(KernelError::OutOfMemory)?;
        let tcb = &mut self.tasks[slot];
        tcb.sp = arch::seed_stack(alloc.base + alloc.size_in_bytes, entry);
        tcb.stack_base = alloc.base;
        tcb.srd = alloc.mask;
        tcb.state = TaskState::Unrun;
        tcb.current_priority = tcb.priority;
        tcb.ticks = 0;
        if slot == self.task_current {
            // The running task just discarded its own context; it must not
            // resume past this point.
            self.needs_reschedule = true;
        }
        log::debug!("restarted task '{}' in slot {slot}", tcb.name.as_str());
        Ok(())
    }

    /// Reprioritize a live task. Takes effect at the next scheduling
    /// decision, not immediately.
    pub fn set_thread_priority(&mut self, id: TaskId, priority: u8) -> Result<(), KernelError> {
        if priority >= NUM_PRIORITIES {
            return Err(KernelError::BadPriority);
        }
        let slot = self.find_slot(id).ok_or(KernelError::NoSuchTask)?;
        self.tasks[slot].priority = priority;
        self.tasks[slot].current_priority = priority;
        // The new static priority feeds back into any active boosts.
        self.refresh_inherited(slot);
        if let Some(mi) = self.tasks[slot].blocking_mutex {
            if let Some(owner) = self.mutexes[mi as usize].owner {
                self.refresh_inherited(owner as usize);
            }
        }
        Ok(())
    }

    /// Full reclamation shared by kill and restart-of-a-live-task.
    fn reclaim(&mut self, slot: usize) {
        let Some(id) = self.tasks[slot].id() else {
            return;
        };
        self.heap.free_all(id);
        self.tasks[slot].srd = AccessMask::NONE;

        for mi in 0..MAX_MUTEXES {
            if self.mutexes[mi].queue.remove(slot as u8) {
                if let Some(owner) = self.mutexes[mi].owner {
                    self.refresh_inherited(owner as usize);
                }
            }
        }
        for sem in &mut self.semaphores {
            sem.queue.remove(slot as u8);
        }
        for mi in 0..MAX_MUTEXES {
            if self.mutexes[mi].owner == Some(slot as u8) {
                self.unlock_slot(mi, slot);
            }
        }
        let tcb = &mut self.tasks[slot];
        tcb.blocking_mutex = None;
        tcb.blocking_semaphore = None;
        tcb.ticks = 0;
    }

    // -- scheduling -----------------------------------------------------------

    /// Select the next task to run under the active discipline and make it
    /// current. Returns `None` only if no task is runnable, which the idle
    /// task convention rules out in a correctly configured system.
    pub fn schedule(&mut self) -> Option<usize> {
        self.needs_reschedule = false;
        match self.policy {
            SchedPolicy::Priority => {
                let mut selected = None;
                let mut best = NUM_PRIORITIES;
                for (i, t) in self.tasks.iter().enumerate() {
                    if t.is_runnable() && t.current_priority < best {
                        best = t.current_priority;
                        selected = Some(i);
                    }
                }
                if let Some(i) = selected {
                    self.task_current = i;
                }
                selected
            }
            SchedPolicy::RoundRobin => {
                for offset in 1..=MAX_TASKS {
                    let i = (self.task_current + offset) % MAX_TASKS;
                    if self.tasks[i].is_runnable() {
                        self.task_current = i;
                        return Some(i);
                    }
                }
                None
            }
        }
    }

    /// Advance the system timer by one tick: each Delayed task's counter
    /// is decremented exactly once, and a task whose counter reaches zero
    /// becomes Ready. With preemption enabled every tick also requests a
    /// reschedule.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        for t in &mut self.tasks {
            if t.state == TaskState::Delayed && t.ticks > 0 {
                t.ticks -= 1;
                if t.ticks == 0 {
                    t.state = TaskState::Ready;
                }
            }
        }
        if self.preemption {
            self.needs_reschedule = true;
        }
    }

    // -- context-switch bookkeeping --------------------------------------------

    /// Record the outgoing task's saved stack pointer. An `Unrun` current
    /// task was reseeded by a restart while running; its fresh context must
    /// survive the switch, so nothing is recorded for it.
    pub fn switch_out(&mut self, sp: usize) {
        let tcb = &mut self.tasks[self.task_current];
        if tcb.state == TaskState::Unrun {
            return;
        }
        tcb.sp = sp;
    }

    /// Run the scheduler and describe the incoming task. The caller must
    /// apply `mask` before resuming at `sp`, and must only pop the
    /// software-saved register frame when `first_run` is false. Dispatching
    /// an `Unrun` task promotes it to `Ready`: from here on its context
    /// image is whatever the switch path saves.
    pub fn switch_in(&mut self) -> Option<Dispatch> {
        let next = self.schedule()?;
        let tcb = &mut self.tasks[next];
        let first_run = tcb.state == TaskState::Unrun;
        if first_run {
            tcb.state = TaskState::Ready;
        }
        log::trace!("dispatch slot {next} '{}'", tcb.name.as_str());
        Some(Dispatch {
            sp: tcb.sp,
            first_run,
            mask: tcb.srd,
        })
    }

    // -- suspension paths -----------------------------------------------------

    /// Put the current task to sleep for `ticks` milliseconds. A zero
    /// delay leaves the task runnable — it is a plain yield.
    pub fn sleep_current(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        let tcb = &mut self.tasks[self.task_current];
        tcb.ticks = ticks;
        tcb.state = TaskState::Delayed;
    }

    /// Semaphore wait for the current task. Returns true if the task
    /// blocked and a context switch must be requested.
    pub fn wait_current(&mut self, index: usize) -> bool {
        if index >= MAX_SEMAPHORES {
            return false;
        }
        if self.semaphores[index].try_wait() {
            return false;
        }
        let cur = self.task_current;
        self.tasks[cur].state = TaskState::BlockedSemaphore;
        self.tasks[cur].blocking_semaphore = Some(index as u8);
        self.semaphores[index].queue.push(cur as u8);
        true
    }

    /// Semaphore post. A queued waiter inherits the unit directly and
    /// becomes Ready; it runs at the next scheduling decision, not now.
    pub fn post(&mut self, index: usize) {
        if index >= MAX_SEMAPHORES {
            return;
        }
        if let Some(next) = self.semaphores[index].post() {
            self.tasks[next as usize].state = TaskState::Ready;
            self.tasks[next as usize].blocking_semaphore = None;
        }
    }

    /// Mutex acquisition for the current task. Returns true if the task
    /// blocked and a context switch must be requested.
    pub fn lock_current(&mut self, index: usize) -> bool {
        if index >= MAX_MUTEXES {
            return false;
        }
        let cur = self.task_current;
        if self.mutexes[index].try_lock(cur as u8) {
            return false;
        }
        self.tasks[cur].state = TaskState::BlockedMutex;
        self.tasks[cur].blocking_mutex = Some(index as u8);
        self.mutexes[index].queue.push(cur as u8);
        if let Some(owner) = self.mutexes[index].owner {
            self.refresh_inherited(owner as usize);
        }
        true
    }

    /// Mutex release by the current task. Only the owner may release;
    /// anyone else is silently ignored (fail-safe no-op policy).
    pub fn unlock_current(&mut self, index: usize) {
        if index >= MAX_MUTEXES {
            return;
        }
        self.unlock_slot(index, self.task_current);
    }

    fn unlock_slot(&mut self, index: usize, slot: usize) {
        if self.mutexes[index].owner != Some(slot as u8) {
            log::warn!("unlock of mutex {index} by non-owner slot {slot} ignored");
            return;
        }
        let next = self.mutexes[index].release_to_next();
        // The releaser's boost, if any, ends here.
        self.refresh_inherited(slot);
        if let Some(next) = next {
            self.tasks[next as usize].state = TaskState::Ready;
            self.tasks[next as usize].blocking_mutex = None;
            self.refresh_inherited(next as usize);
        }
    }

    /// Recompute a task's effective priority under priority inheritance:
    /// the minimum (numerically) of its static priority and the effective
    /// priorities of every task queued on a mutex it owns. With the switch
    /// off this reverts the task to its static priority.
    fn refresh_inherited(&mut self, slot: usize) {
        let mut p = self.tasks[slot].priority;
        if self.priority_inheritance {
            for m in &self.mutexes {
                if m.owner == Some(slot as u8) {
                    for w in m.queue.iter() {
                        p = p.min(self.tasks[w as usize].current_priority);
                    }
                }
            }
        }
        self.tasks[slot].current_priority = p;
    }

    // -- introspection ----------------------------------------------------------

    /// Slot index of the current task.
    #[inline]
    pub fn current_task(&self) -> usize {
        self.task_current
    }

    /// Identity of the current task, if its slot is occupied.
    pub fn current_id(&self) -> Option<TaskId> {
        self.tasks[self.task_current].id()
    }

    /// Saved stack pointer of the current task (host simulation support).
    #[inline]
    pub fn current_sp(&self) -> usize {
        self.tasks[self.task_current].sp
    }

    #[inline]
    pub fn needs_reschedule(&self) -> bool {
        self.needs_reschedule
    }

    /// Number of occupied task slots.
    #[inline]
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.tick_count
    }

    /// Read-only dump of the task table for external inspection.
    pub fn snapshot(&self) -> [Option<TaskInfo>; MAX_TASKS] {
        let mut out = [None; MAX_TASKS];
        for (i, t) in self.tasks.iter().enumerate() {
            if let Some(id) = t.id() {
                out[i] = Some(TaskInfo {
                    name: t.name,
                    id,
                    state: t.state,
                    sp: t.sp,
                    mask: t.srd,
                    priority: t.priority,
                    current_priority: t.current_priority,
                });
            }
        }
        out
    }

    fn find_slot(&self, id: TaskId) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.is_occupied() && t.id() == Some(id))
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BLOCK_SIZE, MPU_REGION_SIZE, SEMAPHORE_QUEUE_LEN};

    macro_rules! task_entries {
        ($($name:ident = $tag:expr;)*) => {
            $(extern "C" fn $name() -> ! {
                loop {
                    core::hint::black_box($tag as u32);
                }
            })*
        };
    }

    task_entries! {
        idle_a = 0xA0; idle_b = 0xA1; idle_c = 0xA2;
        worker_a = 0xB0; worker_b = 0xB1; worker_c = 0xB2; worker_d = 0xB3;
        filler_0 = 0xC0; filler_1 = 0xC1; filler_2 = 0xC2; filler_3 = 0xC3;
        filler_4 = 0xC4; filler_5 = 0xC5; filler_6 = 0xC6; filler_7 = 0xC7;
        filler_8 = 0xC8;
    }

    fn with_idles() -> Scheduler {
        let mut s = Scheduler::new();
        s.create_thread(idle_a, "Idle", 7, 512).unwrap();
        s.create_thread(idle_b, "Idle2", 7, 512).unwrap();
        s.create_thread(idle_c, "Idle3", 7, 512).unwrap();
        s
    }

    #[test]
    fn priority_mode_picks_minimum_and_breaks_ties_by_index() {
        let mut s = with_idles();
        // All tied at 7: the linear scan keeps the first minimum.
        assert_eq!(s.schedule(), Some(0));
        assert_eq!(s.schedule(), Some(0));

        let w = s.create_thread(worker_a, "Worker", 2, 512).unwrap();
        assert_eq!(s.schedule(), Some(w));

        // Once the worker is no longer runnable the idles win again.
        s.sleep_current(10);
        assert_eq!(s.schedule(), Some(0));
    }

    #[test]
    fn priority_mode_uses_effective_priority() {
        let mut s = with_idles();
        let w = s.create_thread(worker_a, "Worker", 6, 512).unwrap();
        s.tasks[w].current_priority = 1; // boosted
        assert_eq!(s.schedule(), Some(w));
    }

    #[test]
    fn round_robin_visits_every_runnable_task_before_repeating() {
        let mut s = with_idles();
        s.create_thread(worker_a, "Worker", 2, 512).unwrap();
        s.set_policy(SchedPolicy::RoundRobin);

        let mut first_cycle = [0usize; 4];
        for slot in &mut first_cycle {
            *slot = s.schedule().unwrap();
        }
        let mut sorted = first_cycle;
        sorted.sort_unstable();
        assert_eq!(sorted, [0, 1, 2, 3]);

        // And again, in the same rotation.
        for expect in first_cycle {
            assert_eq!(s.schedule(), Some(expect));
        }
    }

    #[test]
    fn round_robin_skips_unrunnable_slots() {
        let mut s = with_idles();
        s.tasks[1].state = TaskState::Delayed;
        s.tasks[1].ticks = 100;
        s.set_policy(SchedPolicy::RoundRobin);
        for _ in 0..6 {
            assert_ne!(s.schedule(), Some(1));
        }
    }

    #[test]
    fn schedule_returns_none_with_no_runnable_task() {
        let mut s = Scheduler::new();
        assert_eq!(s.schedule(), None);
        s.set_policy(SchedPolicy::RoundRobin);
        assert_eq!(s.schedule(), None);
    }

    #[test]
    fn create_rejects_duplicates_bad_priority_and_full_table() {
        let mut s = with_idles();
        assert_eq!(
            s.create_thread(idle_a, "Idle", 7, 512),
            Err(KernelError::DuplicateEntry)
        );
        assert_eq!(
            s.create_thread(worker_a, "W", NUM_PRIORITIES, 512),
            Err(KernelError::BadPriority)
        );

        let fillers: [TaskEntry; 9] = [
            filler_0, filler_1, filler_2, filler_3, filler_4, filler_5, filler_6, filler_7,
            filler_8,
        ];
        for f in fillers {
            s.create_thread(f, "F", 6, 512).unwrap();
        }
        assert_eq!(s.task_count(), MAX_TASKS);
        assert_eq!(
            s.create_thread(worker_a, "W", 6, 512),
            Err(KernelError::TableFull)
        );
    }

    #[test]
    fn create_fails_cleanly_when_the_heap_is_exhausted() {
        let mut s = Scheduler::new();
        // Three region-sized stacks fill regions 1..4; region 0 has only
        // 4 blocks and cannot hold a fourth.
        s.create_thread(worker_a, "A", 1, MPU_REGION_SIZE).unwrap();
        s.create_thread(worker_b, "B", 1, MPU_REGION_SIZE).unwrap();
        s.create_thread(worker_c, "C", 1, MPU_REGION_SIZE).unwrap();
        assert_eq!(
            s.create_thread(worker_d, "D", 1, MPU_REGION_SIZE),
            Err(KernelError::OutOfMemory)
        );
        // The failed create left no partial record behind.
        assert!(!s.tasks[3].is_occupied());
        assert_eq!(s.task_count(), 3);
    }

    #[test]
    fn stack_allocation_sets_the_access_mask_to_the_heap_grant() {
        let mut s = with_idles();
        for slot in 0..3 {
            let id = s.tasks[slot].id().unwrap();
            assert_eq!(s.tasks[slot].srd, s.heap.owned_mask(id));
            assert!(!s.tasks[slot].srd.is_empty());
        }
        // Stacks are 8-aligned with the hardware frame pre-carved.
        let t = &s.tasks[0];
        assert_eq!(t.sp % 8, 0);
        assert_eq!(t.sp, t.stack_base + BLOCK_SIZE - 8 * 4);
    }

    #[test]
    fn mutex_blocks_and_transfers_ownership_fifo() {
        let mut s = with_idles();

        s.task_current = 0;
        assert!(!s.lock_current(0)); // acquired, not blocked

        s.task_current = 1;
        assert!(s.lock_current(0));
        assert_eq!(s.tasks[1].state, TaskState::BlockedMutex);
        assert_eq!(s.tasks[1].blocking_mutex, Some(0));

        s.task_current = 2;
        assert!(s.lock_current(0));

        // Owner releases: slot 1 inherits the lock without re-acquiring.
        s.task_current = 0;
        s.unlock_current(0);
        assert_eq!(s.mutexes[0].owner, Some(1));
        assert!(s.mutexes[0].locked);
        assert_eq!(s.tasks[1].state, TaskState::Ready);
        assert_eq!(s.tasks[1].blocking_mutex, None);
        assert_eq!(s.tasks[2].state, TaskState::BlockedMutex);

        s.task_current = 1;
        s.unlock_current(0);
        assert_eq!(s.mutexes[0].owner, Some(2));

        s.task_current = 2;
        s.unlock_current(0);
        assert!(!s.mutexes[0].locked);
        assert_eq!(s.mutexes[0].owner, None);
    }

    #[test]
    fn unlock_by_non_owner_is_a_silent_no_op() {
        let mut s = with_idles();
        s.task_current = 0;
        s.lock_current(0);

        s.task_current = 1;
        s.unlock_current(0);
        assert!(s.mutexes[0].locked);
        assert_eq!(s.mutexes[0].owner, Some(0));
    }

    #[test]
    fn semaphore_fast_path_and_fifo_handoff() {
        let mut s = with_idles();
        s.init_semaphore(0, 1);

        s.task_current = 0;
        assert!(!s.wait_current(0)); // took the banked unit
        assert_eq!(s.semaphores[0].count, 0);

        s.task_current = 1;
        assert!(s.wait_current(0));
        s.task_current = 2;
        assert!(s.wait_current(0));

        // Post hands the unit to slot 1 directly; count stays 0.
        s.post(0);
        assert_eq!(s.tasks[1].state, TaskState::Ready);
        assert_eq!(s.tasks[1].blocking_semaphore, None);
        assert_eq!(s.semaphores[0].count, 0);
        assert_eq!(s.tasks[2].state, TaskState::BlockedSemaphore);

        s.post(0);
        assert_eq!(s.tasks[2].state, TaskState::Ready);

        // Nobody waiting: the unit is banked.
        s.post(0);
        assert_eq!(s.semaphores[0].count, 1);
    }

    #[test]
    fn overflowing_a_wait_queue_leaves_the_task_blocked_forever() {
        let mut s = Scheduler::new();
        let entries: [TaskEntry; 6] = [idle_a, idle_b, idle_c, worker_a, worker_b, worker_c];
        for e in entries {
            s.create_thread(e, "T", 6, 512).unwrap();
        }
        s.init_semaphore(0, 0);

        for slot in 0..SEMAPHORE_QUEUE_LEN + 1 {
            s.task_current = slot;
            assert!(s.wait_current(0));
        }
        // Queue capacity waiters are woken in order; the overflow task
        // stays blocked with no queue entry.
        for _ in 0..SEMAPHORE_QUEUE_LEN + 1 {
            s.post(0);
        }
        for slot in 0..SEMAPHORE_QUEUE_LEN {
            assert_eq!(s.tasks[slot].state, TaskState::Ready);
        }
        assert_eq!(
            s.tasks[SEMAPHORE_QUEUE_LEN].state,
            TaskState::BlockedSemaphore
        );
        // The extra post was banked instead.
        assert_eq!(s.semaphores[0].count, 1);
    }

    #[test]
    fn sleep_delays_and_tick_promotes_exactly_at_zero() {
        let mut s = with_idles();
        s.task_current = 1;
        s.sleep_current(3);
        assert_eq!(s.tasks[1].state, TaskState::Delayed);

        s.tick();
        s.tick();
        assert_eq!(s.tasks[1].state, TaskState::Delayed);
        assert_eq!(s.tasks[1].ticks, 1);

        s.tick();
        assert_eq!(s.tasks[1].state, TaskState::Ready);
        assert_eq!(s.tasks[1].ticks, 0);

        // Further ticks leave it alone.
        s.tick();
        assert_eq!(s.tasks[1].state, TaskState::Ready);
    }

    #[test]
    fn sleep_zero_is_a_plain_yield() {
        let mut s = with_idles();
        s.task_current = 0;
        let before = s.tasks[0].state;
        s.sleep_current(0);
        assert_eq!(s.tasks[0].state, before);
    }

    #[test]
    fn preemption_requests_a_reschedule_every_tick() {
        let mut s = with_idles();
        s.tick();
        assert!(!s.needs_reschedule());
        s.set_preemption(true);
        s.tick();
        assert!(s.needs_reschedule());
        // schedule() consumes the request.
        s.schedule();
        assert!(!s.needs_reschedule());
    }

    #[test]
    fn switch_bookkeeping_promotes_and_reports_first_run() {
        let mut s = with_idles();
        let w = s.create_thread(worker_a, "Worker", 2, 512).unwrap();

        // First dispatch picks the unrun worker; only the hardware frame
        // exists, so no software-frame pop. Dispatching promotes it.
        let d = s.switch_in().unwrap();
        assert_eq!(s.current_task(), w);
        assert!(d.first_run);
        assert_eq!(d.mask, s.tasks[w].srd);
        assert_eq!(s.tasks[w].state, TaskState::Ready);

        // Switching out records the new sp.
        s.switch_out(d.sp - 32);
        assert_eq!(s.tasks[w].sp, d.sp - 32);

        let d2 = s.switch_in().unwrap();
        assert!(!d2.first_run);
        assert_eq!(d2.sp, d.sp - 32);
    }

    #[test]
    fn blocked_tasks_keep_their_state_across_a_switch() {
        let mut s = with_idles();
        s.task_current = 1;
        s.sleep_current(50);
        s.switch_out(s.tasks[1].sp);
        assert_eq!(s.tasks[1].state, TaskState::Delayed);
    }

    #[test]
    fn kill_reclaims_memory_queues_and_owned_mutexes() {
        let mut s = with_idles();
        let a = s.create_thread(worker_a, "Holder", 1, 1024).unwrap();
        let a_id = s.tasks[a].id().unwrap();
        let a_base = s.tasks[a].stack_base;

        // a owns the mutex, idle 0 blocks on it, idle 1 queues on a sem.
        s.task_current = a;
        s.lock_current(0);
        s.task_current = 0;
        s.lock_current(0);
        s.init_semaphore(0, 0);
        s.task_current = 1;
        s.wait_current(0);

        s.kill_thread(a_id).unwrap();
        assert_eq!(s.tasks[a].state, TaskState::Killed);

        // Mutex handed off to the blocked idle.
        assert_eq!(s.mutexes[0].owner, Some(0));
        assert_eq!(s.tasks[0].state, TaskState::Ready);

        // Heap fully reclaimed: the same-size allocation lands at the
        // same base, and the dead task's grant is empty.
        assert_eq!(s.heap.owned_mask(a_id), AccessMask::NONE);
        assert_eq!(s.tasks[a].srd, AccessMask::NONE);
        let again = s.heap.allocate(a_id, 1024).unwrap();
        assert_eq!(again.base, a_base);

        // Killing a queued waiter purges it from the queue.
        let idle1_id = s.tasks[1].id().unwrap();
        s.kill_thread(idle1_id).unwrap();
        s.post(0);
        assert_eq!(s.semaphores[0].count, 1); // nobody left to wake
    }

    #[test]
    fn killing_an_unknown_or_dead_task() {
        let mut s = with_idles();
        assert_eq!(
            s.kill_thread(TaskId::of(worker_a)),
            Err(KernelError::NoSuchTask)
        );
        let id = s.tasks[2].id().unwrap();
        s.kill_thread(id).unwrap();
        // Killing twice is an accepted no-op.
        assert_eq!(s.kill_thread(id), Ok(()));
    }

    #[test]
    fn restart_rebuilds_the_task_in_its_slot() {
        let mut s = with_idles();
        let w = s.create_thread(worker_a, "Worker", 2, 2048).unwrap();
        let id = s.tasks[w].id().unwrap();

        s.kill_thread(id).unwrap();
        s.restart_thread(id).unwrap();

        let t = &s.tasks[w];
        assert_eq!(t.state, TaskState::Unrun);
        assert_eq!(t.current_priority, 2);
        assert_eq!(t.srd, s.heap.owned_mask(id));
        assert_eq!(s.schedule(), Some(w));
    }

    #[test]
    fn self_restart_reschedules_and_keeps_the_fresh_context() {
        let mut s = with_idles();
        let w = s.create_thread(worker_a, "Worker", 2, 512).unwrap();
        let id = s.tasks[w].id().unwrap();

        // The worker is running when it restarts itself.
        s.switch_in().unwrap();
        assert_eq!(s.current_task(), w);
        s.restart_thread(id).unwrap();
        assert!(s.needs_reschedule());
        assert_eq!(s.tasks[w].state, TaskState::Unrun);
        let seeded = s.tasks[w].sp;

        // The switch that follows must not save the dead context over the
        // reseeded one, and the next dispatch starts the task over.
        s.switch_out(0xDEAD_0000);
        assert_eq!(s.tasks[w].state, TaskState::Unrun);
        assert_eq!(s.tasks[w].sp, seeded);

        let d = s.switch_in().unwrap();
        assert_eq!(s.current_task(), w);
        assert!(d.first_run);
        assert_eq!(d.sp, seeded);
    }

    #[test]
    fn restart_of_a_live_blocked_task_purges_its_queue_entry() {
        let mut s = with_idles();
        s.init_semaphore(0, 0);
        s.task_current = 1;
        s.wait_current(0);
        let id = s.tasks[1].id().unwrap();

        s.restart_thread(id).unwrap();
        assert_eq!(s.tasks[1].state, TaskState::Unrun);

        // Its queue entry is gone: a post banks the unit.
        s.post(0);
        assert_eq!(s.semaphores[0].count, 1);
    }

    #[test]
    fn set_priority_takes_effect_at_the_next_decision() {
        let mut s = with_idles();
        let w = s.create_thread(worker_a, "Worker", 6, 512).unwrap();
        assert_eq!(s.schedule(), Some(w));

        // Raising an idle above the worker redirects the next decision.
        s.set_thread_priority(TaskId::of(idle_b), 1).unwrap();
        assert_eq!(s.schedule(), Some(1));
        assert_eq!(
            s.set_thread_priority(TaskId::of(idle_b), NUM_PRIORITIES),
            Err(KernelError::BadPriority)
        );
    }

    #[test]
    fn priority_inheritance_boosts_and_reverts_the_owner() {
        let mut s = Scheduler::new();
        s.set_priority_inheritance(true);
        let low = s.create_thread(worker_a, "Low", 5, 512).unwrap();
        let high = s.create_thread(worker_b, "High", 1, 512).unwrap();
        let mid = s.create_thread(worker_c, "Mid", 3, 512).unwrap();

        s.task_current = low;
        s.lock_current(0);
        assert_eq!(s.tasks[low].current_priority, 5);

        s.task_current = high;
        s.lock_current(0);
        assert_eq!(s.tasks[low].current_priority, 1);

        s.task_current = mid;
        s.lock_current(0);
        // Boost is the max urgency over all waiters, so still 1.
        assert_eq!(s.tasks[low].current_priority, 1);

        // Unlock reverts the releaser exactly to its static priority and
        // boosts the new owner by the remaining waiter.
        s.task_current = low;
        s.unlock_current(0);
        assert_eq!(s.tasks[low].current_priority, 5);
        assert_eq!(s.mutexes[0].owner, Some(high as u8));
        assert_eq!(s.tasks[high].current_priority, 1);

        s.task_current = high;
        s.unlock_current(0);
        assert_eq!(s.mutexes[0].owner, Some(mid as u8));
        assert_eq!(s.tasks[mid].current_priority, 3);
    }

    #[test]
    fn killing_a_waiter_recomputes_the_owners_boost() {
        let mut s = Scheduler::new();
        s.set_priority_inheritance(true);
        let low = s.create_thread(worker_a, "Low", 5, 512).unwrap();
        let high = s.create_thread(worker_b, "High", 1, 512).unwrap();
        let mid = s.create_thread(worker_c, "Mid", 3, 512).unwrap();

        s.task_current = low;
        s.lock_current(0);
        s.task_current = high;
        s.lock_current(0);
        s.task_current = mid;
        s.lock_current(0);
        assert_eq!(s.tasks[low].current_priority, 1);

        s.kill_thread(TaskId::of(worker_b)).unwrap();
        assert_eq!(s.tasks[low].current_priority, 3);
    }

    #[test]
    fn self_kill_requests_a_reschedule() {
        let mut s = with_idles();
        s.task_current = 1;
        let id = s.tasks[1].id().unwrap();
        s.kill_thread(id).unwrap();
        assert!(s.needs_reschedule());
        assert_eq!(s.current_id(), Some(id)); // still current until the switch
        assert_eq!(s.schedule(), Some(0));
    }

    #[test]
    fn snapshot_reports_occupied_slots_only() {
        let mut s = with_idles();
        let snap = s.snapshot();
        assert!(snap[0].is_some());
        assert!(snap[3].is_none());

        let info = snap[1].unwrap();
        assert_eq!(info.name.as_str(), "Idle2");
        assert_eq!(info.state, TaskState::Unrun);
        assert_eq!(info.priority, 7);
        assert_eq!(info.id, TaskId::of(idle_b));
    }
}
