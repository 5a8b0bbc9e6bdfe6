//! # Host Simulation Port
//!
//! Stands in for the Cortex-M4 port on any target that is not bare-metal
//! ARM, so the whole kernel runs under `cargo test` and in the host demo.
//!
//! The translation is mechanical: traps become direct calls that perform
//! the same scheduler bookkeeping the real handlers do, a context switch
//! is the same switch-out/switch-in sequence without a register swap, and
//! the MPU's SRD fields collapse into one shadow word that records the
//! mask most recently applied. No task code actually executes — the
//! simulation driver plays the role of whichever task is current.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::kernel::SCHEDULER_PTR;
use crate::mm::AccessMask;
use crate::scheduler::{KernelError, Scheduler};
use crate::sync;
use crate::task::{TaskEntry, TaskId};

/// The simulated MPU: the subregion mask currently "in hardware".
static APPLIED_MASK: AtomicU64 = AtomicU64::new(0);

/// Compute the initial stack pointer for a task that has never run.
///
/// The heap addresses have no memory behind them on the host, so only the
/// frame arithmetic is modeled: align down to 8 bytes, then reserve the
/// hardware frame.
pub fn seed_stack(stack_top: usize, _entry: TaskEntry) -> usize {
    (stack_top & !0x7) - super::HW_FRAME_BYTES
}

/// Record `mask` as the active protection state.
pub fn apply_sram_access_mask(mask: AccessMask) {
    APPLIED_MASK.store(mask.bits(), Ordering::SeqCst);
    log::trace!("mpu(sim): applied mask {:#018x}", mask.bits());
}

/// The mask most recently applied — what the simulated hardware would
/// enforce right now.
pub fn applied_sram_access_mask() -> AccessMask {
    AccessMask::from_bits(APPLIED_MASK.load(Ordering::SeqCst))
}

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    sync::critical_section(|_cs| unsafe {
        if SCHEDULER_PTR.is_null() {
            None
        } else {
            Some(f(&mut *SCHEDULER_PTR))
        }
    })
}

/// The simulated PendSV: save the current task, pick the next one, apply
/// its mask. The "saved" stack pointer is whatever the task table already
/// holds, since no registers exist to spill.
fn context_switch() {
    with_scheduler(|s| {
        let sp = s.current_sp();
        s.switch_out(sp);
        if let Some(d) = s.switch_in() {
            apply_sram_access_mask(d.mask);
        }
    });
}

/// The simulated SysTick: advance the timer and switch if the tick left a
/// reschedule due. The simulation driver calls this once per virtual tick.
pub fn tick_trap() {
    let due = with_scheduler(|s| {
        s.tick();
        s.needs_reschedule()
    });
    if due == Some(true) {
        context_switch();
    }
}

// -- service entry points, mirroring the SVCall table ------------------------

/// Give up the CPU voluntarily.
pub fn yield_trap() {
    context_switch();
}

/// Suspend the current task for `ticks` timer ticks.
pub fn sleep_trap(ticks: u32) {
    with_scheduler(|s| s.sleep_current(ticks));
    context_switch();
}

/// Take one unit from a semaphore, blocking until one is available.
pub fn wait_trap(index: usize) {
    if with_scheduler(|s| s.wait_current(index)) == Some(true) {
        context_switch();
    }
}

/// Release one unit to a semaphore.
pub fn post_trap(index: usize) {
    with_scheduler(|s| s.post(index));
}

/// Acquire a mutex, blocking until it is handed over.
pub fn lock_trap(index: usize) {
    if with_scheduler(|s| s.lock_current(index)) == Some(true) {
        context_switch();
    }
}

/// Release a mutex. Ignored unless the caller owns it.
pub fn unlock_trap(index: usize) {
    with_scheduler(|s| s.unlock_current(index));
}

/// Kill a task by identity.
pub fn kill_trap(id: TaskId) -> Result<(), KernelError> {
    let res = with_scheduler(|s| (s.kill_thread(id), s.needs_reschedule()));
    match res {
        Some((res, due)) => {
            if due {
                context_switch();
            }
            res
        }
        None => Err(KernelError::NotInitialized),
    }
}

/// Restart a task by identity with a fresh stack and context. A task
/// restarting itself is switched away from immediately.
pub fn restart_trap(id: TaskId) -> Result<(), KernelError> {
    let res = with_scheduler(|s| (s.restart_thread(id), s.needs_reschedule()));
    match res {
        Some((res, due)) => {
            if due {
                context_switch();
            }
            res
        }
        None => Err(KernelError::NotInitialized),
    }
}

/// Change a task's static priority.
pub fn set_priority_trap(id: TaskId, priority: u8) -> Result<(), KernelError> {
    with_scheduler(|s| s.set_thread_priority(id, priority))
        .unwrap_or(Err(KernelError::NotInitialized))
}
