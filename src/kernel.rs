//! # Kernel
//!
//! Top-level kernel initialization and the public API for WardOS.
//!
//! The kernel owns the global scheduler instance, exposes the task
//! lifecycle and blocking services, and coordinates system startup. API
//! functions that mutate kernel state directly do so inside critical
//! sections; the blocking services go through the arch trap layer, which
//! serializes against the tick by handler priority.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()          ← Reset the global scheduler
//!         ├─► kernel::init_mutex() /
//!         │   kernel::init_semaphore()← Bring up the primitives (×N)
//!         ├─► kernel::create_thread() ← Register tasks (×N, idle last)
//!         └─► kernel::start()         ← Launch (no return)
//!               ├─► Program the MPU layout
//!               ├─► Configure SysTick, interrupt priorities
//!               └─► Dispatch the first task unprivileged on the PSP
//! ```
//!
//! On a host build `start()` performs the first dispatch as bookkeeping
//! and returns; the simulation driver then advances virtual time through
//! the arch layer's `tick_trap`.

use crate::arch;
use crate::config::MAX_TASKS;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
use crate::mm::AccessMask;
use crate::scheduler::{KernelError, SchedPolicy, Scheduler};
use crate::sync;
use crate::task::{TaskEntry, TaskId, TaskInfo};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

/// Global scheduler instance, reached only through `SCHEDULER_PTR`.
static mut SCHEDULER: Scheduler = Scheduler::new();

/// Raw pointer to the global scheduler. Used by the arch layer (PendSV,
/// SVCall, SysTick handlers), which cannot easily hold references.
///
/// # Safety
/// Set once during `init()`; read from handler context, where access is
/// serialized by handler priority, or inside critical sections.
#[no_mangle]
pub static mut SCHEDULER_PTR: *mut Scheduler = core::ptr::null_mut();

/// Run a closure over the global scheduler inside a critical section.
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Result<R, KernelError> {
    sync::critical_section(|_cs| unsafe {
        if SCHEDULER_PTR.is_null() {
            return Err(KernelError::NotInitialized);
        }
        Ok(f(&mut *SCHEDULER_PTR))
    })
}

// ---------------------------------------------------------------------------
// Bring-up
// ---------------------------------------------------------------------------

/// Initialize the WardOS kernel. Must be called before any other kernel
/// function, exactly once, from the main thread.
pub fn init() {
    unsafe {
        SCHEDULER_PTR = core::ptr::addr_of_mut!(SCHEDULER);
        (*SCHEDULER_PTR).reset();
    }
}

/// Select the scheduling discipline (priority or round-robin).
pub fn set_scheduler_policy(policy: SchedPolicy) -> Result<(), KernelError> {
    with_scheduler(|s| s.set_policy(policy))
}

/// Enable or disable tick preemption.
pub fn set_preemption(on: bool) -> Result<(), KernelError> {
    with_scheduler(|s| s.set_preemption(on))
}

/// Enable or disable priority inheritance on contested mutexes.
pub fn set_priority_inheritance(on: bool) -> Result<(), KernelError> {
    with_scheduler(|s| s.set_priority_inheritance(on))
}

/// Initialize a mutex. Call at system start, before tasks use it.
pub fn init_mutex(index: usize) -> bool {
    with_scheduler(|s| s.init_mutex(index)).unwrap_or(false)
}

/// Initialize a counting semaphore with `count` initial units.
pub fn init_semaphore(index: usize, count: u32) -> bool {
    with_scheduler(|s| s.init_semaphore(index, count)).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Task lifecycle
// ---------------------------------------------------------------------------

/// Register a task with the scheduler.
///
/// Allocates the task's stack from the protected block heap, seeds its
/// initial context, and records its entry function as its identity. Fails
/// without side effects on a full table, a duplicate entry, a bad
/// priority, or an unsatisfiable stack allocation.
pub fn create_thread(
    entry: TaskEntry,
    name: &str,
    priority: u8,
    stack_bytes: usize,
) -> Result<usize, KernelError> {
    with_scheduler(|s| s.create_thread(entry, name, priority, stack_bytes))?
}

/// Kill a task by entry function: its heap blocks are released, it is
/// purged from every wait queue, and any mutex it owns is handed to the
/// next waiter. A task killing itself does not return.
pub fn kill(entry: TaskEntry) -> Result<(), KernelError> {
    arch::kill_trap(TaskId::of(entry))
}

/// Restart a previously created (possibly killed) task in its slot, with
/// a fresh stack allocation and a fresh initial context.
pub fn restart(entry: TaskEntry) -> Result<(), KernelError> {
    arch::restart_trap(TaskId::of(entry))
}

/// Change a task's static priority. Takes effect at the next scheduling
/// decision.
pub fn set_priority(entry: TaskEntry, priority: u8) -> Result<(), KernelError> {
    arch::set_priority_trap(TaskId::of(entry), priority)
}

// ---------------------------------------------------------------------------
// Services available to running tasks
// ---------------------------------------------------------------------------

/// Voluntarily yield the CPU to the next scheduled task.
pub fn yield_now() {
    arch::yield_trap();
}

/// Suspend the calling task for `ticks` timer ticks (1 ms each).
/// `sleep(0)` is a plain yield.
pub fn sleep(ticks: u32) {
    arch::sleep_trap(ticks);
}

/// Take one unit from semaphore `index`, blocking until available.
pub fn wait(index: usize) {
    arch::wait_trap(index);
}

/// Release one unit to semaphore `index`, waking the earliest waiter.
pub fn post(index: usize) {
    arch::post_trap(index);
}

/// Acquire mutex `index`, blocking until ownership is handed over.
pub fn lock(index: usize) {
    arch::lock_trap(index);
}

/// Release mutex `index`. Silently ignored unless the caller owns it.
pub fn unlock(index: usize) {
    arch::unlock_trap(index);
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Read-only dump of the task table (`ps`-style diagnostics).
pub fn snapshot() -> [Option<TaskInfo>; MAX_TASKS] {
    with_scheduler(|s| s.snapshot()).unwrap_or([None; MAX_TASKS])
}

/// Ticks elapsed since `start()`.
pub fn uptime_ticks() -> u64 {
    with_scheduler(|s| s.ticks()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Start the WardOS scheduler. **Does not return.**
///
/// Programs the MPU layout, configures SysTick and the handler priorities,
/// applies the first task's access mask, and launches it unprivileged on
/// the process stack. If no task is runnable the processor parks in `wfi`.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;

    cortex_m4::configure_mpu(&mut core_peripherals.MPU);
    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities();

    let first = sync::critical_section(|_cs| unsafe {
        if SCHEDULER_PTR.is_null() {
            None
        } else {
            (*SCHEDULER_PTR).switch_in()
        }
    });

    match first {
        Some(dispatch) => {
            cortex_m4::apply_sram_access_mask(dispatch.mask);
            unsafe { cortex_m4::start_first_task(dispatch.sp as *const u32) }
        }
        None => loop {
            cortex_m::asm::wfi();
        },
    }
}

/// Start the simulated scheduler: perform the first dispatch as pure
/// bookkeeping and return the chosen slot. The caller then drives virtual
/// time through `arch::tick_trap()`.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn start() -> Option<usize> {
    with_scheduler(|s| {
        let dispatch = s.switch_in()?;
        arch::apply_sram_access_mask(dispatch.mask);
        Some(s.current_task())
    })
    .ok()
    .flatten()
}

/// The access mask the simulated protection hardware currently enforces.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn applied_access_mask() -> AccessMask {
    arch::applied_sram_access_mask()
}

// ---------------------------------------------------------------------------
// End-to-end simulation test (host-only)
// ---------------------------------------------------------------------------
