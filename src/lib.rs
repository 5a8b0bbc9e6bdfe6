//! # WardOS — an MPU-warded RTOS kernel
//!
//! A small preemptive real-time kernel for the ARM Cortex-M4 that puts the
//! Memory Protection Unit at the center of its design: every task stack is
//! carved out of a block heap whose blocks map one-to-one onto MPU
//! subregions, and every context switch re-arms the MPU so the incoming
//! task can touch exactly the memory it owns and nothing else.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  Application Tasks                     │
//! ├────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                  │
//! │  init() · create_thread() · start() · sleep() · lock() │
//! ├───────────────────┬────────────────────────────────────┤
//! │  Scheduler        │  Sync Primitives                   │
//! │  scheduler.rs     │  sync.rs                           │
//! │  ─ schedule()     │  ─ Mutex (FIFO hand-off)           │
//! │  ─ tick()         │  ─ Semaphore (direct unit grant)   │
//! │  ─ kill/restart   │  ─ critical_section                │
//! ├───────────────────┴────────────────────────────────────┤
//! │        Task Model (task.rs) · Block Heap (mm.rs)       │
//! │   TCB · TaskState · TaskId  ·  BlockHeap · AccessMask  │
//! ├────────────────────────────────────────────────────────┤
//! │              Arch Ports (arch/…)                       │
//! │  cortex_m4: PendSV · SVCall · SysTick · MPU SRD        │
//! │  host:      simulated traps · shadow mask register     │
//! ├────────────────────────────────────────────────────────┤
//! │        ARM Cortex-M4 (TM4C123)   /   host process      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design points
//!
//! - **Identity by entry function**: tasks are addressed by the address of
//!   their entry function, never by table slot — slots are reused after a
//!   kill, entry addresses are not.
//! - **Protection follows allocation**: the block heap is the single source
//!   of truth for what a task may touch. Allocation grants subregion bits,
//!   kill revokes them, and the dispatch path writes them into the MPU
//!   before the stack pointer swap.
//! - **Direct hand-off**: a released mutex and a posted semaphore unit go
//!   straight to the earliest waiter; the lock never opens in between and
//!   the count never ticks up past a waiting queue.
//! - **Full reclamation**: killing a task releases its memory, purges its
//!   wait-queue entries, and hands off anything it owned; the slot can be
//!   restarted later as if freshly created.
//!
//! ## Memory model
//!
//! - Static TCB array, static primitive tables, no `alloc`
//! - One block heap (28 KiB, 1 KiB blocks) for all task stacks
//! - Critical sections via the `critical-section` API: interrupt masking
//!   on the target, a process lock on the host

#![no_std]

pub mod arch;
pub mod config;
pub mod kernel;
pub mod mm;
pub mod scheduler;
pub mod sync;
pub mod task;
