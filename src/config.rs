//! # WardOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time — the only dynamic memory is the kernel's own block heap.
//!
//! The heap geometry mirrors the TM4C123GH6PM memory protection layout:
//! 32 KiB of SRAM carved into four 8 KiB MPU regions of eight 1 KiB
//! subregions each, with the first 4 KiB page reserved for the kernel.

/// Maximum number of tasks the system can manage simultaneously.
/// Bounds the static TCB table. Slot indices are reused after a kill,
/// which is why tasks are addressed externally by entry-function identity.
pub const MAX_TASKS: usize = 12;

/// Number of priority levels. Priority 0 is the highest; the idle tasks
/// conventionally run at `NUM_PRIORITIES - 1`.
pub const NUM_PRIORITIES: u8 = 8;

/// SysTick frequency in Hz. One tick = 1 ms.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (TM4C123 at 40 MHz).
pub const SYSTEM_CLOCK_HZ: u32 = 40_000_000;

/// Length of the diagnostic task name; longer names are truncated.
pub const TASK_NAME_LEN: usize = 16;

/// Number of mutexes available to tasks. Initialized once at startup.
pub const MAX_MUTEXES: usize = 2;

/// Number of counting semaphores available to tasks.
pub const MAX_SEMAPHORES: usize = 4;

/// Capacity of a mutex wait queue. A task blocking on a full queue stays
/// blocked forever; size this for the worst-case contention of the
/// application task set.
pub const MUTEX_QUEUE_LEN: usize = 4;

/// Capacity of a semaphore wait queue. Same full-queue caveat as mutexes.
pub const SEMAPHORE_QUEUE_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Heap / MPU geometry
// ---------------------------------------------------------------------------

/// Base of on-chip SRAM. The MPU SRAM regions start here.
pub const SRAM_BASE: usize = 0x2000_0000;

/// Base of the block heap. The 4 KiB below it (`SRAM_BASE`..`HEAP_BASE`)
/// is kernel-reserved and never opened to unprivileged tasks.
pub const HEAP_BASE: usize = 0x2000_1000;

/// Heap size in bytes (28 KiB usable out of the 32 KiB SRAM).
pub const HEAP_SIZE: usize = 0x7000;

/// Allocation granule. One block = one MPU subregion.
pub const BLOCK_SIZE: usize = 1024;

/// Number of heap blocks.
pub const NUM_BLOCKS: usize = HEAP_SIZE / BLOCK_SIZE;

/// Size of one MPU SRAM region. An allocation must never span a region
/// boundary, because access is granted at region + subregion granularity.
pub const MPU_REGION_SIZE: usize = 8 * 1024;

/// Subregions per MPU region (fixed by the ARMv7-M MPU).
pub const SUBREGIONS_PER_REGION: usize = 8;

/// Number of MPU regions covering SRAM.
pub const NUM_SRAM_REGIONS: usize = 4;

/// Blocks per MPU region.
pub const BLOCKS_PER_REGION: usize = MPU_REGION_SIZE / BLOCK_SIZE;

/// Global subregion index of heap block 0. The kernel-reserved 4 KiB page
/// occupies subregions 0..4 of the first SRAM region.
pub const HEAP_FIRST_SUBREGION: usize = (HEAP_BASE - SRAM_BASE) / BLOCK_SIZE;
