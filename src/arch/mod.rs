//! # Architecture Abstraction Layer
//!
//! The hardware boundary of the kernel. Everything above this module is
//! portable bookkeeping; everything below it knows about stack frames,
//! traps, and protection registers.
//!
//! Two ports exist behind the same surface:
//!
//! - `cortex_m4` — the real thing: PendSV context switch, SVCall service
//!   decode, SysTick tick source, and the MPU subregion translator.
//! - `host` — a simulation port for any non-bare-metal target. Traps become
//!   direct calls into the scheduler and the protection hardware becomes a
//!   shadow register, so the full kernel logic runs under `cargo test` and
//!   in the host demo.
//!
//! Both ports provide: `seed_stack`, `apply_sram_access_mask`, and the
//! `*_trap` service entry points used by the kernel API.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::*;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use host::*;

/// Size of the hardware-stacked exception frame (r0-r3, r12, lr, pc, xPSR).
/// A task that has never run owns exactly this much saved context.
pub const HW_FRAME_BYTES: usize = 8 * 4;
