//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! context switching via PendSV, the SVCall service trap, SysTick timer
//! configuration, and the MPU subregion translator.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and trap handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry the hardware stacks r0-r3, r12, lr, pc and xPSR onto
//! the process stack. The PendSV handler saves and restores r4-r11, which
//! completes the context — except for a task that has never run, whose
//! seeded stack holds only the hardware frame. The scheduler reports that
//! case and the handler skips the software-frame pop.
//!
//! ## Service calls
//!
//! Tasks execute unprivileged, so they cannot pend PendSV or touch kernel
//! state directly. Every kernel service is an `svc` instruction; the
//! handler decodes the service number from the immediate encoded in the
//! instruction itself, two bytes behind the stacked return address, with
//! arguments in the stacked r0/r1 and results written back to stacked r0.
//!
//! ## Interrupt priorities
//!
//! - SVCall: priority 0 (reset default) — never preempted by the tick
//! - SysTick, PendSV: priority 0xFF (lowest) — PendSV runs only once no
//!   other handler is active, so a switch never tears a service call

use core::arch::asm;

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{MPU_REGION_SIZE, NUM_SRAM_REGIONS, SRAM_BASE, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel::SCHEDULER_PTR;
use crate::mm::AccessMask;
use crate::scheduler::KernelError;
use crate::task::{TaskEntry, TaskId};

// ---------------------------------------------------------------------------
// Service numbers
// ---------------------------------------------------------------------------

// Immediates of the `svc` instructions below; the handler match must agree.
const SVC_YIELD: u8 = 0;
const SVC_SLEEP: u8 = 1;
const SVC_WAIT: u8 = 2;
const SVC_POST: u8 = 3;
const SVC_LOCK: u8 = 4;
const SVC_UNLOCK: u8 = 5;
const SVC_KILL: u8 = 6;
const SVC_RESTART: u8 = 7;
const SVC_SET_PRIORITY: u8 = 8;

// ---------------------------------------------------------------------------
// Stack seeding
// ---------------------------------------------------------------------------

/// Build the initial exception frame for a task that has never run.
///
/// Writes the 8-word hardware frame at the top of the task's stack so the
/// first dispatch can "return" straight into the entry function: pc = entry,
/// xPSR = Thumb state, everything else zero. Returns the seeded stack
/// pointer (8-byte aligned, as the AAPCS requires at a public interface).
pub fn seed_stack(stack_top: usize, entry: TaskEntry) -> usize {
    let top = stack_top & !0x7;
    let frame = (top - super::HW_FRAME_BYTES) as *mut u32;
    unsafe {
        for i in 0..5 {
            frame.add(i).write_volatile(0); // r0-r3, r12
        }
        let exit: TaskEntry = task_return_trap;
        frame.add(5).write_volatile(exit as usize as u32); // lr
        frame.add(6).write_volatile(entry as usize as u32); // pc
        frame.add(7).write_volatile(0x0100_0000); // xPSR (Thumb bit)
    }
    frame as usize
}

/// Entry functions never return; landing here means a corrupted stack.
extern "C" fn task_return_trap() -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer to fire at `TICK_HZ` from the core clock.
/// Each tick runs `SysTick` below, which drives the scheduler's timer and
/// pends PendSV when a reschedule is due.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority. SVCall keeps
/// its reset priority of 0, so a tick can never interleave with a service
/// call's scheduler mutation.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority, bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// MPU bring-up and the per-dispatch mask
// ---------------------------------------------------------------------------

const AP_FULL: u32 = 0b011; // privileged RW, unprivileged RW

// First MPU region used for SRAM; regions 0 and 1 are flash / peripherals.
const SRAM_FIRST_MPU_REGION: u32 = 2;

/// RASR value: enabled region of `1 << size_log2` bytes with the given
/// access permission, execute-never flag, subregion-disable byte, and
/// memory attribute bits (TEX/S/C/B at [21:16]).
const fn rasr(size_log2: u32, ap: u32, xn: bool, srd: u8, attrs: u32) -> u32 {
    1 | ((size_log2 - 1) << 1) | ((srd as u32) << 8) | (attrs << 16) | (ap << 24) | ((xn as u32) << 28)
}

/// Program the static protection layout and enable the MPU.
///
/// Privileged code (the kernel, all handlers) runs on the default memory
/// map via PRIVDEFENA. Unprivileged tasks see: all of flash (execute +
/// read), the peripheral space, and whatever SRAM subregions the dispatch
/// path opens for them. The SRAM regions start fully closed; the kernel
/// page in the first region is covered by bits the allocator never grants.
pub fn configure_mpu(mpu: &mut cortex_m::peripheral::MPU) {
    unsafe {
        mpu.ctrl.write(0);

        // Region 0: flash, 256 KiB at 0x0000_0000. Normal, cacheable.
        mpu.rnr.write(0);
        mpu.rbar.write(0x0000_0000);
        mpu.rasr.write(rasr(18, AP_FULL, false, 0, 0b000_010));

        // Region 1: peripheral space, 64 MiB at 0x4000_0000. Device memory.
        mpu.rnr.write(1);
        mpu.rbar.write(0x4000_0000);
        mpu.rasr.write(rasr(26, AP_FULL, true, 0, 0b000_101));

        // Regions 2..6: the four 8 KiB SRAM regions, every subregion
        // disabled until a dispatch opens the running task's windows.
        for i in 0..NUM_SRAM_REGIONS {
            mpu.rnr.write(SRAM_FIRST_MPU_REGION + i as u32);
            mpu.rbar.write((SRAM_BASE + i * MPU_REGION_SIZE) as u32);
            mpu.rasr.write(rasr(13, AP_FULL, true, 0xFF, 0b000_110));
        }

        // ENABLE | PRIVDEFENA
        mpu.ctrl.write(0b101);
    }
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

/// Rewrite the SRD byte of every SRAM region from the given mask. A set
/// mask bit *disables* the subregion in the privileged-only SRAM rule,
/// which opens it to the running task. Runs inside the switch path,
/// strictly before the stack pointer swap.
pub fn apply_sram_access_mask(mask: AccessMask) {
    let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };
    for region in 0..NUM_SRAM_REGIONS {
        unsafe {
            mpu.rnr.write(SRAM_FIRST_MPU_REGION + region as u32);
            let old = mpu.rasr.read();
            let srd = (mask.region_byte(region) as u32) << 8;
            mpu.rasr.write((old & !(0xFF << 8)) | srd);
        }
    }
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch Thread mode onto the PSP, drop to unprivileged execution, and
/// consume the seeded hardware frame of the first task by hand. Called once
/// from `kernel::start()`; never returns.
///
/// # Safety
/// `psp` must point at a frame produced by `seed_stack`, and the MPU mask
/// for the task must already be applied.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        "msr psp, r0",
        // Interrupts on while still privileged; unprivileged code
        // cannot touch PRIMASK.
        "cpsie i",
        // CONTROL.SPSEL = 1 (PSP), CONTROL.nPRIV = 1 (unprivileged)
        "movs r0, #3",
        "msr control, r0",
        "isb",
        // Unstack the seeded frame manually: this is not an exception
        // return, just a branch into the entry function.
        "pop {{r0-r3, r12}}",
        "pop {{r4}}", // lr slot (return trap; entries never return)
        "mov lr, r4",
        "pop {{r5}}", // pc = entry (Thumb bit set by the fn pointer)
        "pop {{r6}}", // xPSR slot, discarded
        "bx r5",
        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — the context switch itself.
///
/// 1. Push r4-r11 onto the outgoing task's process stack
/// 2. Hand the resulting PSP to the scheduler (`pendsv_switch_out`)
/// 3. Ask the scheduler for the incoming task (`pendsv_switch_in`), which
///    also rewrites the MPU mask and returns the new PSP with bit 0 set
///    when the task has never run
/// 4. Pop r4-r11 only for a task that has run before
/// 5. Exception-return on the PSP; hardware restores the rest
///
/// # Safety
/// Naked handler invoked by the NVIC; must follow the Cortex-M4 exception
/// entry/exit convention exactly.
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {switch_out}",
        "bl {switch_in}",
        // Bit 0 tags a first dispatch: only the hardware frame exists.
        "tst r0, #1",
        "bic r0, r0, #1",
        "bne 2f",
        "ldmia r0!, {{r4-r11}}",
        "2:",
        "msr psp, r0",
        // Return to Thread mode on the PSP.
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        switch_out = sym pendsv_switch_out,
        switch_in = sym pendsv_switch_in,
        options(noreturn)
    );
}

/// Record the outgoing task's PSP. Called from PendSV.
///
/// # Safety
/// Assembly context, PendSV priority.
unsafe extern "C" fn pendsv_switch_out(psp: usize) {
    if SCHEDULER_PTR.is_null() {
        return;
    }
    (*SCHEDULER_PTR).switch_out(psp);
}

/// Pick the incoming task, apply its access mask, and return its PSP with
/// bit 0 set if this is the task's first dispatch. Called from PendSV.
///
/// # Safety
/// Assembly context, PendSV priority. The returned value goes straight
/// into the PSP after the tag bit is stripped.
unsafe extern "C" fn pendsv_switch_in() -> usize {
    let scheduler = &mut *SCHEDULER_PTR;
    match scheduler.switch_in() {
        Some(d) => {
            apply_sram_access_mask(d.mask);
            // sp is 8-aligned, so bit 0 is free to carry the tag.
            d.sp | d.first_run as usize
        }
        // Nothing runnable: resume the frame just saved.
        None => scheduler.current_sp(),
    }
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — the scheduler's timer. Pends PendSV when
/// the tick leaves a reschedule due (preemptive mode, or a sleeper woke).
///
/// # Safety
/// Invoked by the NVIC at the lowest priority.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    if SCHEDULER_PTR.is_null() {
        return;
    }
    let scheduler = &mut *SCHEDULER_PTR;
    scheduler.tick();
    if scheduler.needs_reschedule() {
        trigger_pendsv();
    }
}

/// Pend a PendSV exception (deferred context switch). Privileged only.
#[inline]
pub fn trigger_pendsv() {
    // ICSR: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// SVCall handler (service trap)
// ---------------------------------------------------------------------------

/// SVCall exception handler. Forwards the stacked frame pointer to the
/// Rust dispatcher; the exception return stays in lr across the branch.
///
/// # Safety
/// Naked handler invoked by the NVIC.
#[no_mangle]
#[naked]
pub unsafe extern "C" fn SVCall() {
    asm!(
        "mrs r0, psp",
        "b {handler}",
        handler = sym svcall_handler,
        options(noreturn)
    );
}

/// Decode and run one service call.
///
/// The service number is the `svc` immediate, read from the instruction
/// two bytes behind the stacked return address. Arguments arrive in the
/// stacked r0/r1; lifecycle services write their result code back into
/// the stacked r0, where the calling shim picks it up after the return.
///
/// # Safety
/// `frame` is the PSP of the interrupted task, pointing at a live
/// exception frame.
unsafe extern "C" fn svcall_handler(frame: *mut u32) {
    if SCHEDULER_PTR.is_null() {
        return;
    }
    let scheduler = &mut *SCHEDULER_PTR;

    let pc = frame.add(6).read() as *const u8;
    let service = pc.sub(2).read();
    let arg0 = frame.read() as usize;
    let arg1 = frame.add(1).read() as usize;

    match service {
        SVC_YIELD => trigger_pendsv(),
        SVC_SLEEP => {
            scheduler.sleep_current(arg0 as u32);
            trigger_pendsv();
        }
        SVC_WAIT => {
            if scheduler.wait_current(arg0) {
                trigger_pendsv();
            }
        }
        SVC_POST => scheduler.post(arg0),
        SVC_LOCK => {
            if scheduler.lock_current(arg0) {
                trigger_pendsv();
            }
        }
        SVC_UNLOCK => scheduler.unlock_current(arg0),
        SVC_KILL => {
            let res = scheduler.kill_thread(TaskId::from_raw(arg0));
            frame.write(encode_result(res));
            if scheduler.needs_reschedule() {
                trigger_pendsv();
            }
        }
        SVC_RESTART => {
            let res = scheduler.restart_thread(TaskId::from_raw(arg0));
            frame.write(encode_result(res));
            if scheduler.needs_reschedule() {
                trigger_pendsv();
            }
        }
        SVC_SET_PRIORITY => {
            let res = scheduler.set_thread_priority(TaskId::from_raw(arg0), arg1 as u8);
            frame.write(encode_result(res));
        }
        n => log::warn!("unknown service call {n}"),
    }
}

fn encode_result(res: Result<(), KernelError>) -> u32 {
    match res {
        Ok(()) => 0,
        Err(e) => e as u32 + 1,
    }
}

fn decode_result(code: u32) -> Result<(), KernelError> {
    match code {
        0 => Ok(()),
        1 => Err(KernelError::NotInitialized),
        2 => Err(KernelError::TableFull),
        3 => Err(KernelError::DuplicateEntry),
        4 => Err(KernelError::OutOfMemory),
        5 => Err(KernelError::NoSuchTask),
        _ => Err(KernelError::BadPriority),
    }
}

// ---------------------------------------------------------------------------
// Service shims (task side)
// ---------------------------------------------------------------------------

/// Give up the CPU voluntarily.
#[inline]
pub fn yield_trap() {
    unsafe {
        asm!("svc #0", options(nomem, nostack));
    }
}

/// Suspend the current task for `ticks` timer ticks.
#[inline]
pub fn sleep_trap(ticks: u32) {
    unsafe {
        asm!("svc #1", in("r0") ticks, options(nostack));
    }
}

/// Take one unit from a semaphore, blocking until one is available.
#[inline]
pub fn wait_trap(index: usize) {
    unsafe {
        asm!("svc #2", in("r0") index, options(nostack));
    }
}

/// Release one unit to a semaphore.
#[inline]
pub fn post_trap(index: usize) {
    unsafe {
        asm!("svc #3", in("r0") index, options(nostack));
    }
}

/// Acquire a mutex, blocking until it is handed over.
#[inline]
pub fn lock_trap(index: usize) {
    unsafe {
        asm!("svc #4", in("r0") index, options(nostack));
    }
}

/// Release a mutex. Ignored unless the caller owns it.
#[inline]
pub fn unlock_trap(index: usize) {
    unsafe {
        asm!("svc #5", in("r0") index, options(nostack));
    }
}

/// Kill a task by identity. Killing the calling task does not return.
#[inline]
pub fn kill_trap(id: TaskId) -> Result<(), KernelError> {
    let mut code = id.as_usize() as u32;
    unsafe {
        asm!("svc #6", inout("r0") code, options(nostack));
    }
    decode_result(code)
}

/// Restart a task by identity with a fresh stack and context.
#[inline]
pub fn restart_trap(id: TaskId) -> Result<(), KernelError> {
    let mut code = id.as_usize() as u32;
    unsafe {
        asm!("svc #7", inout("r0") code, options(nostack));
    }
    decode_result(code)
}

/// Change a task's static priority.
#[inline]
pub fn set_priority_trap(id: TaskId, priority: u8) -> Result<(), KernelError> {
    let mut code = id.as_usize() as u32;
    unsafe {
        asm!("svc #8", inout("r0") code, in("r1") priority as u32, options(nostack));
    }
    decode_result(code)
}
