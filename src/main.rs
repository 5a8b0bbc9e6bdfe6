//! # WardOS Demo
//!
//! On the Cortex-M4 target this is real firmware: a producer/consumer pair,
//! a mutex-guarded sensor loop, a one-shot task that kills itself, and the
//! mandatory idle task, all running preemptively behind MPU wards.
//!
//! On a host build it is a scripted simulation of the same task set: the
//! kernel's bookkeeping runs for real (dispatch decisions, blocking,
//! protection masks), while the driver below plays the role of whichever
//! task is current, and a `ps`-style table shows the system state as the
//! scenario unfolds.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

// ---------------------------------------------------------------------------
// Bare-metal firmware
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use cortex_m_rt::entry;
    use panic_halt as _;

    use wardos::kernel;
    use wardos::scheduler::SchedPolicy;

    const SENSOR_MUTEX: usize = 0;
    const SAMPLE_SEM: usize = 0;

    /// Runs whenever nothing else can; never blocks, never exits.
    extern "C" fn idle_task() -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    /// Samples at 100 Hz under the sensor mutex and posts one unit per
    /// sample taken.
    extern "C" fn sensor_task() -> ! {
        loop {
            kernel::lock(SENSOR_MUTEX);
            // Sample acquisition would go here.
            kernel::unlock(SENSOR_MUTEX);
            kernel::post(SAMPLE_SEM);
            kernel::sleep(10);
        }
    }

    /// Consumes samples as they arrive, blocking between batches.
    extern "C" fn filter_task() -> ! {
        loop {
            kernel::wait(SAMPLE_SEM);
            // Filtering work would go here.
            kernel::yield_now();
        }
    }

    /// Briefly contends for the sensor mutex at a slow period, exercising
    /// the blocking and priority-inheritance paths.
    extern "C" fn calibration_task() -> ! {
        loop {
            kernel::lock(SENSOR_MUTEX);
            kernel::sleep(2);
            kernel::unlock(SENSOR_MUTEX);
            kernel::sleep(1000);
        }
    }

    /// Runs once at startup and reclaims itself.
    extern "C" fn startup_task() -> ! {
        // One-time bring-up work would go here.
        let _ = kernel::kill(startup_task);
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[entry]
    fn main() -> ! {
        let cp = cortex_m::Peripherals::take().unwrap();

        kernel::init();
        let _ = kernel::set_scheduler_policy(SchedPolicy::Priority);
        let _ = kernel::set_preemption(true);
        let _ = kernel::set_priority_inheritance(true);
        kernel::init_mutex(SENSOR_MUTEX);
        kernel::init_semaphore(SAMPLE_SEM, 0);

        kernel::create_thread(idle_task, "Idle", 7, 512).unwrap();
        kernel::create_thread(sensor_task, "Sensor", 1, 1024).unwrap();
        kernel::create_thread(filter_task, "Filter", 2, 1024).unwrap();
        kernel::create_thread(calibration_task, "Calibrate", 4, 1024).unwrap();
        kernel::create_thread(startup_task, "Startup", 0, 512).unwrap();

        kernel::start(cp)
    }
}

// ---------------------------------------------------------------------------
// Host simulation driver
// ---------------------------------------------------------------------------

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    use wardos::scheduler::SchedPolicy;
    use wardos::{arch, kernel};

    extern "C" fn idle_task() -> ! {
        loop {
            core::hint::black_box(0u32);
        }
    }
    extern "C" fn sensor_task() -> ! {
        loop {
            core::hint::black_box(1u32);
        }
    }
    extern "C" fn filter_task() -> ! {
        loop {
            core::hint::black_box(2u32);
        }
    }
    extern "C" fn startup_task() -> ! {
        loop {
            core::hint::black_box(3u32);
        }
    }

    fn ps(phase: &str) {
        println!("--- {phase} (t = {} ticks)", kernel::uptime_ticks());
        println!(
            "{:<16} {:>10}  {:<16} {:>3} {:>3}  {:>18}",
            "NAME", "PID", "STATE", "PRI", "EFF", "SRAM MASK"
        );
        for info in kernel::snapshot().into_iter().flatten() {
            println!(
                "{:<16} {:>#10x}  {:<16} {:>3} {:>3}  {:>#18x}",
                info.name.as_str(),
                info.id.as_usize(),
                format!("{:?}", info.state),
                info.priority,
                info.current_priority,
                info.mask.bits(),
            );
        }
        println!(
            "applied mask: {:>#18x}\n",
            kernel::applied_access_mask().bits()
        );
    }

    env_logger::init();

    kernel::init();
    kernel::set_scheduler_policy(SchedPolicy::Priority).unwrap();
    kernel::set_preemption(true).unwrap();
    kernel::set_priority_inheritance(true).unwrap();
    kernel::init_mutex(0);
    kernel::init_semaphore(0, 0);

    kernel::create_thread(idle_task, "Idle", 7, 512).unwrap();
    kernel::create_thread(sensor_task, "Sensor", 1, 1024).unwrap();
    kernel::create_thread(filter_task, "Filter", 2, 2048).unwrap();
    kernel::create_thread(startup_task, "Startup", 0, 512).unwrap();

    kernel::start();
    ps("startup task dispatched");

    // The startup task finishes its one-time work and reclaims itself.
    kernel::kill(startup_task).unwrap();
    ps("startup task killed, sensor running");

    // The sensor takes the mutex and goes to sleep holding it.
    kernel::lock(0);
    kernel::sleep(5);
    ps("sensor asleep holding the mutex, filter running");

    // The filter blocks on the held mutex; the sleeping owner inherits
    // its urgency and the idle task is all that remains.
    kernel::lock(0);
    ps("filter blocked on the mutex, idle running");

    // Virtual time wakes the sensor, which releases the mutex to the
    // filter and posts a sample.
    for _ in 0..5 {
        arch::tick_trap();
    }
    ps("sensor woke");
    kernel::unlock(0);
    kernel::post(0);
    ps("mutex handed to the filter, one sample posted");

    println!("simulation complete after {} ticks", kernel::uptime_ticks());
}
