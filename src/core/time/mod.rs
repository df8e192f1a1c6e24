//! Time management module
//!
//! Provides tick handling, time delays (relative/periodic), and timeout
//! management, all layered on the tick delta list in [`crate::tick`].

use core::ptr::NonNull;

use crate::config::CFG_TICK_RATE_HZ;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{OsTaskState, OsTick};

/// Time delay in ticks (spec §4.2/§6 "Time: delay (relative)").
///
/// Delays the calling task for the specified number of system ticks.
/// The task is removed from the ready list and placed on the tick list.
/// When the delay expires, the tick engine moves the task back to ready.
///
/// # Arguments
/// * `ticks` - Number of ticks to delay (0 = no delay)
pub fn os_time_dly(ticks: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return Err(OsError::SchedLocked);
    }

    if ticks == 0 {
        return Ok(());
    }

    critical_section(|_cs| unsafe {
        if let Some(cur_tcb) = kernel::tcb_cur_ptr() {
            let tcb = &mut *cur_tcb.as_ptr();

            tcb.task_state = OsTaskState::Delayed;
            sched::os_rdy_list_remove(cur_tcb);
            kernel::tick_list_insert(cur_tcb, ticks);
        }
    });

    sched::os_sched();

    Ok(())
}

/// Time delay in hours, minutes, seconds, milliseconds (spec §6
/// "delay_HMSM").
pub fn os_time_dly_hmsm(
    hours: u16,
    minutes: u8,
    seconds: u8,
    milliseconds: u16,
) -> OsResult<()> {
    if minutes > 59 {
        return Err(OsError::StateInvalid);
    }
    if seconds > 59 {
        return Err(OsError::StateInvalid);
    }
    if milliseconds > 999 {
        return Err(OsError::StateInvalid);
    }

    let total_ms = (hours as u32) * 3_600_000
        + (minutes as u32) * 60_000
        + (seconds as u32) * 1000
        + (milliseconds as u32);

    let ticks = (total_ms * CFG_TICK_RATE_HZ) / 1000;

    os_time_dly(ticks)
}

/// Periodic delay (spec §4.2 "periodic delay"): the base for the next
/// deadline is the *prior* deadline, not the time the task happens to
/// resume at, so a task that calls this every iteration wakes at
/// `t0+P, t0+2P, ...` with no drift even if it runs late some cycles.
/// If more than one period has elapsed since the prior deadline (the
/// task ran very late), the base is advanced by whole periods first
/// ("catching up") before the new period is added.
pub fn os_time_dly_periodic(period: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return Err(OsError::SchedLocked);
    }

    if period == 0 {
        return Err(OsError::TimeZeroDly);
    }

    critical_section(|_cs| unsafe {
        if let Some(cur_tcb) = kernel::tcb_cur_ptr() {
            let tcb = &mut *cur_tcb.as_ptr();
            let now = kernel::KERNEL.tick_get();

            let mut base = tcb.dly_periodic_base;
            if base == 0 {
                base = now;
            }

            let elapsed = now.wrapping_sub(base);
            if elapsed >= period {
                // Fell more than one period behind; catch up base to the
                // most recent deadline that is still <= now.
                let periods_late = elapsed / period;
                base = base.wrapping_add(periods_late.wrapping_mul(period));
            }

            let next_deadline = base.wrapping_add(period);
            tcb.dly_periodic_base = next_deadline;

            let delta = next_deadline.wrapping_sub(now);

            if delta == 0 {
                return;
            }

            tcb.task_state = OsTaskState::Delayed;
            sched::os_rdy_list_remove(cur_tcb);
            kernel::tick_list_insert(cur_tcb, delta);
        }
    });

    sched::os_sched();

    Ok(())
}

/// Resume a delayed task before its delay expires (spec §6
/// "delay_resume").
pub fn os_time_dly_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }

    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        if !tcb_ref.is_delayed() {
            return Err(OsError::TaskNotDly);
        }

        unsafe { kernel::tick_list_remove(tcb) };

        match tcb_ref.task_state {
            OsTaskState::Delayed => {
                tcb_ref.task_state = OsTaskState::Ready;
                unsafe { sched::os_rdy_list_insert(tcb) };
            }
            OsTaskState::DelayedSuspended => {
                tcb_ref.task_state = OsTaskState::Suspended;
            }
            _ => {}
        }

        sched::os_sched();

        Ok(())
    })
}

/// Get current tick count (spec §6 "time_get").
#[inline]
pub fn os_time_get() -> OsTick {
    kernel::KERNEL.tick_get()
}

/// Set the current tick count (spec §6 "time_set"). Intended for test
/// harnesses and for synchronizing to an external time base at startup;
/// does not itself re-evaluate the tick list.
pub fn os_time_set(ticks: OsTick) {
    critical_section(|_cs| {
        kernel::KERNEL.tick_set(ticks);
    });
}

/// Periodic-tick entry point (spec §4.11 "time_tick(n)"): called from the
/// tick ISR handler once per tick when the tick source fires at a fixed
/// rate. `n` is always 1 in this mode; the general `n` parameter exists so
/// the same advance logic is shared with [`os_time_dyn_tick`].
pub fn os_time_tick(n: OsTick) {
    if !kernel::KERNEL.is_running() {
        return;
    }

    kernel::os_int_enter();

    critical_section(|_cs| unsafe {
        kernel::KERNEL.tick_advance(n);
        kernel::tick_list_advance(n);
        sched::os_sched_round_robin();
    });

    kernel::os_int_exit();
}

/// Dynamic-tick entry point (spec §4.11 "time_dyn_tick(n)"): used when
/// the tick source is reprogrammed on demand (`config::CFG_TICK_DYN_EN`)
/// rather than firing at a fixed rate. `n` is the actual number of
/// elapsed ticks the port's timer read-out reports. After advancing, the
/// next hardware deadline is reprogrammed via the port's `dyn_tick_set`
/// hook to the new tick-list head's delta (spec §4.2 "dynamic-tick
/// variant").
pub fn os_time_dyn_tick(n: OsTick) {
    if !kernel::KERNEL.is_running() {
        return;
    }

    kernel::os_int_enter();

    critical_section(|_cs| unsafe {
        kernel::KERNEL.tick_advance(n);
        kernel::tick_list_advance(n);
        sched::os_sched_round_robin();

        if !kernel::tick_list_is_empty() {
            if let Some(delta) = kernel::tick_list_head_delta() {
                crate::port::dyn_tick_set(delta);
            }
        }
    });

    kernel::os_int_exit();
}

/// SysTick interrupt handler (periodic-tick mode).
#[no_mangle]
pub extern "C" fn SysTick() {
    os_time_tick(1);
}
