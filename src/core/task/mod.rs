//! Task management module
//!
//! Provides task creation, deletion, and control functions.

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::config::{CFG_PRIO_MAX, CFG_STK_REDZONE_EN, CFG_STK_SIZE_MIN, CFG_TIME_QUANTA_DEFAULT, CFG_TLS_NUM_SLOTS};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::pend;
use crate::types::{OsFlags, OsMsgSize, OsOpt, OsPendOn, OsPendStatus, OsPrio, OsSemCtr, OsStkElement, OsTaskState, OsTick};

/// Task entry point function type
pub type OsTaskFn = fn(*mut ()) -> !;

/// Zero-fill the stack before `os_task_stk_init` lays down the initial
/// frame, when the caller requested `opt::TASK_STK_CLR`. `os_task_stk_chk`
/// counts untouched (still-zero) words from `stk_base` to estimate stack
/// usage; that count is only meaningful over a stack that started clean.
unsafe fn clear_stk_if_requested(stk_base: *mut OsStkElement, stk_size: usize, opt: OsOpt) {
    if opt & crate::types::opt::TASK_STK_CLR != 0 {
        unsafe {
            core::ptr::write_bytes(stk_base, 0, stk_size);
        }
    }
}

/// Create a new task
///
/// # Arguments
/// * `tcb` - Pointer to the Task Control Block
/// * `name` - Task name for debugging
/// * `task_fn` - Task entry point function
/// * `arg` - Argument to pass to task function
/// * `prio` - Task priority
/// * `stk_base` - Pointer to base of stack array
/// * `stk_size` - Stack size in words
/// * `opt` - Task options
unsafe fn os_task_create_raw(
    tcb: *mut OsTcb,
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: OsTick,
    opt: OsOpt,
) -> OsResult<()> {
    if tcb.is_null() {
        return Err(OsError::TcbInvalid);
    }
    
    if stk_base.is_null() {
        return Err(OsError::StkInvalid);
    }
    
    if stk_size < CFG_STK_SIZE_MIN {
        return Err(OsError::StkSizeInvalid);
    }
    
    if prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::PrioInvalid);
    }
    
    if is_isr_context() {
        return Err(OsError::TaskCreateIsr);
    }

    critical_section(|_cs| {
        // Initialize TCB
        let tcb_ref = unsafe { &mut *tcb };
        tcb_ref.init();
        
        tcb_ref.name = name;
        tcb_ref.prio = prio;
        tcb_ref.base_prio = prio;
        tcb_ref.time_quanta = time_quanta;
        tcb_ref.time_quanta_ctr = time_quanta;
        tcb_ref.opt = opt;
        tcb_ref.task_state = OsTaskState::Ready;
        
        // Initialize stack
        unsafe { clear_stk_if_requested(stk_base, stk_size, opt) };
        let stk_ptr = unsafe {
            crate::port::os_task_stk_init(task_fn, arg, stk_base, stk_size, opt)
        };
        tcb_ref.stk_ptr = stk_ptr;
        tcb_ref.stk_base = stk_base;
        tcb_ref.stk_size = stk_size;
        tcb_ref.stk_limit = unsafe { stk_base.add(stk_size / 10) }; // 10% watermark
        
        // Store task entry point
        tcb_ref.task_entry_addr = task_fn as u32;
        tcb_ref.task_entry_arg = arg;

        // Add to ready list
        let tcb_nonnull = unsafe { NonNull::new_unchecked(tcb) };
        unsafe {
            let prio_tbl = kernel::prio_table();
            let rdy_list = kernel::rdy_list(prio);
            
            rdy_list.insert_tail(tcb_nonnull);
            prio_tbl.insert(prio);
        }
        
        if kernel::KERNEL.is_running() {
            crate::sched::os_sched();
        }
        
        Ok(())
    })
}

/// Create a new task using static references
///
/// This is the recommended way to create tasks
///
/// # Arguments
/// * `tcb` - Static mutable reference to the Task Control Block
/// * `stack` - Static mutable reference to the stack array
/// * `name` - Task name for debugging
/// * `task_fn` - Task entry point function
/// * `prio` - Task priority (0 = highest)
///
/// # Example
/// ```ignore
/// static mut TASK_TCB: OsTcb = OsTcb::new();
/// static mut TASK_STK: [OsStkElement; 256] = [0; 256];
///
/// fn my_task(_: *mut ()) -> ! {
///     loop { /* ... */ }
/// }
///
/// // In main:
/// os_task_create(
///     unsafe { &mut TASK_TCB },
///     unsafe { &mut TASK_STK },
///     "MyTask",
///     my_task,
///     5,
/// ).expect("Task creation failed");
/// ```
pub fn os_task_create(
    tcb: &'static mut OsTcb,
    stack: &'static mut [OsStkElement],
    name: &'static str,
    task_fn: OsTaskFn,
    prio: OsPrio,
) -> OsResult<()> {
    unsafe {
        os_task_create_raw(
            tcb as *mut OsTcb,
            name,
            task_fn,
            core::ptr::null_mut(),
            prio,
            stack.as_mut_ptr(),
            stack.len(),
            CFG_TIME_QUANTA_DEFAULT,
            0,
        )
    }
}

/// Internal task creation for kernel use
#[doc(hidden)]
pub unsafe fn os_task_create_internal(
    tcb: *mut OsTcb,
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: OsTick,
    opt: OsOpt,
) -> OsResult<()> {
    if tcb.is_null() || stk_base.is_null() {
        return Err(OsError::TcbInvalid);
    }

    // Initialize TCB
    let tcb_ref = unsafe { &mut *tcb };
    tcb_ref.init();
    
    tcb_ref.name = name;
    tcb_ref.prio = prio;
    tcb_ref.base_prio = prio;
    tcb_ref.time_quanta = time_quanta;
    tcb_ref.time_quanta_ctr = time_quanta;
    tcb_ref.opt = opt;
    tcb_ref.task_state = OsTaskState::Ready;
    
    // Initialize stack
    unsafe { clear_stk_if_requested(stk_base, stk_size, opt) };
    let stk_ptr = unsafe {
        crate::port::os_task_stk_init(task_fn, arg, stk_base, stk_size, opt)
    };
    tcb_ref.stk_ptr = stk_ptr;
    tcb_ref.stk_base = stk_base;
    tcb_ref.stk_size = stk_size;
    tcb_ref.stk_limit = unsafe { stk_base.add(stk_size / 10) };
    
    tcb_ref.task_entry_addr = task_fn as u32;
    tcb_ref.task_entry_arg = arg;
    
    // Add to ready list
    let tcb_nonnull = unsafe { NonNull::new_unchecked(tcb) };
    unsafe {
        let prio_tbl = kernel::prio_table();
        let rdy_list = kernel::rdy_list(prio);
        
        rdy_list.insert_tail(tcb_nonnull);
        prio_tbl.insert(prio);
    }
    
    Ok(())
}

/// Delete a task
pub fn os_task_del(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    
    if is_isr_context() {
        return Err(OsError::TaskDelIsr);
    }

    critical_section(|cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => {
                // Delete self
                unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?
            }
        };

        let tcb_ref = unsafe { tcb_ptr.as_ref() };
        let prio = tcb_ref.prio;

        if prio == crate::config::CFG_PRIO_IDLE {
            return Err(OsError::TaskDelIdle);
        }

        if tcb_ref.task_state == OsTaskState::Deleted {
            return Err(OsError::TaskInvalid);
        }

        // Unlink from whatever list the task's current state puts it in.
        match tcb_ref.task_state {
            OsTaskState::Ready => unsafe {
                let rdy_list = kernel::rdy_list(prio);
                rdy_list.remove(tcb_ptr);
                if rdy_list.is_empty() {
                    kernel::prio_table().remove(prio);
                }
            },
            OsTaskState::Delayed | OsTaskState::DelayedSuspended => unsafe {
                kernel::tick_list_remove(tcb_ptr);
            },
            OsTaskState::Pend
            | OsTaskState::PendTimeout
            | OsTaskState::PendSuspended
            | OsTaskState::PendTimeoutSuspended => unsafe {
                pend::unlink_from_pend_object(tcb_ptr);
                if matches!(
                    tcb_ref.task_state,
                    OsTaskState::PendTimeout | OsTaskState::PendTimeoutSuspended
                ) {
                    kernel::tick_list_remove(tcb_ptr);
                }
            },
            _ => {}
        }

        #[cfg(feature = "mutex")]
        unsafe {
            crate::mutex::release_owned_mutexes(tcb_ptr, cs);
        }
        #[cfg(not(feature = "mutex"))]
        let _ = cs;

        let tcb_mut = unsafe { &mut *tcb_ptr.as_ptr() };
        tcb_mut.pend_status = OsPendStatus::Del;
        tcb_mut.task_state = OsTaskState::Deleted;

        // If deleting current task, trigger reschedule
        let is_current = unsafe { kernel::tcb_cur_ptr() } == Some(tcb_ptr);
        if is_current {
            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Suspend a task
pub fn os_task_suspend(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if is_isr_context() {
        return Err(OsError::TaskSuspendIsr);
    }

    critical_section(|_cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?,
        };

        let tcb_ref = unsafe { &mut *tcb_ptr.as_ptr() };

        if tcb_ref.prio == crate::config::CFG_PRIO_IDLE {
            return Err(OsError::TaskSuspendIdle);
        }

        if tcb_ref.task_state == OsTaskState::Deleted {
            return Err(OsError::TaskInvalid);
        }

        tcb_ref.suspend_ctr = tcb_ref.suspend_ctr.saturating_add(1);

        match tcb_ref.task_state {
            OsTaskState::Ready => {
                tcb_ref.task_state = OsTaskState::Suspended;
                unsafe {
                    let rdy_list = kernel::rdy_list(tcb_ref.prio);
                    rdy_list.remove(tcb_ptr);
                    if rdy_list.is_empty() {
                        kernel::prio_table().remove(tcb_ref.prio);
                    }
                }
            }
            OsTaskState::Delayed => {
                tcb_ref.task_state = OsTaskState::DelayedSuspended;
            }
            OsTaskState::Pend => {
                tcb_ref.task_state = OsTaskState::PendSuspended;
            }
            OsTaskState::PendTimeout => {
                tcb_ref.task_state = OsTaskState::PendTimeoutSuspended;
            }
            _ => {} // Already suspended
        }

        // Reschedule if suspended current task
        let is_current = unsafe { kernel::tcb_cur_ptr() } == Some(tcb_ptr);
        if is_current {
            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Resume a suspended task
pub fn os_task_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if is_isr_context() {
        return Err(OsError::TaskResumeIsr);
    }

    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        if tcb_ref.task_state == OsTaskState::Deleted {
            return Err(OsError::TaskInvalid);
        }

        if tcb_ref.suspend_ctr == 0 {
            return Err(OsError::TaskNotSuspended);
        }

        tcb_ref.suspend_ctr -= 1;

        // Only resume if suspend counter reaches 0
        if tcb_ref.suspend_ctr == 0 {
            match tcb_ref.task_state {
                OsTaskState::Suspended => {
                    tcb_ref.task_state = OsTaskState::Ready;
                    unsafe {
                        let rdy_list = kernel::rdy_list(tcb_ref.prio);
                        rdy_list.insert_tail(tcb);
                        kernel::prio_table().insert(tcb_ref.prio);
                    }
                }
                OsTaskState::DelayedSuspended => {
                    tcb_ref.task_state = OsTaskState::Delayed;
                }
                OsTaskState::PendSuspended => {
                    tcb_ref.task_state = OsTaskState::Pend;
                }
                OsTaskState::PendTimeoutSuspended => {
                    tcb_ref.task_state = OsTaskState::PendTimeout;
                }
                _ => {}
            }

            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Change a task's base priority (spec §4.5 "ChangePrio")
///
/// Relinks the task in whatever ready/pend list it currently sits in. If
/// the task owns mutexes, its effective priority is recomputed as
/// `min(new_base, highest waiter across owned mutexes)` rather than set
/// directly to `new_prio` (spec §8 invariant 4).
pub fn os_task_change_prio(tcb: Option<NonNull<OsTcb>>, new_prio: OsPrio) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskChangePrioIsr);
    }

    if new_prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::TaskChangePrioInvalid);
    }

    critical_section(|_cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?,
        };

        let tcb_ref = unsafe { &mut *tcb_ptr.as_ptr() };
        tcb_ref.base_prio = new_prio;

        match tcb_ref.task_state {
            OsTaskState::Ready => unsafe {
                crate::sched::os_rdy_list_change_prio(tcb_ptr, new_prio);
            },
            OsTaskState::Pend | OsTaskState::PendTimeout => unsafe {
                // Relink within its pend list at the new priority.
                let hdr_ptr = tcb_ref.pend_obj_ptr as *mut pend::PendHeader;
                if let Some(hdr_ptr) = NonNull::new(hdr_ptr) {
                    let hdr = &mut *hdr_ptr.as_ptr();
                    hdr.pend_list.remove(tcb_ptr);
                    tcb_ref.prio = new_prio;
                    hdr.pend_list.insert_by_prio(tcb_ptr);
                } else {
                    tcb_ref.prio = new_prio;
                }
            },
            _ => {
                tcb_ref.prio = new_prio;
            }
        }

        #[cfg(feature = "mutex")]
        unsafe {
            crate::mutex::recompute_effective_prio(tcb_ptr);
        }

        crate::sched::os_sched();

        Ok(())
    })
}

/// Stack high-water-mark check (spec §4.5 "stk_chk"). Scans from
/// `stk_base` for the first word that no longer matches the stack's
/// fill pattern used at initialization, or — if red-zone checking is
/// enabled — reports overflow when the pointer has crossed `stk_limit`.
///
/// The free-word count is only meaningful for a task created with
/// `opt::TASK_STK_CLR`, which zero-fills the stack up front; without it
/// the buffer's prior contents are indistinguishable from "used".
///
/// Returns `(free_words, used_words)`.
pub fn os_task_stk_chk(tcb: NonNull<OsTcb>) -> OsResult<(usize, usize)> {
    let tcb_ref = unsafe { tcb.as_ref() };

    if CFG_STK_REDZONE_EN && (tcb_ref.stk_ptr as usize) <= (tcb_ref.stk_limit as usize) {
        return Err(OsError::StkOvf);
    }

    const FILL: OsStkElement = 0;
    let mut free_words = 0usize;
    unsafe {
        for i in 0..tcb_ref.stk_size {
            if *tcb_ref.stk_base.add(i) != FILL {
                break;
            }
            free_words += 1;
        }
    }

    Ok((free_words, tcb_ref.stk_size - free_words))
}

/// Change a task's round-robin time quantum (0 = use the scheduler
/// default quantum).
pub fn os_task_time_quanta_set(tcb: NonNull<OsTcb>, quanta: OsTick) -> OsResult<()> {
    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        tcb_ref.time_quanta = quanta;
        tcb_ref.time_quanta_ctr = if quanta == 0 { CFG_TIME_QUANTA_DEFAULT } else { quanta };
        Ok(())
    })
}

// ============ Task-local storage ============

pub fn os_task_tls_set(tcb: NonNull<OsTcb>, slot: usize, value: usize) -> OsResult<()> {
    if slot >= CFG_TLS_NUM_SLOTS {
        return Err(OsError::TlsInvalidSlot);
    }
    critical_section(|_cs| {
        unsafe { (*tcb.as_ptr()).tls[slot] = value };
        Ok(())
    })
}

pub fn os_task_tls_get(tcb: NonNull<OsTcb>, slot: usize) -> OsResult<usize> {
    if slot >= CFG_TLS_NUM_SLOTS {
        return Err(OsError::TlsInvalidSlot);
    }
    Ok(unsafe { (*tcb.as_ptr()).tls[slot] })
}

// ============ Per-task semaphore ============

/// Pend on this task's private semaphore counter (spec §6 "per-task
/// semaphore pend/post/set"). Blocks the *current* task; only the
/// current task may call this on itself.
pub fn os_task_sem_pend(timeout: OsTick, pend_opt: OsOpt) -> OsResult<OsSemCtr> {
    if is_isr_context() {
        return Err(OsError::PendIsr);
    }

    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    critical_section(|cs| {
        let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
        let cur_tcb = unsafe { &mut *cur_tcb_ptr.as_ptr() };

        if cur_tcb.sem_ctr > 0 {
            cur_tcb.sem_ctr -= 1;
            return Ok(cur_tcb.sem_ctr);
        }

        if pend_opt & crate::types::opt::PEND_NON_BLOCKING != 0 {
            return Err(OsError::PendWouldBlock);
        }

        let obj_ptr = &cur_tcb.task_sem_pend as *const pend::PendHeader as *const ();
        unsafe {
            pend::pend_block(
                cs,
                &mut cur_tcb.task_sem_pend.pend_list,
                cur_tcb_ptr,
                OsPendOn::TaskSem,
                obj_ptr,
                timeout,
            );
        }

        crate::sched::os_sched();

        let cur_tcb = unsafe { cur_tcb_ptr.as_ref() };
        pend::pend_result(cur_tcb).map(|_| cur_tcb.sem_ctr)
    })
}

/// Post to `tcb`'s private semaphore counter, unblocking it if it is
/// currently pending there.
pub fn os_task_sem_post(tcb: NonNull<OsTcb>, post_opt: OsOpt) -> OsResult<OsSemCtr> {
    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        if tcb_ref.pend_on == OsPendOn::TaskSem {
            pend::unblock_one(&mut tcb_ref.task_sem_pend.pend_list, OsPendStatus::Ok);
            if !pend::suppress_sched(post_opt) && !is_isr_context() {
                crate::sched::os_sched();
            }
            return Ok(tcb_ref.sem_ctr);
        }

        tcb_ref.sem_ctr = tcb_ref.sem_ctr.saturating_add(1);
        Ok(tcb_ref.sem_ctr)
    })
}

/// Force `tcb`'s private semaphore counter to `value`.
pub fn os_task_sem_set(tcb: NonNull<OsTcb>, value: OsSemCtr) -> OsResult<()> {
    critical_section(|_cs| {
        unsafe { (*tcb.as_ptr()).sem_ctr = value };
        Ok(())
    })
}

// ============ Per-task message queue ============

/// Pend on this task's private message queue.
pub fn os_task_q_pend(timeout: OsTick, pend_opt: OsOpt) -> OsResult<tcb::TaskMsg> {
    if is_isr_context() {
        return Err(OsError::PendIsr);
    }

    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    critical_section(|cs| {
        let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
        let cur_tcb = unsafe { &mut *cur_tcb_ptr.as_ptr() };

        if let Some(msg) = cur_tcb.task_q.pop_front() {
            return Ok(msg);
        }

        if pend_opt & crate::types::opt::PEND_NON_BLOCKING != 0 {
            return Err(OsError::TaskQEmpty);
        }

        let obj_ptr = &cur_tcb.task_q_pend as *const pend::PendHeader as *const ();
        unsafe {
            pend::pend_block(
                cs,
                &mut cur_tcb.task_q_pend.pend_list,
                cur_tcb_ptr,
                OsPendOn::TaskQueue,
                obj_ptr,
                timeout,
            );
        }

        crate::sched::os_sched();

        let cur_tcb = unsafe { &mut *cur_tcb_ptr.as_ptr() };
        pend::pend_result(cur_tcb)?;
        Ok(cur_tcb.task_q.pop_front().unwrap_or(tcb::TaskMsg {
            ptr: cur_tcb.msg_ptr,
            size: cur_tcb.msg_size,
            ts: cur_tcb.msg_ts,
        }))
    })
}

/// Post a message directly into `tcb`'s private queue, waking it if it
/// is currently pending there (spec §4.8 "never buffered in that case").
pub fn os_task_q_post(
    tcb: NonNull<OsTcb>,
    ptr: *const (),
    size: OsMsgSize,
    post_opt: OsOpt,
) -> OsResult<()> {
    critical_section(|_cs| {
        let ts = kernel::KERNEL.tick_get();
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        if tcb_ref.pend_on == OsPendOn::TaskQueue {
            tcb_ref.msg_ptr = ptr;
            tcb_ref.msg_size = size;
            tcb_ref.msg_ts = ts;
            pend::unblock_one(&mut tcb_ref.task_q_pend.pend_list, OsPendStatus::Ok);
            if !pend::suppress_sched(post_opt) && !is_isr_context() {
                crate::sched::os_sched();
            }
            return Ok(());
        }

        if !tcb_ref.task_q.push_back(tcb::TaskMsg { ptr, size, ts }) {
            return Err(OsError::TaskQFull);
        }
        Ok(())
    })
}

/// Discard every buffered message in `tcb`'s private queue.
pub fn os_task_q_flush(tcb: NonNull<OsTcb>) -> OsResult<usize> {
    critical_section(|_cs| Ok(unsafe { (*tcb.as_ptr()).task_q.flush() }))
}

// ============ Generic pend-abort ============

/// Abort the pend of `tcb`, regardless of what kind of object it is
/// pending on (spec §6 "pend-abort", dispatches on `pend_on`).
pub fn os_task_pend_abort(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::PendAbortIsr);
    }

    critical_section(|_cs| {
        let is_self = unsafe { kernel::tcb_cur_ptr() } == Some(tcb);
        if is_self {
            return Err(OsError::PendAbortSelf);
        }

        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        if !tcb_ref.is_pending() {
            return Err(OsError::PendAbortNone);
        }

        unsafe { pend::unlink_from_pend_object(tcb) };
        unsafe { pend::unblock(tcb, OsPendStatus::Abort) };

        crate::sched::os_sched();
        Ok(())
    })
}
