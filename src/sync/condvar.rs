//! Condition variable (spec §4.10 last paragraph: "implemented on top of
//! the mutex + pend/post machinery"). Internal-only primitive used by
//! [`crate::sync::timer`] to let the timer task sleep until the next
//! timer deadline (or be woken early when that deadline changes); not a
//! user-facing kernel object, so it carries no [`crate::types::OsObjType`]
//! tag and is never independently creatable.

use crate::critical::critical_section;
use crate::error::OsResult;
use crate::kernel;
use crate::pend::{self, PendHeader, PendList};
use crate::sched;
use crate::sync::mutex::Mutex;
use crate::types::{OsPendOn, OsPendStatus, OsTick};

pub struct OsCondVar {
    hdr: PendHeader,
}

impl OsCondVar {
    pub const fn new() -> Self {
        OsCondVar { hdr: PendHeader::new() }
    }

    pub fn init(&mut self) {
        self.hdr.init();
    }

    #[inline]
    fn pend_list(&mut self) -> &mut PendList {
        &mut self.hdr.pend_list
    }

    /// Release `mutex` and block the calling task on this condition
    /// variable in one atomic step, reacquiring `mutex` before returning
    /// regardless of how the wait ended (woken, timed out, or aborted) —
    /// the caller's lock/unlock discipline is never left unbalanced.
    /// `timeout == 0` waits forever.
    pub fn wait(&mut self, mutex: &Mutex, timeout: OsTick) -> OsResult<()> {
        let cur_tcb_ptr = critical_section(|cs| {
            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(crate::error::OsError::TcbInvalid)?;
            let obj_ptr = &self.hdr as *const PendHeader as *const ();

            mutex.release_for_condvar(cs)?;

            unsafe {
                pend::pend_block(cs, self.pend_list(), cur_tcb_ptr, OsPendOn::Cond, obj_ptr, timeout);
            }

            Ok(cur_tcb_ptr)
        })?;

        sched::os_sched();

        let wait_status = pend::pend_result(unsafe { cur_tcb_ptr.as_ref() });

        mutex.lock(0, 0)?;

        wait_status
    }

    /// Wake a waiter, if any (spec §4.10 "signal unblocks any waiter").
    pub fn signal(&mut self) {
        critical_section(|_cs| {
            if pend::unblock_one(self.pend_list(), OsPendStatus::Ok) {
                sched::os_sched();
            }
        });
    }
}

impl Default for OsCondVar {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsCondVar {}
unsafe impl Sync for OsCondVar {}
