//! Semaphore implementation
//!
//! Counting semaphores for task synchronization and resource counting.

use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::pend::{self, PendHeader, PendList, PostPolicy};
use crate::sched;
use crate::types::{opt, OsObjType, OsOpt, OsPendOn, OsSemCtr, OsTick};

/// Counting semaphore
#[repr(C)]
pub struct OsSem {
    /// Common waitable-object header; must be first field (see
    /// [`PendHeader`]).
    hdr: PendHeader,
    /// Object type marker
    obj_type: OsObjType,
    /// Current count
    count: OsSemCtr,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

impl OsSem {
    /// Create a new semaphore
    pub const fn new(count: OsSemCtr) -> Self {
        OsSem {
            hdr: PendHeader::new(),
            obj_type: OsObjType::Sem,
            count,
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize/create the semaphore
    pub fn create(&mut self, count: OsSemCtr, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Sem;
            self.hdr.init();
            self.count = count;
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }
            Ok(())
        })
    }

    #[inline]
    fn pend_list(&mut self) -> &mut PendList {
        &mut self.hdr.pend_list
    }

    /// Wait on (pend) the semaphore
    ///
    /// # Arguments
    /// * `timeout` - Maximum ticks to wait (0 = forever)
    /// * `opt` - Pend options
    ///
    /// # Returns
    /// * `Ok(count)` - Semaphore acquired, returns current count
    /// * `Err(OsError::Timeout)` - Timeout expired
    /// * `Err(OsError::PendWouldBlock)` - Non-blocking and not available
    pub fn pend(&mut self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<OsSemCtr> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::OsNotRunning);
        }

        if self.obj_type != OsObjType::Sem {
            return Err(OsError::ObjType);
        }

        critical_section(|cs| {
            if self.count > 0 {
                self.count -= 1;
                return Ok(self.count);
            }

            if pend_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::PendWouldBlock);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
            let obj_ptr = &self.hdr as *const PendHeader as *const ();

            unsafe {
                pend::pend_block(
                    cs,
                    self.pend_list(),
                    cur_tcb_ptr,
                    OsPendOn::Semaphore,
                    obj_ptr,
                    timeout,
                );
            }

            sched::os_sched();

            let cur_tcb = unsafe { cur_tcb_ptr.as_ref() };
            pend::pend_result(cur_tcb).map(|_| self.count)
        })
    }

    /// Signal (post) the semaphore
    ///
    /// # Arguments
    /// * `opt` - Post options
    ///
    /// # Returns
    /// * `Ok(count)` - New count after post
    /// * `Err(OsError::SemOvf)` - Counter overflow
    pub fn post(&mut self, post_opt: OsOpt) -> OsResult<OsSemCtr> {
        if self.obj_type != OsObjType::Sem {
            return Err(OsError::ObjType);
        }

        critical_section(|_cs| {
            if self.pend_list().is_empty() {
                if self.count == OsSemCtr::MAX {
                    return Err(OsError::SemOvf);
                }
                self.count += 1;
                return Ok(self.count);
            }

            match pend::post_policy(post_opt) {
                PostPolicy::One => {
                    pend::unblock_one(self.pend_list(), crate::types::OsPendStatus::Ok);
                }
                PostPolicy::All => {
                    pend::unblock_all(self.pend_list(), crate::types::OsPendStatus::Ok);
                }
            }

            if !pend::suppress_sched(post_opt) && !is_isr_context() {
                sched::os_sched();
            }

            Ok(self.count)
        })
    }

    /// Abort the pend of one or all waiters without delivering a count.
    pub fn pend_abort(&mut self, opt: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::PendAbortIsr);
        }

        critical_section(|_cs| {
            if self.pend_list().is_empty() {
                return Err(OsError::PendAbortNone);
            }

            let woken = if opt & crate::types::opt::POST_ALL != 0 {
                pend::unblock_all(self.pend_list(), crate::types::OsPendStatus::Abort)
            } else {
                usize::from(pend::unblock_one(
                    self.pend_list(),
                    crate::types::OsPendStatus::Abort,
                ))
            };

            if woken > 0 {
                sched::os_sched();
            }

            Ok(woken)
        })
    }

    /// Delete the semaphore (spec §6 "create, delete, ..." for every
    /// primitive). With `opt::DEL_NO_PEND`, fails if a task is still
    /// waiting; with `opt::DEL_ALWAYS`, every waiter is unblocked with
    /// pend-status `Del` first. Returns the number of tasks woken.
    pub fn del(&mut self, del_opt: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        if self.obj_type != OsObjType::Sem {
            return Err(OsError::ObjType);
        }

        critical_section(|_cs| {
            if del_opt == opt::DEL_NO_PEND {
                if !self.pend_list().is_empty() {
                    return Err(OsError::ObjTaskWaiting);
                }
                self.obj_type = OsObjType::None;
                return Ok(0);
            }

            if del_opt != opt::DEL_ALWAYS {
                return Err(OsError::OptInvalid);
            }

            let woken = pend::unblock_all(self.pend_list(), crate::types::OsPendStatus::Del);
            self.obj_type = OsObjType::None;

            if woken > 0 {
                sched::os_sched();
            }

            Ok(woken)
        })
    }

    /// Get current semaphore count
    #[inline(always)]
    pub fn count(&self) -> OsSemCtr {
        self.count
    }

    /// Set semaphore count
    pub fn set(&mut self, count: OsSemCtr) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::AcceptIsr);
        }

        critical_section(|_cs| {
            self.count = count;
            Ok(())
        })
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new(0)
    }
}

unsafe impl Send for OsSem {}
unsafe impl Sync for OsSem {}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;

pub struct Semaphore {
    inner: UnsafeCell<OsSem>,
}

unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(count: OsSemCtr) -> Self {
        Semaphore {
            inner: UnsafeCell::new(OsSem::new(count)),
        }
    }

    pub fn create(&self, count: OsSemCtr, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(count, name) }
    }

    pub fn wait(&self, timeout: OsTick, opt: OsOpt) -> OsResult<OsSemCtr> {
        unsafe { (*self.inner.get()).pend(timeout, opt) }
    }

    pub fn signal(&self, opt: OsOpt) -> OsResult<OsSemCtr> {
        unsafe { (*self.inner.get()).post(opt) }
    }

    pub fn del(&self, del_opt: OsOpt) -> OsResult<usize> {
        unsafe { (*self.inner.get()).del(del_opt) }
    }

    #[inline]
    pub fn count(&self) -> OsSemCtr {
        unsafe { (*self.inner.get()).count() }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
