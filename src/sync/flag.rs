//! Event flag group implementation (C8, spec §4.7)
//!
//! A flag group is a bitmask shared by any number of waiters, each
//! pending on its own mask and mode (Set-All/Set-Any/Clear-All/Clear-Any,
//! optionally Consume). `post()` scans the pend list in FIFO-within-
//! priority order, satisfying every waiter whose condition now holds in
//! one pass.

use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::pend::{self, PendHeader, PendList};
use crate::sched;
use crate::types::{opt, OsFlags, OsObjType, OsOpt, OsPendOn, OsPendStatus, OsTick};

/// Event flag group
#[repr(C)]
pub struct OsFlagGrp {
    hdr: PendHeader,
    obj_type: OsObjType,
    flags: OsFlags,
    #[cfg(feature = "defmt")]
    name: &'static str,
}

/// Decide whether `flags` satisfies a waiter's `(mask, wait_opt)`.
fn is_satisfied(flags: OsFlags, mask: OsFlags, wait_opt: OsOpt) -> bool {
    if wait_opt & opt::FLAG_SET_ALL != 0 {
        (flags & mask) == mask
    } else if wait_opt & opt::FLAG_SET_ANY != 0 {
        (flags & mask) != 0
    } else if wait_opt & opt::FLAG_CLR_ALL != 0 {
        (flags & mask) == 0
    } else {
        // FLAG_CLR_ANY
        (flags & mask) != mask
    }
}

/// The bits of `flags` that actually satisfied this waiter (what gets
/// recorded into `flags_rdy`, and cleared/set on Consume).
fn satisfying_bits(flags: OsFlags, mask: OsFlags, wait_opt: OsOpt) -> OsFlags {
    if wait_opt & (opt::FLAG_CLR_ALL | opt::FLAG_CLR_ANY) != 0 {
        mask & !flags
    } else {
        flags & mask
    }
}

impl OsFlagGrp {
    /// Create a new, zeroed flag group
    pub const fn new() -> Self {
        OsFlagGrp {
            hdr: PendHeader::new(),
            obj_type: OsObjType::Flag,
            flags: 0,
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    pub fn create(&mut self, initial_flags: OsFlags, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Flag;
            self.hdr.init();
            self.flags = initial_flags;
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

    /// Wait for `mask` under `wait_opt` (spec §4.7 pend modes). Returns
    /// the bits that satisfied the wait.
    pub fn pend(&mut self, mask: OsFlags, wait_opt: OsOpt, timeout: OsTick) -> OsResult<OsFlags> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::OsNotRunning);
        }

        if self.obj_type != OsObjType::Flag {
            return Err(OsError::ObjType);
        }

        if wait_opt & opt::FLAG_PEND_MASK == 0 {
            return Err(OsError::FlagPendOpt);
        }

        critical_section(|cs| {
            if is_satisfied(self.flags, mask, wait_opt) {
                let rdy = satisfying_bits(self.flags, mask, wait_opt);
                if wait_opt & opt::FLAG_CONSUME != 0 {
                    if wait_opt & (opt::FLAG_CLR_ALL | opt::FLAG_CLR_ANY) != 0 {
                        self.flags |= rdy;
                    } else {
                        self.flags &= !rdy;
                    }
                }
                return Ok(rdy);
            }

            if wait_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::PendWouldBlock);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
            let obj_ptr = &self.hdr as *const PendHeader as *const ();

            {
                let cur_tcb = unsafe { &mut *cur_tcb_ptr.as_ptr() };
                cur_tcb.flags_pend = mask;
                cur_tcb.flags_opt = wait_opt;
                cur_tcb.flags_rdy = 0;
            }

            unsafe {
                pend::pend_block(
                    cs,
                    self.pend_list(),
                    cur_tcb_ptr,
                    OsPendOn::Flag,
                    obj_ptr,
                    timeout,
                );
            }

            sched::os_sched();

            let cur_tcb = unsafe { cur_tcb_ptr.as_ref() };
            pend::pend_result(cur_tcb).map(|_| cur_tcb.flags_rdy)
        })
    }

    /// Set or clear `mask` (depending on `post_opt`) and wake every
    /// waiter now satisfied, in FIFO-within-priority order (spec §4.7).
    pub fn post(&mut self, mask: OsFlags, post_opt: OsOpt) -> OsResult<OsFlags> {
        if self.obj_type != OsObjType::Flag {
            return Err(OsError::ObjType);
        }

        if post_opt & (opt::FLAG_CLR_ALL | opt::FLAG_SET_ALL) == 0 {
            return Err(OsError::FlagInvalidOpt);
        }

        critical_section(|_cs| {
            if post_opt & opt::FLAG_CLR_ALL != 0 {
                self.flags &= !mask;
            } else {
                self.flags |= mask;
            }

            let mut woken = 0usize;
            let mut cur = self.pend_list().head();
            while let Some(tcb_ptr) = cur {
                let tcb_ref = unsafe { tcb_ptr.as_ref() };
                let next = tcb_ref.pend_next_ptr;
                let (w_mask, w_opt) = (tcb_ref.flags_pend, tcb_ref.flags_opt);

                if is_satisfied(self.flags, w_mask, w_opt) {
                    let rdy = satisfying_bits(self.flags, w_mask, w_opt);
                    if w_opt & opt::FLAG_CONSUME != 0 {
                        if w_opt & (opt::FLAG_CLR_ALL | opt::FLAG_CLR_ANY) != 0 {
                            self.flags |= rdy;
                        } else {
                            self.flags &= !rdy;
                        }
                    }

                    self.pend_list().remove(tcb_ptr);
                    unsafe {
                        (*tcb_ptr.as_ptr()).flags_rdy = rdy;
                        pend::unblock(tcb_ptr, OsPendStatus::Ok);
                    }
                    woken += 1;
                }

                cur = next;
            }

            if woken > 0 && !pend::suppress_sched(post_opt) && !is_isr_context() {
                sched::os_sched();
            }

            Ok(self.flags)
        })
    }

    /// Abort the pend of one or all waiters without satisfying their mask.
    pub fn pend_abort(&mut self, abort_opt: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::PendAbortIsr);
        }

        critical_section(|_cs| {
            if self.pend_list().is_empty() {
                return Err(OsError::PendAbortNone);
            }

            let woken = if abort_opt & opt::POST_ALL != 0 {
                pend::unblock_all(self.pend_list(), OsPendStatus::Abort)
            } else {
                usize::from(pend::unblock_one(self.pend_list(), OsPendStatus::Abort))
            };

            if woken > 0 {
                sched::os_sched();
            }

            Ok(woken)
        })
    }

    /// Delete the flag group. With `opt::DEL_NO_PEND`, fails if a task is
    /// still waiting; with `opt::DEL_ALWAYS`, every waiter is unblocked
    /// with pend-status `Del` first. Returns the number of tasks woken.
    pub fn del(&mut self, del_opt: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        if self.obj_type != OsObjType::Flag {
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

            let woken = pend::unblock_all(self.pend_list(), OsPendStatus::Del);
            self.obj_type = OsObjType::None;

            if woken > 0 {
                sched::os_sched();
            }

            Ok(woken)
        })
    }

    /// Current flag bits.
    #[inline(always)]
    pub fn flags(&self) -> OsFlags {
        self.flags
    }
}

impl Default for OsFlagGrp {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsFlagGrp {}
unsafe impl Sync for OsFlagGrp {}

// ============ Safe wrapper ============

use core::cell::UnsafeCell;

pub struct FlagGrp {
    inner: UnsafeCell<OsFlagGrp>,
}

unsafe impl Sync for FlagGrp {}
unsafe impl Send for FlagGrp {}

impl FlagGrp {
    pub const fn new() -> Self {
        FlagGrp {
            inner: UnsafeCell::new(OsFlagGrp::new()),
        }
    }

    pub fn create(&self, initial_flags: OsFlags, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(initial_flags, name) }
    }

    pub fn pend(&self, mask: OsFlags, wait_opt: OsOpt, timeout: OsTick) -> OsResult<OsFlags> {
        unsafe { (*self.inner.get()).pend(mask, wait_opt, timeout) }
    }

    pub fn post(&self, mask: OsFlags, post_opt: OsOpt) -> OsResult<OsFlags> {
        unsafe { (*self.inner.get()).post(mask, post_opt) }
    }

    pub fn pend_abort(&self, abort_opt: OsOpt) -> OsResult<usize> {
        unsafe { (*self.inner.get()).pend_abort(abort_opt) }
    }

    pub fn del(&self, del_opt: OsOpt) -> OsResult<usize> {
        unsafe { (*self.inner.get()).del(del_opt) }
    }

    #[inline]
    pub fn flags(&self) -> OsFlags {
        unsafe { (*self.inner.get()).flags() }
    }
}

impl Default for FlagGrp {
    fn default() -> Self {
        Self::new()
    }
}
