//! Mutex implementation with priority inheritance
//!
//! Mutexes provide mutual exclusion with automatic priority boosting to
//! prevent priority inversion (spec §4.6). A task may own several mutexes
//! at once; its effective (`current`) priority is always
//! `min(base_priority, min over owned mutexes of that mutex's highest
//! waiter priority)` (spec §8 invariant 4) — recomputed on every mutex
//! release, change-prio, pend-abort, and mutex delete.

use core::ptr::NonNull;

use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::pend::{self, PendHeader, PendList};
use crate::sched;
use crate::task::OsTcb;
use crate::types::{opt, OsNestingCtr, OsObjType, OsOpt, OsPendOn, OsPendStatus, OsPrio, OsTick};

/// Mutex with priority inheritance
#[repr(C)]
pub struct OsMutex {
    /// Common waitable-object header; must be first field.
    hdr: PendHeader,
    /// Object type marker
    obj_type: OsObjType,
    /// Task that owns the mutex
    owner: Option<NonNull<OsTcb>>,
    /// Nesting counter
    nesting_ctr: OsNestingCtr,
    /// Next mutex in the owner's owned-mutex group (singly linked, see
    /// `OsTcb::mutex_grp_head`).
    owner_next: Option<NonNull<OsMutex>>,
    /// Name for debugging
    #[cfg(feature = "defmt")]
    name: &'static str,
}

impl OsMutex {
    /// Create a new mutex
    pub const fn new() -> Self {
        OsMutex {
            hdr: PendHeader::new(),
            obj_type: OsObjType::Mutex,
            owner: None,
            nesting_ctr: 0,
            owner_next: None,
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Initialize the mutex
    pub fn create(&mut self, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Mutex;
            self.hdr.init();
            self.owner = None;
            self.nesting_ctr = 0;
            self.owner_next = None;
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

    /// Thread `self` onto `owner`'s owned-mutex group (head insertion).
    fn link_into_owner(&mut self, owner: NonNull<OsTcb>) {
        let owner_ref = unsafe { &mut *owner.as_ptr() };
        self.owner_next =
            NonNull::new(owner_ref.mutex_grp_head as *mut OsMutex);
        owner_ref.mutex_grp_head = self as *mut OsMutex as *mut ();
    }

    /// Unthread `self` from `owner`'s owned-mutex group.
    fn unlink_from_owner(&mut self, owner: NonNull<OsTcb>) {
        let owner_ref = unsafe { &mut *owner.as_ptr() };
        let self_ptr = self as *mut OsMutex;

        let mut cur = NonNull::new(owner_ref.mutex_grp_head as *mut OsMutex);
        let mut prev: Option<NonNull<OsMutex>> = None;

        while let Some(cur_ptr) = cur {
            if cur_ptr.as_ptr() == self_ptr {
                match prev {
                    Some(p) => unsafe { (*p.as_ptr()).owner_next = self.owner_next },
                    None => {
                        owner_ref.mutex_grp_head =
                            self.owner_next.map_or(core::ptr::null_mut(), |n| n.as_ptr() as *mut ());
                    }
                }
                self.owner_next = None;
                return;
            }
            prev = cur;
            cur = unsafe { cur_ptr.as_ref() }.owner_next;
        }
    }

    /// Acquire the mutex
    ///
    /// If the mutex is owned by a lower-priority task, the owner's
    /// priority is temporarily boosted to prevent priority inversion.
    pub fn pend(&mut self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::OsNotRunning);
        }

        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::ObjType);
        }

        critical_section(|cs| {
            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;

            if self.owner.is_none() {
                self.owner = Some(cur_tcb_ptr);
                self.nesting_ctr = 1;
                self.link_into_owner(cur_tcb_ptr);
                return Ok(());
            }

            if self.owner == Some(cur_tcb_ptr) {
                if self.nesting_ctr == OsNestingCtr::MAX {
                    return Err(OsError::MutexOvf);
                }
                self.nesting_ctr += 1;
                return Ok(());
            }

            if pend_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::PendWouldBlock);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            let cur_prio = unsafe { cur_tcb_ptr.as_ref() }.prio;
            let owner_ptr = self.owner.unwrap();

            // Priority inheritance: waiting raises the owner's priority
            // up front; the owner's effective priority is recomputed in
            // full (across every mutex it owns) once it actually posts,
            // since by then other waiters may also be in play.
            if cur_prio < unsafe { owner_ptr.as_ref() }.prio {
                unsafe { boost_owner_prio(owner_ptr, cur_prio) };
            }

            let obj_ptr = &self.hdr as *const PendHeader as *const ();
            unsafe {
                pend::pend_block(
                    cs,
                    self.pend_list(),
                    cur_tcb_ptr,
                    OsPendOn::Mutex,
                    obj_ptr,
                    timeout,
                );
            }

            sched::os_sched();

            let cur_tcb = unsafe { cur_tcb_ptr.as_ref() };
            pend::pend_result(cur_tcb)
        })
    }

    /// Release the mutex
    ///
    /// If the current task's effective priority was boosted due to
    /// priority inheritance, it is recomputed (possibly all the way back
    /// to its base priority, possibly only partway if other owned
    /// mutexes still have higher-priority waiters).
    pub fn post(&mut self, post_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::AcceptIsr);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::OsNotRunning);
        }

        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::ObjType);
        }

        critical_section(|_cs| {
            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;

            if self.owner != Some(cur_tcb_ptr) {
                return Err(OsError::MutexNotOwner);
            }

            if self.nesting_ctr > 1 {
                self.nesting_ctr -= 1;
                return Ok(());
            }

            self.nesting_ctr = 0;
            self.unlink_from_owner(cur_tcb_ptr);
            self.owner = None;

            unsafe { recompute_effective_prio(cur_tcb_ptr) };

            if let Some(waiter_ptr) = self.pend_list().head() {
                self.pend_list().remove(waiter_ptr);
                unsafe { pend::unblock(waiter_ptr, OsPendStatus::Ok) };

                self.owner = Some(waiter_ptr);
                self.nesting_ctr = 1;
                self.link_into_owner(waiter_ptr);

                // The new owner may in turn need its priority boosted if
                // further (lower-priority-than-it) waiters remain — mirrors
                // the boost applied at pend time for any subsequent pender.
                if let Some(next_waiter) = self.pend_list().head() {
                    let next_prio = unsafe { next_waiter.as_ref() }.prio;
                    unsafe { boost_owner_prio(waiter_ptr, next_prio) };
                }

                if !pend::suppress_sched(post_opt) {
                    sched::os_sched();
                }
            }

            Ok(())
        })
    }

    /// Abort the pend of one or all waiters without transferring
    /// ownership, recomputing the (unaffected) owner's priority is not
    /// needed since the owner doesn't change — but a waiter leaving the
    /// pend list can itself have been the one keeping the owner boosted,
    /// so the owner's effective priority is recomputed regardless.
    pub fn pend_abort(&mut self, opt: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::PendAbortIsr);
        }

        critical_section(|_cs| {
            if self.pend_list().is_empty() {
                return Err(OsError::PendAbortNone);
            }

            let woken = if opt & crate::types::opt::POST_ALL != 0 {
                pend::unblock_all(self.pend_list(), OsPendStatus::Abort)
            } else {
                usize::from(pend::unblock_one(self.pend_list(), OsPendStatus::Abort))
            };

            if let Some(owner_ptr) = self.owner {
                unsafe { recompute_effective_prio(owner_ptr) };
            }

            if woken > 0 {
                sched::os_sched();
            }

            Ok(woken)
        })
    }

    /// Release bookkeeping identical to [`Self::post`], except callable
    /// from inside a critical section the caller already holds (no nested
    /// `critical_section()`) and without invoking the scheduler itself —
    /// used by [`crate::sync::condvar::OsCondVar::wait`] to release the
    /// mutex and block atomically (spec §4.10 "wait releases the mutex,
    /// pends on the condvar").
    pub(crate) fn release_for_condvar(&mut self, _cs: &CriticalSection) -> OsResult<()> {
        let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;

        if self.owner != Some(cur_tcb_ptr) {
            return Err(OsError::MutexNotOwner);
        }

        if self.nesting_ctr > 1 {
            self.nesting_ctr -= 1;
            return Ok(());
        }

        self.nesting_ctr = 0;
        self.unlink_from_owner(cur_tcb_ptr);
        self.owner = None;

        unsafe { recompute_effective_prio(cur_tcb_ptr) };

        if let Some(waiter_ptr) = self.pend_list().head() {
            self.pend_list().remove(waiter_ptr);
            unsafe { pend::unblock(waiter_ptr, OsPendStatus::Ok) };

            self.owner = Some(waiter_ptr);
            self.nesting_ctr = 1;
            self.link_into_owner(waiter_ptr);

            if let Some(next_waiter) = self.pend_list().head() {
                let next_prio = unsafe { next_waiter.as_ref() }.prio;
                unsafe { boost_owner_prio(waiter_ptr, next_prio) };
            }
        }

        Ok(())
    }

    /// Delete the mutex (spec §4.6 applies the same effective-priority
    /// recomputation here as pend-abort). With `opt::DEL_NO_PEND`, fails
    /// if a task is still waiting; with `opt::DEL_ALWAYS`, every waiter
    /// is unblocked with pend-status `Del` first and, if the mutex was
    /// owned, the (former) owner's inherited priority is dropped back to
    /// whatever its remaining owned mutexes still require. Returns the
    /// number of tasks woken.
    pub fn del(&mut self, del_opt: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::ObjType);
        }

        critical_section(|_cs| {
            if del_opt == opt::DEL_NO_PEND {
                if !self.pend_list().is_empty() {
                    return Err(OsError::ObjTaskWaiting);
                }
                if let Some(owner_ptr) = self.owner.take() {
                    self.unlink_from_owner(owner_ptr);
                }
                self.nesting_ctr = 0;
                self.obj_type = OsObjType::None;
                return Ok(0);
            }

            if del_opt != opt::DEL_ALWAYS {
                return Err(OsError::OptInvalid);
            }

            let woken = pend::unblock_all(self.pend_list(), OsPendStatus::Del);

            if let Some(owner_ptr) = self.owner.take() {
                self.unlink_from_owner(owner_ptr);
                self.nesting_ctr = 0;
                unsafe { recompute_effective_prio(owner_ptr) };
            }

            self.obj_type = OsObjType::None;

            if woken > 0 {
                sched::os_sched();
            }

            Ok(woken)
        })
    }

    /// Check if mutex is owned
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    /// Get owner's priority
    pub fn owner_prio(&self) -> Option<OsPrio> {
        self.owner.map(|ptr| unsafe { ptr.as_ref().prio })
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsMutex {}
unsafe impl Sync for OsMutex {}

/// Raise `owner`'s current priority to `new_prio` if that is higher
/// (numerically lower) than what it currently runs at, relinking it in
/// whatever list (ready or pend) its state puts it in.
///
/// # Safety
/// `owner` must be a live TCB.
unsafe fn boost_owner_prio(owner: NonNull<OsTcb>, new_prio: OsPrio) {
    unsafe {
        let owner_ref = &mut *owner.as_ptr();
        if new_prio >= owner_ref.prio {
            return;
        }
        if owner_ref.task_state == crate::types::OsTaskState::Ready {
            sched::os_rdy_list_change_prio(owner, new_prio);
        } else {
            owner_ref.prio = new_prio;
        }
    }
}

/// Recompute `task`'s effective priority as
/// `min(base_priority, min over owned mutexes of that mutex's highest
/// waiter priority)` (spec §8 invariant 4), relinking it at the new
/// priority if it changed. O(owned mutexes), per spec §9 design notes
/// ("the source uses linear scan").
///
/// # Safety
/// `task` must be a live TCB.
pub(crate) unsafe fn recompute_effective_prio(task: NonNull<OsTcb>) {
    unsafe {
        let task_ref = &mut *task.as_ptr();
        let mut new_prio = task_ref.base_prio;

        let mut cur = NonNull::new(task_ref.mutex_grp_head as *mut OsMutex);
        while let Some(mtx_ptr) = cur {
            let mtx = &*mtx_ptr.as_ptr();
            if let Some(head) = mtx.hdr.pend_list.head() {
                let head_prio = head.as_ref().prio;
                if head_prio < new_prio {
                    new_prio = head_prio;
                }
            }
            cur = mtx.owner_next;
        }

        if new_prio != task_ref.prio {
            if task_ref.task_state == crate::types::OsTaskState::Ready {
                sched::os_rdy_list_change_prio(task, new_prio);
            } else {
                task_ref.prio = new_prio;
            }
        }
    }
}

/// Release every mutex `task` owns, transferring ownership to each
/// mutex's highest-priority waiter (if any) exactly as `post()` would
/// (spec §4.6 "Delete-task-with-owned-mutexes"). Called by
/// [`crate::task::os_task_del`] before the TCB is torn down.
///
/// # Safety
/// `task` must be a live TCB about to be deleted (not re-scheduled).
pub(crate) unsafe fn release_owned_mutexes(task: NonNull<OsTcb>, _cs: &CriticalSection) {
    unsafe {
        let task_ref = &mut *task.as_ptr();

        loop {
            let mtx_ptr = match NonNull::new(task_ref.mutex_grp_head as *mut OsMutex) {
                Some(p) => p,
                None => break,
            };
            let mtx = &mut *mtx_ptr.as_ptr();

            mtx.unlink_from_owner(task);
            mtx.owner = None;
            mtx.nesting_ctr = 0;

            if let Some(waiter_ptr) = mtx.pend_list().head() {
                mtx.pend_list().remove(waiter_ptr);
                pend::unblock(waiter_ptr, OsPendStatus::Ok);

                mtx.owner = Some(waiter_ptr);
                mtx.nesting_ctr = 1;
                mtx.link_into_owner(waiter_ptr);

                if let Some(next_waiter) = mtx.pend_list().head() {
                    let next_prio = next_waiter.as_ref().prio;
                    boost_owner_prio(waiter_ptr, next_prio);
                }
            }
        }

        task_ref.prio = task_ref.base_prio;
    }
}

// ============ Safe Wrapper ============

use core::cell::UnsafeCell;
pub struct Mutex {
    inner: UnsafeCell<OsMutex>,
}

unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: UnsafeCell::new(OsMutex::new()),
        }
    }

    pub fn create(&self, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(name) }
    }

    pub fn lock(&self, timeout: OsTick, opt: OsOpt) -> OsResult<()> {
        unsafe { (*self.inner.get()).pend(timeout, opt) }
    }

    pub fn unlock(&self, opt: OsOpt) -> OsResult<()> {
        unsafe { (*self.inner.get()).post(opt) }
    }

    pub fn del(&self, del_opt: OsOpt) -> OsResult<usize> {
        unsafe { (*self.inner.get()).del(del_opt) }
    }

    /// See [`OsMutex::release_for_condvar`].
    pub(crate) fn release_for_condvar(&self, cs: &CriticalSection) -> OsResult<()> {
        unsafe { (*self.inner.get()).release_for_condvar(cs) }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        unsafe { (*self.inner.get()).is_owned() }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
