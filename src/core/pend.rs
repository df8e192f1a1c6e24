//! Generic pend/post core (C5)
//!
//! Every blocking primitive (semaphore, mutex, event flag group, message
//! queue, task queue, timer condition variable) funnels its block/unblock
//! dance through this module instead of re-implementing it, per spec §4.3.
//!
//! Waitable objects that can be pended upon embed a [`PendHeader`] as their
//! first field (`#[repr(C)]`), so a type-erased pointer to the header is
//! also a valid pointer to the object. The `on_unlink` hook lets a
//! specific object (only the mutex needs this, for priority-inheritance
//! recomputation) react when one of its waiters is removed without going
//! through its own `post()` — i.e. on timeout or pend-abort.

use core::ptr::NonNull;

use crate::critical::CriticalSection;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{opt, OsOpt, OsPendOn, OsPendStatus, OsTaskState, OsTick};

/// Priority-ordered wait queue of tasks blocked on a single waitable
/// object. Higher priority (numerically lower) sits closer to the head;
/// ties are broken FIFO.
#[derive(Debug)]
pub struct PendList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl PendList {
    pub const fn new() -> Self {
        PendList { head: None, tail: None }
    }

    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline(always)]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Insert `tcb` in priority order (ties broken FIFO).
    pub fn insert_by_prio(&mut self, tcb: NonNull<OsTcb>) {
        let prio = unsafe { tcb.as_ref() }.prio;

        let mut prev: Option<NonNull<OsTcb>> = None;
        let mut cur = self.head;

        while let Some(cur_ptr) = cur {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if prio < cur_ref.prio {
                break;
            }
            prev = cur;
            cur = cur_ref.pend_next_ptr;
        }

        let tcb_mut = unsafe { &mut *tcb.as_ptr() };
        tcb_mut.pend_prev_ptr = prev;
        tcb_mut.pend_next_ptr = cur;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).pend_next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }
        match cur {
            Some(c) => unsafe { (*c.as_ptr()).pend_prev_ptr = Some(tcb) },
            None => self.tail = Some(tcb),
        }
    }

    /// Remove a specific TCB from the list.
    pub fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.pend_prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).pend_next_ptr = tcb_ref.pend_next_ptr },
            None => self.head = tcb_ref.pend_next_ptr,
        }
        match tcb_ref.pend_next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).pend_prev_ptr = tcb_ref.pend_prev_ptr },
            None => self.tail = tcb_ref.pend_prev_ptr,
        }

        tcb_ref.pend_prev_ptr = None;
        tcb_ref.pend_next_ptr = None;
    }
}

impl Default for PendList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for PendList {}
unsafe impl Sync for PendList {}

/// Common header every waitable kernel object embeds as its first field.
///
/// Type-erasing a `*mut SomeObject` down to `*mut PendHeader` and back is
/// sound because `#[repr(C)]` guarantees the header sits at offset 0.
#[repr(C)]
pub struct PendHeader {
    pub pend_list: PendList,
    /// Invoked with a pointer to the owning object (== pointer to this
    /// header) whenever a waiter is unlinked by the tick list or
    /// `PendAbort` rather than by the object's own `post()`.
    pub on_unlink: Option<fn(*mut ())>,
}

impl PendHeader {
    pub const fn new() -> Self {
        Self { pend_list: PendList::new(), on_unlink: None }
    }

    pub fn init(&mut self) {
        self.pend_list.init();
        self.on_unlink = None;
    }
}

impl Default for PendHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Post policy decoded from a caller's opt bits (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPolicy {
    /// Wake only the highest-priority waiter.
    One,
    /// Wake every waiter (broadcast).
    All,
}

#[inline]
pub fn post_policy(post_opt: OsOpt) -> PostPolicy {
    if post_opt & opt::POST_ALL != 0 {
        PostPolicy::All
    } else {
        PostPolicy::One
    }
}

#[inline]
pub fn suppress_sched(post_opt: OsOpt) -> bool {
    post_opt & opt::POST_NO_SCHED != 0
}

/// Block the current task on `pend_list`, linking it into the tick list
/// too when `timeout > 0`. Requires the critical section held; does not
/// itself invoke the scheduler (the caller does, once outside the
/// critical-section closure scope it needs).
///
/// # Safety
/// `cur_tcb_ptr` must be the currently running task and not already
/// linked into any ready/pend/tick list.
pub unsafe fn pend_block(
    _cs: &CriticalSection,
    pend_list: &mut PendList,
    cur_tcb_ptr: NonNull<OsTcb>,
    pend_on: OsPendOn,
    obj_ptr: *const (),
    timeout: OsTick,
) {
    unsafe {
        sched::os_rdy_list_remove(cur_tcb_ptr);

        let cur_tcb = &mut *cur_tcb_ptr.as_ptr();
        cur_tcb.pend_on = pend_on;
        cur_tcb.pend_status = OsPendStatus::Ok;
        cur_tcb.pend_obj_ptr = obj_ptr;

        pend_list.insert_by_prio(cur_tcb_ptr);

        if timeout > 0 {
            cur_tcb.task_state = OsTaskState::PendTimeout;
            kernel::tick_list_insert(cur_tcb_ptr, timeout);
        } else {
            cur_tcb.task_state = OsTaskState::Pend;
        }
    }
}

/// Translate a task's pend-status, after it resumes from `pend_block`,
/// into the caller's `OsResult`.
pub fn pend_result(tcb: &OsTcb) -> OsResult<()> {
    match tcb.pend_status {
        OsPendStatus::Ok => Ok(()),
        OsPendStatus::Timeout => Err(OsError::Timeout),
        OsPendStatus::Abort => Err(OsError::PendAbort),
        OsPendStatus::Del => Err(OsError::ObjDel),
    }
}

/// Unblock a task that has ALREADY been unlinked from its pend list:
/// clears pend bookkeeping, removes it from the tick list if present, and
/// transitions it to Ready (or stays Suspended if it was pend+suspended).
///
/// # Safety
/// `tcb_ptr` must not currently be linked into any pend list.
pub unsafe fn unblock(tcb_ptr: NonNull<OsTcb>, status: OsPendStatus) {
    unsafe {
        let tcb = &mut *tcb_ptr.as_ptr();

        if matches!(
            tcb.task_state,
            OsTaskState::PendTimeout | OsTaskState::PendTimeoutSuspended
        ) {
            kernel::tick_list_remove(tcb_ptr);
        }

        tcb.pend_on = OsPendOn::Nothing;
        tcb.pend_status = status;
        tcb.pend_obj_ptr = core::ptr::null();
        tcb.tick_remain = 0;

        match tcb.task_state {
            OsTaskState::PendSuspended | OsTaskState::PendTimeoutSuspended => {
                tcb.task_state = OsTaskState::Suspended;
            }
            _ => {
                tcb.task_state = OsTaskState::Ready;
                sched::os_rdy_list_insert(tcb_ptr);
            }
        }
    }
}

/// Unlink and unblock every waiter currently on `pend_list` with the
/// given pend-status. Used both for `PostAll` (status `Ok`) and for
/// "abort all" (status `Abort`/`Del`). Returns the count woken (spec §8
/// "Pend-abort specificity", "abort all" case).
pub fn unblock_all(pend_list: &mut PendList, status: OsPendStatus) -> usize {
    let mut count = 0usize;
    while let Some(head) = pend_list.head() {
        pend_list.remove(head);
        unsafe { unblock(head, status) };
        count += 1;
    }
    count
}

/// Unlink and unblock only the head (highest-priority) waiter of
/// `pend_list` with the given pend-status. Used both for `Post1` (status
/// `Ok`) and for "abort 1" (status `Abort`). Returns `true` if a waiter
/// was woken.
pub fn unblock_one(pend_list: &mut PendList, status: OsPendStatus) -> bool {
    match pend_list.head() {
        Some(head) => {
            pend_list.remove(head);
            unsafe { unblock(head, status) };
            true
        }
        None => false,
    }
}

/// Unlink a task from whatever waitable object it is pending on, via the
/// type-erased [`PendHeader`] stored at `pend_obj_ptr`, and run that
/// object's `on_unlink` hook (mutexes use this to recompute the owner's
/// inherited priority). Used by the tick list when a timeout expires.
///
/// # Safety
/// `tcb.pend_obj_ptr`, if non-null, must point at a live `PendHeader`.
pub unsafe fn unlink_from_pend_object(tcb_ptr: NonNull<OsTcb>) {
    unsafe {
        let tcb = &mut *tcb_ptr.as_ptr();
        let hdr_ptr = tcb.pend_obj_ptr as *mut PendHeader;

        if let Some(hdr_ptr) = core::ptr::NonNull::new(hdr_ptr) {
            let hdr = &mut *hdr_ptr.as_ptr();
            hdr.pend_list.remove(tcb_ptr);
            if let Some(cb) = hdr.on_unlink {
                cb(hdr_ptr.as_ptr() as *mut ());
            }
        }
    }
}
