//! Tick delta list (C4)
//!
//! Every task waiting on a timeout sits on one shared, doubly linked list
//! ordered by absolute deadline. Rather than storing each task's absolute
//! deadline, a node stores the *delta* between its deadline and the node
//! before it (the head's delta is relative to "now"). Advancing the clock
//! by `n` ticks then only ever touches the head of the list, no matter how
//! many tasks are waiting — this replaces the bucket/tick-wheel scheme,
//! which pays the same O(1) insert/advance only by committing up front to
//! a fixed wheel size that bounds the longest expressible delay.

use core::ptr::NonNull;

use crate::pend;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{OsPendStatus, OsTaskState, OsTick};

/// Delta-ordered list of tasks with a pending delay or pend-timeout.
#[derive(Debug)]
pub struct TickList {
    head: Option<NonNull<OsTcb>>,
}

impl TickList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    pub fn init(&mut self) {
        self.head = None;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Delta from now to the head's deadline, used by the dynamic-tick
    /// port hook to reprogram the next hardware timeout.
    #[inline]
    pub fn head_delta(&self) -> Option<OsTick> {
        self.head.map(|h| unsafe { (*h.as_ptr()).tick_remain })
    }

    /// Insert `tcb`, due in `delta` ticks from now.
    ///
    /// # Safety
    /// `tcb` must not already be linked into this list.
    pub unsafe fn insert(&mut self, tcb: NonNull<OsTcb>, mut delta: OsTick) {
        unsafe {
            let mut prev: Option<NonNull<OsTcb>> = None;
            let mut cur = self.head;

            while let Some(cur_ptr) = cur {
                let cur_ref = &mut *cur_ptr.as_ptr();
                if delta < cur_ref.tick_remain {
                    cur_ref.tick_remain -= delta;
                    break;
                }
                delta -= cur_ref.tick_remain;
                prev = cur;
                cur = cur_ref.tick_next_ptr;
            }

            let tcb_ref = &mut *tcb.as_ptr();
            tcb_ref.tick_remain = delta;
            tcb_ref.tick_prev_ptr = prev;
            tcb_ref.tick_next_ptr = cur;

            match prev {
                Some(p) => (*p.as_ptr()).tick_next_ptr = Some(tcb),
                None => self.head = Some(tcb),
            }
            if let Some(c) = cur {
                (*c.as_ptr()).tick_prev_ptr = Some(tcb);
            }
        }
    }

    /// Unlink `tcb`, folding its remaining delta into its successor so
    /// every later deadline is unaffected.
    ///
    /// # Safety
    /// `tcb` must currently be linked into this list.
    pub unsafe fn remove(&mut self, tcb: NonNull<OsTcb>) {
        unsafe {
            let tcb_ref = &mut *tcb.as_ptr();

            if let Some(next) = tcb_ref.tick_next_ptr {
                (*next.as_ptr()).tick_remain += tcb_ref.tick_remain;
            }

            match tcb_ref.tick_prev_ptr {
                Some(prev) => (*prev.as_ptr()).tick_next_ptr = tcb_ref.tick_next_ptr,
                None => self.head = tcb_ref.tick_next_ptr,
            }
            if let Some(next) = tcb_ref.tick_next_ptr {
                (*next.as_ptr()).tick_prev_ptr = tcb_ref.tick_prev_ptr;
            }

            tcb_ref.tick_next_ptr = None;
            tcb_ref.tick_prev_ptr = None;
            tcb_ref.tick_remain = 0;
        }
    }

    /// Advance the clock by `n` ticks, waking every task whose deadline
    /// has now elapsed.
    ///
    /// Delayed tasks (`Delayed`/`DelayedSuspended`) go straight to ready
    /// (or stay suspended). Pend-timeout tasks are also unlinked from
    /// whatever object they were pending on and given `PendStatus::Timeout`.
    pub fn advance(&mut self, mut n: OsTick) {
        while n > 0 {
            let head = match self.head {
                Some(h) => h,
                None => return,
            };

            let head_remain = unsafe { (*head.as_ptr()).tick_remain };
            if n < head_remain {
                unsafe { (*head.as_ptr()).tick_remain -= n };
                return;
            }
            n -= head_remain;

            // `head`'s remaining delta is now 0, so unlinking it folds
            // nothing into its successor; reuse `remove` for that and to
            // keep the bookkeeping in one place.
            unsafe { self.remove(head) };
            unsafe { expire(head) };
        }
    }
}

impl Default for TickList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for TickList {}
unsafe impl Sync for TickList {}

/// Transition a task whose tick-list deadline has just elapsed.
///
/// `tcb` has already been unlinked from this tick list by the caller.
/// This only handles pend-object unlinking and the task-state
/// transition; it does not go through [`pend::unblock`], which would
/// try (incorrectly) to remove `tcb` from the tick list a second time.
unsafe fn expire(tcb: NonNull<OsTcb>) {
    unsafe {
        let tcb_ref = &mut *tcb.as_ptr();

        match tcb_ref.task_state {
            OsTaskState::PendTimeout | OsTaskState::PendTimeoutSuspended => {
                pend::unlink_from_pend_object(tcb);

                tcb_ref.pend_on = crate::types::OsPendOn::Nothing;
                tcb_ref.pend_status = OsPendStatus::Timeout;
                tcb_ref.pend_obj_ptr = core::ptr::null();

                if tcb_ref.task_state == OsTaskState::PendTimeoutSuspended {
                    tcb_ref.task_state = OsTaskState::Suspended;
                } else {
                    tcb_ref.task_state = OsTaskState::Ready;
                    sched::os_rdy_list_insert(tcb);
                }
            }
            OsTaskState::DelayedSuspended => {
                tcb_ref.task_state = OsTaskState::Suspended;
            }
            _ => {
                tcb_ref.task_state = OsTaskState::Ready;
                sched::os_rdy_list_insert(tcb);
            }
        }
    }
}
