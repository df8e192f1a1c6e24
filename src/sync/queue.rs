//! Message queue implementation (C8, spec §4.8)
//!
//! Holds a bounded ring of message descriptors drawn from the global
//! [`crate::msg_pool`]. A post with no waiters buffers a descriptor
//! (FIFO or LIFO); a post with at least one waiter hands the message
//! directly to it without ever touching the pool's ring (spec §4.8
//! "never buffered in that case").

use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::msg_pool::{self, MsgHandle};
use crate::pend::{self, PendHeader, PendList, PostPolicy};
use crate::sched;
use crate::types::{opt, OsMsgSize, OsObjQty, OsObjType, OsOpt, OsPendOn, OsPendStatus, OsTick};

/// A received message, returned from `pend()`.
#[derive(Debug, Clone, Copy)]
pub struct Msg {
    pub ptr: *const (),
    pub size: OsMsgSize,
    pub ts: OsTick,
}

/// Message queue
#[repr(C)]
pub struct OsQ {
    hdr: PendHeader,
    obj_type: OsObjType,
    /// Bounded ring of checked-out pool descriptors, oldest at `out`.
    ring: [Option<MsgHandle>; Self::CAP],
    in_idx: usize,
    out_idx: usize,
    nbr_entries: OsObjQty,
    size: OsObjQty,
    #[cfg(feature = "defmt")]
    name: &'static str,
}

impl OsQ {
    /// Maximum buffered entries any single queue can hold; bounded by the
    /// shared pool size since every entry checks out one descriptor.
    const CAP: usize = crate::config::CFG_MSG_POOL_SIZE;

    pub const fn new() -> Self {
        OsQ {
            hdr: PendHeader::new(),
            obj_type: OsObjType::Queue,
            ring: [None; Self::CAP],
            in_idx: 0,
            out_idx: 0,
            nbr_entries: 0,
            size: 0,
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    pub fn create(&mut self, size: OsObjQty, _name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        if size as usize > Self::CAP {
            return Err(OsError::QMax);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Queue;
            self.hdr.init();
            self.ring = [None; Self::CAP];
            self.in_idx = 0;
            self.out_idx = 0;
            self.nbr_entries = 0;
            self.size = size;
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

    fn ring_push(&mut self, cs: &CriticalSection, handle: MsgHandle, post_opt: OsOpt) -> bool {
        if self.nbr_entries as usize >= self.size as usize {
            return false;
        }

        if post_opt & opt::POST_LIFO != 0 {
            self.out_idx = (self.out_idx + Self::CAP - 1) % Self::CAP;
            self.ring[self.out_idx] = Some(handle);
        } else {
            self.ring[self.in_idx] = Some(handle);
            self.in_idx = (self.in_idx + 1) % Self::CAP;
        }
        self.nbr_entries += 1;
        let _ = cs;
        true
    }

    fn ring_pop(&mut self) -> Option<MsgHandle> {
        if self.nbr_entries == 0 {
            return None;
        }
        let handle = self.ring[self.out_idx].take();
        self.out_idx = (self.out_idx + 1) % Self::CAP;
        self.nbr_entries -= 1;
        handle
    }

    /// Post a message. With no waiters, buffers it (error on full); with
    /// waiters, hands it directly to one (`Post1`) or all (`PostAll`).
    pub fn post(&mut self, ptr: *const (), size: OsMsgSize, post_opt: OsOpt) -> OsResult<()> {
        if self.obj_type != OsObjType::Queue {
            return Err(OsError::ObjType);
        }

        if ptr.is_null() {
            return Err(OsError::QPostNullPtr);
        }

        critical_section(|cs| {
            let ts = kernel::KERNEL.tick_get();

            if self.pend_list().is_empty() {
                let handle = msg_pool::get(cs, ptr, size, ts).ok_or(OsError::MsgPoolEmpty)?;
                if !self.ring_push(cs, handle, post_opt) {
                    msg_pool::put(cs, handle);
                    return Err(OsError::QFull);
                }
                return Ok(());
            }

            match pend::post_policy(post_opt) {
                PostPolicy::One => deliver_to(self.pend_list(), ptr, size, ts, OsPendStatus::Ok),
                PostPolicy::All => {
                    while !self.pend_list().is_empty() {
                        deliver_to(self.pend_list(), ptr, size, ts, OsPendStatus::Ok);
                    }
                }
            }

            if !pend::suppress_sched(post_opt) && !is_isr_context() {
                sched::os_sched();
            }

            Ok(())
        })
    }

    /// Wait for a message: returns the head of the buffered ring
    /// immediately if non-empty, otherwise blocks.
    pub fn pend(&mut self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<Msg> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::OsNotRunning);
        }

        if self.obj_type != OsObjType::Queue {
            return Err(OsError::ObjType);
        }

        critical_section(|cs| {
            if let Some(handle) = self.ring_pop() {
                let msg = Msg { ptr: handle.ptr, size: handle.size, ts: handle.ts };
                msg_pool::put(cs, handle);
                return Ok(msg);
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
                pend::pend_block(cs, self.pend_list(), cur_tcb_ptr, OsPendOn::Queue, obj_ptr, timeout);
            }

            sched::os_sched();

            let cur_tcb = unsafe { cur_tcb_ptr.as_ref() };
            pend::pend_result(cur_tcb)?;
            Ok(Msg { ptr: cur_tcb.msg_ptr, size: cur_tcb.msg_size, ts: cur_tcb.msg_ts })
        })
    }

    /// Discard all buffered messages, returning their count to the pool.
    pub fn flush(&mut self) -> OsResult<OsObjQty> {
        if is_isr_context() {
            return Err(OsError::FlushIsr);
        }

        critical_section(|cs| {
            let mut n = 0;
            while let Some(handle) = self.ring_pop() {
                msg_pool::put(cs, handle);
                n += 1;
            }
            Ok(n)
        })
    }

    /// Abort the pend of one or all waiters without delivering a message.
    pub fn pend_abort(&mut self, opt_bits: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::PendAbortIsr);
        }

        critical_section(|_cs| {
            if self.pend_list().is_empty() {
                return Err(OsError::PendAbortNone);
            }

            let woken = if opt_bits & opt::POST_ALL != 0 {
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

    /// Delete the queue. With `opt::DEL_NO_PEND`, fails if a task is
    /// still waiting; with `opt::DEL_ALWAYS`, every waiter is unblocked
    /// with pend-status `Del` first. Either way, buffered messages are
    /// returned to the pool. Returns the number of tasks woken.
    pub fn del(&mut self, del_opt: OsOpt) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        if self.obj_type != OsObjType::Queue {
            return Err(OsError::ObjType);
        }

        critical_section(|cs| {
            if del_opt == opt::DEL_NO_PEND {
                if !self.pend_list().is_empty() {
                    return Err(OsError::ObjTaskWaiting);
                }
                while let Some(handle) = self.ring_pop() {
                    msg_pool::put(cs, handle);
                }
                self.obj_type = OsObjType::None;
                return Ok(0);
            }

            if del_opt != opt::DEL_ALWAYS {
                return Err(OsError::OptInvalid);
            }

            let woken = pend::unblock_all(self.pend_list(), OsPendStatus::Del);
            while let Some(handle) = self.ring_pop() {
                msg_pool::put(cs, handle);
            }
            self.obj_type = OsObjType::None;

            if woken > 0 {
                sched::os_sched();
            }

            Ok(woken)
        })
    }

    #[inline]
    pub fn nbr_entries(&self) -> OsObjQty {
        self.nbr_entries
    }

    #[inline]
    pub fn size(&self) -> OsObjQty {
        self.size
    }
}

/// Remove the head waiter from `pend_list` and deliver `(ptr, size, ts)`
/// directly into its TCB fields, per spec §4.3 `Post`.
fn deliver_to(pend_list: &mut PendList, ptr: *const (), size: OsMsgSize, ts: OsTick, status: OsPendStatus) {
    if let Some(tcb_ptr) = pend_list.head() {
        pend_list.remove(tcb_ptr);
        unsafe {
            let tcb = &mut *tcb_ptr.as_ptr();
            tcb.msg_ptr = ptr;
            tcb.msg_size = size;
            tcb.msg_ts = ts;
            pend::unblock(tcb_ptr, status);
        }
    }
}

impl Default for OsQ {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsQ {}
unsafe impl Sync for OsQ {}

// ============ Safe wrapper ============

use core::cell::UnsafeCell;

pub struct Queue {
    inner: UnsafeCell<OsQ>,
}

unsafe impl Sync for Queue {}
unsafe impl Send for Queue {}

impl Queue {
    pub const fn new() -> Self {
        Queue { inner: UnsafeCell::new(OsQ::new()) }
    }

    pub fn create(&self, size: OsObjQty, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(size, name) }
    }

    pub fn post(&self, ptr: *const (), size: OsMsgSize, post_opt: OsOpt) -> OsResult<()> {
        unsafe { (*self.inner.get()).post(ptr, size, post_opt) }
    }

    pub fn pend(&self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<Msg> {
        unsafe { (*self.inner.get()).pend(timeout, pend_opt) }
    }

    pub fn flush(&self) -> OsResult<OsObjQty> {
        unsafe { (*self.inner.get()).flush() }
    }

    pub fn pend_abort(&self, opt_bits: OsOpt) -> OsResult<usize> {
        unsafe { (*self.inner.get()).pend_abort(opt_bits) }
    }

    pub fn del(&self, del_opt: OsOpt) -> OsResult<usize> {
        unsafe { (*self.inner.get()).del(del_opt) }
    }

    #[inline]
    pub fn nbr_entries(&self) -> OsObjQty {
        unsafe { (*self.inner.get()).nbr_entries() }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}
