//! Task Control Block (TCB) definition
//!
//! The TCB contains all the information needed to manage a task.

use core::ptr::NonNull;

use crate::config::{CFG_TASK_Q_SIZE, CFG_TLS_NUM_SLOTS};
use crate::pend::PendHeader;
use crate::types::{
    OsFlags, OsMsgSize, OsNestingCtr, OsOpt, OsPendOn, OsPendStatus,
    OsPrio, OsSemCtr, OsStkElement, OsTaskState, OsTick,
};

/// A single buffered message in a per-task queue (spec §4.8 "task queues
/// are identical [to message queues] but embedded in each TCB").
#[derive(Debug, Clone, Copy)]
pub struct TaskMsg {
    pub ptr: *const (),
    pub size: OsMsgSize,
    pub ts: OsTick,
}

impl TaskMsg {
    const fn empty() -> Self {
        TaskMsg { ptr: core::ptr::null(), size: 0, ts: 0 }
    }
}

/// Small FIFO ring embedded in the TCB, drained/filled with plain array
/// indices rather than the global message-descriptor pool: the pool only
/// backs `sync::queue::OsQ`, whose waiters may be other tasks' TCBs.
#[derive(Debug)]
pub struct TaskMsgQ {
    buf: [TaskMsg; CFG_TASK_Q_SIZE],
    head: usize,
    len: usize,
}

impl TaskMsgQ {
    pub const fn new() -> Self {
        TaskMsgQ { buf: [TaskMsg::empty(); CFG_TASK_Q_SIZE], head: 0, len: 0 }
    }

    pub fn init(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == CFG_TASK_Q_SIZE
    }

    pub fn push_back(&mut self, msg: TaskMsg) -> bool {
        if self.is_full() {
            return false;
        }
        let idx = (self.head + self.len) % CFG_TASK_Q_SIZE;
        self.buf[idx] = msg;
        self.len += 1;
        true
    }

    pub fn pop_front(&mut self) -> Option<TaskMsg> {
        if self.is_empty() {
            return None;
        }
        let msg = self.buf[self.head];
        self.head = (self.head + 1) % CFG_TASK_Q_SIZE;
        self.len -= 1;
        Some(msg)
    }

    pub fn flush(&mut self) -> usize {
        let n = self.len;
        self.head = 0;
        self.len = 0;
        n
    }
}

impl Default for TaskMsgQ {
    fn default() -> Self {
        Self::new()
    }
}

/// Task Control Block
#[repr(C)]
pub struct OsTcb {
    // ============ Stack pointer ============
    /// Current stack pointer
    pub stk_ptr: *mut OsStkElement,

    // ============ Stack information ============
    /// Base of stack
    pub stk_base: *mut OsStkElement,
    /// Stack limit pointer
    pub stk_limit: *mut OsStkElement,
    /// Stack size in words
    pub stk_size: usize,

    // ============ Task identification ============
    /// Task name
    pub name: &'static str,

    // ============ Ready list links ============
    /// Next TCB in ready list
    pub next_ptr: Option<NonNull<OsTcb>>,
    /// Previous TCB in ready list
    pub prev_ptr: Option<NonNull<OsTcb>>,

    // ============ Pend list links ============
    /// Next TCB in pend list
    pub pend_next_ptr: Option<NonNull<OsTcb>>,
    /// Previous TCB in pend list
    pub pend_prev_ptr: Option<NonNull<OsTcb>>,
    /// Object this task is pending on
    pub pend_obj_ptr: *const (),
    /// What type of object the task is pending on
    pub pend_on: OsPendOn,
    /// Result of pend operation
    pub pend_status: OsPendStatus,

    // ============ Tick list links ============
    /// Next TCB in tick list
    pub tick_next_ptr: Option<NonNull<OsTcb>>,
    /// Previous TCB in tick list
    pub tick_prev_ptr: Option<NonNull<OsTcb>>,
    /// Delta (not absolute remaining) from the preceding tick-list node;
    /// the prefix sum from the list head up to and including this node
    /// is this task's actual remaining ticks (spec §3 "Tick delta list").
    pub tick_remain: OsTick,
    /// Tick-counter value the previous periodic-delay deadline was
    /// computed from (spec §3 "previous tick value for periodic delays",
    /// §4.2 "the base used for the next insertion is the prior deadline").
    pub dly_periodic_base: OsTick,

    // ============ Priority ============
    /// Current priority
    pub prio: OsPrio,
    /// Base priority
    pub base_prio: OsPrio,

    // ============ State ============
    /// Current task state
    pub task_state: OsTaskState,
    /// Task options
    pub opt: OsOpt,

    // ============ Suspend ============
    /// Suspend nesting counter
    pub suspend_ctr: OsNestingCtr,

    // ============ Time slicing ============
    /// Time quanta for this task
    pub time_quanta: OsTick,
    /// Remaining time quanta
    pub time_quanta_ctr: OsTick,

    // ============ Task semaphore ============
    /// Task-specific semaphore counter
    pub sem_ctr: OsSemCtr,

    // ============ Event flags ============
    /// Flags being waited for
    pub flags_pend: OsFlags,
    /// Flags that made the task ready
    pub flags_rdy: OsFlags,
    /// Flag options
    pub flags_opt: OsOpt,

    // ============ Message ============
    /// Message pointer
    pub msg_ptr: *const (),
    /// Message size
    pub msg_size: OsMsgSize,
    /// Message timestamp (tick count at post time)
    pub msg_ts: OsTick,

    // ============ Mutex priority inheritance ============
    /// Head of the singly linked list of mutexes owned by this task.
    /// Opaque (`sync::mutex::OsMutex` threads itself via its own
    /// `owner_next` field) to keep `core::task` free of a dependency on
    /// `sync`.
    pub mutex_grp_head: *mut (),

    // ============ Task-local storage ============
    pub tls: [usize; CFG_TLS_NUM_SLOTS],

    // ============ Per-task message queue ============
    pub task_q: TaskMsgQ,

    // ============ Per-task semaphore/queue pend headers ============
    /// Single-waiter pend header for [`crate::task::os_task_sem_pend`] —
    /// the only task that can ever be linked here is this TCB itself.
    /// A full [`PendHeader`] (not a bare `PendList`) so that
    /// `pend_obj_ptr`/`unlink_from_pend_object` can treat it exactly like
    /// any other waitable object's header.
    pub task_sem_pend: PendHeader,
    /// Single-waiter pend header for [`crate::task::os_task_q_pend`].
    pub task_q_pend: PendHeader,

    // ============ Task entry point ============
    /// Task function address
    pub task_entry_addr: u32,
    /// Task argument
    pub task_entry_arg: *mut (),

    // ============ Extension pointer ============
    /// User-defined extension data
    pub ext_ptr: *mut (),
}

impl OsTcb {
    /// Create a new, uninitialized TCB
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_limit: core::ptr::null_mut(),
            stk_size: 0,
            
            name: "",
            
            next_ptr: None,
            prev_ptr: None,
            
            pend_next_ptr: None,
            pend_prev_ptr: None,
            pend_obj_ptr: core::ptr::null(),
            pend_on: OsPendOn::Nothing,
            pend_status: OsPendStatus::Ok,
            
            tick_next_ptr: None,
            tick_prev_ptr: None,
            tick_remain: 0,
            dly_periodic_base: 0,
            
            prio: 0,
            base_prio: 0,
            
            task_state: OsTaskState::Ready,
            opt: 0,
            
            suspend_ctr: 0,
            
            time_quanta: 0,
            time_quanta_ctr: 0,
            
            sem_ctr: 0,
            
            flags_pend: 0,
            flags_rdy: 0,
            flags_opt: 0,
            
            msg_ptr: core::ptr::null(),
            msg_size: 0,
            msg_ts: 0,
            
            mutex_grp_head: core::ptr::null_mut(),

            tls: [0; CFG_TLS_NUM_SLOTS],
            task_q: TaskMsgQ::new(),

            task_sem_pend: PendHeader::new(),
            task_q_pend: PendHeader::new(),

            task_entry_addr: 0,
            task_entry_arg: core::ptr::null_mut(),

            ext_ptr: core::ptr::null_mut(),
        }
    }

    /// Initialize TCB to default values
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// Check if task is ready to run
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.task_state == OsTaskState::Ready
    }

    /// Check if task is pending
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(
            self.task_state,
            OsTaskState::Pend | OsTaskState::PendTimeout |
            OsTaskState::PendSuspended | OsTaskState::PendTimeoutSuspended
        )
    }

    /// Check if task is suspended
    #[inline]
    pub fn is_suspended(&self) -> bool {
        matches!(
            self.task_state,
            OsTaskState::Suspended | OsTaskState::DelayedSuspended |
            OsTaskState::PendSuspended | OsTaskState::PendTimeoutSuspended
        )
    }

    /// Check if task is delayed
    #[inline]
    pub fn is_delayed(&self) -> bool {
        matches!(
            self.task_state,
            OsTaskState::Delayed | OsTaskState::DelayedSuspended
        )
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}
