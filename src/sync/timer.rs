//! Software timer subsystem (C10, spec §4.10)
//!
//! Ports `original_source/Source/os_tmr.c`'s design: a dedicated internal
//! timer task owns a delta list of [`OsTmr`] objects, separate from the
//! task tick list in [`crate::tick`] (different node type, same delta-list
//! shape). The list is serialized by an internal mutex (`OS_TmrLock`) and a
//! condition variable ([`crate::sync::condvar::OsCondVar`]) signals the
//! timer task whenever the list head's deadline changes, so it can
//! reprogram its wait instead of polling.

use core::ptr::NonNull;

use crate::config::{CFG_PRIO_TMR_TASK, CFG_TMR_TASK_STK_SIZE};
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::sync::condvar::OsCondVar;
use crate::sync::mutex::Mutex;
use crate::types::{opt, OsOpt, OsTick, OsTmrOpt, OsTmrState};

/// Timer callback: invoked with a pointer to the timer that fired and its
/// stored (or stop-time override) argument. May freely call any timer API
/// on `self` or any other timer — the lock is held for the duration and
/// the condvar handles reentrancy (spec §4.10).
pub type OsTmrCallback = fn(*mut OsTmr, *mut ());

/// A software timer (spec §3 "Software timer").
#[repr(C)]
pub struct OsTmr {
    name: &'static str,
    callback: Option<OsTmrCallback>,
    callback_arg: *mut (),
    /// Initial delay, in ticks (spec §4.10 "Create initializes fields").
    dly: OsTick,
    /// Repeat period, in ticks; 0 for one-shot.
    period: OsTick,
    /// Delta from the preceding node in the timer delta list.
    remain: OsTick,
    state: OsTmrState,
    opt: OsTmrOpt,
    next: Option<NonNull<OsTmr>>,
    prev: Option<NonNull<OsTmr>>,
}

unsafe impl Send for OsTmr {}
unsafe impl Sync for OsTmr {}

impl OsTmr {
    pub const fn new() -> Self {
        OsTmr {
            name: "",
            callback: None,
            callback_arg: core::ptr::null_mut(),
            dly: 0,
            period: 0,
            remain: 0,
            state: OsTmrState::Unused,
            opt: OsTmrOpt::OneShot,
            next: None,
            prev: None,
        }
    }

    /// Current state (spec §6 "timer state_get").
    #[inline(always)]
    pub fn state(&self) -> OsTmrState {
        self.state
    }
}

impl Default for OsTmr {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Timer delta list ============

/// Delta-ordered list of active (`Running`) timers, shaped exactly like
/// [`crate::tick::TickList`] but keyed on [`OsTmr`] rather than task TCBs,
/// since a task waiting on a delay and a timer counting down are
/// conceptually the same structure with different payloads (spec §9).
struct TmrList {
    head: Option<NonNull<OsTmr>>,
}

impl TmrList {
    const fn new() -> Self {
        TmrList { head: None }
    }

    /// Insert `tmr`, due in `delta` ticks from now. Returns `true` if it
    /// became the new head (the timer task's wait deadline must be woken
    /// up to account for it).
    fn insert(&mut self, tmr: NonNull<OsTmr>, mut delta: OsTick) -> bool {
        let mut prev: Option<NonNull<OsTmr>> = None;
        let mut cur = self.head;

        while let Some(cur_ptr) = cur {
            let cur_ref = unsafe { &mut *cur_ptr.as_ptr() };
            if delta < cur_ref.remain {
                cur_ref.remain -= delta;
                break;
            }
            delta -= cur_ref.remain;
            prev = cur;
            cur = cur_ref.next;
        }

        let t = unsafe { &mut *tmr.as_ptr() };
        t.remain = delta;
        t.prev = prev;
        t.next = cur;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).next = Some(tmr) },
            None => self.head = Some(tmr),
        }
        if let Some(c) = cur {
            unsafe { (*c.as_ptr()).prev = Some(tmr) };
        }

        prev.is_none()
    }

    /// Unlink `tmr`, folding its remaining delta into its successor.
    /// Returns `true` if `tmr` was the head (the next-deadline may have
    /// changed).
    fn remove(&mut self, tmr: NonNull<OsTmr>) -> bool {
        let t = unsafe { &mut *tmr.as_ptr() };
        let was_head = t.prev.is_none();

        if let Some(next) = t.next {
            unsafe { (*next.as_ptr()).remain += t.remain };
        }
        match t.prev {
            Some(p) => unsafe { (*p.as_ptr()).next = t.next },
            None => self.head = t.next,
        }
        if let Some(next) = t.next {
            unsafe { (*next.as_ptr()).prev = t.prev };
        }

        t.next = None;
        t.prev = None;
        t.remain = 0;
        was_head
    }

    #[inline]
    fn head_delta(&self) -> Option<OsTick> {
        self.head.map(|h| unsafe { (*h.as_ptr()).remain })
    }

    /// Total ticks remaining for `tmr` (prefix sum up to and including
    /// it), or `0` if it is not currently linked.
    fn remain_of(&self, tmr: NonNull<OsTmr>) -> OsTick {
        let mut total: OsTick = 0;
        let mut cur = self.head;
        while let Some(cur_ptr) = cur {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            total = total.wrapping_add(cur_ref.remain);
            if cur_ptr == tmr {
                return total;
            }
            cur = cur_ref.next;
        }
        0
    }

    /// Advance the clock by `n` ticks. Two-stage, as `OS_TmrTask` does in
    /// the original source: fold the elapsed ticks down the chain,
    /// popping and firing every head whose remaining delta reaches zero
    /// (re-linking periodic timers for their next period) before moving
    /// on to whatever ticks are left.
    fn advance(&mut self, mut n: OsTick) {
        while n > 0 {
            let head = match self.head {
                Some(h) => h,
                None => return,
            };

            let head_remain = unsafe { (*head.as_ptr()).remain };
            if n < head_remain {
                unsafe { (*head.as_ptr()).remain -= n };
                return;
            }
            n -= head_remain;

            self.remove(head);
            self.fire(head);
        }
    }

    /// Transition an expired timer to `Timeout`, run its callback, then
    /// either re-link it (periodic) or leave it `Completed` (one-shot) —
    /// unless the callback itself already stopped, deleted, or restarted
    /// it, in which case its state speaks for itself (spec §4.10).
    fn fire(&mut self, tmr: NonNull<OsTmr>) {
        let t = unsafe { &mut *tmr.as_ptr() };
        t.state = OsTmrState::Timeout;

        if let Some(cb) = t.callback {
            cb(tmr.as_ptr(), t.callback_arg);
        }

        let t = unsafe { &mut *tmr.as_ptr() };
        if t.state == OsTmrState::Timeout {
            if t.opt == OsTmrOpt::Periodic && t.period > 0 {
                t.state = OsTmrState::Running;
                self.insert(tmr, t.period);
            } else {
                t.state = OsTmrState::Completed;
            }
        }
    }
}

/// Global timer delta list, guarded the same way [`crate::kernel::SCHED`]
/// is (short critical sections around each mutation) — `OS_TMR_LOCK` below
/// additionally serializes the create/start/stop/del/set API at the
/// task level so a caller's multi-field update is atomic end to end.
static TMR_LIST: CsCell<TmrList> = CsCell::new(TmrList::new());

/// `OS_TmrLock`/`OS_TmrUnlock` (spec §4.10): the crate's own `Mutex`,
/// reused rather than hand-rolled, exactly as the module's design note
/// prescribes.
static TMR_LOCK: Mutex = Mutex::new();

/// Signaled whenever the list head's deadline changes (spec §4.10
/// "signaled ... whenever the list head's deadline changes").
static TMR_COND: CsCell<OsCondVar> = CsCell::new(OsCondVar::new());

static mut TMR_TASK_TCB: crate::task::OsTcb = crate::task::OsTcb::new();
static mut TMR_TASK_STK: [crate::types::OsStkElement; CFG_TMR_TASK_STK_SIZE] =
    [0; CFG_TMR_TASK_STK_SIZE];

/// Timer task main loop (spec §4.10 "Timer task main loop"): take the
/// mutex once; thereafter each iteration reads the head's delta as a
/// timeout, waits on the condvar (which atomically releases the mutex
/// while blocked and reacquires it on wake), then advances the list by
/// however much wall-clock time actually elapsed.
fn os_tmr_task(_: *mut ()) -> ! {
    TMR_LOCK.lock(0, opt::NONE).expect("timer mutex lock failed");

    let mut last_tick = crate::time::os_time_get();

    loop {
        let timeout = unsafe { TMR_LIST.get_unchecked() }.head_delta().unwrap_or(0);

        let cond = unsafe { TMR_COND.get_unchecked() };
        let _ = cond.wait(&TMR_LOCK, timeout);

        let now = crate::time::os_time_get();
        let elapsed = now.wrapping_sub(last_tick);
        last_tick = now;

        if elapsed > 0 {
            unsafe { TMR_LIST.get_unchecked() }.advance(elapsed);
        }
    }
}

/// Create the timer mutex/condvar and the internal timer task (spec
/// §4.11 "create ... timer mutex/condvar ... timer task at configured
/// priorities"). Called once by [`crate::kernel::os_init`].
#[allow(static_mut_refs)]
pub(crate) fn os_tmr_module_init() {
    TMR_LOCK.create("OS_TmrLock").expect("timer mutex creation failed");

    critical_section(|_cs| {
        unsafe { TMR_COND.get_unchecked() }.init();
    });

    unsafe {
        crate::task::os_task_create_internal(
            &raw mut TMR_TASK_TCB,
            "Tmr",
            os_tmr_task,
            core::ptr::null_mut(),
            CFG_PRIO_TMR_TASK,
            TMR_TASK_STK.as_mut_ptr(),
            TMR_TASK_STK.len(),
            0,
            0,
        )
        .expect("timer task creation failed");
    }
}

// ============ Safe wrapper ============

use core::cell::UnsafeCell;

/// Safe, caller-owned handle to a software timer (spec §6 timer API).
/// Mirrors the `Semaphore`/`Mutex`/`FlagGrp`/`Queue` pattern: create a
/// `static Timer` and call its methods from any task.
pub struct Timer {
    inner: UnsafeCell<OsTmr>,
}

unsafe impl Sync for Timer {}
unsafe impl Send for Timer {}

impl Timer {
    pub const fn new() -> Self {
        Timer { inner: UnsafeCell::new(OsTmr::new()) }
    }

    #[inline]
    fn ptr(&self) -> NonNull<OsTmr> {
        unsafe { NonNull::new_unchecked(self.inner.get()) }
    }

    /// Create the timer (spec §4.10 "Create initializes fields to
    /// Stopped"). `dly` is the initial one-shot delay (or first-period
    /// delay if nonzero, else `period` is used as the initial delay too);
    /// `period` is the repeat interval for `Periodic` timers (ignored for
    /// `OneShot`).
    pub fn create(
        &self,
        name: &'static str,
        dly: OsTick,
        period: OsTick,
        tmr_opt: OsOpt,
        callback: Option<OsTmrCallback>,
        callback_arg: *mut (),
    ) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        if tmr_opt & opt::TMR_PERIODIC != 0 && period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }

        TMR_LOCK.lock(0, opt::NONE)?;

        let t = unsafe { &mut *self.inner.get() };
        t.name = name;
        t.callback = callback;
        t.callback_arg = callback_arg;
        t.dly = dly;
        t.period = period;
        t.remain = 0;
        t.state = OsTmrState::Stopped;
        t.opt = if tmr_opt & opt::TMR_PERIODIC != 0 { OsTmrOpt::Periodic } else { OsTmrOpt::OneShot };
        t.next = None;
        t.prev = None;

        TMR_LOCK.unlock(opt::NONE)
    }

    /// Start (or restart) the timer, linking it into the delta list with
    /// its initial delay (or period, if the delay is zero).
    pub fn start(&self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::TmrIsr);
        }

        TMR_LOCK.lock(0, opt::NONE)?;

        let tmr = self.ptr();
        let t = unsafe { &mut *tmr.as_ptr() };

        if t.state == OsTmrState::Unused {
            TMR_LOCK.unlock(opt::NONE)?;
            return Err(OsError::TmrInactive);
        }

        let initial = if t.dly > 0 { t.dly } else { t.period };
        if initial == 0 {
            TMR_LOCK.unlock(opt::NONE)?;
            return Err(OsError::TmrInvalidDly);
        }

        if t.state == OsTmrState::Running {
            critical_section(|_cs| unsafe { TMR_LIST.get_unchecked() }.remove(tmr));
        }
        let became_head = critical_section(|_cs| unsafe { TMR_LIST.get_unchecked() }.insert(tmr, initial));

        t.state = OsTmrState::Running;

        if became_head {
            unsafe { TMR_COND.get_unchecked() }.signal();
        }

        TMR_LOCK.unlock(opt::NONE)
    }

    /// Stop the timer, unlinking it from the delta list. `stop_opt` may
    /// request the callback still be invoked (`TMR_STOP_CALLBACK`, with
    /// the timer's stored argument, or `TMR_STOP_CALLBACK_ARG`, with
    /// `callback_arg_override`).
    pub fn stop(&self, stop_opt: OsOpt, callback_arg_override: *mut ()) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::TmrIsr);
        }

        TMR_LOCK.lock(0, opt::NONE)?;

        let tmr = self.ptr();
        let t = unsafe { &mut *tmr.as_ptr() };

        if !matches!(t.state, OsTmrState::Running | OsTmrState::Timeout) {
            TMR_LOCK.unlock(opt::NONE)?;
            return Err(OsError::TmrInvalidState);
        }

        let was_head = critical_section(|_cs| unsafe { TMR_LIST.get_unchecked() }.remove(tmr));
        t.state = OsTmrState::Stopped;

        if stop_opt & (opt::TMR_STOP_CALLBACK | opt::TMR_STOP_CALLBACK_ARG) != 0 {
            if let Some(cb) = t.callback {
                let arg = if stop_opt & opt::TMR_STOP_CALLBACK_ARG != 0 {
                    callback_arg_override
                } else {
                    t.callback_arg
                };
                cb(tmr.as_ptr(), arg);
            } else {
                TMR_LOCK.unlock(opt::NONE)?;
                return Err(OsError::TmrNoCallback);
            }
        }

        if was_head {
            unsafe { TMR_COND.get_unchecked() }.signal();
        }

        TMR_LOCK.unlock(opt::NONE)
    }

    /// Delete the timer: unlink (if linked) and clear to `Unused`.
    pub fn del(&self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        TMR_LOCK.lock(0, opt::NONE)?;

        let tmr = self.ptr();
        let t = unsafe { &mut *tmr.as_ptr() };

        let was_head = if matches!(t.state, OsTmrState::Running | OsTmrState::Timeout) {
            critical_section(|_cs| unsafe { TMR_LIST.get_unchecked() }.remove(tmr))
        } else {
            false
        };

        t.state = OsTmrState::Unused;
        t.callback = None;
        t.callback_arg = core::ptr::null_mut();
        t.dly = 0;
        t.period = 0;

        if was_head {
            unsafe { TMR_COND.get_unchecked() }.signal();
        }

        TMR_LOCK.unlock(opt::NONE)
    }

    /// Atomically update delay/period/callback/argument. Takes effect on
    /// the timer's next start/restart, not the one already in flight
    /// (spec §4.10 "takes effect after current expiration").
    pub fn set(
        &self,
        dly: OsTick,
        period: OsTick,
        callback: Option<OsTmrCallback>,
        callback_arg: *mut (),
    ) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::TmrIsr);
        }

        TMR_LOCK.lock(0, opt::NONE)?;

        let t = unsafe { &mut *self.inner.get() };
        if t.state == OsTmrState::Unused {
            TMR_LOCK.unlock(opt::NONE)?;
            return Err(OsError::TmrInactive);
        }

        t.dly = dly;
        t.period = period;
        t.callback = callback;
        t.callback_arg = callback_arg;

        TMR_LOCK.unlock(opt::NONE)
    }

    /// Current state (spec §6 "timer state_get").
    #[inline]
    pub fn state(&self) -> OsTmrState {
        unsafe { (*self.inner.get()).state() }
    }

    /// Ticks remaining until the next expiration, `0` if not running
    /// (spec §6 "timer remain_get").
    pub fn remain(&self) -> OsResult<OsTick> {
        if unsafe { (*self.inner.get()).state } != OsTmrState::Running {
            return Ok(0);
        }

        TMR_LOCK.lock(0, opt::NONE)?;
        let remain = critical_section(|_cs| unsafe { TMR_LIST.get_unchecked() }.remain_of(self.ptr()));
        TMR_LOCK.unlock(opt::NONE)?;
        Ok(remain)
    }

    /// Timer's configured name.
    #[inline]
    pub fn name(&self) -> &'static str {
        unsafe { (*self.inner.get()).name }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
