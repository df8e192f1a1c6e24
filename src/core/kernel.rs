//! Global kernel state and initialization
//!
//! This module manages the global OS state including initialization,
//! starting the scheduler, and tracking kernel status.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::config::CFG_PRIO_MAX;
use crate::critical::{critical_section, CriticalSection};
use crate::core::cs_cell::CsCell;
use crate::core::tick::TickList;
use crate::error::{OsError, OsResult};
use crate::prio::PrioTable;
use crate::sched::ReadyList;
use crate::task::OsTcb;
use crate::types::{OsNestingCtr, OsPrio, OsTick};

// ============ Kernel State Structures ============

/// Atomic kernel flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    sched_lock_nesting: AtomicU8,
    tick_counter: AtomicU32,
    time: AtomicU32,
    rr_enabled: AtomicBool,
    rr_quanta: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            sched_lock_nesting: AtomicU8::new(0),
            tick_counter: AtomicU32::new(0),
            time: AtomicU32::new(0),
            rr_enabled: AtomicBool::new(crate::config::CFG_SCHED_ROUND_ROBIN_EN),
            rr_quanta: AtomicU32::new(crate::config::CFG_TIME_QUANTA_DEFAULT),
        }
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.sched_lock_nesting.store(0, Ordering::SeqCst);
        self.tick_counter.store(0, Ordering::SeqCst);
        self.rr_enabled.store(crate::config::CFG_SCHED_ROUND_ROBIN_EN, Ordering::SeqCst);
        self.rr_quanta.store(crate::config::CFG_TIME_QUANTA_DEFAULT, Ordering::SeqCst);
    }

    /// Whether round-robin scheduling is currently active (spec §6
    /// "round_robin_cfg"); runtime-togglable on top of the build-time
    /// `CFG_SCHED_ROUND_ROBIN_EN` gate.
    #[inline(always)]
    pub fn round_robin_enabled(&self) -> bool {
        self.rr_enabled.load(Ordering::Relaxed)
    }

    /// Current default time quantum (ticks) for newly created tasks.
    #[inline(always)]
    pub fn round_robin_default_quanta(&self) -> OsTick {
        self.rr_quanta.load(Ordering::Relaxed)
    }

    pub(crate) fn set_round_robin_cfg(&self, enable: bool, quanta: OsTick) {
        self.rr_enabled.store(enable, Ordering::Relaxed);
        if quanta > 0 {
            self.rr_quanta.store(quanta, Ordering::Relaxed);
        }
    }

    /// Check if the OS is running
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if OS is initialized
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Get current tick count
    #[inline(always)]
    pub fn tick_get(&self) -> OsTick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    /// Get interrupt nesting level
    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    /// Get scheduler lock nesting level
    #[inline(always)]
    pub fn sched_lock_nesting(&self) -> OsNestingCtr {
        self.sched_lock_nesting.load(Ordering::SeqCst)
    }

    /// Advance the tick counter by `n` and return the new value.
    #[inline(always)]
    pub(crate) fn tick_advance(&self, n: OsTick) -> OsTick {
        self.tick_counter.fetch_add(n, Ordering::Relaxed).wrapping_add(n)
    }

    /// Force the tick counter to an absolute value (`time_set`).
    #[inline(always)]
    pub(crate) fn tick_set(&self, ticks: OsTick) {
        self.tick_counter.store(ticks, Ordering::Relaxed);
    }

    /// Enter ISR
    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        if self.is_running() {
            let nesting = self.int_nesting.fetch_add(1, Ordering::Relaxed);
            if nesting == 254 {
                self.int_nesting.store(254, Ordering::Relaxed);
            }
        }
    }

    /// Set initialized flag
    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    /// Set running flag
    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    /// Decrement int nesting
    #[inline(always)]
    pub(crate) fn int_nesting_dec(&self) -> OsNestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
        nesting.saturating_sub(1)
    }

    /// Lock scheduler 
    pub(crate) fn try_sched_lock(&self) -> OsResult<()> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 255 {
            return Err(OsError::LockNestingOvf);
        }
        self.sched_lock_nesting.store(nesting + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Unlock scheduler
    pub(crate) fn try_sched_unlock(&self) -> OsResult<OsNestingCtr> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 0 {
            return Err(OsError::SchedNotLocked);
        }
        self.sched_lock_nesting.store(nesting - 1, Ordering::SeqCst);
        Ok(nesting - 1)
    }
}

// ============ Global Instances ============

/// Global kernel state instance
pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

/// Scheduler state
pub struct SchedState {
    pub(crate) prio_tbl: PrioTable,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_MAX],
    pub(crate) tick_list: TickList,
}

impl SchedState {
    const fn new() -> Self {
        Self {
            prio_tbl: PrioTable::new(),
            rdy_list: [ReadyList::new(); CFG_PRIO_MAX],
            tick_list: TickList::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.prio_tbl = PrioTable::new();
        self.rdy_list = [ReadyList::new(); CFG_PRIO_MAX];
        self.tick_list.init();
    }

    /// Get mutable reference to priority table
    #[inline(always)]
    pub fn prio_table(&mut self) -> &mut PrioTable {
        &mut self.prio_tbl
    }

    /// Get reference to ready list
    #[inline(always)]
    pub fn rdy_list(&mut self, prio: OsPrio) -> &mut ReadyList {
        &mut self.rdy_list[prio as usize]
    }

    /// Get mutable reference to the tick list
    #[inline(always)]
    pub fn tick_list(&mut self) -> &mut TickList {
        &mut self.tick_list
    }
}

/// Global scheduler state instance  
pub(crate) static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

/// IDLE task TCB
static mut IDLE_TCB: OsTcb = OsTcb::new();

/// IDLE task stack
static mut IDLE_STK: [crate::types::OsStkElement; 128] = [0; 128];

/// Statistics task TCB (spec §4.11 "create stat task ... at configured
/// priorities"). CPU-usage sampling itself is out of scope (spec §1); the
/// task exists only so its scheduling effect (lowest-but-one priority,
/// periodic wakeup) is present the way the rest of the core expects.
static mut STAT_TCB: OsTcb = OsTcb::new();
static mut STAT_STK: [crate::types::OsStkElement; 128] = [0; 128];

// ============ CPU/Context Switch State ============

/// CPU context switch state
#[repr(C)]
pub struct CpuState {
    /// Current running task's TCB pointer
    pub tcb_cur: *mut OsTcb,
    /// Highest priority ready task's TCB pointer
    pub tcb_high_rdy: *mut OsTcb,
    /// Current running task's priority
    pub prio_cur: OsPrio,
    /// Highest ready priority
    pub prio_high_rdy: OsPrio,
    /// Exception stack base
    pub except_stk_base: u32,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: core::ptr::null_mut(),
            tcb_high_rdy: core::ptr::null_mut(),
            prio_cur: 0,
            prio_high_rdy: 0,
            except_stk_base: 0,
        }
    }
    
    pub fn reset(&mut self) {
        self.tcb_cur = core::ptr::null_mut();
        self.tcb_high_rdy = core::ptr::null_mut();
        self.prio_cur = 0;
        self.prio_high_rdy = 0;
    }

    // ============ TCB Accessor Methods ============

    /// Get current TCB pointer
    #[inline(always)]
    pub unsafe fn tcb_cur_ptr(&self) -> Option<NonNull<OsTcb>> {
        NonNull::new(self.tcb_cur)
    }

    /// Set current TCB pointer
    #[inline(always)]
    pub unsafe fn set_tcb_cur(&mut self, tcb: Option<NonNull<OsTcb>>) {
        self.tcb_cur = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    }

    /// Get high ready TCB pointer
    #[inline(always)]
    pub unsafe fn tcb_high_rdy_ptr(&self) -> Option<NonNull<OsTcb>> {
        NonNull::new(self.tcb_high_rdy)
    }

    /// Set high ready TCB pointer
    #[inline(always)]
    pub unsafe fn set_tcb_high_rdy(&mut self, tcb: Option<NonNull<OsTcb>>) {
        self.tcb_high_rdy = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    }

    // ============ Priority Accessor Methods ============

    /// Get current priority
    #[inline(always)]
    pub unsafe fn get_prio_cur(&self) -> OsPrio {
        self.prio_cur
    }

    /// Set current priority
    #[inline(always)]
    pub unsafe fn set_prio_cur(&mut self, prio: OsPrio) {
        self.prio_cur = prio;
    }

    /// Get high ready priority
    #[inline(always)]
    pub unsafe fn get_prio_high_rdy(&self) -> OsPrio {
        self.prio_high_rdy
    }

    /// Set high ready priority
    #[inline(always)]
    pub unsafe fn set_prio_high_rdy(&mut self, prio: OsPrio) {
        self.prio_high_rdy = prio;
    }
}

/// Global CPU state instance
#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState::new();

/// BASEPRI boundary
#[no_mangle]
pub static OS_KA_BASEPRI_Boundary: u32 = 0;

// ============ Initialization ============

/// Internal IDLE task function
fn os_idle_task(_: *mut ()) -> ! {
    loop {
        cortex_m::asm::nop();
    }
}

/// Internal statistics task function. Wakes once a second and goes back
/// to sleep; CPU-usage accounting itself is left to the port layer/caller
/// per spec §1 non-goals.
fn os_stat_task(_: *mut ()) -> ! {
    loop {
        let _ = crate::time::os_time_dly(crate::config::CFG_TICK_RATE_HZ);
    }
}

/// Reset global kernel state
unsafe fn os_reset_globals() {
    KERNEL.reset();
    
    unsafe {
        CPU_STATE.tcb_cur = core::ptr::null_mut();
        CPU_STATE.tcb_high_rdy = core::ptr::null_mut();
        CPU_STATE.prio_cur = 0;
        CPU_STATE.prio_high_rdy = 0;
    }
    
    unsafe {
        SCHED.get_unchecked().reset();
    }
}

// ============ Public API ============

/// Initialize the RTOS kernel
///
/// This must be called before any other OS function.
/// It initializes the priority table, ready lists, and internal state.
/// IDLE task is automatically created.
///
/// # Returns
/// * `Ok(())` - Initialization successful
/// * `Err(OsError::OsRunning)` - OS is already running
#[allow(static_mut_refs)]
pub fn os_init() -> OsResult<()> {
    unsafe { os_reset_globals(); }
    
    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }
    
    critical_section(|cs| {
        let sched = SCHED.get(cs);

        // Initialize priority table
        sched.prio_tbl.init();

        // Initialize ready lists
        for list in sched.rdy_list.iter_mut() {
            list.init();
        }

        // Initialize the message-descriptor pool (spec §4.11 "create
        // message pool")
        #[cfg(feature = "queue")]
        crate::msg_pool::init(cs);

        // Create IDLE task
        unsafe {
            crate::task::os_task_create_internal(
                &raw mut IDLE_TCB,
                "Idle",
                os_idle_task,
                core::ptr::null_mut(),
                crate::config::CFG_PRIO_IDLE,
                IDLE_STK.as_mut_ptr(),
                IDLE_STK.len(),
                0,
                0,
            ).expect("IDLE task creation failed");
        }

        // Create the statistics task
        unsafe {
            crate::task::os_task_create_internal(
                &raw mut STAT_TCB,
                "Stat",
                os_stat_task,
                core::ptr::null_mut(),
                crate::config::CFG_PRIO_STAT_TASK,
                STAT_STK.as_mut_ptr(),
                STAT_STK.len(),
                0,
                0,
            ).expect("Stat task creation failed");
        }

        KERNEL.set_initialized(true);
    });

    // Create the internal timer-management objects and timer task. Done
    // outside the critical section above: timer creation itself acquires
    // its own (timer mutex) critical sections.
    #[cfg(feature = "timer")]
    crate::sync::timer::os_tmr_module_init();

    Ok(())
}

/// Start multitasking
///
/// This function starts the highest priority ready task. It never returns.
/// Before calling this, at least one application task must be created.
///
/// # Returns
/// This function does not return under normal operation.
/// * `Err(OsError::OsNotInit)` - OS not initialized
/// * `Err(OsError::OsRunning)` - OS is already running
/// * `Err(OsError::OsNoAppTask)` - No application task created
pub fn os_start() -> OsResult<()> {
    if !KERNEL.is_initialized() {
        return Err(OsError::OsNotInit);
    }
    
    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }
    
    critical_section(|cs| {
        let sched = SCHED.get(cs);
        
        let high_prio = sched.prio_tbl.get_highest();

        unsafe {
            CPU_STATE.prio_high_rdy = high_prio;
            CPU_STATE.prio_cur = high_prio;

            if let Some(head) = sched.rdy_list[high_prio as usize].head() {
                CPU_STATE.tcb_high_rdy = head.as_ptr();
                CPU_STATE.tcb_cur = head.as_ptr();
            } else {
                return;
            }
        }

        KERNEL.set_running(true);
    });

    // Initialize SysTick
    crate::port::os_cpu_systick_init(16_000_000 / crate::config::CFG_TICK_RATE_HZ);

    unsafe { 
        CPU_STATE.tcb_cur = CPU_STATE.tcb_high_rdy;
        crate::port::os_start_high_rdy() 
    };
    
    Ok(())
}

/// Exit ISR
pub fn os_int_exit() {
    if !KERNEL.is_running() {
        return;
    }

    let _cs = CriticalSection::enter();

    let old_nesting = KERNEL.int_nesting();
    if old_nesting == 0 {
        return;
    }

    let new_nesting = KERNEL.int_nesting_dec();

    if new_nesting == 0 && KERNEL.sched_lock_nesting() == 0 {
        // Check whether need to switch tasks
        let high_prio = unsafe { SCHED.get_unchecked().prio_tbl.get_highest() };
        
        unsafe {
            if high_prio < CPU_STATE.prio_cur {
                CPU_STATE.prio_high_rdy = high_prio;
                
                if let Some(head) = SCHED.get_unchecked().rdy_list[high_prio as usize].head() {
                    CPU_STATE.tcb_high_rdy = head.as_ptr();
                    crate::port::os_int_ctx_sw();
                }
            }
        }
    }
}

/// Configure round-robin scheduling at runtime (spec §6
/// "round_robin_cfg"): `enable` toggles it on top of the build-time
/// `CFG_SCHED_ROUND_ROBIN_EN` gate; `quanta` (if nonzero) becomes the new
/// default time quantum for tasks created afterward with an unspecified
/// quantum.
pub fn os_sched_round_robin_cfg(enable: bool, quanta: OsTick) -> OsResult<()> {
    critical_section(|_cs| {
        KERNEL.set_round_robin_cfg(enable, quanta);
        Ok(())
    })
}

/// Kernel version as `(major, minor, patch)` (spec §6 "version").
#[inline]
pub fn os_version() -> (u8, u8, u8) {
    crate::config::OS_VERSION
}

/// Lock the scheduler
pub fn os_sched_lock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if KERNEL.int_nesting() > 0 {
        return Err(OsError::SchedLockIsr);
    }

    critical_section(|_cs| {
        KERNEL.try_sched_lock()
    })
}

/// Unlock the scheduler
pub fn os_sched_unlock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if KERNEL.int_nesting() > 0 {
        return Err(OsError::SchedUnlockIsr);
    }

    critical_section(|_cs| {
        let remaining = KERNEL.try_sched_unlock()?;
        if remaining == 0 {
            crate::sched::os_sched();
        }
        Ok(())
    })
}

// ============ Internal accessors for other modules ============

/// Get mutable reference to priority table
#[inline(always)]
pub(crate) unsafe fn prio_table() -> &'static mut PrioTable {
    unsafe { &mut SCHED.get_unchecked().prio_tbl }
}

/// Get reference to ready list for a priority
#[inline(always)]
pub(crate) unsafe fn rdy_list(prio: OsPrio) -> &'static mut ReadyList {
    unsafe { &mut SCHED.get_unchecked().rdy_list[prio as usize] }
}

/// Get current TCB pointer as Option<NonNull>
#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn tcb_cur_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { CPU_STATE.tcb_cur_ptr() }
}

/// Set current TCB pointer
#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn set_tcb_cur_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.set_tcb_cur(tcb) }
}

/// Get high ready TCB pointer as Option<NonNull>
#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn tcb_high_rdy_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { CPU_STATE.tcb_high_rdy_ptr() }
}

/// Set high ready TCB pointer
#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_tcb_high_rdy_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.set_tcb_high_rdy(tcb) }
}

/// Get current priority
#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn prio_cur() -> OsPrio {
    unsafe { CPU_STATE.get_prio_cur() }
}

/// Set current priority
#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn set_prio_cur(prio: OsPrio) {
    unsafe { CPU_STATE.set_prio_cur(prio) }
}

/// Get high ready priority
#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn prio_high_rdy() -> OsPrio {
    unsafe { CPU_STATE.get_prio_high_rdy() }
}

/// Set high ready priority
#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_prio_high_rdy(prio: OsPrio) {
    unsafe { CPU_STATE.set_prio_high_rdy(prio) }
}

// ============ Tick delta list (C4) ============

/// Link `tcb` into the tick delta list, due in `delta` ticks from now.
/// Used by [`crate::time::os_time_dly`] and by [`crate::pend::pend_block`]
/// for pend-with-timeout.
///
/// # Safety
/// `tcb` must not already be linked into the tick list.
pub(crate) unsafe fn tick_list_insert(tcb: NonNull<OsTcb>, delta: OsTick) {
    unsafe {
        SCHED.get_unchecked().tick_list.insert(tcb, delta);
    }
}

/// Unlink `tcb` from the tick delta list, folding its remaining delta
/// into its successor.
///
/// # Safety
/// `tcb` must currently be linked into the tick list.
pub(crate) unsafe fn tick_list_remove(tcb: NonNull<OsTcb>) {
    unsafe {
        SCHED.get_unchecked().tick_list.remove(tcb);
    }
}

/// Advance the tick delta list by `n` ticks, readying every task whose
/// deadline has elapsed. Requires the critical section held (the caller,
/// [`crate::time::os_time_tick`]/`os_time_dyn_tick`, already holds it).
pub(crate) unsafe fn tick_list_advance(n: OsTick) {
    unsafe {
        SCHED.get_unchecked().tick_list.advance(n);
    }
}

/// `true` if the tick list has at least one task waiting on a deadline;
/// used by the dynamic-tick port hook to decide whether to reprogram.
pub(crate) unsafe fn tick_list_is_empty() -> bool {
    unsafe { SCHED.get_unchecked().tick_list.is_empty() }
}

/// Delta (in ticks) from now to the tick list's head deadline, i.e. the
/// next moment the dynamic-tick port needs to fire. `None` if the list
/// is empty.
pub(crate) unsafe fn tick_list_head_delta() -> Option<OsTick> {
    unsafe { SCHED.get_unchecked().tick_list.head_delta() }
}

// ============ ISR entry/exit ============

/// Enter ISR context.
///
/// Must be paired with [`os_int_exit`]. Nestable: increments the
/// interrupt-nesting counter, which `os_int_exit` decrements back down
/// to zero before it will consider a context switch.
pub fn os_int_enter() {
    KERNEL.int_enter();
}

