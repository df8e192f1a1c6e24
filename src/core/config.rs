//! Compile-time configuration for the kernel
//!
//! These constants control the behavior and resource limits of the RTOS.

/// Maximum number of priority levels
pub const CFG_PRIO_MAX: usize = 64;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Default time quanta for round-robin scheduling
pub const CFG_TIME_QUANTA_DEFAULT: u32 = 10;

/// Minimum task stack size
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Maximum message queue / task queue pool size
pub const CFG_MSG_POOL_SIZE: usize = 32;

/// Enable round-robin scheduling for same-priority tasks
pub const CFG_SCHED_ROUND_ROBIN_EN: bool = true;

/// Idle task priority
pub const CFG_PRIO_IDLE: u8 = (CFG_PRIO_MAX - 1) as u8;

/// Enable the dynamic-tick mode (tick source programmed on demand).
///
/// Mutually exclusive with round-robin: a task whose quantum expires
/// needs a periodic tick to notice, which the dynamic-tick mode does
/// not provide between arbitrary deadlines.
pub const CFG_TICK_DYN_EN: bool = false;

const _: () = assert!(
    !(CFG_SCHED_ROUND_ROBIN_EN && CFG_TICK_DYN_EN),
    "round-robin and dynamic tick are mutually exclusive"
);

/// Number of task-local-storage slots per task
pub const CFG_TLS_NUM_SLOTS: usize = 4;

/// Depth of the per-task message queue (task queue)
pub const CFG_TASK_Q_SIZE: usize = 4;

/// Enable task suspend/resume API
pub const CFG_TASK_SUSPEND_EN: bool = true;

/// Enable the stack red-zone overflow check on `stk_chk`
pub const CFG_STK_REDZONE_EN: bool = true;

/// Priority of the internal timer task. Runs just above IDLE/stat so
/// application tasks never get starved by timer-callback processing.
pub const CFG_PRIO_TMR_TASK: u8 = (CFG_PRIO_MAX - 3) as u8;

/// Stack size (words) of the internal timer task
pub const CFG_TMR_TASK_STK_SIZE: usize = 192;

/// Rate at which the timer task's tick base advances, in Hz.
///
/// Matches `CFG_TICK_RATE_HZ` unless the timer task is configured to run
/// on a slower divided rate, as upstream uC/OS-III allows via
/// `OSCfg_TmrTaskRate_Hz`.
pub const CFG_TMR_TASK_RATE_HZ: u32 = CFG_TICK_RATE_HZ;

/// Priority of the internal statistics task
pub const CFG_PRIO_STAT_TASK: u8 = (CFG_PRIO_MAX - 2) as u8;

/// Stack size (words) of the internal statistics task
pub const CFG_STAT_TASK_STK_SIZE: usize = 128;

/// Kernel version as (major, minor, patch)
pub const OS_VERSION: (u8, u8, u8) = (3, 8, 0);
