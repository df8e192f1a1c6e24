//! Software Timer Demo - a periodic timer toggles an LED-proxy counter,
//! a one-shot timer fires once and stops itself.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use ucosiii::task::OsTcb;
use ucosiii::time::os_time_dly;
use ucosiii::types::{opt, OsStkElement};
use ucosiii::timer::{OsTmr, Timer};
use ucosiii::os_task_create;

static PERIODIC_TICKS: AtomicU32 = AtomicU32::new(0);
static ONE_SHOT_FIRED: AtomicU32 = AtomicU32::new(0);

static PERIODIC_TMR: Timer = Timer::new();
static ONE_SHOT_TMR: Timer = Timer::new();

static mut MAIN_STK: [OsStkElement; 256] = [0; 256];
static mut MAIN_TCB: OsTcb = OsTcb::new();

fn periodic_callback(_tmr: *mut OsTmr, _arg: *mut ()) {
    let n = PERIODIC_TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    info!("[Tmr] periodic fire #{}", n);
}

fn one_shot_callback(_tmr: *mut OsTmr, _arg: *mut ()) {
    ONE_SHOT_FIRED.store(1, Ordering::Relaxed);
    info!("[Tmr] one-shot fired");
}

fn main_task(_arg: *mut ()) -> ! {
    loop {
        let _ = os_time_dly(500);
        info!(
            "periodic={} one_shot_fired={}",
            PERIODIC_TICKS.load(Ordering::Relaxed),
            ONE_SHOT_FIRED.load(Ordering::Relaxed),
        );
    }
}

#[entry]
fn main() -> ! {
    info!("Software Timer Demo");

    ucosiii::os_init().expect("OS init failed");

    PERIODIC_TMR
        .create("Periodic", 100, 100, opt::TMR_PERIODIC, Some(periodic_callback), core::ptr::null_mut())
        .unwrap();
    ONE_SHOT_TMR
        .create("OneShot", 250, 0, opt::TMR_ONE_SHOT, Some(one_shot_callback), core::ptr::null_mut())
        .unwrap();

    PERIODIC_TMR.start().unwrap();
    ONE_SHOT_TMR.start().unwrap();

    unsafe {
        os_task_create(&mut MAIN_TCB, &mut MAIN_STK, "M", main_task, 10).unwrap();
    }

    info!("Starting...");
    ucosiii::os_start().expect("OS start failed");

    loop { cortex_m::asm::wfi(); }
}
