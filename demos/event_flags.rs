//! Event Flags Demo - two producers set distinct bits, a consumer waits
//! for both before proceeding (Set-All).

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use ucosiii::task::OsTcb;
use ucosiii::time::os_time_dly;
use ucosiii::types::{opt, OsStkElement};
use ucosiii::flag::FlagGrp;
use ucosiii::os_task_create;

const BIT_A: u32 = 0x01;
const BIT_B: u32 = 0x02;

static WAKE_COUNT: AtomicU32 = AtomicU32::new(0);

static FLAGS: FlagGrp = FlagGrp::new();

static mut A_STK: [OsStkElement; 256] = [0; 256];
static mut A_TCB: OsTcb = OsTcb::new();
static mut B_STK: [OsStkElement; 256] = [0; 256];
static mut B_TCB: OsTcb = OsTcb::new();
static mut WAITER_STK: [OsStkElement; 256] = [0; 256];
static mut WAITER_TCB: OsTcb = OsTcb::new();

fn setter_a_task(_arg: *mut ()) -> ! {
    loop {
        let _ = os_time_dly(150);
        let _ = FLAGS.post(BIT_A, opt::FLAG_SET_ANY);
        info!("[A] set bit A");
    }
}

fn setter_b_task(_arg: *mut ()) -> ! {
    loop {
        let _ = os_time_dly(220);
        let _ = FLAGS.post(BIT_B, opt::FLAG_SET_ANY);
        info!("[B] set bit B");
    }
}

fn waiter_task(_arg: *mut ()) -> ! {
    loop {
        let got = FLAGS.pend(
            BIT_A | BIT_B,
            opt::FLAG_SET_ALL | opt::FLAG_CONSUME,
            0,
        );
        if got.is_ok() {
            let n = WAKE_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
            info!("[W] both bits seen, wake #{}", n);
        }
    }
}

#[entry]
fn main() -> ! {
    info!("Event Flags Demo: wait for A & B");

    ucosiii::os_init().expect("OS init failed");
    FLAGS.create(0, "Flags").unwrap();

    unsafe {
        os_task_create(&mut A_TCB, &mut A_STK, "A", setter_a_task, 12).unwrap();
        os_task_create(&mut B_TCB, &mut B_STK, "B", setter_b_task, 12).unwrap();
        os_task_create(&mut WAITER_TCB, &mut WAITER_STK, "W", waiter_task, 8).unwrap();
    }

    info!("Starting...");
    ucosiii::os_start().expect("OS start failed");

    loop { cortex_m::asm::wfi(); }
}
