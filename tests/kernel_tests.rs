//! Host-side tests for the kernel's data structures and the pieces of the
//! public API that don't require a running scheduler (creating tasks and
//! starting `os_start` panics on non-ARM targets, so these tests stick to
//! the ready/tick list algorithms and the kernel-config surface directly).

#[cfg(test)]
mod ready_list_tests {
    use core::ptr::NonNull;
    use ucosiii::sched::ReadyList;
    use ucosiii::task::OsTcb;

    fn tcb_ptr(tcb: &mut OsTcb) -> NonNull<OsTcb> {
        NonNull::new(tcb as *mut OsTcb).unwrap()
    }

    #[test]
    fn fifo_ordering_at_tail() {
        let mut a = OsTcb::new();
        let mut b = OsTcb::new();
        let mut c = OsTcb::new();

        let mut list = ReadyList::new();
        assert!(list.is_empty());

        unsafe {
            list.insert_tail(tcb_ptr(&mut a));
            list.insert_tail(tcb_ptr(&mut b));
            list.insert_tail(tcb_ptr(&mut c));
        }

        assert_eq!(list.head(), Some(tcb_ptr(&mut a)));
        assert_eq!(list.tail(), Some(tcb_ptr(&mut c)));

        unsafe { list.remove(tcb_ptr(&mut a)) };
        assert_eq!(list.head(), Some(tcb_ptr(&mut b)));

        unsafe { list.remove(tcb_ptr(&mut b)) };
        unsafe { list.remove(tcb_ptr(&mut c)) };
        assert!(list.is_empty());
    }

    #[test]
    fn round_robin_rotation() {
        let mut a = OsTcb::new();
        let mut b = OsTcb::new();

        let mut list = ReadyList::new();
        unsafe {
            list.insert_tail(tcb_ptr(&mut a));
            list.insert_tail(tcb_ptr(&mut b));
        }

        // Simulate the round-robin rotate: remove the head, reinsert at tail.
        let head = list.head().unwrap();
        unsafe {
            list.remove(head);
            list.insert_tail(head);
        }

        assert_eq!(list.head(), Some(tcb_ptr(&mut b)));
        assert_eq!(list.tail(), Some(tcb_ptr(&mut a)));
    }
}

#[cfg(test)]
mod tick_list_tests {
    use core::ptr::NonNull;
    use ucosiii::core::tick::TickList;
    use ucosiii::task::OsTcb;

    fn tcb_ptr(tcb: &mut OsTcb) -> NonNull<OsTcb> {
        NonNull::new(tcb as *mut OsTcb).unwrap()
    }

    #[test]
    fn delta_list_orders_by_absolute_deadline() {
        let mut short = OsTcb::new();
        let mut mid = OsTcb::new();
        let mut long = OsTcb::new();

        let mut list = TickList::new();
        assert!(list.is_empty());

        unsafe {
            // Insert out of order: 30, 10, 20 ticks from now.
            list.insert(tcb_ptr(&mut long), 30);
            list.insert(tcb_ptr(&mut short), 10);
            list.insert(tcb_ptr(&mut mid), 20);
        }

        // The head is always the soonest deadline.
        assert_eq!(list.head_delta(), Some(10));
    }

    #[test]
    fn advancing_fires_only_expired_entries() {
        let mut first = OsTcb::new();
        let mut second = OsTcb::new();

        let mut list = TickList::new();
        unsafe {
            list.insert(tcb_ptr(&mut first), 5);
            list.insert(tcb_ptr(&mut second), 15);
        }

        // Advancing by less than the head's delta must not touch anything;
        // the remaining delta to the head shrinks accordingly.
        list.advance(3);
        assert_eq!(list.head_delta(), Some(2));
    }
}

#[cfg(test)]
mod kernel_api_tests {
    // `os_sched_round_robin_cfg` and anything else that goes through
    // `critical_section()` needs a registered critical-section
    // implementation; the crate only registers one for `target_arch =
    // "arm"`, so exercising it here would fail to link on the host. The
    // kernel's global state (`KERNEL`) is deliberately `pub(crate)`, not
    // reachable from outside the crate either. `os_version` is the one
    // piece of this session's additions callable from a plain host test.

    #[test]
    fn version_matches_config_const() {
        assert_eq!(ucosiii::os_version(), ucosiii::config::OS_VERSION);
    }
}

#[cfg(all(test, feature = "timer"))]
mod priority_table_and_tmr_state_tests {
    use ucosiii::timer::Timer;
    use ucosiii::types::OsTmrState;

    #[test]
    fn fresh_timer_is_unused_before_create() {
        let t = Timer::new();
        assert_eq!(t.state(), OsTmrState::Unused);
    }
}
