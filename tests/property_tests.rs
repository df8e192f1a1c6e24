//! Property-based tests for the delta-list invariants that back both the
//! tick list (task delays/timeouts) and the priority bitmap (ready-task
//! selection). These are the two structures where an off-by-one would be
//! invisible in a handful of hand-picked unit tests but shows up
//! immediately once fed a few hundred random insertion orders.

use quickcheck_macros::quickcheck;

use ucosiii::config::CFG_PRIO_MAX;
use ucosiii::core::tick::TickList;
use ucosiii::prio::PrioTable;
use ucosiii::task::OsTcb;

/// Priorities are clamped into `0..CFG_PRIO_MAX` and deduplicated the same
/// way the real ready-list bitmap would see them (one task per priority
/// level, since `PrioTable` only tracks occupancy, not a count).
fn clamp_prios(raw: Vec<u8>) -> Vec<u8> {
    let max = (CFG_PRIO_MAX - 1) as u8;
    let mut prios: Vec<u8> = raw.into_iter().map(|p| p % (max + 1)).collect();
    prios.sort_unstable();
    prios.dedup();
    prios
}

#[quickcheck]
fn prio_table_highest_is_always_the_minimum(raw: Vec<u8>) -> bool {
    let prios = clamp_prios(raw);
    if prios.is_empty() {
        return true;
    }

    let mut table = PrioTable::new();
    for &p in &prios {
        table.insert(p);
    }

    let expected_min = *prios.iter().min().unwrap();
    table.get_highest() == expected_min
}

#[quickcheck]
fn prio_table_removal_uncovers_next_minimum(raw: Vec<u8>) -> bool {
    let prios = clamp_prios(raw);
    if prios.len() < 2 {
        return true;
    }

    let mut table = PrioTable::new();
    for &p in &prios {
        table.insert(p);
    }

    // Remove priorities from lowest (numerically) to highest; after each
    // removal the next-lowest number still in the set must surface.
    for (i, &p) in prios.iter().enumerate() {
        assert_eq!(table.get_highest(), p);
        table.remove(p);
        if i + 1 < prios.len() {
            assert_eq!(table.get_highest(), prios[i + 1]);
        }
    }

    table.is_empty()
}

/// Clamp raw deltas to a small nonzero range so accumulated sums stay well
/// under `OsTick::MAX` and the test stays deterministic about ordering
/// (no two tasks sharing an absolute deadline, which would make "the"
/// minimum ambiguous to pick a single winner for by index here).
fn clamp_deltas(raw: Vec<u16>) -> Vec<u32> {
    raw.into_iter()
        .map(|d| (d % 997) as u32 + 1)
        .collect()
}

#[quickcheck]
fn tick_list_head_is_always_the_soonest_deadline(raw: Vec<u16>) -> bool {
    let deltas = clamp_deltas(raw);
    if deltas.is_empty() {
        return true;
    }

    let mut tcbs: Vec<OsTcb> = (0..deltas.len()).map(|_| OsTcb::new()).collect();
    let mut list = TickList::new();

    let mut absolute_deadlines = Vec::with_capacity(deltas.len());
    let mut clock = 0u32;
    for (i, &delta) in deltas.iter().enumerate() {
        let deadline = clock.wrapping_add(delta);
        absolute_deadlines.push(deadline);
        let ptr = core::ptr::NonNull::new(&mut tcbs[i] as *mut OsTcb).unwrap();
        unsafe { list.insert(ptr, delta) };
        // Re-derive "now" the way a real caller would: the head's delta is
        // always relative to the moment of insertion, not an absolute
        // clock, so we track it purely for computing the expected minimum
        // of the deltas seen so far.
        clock = 0;
        let min_so_far = deltas[..=i].iter().copied().min().unwrap();
        if list.head_delta() != Some(min_so_far) {
            return false;
        }
    }

    true
}

#[quickcheck]
fn tick_list_advance_consumes_exactly_the_expired_prefix(raw: Vec<u16>) -> bool {
    let mut deltas = clamp_deltas(raw);
    if deltas.len() < 2 {
        return true;
    }
    deltas.truncate(8); // keep the O(n^2) removal-order check below cheap

    let mut tcbs: Vec<OsTcb> = (0..deltas.len()).map(|_| OsTcb::new()).collect();
    let mut list = TickList::new();
    for (i, &delta) in deltas.iter().enumerate() {
        let ptr = core::ptr::NonNull::new(&mut tcbs[i] as *mut OsTcb).unwrap();
        unsafe { list.insert(ptr, delta) };
    }

    let min_delta = *deltas.iter().min().unwrap();
    if min_delta < 2 {
        // advancing by "min_delta - 1" wouldn't be a meaningful partial
        // advance; skip rather than special-case a negative step.
        return true;
    }

    // Advance by one tick less than the soonest deadline: nothing should
    // fire, and the new head delta shrinks by exactly that many ticks.
    list.advance(min_delta - 1);
    list.head_delta() == Some(1)
}
