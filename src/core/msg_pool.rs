//! Global pool of message descriptors (C8, spec §3/§4.8)
//!
//! Mirrors `original_source/Source/os_msg.c`'s `OSMsgPool`: a singly
//! linked free list of fixed-size descriptors, sized at compile time by
//! [`CFG_MSG_POOL_SIZE`]. `sync::queue::OsQ` and each TCB's embedded
//! task queue both draw descriptors from here instead of allocating.

use crate::config::CFG_MSG_POOL_SIZE;
use crate::core::cs_cell::CsCell;
use crate::critical::CriticalSection;
use crate::types::{OsMsgSize, OsTick};

/// One pooled message descriptor.
#[derive(Debug, Clone, Copy)]
struct MsgNode {
    next: Option<u16>,
    ptr: *const (),
    size: OsMsgSize,
    ts: OsTick,
}

impl MsgNode {
    const fn empty() -> Self {
        MsgNode { next: None, ptr: core::ptr::null(), size: 0, ts: 0 }
    }
}

/// Handle to a descriptor currently checked out of the pool. Carries its
/// payload fields directly so callers don't need to re-index the pool to
/// read them back.
#[derive(Debug, Clone, Copy)]
pub struct MsgHandle {
    idx: u16,
    pub ptr: *const (),
    pub size: OsMsgSize,
    pub ts: OsTick,
}

struct MsgPool {
    nodes: [MsgNode; CFG_MSG_POOL_SIZE],
    free_head: Option<u16>,
    nbr_free: usize,
    nbr_used: usize,
}

impl MsgPool {
    const fn new() -> Self {
        MsgPool {
            nodes: [MsgNode::empty(); CFG_MSG_POOL_SIZE],
            free_head: None,
            nbr_free: 0,
            nbr_used: 0,
        }
    }

    fn init(&mut self) {
        for i in 0..CFG_MSG_POOL_SIZE {
            self.nodes[i] = MsgNode::empty();
            self.nodes[i].next = if i + 1 < CFG_MSG_POOL_SIZE {
                Some((i + 1) as u16)
            } else {
                None
            };
        }
        self.free_head = if CFG_MSG_POOL_SIZE > 0 { Some(0) } else { None };
        self.nbr_free = CFG_MSG_POOL_SIZE;
        self.nbr_used = 0;
    }

    fn get(&mut self, ptr: *const (), size: OsMsgSize, ts: OsTick) -> Option<MsgHandle> {
        let idx = self.free_head?;
        let node = &mut self.nodes[idx as usize];
        self.free_head = node.next;
        node.next = None;
        node.ptr = ptr;
        node.size = size;
        node.ts = ts;
        self.nbr_free -= 1;
        self.nbr_used += 1;
        Some(MsgHandle { idx, ptr, size, ts })
    }

    fn put(&mut self, handle: MsgHandle) {
        let node = &mut self.nodes[handle.idx as usize];
        node.next = self.free_head;
        node.ptr = core::ptr::null();
        node.size = 0;
        node.ts = 0;
        self.free_head = Some(handle.idx);
        self.nbr_free += 1;
        self.nbr_used -= 1;
    }
}

static POOL: CsCell<MsgPool> = CsCell::new(MsgPool::new());

/// Re-initialize the pool. Called once by [`crate::kernel::os_init`].
pub(crate) fn init(cs: &CriticalSection) {
    POOL.get(cs).init();
}

/// Check out a descriptor carrying `(ptr, size, ts)`. `None` if the pool
/// is exhausted (spec §7 "pool-empty").
pub(crate) fn get(cs: &CriticalSection, ptr: *const (), size: OsMsgSize, ts: OsTick) -> Option<MsgHandle> {
    POOL.get(cs).get(ptr, size, ts)
}

/// Return a descriptor to the free list.
pub(crate) fn put(cs: &CriticalSection, handle: MsgHandle) {
    POOL.get(cs).put(handle)
}

/// Free-list node count; used only by tests (spec §8 invariant 5).
pub fn nbr_free() -> usize {
    unsafe { POOL.get_unchecked().nbr_free }
}

/// Checked-out descriptor count; used only by tests (spec §8 invariant 5).
pub fn nbr_used() -> usize {
    unsafe { POOL.get_unchecked().nbr_used }
}
