//! Fixed-size memory partition implementation (C9, spec §4.9)
//!
//! A memory partition carves a caller-supplied buffer into `n_blks` fixed
//! size blocks and threads them into a singly linked free list stored
//! inline in the free blocks themselves (the first pointer-sized word of
//! a free block holds the address of the next free block). `get()`/`put()`
//! never block: there is no pend list.

use core::ptr::NonNull;

use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::types::{OsObjQty, OsObjType};

/// Memory partition control block.
#[repr(C)]
pub struct OsMem {
    obj_type: OsObjType,
    addr: *mut u8,
    free_list: *mut u8,
    nbr_free: OsObjQty,
    nbr_max: OsObjQty,
    blk_size: usize,
    #[cfg(feature = "defmt")]
    name: &'static str,
}

impl OsMem {
    pub const fn new() -> Self {
        OsMem {
            obj_type: OsObjType::None,
            addr: core::ptr::null_mut(),
            free_list: core::ptr::null_mut(),
            nbr_free: 0,
            nbr_max: 0,
            blk_size: 0,
            #[cfg(feature = "defmt")]
            name: "",
        }
    }

    /// Carve `buf` into `n_blks` blocks of `blk_size` bytes each.
    ///
    /// `blk_size` must be at least `size_of::<*const ()>()` and a multiple
    /// of the pointer alignment; `buf`'s address must itself be pointer
    /// aligned; `n_blks` must be at least 2 (spec §4.9).
    pub fn create(
        &mut self,
        buf: &'static mut [u8],
        n_blks: OsObjQty,
        blk_size: usize,
        _name: &'static str,
    ) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        if n_blks < 2 {
            return Err(OsError::MemInvalidBlks);
        }

        let ptr_size = core::mem::size_of::<*const ()>();
        let ptr_align = core::mem::align_of::<*const ()>();

        if blk_size < ptr_size {
            return Err(OsError::MemInvalidSize);
        }
        if blk_size % ptr_align != 0 {
            return Err(OsError::MemInvalidSize);
        }

        let addr = buf.as_mut_ptr();
        if (addr as usize) % ptr_align != 0 {
            return Err(OsError::MemInvalidPAddr);
        }

        if buf.len() < blk_size * n_blks as usize {
            return Err(OsError::MemInvalidSize);
        }

        critical_section(|_cs| {
            if self.obj_type == OsObjType::Mem {
                return Err(OsError::ObjCreated);
            }

            // Thread the free list through the blocks themselves; last
            // block's link word is null.
            let mut p_blk = addr;
            for _ in 0..(n_blks - 1) {
                let next = unsafe { p_blk.add(blk_size) };
                unsafe { (p_blk as *mut *mut u8).write(next) };
                p_blk = next;
            }
            unsafe { (p_blk as *mut *mut u8).write(core::ptr::null_mut()) };

            self.obj_type = OsObjType::Mem;
            self.addr = addr;
            self.free_list = addr;
            self.nbr_free = n_blks;
            self.nbr_max = n_blks;
            self.blk_size = blk_size;
            #[cfg(feature = "defmt")]
            {
                self.name = _name;
            }
            Ok(())
        })
    }

    /// Take a block from the partition, or `MemNoFreeBlks` if depleted.
    pub fn get(&mut self) -> OsResult<NonNull<u8>> {
        if self.obj_type != OsObjType::Mem {
            return Err(OsError::ObjType);
        }

        critical_section(|_cs| {
            if self.nbr_free == 0 {
                return Err(OsError::MemNoFreeBlks);
            }
            let blk = self.free_list;
            self.free_list = unsafe { (blk as *const *mut u8).read() };
            self.nbr_free -= 1;
            NonNull::new(blk).ok_or(OsError::MemInvalidPBlk)
        })
    }

    /// Return a block to the partition.
    ///
    /// `blk` must be a pointer previously handed out by [`Self::get`] on
    /// this same partition; returning an already-free block, a foreign
    /// pointer, or more blocks than were handed out is undefined behavior
    /// at the C level and is rejected here only to the extent the
    /// `nbr_free >= nbr_max` double-free guard (spec §4.9) catches it.
    pub unsafe fn put(&mut self, blk: NonNull<u8>) -> OsResult<()> {
        if self.obj_type != OsObjType::Mem {
            return Err(OsError::ObjType);
        }

        critical_section(|_cs| {
            if self.nbr_free >= self.nbr_max {
                return Err(OsError::MemFull);
            }
            let p = blk.as_ptr();
            unsafe { (p as *mut *mut u8).write(self.free_list) };
            self.free_list = p;
            self.nbr_free += 1;
            Ok(())
        })
    }

    #[inline]
    pub fn nbr_free(&self) -> OsObjQty {
        self.nbr_free
    }

    #[inline]
    pub fn nbr_used(&self) -> OsObjQty {
        self.nbr_max - self.nbr_free
    }

    #[inline]
    pub fn blk_size(&self) -> usize {
        self.blk_size
    }
}

impl Default for OsMem {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsMem {}
unsafe impl Sync for OsMem {}

// ============ Safe wrapper ============

use core::cell::UnsafeCell;

pub struct Mem {
    inner: UnsafeCell<OsMem>,
}

unsafe impl Sync for Mem {}
unsafe impl Send for Mem {}

impl Mem {
    pub const fn new() -> Self {
        Mem { inner: UnsafeCell::new(OsMem::new()) }
    }

    pub fn create(
        &self,
        buf: &'static mut [u8],
        n_blks: OsObjQty,
        blk_size: usize,
        name: &'static str,
    ) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(buf, n_blks, blk_size, name) }
    }

    pub fn get(&self) -> OsResult<NonNull<u8>> {
        unsafe { (*self.inner.get()).get() }
    }

    /// # Safety
    /// `blk` must have come from [`Self::get`] on this partition and not
    /// already have been returned.
    pub unsafe fn put(&self, blk: NonNull<u8>) -> OsResult<()> {
        unsafe { (*self.inner.get()).put(blk) }
    }

    #[inline]
    pub fn nbr_free(&self) -> OsObjQty {
        unsafe { (*self.inner.get()).nbr_free() }
    }
}

impl Default for Mem {
    fn default() -> Self {
        Self::new()
    }
}
