//! Kernel heap: a doubly-linked list of blocks in ascending address order,
//! first-fit allocation with splitting, and immediate coalescing on free.
//!
//! The arena starts as a fixed 256 KiB static region. On exhaustion, `alloc`
//! asks the VMM for `ceil((need + header) / FRAME_SIZE)` fresh pages and
//! links the new region onto the tail of the block list. One spinlock
//! guards the whole structure; `realloc` does not hold it across the copy
//! since `alloc`/`free` are each self-contained critical sections.

#![allow(dead_code)]

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::NonNull,
};

use log::error;

use crate::error::{KernelError, KernelResult};
use crate::sync::IrqSpinlock;

use super::{vmm, PageFlags, VirtualAddress, FRAME_SIZE};

const MAGIC: u32 = 0x4845_4150; // "HEAP"
const ALIGN: usize = 16;
const MIN_SPLIT_SLACK: usize = 64;
const ARENA_SIZE: usize = 256 * 1024;

#[repr(C, align(16))]
struct BlockHeader {
    magic: u32,
    free: bool,
    size: usize,
    prev: Option<NonNull<BlockHeader>>,
    next: Option<NonNull<BlockHeader>>,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

#[repr(align(16))]
struct Arena([u8; ARENA_SIZE]);

static mut STATIC_ARENA: Arena = Arena([0; ARENA_SIZE]);

struct HeapState {
    head: Option<NonNull<BlockHeader>>,
    tail: Option<NonNull<BlockHeader>>,
    used_bytes: usize,
    free_bytes: usize,
}

// SAFETY: all access to blocks goes through the `IrqSpinlock`-guarded
// `HeapState`; raw pointers inside never escape a locked section.
unsafe impl Send for HeapState {}

static HEAP: IrqSpinlock<HeapState> = IrqSpinlock::new(HeapState {
    head: None,
    tail: None,
    used_bytes: 0,
    free_bytes: 0,
});

/// Heap statistics, matching what the invariants in the component design
/// require: used + free must always equal arena total (including header
/// overhead).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    pub used_bytes: usize,
    pub free_bytes: usize,
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

unsafe fn block_from_ptr(ptr: *mut u8) -> *mut BlockHeader {
    (ptr as usize - HEADER_SIZE) as *mut BlockHeader
}

unsafe fn data_ptr(block: NonNull<BlockHeader>) -> *mut u8 {
    (block.as_ptr() as usize + HEADER_SIZE) as *mut u8
}

impl HeapState {
    unsafe fn push_block(&mut self, block: NonNull<BlockHeader>) {
        (*block.as_ptr()).prev = self.tail;
        (*block.as_ptr()).next = None;
        if let Some(tail) = self.tail {
            (*tail.as_ptr()).next = Some(block);
        } else {
            self.head = Some(block);
        }
        self.tail = Some(block);
    }

    /// First-fit scan for a free block with room for `size` bytes of payload.
    unsafe fn find_fit(&self, size: usize) -> Option<NonNull<BlockHeader>> {
        let mut cur = self.head;
        while let Some(block) = cur {
            let hdr = &*block.as_ptr();
            if hdr.free && hdr.size >= size {
                return Some(block);
            }
            cur = hdr.next;
        }
        None
    }

    /// Grow the arena by enough pages to satisfy at least `need` payload
    /// bytes, linking the new free block onto the tail.
    fn grow(&mut self, need: usize) -> KernelResult<NonNull<BlockHeader>> {
        let total = need + HEADER_SIZE;
        let pages = total.div_ceil(FRAME_SIZE);
        let base = vmm::alloc_pages(pages, PageFlags::WRITABLE | PageFlags::NO_EXECUTE)?;
        let block = unsafe { new_region_block(base, pages * FRAME_SIZE) };
        self.free_bytes += pages * FRAME_SIZE;
        unsafe { self.push_block(block) };
        Ok(block)
    }
}

unsafe fn new_region_block(base: VirtualAddress, region_size: usize) -> NonNull<BlockHeader> {
    let ptr = base.as_u64() as *mut BlockHeader;
    ptr.write(BlockHeader {
        magic: MAGIC,
        free: true,
        size: region_size - HEADER_SIZE,
        prev: None,
        next: None,
    });
    NonNull::new_unchecked(ptr)
}

/// Initialise the static arena as a single free block and install the
/// global allocator.
pub fn init() -> KernelResult<()> {
    // SAFETY: called once, before any other code touches `STATIC_ARENA`.
    let base = unsafe { core::ptr::addr_of_mut!(STATIC_ARENA) as *mut u8 as u64 };
    let block = unsafe { new_region_block(VirtualAddress::new(base), ARENA_SIZE) };

    let mut state = HEAP.lock();
    state.head = Some(block);
    state.tail = Some(block);
    state.free_bytes = ARENA_SIZE;
    state.used_bytes = 0;
    Ok(())
}

/// Allocate `n` bytes, 16-byte aligned. Splits the found block if the
/// leftover slack is at least `size + header + 64` bytes.
pub fn alloc(n: usize) -> Option<*mut u8> {
    let size = align_up(n.max(1), ALIGN);
    let mut state = HEAP.lock();

    let block = match unsafe { state.find_fit(size) } {
        Some(b) => b,
        None => state.grow(size).ok()?,
    };

    unsafe {
        let hdr = &mut *block.as_ptr();
        let slack = hdr.size - size;
        if slack >= size + HEADER_SIZE + MIN_SPLIT_SLACK {
            let new_size = hdr.size - size - HEADER_SIZE;
            let new_block_addr = block.as_ptr() as usize + HEADER_SIZE + size;
            let new_block_ptr = new_block_addr as *mut BlockHeader;
            new_block_ptr.write(BlockHeader {
                magic: MAGIC,
                free: true,
                size: new_size,
                prev: Some(block),
                next: hdr.next,
            });
            let new_block = NonNull::new_unchecked(new_block_ptr);
            if let Some(next) = hdr.next {
                (*next.as_ptr()).prev = Some(new_block);
            } else {
                state.tail = Some(new_block);
            }
            hdr.next = Some(new_block);
            hdr.size = size;
        }

        hdr.free = false;
        state.used_bytes += hdr.size + HEADER_SIZE;
        state.free_bytes -= hdr.size + HEADER_SIZE;

        Some(data_ptr(block))
    }
}

/// Allocate `count` elements of `size` bytes each, zero-initialised.
pub fn zalloc(size: usize, count: usize) -> Option<*mut u8> {
    let total = size.checked_mul(count)?;
    let ptr = alloc(total)?;
    // SAFETY: `alloc` returns a pointer valid for at least `total` bytes.
    unsafe { core::ptr::write_bytes(ptr, 0, total) };
    Some(ptr)
}

/// Free a pointer previously returned by `alloc`/`zalloc`/`realloc`.
/// Corruption (bad magic) and double-free are reported via `log::error!`
/// and refused rather than escalated, since the corrupted structures are
/// also what the BSOD path would need to render.
pub fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let mut state = HEAP.lock();
    // SAFETY: caller guarantees `ptr` came from this allocator.
    unsafe {
        let block_ptr = block_from_ptr(ptr);
        let hdr = &mut *block_ptr;
        if hdr.magic != MAGIC {
            error!("heap corruption: bad magic at {:p}, refusing to free", ptr);
            return;
        }
        if hdr.free {
            error!("heap double free at {:p}, refusing to free", ptr);
            return;
        }

        hdr.free = true;
        state.used_bytes -= hdr.size + HEADER_SIZE;
        state.free_bytes += hdr.size + HEADER_SIZE;

        let mut block = NonNull::new_unchecked(block_ptr);

        // Coalesce with the next block first so `block` still names a valid
        // node when we go looking at `prev`.
        if let Some(next) = (*block.as_ptr()).next {
            if (*next.as_ptr()).free {
                merge_into(&mut state, block, next);
            }
        }
        if let Some(prev) = (*block.as_ptr()).prev {
            if (*prev.as_ptr()).free {
                merge_into(&mut state, prev, block);
                block = prev;
            }
        }
        let _ = block;
    }
}

/// Merge `right` into `left`; both must be free. `left.size` grows to
/// absorb `right`'s header and payload.
unsafe fn merge_into(state: &mut HeapState, left: NonNull<BlockHeader>, right: NonNull<BlockHeader>) {
    let left_hdr = &mut *left.as_ptr();
    let right_hdr = &*right.as_ptr();
    left_hdr.size += HEADER_SIZE + right_hdr.size;
    left_hdr.next = right_hdr.next;
    if let Some(next) = right_hdr.next {
        (*next.as_ptr()).prev = Some(left);
    } else {
        state.tail = Some(left);
    }
}

/// Resize an allocation, copying the lesser of the old and new sizes.
/// Released the heap lock between the `alloc` and `free` halves — each is
/// its own critical section — so the copy itself runs unlocked.
pub fn realloc(ptr: *mut u8, n: usize) -> Option<*mut u8> {
    if ptr.is_null() {
        return alloc(n);
    }
    // SAFETY: caller guarantees `ptr` came from this allocator.
    let old_size = unsafe { (*block_from_ptr(ptr)).size };
    if n <= old_size {
        return Some(ptr);
    }
    let new_ptr = alloc(n)?;
    // SAFETY: both ranges are valid for `old_size` bytes, non-overlapping
    // (the new block is a distinct allocation).
    unsafe { core::ptr::copy_nonoverlapping(ptr, new_ptr, old_size) };
    free(ptr);
    Some(new_ptr)
}

/// Current heap statistics.
pub fn stats() -> HeapStats {
    let state = HEAP.lock();
    HeapStats {
        used_bytes: state.used_bytes,
        free_bytes: state.free_bytes,
    }
}

struct KernelAllocator;

// SAFETY: `alloc`/`dealloc` delegate to the `IrqSpinlock`-guarded free list,
// which is safe to call concurrently (including from IRQ context, since the
// lock disables interrupts for its duration).
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return core::ptr::null_mut();
        }
        alloc(layout.size()).unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        free(ptr);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return core::ptr::null_mut();
        }
        zalloc(layout.size(), 1).unwrap_or(core::ptr::null_mut())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGN {
            return core::ptr::null_mut();
        }
        realloc(ptr, new_size).unwrap_or(core::ptr::null_mut())
    }
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_heap() {
        // SAFETY: tests run single-threaded, host-target; re-zero the
        // backing array between cases so state doesn't leak.
        unsafe {
            core::ptr::write_bytes(core::ptr::addr_of_mut!(STATIC_ARENA) as *mut u8, 0, ARENA_SIZE);
        }
        init().unwrap();
    }

    #[test_case]
    fn alloc_then_free_returns_to_prior_stats() {
        reset_heap();
        let before = stats();
        let p = alloc(64).unwrap();
        free(p);
        let after = stats();
        assert_eq!(before.used_bytes, after.used_bytes);
        assert_eq!(before.free_bytes, after.free_bytes);
    }

    #[test_case]
    fn exact_size_takes_whole_block_without_splitting() {
        reset_heap();
        let whole = ARENA_SIZE - HEADER_SIZE;
        let p = alloc(whole).unwrap();
        let hdr = unsafe { &*block_from_ptr(p) };
        assert_eq!(hdr.size, whole);
        assert!(hdr.next.is_none());
    }

    #[test_case]
    fn split_leaves_remainder_free() {
        reset_heap();
        let p = alloc(64).unwrap();
        let hdr = unsafe { &*block_from_ptr(p) };
        assert_eq!(hdr.size, 64);
        assert!(hdr.next.is_some());
        free(p);
    }

    #[test_case]
    fn adjacent_frees_coalesce() {
        reset_heap();
        let a = alloc(64).unwrap();
        let b = alloc(64).unwrap();
        free(a);
        free(b);
        // SAFETY: after both frees, the whole arena is one block again.
        let head = unsafe { &*(HEAP.lock().head.unwrap().as_ptr()) };
        assert!(head.next.is_none());
        assert_eq!(head.size, ARENA_SIZE - HEADER_SIZE);
    }

    #[test_case]
    fn double_free_is_refused_not_fatal() {
        reset_heap();
        let p = alloc(32).unwrap();
        free(p);
        free(p); // must not panic or corrupt state further
    }
}
