//! Memory management: physical frame allocator, paging, and kernel heap.
//!
//! Initialisation is a strict chain — `pmm::init` must run before anything
//! touches `vmm`, and `vmm::init_kernel` before `heap::init`, since the heap
//! grows by asking the VMM for fresh pages (L2 -> L3 -> L4).

pub mod heap;
pub mod page_table;
pub mod pmm;
pub mod vmm;

use crate::error::KernelResult;

/// Size of a physical frame and of a small (4 KiB) page.
pub const FRAME_SIZE: usize = 4096;
/// Size of a large (2 MiB) page.
pub const LARGE_PAGE_SIZE: usize = 0x20_0000;
/// Size of a huge (1 GiB) page.
pub const HUGE_PAGE_SIZE: usize = 0x4000_0000;

/// A physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_aligned(&self, align: u64) -> bool {
        self.0 % align == 0
    }
}

/// A virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    pub const fn is_aligned(&self, align: u64) -> bool {
        self.0 % align == 0
    }
}

/// Index of a physical frame (`address / FRAME_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * FRAME_SIZE as u64)
    }

    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.as_u64() / FRAME_SIZE as u64)
    }
}

bitflags::bitflags! {
    /// Page-table entry flags, laid out exactly as the x86_64 PTE format
    /// expects so a `PageFlags` value can be OR'd straight into an entry
    /// alongside the shifted frame address.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
        const NO_EXECUTE    = 1 << 63;
    }
}

/// Page size for a mapping. Large and huge pages are recognised on
/// translation but this kernel never creates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Small,
    Large,
    Huge,
}

impl PageSize {
    pub const fn bytes(self) -> usize {
        match self {
            Self::Small => FRAME_SIZE,
            Self::Large => LARGE_PAGE_SIZE,
            Self::Huge => HUGE_PAGE_SIZE,
        }
    }
}

/// A physical memory range reported by the Multiboot2 memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
    pub usable: bool,
}

/// Bring up physical frames, kernel page tables, and the heap, in that order.
///
/// `mem_bytes` is the highest usable physical address the Multiboot2 memory
/// map reported; the kernel image itself is marked used from the
/// linker-provided `kernel_end` symbol, independent of this value.
pub fn init(mem_bytes: usize) -> KernelResult<()> {
    pmm::init(mem_bytes);
    vmm::init_kernel()?;
    heap::init()?;
    Ok(())
}
