//! Virtual memory manager: owns the kernel's page-table mapper and a
//! monotonic high-address virtual allocator for `alloc_pages`/`free_pages`.
//!
//! The boot stub leaves CR3 pointing at an identity + higher-half mapping
//! for the kernel image; this module extends that same hierarchy rather
//! than building a second one, so code already running stays mapped.

#![allow(dead_code)]

use crate::arch::x86_64;
use crate::error::{KernelError, KernelResult};
use crate::sync::IrqSpinlock;

use super::{
    page_table::{PageMapper, PageTable},
    pmm, FrameNumber, MemoryRegion, PageFlags, PhysicalAddress, VirtualAddress, FRAME_SIZE,
};

/// Base of the virtual range `alloc_pages` hands out from. Chosen well above
/// any identity or higher-half kernel mapping so it can never collide.
const KERNEL_VIRT_ALLOC_BASE: u64 = 0xFFFF_FF00_0000_0000;

struct KernelVmm {
    mapper: PageMapper,
    next_virt: u64,
}

static VMM: IrqSpinlock<Option<KernelVmm>> = IrqSpinlock::new(None);

/// Take over the page table the boot stub already installed and get ready
/// to serve `map`/`unmap`/`alloc_pages`.
pub fn init_kernel() -> KernelResult<()> {
    let l4_phys = x86_64::read_cr3();
    // SAFETY: CR3 names the currently active, identity-mapped PML4; it stays
    // valid for the kernel's lifetime.
    let mapper = unsafe { PageMapper::new(l4_phys as *mut PageTable) };
    *VMM.lock() = Some(KernelVmm {
        mapper,
        next_virt: KERNEL_VIRT_ALLOC_BASE,
    });
    Ok(())
}

fn with_vmm<R>(f: impl FnOnce(&mut KernelVmm) -> KernelResult<R>) -> KernelResult<R> {
    let mut guard = VMM.lock();
    let vmm = guard.as_mut().ok_or(KernelError::NotInitialized { subsystem: "vmm" })?;
    f(vmm)
}

/// Install a mapping for a single 4 KiB page.
pub fn map(virt: VirtualAddress, phys: PhysicalAddress, flags: PageFlags) -> KernelResult<()> {
    with_vmm(|vmm| {
        vmm.mapper.map_page(virt, FrameNumber::containing(phys), flags)?;
        x86_64::tlb_flush_address(virt.as_u64());
        Ok(())
    })
}

/// Remove the mapping for `virt` and return its backing frame to the PMM.
pub fn unmap(virt: VirtualAddress) -> KernelResult<()> {
    with_vmm(|vmm| {
        let frame = vmm.mapper.unmap_page(virt)?;
        pmm::free(frame);
        Ok(())
    })
}

/// Walk the page tables and return the physical address `virt` maps to, if
/// any mapping exists.
pub fn translate(virt: VirtualAddress) -> Option<PhysicalAddress> {
    let guard = VMM.lock();
    guard.as_ref()?.mapper.translate(virt)
}

/// Allocate `n` physical frames and map them contiguously starting at the
/// next slot of the kernel's virtual bump allocator. Returns the base
/// virtual address.
pub fn alloc_pages(n: usize, flags: PageFlags) -> KernelResult<VirtualAddress> {
    with_vmm(|vmm| {
        let base_virt = VirtualAddress::new(vmm.next_virt);
        for i in 0..n {
            let frame = pmm::alloc().ok_or(KernelError::OutOfMemory {
                requested: FRAME_SIZE,
                available: 0,
            })?;
            let page = VirtualAddress::new(vmm.next_virt + (i * FRAME_SIZE) as u64);
            vmm.mapper.map_page(page, frame, flags | PageFlags::PRESENT)?;
            x86_64::tlb_flush_address(page.as_u64());
        }
        vmm.next_virt += (n * FRAME_SIZE) as u64;
        Ok(base_virt)
    })
}

/// Translate, unmap, and free each page in `[virt, virt + n * FRAME_SIZE)`.
/// The virtual range itself is not reclaimed — see the design note on the
/// bump allocator leaking address space.
pub fn free_pages(virt: VirtualAddress, n: usize) -> KernelResult<()> {
    with_vmm(|vmm| {
        for i in 0..n {
            let page = VirtualAddress::new(virt.as_u64() + (i * FRAME_SIZE) as u64);
            let frame = vmm.mapper.unmap_page(page)?;
            pmm::free(frame);
            x86_64::tlb_flush_address(page.as_u64());
        }
        Ok(())
    })
}

/// Map every usable region the Multiboot2 memory map reported, identity
/// mapped, so the PMM's frames are all reachable through this hierarchy too.
/// Regions already mapped (most of the low range, by the boot stub) are
/// skipped.
pub fn load_bootloader_mappings(memory_map: &[MemoryRegion]) -> KernelResult<()> {
    for region in memory_map {
        if !region.usable {
            continue;
        }
        let start = region.start & !(FRAME_SIZE as u64 - 1);
        let end = (region.start + region.size + FRAME_SIZE as u64 - 1) & !(FRAME_SIZE as u64 - 1);

        let mut addr = start;
        while addr < end {
            let virt = VirtualAddress::new(addr);
            if translate(virt).is_none() {
                let phys = PhysicalAddress::new(addr);
                map(virt, phys, PageFlags::PRESENT | PageFlags::WRITABLE)?;
            }
            addr += FRAME_SIZE as u64;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn virt_alloc_base_is_page_aligned() {
        assert_eq!(KERNEL_VIRT_ALLOC_BASE % FRAME_SIZE as u64, 0);
    }
}
