//! Two-level page walker and translation front end
//!
//! The page directory holds 1024 entries, one per 4 MiB region; each
//! present entry points at a page table of 1024 entries, one per 4 KiB page.
//! Both levels live in guest memory and are owned by guest software; the
//! walker only ever sets the Accessed and Dirty bits.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::fastpath::{AccessPath, Slot};
use super::tlb::{Access, SoftTlb, Table, TlbStats, Translation};
use super::trap::Fault;
use crate::memory::{Bus, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};

bitflags! {
    /// Page directory / page table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Pte: u32 {
        const PRESENT = 0x001;
        const WRITABLE = 0x002;
        const USER = 0x004;
        const ACCESSED = 0x020;
        const DIRTY = 0x040;
    }
}

/// Access type for translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Fetch,
    Load,
    Store,
}

impl AccessType {
    #[inline(always)]
    pub fn table_access(self) -> Access {
        match self {
            AccessType::Store => Access::Write,
            AccessType::Fetch | AccessType::Load => Access::Read,
        }
    }

    #[inline(always)]
    fn page_fault(self, vaddr: u32) -> Fault {
        match self {
            AccessType::Fetch => Fault::InstructionPageFault(vaddr),
            AccessType::Load => Fault::ReadPageFault(vaddr),
            AccessType::Store => Fault::WritePageFault(vaddr),
        }
    }
}

/// Paging registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpace {
    pub paging: bool,
    /// Physical address of the page directory (page aligned)
    pub pdir: Option<u32>,
}

/// Result of a successful walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walk {
    pub frame: u32,
    pub writable: bool,
    pub user_accessible: bool,
}

/// Walk the guest page tables for `vaddr`.
///
/// A read grants write permission only once the page is dirty so that the
/// first write to a page always comes back here and sets `DIRTY`.
pub fn walk<B: Bus>(
    bus: &mut B,
    space: AddressSpace,
    vaddr: u32,
    access: AccessType,
    user: bool,
) -> Result<Walk, Fault> {
    if !space.paging {
        return check_frame(
            bus,
            vaddr,
            Walk {
                frame: vaddr & !PAGE_MASK,
                writable: true,
                user_accessible: true,
            },
        );
    }

    let Some(pdir) = space.pdir else {
        return Err(Fault::BadPhysicalAddress(Some(vaddr)));
    };
    let pde_addr = pdir.wrapping_add((vaddr >> 22) << 2);
    let pde = Pte::from_bits_retain(bus.read32(pde_addr));
    if !pde.contains(Pte::PRESENT) {
        return Err(access.page_fault(vaddr));
    }
    if !pde.contains(Pte::ACCESSED) {
        bus.write32(pde_addr, (pde | Pte::ACCESSED).bits());
    }
    if pde.bits() >= bus.size() {
        return Err(Fault::BadPhysicalAddress(Some(vaddr)));
    }

    let pte_addr = (pde.bits() & !PAGE_MASK) + ((vaddr >> 10) & 0xffc);
    let pte = Pte::from_bits_retain(bus.read32(pte_addr));
    let q = pte & pde;
    let user_accessible = q.contains(Pte::USER);

    if !pte.contains(Pte::PRESENT) || !(user_accessible || !user) {
        return Err(access.page_fault(vaddr));
    }

    let writable = match access {
        AccessType::Store => {
            if !q.contains(Pte::WRITABLE) {
                return Err(access.page_fault(vaddr));
            }
            let marked = pte | Pte::ACCESSED | Pte::DIRTY;
            if marked != pte {
                bus.write32(pte_addr, marked.bits());
            }
            true
        }
        AccessType::Fetch | AccessType::Load => {
            if !pte.contains(Pte::ACCESSED) {
                bus.write32(pte_addr, (pte | Pte::ACCESSED).bits());
            }
            pte.contains(Pte::DIRTY) && q.contains(Pte::WRITABLE)
        }
    };

    check_frame(
        bus,
        vaddr,
        Walk {
            frame: pte.bits() & !PAGE_MASK,
            writable,
            user_accessible,
        },
    )
}

#[inline(always)]
fn check_frame<B: Bus>(bus: &B, vaddr: u32, walk: Walk) -> Result<Walk, Fault> {
    if walk.frame >= bus.size() {
        Err(Fault::BadPhysicalAddress(Some(vaddr)))
    } else {
        Ok(walk)
    }
}

/// Translation front end: fast path, then soft TLB, then the walker
pub struct Mmu {
    tlb: SoftTlb,
    path: Box<dyn AccessPath>,
}

impl Mmu {
    pub fn new(tlb_capacity: usize, path: Box<dyn AccessPath>) -> Self {
        Mmu {
            tlb: SoftTlb::new(tlb_capacity),
            path,
        }
    }

    /// Translate `vaddr` to a physical address, filling the caches on a miss
    #[inline]
    pub fn translate<B: Bus>(
        &mut self,
        bus: &mut B,
        space: AddressSpace,
        slot: Slot,
        vaddr: u32,
        access: AccessType,
        user: bool,
    ) -> Result<u32, Fault> {
        let table = Table::new(user, access.table_access());
        let vpage = vaddr >> PAGE_SHIFT;
        let offset = vaddr & PAGE_MASK;
        let generation = self.tlb.generation();

        if let Some(frame) = self.path.probe(slot, table, vpage, generation) {
            return Ok(frame | offset);
        }

        let frame = match self.tlb.lookup(table, vpage) {
            Translation::Valid { frame, .. } => frame,
            Translation::Invalid => {
                let w = walk(bus, space, vaddr, access, user)?;
                self.tlb.insert(vpage, w.frame, w.writable, w.user_accessible);
                w.frame
            }
        };

        self.path.fill(slot, table, vpage, frame, self.tlb.generation());
        Ok(frame | offset)
    }

    /// Translate every page of `[vaddr, vaddr + len)` without touching memory
    /// contents, so that a host call can run knowing no fault will follow.
    pub fn translate_range<B: Bus>(
        &mut self,
        bus: &mut B,
        space: AddressSpace,
        vaddr: u32,
        len: u32,
        access: AccessType,
        user: bool,
    ) -> Result<(), Fault> {
        let mut addr = vaddr;
        let mut left = len;
        while left > 0 {
            self.translate(bus, space, Slot::Data, addr, access, user)?;
            let chunk = (PAGE_SIZE - (addr & PAGE_MASK)).min(left);
            addr = addr.wrapping_add(chunk);
            left -= chunk;
        }
        Ok(())
    }

    /// Drop every cached translation
    pub fn flush(&mut self) {
        self.tlb.flush();
        self.path.invalidate();
    }

    /// Drop only the fast-path page caches
    pub fn invalidate_path(&mut self) {
        self.path.invalidate();
    }

    pub fn stats(&self) -> TlbStats {
        self.tlb.stats()
    }

    pub fn path_name(&self) -> &'static str {
        self.path.name()
    }
}
