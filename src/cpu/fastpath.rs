//! Per-slot page caches in front of the soft TLB
//!
//! Instruction fetches and stack traffic tend to stay on one page for a long
//! run of instructions. `PageCached` remembers the current page translation
//! for the program counter and the stack pointer and serves repeated
//! accesses to that page without a table probe. `Revalidating` keeps no state
//! at all. Both sit behind the same trait so the dispatcher, the walker and
//! the fault delivery code are shared between the two modes.

use super::tlb::{Access, Table};

/// Which address stream an access belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Instruction fetch and pc-relative data
    Code,
    /// sp-relative data and pushes/pops
    Stack,
    /// Everything else; never cached here
    Data,
}

pub trait AccessPath {
    /// Cached page frame for `vpage`, if still current
    fn probe(&mut self, slot: Slot, table: Table, vpage: u32, generation: u64) -> Option<u32>;

    /// Remember a translation the soft TLB just produced
    fn fill(&mut self, slot: Slot, table: Table, vpage: u32, frame: u32, generation: u64);

    /// Forget everything
    fn invalidate(&mut self);

    fn name(&self) -> &'static str;
}

/// Every access goes to the soft TLB
#[derive(Debug, Default, Clone, Copy)]
pub struct Revalidating;

impl AccessPath for Revalidating {
    #[inline(always)]
    fn probe(&mut self, _: Slot, _: Table, _: u32, _: u64) -> Option<u32> {
        None
    }

    #[inline(always)]
    fn fill(&mut self, _: Slot, _: Table, _: u32, _: u32, _: u64) {}

    fn invalidate(&mut self) {}

    fn name(&self) -> &'static str {
        "safe"
    }
}

#[derive(Debug, Clone, Copy)]
struct PageEntry {
    table: Table,
    vpage: u32,
    frame: u32,
    generation: u64,
}

/// Single-page cache per (slot, access) pair, lazily invalidated by the soft
/// TLB generation
#[derive(Debug, Default)]
pub struct PageCached {
    entries: [[Option<PageEntry>; 2]; 2],
    hits: u64,
}

impl PageCached {
    #[inline(always)]
    fn index(slot: Slot, table: Table) -> Option<(usize, usize)> {
        let s = match slot {
            Slot::Code => 0,
            Slot::Stack => 1,
            Slot::Data => return None,
        };
        let a = match table.access {
            Access::Read => 0,
            Access::Write => 1,
        };
        Some((s, a))
    }

    /// Accesses served without touching the soft TLB
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

impl AccessPath for PageCached {
    #[inline(always)]
    fn probe(&mut self, slot: Slot, table: Table, vpage: u32, generation: u64) -> Option<u32> {
        let (s, a) = Self::index(slot, table)?;
        match self.entries[s][a] {
            Some(e) if e.vpage == vpage && e.table == table && e.generation == generation => {
                self.hits += 1;
                Some(e.frame)
            }
            _ => None,
        }
    }

    #[inline(always)]
    fn fill(&mut self, slot: Slot, table: Table, vpage: u32, frame: u32, generation: u64) {
        if let Some((s, a)) = Self::index(slot, table) {
            self.entries[s][a] = Some(PageEntry {
                table,
                vpage,
                frame,
                generation,
            });
        }
    }

    fn invalidate(&mut self) {
        self.entries = [[None; 2]; 2];
    }

    fn name(&self) -> &'static str {
        "fast"
    }
}
