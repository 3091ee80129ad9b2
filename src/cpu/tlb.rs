//! Soft TLB
//!
//! One entry per possible virtual page (4 GiB / 4 KiB = 1M entries). Each
//! entry caches the physical frame of the last successful walk together with
//! a small permission set covering the four (privilege, access) combinations.
//! Only a bounded number of entries may be live at once; overflowing that
//! bound flushes everything before the new entry goes in.

use bitflags::bitflags;

use crate::memory::{PAGE_MASK, PAGE_SHIFT};

/// Number of virtual pages in the 32-bit address space
pub const VPAGES: usize = 1 << (32 - PAGE_SHIFT);

/// Default bound on live translations
pub const DEFAULT_CAPACITY: usize = 4096;

bitflags! {
    /// Which of the four translation tables hold a valid entry for a page
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Perms: u8 {
        const KERNEL_READ = 1 << 0;
        const KERNEL_WRITE = 1 << 1;
        const USER_READ = 1 << 2;
        const USER_WRITE = 1 << 3;
    }
}

/// Privilege level of an access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

impl Privilege {
    #[inline(always)]
    pub fn from_user(user: bool) -> Self {
        if user {
            Privilege::User
        } else {
            Privilege::Kernel
        }
    }
}

/// Kind of access a translation is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// One of the four logical translation tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    pub privilege: Privilege,
    pub access: Access,
}

impl Table {
    #[inline(always)]
    pub fn new(user: bool, access: Access) -> Self {
        Table {
            privilege: Privilege::from_user(user),
            access,
        }
    }

    #[inline(always)]
    fn bit(self) -> Perms {
        match (self.privilege, self.access) {
            (Privilege::Kernel, Access::Read) => Perms::KERNEL_READ,
            (Privilege::Kernel, Access::Write) => Perms::KERNEL_WRITE,
            (Privilege::User, Access::Read) => Perms::USER_READ,
            (Privilege::User, Access::Write) => Perms::USER_WRITE,
        }
    }

    /// The table that grants writes at the same privilege level
    #[inline(always)]
    fn write_bit(self) -> Perms {
        match self.privilege {
            Privilege::Kernel => Perms::KERNEL_WRITE,
            Privilege::User => Perms::USER_WRITE,
        }
    }
}

/// Outcome of a soft TLB probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Invalid,
    Valid {
        /// Physical address of the page frame
        frame: u32,
        /// Whether the same privilege level may also write the page
        writable: bool,
    },
}

#[cfg(test)]
impl Translation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Translation::Valid { .. })
    }

    /// Physical address for `vaddr`, if this translation is valid
    pub fn physical(&self, vaddr: u32) -> Option<u32> {
        match *self {
            Translation::Valid { frame, .. } => Some(frame | (vaddr & PAGE_MASK)),
            Translation::Invalid => None,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct TlbEntry {
    frame: u32,
    perms: Perms,
}

/// Translation cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbStats {
    pub hits: u64,
    pub misses: u64,
    pub flushes: u64,
}

pub struct SoftTlb {
    entries: Vec<TlbEntry>,
    /// Virtual pages that currently hold an entry
    live: Vec<u32>,
    capacity: usize,
    /// Bumped on every flush or overwrite so that derived caches can detect
    /// staleness
    generation: u64,
    stats: TlbStats,
}

impl Default for SoftTlb {
    fn default() -> Self {
        SoftTlb::new(DEFAULT_CAPACITY)
    }
}

impl SoftTlb {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, VPAGES);
        SoftTlb {
            entries: vec![TlbEntry::default(); VPAGES],
            live: Vec::with_capacity(capacity),
            capacity,
            generation: 0,
            stats: TlbStats::default(),
        }
    }

    #[inline(always)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of pages with at least one valid table entry
    pub fn live_pages(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> TlbStats {
        self.stats
    }

    /// Probe one table for a virtual page number
    #[inline(always)]
    pub fn lookup(&mut self, table: Table, vpage: u32) -> Translation {
        let entry = self.entries[vpage as usize];
        if entry.perms.contains(table.bit()) {
            self.stats.hits += 1;
            Translation::Valid {
                frame: entry.frame,
                writable: entry.perms.contains(table.write_bit()),
            }
        } else {
            self.stats.misses += 1;
            Translation::Invalid
        }
    }

    /// Cache the outcome of a successful walk. Overwrites any previous entry
    /// for the page in all four tables.
    pub fn insert(&mut self, vpage: u32, frame: u32, writable: bool, user_accessible: bool) {
        let slot = vpage as usize;
        if self.entries[slot].perms.is_empty() {
            if self.live.len() >= self.capacity {
                self.flush();
            }
            self.live.push(vpage);
        } else {
            // an existing translation changes shape
            self.generation = self.generation.wrapping_add(1);
        }

        let mut perms = Perms::KERNEL_READ;
        if writable {
            perms |= Perms::KERNEL_WRITE;
        }
        if user_accessible {
            perms |= Perms::USER_READ;
            if writable {
                perms |= Perms::USER_WRITE;
            }
        }
        self.entries[slot] = TlbEntry {
            frame: frame & !PAGE_MASK,
            perms,
        };
    }

    /// Invalidate every live entry in all four tables
    pub fn flush(&mut self) {
        for vpage in self.live.drain(..) {
            self.entries[vpage as usize] = TlbEntry::default();
        }
        self.generation = self.generation.wrapping_add(1);
        self.stats.flushes += 1;
    }
}
