//! Restartable block operations
//!
//! Each operation works one page-bounded chunk at a time and commits
//! `a`, `b` and `c` after every chunk. A fault on a later chunk leaves the
//! registers describing only the remaining work, so re-executing the
//! instruction after the handler maps the page never repeats a chunk.

use super::fastpath::Slot;
use super::mmu::AccessType;
use super::trap::Fault;
use super::Cpu;
use crate::memory::{PhysicalMemory, PAGE_MASK, PAGE_SIZE};

#[inline]
fn page_left(v: u32) -> u32 {
    PAGE_SIZE - (v & PAGE_MASK)
}

impl Cpu {
    /// `MCPY`: copy `c` bytes from `b` to `a`
    pub(super) fn block_copy(&mut self, mem: &mut PhysicalMemory) -> Result<(), Fault> {
        while self.state.c != 0 {
            let (a, b, c) = (self.state.a, self.state.b, self.state.c);
            let src = self.translate(mem, Slot::Data, b, AccessType::Load)?;
            let dst = self.translate(mem, Slot::Data, a, AccessType::Store)?;
            let u = page_left(a).min(c).min(page_left(b));
            if !mem.copy_within(src, dst, u as usize) {
                return Err(Fault::BadPhysicalAddress(Some(a)));
            }
            self.block_bytes += u as u64;
            self.state.a = a.wrapping_add(u);
            self.state.b = b.wrapping_add(u);
            self.state.c = c - u;
        }
        Ok(())
    }

    /// `MCMP`: compare `c` bytes at `a` against `b`
    pub(super) fn block_compare(&mut self, mem: &mut PhysicalMemory) -> Result<(), Fault> {
        loop {
            let (a, b, c) = (self.state.a, self.state.b, self.state.c);
            if c == 0 {
                self.state.a = 0;
                return Ok(());
            }
            let pb = self.translate(mem, Slot::Data, b, AccessType::Load)?;
            let pa = self.translate(mem, Slot::Data, a, AccessType::Load)?;
            let u = page_left(a).min(c).min(page_left(b)) as usize;
            let (x, y) = match (mem.slice(pa, u), mem.slice(pb, u)) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(Fault::BadPhysicalAddress(Some(a))),
            };
            if let Some((l, r)) = x.iter().zip(y).find(|(l, r)| l != r) {
                self.state.a = (*l as i32 - *r as i32) as u32;
                self.state.b = b.wrapping_add(c);
                self.state.c = 0;
                return Ok(());
            }
            self.state.a = a.wrapping_add(u as u32);
            self.state.b = b.wrapping_add(u as u32);
            self.state.c = c - u as u32;
        }
    }

    /// `MCHR`: find byte `b` in the `c` bytes at `a`
    pub(super) fn block_scan(&mut self, mem: &mut PhysicalMemory) -> Result<(), Fault> {
        let needle = self.state.b as u8;
        loop {
            let (a, c) = (self.state.a, self.state.c);
            if c == 0 {
                self.state.a = 0;
                return Ok(());
            }
            let pa = self.translate(mem, Slot::Data, a, AccessType::Load)?;
            let u = page_left(a).min(c);
            let chunk = mem
                .slice(pa, u as usize)
                .ok_or(Fault::BadPhysicalAddress(Some(a)))?;
            if let Some(i) = chunk.iter().position(|&x| x == needle) {
                self.state.a = a.wrapping_add(i as u32);
                self.state.c = 0;
                return Ok(());
            }
            self.state.a = a.wrapping_add(u);
            self.state.c = c - u;
        }
    }

    /// `MSET`: fill `c` bytes at `a` with `b`
    pub(super) fn block_fill(&mut self, mem: &mut PhysicalMemory) -> Result<(), Fault> {
        let fill = self.state.b as u8;
        while self.state.c != 0 {
            let (a, c) = (self.state.a, self.state.c);
            let pa = self.translate(mem, Slot::Data, a, AccessType::Store)?;
            let u = page_left(a).min(c);
            mem.slice_mut(pa, u as usize)
                .ok_or(Fault::BadPhysicalAddress(Some(a)))?
                .fill(fill);
            self.block_bytes += u as u64;
            self.state.a = a.wrapping_add(u);
            self.state.c = c - u;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmulatorConfig;
    use crate::cpu::mmu::{AddressSpace, Pte};
    use crate::memory::Bus;

    const PDIR: u32 = 0x1000;
    const PTAB: u32 = 0x2000;

    fn paged_cpu() -> (Cpu, PhysicalMemory) {
        let mut mem = PhysicalMemory::with_megabytes(1);
        let mut cpu = Cpu::new(&EmulatorConfig::default());
        cpu.reset(0, 0x8000);
        mem.write32(PDIR, PTAB | (Pte::PRESENT | Pte::WRITABLE | Pte::USER).bits());
        cpu.state.space = AddressSpace {
            paging: true,
            pdir: Some(PDIR),
        };
        (cpu, mem)
    }

    fn map(mem: &mut PhysicalMemory, vpage: u32, frame: u32) {
        mem.write32(PTAB + vpage * 4, frame | (Pte::PRESENT | Pte::WRITABLE).bits());
    }

    #[test]
    fn test_copy_resumes_after_fault_without_recopying() {
        let (mut cpu, mut mem) = paged_cpu();
        // source: pages 0x10..0x13 -> frames 0x10000.., dest pages 0x20..0x23
        for i in 0..3 {
            map(&mut mem, 0x10 + i, 0x10000 + i * PAGE_SIZE);
            for j in 0..PAGE_SIZE {
                mem.write8(0x10000 + i * PAGE_SIZE + j, (i * 7 + j) as u8);
            }
        }
        map(&mut mem, 0x20, 0x20000);
        map(&mut mem, 0x22, 0x22000);

        cpu.state.a = 0x20000;
        cpu.state.b = 0x10000;
        cpu.state.c = 3 * PAGE_SIZE;
        assert_eq!(
            cpu.block_copy(&mut mem),
            Err(Fault::WritePageFault(0x21000))
        );
        assert_eq!(cpu.state.a, 0x21000);
        assert_eq!(cpu.state.c, 2 * PAGE_SIZE);
        assert_eq!(cpu.block_bytes(), PAGE_SIZE as u64);

        map(&mut mem, 0x21, 0x21000);
        cpu.block_copy(&mut mem).unwrap();
        assert_eq!(cpu.state.c, 0);
        assert_eq!(cpu.block_bytes(), 3 * PAGE_SIZE as u64);
        for off in [0, PAGE_SIZE + 5, 3 * PAGE_SIZE - 1] {
            assert_eq!(mem.read8(0x20000 + off), mem.read8(0x10000 + off));
        }
    }

    #[test]
    fn test_compare_reports_byte_difference() {
        let (mut cpu, mut mem) = paged_cpu();
        cpu.state.space = AddressSpace::default();
        mem.slice_mut(0x3000, 4).unwrap().copy_from_slice(b"abcd");
        mem.slice_mut(0x4ffe, 4).unwrap().copy_from_slice(b"abzd");

        cpu.state.a = 0x3000;
        cpu.state.b = 0x4ffe;
        cpu.state.c = 4;
        cpu.block_compare(&mut mem).unwrap();
        assert_eq!(cpu.state.a as i32, b'c' as i32 - b'z' as i32);
        assert_eq!(cpu.state.b, 0x4ffe + 4);
        assert_eq!(cpu.state.c, 0);

        cpu.state.a = 0x3000;
        cpu.state.b = 0x3000;
        cpu.state.c = 4;
        cpu.block_compare(&mut mem).unwrap();
        assert_eq!(cpu.state.a, 0);
    }

    #[test]
    fn test_scan_and_fill_cross_pages() {
        let (mut cpu, mut mem) = paged_cpu();
        cpu.state.space = AddressSpace::default();

        cpu.state.a = 0x5ff0;
        cpu.state.b = 0xaa;
        cpu.state.c = 0x20;
        cpu.block_fill(&mut mem).unwrap();
        assert_eq!((cpu.state.a, cpu.state.c), (0x6010, 0));
        assert_eq!(mem.read8(0x600f), 0xaa);
        assert_eq!(mem.read8(0x6010), 0);

        mem.write8(0x6008, 0x55);
        cpu.state.a = 0x5ff0;
        cpu.state.b = 0x55;
        cpu.state.c = 0x20;
        cpu.block_scan(&mut mem).unwrap();
        assert_eq!((cpu.state.a, cpu.state.c), (0x6008, 0));

        cpu.state.a = 0x5ff0;
        cpu.state.b = 0x77;
        cpu.state.c = 0x20;
        cpu.block_scan(&mut mem).unwrap();
        assert_eq!(cpu.state.a, 0);
    }

    type BlockOp = fn(&mut Cpu, &mut PhysicalMemory) -> Result<(), Fault>;

    /// Run `op` over identity-mapped pages 0x10..0x30, once with `hole`
    /// unmapped until the first fault and once fully mapped, and require
    /// the same registers, memory and byte count from both.
    fn resume_matches_mapped_run(
        op: BlockOp,
        regs: (u32, u32, u32),
        hole: u32,
        fault: Fault,
        setup: fn(&mut PhysicalMemory),
    ) -> (u32, u32, u32) {
        let mut outcomes = Vec::new();
        for with_hole in [true, false] {
            let (mut cpu, mut mem) = paged_cpu();
            for vpage in 0x10..0x30 {
                map(&mut mem, vpage, vpage * PAGE_SIZE);
            }
            setup(&mut mem);
            (cpu.state.a, cpu.state.b, cpu.state.c) = regs;
            if with_hole {
                mem.write32(PTAB + hole * 4, 0);
                assert_eq!(op(&mut cpu, &mut mem), Err(fault));
                map(&mut mem, hole, hole * PAGE_SIZE);
            }
            op(&mut cpu, &mut mem).unwrap();
            let state = (cpu.state.a, cpu.state.b, cpu.state.c);
            let bytes = mem.slice(0x10000, 0x20000).unwrap().to_vec();
            outcomes.push((state, bytes, cpu.block_bytes()));
        }
        assert!(outcomes[0] == outcomes[1]);
        outcomes[0].0
    }

    fn twin_buffers(mem: &mut PhysicalMemory) {
        for j in 0..3 * PAGE_SIZE {
            mem.write8(0x10000 + j, (j % 251) as u8);
            mem.write8(0x20000 + j, (j % 251) as u8);
        }
        mem.write8(0x12100, b'x');
        mem.write8(0x22100, b'y');
    }

    #[test]
    fn test_compare_resumes_after_fault() {
        let (a, b, c) = resume_matches_mapped_run(
            Cpu::block_compare,
            (0x10800, 0x20800, 0x2000),
            0x21,
            Fault::ReadPageFault(0x21000),
            twin_buffers,
        );
        assert_eq!(a as i32, b'x' as i32 - b'y' as i32);
        assert_eq!((b, c), (0x22800, 0));
    }

    #[test]
    fn test_scan_resumes_after_fault() {
        let (a, _, c) = resume_matches_mapped_run(
            Cpu::block_scan,
            (0x10f00, 0x5a, 0x3000),
            0x11,
            Fault::ReadPageFault(0x11000),
            |mem| mem.write8(0x12345, 0x5a),
        );
        assert_eq!((a, c), (0x12345, 0));
    }

    #[test]
    fn test_fill_resumes_after_fault_without_refilling() {
        let (a, _, c) = resume_matches_mapped_run(
            Cpu::block_fill,
            (0x10f00, 0xcc, 0x2200),
            0x12,
            Fault::WritePageFault(0x12000),
            |_| {},
        );
        assert_eq!((a, c), (0x13100, 0));
    }
}
