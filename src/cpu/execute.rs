//! Instruction execution
//!
//! Every memory-touching instruction translates its address before it
//! changes any register, so a faulting instruction can simply be run again.

use tracing::{debug, info};

use super::decode::{Instruction, Opcode};
use super::fastpath::Slot;
use super::mmu::AccessType;
use super::trap::{self, Fault, Stop};
use super::{Cpu, Flow, POLL_INTERVAL};
use crate::devices::net::MAX_TRANSFER;
use crate::devices::{ConsoleEvent, HostBridge};
use crate::error::FatalReason;
use crate::memory::{Bus, PhysicalMemory, PAGE_MASK, PAGE_SIZE};

/// Integer load widths
#[derive(Debug, Clone, Copy)]
enum Width {
    Word,
    /// signed 16
    Short,
    /// unsigned 16
    Half,
    /// signed 8
    Char,
    /// unsigned 8
    Byte,
}

/// Float load/store widths
#[derive(Debug, Clone, Copy)]
enum FWidth {
    Double,
    Float,
}

impl Cpu {
    #[inline(always)]
    fn load_int(&mut self, mem: &mut PhysicalMemory, slot: Slot, v: u32, w: Width) -> Result<u32, Fault> {
        Ok(match w {
            Width::Word => {
                let pa = self.translate(mem, slot, v & !3, AccessType::Load)?;
                mem.read32(pa)
            }
            Width::Short => {
                let pa = self.translate(mem, slot, v & !1, AccessType::Load)?;
                mem.read16(pa) as i16 as i32 as u32
            }
            Width::Half => {
                let pa = self.translate(mem, slot, v & !1, AccessType::Load)?;
                mem.read16(pa) as u32
            }
            Width::Char => {
                let pa = self.translate(mem, slot, v, AccessType::Load)?;
                mem.read8(pa) as i8 as i32 as u32
            }
            Width::Byte => {
                let pa = self.translate(mem, slot, v, AccessType::Load)?;
                mem.read8(pa) as u32
            }
        })
    }

    #[inline(always)]
    fn load_float(&mut self, mem: &mut PhysicalMemory, slot: Slot, v: u32, w: FWidth) -> Result<f64, Fault> {
        Ok(match w {
            FWidth::Double => {
                let pa = self.translate(mem, slot, v & !7, AccessType::Load)?;
                f64::from_bits(mem.read64(pa))
            }
            FWidth::Float => {
                let pa = self.translate(mem, slot, v & !3, AccessType::Load)?;
                f32::from_bits(mem.read32(pa)) as f64
            }
        })
    }

    #[inline(always)]
    fn store_word(&mut self, mem: &mut PhysicalMemory, slot: Slot, v: u32, value: u32) -> Result<(), Fault> {
        let pa = self.translate(mem, slot, v & !3, AccessType::Store)?;
        mem.write32(pa, value);
        Ok(())
    }

    #[inline(always)]
    fn store_half(&mut self, mem: &mut PhysicalMemory, slot: Slot, v: u32, value: u32) -> Result<(), Fault> {
        let pa = self.translate(mem, slot, v & !1, AccessType::Store)?;
        mem.write16(pa, value as u16);
        Ok(())
    }

    #[inline(always)]
    fn store_byte(&mut self, mem: &mut PhysicalMemory, slot: Slot, v: u32, value: u32) -> Result<(), Fault> {
        let pa = self.translate(mem, slot, v, AccessType::Store)?;
        mem.write8(pa, value as u8);
        Ok(())
    }

    #[inline(always)]
    fn store_float(&mut self, mem: &mut PhysicalMemory, slot: Slot, v: u32, value: f64, w: FWidth) -> Result<(), Fault> {
        match w {
            FWidth::Double => {
                let pa = self.translate(mem, slot, v & !7, AccessType::Store)?;
                mem.write64(pa, value.to_bits());
            }
            FWidth::Float => {
                let pa = self.translate(mem, slot, v & !3, AccessType::Store)?;
                mem.write32(pa, (value as f32).to_bits());
            }
        }
        Ok(())
    }

    /// Read the 8-byte stack slot at `v`
    #[inline(always)]
    fn read_slot(&mut self, mem: &mut PhysicalMemory, v: u32) -> Result<u32, Fault> {
        let pa = self.translate(mem, Slot::Stack, v & !7, AccessType::Load)?;
        Ok(mem.read32(pa))
    }

    #[inline(always)]
    fn push(&mut self, mem: &mut PhysicalMemory, value: u32) -> Result<(), Fault> {
        let v = self.state.sp.wrapping_sub(8);
        let pa = self.translate(mem, Slot::Stack, v & !7, AccessType::Store)?;
        mem.write32(pa, value);
        self.state.sp = v;
        Ok(())
    }

    #[inline(always)]
    fn push_float(&mut self, mem: &mut PhysicalMemory, value: f64) -> Result<(), Fault> {
        let v = self.state.sp.wrapping_sub(8);
        let pa = self.translate(mem, Slot::Stack, v & !7, AccessType::Store)?;
        mem.write64(pa, value.to_bits());
        self.state.sp = v;
        Ok(())
    }

    #[inline(always)]
    fn pop(&mut self, mem: &mut PhysicalMemory) -> Result<u32, Fault> {
        let value = self.read_slot(mem, self.state.sp)?;
        self.state.sp = self.state.sp.wrapping_add(8);
        Ok(value)
    }

    #[inline(always)]
    fn pop_float(&mut self, mem: &mut PhysicalMemory) -> Result<f64, Fault> {
        let sp = self.state.sp;
        let pa = self.translate(mem, Slot::Stack, sp & !7, AccessType::Load)?;
        self.state.sp = sp.wrapping_add(8);
        Ok(f64::from_bits(mem.read64(pa)))
    }

    /// Fetch, decode and execute the instruction at `pc`
    pub(super) fn execute_next(
        &mut self,
        mem: &mut PhysicalMemory,
        bridge: &mut HostBridge,
    ) -> Result<Flow, Stop> {
        let pc = self.state.pc;
        if pc & 3 != 0 {
            return Err(FatalReason::MisalignedPc(pc).into());
        }
        self.ipc = pc;
        let pa = self.translate(mem, Slot::Code, pc, AccessType::Fetch)?;
        self.ir = mem.read32(pa);
        self.state.pc = pc.wrapping_add(4);

        let ins = Instruction::decode(self.ir);
        let op = ins.opcode().ok_or(Fault::IllegalInstruction)?;
        if self.state.user && op.is_privileged() {
            return Err(Fault::PrivilegeViolation.into());
        }
        self.execute(op, ins, mem, bridge)
    }

    fn execute(
        &mut self,
        op: Opcode,
        ins: Instruction,
        mem: &mut PhysicalMemory,
        bridge: &mut HostBridge,
    ) -> Result<Flow, Stop> {
        use Opcode::*;

        let imm = ins.imm;
        let uimm = imm as u32;
        // pc already points at the next instruction
        let pc = self.state.pc;
        let local = self.state.sp.wrapping_add(uimm);
        let global = pc.wrapping_add(uimm);
        let s = Slot::Stack;
        let g = Slot::Code;
        let d = Slot::Data;

        match op {
            HALT => {
                let code = self.state.a as i32;
                info!("halt({}) cycle = {}", code, self.state.cycle);
                return Ok(Flow::Halt(code));
            }
            IDLE => return self.idle(mem, bridge),

            // frames and calls
            ENT => self.state.sp = local,
            LEV => {
                let ret = self.read_slot(mem, local)?;
                self.state.pc = ret;
                self.state.sp = local.wrapping_add(8);
            }
            JMP => self.state.pc = global,
            JMPI => {
                let v = global.wrapping_add(self.state.a << 2);
                let off = self.load_int(mem, g, v, Width::Word)?;
                self.state.pc = pc.wrapping_add(off);
            }
            JSR => {
                self.push(mem, pc)?;
                self.state.pc = global;
            }
            JSRA => {
                self.push(mem, pc)?;
                self.state.pc = self.state.a;
            }
            LEA => self.state.a = local,
            LEAG => self.state.a = global,
            CYC => self.state.a = self.state.cycle as u32,

            // restartable block operations
            MCPY => self.block_copy(mem)?,
            MCMP => self.block_compare(mem)?,
            MCHR => self.block_scan(mem)?,
            MSET => self.block_fill(mem)?,

            // load a
            LL => self.state.a = self.load_int(mem, s, local, Width::Word)?,
            LLS => self.state.a = self.load_int(mem, s, local, Width::Short)?,
            LLH => self.state.a = self.load_int(mem, s, local, Width::Half)?,
            LLC => self.state.a = self.load_int(mem, s, local, Width::Char)?,
            LLB => self.state.a = self.load_int(mem, s, local, Width::Byte)?,
            LLD => self.state.f = self.load_float(mem, s, local, FWidth::Double)?,
            LLF => self.state.f = self.load_float(mem, s, local, FWidth::Float)?,
            LG => self.state.a = self.load_int(mem, g, global, Width::Word)?,
            LGS => self.state.a = self.load_int(mem, g, global, Width::Short)?,
            LGH => self.state.a = self.load_int(mem, g, global, Width::Half)?,
            LGC => self.state.a = self.load_int(mem, g, global, Width::Char)?,
            LGB => self.state.a = self.load_int(mem, g, global, Width::Byte)?,
            LGD => self.state.f = self.load_float(mem, g, global, FWidth::Double)?,
            LGF => self.state.f = self.load_float(mem, g, global, FWidth::Float)?,
            LX | LXS | LXH | LXC | LXB | LXD | LXF => {
                let v = self.state.a.wrapping_add(uimm);
                match op {
                    LXD => self.state.f = self.load_float(mem, d, v, FWidth::Double)?,
                    LXF => self.state.f = self.load_float(mem, d, v, FWidth::Float)?,
                    _ => self.state.a = self.load_int(mem, d, v, indexed_width(op))?,
                }
            }
            LI => self.state.a = uimm,
            LHI => self.state.a = (self.state.a << 24) | ins.uimm(),
            LIF => self.state.f = imm as f64 / 256.0,

            // load b
            LBL => self.state.b = self.load_int(mem, s, local, Width::Word)?,
            LBLS => self.state.b = self.load_int(mem, s, local, Width::Short)?,
            LBLH => self.state.b = self.load_int(mem, s, local, Width::Half)?,
            LBLC => self.state.b = self.load_int(mem, s, local, Width::Char)?,
            LBLB => self.state.b = self.load_int(mem, s, local, Width::Byte)?,
            LBLD => self.state.g = self.load_float(mem, s, local, FWidth::Double)?,
            LBLF => self.state.g = self.load_float(mem, s, local, FWidth::Float)?,
            LBG => self.state.b = self.load_int(mem, g, global, Width::Word)?,
            LBGS => self.state.b = self.load_int(mem, g, global, Width::Short)?,
            LBGH => self.state.b = self.load_int(mem, g, global, Width::Half)?,
            LBGC => self.state.b = self.load_int(mem, g, global, Width::Char)?,
            LBGB => self.state.b = self.load_int(mem, g, global, Width::Byte)?,
            LBGD => self.state.g = self.load_float(mem, g, global, FWidth::Double)?,
            LBGF => self.state.g = self.load_float(mem, g, global, FWidth::Float)?,
            LBX | LBXS | LBXH | LBXC | LBXB | LBXD | LBXF => {
                let v = self.state.b.wrapping_add(uimm);
                match op {
                    LBXD => self.state.g = self.load_float(mem, d, v, FWidth::Double)?,
                    LBXF => self.state.g = self.load_float(mem, d, v, FWidth::Float)?,
                    _ => self.state.b = self.load_int(mem, d, v, indexed_width(op))?,
                }
            }
            LBI => self.state.b = uimm,
            LBHI => self.state.b = (self.state.b << 24) | ins.uimm(),
            LBIF => self.state.g = imm as f64 / 256.0,
            LCL => self.state.c = self.load_int(mem, s, local, Width::Word)?,
            LBA => self.state.b = self.state.a,
            LCA => self.state.c = self.state.a,
            LBAD => self.state.g = self.state.f,

            // store
            SL => self.store_word(mem, s, local, self.state.a)?,
            SLH => self.store_half(mem, s, local, self.state.a)?,
            SLB => self.store_byte(mem, s, local, self.state.a)?,
            SLD => self.store_float(mem, s, local, self.state.f, FWidth::Double)?,
            SLF => self.store_float(mem, s, local, self.state.f, FWidth::Float)?,
            SG => self.store_word(mem, g, global, self.state.a)?,
            SGH => self.store_half(mem, g, global, self.state.a)?,
            SGB => self.store_byte(mem, g, global, self.state.a)?,
            SGD => self.store_float(mem, g, global, self.state.f, FWidth::Double)?,
            SGF => self.store_float(mem, g, global, self.state.f, FWidth::Float)?,
            SX | SXH | SXB | SXD | SXF => {
                let v = self.state.b.wrapping_add(uimm);
                let (a, f) = (self.state.a, self.state.f);
                match op {
                    SX => self.store_word(mem, d, v, a)?,
                    SXH => self.store_half(mem, d, v, a)?,
                    SXB => self.store_byte(mem, d, v, a)?,
                    SXD => self.store_float(mem, d, v, f, FWidth::Double)?,
                    _ => self.store_float(mem, d, v, f, FWidth::Float)?,
                }
            }

            // floating point arithmetic
            ADDF => self.state.f += self.state.g,
            SUBF => self.state.f -= self.state.g,
            MULF => self.state.f *= self.state.g,
            DIVF => {
                if self.state.g == 0.0 {
                    return Err(Fault::Arithmetic.into());
                }
                self.state.f /= self.state.g;
            }

            // integer arithmetic: register, immediate and local operand forms
            ADD | SUB | MUL | DIV | DVU | MOD | MDU | AND | OR | XOR | SHL | SHR | SRU => {
                self.state.a = alu(op, self.state.a, self.state.b)?;
            }
            ADDI | SUBI | MULI | DIVI | DVUI | MODI | MDUI | ANDI | ORI | XORI | SHLI | SHRI
            | SRUI => {
                self.state.a = alu(op, self.state.a, uimm)?;
            }
            ADDL | SUBL | MULL | DIVL | DVUL | MODL | MDUL | ANDL | ORL | XORL | SHLL | SHRL
            | SRUL => {
                let operand = self.load_int(mem, s, local, Width::Word)?;
                self.state.a = alu(op, self.state.a, operand)?;
            }

            // comparisons
            EQ => self.state.a = (self.state.a == self.state.b) as u32,
            EQF => self.state.a = (self.state.f == self.state.g) as u32,
            NE => self.state.a = (self.state.a != self.state.b) as u32,
            NEF => self.state.a = (self.state.f != self.state.g) as u32,
            LT => self.state.a = ((self.state.a as i32) < (self.state.b as i32)) as u32,
            LTU => self.state.a = (self.state.a < self.state.b) as u32,
            LTF => self.state.a = (self.state.f < self.state.g) as u32,
            GE => self.state.a = ((self.state.a as i32) >= (self.state.b as i32)) as u32,
            GEU => self.state.a = (self.state.a >= self.state.b) as u32,
            GEF => self.state.a = (self.state.f >= self.state.g) as u32,

            // branches
            BZ | BZF | BNZ | BNZF | BE | BEF | BNE | BNEF | BLT | BLTU | BLTF | BGE | BGEU
            | BGEF => {
                if self.branch_taken(op) {
                    self.state.pc = global;
                }
            }

            // conversion
            CID => self.state.f = self.state.a as i32 as f64,
            CUD => self.state.f = self.state.a as f64,
            CDI => self.state.a = self.state.f as i32 as u32,
            CDU => self.state.a = self.state.f as u32,

            // stack
            SSP => self.state.sp = self.state.a,
            PSHA => self.push(mem, self.state.a)?,
            PSHB => self.push(mem, self.state.b)?,
            PSHC => self.push(mem, self.state.c)?,
            PSHI => self.push(mem, uimm)?,
            PSHF => self.push_float(mem, self.state.f)?,
            PSHG => self.push_float(mem, self.state.g)?,
            POPA => self.state.a = self.pop(mem)?,
            POPB => self.state.b = self.pop(mem)?,
            POPC => self.state.c = self.pop(mem)?,
            POPF => self.state.f = self.pop_float(mem)?,
            POPG => self.state.g = self.pop_float(mem)?,

            NOP => {}
            TRAP => return Err(Fault::SyscallTrap.into()),

            // controller
            CLI => {
                self.state.a = self.state.iena as u32;
                self.state.iena = false;
            }
            STI => trap::sti(self, mem)?,
            RTI => trap::rti(self, mem)?,
            IVEC => self.state.ivec = self.state.a,
            PDIR => {
                let a = self.state.a;
                let base = a & !PAGE_MASK;
                if base as u64 + PAGE_SIZE as u64 > mem.size() as u64 {
                    return Err(Fault::BadPhysicalAddress(None).into());
                }
                self.state.space.pdir = Some(base);
                self.mmu.flush();
            }
            SPAG => {
                let enable = self.state.a != 0;
                if enable && self.state.space.pdir.is_none() {
                    return Err(Fault::BadPhysicalAddress(None).into());
                }
                self.state.space.paging = enable;
                self.mmu.flush();
            }
            TIME => {
                if imm != 0 {
                    info!(
                        "timer{}={} timeout={}",
                        imm,
                        self.timer.count(),
                        self.timer.timeout()
                    );
                } else {
                    self.timer.set_timeout(self.state.a);
                }
            }
            LVAD => self.state.a = self.state.vadr,
            LUSP => self.state.a = self.state.usp,
            SUSP => self.state.usp = self.state.a,
            MSIZ => self.state.a = mem.size(),

            // host bridge
            BIN => self.state.a = bridge.take_char() as u32,
            BOUT => {
                let r = bridge.put_char(self.state.a, self.state.b as u8);
                self.state.a = r as u32;
            }
            NET1 | NET2 | NET3 | NET4 | NET5 | NET6 | NET7 | NET8 | NET9 => {
                self.net(op, mem, bridge)?;
            }

            // math
            POW => self.state.f = self.state.f.powf(self.state.g),
            ATN2 => self.state.f = self.state.f.atan2(self.state.g),
            FABS => self.state.f = self.state.f.abs(),
            ATAN => self.state.f = self.state.f.atan(),
            LOG => {
                if self.state.f != 0.0 {
                    self.state.f = self.state.f.ln();
                }
            }
            LOGT => {
                if self.state.f != 0.0 {
                    self.state.f = self.state.f.log10();
                }
            }
            EXP => self.state.f = self.state.f.exp(),
            FLOR => self.state.f = self.state.f.floor(),
            CEIL => self.state.f = self.state.f.ceil(),
            HYPO => self.state.f = self.state.f.hypot(self.state.g),
            SIN => self.state.f = self.state.f.sin(),
            COS => self.state.f = self.state.f.cos(),
            TAN => self.state.f = self.state.f.tan(),
            ASIN => self.state.f = self.state.f.asin(),
            ACOS => self.state.f = self.state.f.acos(),
            SINH => self.state.f = self.state.f.sinh(),
            COSH => self.state.f = self.state.f.cosh(),
            TANH => self.state.f = self.state.f.tanh(),
            SQRT => self.state.f = self.state.f.sqrt(),
            FMOD => self.state.f %= self.state.g,
        }
        Ok(Flow::Continue)
    }

    fn branch_taken(&self, op: Opcode) -> bool {
        use Opcode::*;
        let (a, b, f, g) = (self.state.a, self.state.b, self.state.f, self.state.g);
        match op {
            BZ => a == 0,
            BZF => f == 0.0,
            BNZ => a != 0,
            BNZF => f != 0.0,
            BE => a == b,
            BEF => f == g,
            BNE => a != b,
            BNEF => f != g,
            BLT => (a as i32) < (b as i32),
            BLTU => a < b,
            BLTF => f < g,
            BGE => (a as i32) >= (b as i32),
            BGEU => a >= b,
            BGEF => f >= g,
            _ => false,
        }
    }

    /// One poll of the interrupt sources. Re-executes itself until one
    /// fires.
    fn idle(&mut self, mem: &mut PhysicalMemory, bridge: &mut HostBridge) -> Result<Flow, Stop> {
        if !self.state.iena {
            return Err(Fault::IllegalInstruction.into());
        }
        if !self.timer.enabled() && !bridge.console_open() {
            return Err(FatalReason::IdleWithoutInterruptSource.into());
        }
        match bridge.poll_console() {
            ConsoleEvent::Escape => {
                info!("ungraceful exit. cycle = {}", self.state.cycle);
                return Ok(Flow::Escape);
            }
            ConsoleEvent::Byte(_) => {
                trap::raise_interrupt(self, mem, Fault::Keyboard)?;
                return Ok(Flow::Continue);
            }
            ConsoleEvent::None => {}
        }
        self.state.cycle = self.state.cycle.wrapping_add(POLL_INTERVAL);
        if self.timer.tick(POLL_INTERVAL as u32) {
            trap::raise_interrupt(self, mem, Fault::Timer)?;
        } else {
            self.state.pc = self.ipc;
        }
        Ok(Flow::Continue)
    }

    /// Host socket opcodes. Guest buffers are fully translated before the
    /// host call so a page fault restarts the instruction with no host side
    /// effect.
    fn net(&mut self, op: Opcode, mem: &mut PhysicalMemory, bridge: &mut HostBridge) -> Result<(), Fault> {
        let (a, b, c) = (self.state.a, self.state.b, self.state.c);
        let r = match op {
            Opcode::NET1 => bridge.sockets().socket(a, b, c),
            Opcode::NET2 => bridge.sockets().close(a),
            Opcode::NET3 => bridge.sockets().connect(a, b, c),
            Opcode::NET4 => {
                if c as i32 <= 0 {
                    0
                } else {
                    let len = (c as usize).min(MAX_TRANSFER) as u32;
                    self.mmu.translate_range(mem, self.state.space, b, len, AccessType::Store, self.state.user)?;
                    let mut buf = vec![0u8; len as usize];
                    let n = bridge.sockets().read(a, &mut buf);
                    if n > 0 {
                        self.copy_to_guest(mem, b, &buf[..n as usize])?;
                    }
                    n
                }
            }
            Opcode::NET5 => {
                if c as i32 <= 0 {
                    c as i32
                } else {
                    let len = (c as usize).min(MAX_TRANSFER) as u32;
                    self.mmu.translate_range(mem, self.state.space, b, len, AccessType::Load, self.state.user)?;
                    self.write_from_guest(mem, bridge, a, b, len)?
                }
            }
            Opcode::NET6 => bridge.sockets().poll(a),
            Opcode::NET7 => bridge.sockets().bind(a, b, c),
            Opcode::NET8 => bridge.sockets().listen(a, b),
            Opcode::NET9 => bridge.sockets().accept(a),
            _ => return Err(Fault::IllegalInstruction),
        };
        debug!("{} a={} b={:#x} c={} -> {}", op, a as i32, b, c as i32, r);
        self.state.a = r as u32;
        Ok(())
    }

    fn copy_to_guest(&mut self, mem: &mut PhysicalMemory, vaddr: u32, data: &[u8]) -> Result<(), Fault> {
        let mut v = vaddr;
        let mut rest = data;
        while !rest.is_empty() {
            let chunk = ((PAGE_SIZE - (v & PAGE_MASK)) as usize).min(rest.len());
            let pa = self.translate(mem, Slot::Data, v, AccessType::Store)?;
            let dst = mem
                .slice_mut(pa, chunk)
                .ok_or(Fault::BadPhysicalAddress(Some(v)))?;
            dst.copy_from_slice(&rest[..chunk]);
            rest = &rest[chunk..];
            v = v.wrapping_add(chunk as u32);
        }
        Ok(())
    }

    fn write_from_guest(
        &mut self,
        mem: &mut PhysicalMemory,
        bridge: &mut HostBridge,
        fd: u32,
        vaddr: u32,
        len: u32,
    ) -> Result<i32, Fault> {
        let mut v = vaddr;
        let mut sent = 0;
        while sent < len {
            let chunk = (PAGE_SIZE - (v & PAGE_MASK)).min(len - sent);
            let pa = self.translate(mem, Slot::Data, v, AccessType::Load)?;
            let src = mem
                .slice(pa, chunk as usize)
                .ok_or(Fault::BadPhysicalAddress(Some(v)))?;
            let n = bridge.sockets().write(fd, src);
            if n <= 0 {
                // partial send
                return Ok(if sent > 0 { sent as i32 } else { n });
            }
            v = v.wrapping_add(n as u32);
            sent += n as u32;
            if (n as u32) < chunk {
                break;
            }
        }
        Ok(sent as i32)
    }
}

fn indexed_width(op: Opcode) -> Width {
    use Opcode::*;
    match op {
        LXS | LBXS => Width::Short,
        LXH | LBXH => Width::Half,
        LXC | LBXC => Width::Char,
        LXB | LBXB => Width::Byte,
        _ => Width::Word,
    }
}

/// Integer ALU shared by the register, immediate and local forms
fn alu(op: Opcode, a: u32, x: u32) -> Result<u32, Fault> {
    use Opcode::*;
    Ok(match op {
        ADD | ADDI | ADDL => a.wrapping_add(x),
        SUB | SUBI | SUBL => a.wrapping_sub(x),
        MUL | MULI | MULL => (a as i32).wrapping_mul(x as i32) as u32,
        DIV | DIVI | DIVL => {
            if x == 0 {
                return Err(Fault::Arithmetic);
            }
            (a as i32).wrapping_div(x as i32) as u32
        }
        DVU | DVUI | DVUL => {
            if x == 0 {
                return Err(Fault::Arithmetic);
            }
            a / x
        }
        MOD | MODI | MODL => {
            if x == 0 {
                return Err(Fault::Arithmetic);
            }
            (a as i32).wrapping_rem(x as i32) as u32
        }
        MDU | MDUI | MDUL => {
            if x == 0 {
                return Err(Fault::Arithmetic);
            }
            a % x
        }
        AND | ANDI | ANDL => a & x,
        OR | ORI | ORL => a | x,
        XOR | XORI | XORL => a ^ x,
        SHL | SHLI | SHLL => a.wrapping_shl(x),
        SHR | SHRI | SHRL => (a as i32).wrapping_shr(x) as u32,
        SRU | SRUI | SRUL => a.wrapping_shr(x),
        _ => return Err(Fault::IllegalInstruction),
    })
}
