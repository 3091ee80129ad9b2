//! Exceptions and interrupts
//!
//! Delivery always lands in kernel mode at `ivec` with the resume pc and the
//! fault code pushed on the kernel stack:
//!
//! ```text
//!   sp + 8  resume pc
//!   sp + 0  fault code (| USER when taken from user mode)
//! ```

use tracing::debug;

use super::fastpath::Slot;
use super::mmu::AccessType;
use super::Cpu;
use crate::error::FatalReason;
use crate::memory::{Bus, PhysicalMemory};

/// Or-ed into a delivered fault code taken from user mode
pub const USER: u32 = 16;

/// Pending interrupt bits in `ipend`
pub const PEND_TIMER: u32 = 1;
pub const PEND_KEYBOARD: u32 = 2;

/// Exception/interrupt cause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Translation hit a physical address outside memory (`Some(vaddr)`),
    /// or a paging register was loaded with one (`None`)
    BadPhysicalAddress(Option<u32>),
    Timer,
    Keyboard,
    PrivilegeViolation,
    IllegalInstruction,
    SyscallTrap,
    Arithmetic,
    InstructionPageFault(u32),
    WritePageFault(u32),
    ReadPageFault(u32),
}

impl Fault {
    /// Code pushed on the kernel stack
    pub fn code(&self) -> u32 {
        match self {
            Fault::BadPhysicalAddress(_) => 0,
            Fault::Timer => 1,
            Fault::Keyboard => 2,
            Fault::PrivilegeViolation => 3,
            Fault::IllegalInstruction => 4,
            Fault::SyscallTrap => 5,
            Fault::Arithmetic => 6,
            Fault::InstructionPageFault(_) => 7,
            Fault::WritePageFault(_) => 8,
            Fault::ReadPageFault(_) => 9,
        }
    }

    /// Faulting virtual address, latched into `vadr`
    pub fn vaddr(&self) -> Option<u32> {
        match *self {
            Fault::BadPhysicalAddress(v) => v,
            Fault::InstructionPageFault(v) | Fault::WritePageFault(v) | Fault::ReadPageFault(v) => {
                Some(v)
            }
            _ => None,
        }
    }

    /// Translation faults resume at the faulting instruction; everything
    /// else resumes after it.
    pub fn restarts_instruction(&self) -> bool {
        matches!(
            self,
            Fault::BadPhysicalAddress(Some(_))
                | Fault::InstructionPageFault(_)
                | Fault::WritePageFault(_)
                | Fault::ReadPageFault(_)
        )
    }

    /// Bit recorded in `ipend` while the interrupt is masked
    pub fn pending_bit(&self) -> u32 {
        match self {
            Fault::Timer => PEND_TIMER,
            Fault::Keyboard => PEND_KEYBOARD,
            _ => 0,
        }
    }

    /// Lowest pending interrupt
    pub fn from_pending(ipend: u32) -> Option<Fault> {
        if ipend & PEND_TIMER != 0 {
            Some(Fault::Timer)
        } else if ipend & PEND_KEYBOARD != 0 {
            Some(Fault::Keyboard)
        } else {
            None
        }
    }
}

/// Why an instruction did not complete normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Fault(Fault),
    Fatal(FatalReason),
}

impl From<Fault> for Stop {
    fn from(fault: Fault) -> Self {
        Stop::Fault(fault)
    }
}

impl From<FatalReason> for Stop {
    fn from(reason: FatalReason) -> Self {
        Stop::Fatal(reason)
    }
}

/// Raise a synchronous exception for the instruction at `cpu.ipc`
pub fn raise_exception(cpu: &mut Cpu, mem: &mut PhysicalMemory, fault: Fault) -> Result<(), FatalReason> {
    if !cpu.state.iena {
        cpu.state.trap = fault.code();
        return Err(FatalReason::DoubleFault);
    }
    if fault.restarts_instruction() {
        cpu.state.pc = cpu.ipc;
    }
    if let Some(v) = fault.vaddr() {
        cpu.state.vadr = v;
    }
    deliver(cpu, mem, fault)
}

/// Deliver an interrupt now, masking further interrupts
pub fn raise_interrupt(cpu: &mut Cpu, mem: &mut PhysicalMemory, fault: Fault) -> Result<(), FatalReason> {
    cpu.state.iena = false;
    deliver(cpu, mem, fault)
}

/// An interrupt source fired: deliver it if enabled, otherwise latch it.
/// Returns whether it was delivered.
pub fn post_interrupt(cpu: &mut Cpu, mem: &mut PhysicalMemory, fault: Fault) -> Result<bool, FatalReason> {
    if cpu.state.iena {
        raise_interrupt(cpu, mem, fault)?;
        Ok(true)
    } else {
        cpu.state.ipend |= fault.pending_bit();
        Ok(false)
    }
}

/// Deliver the lowest pending interrupt, if any. `iena` is left clear.
pub fn deliver_pending(cpu: &mut Cpu, mem: &mut PhysicalMemory) -> Result<bool, FatalReason> {
    match Fault::from_pending(cpu.state.ipend) {
        Some(fault) => {
            cpu.state.ipend &= !fault.pending_bit();
            raise_interrupt(cpu, mem, fault)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Switch to kernel mode and push the resume frame
pub fn deliver(cpu: &mut Cpu, mem: &mut PhysicalMemory, fault: Fault) -> Result<(), FatalReason> {
    let mut code = fault.code();
    if cpu.state.user {
        cpu.state.usp = cpu.state.sp;
        cpu.state.sp = cpu.state.ssp;
        cpu.state.user = false;
        code |= USER;
    }
    cpu.state.trap = code;

    debug!(
        code,
        "deliver {:?} pc={:#010x} vadr={:#010x}",
        fault, cpu.state.pc, cpu.state.vadr
    );

    let resume = cpu.state.pc;
    push_kernel(cpu, mem, resume)?;
    push_kernel(cpu, mem, code)?;
    cpu.state.pc = cpu.state.ivec;
    cpu.mmu.invalidate_path();
    Ok(())
}

fn push_kernel(cpu: &mut Cpu, mem: &mut PhysicalMemory, value: u32) -> Result<(), FatalReason> {
    let sp = cpu.state.sp.wrapping_sub(8);
    let pa = cpu
        .translate(mem, Slot::Stack, sp & !7, AccessType::Store)
        .map_err(|_| FatalReason::KernelStackFault)?;
    mem.write32(pa, value);
    cpu.state.sp = sp;
    Ok(())
}

fn pop_kernel(cpu: &mut Cpu, mem: &mut PhysicalMemory) -> Result<u32, FatalReason> {
    let sp = cpu.state.sp;
    let pa = cpu
        .translate(mem, Slot::Stack, sp & !7, AccessType::Load)
        .map_err(|_| FatalReason::KernelStackFault)?;
    cpu.state.sp = sp.wrapping_add(8);
    Ok(mem.read32(pa))
}

/// Return from interrupt
pub fn rti(cpu: &mut Cpu, mem: &mut PhysicalMemory) -> Result<(), FatalReason> {
    let code = pop_kernel(cpu, mem)?;
    let pc = pop_kernel(cpu, mem)?;
    cpu.state.pc = pc;
    if code & USER != 0 {
        cpu.state.ssp = cpu.state.sp;
        cpu.state.sp = cpu.state.usp;
        cpu.state.user = true;
    }
    cpu.mmu.invalidate_path();
    if !cpu.state.iena && !deliver_pending(cpu, mem)? {
        cpu.state.iena = true;
    }
    Ok(())
}

/// Enable interrupts, delivering a pending one instead if there is one
pub fn sti(cpu: &mut Cpu, mem: &mut PhysicalMemory) -> Result<(), FatalReason> {
    if !deliver_pending(cpu, mem)? {
        cpu.state.iena = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmulatorConfig;

    const TOP: u32 = 0x8000;

    fn kernel_cpu() -> (Cpu, PhysicalMemory) {
        let mut cpu = Cpu::new(&EmulatorConfig::default());
        cpu.state.sp = TOP;
        cpu.state.ivec = 0x4000;
        cpu.state.pc = 0x104;
        cpu.ipc = 0x100;
        cpu.state.iena = true;
        (cpu, PhysicalMemory::with_megabytes(1))
    }

    #[test]
    fn test_fault_codes() {
        assert_eq!(Fault::BadPhysicalAddress(None).code(), 0);
        assert_eq!(Fault::SyscallTrap.code(), 5);
        assert_eq!(Fault::ReadPageFault(0).code(), 9);
        assert_eq!(Fault::from_pending(PEND_TIMER | PEND_KEYBOARD), Some(Fault::Timer));
        assert_eq!(Fault::from_pending(PEND_KEYBOARD), Some(Fault::Keyboard));
        assert_eq!(Fault::from_pending(0), None);
    }

    #[test]
    fn test_exception_from_user_switches_stacks() {
        let (mut cpu, mut mem) = kernel_cpu();
        cpu.state.user = true;
        cpu.state.ssp = TOP;
        cpu.state.sp = 0x2_0000;

        raise_exception(&mut cpu, &mut mem, Fault::SyscallTrap).unwrap();

        assert!(!cpu.state.user);
        assert!(cpu.state.iena);
        assert_eq!(cpu.state.usp, 0x2_0000);
        assert_eq!(cpu.state.sp, TOP - 16);
        assert_eq!(cpu.state.pc, 0x4000);
        assert_eq!(mem.read32(TOP - 8), 0x104);
        assert_eq!(mem.read32(TOP - 16), 5 | USER);
        assert_eq!(cpu.state.trap, 5 | USER);
    }

    #[test]
    fn test_page_fault_resumes_at_faulting_instruction() {
        let (mut cpu, mut mem) = kernel_cpu();
        raise_exception(&mut cpu, &mut mem, Fault::WritePageFault(0xDEAD_0000)).unwrap();
        assert_eq!(mem.read32(TOP - 8), 0x100);
        assert_eq!(cpu.state.vadr, 0xDEAD_0000);
        assert_eq!(mem.read32(TOP - 16), 8);
    }

    #[test]
    fn test_exception_with_interrupts_disabled_is_fatal() {
        let (mut cpu, mut mem) = kernel_cpu();
        cpu.state.iena = false;
        assert_eq!(
            raise_exception(&mut cpu, &mut mem, Fault::Arithmetic),
            Err(FatalReason::DoubleFault)
        );
        assert_eq!(cpu.state.sp, TOP);
    }

    #[test]
    fn test_kernel_stack_fault_is_fatal() {
        let (mut cpu, mut mem) = kernel_cpu();
        cpu.state.sp = mem.size() + 0x1000;
        assert_eq!(
            raise_exception(&mut cpu, &mut mem, Fault::SyscallTrap),
            Err(FatalReason::KernelStackFault)
        );
    }

    #[test]
    fn test_masked_interrupt_waits_for_sti() {
        let (mut cpu, mut mem) = kernel_cpu();
        cpu.state.iena = false;

        assert!(!post_interrupt(&mut cpu, &mut mem, Fault::Keyboard).unwrap());
        assert_eq!(cpu.state.ipend, PEND_KEYBOARD);
        assert_eq!(cpu.state.pc, 0x104);

        sti(&mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.state.ipend, 0);
        assert!(!cpu.state.iena);
        assert_eq!(cpu.state.pc, 0x4000);
        assert_eq!(mem.read32(TOP - 16), 2);

        // nothing pending: sti just enables
        sti(&mut cpu, &mut mem).unwrap();
        assert!(cpu.state.iena);
        assert_eq!(cpu.state.sp, TOP - 16);
    }

    #[test]
    fn test_rti_returns_to_user_and_redelivers_pending() {
        let (mut cpu, mut mem) = kernel_cpu();
        cpu.state.user = true;
        cpu.state.ssp = TOP;
        cpu.state.sp = 0x2_0000;
        raise_interrupt(&mut cpu, &mut mem, Fault::Timer).unwrap();
        assert!(!cpu.state.iena);

        rti(&mut cpu, &mut mem).unwrap();
        assert!(cpu.state.user);
        assert!(cpu.state.iena);
        assert_eq!(cpu.state.sp, 0x2_0000);
        assert_eq!(cpu.state.ssp, TOP);
        assert_eq!(cpu.state.pc, 0x104);

        // again, with a keyboard interrupt latched while masked
        raise_interrupt(&mut cpu, &mut mem, Fault::Timer).unwrap();
        cpu.state.ipend = PEND_KEYBOARD;
        rti(&mut cpu, &mut mem).unwrap();
        assert!(!cpu.state.user);
        assert!(!cpu.state.iena);
        assert_eq!(cpu.state.ipend, 0);
        assert_eq!(cpu.state.pc, 0x4000);
        assert_eq!(mem.read32(TOP - 16), 2 | USER);
    }
}
