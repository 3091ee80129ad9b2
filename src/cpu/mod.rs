//! CPU module
//!
//! Register file, dispatcher and the glue to the MMU, the interval timer and
//! the host bridge.

mod block;
pub mod decode;
mod execute;
pub mod fastpath;
pub mod mmu;
pub mod tlb;
pub mod trap;

pub use decode::{Instruction, Opcode};
pub use fastpath::{AccessPath, PageCached, Revalidating, Slot};
pub use mmu::{AccessType, AddressSpace, Mmu};
pub use trap::{Fault, Stop};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::EmulatorConfig;
use crate::devices::{ConsoleEvent, HostBridge, IntervalTimer};
use crate::error::{FatalError, FatalReason, RegisterDump};
use crate::memory::PhysicalMemory;

/// Cycles between device polls
pub const POLL_INTERVAL: u64 = 4096;

/// Architectural state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuState {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub f: f64,
    pub g: f64,
    pub sp: u32,
    /// Address of the next instruction to fetch
    pub pc: u32,
    pub user: bool,
    /// Interrupt enable
    pub iena: bool,
    /// Interrupts raised while masked
    pub ipend: u32,
    /// Last delivered fault code
    pub trap: u32,
    pub ivec: u32,
    /// Virtual address of the last translation fault
    pub vadr: u32,
    pub space: AddressSpace,
    /// User sp while in kernel mode
    pub usp: u32,
    /// Kernel sp while in user mode
    pub ssp: u32,
    /// Monotonic cycle counter
    pub cycle: u64,
}

/// Outcome of one dispatch step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// `HALT` with the guest exit code
    Halt(i32),
    /// The console escape byte arrived
    Escape,
}

pub struct Cpu {
    pub state: CpuState,
    pub timer: IntervalTimer,
    pub mmu: Mmu,
    /// Address of the instruction being executed
    ipc: u32,
    /// Instruction word being executed
    ir: u32,
    /// Bytes stored by block copy/fill
    block_bytes: u64,
}

impl Cpu {
    pub fn new(config: &EmulatorConfig) -> Self {
        let path: Box<dyn AccessPath> = if config.fast_path {
            Box::new(PageCached::default())
        } else {
            Box::new(Revalidating)
        };
        Cpu {
            state: CpuState::default(),
            timer: IntervalTimer::new(),
            mmu: Mmu::new(config.tlb_capacity, path),
            ipc: 0,
            ir: 0,
            block_bytes: 0,
        }
    }

    /// Kernel mode, interrupts off, paging off, caches empty
    pub fn reset(&mut self, pc: u32, sp: u32) {
        self.state = CpuState {
            pc,
            sp,
            ..CpuState::default()
        };
        self.timer.reset();
        self.mmu.flush();
        self.ipc = pc;
        self.ir = 0;
        self.block_bytes = 0;
    }

    /// Replace the architectural state wholesale (snapshot restore)
    pub fn restore(&mut self, state: CpuState, timer: IntervalTimer) {
        self.state = state;
        self.timer = timer;
        self.mmu.flush();
        self.ipc = self.state.pc;
    }

    #[inline(always)]
    pub(crate) fn translate(
        &mut self,
        mem: &mut PhysicalMemory,
        slot: Slot,
        vaddr: u32,
        access: AccessType,
    ) -> Result<u32, Fault> {
        self.mmu
            .translate(mem, self.state.space, slot, vaddr, access, self.state.user)
    }

    /// Execute one instruction, polling devices every `POLL_INTERVAL` cycles
    pub fn step(
        &mut self,
        mem: &mut PhysicalMemory,
        bridge: &mut HostBridge,
    ) -> Result<Flow, FatalError> {
        self.state.cycle = self.state.cycle.wrapping_add(1);
        if self.state.cycle % POLL_INTERVAL == 0 {
            match self.poll_devices(mem, bridge) {
                Ok(Some(flow)) => return Ok(flow),
                Ok(None) => {}
                Err(reason) => return Err(self.fatal(reason)),
            }
        }

        match self.execute_next(mem, bridge) {
            Ok(flow) => Ok(flow),
            Err(Stop::Fault(fault)) => match trap::raise_exception(self, mem, fault) {
                Ok(()) => Ok(Flow::Continue),
                Err(reason) => Err(self.fatal(reason)),
            },
            Err(Stop::Fatal(reason)) => Err(self.fatal(reason)),
        }
    }

    /// Returns `Some` when polling ended the step: an interrupt was
    /// delivered or the escape byte arrived.
    fn poll_devices(
        &mut self,
        mem: &mut PhysicalMemory,
        bridge: &mut HostBridge,
    ) -> Result<Option<Flow>, FatalReason> {
        if self.state.iena || self.state.ipend & trap::PEND_KEYBOARD == 0 {
            match bridge.poll_console() {
                ConsoleEvent::Escape => {
                    info!("ungraceful exit. cycle = {}", self.state.cycle);
                    return Ok(Some(Flow::Escape));
                }
                ConsoleEvent::Byte(_) => {
                    if trap::post_interrupt(self, mem, Fault::Keyboard)? {
                        return Ok(Some(Flow::Continue));
                    }
                }
                ConsoleEvent::None => {}
            }
        }
        if self.timer.tick(POLL_INTERVAL as u32) && trap::post_interrupt(self, mem, Fault::Timer)? {
            return Ok(Some(Flow::Continue));
        }
        Ok(None)
    }

    fn fatal(&self, reason: FatalReason) -> FatalError {
        let dump = self.dump();
        error!("processor halted! {}: {}", reason, dump);
        FatalError { reason, dump }
    }

    pub fn dump(&self) -> RegisterDump {
        RegisterDump {
            cycle: self.state.cycle,
            pc: self.state.pc,
            ir: self.ir,
            sp: self.state.sp,
            a: self.state.a,
            b: self.state.b,
            c: self.state.c,
            trap: self.state.trap,
        }
    }

    pub fn block_bytes(&self) -> u64 {
        self.block_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::BufferConsole;
    use crate::memory::Bus;

    fn machine() -> (Cpu, PhysicalMemory, HostBridge) {
        let mut cpu = Cpu::new(&EmulatorConfig::default());
        cpu.reset(0, 0x8000);
        let bridge = HostBridge::new(Box::new(BufferConsole::new()), Some(b'`'));
        (cpu, PhysicalMemory::with_megabytes(1), bridge)
    }

    fn load(mem: &mut PhysicalMemory, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            mem.write32(i as u32 * 4, *w);
        }
    }

    #[test]
    fn test_cpu_creation() {
        let cpu = Cpu::new(&EmulatorConfig::default());
        assert_eq!(cpu.state.pc, 0);
        assert!(!cpu.state.user);
        assert!(!cpu.state.iena);
        assert_eq!(cpu.mmu.path_name(), "fast");

        let safe = EmulatorConfig {
            fast_path: false,
            ..EmulatorConfig::default()
        };
        assert_eq!(Cpu::new(&safe).mmu.path_name(), "safe");
    }

    #[test]
    fn test_misaligned_pc_is_fatal() {
        let (mut cpu, mut mem, mut bridge) = machine();
        cpu.state.pc = 2;
        let err = cpu.step(&mut mem, &mut bridge).unwrap_err();
        assert_eq!(err.reason, FatalReason::MisalignedPc(2));
    }

    #[test]
    fn test_keyboard_interrupt_is_delivered_at_poll() {
        let (mut cpu, mut mem, _) = machine();
        let console = BufferConsole::new();
        let mut bridge = HostBridge::new(Box::new(console.clone()), Some(b'`'));
        // loop: JMP -4
        load(&mut mem, &[Opcode::JMP.with_imm(-4)]);
        cpu.state.iena = true;
        cpu.state.ivec = 0x100;
        cpu.state.cycle = POLL_INTERVAL - 10;
        console.push_input(b"k");

        for _ in 0..10 {
            assert_eq!(cpu.step(&mut mem, &mut bridge).unwrap(), Flow::Continue);
        }
        assert_eq!(cpu.state.pc, 0x100);
        assert!(!cpu.state.iena);
        assert_eq!(mem.read32(0x8000 - 16), 2);
        assert_eq!(bridge.take_char(), b'k' as i32);
    }

    #[test]
    fn test_escape_byte_ends_emulation() {
        let (mut cpu, mut mem, _) = machine();
        let mut bridge = HostBridge::new(Box::new(BufferConsole::with_input(b"`")), Some(b'`'));
        load(&mut mem, &[Opcode::JMP.with_imm(-4)]);
        cpu.state.cycle = POLL_INTERVAL - 1;
        assert_eq!(cpu.step(&mut mem, &mut bridge).unwrap(), Flow::Escape);
    }
}
