//! System orchestrator
//!
//! Brings together CPU, memory and the host bridge

use std::path::Path;

use tracing::info;

use crate::config::EmulatorConfig;
use crate::cpu::{Cpu, Flow};
use crate::devices::{Console, HostBridge};
use crate::error::{FatalError, LoadError};
use crate::image::{self, Entry};
use crate::memory::PhysicalMemory;
use crate::snapshot::Snapshot;

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Guest executed `HALT` with this code
    Halted(i32),
    /// Console escape byte
    Escaped,
    /// The cycle budget ran out at an instruction boundary
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub cycles: u64,
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    pub tlb_flushes: u64,
    /// Bytes stored by block copy/fill
    pub block_bytes: u64,
}

/// System state
pub struct System {
    pub cpu: Cpu,
    memory: PhysicalMemory,
    bridge: HostBridge,
    config: EmulatorConfig,
}

impl System {
    /// Create a machine with zeroed memory. Nothing runs until an image is
    /// loaded.
    pub fn new(config: EmulatorConfig, console: Box<dyn Console>) -> Result<Self, LoadError> {
        config.validate()?;
        info!(
            "mem size = {} MiB, {} path",
            config.memory_mb,
            if config.fast_path { "fast" } else { "safe" }
        );
        Ok(System {
            cpu: Cpu::new(&config),
            memory: PhysicalMemory::new(config.memory_bytes()),
            bridge: HostBridge::new(console, config.escape),
            config,
        })
    }

    /// Load the configured filesystem image (if any) and an executable, and
    /// reset the CPU to its entry point
    pub fn load(&mut self, executable: &[u8]) -> Result<Entry, LoadError> {
        if let Some(path) = &self.config.filesystem {
            let fs = image::read_file(path)?;
            image::load_filesystem(&mut self.memory, &fs)?;
        }
        let entry = image::load_executable(&mut self.memory, executable)?;
        self.cpu.reset(entry.pc, entry.sp);
        Ok(entry)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Entry, LoadError> {
        let data = image::read_file(path)?;
        self.load(&data)
    }

    /// Run until the guest halts, the escape byte arrives or `budget` cycles
    /// have elapsed
    pub fn run(&mut self, budget: u64) -> Result<RunExit, FatalError> {
        let start = self.cpu.state.cycle;
        while self.cpu.state.cycle.wrapping_sub(start) < budget {
            match self.cpu.step(&mut self.memory, &mut self.bridge)? {
                Flow::Continue => {}
                Flow::Halt(code) => {
                    self.log_stats();
                    return Ok(RunExit::Halted(code));
                }
                Flow::Escape => {
                    self.log_stats();
                    return Ok(RunExit::Escaped);
                }
            }
        }
        Ok(RunExit::BudgetExhausted)
    }

    fn log_stats(&self) {
        let stats = self.stats();
        info!(
            "cycles = {} tlb hits = {} misses = {} flushes = {} block bytes = {}",
            stats.cycles, stats.tlb_hits, stats.tlb_misses, stats.tlb_flushes, stats.block_bytes
        );
    }

    pub fn stats(&self) -> Stats {
        let tlb = self.cpu.mmu.stats();
        Stats {
            cycles: self.cpu.state.cycle,
            tlb_hits: tlb.hits,
            tlb_misses: tlb.misses,
            tlb_flushes: tlb.flushes,
            block_bytes: self.cpu.block_bytes(),
        }
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.memory
    }

    pub fn bridge_mut(&mut self) -> &mut HostBridge {
        &mut self.bridge
    }

    /// Capture registers, timer, console latch and memory. Host sockets are
    /// not captured.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.cpu.state.clone(),
            self.cpu.timer.clone(),
            self.bridge.latched(),
            self.memory.clone(),
        )
    }

    /// Restore a snapshot. Every translation cache is flushed.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), LoadError> {
        if snapshot.version != Snapshot::VERSION {
            return Err(LoadError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        self.cpu.restore(snapshot.cpu, snapshot.timer);
        self.bridge.set_latched(snapshot.kbchar);
        self.memory = snapshot.memory;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Opcode;
    use crate::devices::BufferConsole;
    use crate::image::{Header, MAGIC};
    use crate::memory::Bus;

    fn executable(words: &[u32]) -> Vec<u8> {
        let mut data = Header {
            magic: MAGIC,
            bss: 0,
            entry: 0,
            flags: 0,
        }
        .to_bytes()
        .to_vec();
        for w in words {
            data.extend_from_slice(&w.to_le_bytes());
        }
        data
    }

    fn system() -> (System, BufferConsole) {
        let console = BufferConsole::new();
        let config = EmulatorConfig::default().with_memory_mb(8);
        (System::new(config, Box::new(console.clone())).unwrap(), console)
    }

    #[test]
    fn test_hello_and_halt() {
        let (mut sys, console) = system();
        let prog = executable(&[
            Opcode::LI.with_imm(1),
            Opcode::LBI.with_imm(b'h' as i32),
            Opcode::BOUT.with_imm(0),
            Opcode::LI.with_imm(7),
            Opcode::HALT.with_imm(0),
        ]);
        sys.load(&prog).unwrap();
        assert_eq!(sys.run(u64::MAX).unwrap(), RunExit::Halted(7));
        assert_eq!(console.output(), b"h");
        assert_eq!(sys.stats().cycles, 5);
    }

    #[test]
    fn test_budget_stops_at_instruction_boundary() {
        let (mut sys, _) = system();
        sys.load(&executable(&[Opcode::JMP.with_imm(-4)])).unwrap();
        assert_eq!(sys.run(100).unwrap(), RunExit::BudgetExhausted);
        assert_eq!(sys.stats().cycles, 100);
        assert_eq!(sys.cpu.state.pc, 0);
    }

    #[test]
    fn test_snapshot_resumes_where_it_left_off() {
        let (mut sys, _) = system();
        // a += 1 forever
        sys.load(&executable(&[
            Opcode::ADDI.with_imm(1),
            Opcode::JMP.with_imm(-8),
        ]))
        .unwrap();
        sys.run(10).unwrap();
        let snap = Snapshot::from_bytes(&sys.snapshot().to_bytes().unwrap()).unwrap();
        let a = sys.cpu.state.a;

        sys.run(10).unwrap();
        assert_ne!(sys.cpu.state.a, a);
        sys.memory_mut().write32(0, 0);

        sys.restore(snap).unwrap();
        assert_eq!(sys.cpu.state.a, a);
        assert_eq!(sys.memory().read32(0), Opcode::ADDI.with_imm(1));
    }
}
