#![allow(dead_code)]

use em32::cpu::Opcode;
use em32::devices::BufferConsole;
use em32::image::{Header, MAGIC};
use em32::{EmulatorConfig, System};

/// Straight-line program builder. Addresses are byte offsets from 0.
#[derive(Default)]
pub struct Asm {
    words: Vec<u32>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&mut self, op: Opcode, imm: i32) -> &mut Self {
        self.words.push(op.with_imm(imm));
        self
    }

    pub fn bare(&mut self, op: Opcode) -> &mut Self {
        self.op(op, 0)
    }

    /// Address of the next instruction to be emitted
    pub fn here(&self) -> u32 {
        self.words.len() as u32 * 4
    }

    /// Displacement from the instruction about to be emitted to `target`
    pub fn rel(&self, target: u32) -> i32 {
        target as i32 - (self.here() as i32 + 4)
    }

    /// Rewrite the instruction at `at`, with `imm` relative like `rel`
    pub fn patch(&mut self, at: u32, op: Opcode, target: u32) -> &mut Self {
        let imm = target as i32 - (at as i32 + 4);
        self.words[at as usize / 4] = op.with_imm(imm);
        self
    }

    /// Rewrite the instruction at `at` with an absolute immediate
    pub fn set(&mut self, at: u32, op: Opcode, imm: i32) -> &mut Self {
        self.words[at as usize / 4] = op.with_imm(imm);
        self
    }

    pub fn image(&self, entry: u32) -> Vec<u8> {
        let mut data = Header {
            magic: MAGIC,
            bss: 0,
            entry,
            flags: 0,
        }
        .to_bytes()
        .to_vec();
        for w in &self.words {
            data.extend_from_slice(&w.to_le_bytes());
        }
        data
    }
}

pub fn system(memory_mb: u32) -> (System, BufferConsole) {
    system_with(EmulatorConfig::default().with_memory_mb(memory_mb))
}

pub fn system_with(config: EmulatorConfig) -> (System, BufferConsole) {
    let console = BufferConsole::new();
    let system = System::new(config, Box::new(console.clone())).unwrap();
    (system, console)
}

pub fn boot(asm: &Asm, memory_mb: u32) -> (System, BufferConsole) {
    let (mut system, console) = system(memory_mb);
    system.load(&asm.image(0)).unwrap();
    (system, console)
}
