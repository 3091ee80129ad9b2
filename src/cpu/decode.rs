//! Instruction decoder
//!
//! Every instruction is one little-endian 32-bit word: the low 8 bits select
//! the opcode and the upper 24 bits carry an immediate.

use std::fmt;

macro_rules! opcodes {
    ($($name:ident = $value:literal,)*) => {
        /// Opcode byte of an instruction word
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $value,)*
        }

        impl Opcode {
            /// Every defined opcode, in encoding order
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            #[inline(always)]
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($value => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    // system
    HALT = 0, ENT = 1, LEV = 2, JMP = 3, JMPI = 4, JSR = 5, JSRA = 6, LEA = 7,
    LEAG = 8, CYC = 9, MCPY = 10, MCMP = 11, MCHR = 12, MSET = 13,
    // load a
    LL = 14, LLS = 15, LLH = 16, LLC = 17, LLB = 18, LLD = 19, LLF = 20,
    LG = 21, LGS = 22, LGH = 23, LGC = 24, LGB = 25, LGD = 26, LGF = 27,
    LX = 28, LXS = 29, LXH = 30, LXC = 31, LXB = 32, LXD = 33, LXF = 34,
    LI = 35, LHI = 36, LIF = 37,
    // load b
    LBL = 38, LBLS = 39, LBLH = 40, LBLC = 41, LBLB = 42, LBLD = 43, LBLF = 44,
    LBG = 45, LBGS = 46, LBGH = 47, LBGC = 48, LBGB = 49, LBGD = 50, LBGF = 51,
    LBX = 52, LBXS = 53, LBXH = 54, LBXC = 55, LBXB = 56, LBXD = 57, LBXF = 58,
    LBI = 59, LBHI = 60, LBIF = 61, LBA = 62, LBAD = 63,
    // store
    SL = 64, SLH = 65, SLB = 66, SLD = 67, SLF = 68,
    SG = 69, SGH = 70, SGB = 71, SGD = 72, SGF = 73,
    SX = 74, SXH = 75, SXB = 76, SXD = 77, SXF = 78,
    // arithmetic
    ADDF = 79, SUBF = 80, MULF = 81, DIVF = 82,
    ADD = 83, ADDI = 84, ADDL = 85, SUB = 86, SUBI = 87, SUBL = 88,
    MUL = 89, MULI = 90, MULL = 91, DIV = 92, DIVI = 93, DIVL = 94,
    DVU = 95, DVUI = 96, DVUL = 97, MOD = 98, MODI = 99, MODL = 100,
    MDU = 101, MDUI = 102, MDUL = 103, AND = 104, ANDI = 105, ANDL = 106,
    OR = 107, ORI = 108, ORL = 109, XOR = 110, XORI = 111, XORL = 112,
    SHL = 113, SHLI = 114, SHLL = 115, SHR = 116, SHRI = 117, SHRL = 118,
    SRU = 119, SRUI = 120, SRUL = 121,
    // logical
    EQ = 122, EQF = 123, NE = 124, NEF = 125, LT = 126, LTU = 127, LTF = 128,
    GE = 129, GEU = 130, GEF = 131,
    // conditional
    BZ = 132, BZF = 133, BNZ = 134, BNZF = 135, BE = 136, BEF = 137,
    BNE = 138, BNEF = 139, BLT = 140, BLTU = 141, BLTF = 142, BGE = 143,
    BGEU = 144, BGEF = 145,
    // conversion
    CID = 146, CUD = 147, CDI = 148, CDU = 149,
    // misc
    CLI = 150, STI = 151, RTI = 152, BIN = 153, BOUT = 154, NOP = 155,
    SSP = 156, PSHA = 157, PSHI = 158, PSHF = 159, PSHB = 160, POPB = 161,
    POPF = 162, POPA = 163, IVEC = 164, PDIR = 165, SPAG = 166, TIME = 167,
    LVAD = 168, TRAP = 169, LUSP = 170, SUSP = 171, LCL = 172, LCA = 173,
    PSHC = 174, POPC = 175, MSIZ = 176, PSHG = 177, POPG = 178,
    // host network bridge
    NET1 = 179, NET2 = 180, NET3 = 181, NET4 = 182, NET5 = 183, NET6 = 184,
    NET7 = 185, NET8 = 186, NET9 = 187,
    // math
    POW = 188, ATN2 = 189, FABS = 190, ATAN = 191, LOG = 192, LOGT = 193,
    EXP = 194, FLOR = 195, CEIL = 196, HYPO = 197, SIN = 198, COS = 199,
    TAN = 200, ASIN = 201, ACOS = 202, SINH = 203, COSH = 204, TANH = 205,
    SQRT = 206, FMOD = 207,
    IDLE = 208,
}

impl Opcode {
    /// Opcodes that fault with a privilege violation in user mode
    pub fn is_privileged(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            IDLE | BIN | BOUT | MSIZ | CLI | STI | RTI | IVEC | PDIR | SPAG | TIME | LVAD
                | LUSP | SUSP | NET1 | NET2 | NET3 | NET4 | NET5 | NET6 | NET7 | NET8
                | NET9
        )
    }

    /// Encode this opcode with a signed 24-bit immediate
    #[inline]
    pub fn with_imm(self, imm: i32) -> u32 {
        ((imm as u32) << 8) | self as u32
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A fetched instruction word split into its fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub word: u32,
    /// Raw opcode byte, kept even when it does not decode
    pub op: u8,
    /// Sign-extended 24-bit immediate
    pub imm: i32,
}

impl Instruction {
    #[inline(always)]
    pub fn decode(word: u32) -> Self {
        Instruction {
            word,
            op: word as u8,
            imm: (word as i32) >> 8,
        }
    }

    #[inline(always)]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_byte(self.op)
    }

    /// Zero-extended 24-bit immediate (bit pattern forms such as `LHI`)
    #[inline(always)]
    pub fn uimm(&self) -> u32 {
        self.word >> 8
    }
}
