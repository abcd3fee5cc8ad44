//! The register-based bytecode instruction set: encoding, textual
//! disassembly, and the growable code-block / code-collection containers.
//!
//! Operands are named `a`, `b`, `c` for the triplet form and `a`, `w` (wide)
//! for the pair form, matching spec.md §4.1. `$n` denotes register `n`, `@n`
//! a data-pool slot, mirrored in the `Display` impl below the way the
//! teacher's `src/back/asm.rs` renders its RISC-V `Instruction` enum.

use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A register index. Register 0 is reserved for the argument count of a
/// dynamic call; general-purpose registers begin at 1.
pub type Reg = u8;

/// High bit on a `LOAD` target register selects the evaluation stack instead
/// of the data pool as the source memory. The compiler never emits this
/// form; it exists so the VM's addressing mode matches spec.md §4.1 in full.
pub const LOAD_STACK_BIT: u8 = 0x40;

/// A single bytecode instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Nil { a: Reg },
    Load { a: Reg, w: u16 },
    Loadv { a: Reg, w: i16 },
    Store { a: Reg, w: u16 },
    Move { a: Reg, b: Reg },

    Push { a: Reg },
    Pop { a: Reg },
    Restore { n: u8 },

    Jmp { a: Reg },

    Add { a: Reg, b: Reg, c: Reg },
    Sub { a: Reg, b: Reg, c: Reg },
    Mul { a: Reg, b: Reg, c: Reg },
    Div { a: Reg, b: Reg, c: Reg },
    Negate { a: Reg, b: Reg },
    Modulo { a: Reg, b: Reg, c: Reg },

    And { a: Reg, b: Reg, c: Reg },
    Or { a: Reg, b: Reg, c: Reg },
    Not { a: Reg, b: Reg },

    /// `cond` is the boolean (0 or 1) that, if matched, lets execution fall
    /// through; otherwise the next instruction is skipped.
    Equal { cond: u8, b: Reg, c: Reg },
    LessThan { cond: u8, b: Reg, c: Reg },

    Deref { a: Reg, b: Reg, n: u8 },

    Call { w: u16 },
    CallDynamic { w: u16 },
    Return { a: Reg },

    Import { w: u16 },
}

impl Instruction {
    /// Short mnemonic used by the disassembler, matching
    /// `original_source/src/machine/disassemble.c`'s naming.
    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;
        match self {
            Nil { .. } => "nil",
            Load { .. } => "load",
            Loadv { .. } => "loadv",
            Store { .. } => "store",
            Move { .. } => "move",
            Push { .. } => "push",
            Pop { .. } => "pop",
            Restore { .. } => "restore",
            Jmp { .. } => "jmp",
            Add { .. } => "add",
            Sub { .. } => "sub",
            Mul { .. } => "mul",
            Div { .. } => "div",
            Negate { .. } => "negate",
            Modulo { .. } => "modulo",
            And { .. } => "and",
            Or { .. } => "or",
            Not { .. } => "not",
            Equal { .. } => "equal",
            LessThan { .. } => "lessthan",
            Deref { .. } => "deref",
            Call { .. } => "call",
            CallDynamic { .. } => "calld",
            Return { .. } => "return",
            Import { .. } => "import",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        let m = self.mnemonic();
        match self {
            Nil { a } | Push { a } | Pop { a } | Jmp { a } | Return { a } => {
                write!(f, "{m:<10} ${a}")
            }
            Load { a, w } | Store { a, w } => write!(f, "{m:<10} ${a} @{w}"),
            Loadv { a, w } => write!(f, "{m:<10} ${a} {w}"),
            Move { a, b } | Negate { a, b } | Not { a, b } => {
                write!(f, "{m:<10} ${a} ${b}")
            }
            Restore { n } => write!(f, "{m:<10} {n}"),
            Add { a, b, c }
            | Sub { a, b, c }
            | Mul { a, b, c }
            | Div { a, b, c }
            | Modulo { a, b, c }
            | And { a, b, c }
            | Or { a, b, c } => write!(f, "{m:<10} ${a} ${b} ${c}"),
            Equal { cond, b, c } | LessThan { cond, b, c } => {
                write!(f, "{m:<10} {cond} ${b} ${c}")
            }
            Deref { a, b, n } => write!(f, "{m:<10} ${a} ${b} {n}"),
            Call { w } | CallDynamic { w } | Import { w } => write!(f, "{m:<10} @{w}"),
        }
    }
}

/// A growable sequence of instructions: one function body or the module's
/// top-level code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeBlock {
    pub instructions: Vec<Instruction>,
}

impl CodeBlock {
    pub fn new() -> Self {
        CodeBlock {
            instructions: Vec::new(),
        }
    }

    pub fn write(&mut self, instruction: Instruction) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instruction);
        index
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Back-patch a previously emitted `Loadv` used as a jump-distance
    /// placeholder.
    pub fn patch_loadv(&mut self, index: usize, distance: i16) {
        if let Instruction::Loadv { w, .. } = &mut self.instructions[index] {
            *w = distance;
        } else {
            panic!("patch_loadv: instruction at {index} is not a Loadv");
        }
    }
}

/// An indexable set of code blocks. Block 0 is the module's top-level code;
/// every other block is a function body.
#[derive(Debug, Clone, Default, Display, Serialize, Deserialize)]
#[display("{} code region(s)", blocks.len())]
pub struct CodeCollection {
    pub blocks: Vec<CodeBlock>,
}

impl CodeCollection {
    pub fn new() -> Self {
        let mut collection = CodeCollection { blocks: Vec::new() };
        collection.blocks.push(CodeBlock::new());
        collection
    }

    /// Allocate a new (empty) code region, returning its index.
    pub fn add_block(&mut self) -> usize {
        self.blocks.push(CodeBlock::new());
        self.blocks.len() - 1
    }

    pub fn block(&self, index: usize) -> &CodeBlock {
        &self.blocks[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut CodeBlock {
        &mut self.blocks[index]
    }
}

/// Render every code region as human-readable assembly, the logical
/// equivalent of `original_source/src/machine/disassemble.c`.
pub fn disassemble(collection: &CodeCollection) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for (i, block) in collection.blocks.iter().enumerate() {
        let _ = writeln!(out, "\ncode region {i}:\n");
        for (pc, instruction) in block.instructions.iter().enumerate() {
            let _ = writeln!(out, "  {pc:04} {instruction}");
        }
    }
    out
}
