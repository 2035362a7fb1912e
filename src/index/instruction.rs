//! Decoded Dalvik instructions, as far as the register-level tracer needs them.
//!
//! The tracer only distinguishes a handful of opcode groups: register copies, result moves,
//! constant loads, array/instance/static field accesses and invocations. Everything else is
//! [`InstructionKind::Other`] and transparent to tracking.
//!
//! Operands are kept in the order the disassembler prints them: registers first (destination
//! before sources for loads, source before object for stores), then the referenced field,
//! method, type or literal. For invocations the position of a register therefore equals the
//! argument index, with the receiver at position 0 for non-static calls.

use std::fmt;

use crate::index::signature::{FieldRef, MethodRef};

/// Invocation flavour of an `invoke-*` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// `invoke-virtual`
    Virtual,
    /// `invoke-super`
    Super,
    /// `invoke-direct`, used for constructors and private methods
    Direct,
    /// `invoke-static`
    Static,
    /// `invoke-interface`
    Interface,
}

/// Opcode group of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    /// `move*` (0x01 - 0x09)
    Move,
    /// `move-result*` (0x0A - 0x0C)
    MoveResult,
    /// `const*` (0x12 - 0x1C)
    Const,
    /// `aget*` (0x44 - 0x4A)
    ArrayGet,
    /// `aput*` (0x4B - 0x51)
    ArrayPut,
    /// `iget*` (0x52 - 0x58)
    InstanceGet,
    /// `iput*` (0x59 - 0x5F)
    InstancePut,
    /// `sget*` (0x60 - 0x66)
    StaticGet,
    /// `sput*` (0x67 - 0x6D)
    StaticPut,
    /// `invoke-*` and `invoke-*/range` (0x6E - 0x72, 0x74 - 0x78)
    Invoke(InvokeKind),
    /// Anything the tracer does not model
    Other,
}

impl InstructionKind {
    /// Classifies a raw Dalvik opcode.
    #[must_use]
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode {
            0x01..=0x09 => InstructionKind::Move,
            0x0A..=0x0C => InstructionKind::MoveResult,
            0x12..=0x1C => InstructionKind::Const,
            0x44..=0x4A => InstructionKind::ArrayGet,
            0x4B..=0x51 => InstructionKind::ArrayPut,
            0x52..=0x58 => InstructionKind::InstanceGet,
            0x59..=0x5F => InstructionKind::InstancePut,
            0x60..=0x66 => InstructionKind::StaticGet,
            0x67..=0x6D => InstructionKind::StaticPut,
            0x6E | 0x74 => InstructionKind::Invoke(InvokeKind::Virtual),
            0x6F | 0x75 => InstructionKind::Invoke(InvokeKind::Super),
            0x70 | 0x76 => InstructionKind::Invoke(InvokeKind::Direct),
            0x71 | 0x77 => InstructionKind::Invoke(InvokeKind::Static),
            0x72 | 0x78 => InstructionKind::Invoke(InvokeKind::Interface),
            _ => InstructionKind::Other,
        }
    }

    /// Returns `true` for any `invoke-*` instruction.
    #[must_use]
    pub fn is_invoke(self) -> bool {
        matches!(self, InstructionKind::Invoke(_))
    }
}

/// A single instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A register, `vN`
    Register(u16),
    /// An integer literal
    Literal(i64),
    /// A string literal
    String(String),
    /// A type reference
    Type(String),
    /// A field reference
    Field(FieldRef),
    /// A method reference
    Method(MethodRef),
}

impl Operand {
    /// Returns the register number if this operand is a register.
    #[must_use]
    pub fn register(&self) -> Option<u16> {
        match self {
            Operand::Register(reg) => Some(*reg),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "v{reg}"),
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::String(value) => write!(f, "{value:?}"),
            Operand::Type(value) => f.write_str(value),
            Operand::Field(field) => write!(f, "{field}"),
            Operand::Method(method) => write!(f, "{method}"),
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Raw opcode byte
    pub opcode: u8,
    /// Opcode group derived from [`Instruction::opcode`]
    pub kind: InstructionKind,
    /// Operands in disassembly order
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Creates an instruction, classifying the opcode.
    #[must_use]
    pub fn new(opcode: u8, operands: Vec<Operand>) -> Self {
        Instruction {
            opcode,
            kind: InstructionKind::from_opcode(opcode),
            operands,
        }
    }

    /// `move vDst, vSrc`
    #[must_use]
    pub fn mov(dst: u16, src: u16) -> Self {
        Self::new(0x01, vec![Operand::Register(dst), Operand::Register(src)])
    }

    /// `move-result-object vDst`
    #[must_use]
    pub fn move_result(dst: u16) -> Self {
        Self::new(0x0C, vec![Operand::Register(dst)])
    }

    /// `const vDst, #value`
    #[must_use]
    pub fn constant(dst: u16, value: i64) -> Self {
        Self::new(0x14, vec![Operand::Register(dst), Operand::Literal(value)])
    }

    /// `const-string vDst, "value"`
    #[must_use]
    pub fn const_string(dst: u16, value: &str) -> Self {
        Self::new(
            0x1A,
            vec![Operand::Register(dst), Operand::String(value.to_string())],
        )
    }

    /// `new-instance vDst, type`
    #[must_use]
    pub fn new_instance(dst: u16, class: &str) -> Self {
        Self::new(
            0x22,
            vec![Operand::Register(dst), Operand::Type(class.to_string())],
        )
    }

    /// `aget-object vDst, vArray, vIndex`
    #[must_use]
    pub fn aget(dst: u16, array: u16, index: u16) -> Self {
        Self::new(
            0x46,
            vec![
                Operand::Register(dst),
                Operand::Register(array),
                Operand::Register(index),
            ],
        )
    }

    /// `aput-object vSrc, vArray, vIndex`
    #[must_use]
    pub fn aput(src: u16, array: u16, index: u16) -> Self {
        Self::new(
            0x4D,
            vec![
                Operand::Register(src),
                Operand::Register(array),
                Operand::Register(index),
            ],
        )
    }

    /// `iget-object vDst, vObject, field`
    #[must_use]
    pub fn iget(dst: u16, object: u16, field: FieldRef) -> Self {
        Self::new(
            0x54,
            vec![
                Operand::Register(dst),
                Operand::Register(object),
                Operand::Field(field),
            ],
        )
    }

    /// `iput-object vSrc, vObject, field`
    #[must_use]
    pub fn iput(src: u16, object: u16, field: FieldRef) -> Self {
        Self::new(
            0x5B,
            vec![
                Operand::Register(src),
                Operand::Register(object),
                Operand::Field(field),
            ],
        )
    }

    /// `sget-object vDst, field`
    #[must_use]
    pub fn sget(dst: u16, field: FieldRef) -> Self {
        Self::new(0x62, vec![Operand::Register(dst), Operand::Field(field)])
    }

    /// `sput-object vSrc, field`
    #[must_use]
    pub fn sput(src: u16, field: FieldRef) -> Self {
        Self::new(0x69, vec![Operand::Register(src), Operand::Field(field)])
    }

    /// `invoke-<kind> {args}, method`
    #[must_use]
    pub fn invoke(kind: InvokeKind, args: &[u16], method: MethodRef) -> Self {
        let opcode = match kind {
            InvokeKind::Virtual => 0x6E,
            InvokeKind::Super => 0x6F,
            InvokeKind::Direct => 0x70,
            InvokeKind::Static => 0x71,
            InvokeKind::Interface => 0x72,
        };
        let mut operands: Vec<Operand> = args.iter().map(|r| Operand::Register(*r)).collect();
        operands.push(Operand::Method(method));
        Self::new(opcode, operands)
    }

    /// `return-void`
    #[must_use]
    pub fn return_void() -> Self {
        Self::new(0x0E, Vec::new())
    }

    /// Returns the register at operand position `index`, if that operand is a register.
    #[must_use]
    pub fn register(&self, index: usize) -> Option<u16> {
        self.operands.get(index).and_then(Operand::register)
    }

    /// Iterates over `(operand position, register)` for every register operand.
    pub fn registers(&self) -> impl Iterator<Item = (usize, u16)> + '_ {
        self.operands
            .iter()
            .enumerate()
            .filter_map(|(pos, op)| op.register().map(|reg| (pos, reg)))
    }

    /// Number of register operands.
    #[must_use]
    pub fn register_count(&self) -> usize {
        self.registers().count()
    }

    /// Returns the invoked method of an `invoke-*` instruction.
    #[must_use]
    pub fn invoked(&self) -> Option<&MethodRef> {
        if !self.kind.is_invoke() {
            return None;
        }
        self.operands.iter().rev().find_map(|op| match op {
            Operand::Method(method) => Some(method),
            _ => None,
        })
    }

    /// Returns the referenced field of a field access instruction.
    #[must_use]
    pub fn field(&self) -> Option<&FieldRef> {
        self.operands.iter().find_map(|op| match op {
            Operand::Field(field) => Some(field),
            _ => None,
        })
    }
}

/// The decoded code of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodBody {
    /// Total number of registers (`.registers`)
    pub registers: u16,
    /// Number of incoming parameter registers, including `this`
    pub ins: u16,
    /// Instructions in program order
    pub instructions: Vec<Instruction>,
}

impl MethodBody {
    /// Creates an empty body with the given register layout.
    #[must_use]
    pub fn new(registers: u16, ins: u16) -> Self {
        MethodBody {
            registers,
            ins,
            instructions: Vec::new(),
        }
    }

    /// Appends an instruction, builder style.
    #[must_use]
    pub fn with(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Number of local (non-parameter) registers.
    ///
    /// Parameters occupy the highest `ins` registers, so register `vN` is a local if
    /// `N < locals()` and parameter `N - locals()` otherwise.
    #[must_use]
    pub fn locals(&self) -> u16 {
        self.registers.saturating_sub(self.ins)
    }

    /// Maps a register to its parameter index, or `None` for locals.
    #[must_use]
    pub fn parameter_index(&self, register: u16) -> Option<usize> {
        let locals = self.locals();
        (register >= locals).then(|| usize::from(register - locals))
    }

    /// Maps a parameter index to its register.
    #[must_use]
    pub fn parameter_register(&self, index: usize) -> Option<u16> {
        let index = u16::try_from(index).ok()?;
        (index < self.ins).then(|| self.locals() + index)
    }
}
