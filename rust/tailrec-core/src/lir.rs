//! Instruction array model.
//! Flat three-operand instructions over constant, local and temporary slots.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// Opcodes understood by the pass and the reference interpreter
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,

    // Parameter prologue
    Recv = 1,     // result = argument #op1
    RecvInit = 2, // result = argument #op1, or constant op2 when not passed

    // Moves
    Assign = 3,   // result (local) = op1
    QmAssign = 4, // result (temp) = op1

    // Arithmetic
    Add = 5,    // result = op1 + op2
    Sub = 6,    // result = op1 - op2
    Mul = 7,    // result = op1 * op2
    Div = 8,    // result = op1 / op2
    Mod = 9,    // result = op1 % op2
    Concat = 10, // result = op1 . op2

    // Comparison and logic
    IsEqual = 11,          // result = op1 == op2
    IsNotEqual = 12,       // result = op1 != op2
    IsSmaller = 13,        // result = op1 < op2
    IsSmallerOrEqual = 14, // result = op1 <= op2
    BoolNot = 15,          // result = !op1

    // Control flow
    Jmp = 16, // jump to op1
    #[strum(serialize = "JMPZ")]
    JmpZ = 17, // if !op1 jump to op2
    #[strum(serialize = "JMPNZ")]
    JmpNz = 18, // if op1 jump to op2
    Return = 19, // return op1

    // Call initialization: op1 = receiver / type, op2 = callee name
    InitFcall = 20,
    InitFcallByName = 21,
    InitMethodCall = 22,
    InitStaticMethodCall = 23,

    // Argument passing: op1 = value, op2 = position (1-based) or name
    SendVal = 24,
    SendVar = 25,
    SendValEx = 26,
    SendVarEx = 27,
    CheckUndefArgs = 28,

    // Call invocation: result = returned value
    DoUcall = 29,
    DoFcall = 30,
    DoFcallByName = 31,
}

impl OpCode {
    pub fn is_param_recv(self) -> bool {
        matches!(self, OpCode::Recv | OpCode::RecvInit)
    }

    pub fn is_call_init(self) -> bool {
        matches!(
            self,
            OpCode::InitFcall
                | OpCode::InitFcallByName
                | OpCode::InitMethodCall
                | OpCode::InitStaticMethodCall
        )
    }

    pub fn is_arg_send(self) -> bool {
        matches!(
            self,
            OpCode::SendVal | OpCode::SendVar | OpCode::SendValEx | OpCode::SendVarEx
        )
    }

    pub fn is_call_invoke(self) -> bool {
        matches!(
            self,
            OpCode::DoUcall | OpCode::DoFcall | OpCode::DoFcallByName
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::JmpZ | OpCode::JmpNz)
    }

    /// Mnemonic used in listings
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

/// One instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Operand {
    #[default]
    Unused,
    /// Index into the unit's constant pool
    Const(u32),
    /// Parameter or named local slot
    Local(u32),
    /// Compiler-allocated temporary slot
    Temp(u32),
    /// Immediate: argument position or absolute jump target
    Imm(u32),
}

impl Operand {
    pub fn is_unused(self) -> bool {
        matches!(self, Operand::Unused)
    }

    pub fn as_temp(self) -> Option<u32> {
        match self {
            Operand::Temp(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_local(self) -> Option<u32> {
        match self {
            Operand::Local(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_const(self) -> Option<u32> {
        match self {
            Operand::Const(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_imm(self) -> Option<u32> {
        match self {
            Operand::Imm(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Unused => write!(f, "_"),
            Operand::Const(k) => write!(f, "K{}", k),
            Operand::Local(l) => write!(f, "L{}", l),
            Operand::Temp(t) => write!(f, "T{}", t),
            Operand::Imm(n) => write!(f, "{}", n),
        }
    }
}

/// A three-operand instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    pub op1: Operand,
    pub op2: Operand,
    pub result: Operand,
}

impl Instruction {
    pub fn new(op: OpCode, op1: Operand, op2: Operand, result: Operand) -> Self {
        Self { op, op1, op2, result }
    }

    pub fn nop() -> Self {
        Self::new(OpCode::Nop, Operand::Unused, Operand::Unused, Operand::Unused)
    }

    pub fn jmp(target: usize) -> Self {
        Self::new(
            OpCode::Jmp,
            Operand::Imm(target as u32),
            Operand::Unused,
            Operand::Unused,
        )
    }

    /// `slot = src`
    pub fn assign(slot: u32, src: Operand) -> Self {
        Self::new(OpCode::Assign, src, Operand::Unused, Operand::Local(slot))
    }

    /// `temp = src`
    pub fn qm_assign(temp: u32, src: Operand) -> Self {
        Self::new(OpCode::QmAssign, src, Operand::Unused, Operand::Temp(temp))
    }

    /// Turn this instruction into a `NOP` with all operands unused.
    pub fn neutralize(&mut self) {
        *self = Self::nop();
    }

    pub fn is_nop(&self) -> bool {
        self.op == OpCode::Nop
    }

    /// Absolute jump target, for jump instructions.
    pub fn jump_target(&self) -> Option<usize> {
        let imm = match self.op {
            OpCode::Jmp => self.op1,
            OpCode::JmpZ | OpCode::JmpNz => self.op2,
            _ => return None,
        };
        imm.as_imm().map(|t| t as usize)
    }

    /// Rewrite the absolute jump target. No-op for non-jumps.
    pub fn set_jump_target(&mut self, target: usize) {
        match self.op {
            OpCode::Jmp => self.op1 = Operand::Imm(target as u32),
            OpCode::JmpZ | OpCode::JmpNz => self.op2 = Operand::Imm(target as u32),
            _ => {}
        }
    }

    pub fn operands(&self) -> [Operand; 3] {
        [self.op1, self.op2, self.result]
    }

    pub fn operands_mut(&mut self) -> [&mut Operand; 3] {
        [&mut self.op1, &mut self.op2, &mut self.result]
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.mnemonic())?;
        if !self.result.is_unused() {
            write!(f, " {} =", self.result)?;
        }
        for operand in [self.op1, self.op2] {
            if !operand.is_unused() {
                write!(f, " {}", operand)?;
            }
        }
        Ok(())
    }
}

/// Constant value in the constant pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Constant {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Float(x) => write!(f, "{:?}", x),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Local slot the parameter is bound to
    pub slot: u32,
    /// Default value constant, if declared
    pub default: Option<u32>,
}

/// One compiled function or method body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionUnit {
    /// `None` for top-level code
    pub name: Option<String>,
    /// Owning type for methods
    pub scope: Option<String>,
    pub params: Vec<Param>,
    /// Number of local slots (parameters included)
    pub locals: u32,
    /// Number of temporary slots
    pub temps: u32,
    pub constants: Vec<Constant>,
    pub instructions: Vec<Instruction>,
}

impl FunctionUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::top_level()
        }
    }

    pub fn method(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            scope: Some(scope.into()),
            ..Self::top_level()
        }
    }

    /// An anonymous unit, e.g. a script's top-level code.
    pub fn top_level() -> Self {
        Self {
            name: None,
            scope: None,
            params: Vec::new(),
            locals: 0,
            temps: 0,
            constants: Vec::new(),
            instructions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn constant(&self, idx: u32) -> Option<&Constant> {
        self.constants.get(idx as usize)
    }

    /// The string held by a constant operand, if any.
    pub fn const_str(&self, operand: Operand) -> Option<&str> {
        operand
            .as_const()
            .and_then(|k| self.constant(k))
            .and_then(Constant::as_str)
    }

    /// Index of the declared parameter with the given name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// `Scope::name`, `name`, or `{main}` for top-level code.
    pub fn qualified_name(&self) -> String {
        match (&self.scope, &self.name) {
            (Some(scope), Some(name)) => format!("{}::{}", scope, name),
            (None, Some(name)) => name.clone(),
            (_, None) => "{main}".to_string(),
        }
    }
}

impl fmt::Display for FunctionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.qualified_name())?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: L{}", param.name, param.slot)?;
            if let Some(c) = param.default.and_then(|k| self.constant(k)) {
                write!(f, " = {}", c)?;
            }
        }
        writeln!(f, ") locals={} temps={}", self.locals, self.temps)?;
        for (i, instr) in self.instructions.iter().enumerate() {
            write!(f, "{:4}: {}", i, instr)?;
            // Inline constant values to keep listings readable
            for operand in [instr.op1, instr.op2] {
                if let Some(c) = operand.as_const().and_then(|k| self.constant(k)) {
                    write!(f, "  ; {}={}", operand, c)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A set of function units, looked up by `(scope, name)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<FunctionUnit>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: FunctionUnit) -> usize {
        self.functions.push(unit);
        self.functions.len() - 1
    }

    pub fn find(&self, scope: Option<&str>, name: &str) -> Option<usize> {
        self.functions
            .iter()
            .position(|f| f.scope.as_deref() == scope && f.name.as_deref() == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_opcode_mnemonics() {
        assert_eq!(OpCode::QmAssign.mnemonic(), "QM_ASSIGN");
        assert_eq!(OpCode::JmpZ.mnemonic(), "JMPZ");
        assert_eq!(OpCode::DoFcallByName.mnemonic(), "DO_FCALL_BY_NAME");
        assert_eq!(
            "INIT_STATIC_METHOD_CALL".parse::<OpCode>().unwrap(),
            OpCode::InitStaticMethodCall
        );
    }

    #[test]
    fn test_opcode_families_are_disjoint() {
        for op in OpCode::iter() {
            let families = [
                op.is_param_recv(),
                op.is_call_init(),
                op.is_arg_send(),
                op.is_call_invoke(),
                op.is_jump(),
            ];
            assert!(families.iter().filter(|f| **f).count() <= 1, "{op} in several families");
        }
    }

    #[test]
    fn test_jump_target_roundtrip() {
        let mut jz =
            Instruction::new(OpCode::JmpZ, Operand::Temp(0), Operand::Imm(4), Operand::Unused);
        assert_eq!(jz.jump_target(), Some(4));
        jz.set_jump_target(9);
        assert_eq!(jz.op2, Operand::Imm(9));
        assert_eq!(Instruction::jmp(3).jump_target(), Some(3));
        assert_eq!(Instruction::nop().jump_target(), None);
    }

    #[test]
    fn test_instruction_display() {
        let add =
            Instruction::new(OpCode::Add, Operand::Local(0), Operand::Const(1), Operand::Temp(2));
        assert_eq!(add.to_string(), "ADD T2 = L0 K1");
        assert_eq!(Instruction::jmp(7).to_string(), "JMP 7");
    }

    #[test]
    fn test_module_find() {
        let mut module = Module::new();
        module.push(FunctionUnit::new("f"));
        module.push(FunctionUnit::method("A", "f"));
        assert_eq!(module.find(None, "f"), Some(0));
        assert_eq!(module.find(Some("A"), "f"), Some(1));
        assert_eq!(module.find(Some("B"), "f"), None);
    }
}
