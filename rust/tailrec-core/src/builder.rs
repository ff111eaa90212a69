//! Function unit builder.
//!
//! Emits instructions in the layout a host compiler produces: a `RECV` /
//! `RECV_INIT` prologue, then the body, with call expressions lowered to
//! `INIT_*`, argument sends and a `DO_*` invocation.

use crate::lir::{Constant, FunctionUnit, Instruction, OpCode, Operand, Param};
use crate::verify::ModelError;

/// Forward-referencable jump destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
pub struct FunctionBuilder {
    unit: FunctionUnit,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl FunctionBuilder {
    pub fn function(name: &str) -> Self {
        Self::from_unit(FunctionUnit::new(name))
    }

    pub fn method(scope: &str, name: &str) -> Self {
        Self::from_unit(FunctionUnit::method(scope, name))
    }

    pub fn top_level() -> Self {
        Self::from_unit(FunctionUnit::top_level())
    }

    fn from_unit(unit: FunctionUnit) -> Self {
        Self {
            unit,
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Intern a constant, reusing an equal pool entry.
    pub fn constant(&mut self, value: Constant) -> Operand {
        if let Some(idx) = self.unit.constants.iter().position(|c| *c == value) {
            return Operand::Const(idx as u32);
        }
        self.unit.constants.push(value);
        Operand::Const(self.unit.constants.len() as u32 - 1)
    }

    pub fn int(&mut self, value: i64) -> Operand {
        self.constant(Constant::Int(value))
    }

    pub fn string(&mut self, value: &str) -> Operand {
        self.constant(Constant::Str(value.to_string()))
    }

    /// Declare a required parameter. Must precede any body instruction.
    pub fn param(&mut self, name: &str) -> Operand {
        self.declare_param(name, None)
    }

    /// Declare a parameter with a default value. Must precede any body instruction.
    pub fn param_with_default(&mut self, name: &str, default: Constant) -> Operand {
        let k = self.constant(default);
        self.declare_param(name, k.as_const())
    }

    fn declare_param(&mut self, name: &str, default: Option<u32>) -> Operand {
        debug_assert!(
            self.unit.instructions.iter().all(|i| i.op.is_param_recv()),
            "parameters must be declared before the body"
        );
        let slot = self.alloc_local();
        let position = Operand::Imm(self.unit.params.len() as u32 + 1);
        let instr = match default {
            Some(k) => Instruction::new(OpCode::RecvInit, position, Operand::Const(k), slot),
            None => Instruction::new(OpCode::Recv, position, Operand::Unused, slot),
        };
        self.unit.instructions.push(instr);
        self.unit.params.push(Param {
            name: name.to_string(),
            slot: slot.as_local().unwrap_or_default(),
            default,
        });
        slot
    }

    /// Allocate a named local slot.
    pub fn local(&mut self) -> Operand {
        self.alloc_local()
    }

    fn alloc_local(&mut self) -> Operand {
        self.unit.locals += 1;
        Operand::Local(self.unit.locals - 1)
    }

    /// Allocate a temporary slot.
    pub fn temp(&mut self) -> Operand {
        self.unit.temps += 1;
        Operand::Temp(self.unit.temps - 1)
    }

    /// Index the next emitted instruction will occupy.
    pub fn pc(&self) -> usize {
        self.unit.instructions.len()
    }

    pub fn emit(&mut self, instr: Instruction) -> usize {
        self.unit.instructions.push(instr);
        self.unit.instructions.len() - 1
    }

    /// Emit `op` into a fresh temporary and return it.
    pub fn binary(&mut self, op: OpCode, lhs: Operand, rhs: Operand) -> Operand {
        let result = self.temp();
        self.emit(Instruction::new(op, lhs, rhs, result));
        result
    }

    pub fn assign(&mut self, target: Operand, value: Operand) {
        self.emit(Instruction::new(OpCode::Assign, value, Operand::Unused, target));
    }

    /// `temp = value`, returning the fresh temporary.
    pub fn copy(&mut self, value: Operand) -> Operand {
        let result = self.temp();
        self.emit(Instruction::new(OpCode::QmAssign, value, Operand::Unused, result));
        result
    }

    pub fn ret(&mut self, value: Operand) {
        self.emit(Instruction::new(OpCode::Return, value, Operand::Unused, Operand::Unused));
    }

    pub fn nop(&mut self) {
        self.emit(Instruction::nop());
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.pc());
    }

    pub fn jmp(&mut self, label: Label) {
        let at = self.emit(Instruction::new(
            OpCode::Jmp,
            Operand::Imm(0),
            Operand::Unused,
            Operand::Unused,
        ));
        self.fixups.push((at, label));
    }

    pub fn jmpz(&mut self, cond: Operand, label: Label) {
        let at = self.emit(Instruction::new(OpCode::JmpZ, cond, Operand::Imm(0), Operand::Unused));
        self.fixups.push((at, label));
    }

    pub fn jmpnz(&mut self, cond: Operand, label: Label) {
        let at = self.emit(Instruction::new(OpCode::JmpNz, cond, Operand::Imm(0), Operand::Unused));
        self.fixups.push((at, label));
    }

    // ── Calls ───────────────────────────────────────────────────────

    pub fn init_fcall(&mut self, name: &str) {
        let callee = self.string(name);
        self.emit(Instruction::new(OpCode::InitFcall, Operand::Unused, callee, Operand::Unused));
    }

    /// `$this->name(...)` when `receiver` is unused, otherwise `receiver->name(...)`.
    pub fn init_method_call(&mut self, receiver: Operand, name: &str) {
        let callee = self.string(name);
        self.emit(Instruction::new(OpCode::InitMethodCall, receiver, callee, Operand::Unused));
    }

    /// `Type::name(...)`, or `self::name(...)` when `ty` is `None`.
    pub fn init_static_call(&mut self, ty: Option<&str>, name: &str) {
        let receiver = match ty {
            Some(ty) => self.string(ty),
            None => Operand::Unused,
        };
        let callee = self.string(name);
        self.emit(Instruction::new(
            OpCode::InitStaticMethodCall,
            receiver,
            callee,
            Operand::Unused,
        ));
    }

    /// Positional send; `position` is 1-based.
    pub fn send(&mut self, value: Operand, position: u32) {
        let op = Self::send_op(value);
        self.emit(Instruction::new(op, value, Operand::Imm(position), Operand::Unused));
    }

    pub fn send_named(&mut self, value: Operand, name: &str) {
        let op = Self::send_op(value);
        let name = self.string(name);
        self.emit(Instruction::new(op, value, name, Operand::Unused));
    }

    fn send_op(value: Operand) -> OpCode {
        match value {
            Operand::Local(_) => OpCode::SendVar,
            _ => OpCode::SendVal,
        }
    }

    /// Invoke the innermost pending call, returning its result temporary.
    pub fn do_call(&mut self) -> Operand {
        let result = self.temp();
        self.emit(Instruction::new(OpCode::DoUcall, Operand::Unused, Operand::Unused, result));
        result
    }

    /// `name(args...)` with positional arguments.
    pub fn call(&mut self, name: &str, args: &[Operand]) -> Operand {
        self.init_fcall(name);
        for (i, arg) in args.iter().enumerate() {
            self.send(*arg, i as u32 + 1);
        }
        self.do_call()
    }

    /// Resolve labels and return the finished unit.
    pub fn finish(mut self) -> Result<FunctionUnit, ModelError> {
        for (at, label) in self.fixups {
            let target = self.labels[label.0].ok_or(ModelError::UnboundLabel(label.0))?;
            self.unit.instructions[at].set_jump_target(target);
        }
        Ok(self.unit)
    }
}
