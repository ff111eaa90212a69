//! Register VM dispatch loop for executing function units.

use crate::ops;
use crate::values::Value;
use tailrec_core::lir::{FunctionUnit, Module, OpCode, Operand};
use tailrec_core::verify::{verify, ModelError};
use thiserror::Error;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 50_000_000;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("undefined function: {0}")]
    UndefinedFunction(String),
    #[error("{function}: missing argument #{position}")]
    MissingArgument { function: String, position: u32 },
    #[error("{function}: unknown named argument '{name}'")]
    UnknownNamedArgument { function: String, name: String },
    #[error("type error at runtime: {0}")]
    TypeError(String),
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("instruction limit exceeded: {0}")]
    InstructionLimitExceeded(u64),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Execution limits
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub max_call_depth: usize,
    pub max_instructions: u64,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
        }
    }
}

/// A call between its `INIT_*` and its `DO_*`
#[derive(Debug)]
struct PendingCall {
    callee: usize,
    args: Vec<Option<Value>>,
}

#[derive(Debug)]
struct CallFrame {
    func: usize,
    ip: usize,
    locals: Vec<Value>,
    temps: Vec<Value>,
    args: Vec<Option<Value>>,
    pending: Vec<PendingCall>,
    /// Caller operand receiving this frame's return value
    return_to: Operand,
}

pub struct Vm<'m> {
    module: &'m Module,
    options: VmOptions,
    frames: Vec<CallFrame>,
    instruction_count: u64,
    peak_depth: usize,
}

impl<'m> Vm<'m> {
    /// Load a module, verifying every unit.
    pub fn new(module: &'m Module) -> Result<Self, VmError> {
        Self::with_options(module, VmOptions::default())
    }

    pub fn with_options(module: &'m Module, options: VmOptions) -> Result<Self, VmError> {
        for unit in &module.functions {
            verify(unit)?;
        }
        Ok(Self {
            module,
            options,
            frames: Vec::new(),
            instruction_count: 0,
            peak_depth: 0,
        })
    }

    /// Instructions executed by the last call.
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Deepest call stack reached by the last call.
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    /// Call a function (`scope` = `None`) or static method by name.
    pub fn call(
        &mut self,
        scope: Option<&str>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        let func = self.module.find(scope, name).ok_or_else(|| {
            VmError::UndefinedFunction(match scope {
                Some(scope) => format!("{}::{}", scope, name),
                None => name.to_string(),
            })
        })?;

        self.frames.clear();
        self.instruction_count = 0;
        self.peak_depth = 0;
        self.push_frame(func, args.into_iter().map(Some).collect(), Operand::Unused)?;
        self.run()
    }

    fn push_frame(
        &mut self,
        func: usize,
        args: Vec<Option<Value>>,
        return_to: Operand,
    ) -> Result<(), VmError> {
        if self.frames.len() >= self.options.max_call_depth {
            return Err(VmError::StackOverflow(self.options.max_call_depth));
        }
        let unit = &self.module.functions[func];
        tracing::trace!(function = %unit.qualified_name(), depth = self.frames.len() + 1, "call");
        self.frames.push(CallFrame {
            func,
            ip: 0,
            locals: vec![Value::Null; unit.locals as usize],
            temps: vec![Value::Null; unit.temps as usize],
            args,
            pending: Vec::new(),
            return_to,
        });
        self.peak_depth = self.peak_depth.max(self.frames.len());
        Ok(())
    }

    fn run(&mut self) -> Result<Value, VmError> {
        let module = self.module;
        loop {
            let frame = self
                .frames
                .last_mut()
                .ok_or_else(|| VmError::Runtime("call stack underflow".into()))?;
            let unit = &module.functions[frame.func];

            // Falling off the end returns null
            let Some(&instr) = unit.instructions.get(frame.ip) else {
                if let Some(value) = self.return_value(Value::Null)? {
                    return Ok(value);
                }
                continue;
            };

            self.instruction_count = self.instruction_count.saturating_add(1);
            if self.instruction_count > self.options.max_instructions {
                return Err(VmError::InstructionLimitExceeded(self.options.max_instructions));
            }

            frame.ip += 1;

            match instr.op {
                OpCode::Nop | OpCode::CheckUndefArgs => {}

                OpCode::Recv | OpCode::RecvInit => {
                    let position = instr.op1.as_imm().unwrap_or(0);
                    let passed = frame
                        .args
                        .get((position as usize).wrapping_sub(1))
                        .cloned()
                        .flatten();
                    let value = match (passed, instr.op) {
                        (Some(value), _) => value,
                        (None, OpCode::RecvInit) => read(frame, unit, instr.op2)?,
                        (None, _) => {
                            return Err(VmError::MissingArgument {
                                function: unit.qualified_name(),
                                position,
                            })
                        }
                    };
                    write(frame, instr.result, value)?;
                }

                OpCode::Assign | OpCode::QmAssign => {
                    let value = read(frame, unit, instr.op1)?;
                    write(frame, instr.result, value)?;
                }

                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Concat
                | OpCode::IsEqual
                | OpCode::IsNotEqual
                | OpCode::IsSmaller
                | OpCode::IsSmallerOrEqual => {
                    let lhs = read(frame, unit, instr.op1)?;
                    let rhs = read(frame, unit, instr.op2)?;
                    let value = ops::binary(instr.op, &lhs, &rhs)?;
                    write(frame, instr.result, value)?;
                }
                OpCode::BoolNot => {
                    let value = read(frame, unit, instr.op1)?;
                    write(frame, instr.result, Value::Bool(!value.is_truthy()))?;
                }

                // Control flow
                OpCode::Jmp | OpCode::JmpZ | OpCode::JmpNz => {
                    let taken = match instr.op {
                        OpCode::Jmp => true,
                        OpCode::JmpZ => !read(frame, unit, instr.op1)?.is_truthy(),
                        _ => read(frame, unit, instr.op1)?.is_truthy(),
                    };
                    if taken {
                        frame.ip = instr
                            .jump_target()
                            .ok_or_else(|| VmError::Runtime("jump without target".into()))?;
                    }
                }
                OpCode::Return => {
                    let value = read(frame, unit, instr.op1)?;
                    if let Some(value) = self.return_value(value)? {
                        return Ok(value);
                    }
                }

                // Calls
                OpCode::InitFcall
                | OpCode::InitFcallByName
                | OpCode::InitMethodCall
                | OpCode::InitStaticMethodCall => {
                    let callee =
                        resolve_callee(module, frame, unit, instr.op, instr.op1, instr.op2)?;
                    frame.pending.push(PendingCall {
                        callee,
                        args: Vec::new(),
                    });
                }
                OpCode::SendVal | OpCode::SendVar | OpCode::SendValEx | OpCode::SendVarEx => {
                    let value = read(frame, unit, instr.op1)?;
                    let call = frame
                        .pending
                        .last_mut()
                        .ok_or_else(|| VmError::Runtime("argument send outside a call".into()))?;
                    let callee = &module.functions[call.callee];
                    let idx = match instr.op2 {
                        Operand::Imm(position) if position > 0 => position as usize - 1,
                        Operand::Const(_) => {
                            let name = unit.const_str(instr.op2).unwrap_or_default();
                            callee.param_index(name).ok_or_else(|| {
                                VmError::UnknownNamedArgument {
                                    function: callee.qualified_name(),
                                    name: name.to_string(),
                                }
                            })?
                        }
                        other => {
                            return Err(VmError::Runtime(format!("bad argument position {}", other)))
                        }
                    };
                    if call.args.len() <= idx {
                        call.args.resize(idx + 1, None);
                    }
                    call.args[idx] = Some(value);
                }
                OpCode::DoUcall | OpCode::DoFcall | OpCode::DoFcallByName => {
                    let call = frame
                        .pending
                        .pop()
                        .ok_or_else(|| VmError::Runtime("call without init".into()))?;
                    self.push_frame(call.callee, call.args, instr.result)?;
                }
            }
        }
    }

    /// Pop the current frame and hand `value` to the caller. Returns the
    /// value when the outermost frame returned.
    fn return_value(&mut self, value: Value) -> Result<Option<Value>, VmError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::Runtime("call stack underflow".into()))?;
        match self.frames.last_mut() {
            Some(caller) => {
                if !frame.return_to.is_unused() {
                    write(caller, frame.return_to, value)?;
                }
                Ok(None)
            }
            None => Ok(Some(value)),
        }
    }
}

fn read(frame: &CallFrame, unit: &FunctionUnit, operand: Operand) -> Result<Value, VmError> {
    let value = match operand {
        Operand::Unused => Value::Null,
        Operand::Const(k) => unit
            .constant(k)
            .map(Value::from)
            .ok_or_else(|| VmError::Runtime(format!("constant K{} out of bounds", k)))?,
        Operand::Local(slot) => slot_value(&frame.locals, slot, operand)?,
        Operand::Temp(slot) => slot_value(&frame.temps, slot, operand)?,
        Operand::Imm(n) => Value::Int(n as i64),
    };
    Ok(value)
}

fn slot_value(slots: &[Value], slot: u32, operand: Operand) -> Result<Value, VmError> {
    slots
        .get(slot as usize)
        .cloned()
        .ok_or_else(|| VmError::Runtime(format!("{} out of bounds", operand)))
}

fn write(frame: &mut CallFrame, operand: Operand, value: Value) -> Result<(), VmError> {
    let slot = match operand {
        Operand::Local(slot) => frame.locals.get_mut(slot as usize),
        Operand::Temp(slot) => frame.temps.get_mut(slot as usize),
        // Results nobody reads
        Operand::Unused => return Ok(()),
        other => return Err(VmError::Runtime(format!("cannot write to {}", other))),
    };
    *slot.ok_or_else(|| VmError::Runtime(format!("{} out of bounds", operand)))? = value;
    Ok(())
}

fn resolve_callee(
    module: &Module,
    frame: &CallFrame,
    unit: &FunctionUnit,
    op: OpCode,
    receiver: Operand,
    name: Operand,
) -> Result<usize, VmError> {
    let name = match read(frame, unit, name)? {
        Value::Str(s) => s,
        other => {
            return Err(VmError::TypeError(format!(
                "callee name must be a string, got {}",
                other.type_name()
            )))
        }
    };
    let scope = match op {
        OpCode::InitFcall | OpCode::InitFcallByName => None,
        // An unused receiver is the current object / type.
        _ if receiver.is_unused() => Some(
            unit.scope
                .clone()
                .ok_or_else(|| VmError::Runtime(format!("no enclosing type for {}", name)))?,
        ),
        // Objects are modelled by their type name.
        _ => Some(read(frame, unit, receiver)?.as_string()),
    };
    module.find(scope.as_deref(), &name).ok_or_else(|| {
        VmError::UndefinedFunction(match scope {
            Some(scope) => format!("{}::{}", scope, name),
            None => name,
        })
    })
}
