//! Structural checks on function units.
//!
//! The pass itself assumes well-formed input; hosts and the interpreter run
//! `verify` to catch malformed units early.

use crate::lir::{FunctionUnit, Operand};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{function}: instruction {index} references constant K{constant}, pool has {len}")]
    ConstantOutOfRange {
        function: String,
        index: usize,
        constant: u32,
        len: usize,
    },
    #[error("{function}: instruction {index} references L{slot}, unit has {locals} locals")]
    LocalOutOfRange {
        function: String,
        index: usize,
        slot: u32,
        locals: u32,
    },
    #[error("{function}: instruction {index} references T{slot}, unit has {temps} temps")]
    TempOutOfRange {
        function: String,
        index: usize,
        slot: u32,
        temps: u32,
    },
    #[error("{function}: jump at {index} targets {target}, outside 0..{len}")]
    JumpOutOfRange {
        function: String,
        index: usize,
        target: usize,
        len: usize,
    },
    #[error("{function}: parameter '{param}' is bound to L{slot}, unit has {locals} locals")]
    ParamSlotOutOfRange {
        function: String,
        param: String,
        slot: u32,
        locals: u32,
    },
    #[error("{function}: default of parameter '{param}' references missing constant K{constant}")]
    ParamDefaultOutOfRange {
        function: String,
        param: String,
        constant: u32,
    },
    #[error("label {0} was never bound")]
    UnboundLabel(usize),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Check that every operand and jump target of `unit` is in range.
pub fn verify(unit: &FunctionUnit) -> Result<(), ModelError> {
    let function = || unit.qualified_name();
    let len = unit.instructions.len();

    for param in &unit.params {
        if param.slot >= unit.locals {
            return Err(ModelError::ParamSlotOutOfRange {
                function: function(),
                param: param.name.clone(),
                slot: param.slot,
                locals: unit.locals,
            });
        }
        if let Some(k) = param.default {
            if unit.constant(k).is_none() {
                return Err(ModelError::ParamDefaultOutOfRange {
                    function: function(),
                    param: param.name.clone(),
                    constant: k,
                });
            }
        }
    }

    for (index, instr) in unit.instructions.iter().enumerate() {
        for operand in instr.operands() {
            match operand {
                Operand::Const(k) if k as usize >= unit.constants.len() => {
                    return Err(ModelError::ConstantOutOfRange {
                        function: function(),
                        index,
                        constant: k,
                        len: unit.constants.len(),
                    });
                }
                Operand::Local(slot) if slot >= unit.locals => {
                    return Err(ModelError::LocalOutOfRange {
                        function: function(),
                        index,
                        slot,
                        locals: unit.locals,
                    });
                }
                Operand::Temp(slot) if slot >= unit.temps => {
                    return Err(ModelError::TempOutOfRange {
                        function: function(),
                        index,
                        slot,
                        temps: unit.temps,
                    });
                }
                _ => {}
            }
        }
        if let Some(target) = instr.jump_target() {
            if target >= len {
                return Err(ModelError::JumpOutOfRange {
                    function: function(),
                    index,
                    target,
                    len,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{Constant, Instruction, OpCode};

    fn unit_with(instructions: Vec<Instruction>) -> FunctionUnit {
        let mut unit = FunctionUnit::new("f");
        unit.locals = 1;
        unit.temps = 1;
        unit.constants.push(Constant::Int(1));
        unit.instructions = instructions;
        unit
    }

    #[test]
    fn test_verify_accepts_in_range_unit() {
        let unit = unit_with(vec![
            Instruction::new(OpCode::Add, Operand::Local(0), Operand::Const(0), Operand::Temp(0)),
            Instruction::new(OpCode::Return, Operand::Temp(0), Operand::Unused, Operand::Unused),
        ]);
        assert!(verify(&unit).is_ok());
    }

    #[test]
    fn test_verify_rejects_jump_past_end() {
        let unit = unit_with(vec![Instruction::jmp(1)]);
        let err = verify(&unit).unwrap_err();
        assert!(matches!(err, ModelError::JumpOutOfRange { target: 1, len: 1, .. }));
    }

    #[test]
    fn test_verify_rejects_unallocated_temp() {
        let unit = unit_with(vec![Instruction::qm_assign(3, Operand::Const(0))]);
        let err = verify(&unit).unwrap_err();
        assert!(matches!(err, ModelError::TempOutOfRange { slot: 3, .. }));
        assert!(err.to_string().contains("T3"));
    }
}
