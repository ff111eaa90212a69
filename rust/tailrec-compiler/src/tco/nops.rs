//! Optional `NOP` removal after a rewrite.

use tailrec_core::lir::{FunctionUnit, OpCode};

/// Remove all `NOP` instructions from the unit and update jump targets.
///
/// A jump that targeted a removed `NOP` lands on the first surviving
/// instruction after it. Returns the number of instructions removed.
pub fn strip_nops(unit: &mut FunctionUnit) -> usize {
    let len = unit.instructions.len();

    // Build index mapping: old_index -> new_index
    let mut index_map = vec![0usize; len];
    let mut new_index = 0;

    // First pass: assign positions for non-Nops
    for (old_index, instr) in unit.instructions.iter().enumerate() {
        if instr.op != OpCode::Nop {
            index_map[old_index] = new_index;
            new_index += 1;
        }
    }
    if new_index == len {
        return 0;
    }

    // Second pass, walking backward: Nops map to the next non-Nop's position
    // (or the end if there is none).
    let mut next_pos = new_index;
    for old_index in (0..len).rev() {
        if unit.instructions[old_index].op == OpCode::Nop {
            index_map[old_index] = next_pos;
        } else {
            next_pos = index_map[old_index];
        }
    }

    // Update jump targets before removing instructions
    for instr in unit.instructions.iter_mut() {
        if let Some(target) = instr.jump_target() {
            let new_target = if target < len {
                index_map[target]
            } else {
                new_index + (target - len)
            };
            instr.set_jump_target(new_target);
        }
    }

    unit.instructions.retain(|instr| instr.op != OpCode::Nop);
    len - unit.instructions.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailrec_core::lir::{Instruction, Operand};

    #[test]
    fn test_strip_nops_remaps_jumps() {
        let mut unit = FunctionUnit::new("f");
        unit.locals = 1;
        unit.instructions = vec![
            Instruction::new(OpCode::Recv, Operand::Imm(1), Operand::Unused, Operand::Local(0)),
            Instruction::jmp(3),
            Instruction::nop(),
            Instruction::nop(),
            Instruction::new(OpCode::Return, Operand::Local(0), Operand::Unused, Operand::Unused),
            Instruction::jmp(1),
        ];
        assert_eq!(strip_nops(&mut unit), 2);
        assert_eq!(unit.instructions.len(), 4);
        // The jump to the second Nop now lands on the Return.
        assert_eq!(unit.instructions[1].jump_target(), Some(2));
        assert_eq!(unit.instructions[3].jump_target(), Some(1));
    }

    #[test]
    fn test_strip_nops_without_nops_is_noop() {
        let mut unit = FunctionUnit::new("f");
        unit.instructions = vec![Instruction::jmp(0)];
        let before = unit.clone();
        assert_eq!(strip_nops(&mut unit), 0);
        assert_eq!(unit, before);
    }
}
