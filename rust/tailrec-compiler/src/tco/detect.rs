//! Recursive tail-call detection.
//!
//! The entry address comes from a forward pass over the parameter prologue.
//! Call sites are then found by scanning backward from the last instruction:
//! a `RETURN` of the value produced by a `DO_*` invocation, whose matching
//! `INIT_*` names the enclosing unit itself.

use super::context::{CallSite, RewriteContext};
use super::rewrite;
use tailrec_core::lir::{FunctionUnit, Instruction, OpCode, Operand};

/// Index of the first instruction that is not `RECV` / `RECV_INIT`.
pub fn entry_address(code: &[Instruction]) -> usize {
    code.iter()
        .position(|instr| !instr.op.is_param_recv())
        .unwrap_or(code.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekingReturn,
    SeekingCall {
        ret: usize,
    },
    /// `depth` counts invocations of nested calls in the argument list
    /// whose `INIT_*` has not been seen yet.
    SeekingInit {
        ret: usize,
        call: usize,
        depth: usize,
    },
}

/// Scan `ctx.code` backward and rewrite every self-recursive tail call.
pub fn scan(ctx: &mut RewriteContext<'_>, unit: &FunctionUnit) {
    let mut state = ScanState::SeekingReturn;

    for i in (0..ctx.code.len()).rev() {
        let instr = ctx.code[i];
        state = match state {
            ScanState::SeekingReturn => seek_return(i, &instr),
            ScanState::SeekingCall { ret } => {
                if instr.op.is_call_invoke() && returns_call_result(&ctx.code[ret], &instr) {
                    ScanState::SeekingInit {
                        ret,
                        call: i,
                        depth: 0,
                    }
                } else {
                    // No call immediately before the return; not a tail call.
                    seek_return(i, &instr)
                }
            }
            ScanState::SeekingInit { ret, call, depth } => {
                if instr.op.is_call_invoke() {
                    ScanState::SeekingInit {
                        ret,
                        call,
                        depth: depth + 1,
                    }
                } else if instr.op.is_call_init() && depth > 0 {
                    ScanState::SeekingInit {
                        ret,
                        call,
                        depth: depth - 1,
                    }
                } else if instr.op.is_call_init() {
                    if is_recursive_call(unit, &instr) {
                        rewrite::rewrite_site(ctx, unit, CallSite { init: i, call, ret });
                    }
                    ScanState::SeekingReturn
                } else if instr.op == OpCode::Return {
                    // A return inside an argument list means the pairing is
                    // broken; drop the candidate and start over from here.
                    ScanState::SeekingCall { ret: i }
                } else {
                    ScanState::SeekingInit { ret, call, depth }
                }
            }
        };
    }
}

fn seek_return(i: usize, instr: &Instruction) -> ScanState {
    if instr.op == OpCode::Return {
        ScanState::SeekingCall { ret: i }
    } else {
        ScanState::SeekingReturn
    }
}

/// The return hands back exactly the temporary the invocation produced.
fn returns_call_result(ret: &Instruction, call: &Instruction) -> bool {
    call.result.as_temp().is_some() && ret.op1 == call.result
}

/// Whether `init` provably calls the unit it belongs to.
pub fn is_recursive_call(unit: &FunctionUnit, init: &Instruction) -> bool {
    let Some(callee) = unit.const_str(init.op2) else {
        return false;
    };

    match unit.scope.as_deref() {
        // Inside a type only method calls can reach this unit.
        Some(scope) => match init.op {
            OpCode::InitStaticMethodCall => match init.op1 {
                // self::name()
                Operand::Unused => {}
                Operand::Const(_) => {
                    if unit.const_str(init.op1) != Some(scope) {
                        return false;
                    }
                }
                _ => return false,
            },
            // $this->name()
            OpCode::InitMethodCall => {
                if !init.op1.is_unused() {
                    return false;
                }
            }
            _ => return false,
        },
        None => {
            if !matches!(init.op, OpCode::InitFcall | OpCode::InitFcallByName) {
                return false;
            }
        }
    }

    unit.name.as_deref() == Some(callee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailrec_core::builder::FunctionBuilder;
    use tailrec_core::lir::Constant;

    fn init_of(unit: &FunctionUnit) -> Instruction {
        *unit
            .instructions
            .iter()
            .find(|i| i.op.is_call_init())
            .expect("unit has a call")
    }

    #[test]
    fn test_entry_address_skips_prologue() {
        let mut b = FunctionBuilder::function("f");
        let a = b.param("a");
        b.param_with_default("b", Constant::Int(1));
        b.ret(a);
        let unit = b.finish().unwrap();
        assert_eq!(entry_address(&unit.instructions), 2);
        assert_eq!(entry_address(&[]), 0);
    }

    #[test]
    fn test_function_calling_itself_is_recursive() {
        let mut b = FunctionBuilder::function("fact");
        let n = b.param("n");
        let r = b.call("fact", &[n]);
        b.ret(r);
        let unit = b.finish().unwrap();
        assert!(is_recursive_call(&unit, &init_of(&unit)));
    }

    #[test]
    fn test_function_calling_other_is_not_recursive() {
        let mut b = FunctionBuilder::function("fact");
        let n = b.param("n");
        let r = b.call("Fact", &[n]);
        b.ret(r);
        let unit = b.finish().unwrap();
        assert!(!is_recursive_call(&unit, &init_of(&unit)));
    }

    #[test]
    fn test_static_call_requires_matching_scope() {
        for (ty, expected) in [(Some("Mine"), true), (None, true), (Some("Other"), false)] {
            let mut b = FunctionBuilder::method("Mine", "walk");
            let n = b.param("n");
            b.init_static_call(ty, "walk");
            b.send(n, 1);
            let r = b.do_call();
            b.ret(r);
            let unit = b.finish().unwrap();
            assert_eq!(is_recursive_call(&unit, &init_of(&unit)), expected, "{ty:?}");
        }
    }

    #[test]
    fn test_method_call_requires_implicit_receiver() {
        let mut b = FunctionBuilder::method("Mine", "walk");
        let other = b.param("other");
        b.init_method_call(other, "walk");
        let r = b.do_call();
        b.ret(r);
        let unit = b.finish().unwrap();
        assert!(!is_recursive_call(&unit, &init_of(&unit)));

        let mut b = FunctionBuilder::method("Mine", "walk");
        b.init_method_call(Operand::Unused, "walk");
        let r = b.do_call();
        b.ret(r);
        let unit = b.finish().unwrap();
        assert!(is_recursive_call(&unit, &init_of(&unit)));
    }

    #[test]
    fn test_plain_function_call_from_method_is_not_recursive() {
        let mut b = FunctionBuilder::method("Mine", "walk");
        let r = b.call("walk", &[]);
        b.ret(r);
        let unit = b.finish().unwrap();
        assert!(!is_recursive_call(&unit, &init_of(&unit)));
    }

    #[test]
    fn test_dynamic_callee_is_not_recursive() {
        let mut b = FunctionBuilder::function("f");
        let name = b.param("name");
        b.emit(Instruction::new(OpCode::InitFcallByName, Operand::Unused, name, Operand::Unused));
        let r = b.do_call();
        b.ret(r);
        let unit = b.finish().unwrap();
        assert!(!is_recursive_call(&unit, &init_of(&unit)));
    }
}
