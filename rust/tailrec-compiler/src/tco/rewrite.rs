//! Call-site rewriting.
//!
//! Turns one detected self-recursive tail call
//!
//! ```text
//! INIT_FCALL "f"        <- init
//! ...argument code...
//! SEND_VAL T1, 1
//! DO_UCALL T2 =         <- call
//! RETURN T2             <- ret
//! ```
//!
//! into
//!
//! ```text
//! ...argument code...   (packed from init onward)
//! ASSIGN L0 = T1        (one per parameter, declaration order)
//! JMP entry
//! NOP...                (unused positions)
//! ```
//!
//! Edits are staged against a copy of the region and of the remap table and
//! committed together, so a rejected site is left exactly as it was.

use super::context::{ArgMapping, CallSite, Overflow, RewriteContext, SiteRecord};
use super::protect::TempRemap;
use std::collections::HashSet;
use tailrec_core::lir::{FunctionUnit, Instruction, OpCode, Operand};
use thiserror::Error;

/// Why a detected tail call was left intact
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SiteRejection {
    #[error("named argument '{0}' matches no parameter")]
    UnknownNamedArgument(String),
    #[error("argument position {0} is out of range")]
    PositionOutOfRange(u32),
    #[error("argument send at {0} has neither a position nor a name")]
    MalformedSend(usize),
    #[error("parameter '{0}' is passed more than once")]
    DuplicateArgument(String),
    #[error("parameter '{0}' is not passed and has no default")]
    MissingDefault(String),
    #[error("argument source {0} cannot be reassigned")]
    UnsupportedSource(Operand),
    #[error("argument source L{slot} is overwritten at {at}")]
    ClobberedSource { slot: u32, at: usize },
    #[error("jump at {from} enters the call site at {target}")]
    JumpIntoSite { from: usize, target: usize },
}

/// A fully prepared rewrite, not yet applied
#[derive(Debug)]
struct StagedSite {
    region: Vec<Instruction>,
    remap: TempRemap,
    mapping: ArgMapping,
    required: usize,
    available: usize,
    /// Tail instructions that did not fit into the region
    pending: Vec<Instruction>,
}

/// Rewrite `site`, or leave it untouched and count the rejection.
pub fn rewrite_site(ctx: &mut RewriteContext<'_>, unit: &FunctionUnit, site: CallSite) {
    match stage(ctx, unit, site) {
        Ok(staged) => {
            tracing::debug!(
                function = %unit.qualified_name(),
                init = site.init,
                ret = site.ret,
                required = staged.required,
                available = staged.available,
                overflow = staged.pending.len(),
                "rewrote recursive tail call"
            );
            commit(ctx, site, staged);
        }
        Err(reason) => {
            ctx.rejected += 1;
            tracing::debug!(
                function = %unit.qualified_name(),
                init = site.init,
                ret = site.ret,
                %reason,
                "recursive tail call left intact"
            );
        }
    }
}

fn stage(
    ctx: &RewriteContext<'_>,
    unit: &FunctionUnit,
    site: CallSite,
) -> Result<StagedSite, SiteRejection> {
    let code = &ctx.code;
    if let Some((from, target)) = ctx.jumps.entering(site).next() {
        return Err(SiteRejection::JumpIntoSite { from, target });
    }

    let mut remap = ctx.remap.clone();
    let mut mapping = ArgMapping::new(unit.params.len());
    let mut kept: Vec<Instruction> = Vec::with_capacity(site.len());
    // Region-relative old index -> region-relative new index. Dropped
    // instructions map to the next surviving one.
    let mut index_map = vec![0usize; site.len()];
    let mut depth = 0usize;
    // Original temp ids written so far inside this region
    let mut defined = HashSet::new();

    for i in site.init + 1..site.call {
        let original = code[i];
        let mut instr = original;
        remap.apply_in_region(&mut instr, &mut defined);
        index_map[i - site.init] = kept.len();

        if instr.op.is_call_init() {
            depth += 1;
        } else if instr.op.is_call_invoke() {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && instr.op == OpCode::CheckUndefArgs {
            continue;
        } else if depth == 0 && instr.op.is_arg_send() {
            let idx = resolve_param(unit, &instr, i)?;
            let source = match (original.op1, instr.op1) {
                (Operand::Temp(orig), Operand::Temp(current)) => {
                    // The value stays in `current`; later writes to the
                    // original id go to a fresh slot.
                    remap.protect(orig);
                    defined.remove(&orig);
                    Operand::Temp(current)
                }
                (_, Operand::Local(slot)) => {
                    if let Some(at) = first_write_to(code, slot, i + 1..site.call) {
                        return Err(SiteRejection::ClobberedSource { slot, at });
                    }
                    Operand::Local(slot)
                }
                (_, Operand::Const(k)) => Operand::Const(k),
                (_, other) => return Err(SiteRejection::UnsupportedSource(other)),
            };
            if !mapping.bind(idx, source) {
                return Err(SiteRejection::DuplicateArgument(unit.params[idx].name.clone()));
            }
            continue;
        }
        kept.push(instr);
    }
    for slot in &mut index_map[site.call - site.init..] {
        *slot = kept.len();
    }

    retarget_region_jumps(&mut kept, &index_map, site)?;

    let tail = parameter_tail(unit, &mapping, &mut remap, ctx.entry)?;

    let free = site.len() - kept.len();
    let required = tail.len();
    let mut region = kept;
    let (available, pending) = if required <= free {
        region.extend_from_slice(&tail);
        region.resize(site.len(), Instruction::nop());
        (free, Vec::new())
    } else {
        // The last free position holds the boundary jump into the appendix.
        let fit = free - 1;
        region.extend_from_slice(&tail[..fit]);
        region.push(Instruction::jmp(ctx.appendix_cursor()));
        (fit, tail[fit..].to_vec())
    };
    debug_assert_eq!(region.len(), site.len());

    Ok(StagedSite {
        region,
        remap,
        mapping,
        required,
        available,
        pending,
    })
}

fn commit(ctx: &mut RewriteContext<'_>, site: CallSite, staged: StagedSite) {
    let overflow = if staged.pending.is_empty() {
        None
    } else {
        Some(Overflow {
            boundary: site.ret,
            offset: ctx.appendix_cursor(),
            pending: staged.pending,
        })
    };
    ctx.code.to_mut()[site.init..=site.ret].copy_from_slice(&staged.region);
    ctx.remap = staged.remap;
    let record = SiteRecord {
        site,
        mapping: staged.mapping,
        required: staged.required,
        available: staged.available,
        overflow,
    };
    ctx.extra += record.shortfall();
    ctx.sites.push(record);
}

/// Parameter index targeted by an argument send.
fn resolve_param(
    unit: &FunctionUnit,
    send: &Instruction,
    at: usize,
) -> Result<usize, SiteRejection> {
    match send.op2 {
        // A constant second operand names the parameter.
        Operand::Const(_) => {
            let name = unit
                .const_str(send.op2)
                .ok_or(SiteRejection::MalformedSend(at))?;
            unit.param_index(name)
                .ok_or_else(|| SiteRejection::UnknownNamedArgument(name.to_string()))
        }
        Operand::Imm(position) => {
            if position == 0 || position as usize > unit.params.len() {
                return Err(SiteRejection::PositionOutOfRange(position));
            }
            Ok(position as usize - 1)
        }
        _ => Err(SiteRejection::MalformedSend(at)),
    }
}

/// First instruction in `range` that writes local `slot`.
fn first_write_to(
    code: &[Instruction],
    slot: u32,
    range: std::ops::Range<usize>,
) -> Option<usize> {
    range
        .into_iter()
        .find(|&i| code[i].result == Operand::Local(slot))
}

/// Point jumps among the surviving argument code at their packed positions.
fn retarget_region_jumps(
    kept: &mut [Instruction],
    index_map: &[usize],
    site: CallSite,
) -> Result<(), SiteRejection> {
    for (pos, instr) in kept.iter_mut().enumerate() {
        let Some(target) = instr.jump_target() else {
            continue;
        };
        if target > site.init && target < site.call {
            instr.set_jump_target(site.init + index_map[target - site.init]);
        } else if target >= site.call && target <= site.ret {
            return Err(SiteRejection::JumpIntoSite {
                from: site.init + pos,
                target,
            });
        }
    }
    Ok(())
}

/// Snapshot copies, one assignment per parameter, and the loop-back jump.
fn parameter_tail(
    unit: &FunctionUnit,
    mapping: &ArgMapping,
    remap: &mut TempRemap,
    entry: usize,
) -> Result<Vec<Instruction>, SiteRejection> {
    let mut sources = Vec::with_capacity(unit.params.len());
    for (idx, param) in unit.params.iter().enumerate() {
        let source = match (mapping.source(idx), param.default) {
            (Some(source), _) => source,
            (None, Some(k)) => Operand::Const(k),
            (None, None) => return Err(SiteRejection::MissingDefault(param.name.clone())),
        };
        sources.push(source);
    }

    // A source reading a parameter slot that an earlier assignment has
    // already overwritten must be copied out first.
    let mut copies = Vec::new();
    for i in 0..sources.len() {
        let Operand::Local(slot) = sources[i] else {
            continue;
        };
        let overwritten = unit.params[..i]
            .iter()
            .zip(&sources[..i])
            .any(|(p, src)| p.slot == slot && *src != Operand::Local(p.slot));
        if overwritten {
            let temp = remap.fresh();
            copies.push(Instruction::qm_assign(temp, Operand::Local(slot)));
            sources[i] = Operand::Temp(temp);
        }
    }

    let mut tail = copies;
    tail.extend(
        unit.params
            .iter()
            .zip(&sources)
            .map(|(param, src)| Instruction::assign(param.slot, *src)),
    );
    tail.push(Instruction::jmp(entry));
    Ok(tail)
}
