//! Final array layout.
//!
//! Sites whose assignments did not fit into their own region spill the rest
//! into an appendix past the original end of the array. Each such site ends
//! its region with a boundary jump into its appendix slice; the slice ends
//! with the loop-back jump.

use super::context::RewriteContext;
use tailrec_core::lir::Instruction;

/// The committed result of one pass invocation
#[derive(Debug)]
pub struct Compacted {
    pub instructions: Vec<Instruction>,
    pub temps: u32,
}

/// Lay out the rewritten array, appendix included, consuming the context.
pub fn compact(ctx: RewriteContext<'_>) -> Compacted {
    let final_len = ctx.original_len
        + ctx
            .sites
            .iter()
            .map(|record| record.shortfall())
            .sum::<usize>();

    let mut instructions = Vec::with_capacity(final_len);
    instructions.extend_from_slice(&ctx.code);
    instructions.resize(final_len, Instruction::nop());

    // Appendix slices are laid out in the order the sites were rewritten.
    let mut cursor = ctx.original_len;
    for record in &ctx.sites {
        let Some(overflow) = &record.overflow else {
            continue;
        };
        debug_assert_eq!(overflow.offset, cursor);
        let end = cursor + overflow.pending.len();
        instructions[cursor..end].copy_from_slice(&overflow.pending);
        instructions[overflow.boundary].set_jump_target(cursor);
        cursor = end;
    }
    debug_assert_eq!(cursor, final_len);

    Compacted {
        instructions,
        temps: ctx.remap.temp_count(),
    }
}
