//! Temporary-slot protection.
//!
//! When a removed argument send used to consume a temporary, that temporary
//! must keep its value until the parameter assignments run. Later writes to
//! the same temporary id are redirected to a fresh slot through this table.
//!
//! The table is shared by every site of a unit, but a read only follows it
//! once the id has been written inside the region being rewritten. A value
//! produced before the site's `INIT_*` still sits in its original slot.

use std::collections::{HashMap, HashSet};
use tailrec_core::lir::{Instruction, Operand};

/// Remap table from original temporary ids to fresh ones
#[derive(Debug, Clone)]
pub struct TempRemap {
    remaps: HashMap<u32, u32>,
    first_free: u32,
    next_free: u32,
    protected: u32,
}

impl TempRemap {
    /// Fresh ids are handed out starting at `first_free` (the unit's temp count).
    pub fn new(first_free: u32) -> Self {
        Self {
            remaps: HashMap::new(),
            first_free,
            next_free: first_free,
            protected: 0,
        }
    }

    /// Current slot for an original temporary id.
    pub fn resolve(&self, temp: u32) -> u32 {
        self.remaps.get(&temp).copied().unwrap_or(temp)
    }

    /// Rewrite the temporary operands of one region instruction.
    ///
    /// Reads of ids in `defined` resolve through the table; others keep their
    /// slot. A temporary result is always redirected and becomes defined.
    pub fn apply_in_region(&self, instr: &mut Instruction, defined: &mut HashSet<u32>) {
        for operand in [&mut instr.op1, &mut instr.op2] {
            if let Operand::Temp(t) = operand {
                if defined.contains(t) {
                    *t = self.resolve(*t);
                }
            }
        }
        if let Operand::Temp(t) = &mut instr.result {
            defined.insert(*t);
            *t = self.resolve(*t);
        }
    }

    /// Protect the value currently held for `original`: subsequent references
    /// to `original` resolve to a newly allocated slot, which is returned.
    pub fn protect(&mut self, original: u32) -> u32 {
        let fresh = self.fresh();
        self.remaps.insert(original, fresh);
        self.protected += 1;
        fresh
    }

    /// Allocate a slot without registering a remap.
    pub fn fresh(&mut self) -> u32 {
        let slot = self.next_free;
        self.next_free += 1;
        slot
    }

    /// Temporary count after all allocations so far.
    pub fn temp_count(&self) -> u32 {
        self.next_free
    }

    /// Number of slots allocated on top of the original count.
    pub fn allocated(&self) -> u32 {
        self.next_free - self.first_free
    }

    pub fn protected(&self) -> u32 {
        self.protected
    }

    pub fn is_empty(&self) -> bool {
        self.remaps.is_empty()
    }
}
