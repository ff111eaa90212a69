//! Per-unit rewrite state.

use super::protect::TempRemap;
use std::borrow::Cow;
use tailrec_core::lir::{FunctionUnit, Instruction, Operand};

/// One tail call: `[init, ret]` with the invocation at `call`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub init: usize,
    pub call: usize,
    pub ret: usize,
}

impl CallSite {
    /// Number of instructions in `[init, ret]`.
    pub fn len(&self) -> usize {
        self.ret - self.init + 1
    }

    pub fn contains(&self, idx: usize) -> bool {
        (self.init..=self.ret).contains(&idx)
    }
}

/// Parameter index → argument source recorded from the call's sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgMapping {
    sources: Vec<Option<Operand>>,
}

impl ArgMapping {
    pub fn new(params: usize) -> Self {
        Self {
            sources: vec![None; params],
        }
    }

    /// Record `source` for parameter `idx`. Returns false if already bound.
    pub fn bind(&mut self, idx: usize, source: Operand) -> bool {
        match self.sources.get_mut(idx) {
            Some(slot @ None) => {
                *slot = Some(source);
                true
            }
            _ => false,
        }
    }

    pub fn source(&self, idx: usize) -> Option<Operand> {
        self.sources.get(idx).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Instructions that did not fit into a site's region
#[derive(Debug, Clone)]
pub struct Overflow {
    /// Index of the boundary jump at the end of the region
    pub boundary: usize,
    /// Where `pending` lands in the final array
    pub offset: usize,
    pub pending: Vec<Instruction>,
}

/// A rewritten call site
#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub site: CallSite,
    pub mapping: ArgMapping,
    /// Assignments, snapshot copies and the loop-back jump
    pub required: usize,
    /// Region positions usable for `required`
    pub available: usize,
    pub overflow: Option<Overflow>,
}

impl SiteRecord {
    /// Instructions this site adds past the original array length.
    pub fn shortfall(&self) -> usize {
        self.overflow.as_ref().map_or(0, |o| o.pending.len())
    }
}

/// Jumps of the original array, sorted by target
#[derive(Debug, Clone, Default)]
pub struct JumpIndex {
    /// `(target, from)` pairs
    edges: Vec<(usize, usize)>,
}

impl JumpIndex {
    pub fn new(code: &[Instruction]) -> Self {
        let mut edges: Vec<_> = code
            .iter()
            .enumerate()
            .filter_map(|(from, instr)| instr.jump_target().map(|target| (target, from)))
            .collect();
        edges.sort_unstable();
        Self { edges }
    }

    /// Jumps landing in `init+1..=ret` from outside the site, as `(from, target)`.
    pub fn entering(&self, site: CallSite) -> impl Iterator<Item = (usize, usize)> + '_ {
        let start = self.edges.partition_point(|&(target, _)| target <= site.init);
        self.edges[start..]
            .iter()
            .take_while(move |&&(target, _)| target <= site.ret)
            .filter(move |&&(_, from)| !site.contains(from))
            .map(|&(target, from)| (from, target))
    }
}

/// Rewrite state for one pass invocation on one unit
#[derive(Debug)]
pub struct RewriteContext<'a> {
    /// Loop-back target: first instruction after the parameter prologue
    pub entry: usize,
    /// Working instruction array, copied on the first committed rewrite
    pub code: Cow<'a, [Instruction]>,
    /// Rewritten sites in processing order (reverse source order)
    pub sites: Vec<SiteRecord>,
    pub remap: TempRemap,
    pub jumps: JumpIndex,
    pub original_len: usize,
    /// Total instructions to append past `original_len`
    pub extra: usize,
    pub rejected: usize,
}

impl<'a> RewriteContext<'a> {
    pub fn new(unit: &'a FunctionUnit, entry: usize) -> Self {
        Self {
            entry,
            code: Cow::Borrowed(&unit.instructions),
            sites: Vec::new(),
            remap: TempRemap::new(unit.temps),
            jumps: JumpIndex::new(&unit.instructions),
            original_len: unit.instructions.len(),
            extra: 0,
            rejected: 0,
        }
    }

    /// Next free appendix offset.
    pub fn appendix_cursor(&self) -> usize {
        self.original_len + self.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_mapping_binds_once() {
        let mut mapping = ArgMapping::new(2);
        assert!(mapping.bind(1, Operand::Temp(3)));
        assert!(!mapping.bind(1, Operand::Temp(4)));
        assert!(!mapping.bind(2, Operand::Temp(4)));
        assert_eq!(mapping.source(1), Some(Operand::Temp(3)));
        assert_eq!(mapping.source(0), None);
    }

    #[test]
    fn test_jump_index_reports_only_entering_jumps() {
        let mut code = vec![Instruction::nop(); 8];
        code[0] = Instruction::jmp(3); // into the site
        code[1] = Instruction::jmp(2); // to init, allowed
        code[4] = Instruction::jmp(5); // internal
        code[7] = Instruction::jmp(6); // onto the return
        let index = JumpIndex::new(&code);
        let site = CallSite { init: 2, call: 5, ret: 6 };
        let entering: Vec<_> = index.entering(site).collect();
        assert_eq!(entering, vec![(0, 3), (7, 6)]);
    }

    #[test]
    fn test_call_site_bounds() {
        let site = CallSite { init: 2, call: 5, ret: 6 };
        assert_eq!(site.len(), 5);
        assert!(site.contains(2) && site.contains(6));
        assert!(!site.contains(7));
    }
}
