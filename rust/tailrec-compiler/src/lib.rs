//! tailrec compiler pass
//!
//! Rewrites self-recursive tail calls in compiled function units into
//! parameter reassignment plus a jump back to the function's entry, so deep
//! recursion runs in constant call-stack space.

pub mod tco;

use tailrec_core::lir::{FunctionUnit, Module};
use tco::{compact, context::RewriteContext, detect, nops};

pub use tco::rewrite::SiteRejection;

// ── Pass options ────────────────────────────────────────────────────

/// Options controlling the pass.
#[derive(Debug, Clone)]
pub struct PassOptions {
    /// Run the pass at all. Default: `true`.
    pub enabled: bool,
    /// Remove `NOP`s left behind by rewritten sites. Default: `false`, which
    /// keeps the array length equal to the original plus appendix.
    pub strip_nops: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            strip_nops: false,
        }
    }
}

/// What one invocation did to one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub sites_rewritten: usize,
    /// Self-recursive tail calls detected but left intact
    pub sites_rejected: usize,
    /// Instructions appended past the original array
    pub appended: usize,
    /// Temporaries protected through the remap table
    pub protected_slots: u32,
    /// Temporaries added in total (protected slots plus snapshot copies)
    pub temps_added: u32,
    pub nops_stripped: usize,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        self.sites_rewritten > 0
    }
}

/// Totals over a module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReport {
    pub functions_changed: usize,
    pub sites_rewritten: usize,
    pub sites_rejected: usize,
}

// ── Driver ──────────────────────────────────────────────────────────

/// Run the pass on one function unit.
///
/// The unit is left untouched unless at least one call site was rewritten,
/// in which case its instructions and temp count are replaced together.
pub fn optimize_function(unit: &mut FunctionUnit, options: &PassOptions) -> PassReport {
    if !options.enabled || unit.name.is_none() || unit.is_empty() {
        return PassReport::default();
    }

    let entry = detect::entry_address(&unit.instructions);
    let mut ctx = RewriteContext::new(unit, entry);
    detect::scan(&mut ctx, unit);

    let mut report = PassReport {
        sites_rejected: ctx.rejected,
        ..PassReport::default()
    };
    if ctx.sites.is_empty() {
        tracing::debug!(
            function = %unit.qualified_name(),
            rejected = report.sites_rejected,
            "no recursive tail calls rewritten"
        );
        return report;
    }

    report.sites_rewritten = ctx.sites.len();
    report.appended = ctx.extra;
    report.protected_slots = ctx.remap.protected();
    report.temps_added = ctx.remap.allocated();

    let compacted = compact::compact(ctx);
    unit.instructions = compacted.instructions;
    unit.temps = compacted.temps;

    if options.strip_nops {
        report.nops_stripped = nops::strip_nops(unit);
    }

    tracing::debug!(
        function = %unit.qualified_name(),
        entry,
        rewritten = report.sites_rewritten,
        rejected = report.sites_rejected,
        appended = report.appended,
        temps = unit.temps,
        "recursive tail calls eliminated"
    );
    tracing::trace!(listing = %unit, "rewritten unit");
    report
}

/// Run the pass once on every unit of a module.
pub fn optimize_module(module: &mut Module, options: &PassOptions) -> ModuleReport {
    let mut totals = ModuleReport::default();
    for unit in &mut module.functions {
        let report = optimize_function(unit, options);
        if report.changed() {
            totals.functions_changed += 1;
        }
        totals.sites_rewritten += report.sites_rewritten;
        totals.sites_rejected += report.sites_rejected;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailrec_core::builder::FunctionBuilder;
    use tailrec_core::lir::{Constant, OpCode};

    fn countdown() -> FunctionUnit {
        // countdown(n) { if (n == 0) return 0; return countdown(n - 1); }
        let mut b = FunctionBuilder::function("countdown");
        let n = b.param("n");
        let zero = b.int(0);
        let one = b.int(1);
        let recurse = b.label();
        let done = b.binary(OpCode::IsEqual, n, zero);
        b.jmpz(done, recurse);
        b.ret(zero);
        b.bind(recurse);
        b.init_fcall("countdown");
        let next = b.binary(OpCode::Sub, n, one);
        b.send(next, 1);
        let r = b.do_call();
        b.ret(r);
        b.finish().unwrap()
    }

    #[test]
    fn test_optimize_function_rewrites_countdown() {
        let mut unit = countdown();
        let len = unit.instructions.len();
        let report = optimize_function(&mut unit, &PassOptions::default());
        assert_eq!(report.sites_rewritten, 1);
        assert_eq!(report.appended, 0);
        assert_eq!(unit.instructions.len(), len);
        assert!(!unit.instructions.iter().any(|i| i.op.is_call_invoke()));
        assert_eq!(unit.temps, 4);
    }

    #[test]
    fn test_disabled_pass_changes_nothing() {
        let mut unit = countdown();
        let before = unit.clone();
        let options = PassOptions {
            enabled: false,
            ..PassOptions::default()
        };
        assert!(!optimize_function(&mut unit, &options).changed());
        assert_eq!(unit, before);
    }

    #[test]
    fn test_anonymous_unit_is_skipped() {
        let mut b = FunctionBuilder::top_level();
        let r = b.call("main", &[]);
        b.ret(r);
        let mut unit = b.finish().unwrap();
        let before = unit.clone();
        assert_eq!(optimize_function(&mut unit, &PassOptions::default()), PassReport::default());
        assert_eq!(unit, before);
    }

    #[test]
    fn test_strip_nops_option() {
        let mut unit = countdown();
        let len = unit.instructions.len();
        let options = PassOptions {
            strip_nops: true,
            ..PassOptions::default()
        };
        let report = optimize_function(&mut unit, &options);
        assert!(report.nops_stripped > 0);
        assert_eq!(unit.instructions.len(), len - report.nops_stripped);
        assert!(!unit.instructions.iter().any(|i| i.is_nop()));
    }

    #[test]
    fn test_optimize_module_totals() {
        let mut module = Module::new();
        module.push(countdown());
        let mut b = FunctionBuilder::function("id");
        let x = b.param_with_default("x", Constant::Null);
        b.ret(x);
        module.push(b.finish().unwrap());
        let totals = optimize_module(&mut module, &PassOptions::default());
        assert_eq!(totals.functions_changed, 1);
        assert_eq!(totals.sites_rewritten, 1);
        assert_eq!(totals.sites_rejected, 0);
    }
}
