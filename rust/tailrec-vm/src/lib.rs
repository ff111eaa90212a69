//! tailrec VM: register interpreter for function units, used to check that
//! rewritten code computes the same results as the original.

pub mod ops;
pub mod values;
pub mod vm;

pub use values::Value;
pub use vm::{Vm, VmError, VmOptions, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_INSTRUCTIONS};
