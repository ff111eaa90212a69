//! tailrec core
//!
//! Instruction array model shared by the tail-call pass, its host glue and
//! the reference interpreter.

pub mod builder;
pub mod emit;
pub mod lir;
pub mod verify;

pub use builder::{FunctionBuilder, Label};
pub use lir::{Constant, FunctionUnit, Instruction, Module, OpCode, Operand, Param};
pub use verify::{verify, ModelError};
