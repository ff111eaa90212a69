//! Self-recursive tail-call elimination.
//!
//! `detect` finds call sites and hands each to `rewrite`, which consults the
//! shared `protect` table; `compact` lays out the final array.

pub mod compact;
pub mod context;
pub mod detect;
pub mod nops;
pub mod protect;
pub mod rewrite;
