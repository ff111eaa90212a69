//! Function unit and module serialization to JSON.

use crate::lir::{FunctionUnit, Module};
use crate::verify::ModelError;

/// Emit a function unit as pretty-printed JSON.
pub fn emit_json(unit: &FunctionUnit) -> Result<String, ModelError> {
    Ok(serde_json::to_string_pretty(unit)?)
}

/// Emit a module as pretty-printed JSON.
pub fn emit_module_json(module: &Module) -> Result<String, ModelError> {
    Ok(serde_json::to_string_pretty(module)?)
}

pub fn unit_from_json(json: &str) -> Result<FunctionUnit, ModelError> {
    Ok(serde_json::from_str(json)?)
}

pub fn module_from_json(json: &str) -> Result<Module, ModelError> {
    Ok(serde_json::from_str(json)?)
}
