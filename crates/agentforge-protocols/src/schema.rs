//! Argument validation against capability parameter schemas.
//!
//! Validation is a pure function of compiled schema plus arguments; it runs
//! on the host side before anything is written to a subprocess.

use serde_json::Value;
use thiserror::Error;

/// Schema errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid parameter schema: {0}")]
    Invalid(String),
}

/// A parameter schema compiled for repeated validation.
///
/// Compiled once per capability at discovery time and shared read-only.
pub struct ArgumentSchema {
    validator: jsonschema::Validator,
}

impl ArgumentSchema {
    /// Compile a JSON Schema.
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| SchemaError::Invalid(e.to_string()))?;
        Ok(Self { validator })
    }

    /// Validate arguments, returning every violation found.
    pub fn check(&self, arguments: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn is_valid(&self, arguments: &Value) -> bool {
        self.validator.is_valid(arguments)
    }
}

impl std::fmt::Debug for ArgumentSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentSchema").finish_non_exhaustive()
    }
}
