//! Data validation against schemas.
//!
//! Compiled validators are cached per schema so union selection can check the
//! same candidates repeatedly.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{SchemaError, ValidateError};

#[derive(Default)]
pub struct SchemaValidator {
    compiled: Mutex<HashMap<String, Arc<jsonschema::Validator>>>,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.compiled.lock().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("SchemaValidator").field("cached", &cached).finish()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `schema`, reusing an earlier compilation of the same schema.
    ///
    /// # Errors
    ///
    /// Returns `ValidateError::InvalidSchema` if the schema does not compile.
    pub fn compile(&self, schema: &Value) -> Result<Arc<jsonschema::Validator>, ValidateError> {
        let key = schema.to_string();
        if let Some(validator) = self.compiled.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(validator.clone());
        }
        let validator = Arc::new(jsonschema::validator_for(schema).map_err(|e| ValidateError::InvalidSchema {
            message: e.to_string(),
        })?);
        let mut compiled = self.compiled.lock().unwrap_or_else(|e| e.into_inner());
        Ok(compiled.entry(key).or_insert(validator).clone())
    }

    /// True when `data` matches. A schema that does not compile matches nothing.
    pub fn is_valid(&self, schema: &Value, data: &Value) -> bool {
        self.compile(schema).map(|v| v.is_valid(data)).unwrap_or(false)
    }

    /// Validate `data`, collecting every error.
    pub fn validate(&self, schema: &Value, data: &Value) -> Result<(), ValidateError> {
        let validator = self.compile(schema)?;
        let errors: Vec<SchemaError> = validator.iter_errors(data).map(format_error).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidateError::Invalid { errors })
        }
    }

    /// First validation error, if any.
    pub fn first_error(&self, schema: &Value, data: &Value) -> Result<Option<SchemaError>, ValidateError> {
        let validator = self.compile(schema)?;
        let first = validator.iter_errors(data).next().map(format_error);
        Ok(first)
    }
}

/// Validate a payload against a schema without caching the compilation.
pub fn validate_against_schema(schema: &Value, payload: &Value) -> Result<(), ValidateError> {
    SchemaValidator::new().validate(schema, payload)
}

fn format_error(error: jsonschema::ValidationError<'_>) -> SchemaError {
    let schema_pointer = error.schema_path.to_string();
    let keyword = schema_pointer
        .rsplit('/')
        .next()
        .filter(|k| !k.is_empty())
        .unwrap_or("schema")
        .to_string();
    let message = error.to_string();
    SchemaError {
        keyword,
        message: if message.is_empty() {
            "Validation failed".to_string()
        } else {
            message
        },
        data_pointer: error.instance_path.to_string(),
        schema_pointer,
    }
}
