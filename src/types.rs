//! Core types shared across the crate.

use serde_json::Value;

/// Reserved key carrying a node's tag in stored documents and block data.
pub const NOCO_TYPE_KEY: &str = "__noco__type__";

/// Legacy alias for [`NOCO_TYPE_KEY`] accepted in block data.
pub const BLOCK_TYPE_ALIAS: &str = "type";

/// Key holding named children in stored nodes and block data.
pub const PROPS_KEY: &str = "props";

/// Default cap on chained `$ref` hops during a single resolution.
pub const DEFAULT_MAX_REF_DEPTH: usize = 32;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Options for schema resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Id of the root schema document. Refs with an empty document id
    /// (`#/definitions/Foo`) resolve against this document.
    pub root_id: String,
    /// Maximum number of `$ref` hops followed before giving up.
    pub max_ref_depth: usize,
    /// When true, pure `enum`/`const` alternatives of a `oneOf` collapse
    /// into a single synthesized enum candidate.
    pub merge_literals: bool,
}

impl ResolveOptions {
    /// Create resolve options for the given root document.
    pub fn new(root_id: impl Into<String>) -> Self {
        Self {
            root_id: root_id.into(),
            max_ref_depth: DEFAULT_MAX_REF_DEPTH,
            merge_literals: true,
        }
    }

    /// Set the maximum `$ref` chain length.
    pub fn max_ref_depth(mut self, depth: usize) -> Self {
        self.max_ref_depth = depth;
        self
    }

    /// Enable or disable literal merging for `oneOf`.
    pub fn merge_literals(mut self, merge: bool) -> Self {
        self.merge_literals = merge;
        self
    }
}
