//! Literal options of enum-like schemas.

use serde_json::Value;

/// How much of a schema is literal options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKind {
    /// Something other than literals is allowed.
    NotEnum,
    /// Exactly one literal value.
    Single,
    /// A choice between several literals.
    Choice,
}

/// Every literal a schema allows, from `enum`, `const` and nested `oneOf`.
pub fn enum_options(schema: &Value) -> Vec<Value> {
    if let Some(branches) = schema.get("oneOf").and_then(Value::as_array) {
        return branches.iter().flat_map(enum_options).collect();
    }
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return values.clone();
    }
    schema.get("const").map(|v| vec![v.clone()]).unwrap_or_default()
}

/// Classify `schema` by its literal options.
///
/// A `oneOf` is enum-like only when every branch is.
pub fn enum_kind(schema: &Value) -> EnumKind {
    if schema.get("const").is_some() {
        return EnumKind::Single;
    }
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return match values.len() {
            0 => EnumKind::NotEnum,
            1 => EnumKind::Single,
            _ => EnumKind::Choice,
        };
    }
    let Some(branches) = schema.get("oneOf").and_then(Value::as_array) else {
        return EnumKind::NotEnum;
    };
    let mut options = 0;
    for branch in branches {
        match enum_kind(branch) {
            EnumKind::NotEnum => return EnumKind::NotEnum,
            EnumKind::Single => options += 1,
            EnumKind::Choice => options += 2,
        }
    }
    match options {
        0 => EnumKind::NotEnum,
        1 => EnumKind::Single,
        _ => EnumKind::Choice,
    }
}

/// Position of `value` among the options of `schema`.
pub fn option_index(schema: &Value, value: &Value) -> Option<usize> {
    enum_options(schema).iter().position(|option| option == value)
}
