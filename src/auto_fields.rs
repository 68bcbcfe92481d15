//! Child props for object fields and array elements.
//!
//! A field with no data gets the temporary data id and a change handler that
//! turns its edits into edits of the parent, creating missing ancestors first.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::auto_view::{AutoChangeEvent, AutoViewProps, ChangeHandler};
use crate::change::{AutoChange, Change, ChangeOp, SetNew, SetNewParams};
use crate::error::MatchError;
use crate::expanded::{expand, ExpandedData, NEW_TEMP_ID};
use crate::ids::IdGenerator;
use crate::loader::escape_segment;

/// Address of a child inside a container schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKey<'a> {
    Name(&'a str),
    Index(usize),
}

impl FieldKey<'_> {
    fn segment(&self) -> String {
        match self {
            FieldKey::Name(name) => (*name).to_string(),
            FieldKey::Index(i) => i.to_string(),
        }
    }
}

fn schema_type(schema: &Value) -> Option<&str> {
    schema.get("type").and_then(Value::as_str)
}

/// Field names of an object schema: declared properties, then keys of `data`
/// when the schema allows additional properties.
///
/// # Errors
///
/// Fails for a schema that is not `type: object`.
pub fn all_fields(schema: &Value, schema_pointer: &str, data: Option<&ExpandedData>) -> Result<Vec<String>, MatchError> {
    if schema_type(schema) != Some("object") {
        return Err(MatchError::NotContainerSchema {
            pointer: schema_pointer.to_string(),
        });
    }
    let mut fields: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();

    let additional = !matches!(schema.get("additionalProperties"), None | Some(Value::Bool(false)));
    if additional {
        if let Some(map) = data.and_then(|d| d.value.as_object()) {
            for key in map.keys() {
                if !fields.contains(key) {
                    fields.push(key.clone());
                }
            }
        }
    }
    Ok(fields)
}

/// Apply `pick` (filter and order) then `omit`.
pub fn filter_and_order_fields(fields: Vec<String>, pick: Option<&[String]>, omit: Option<&[String]>) -> Vec<String> {
    let picked = match pick {
        Some(pick) => pick.iter().filter(|name| fields.contains(*name)).cloned().collect(),
        None => fields,
    };
    match omit {
        Some(omit) => picked.into_iter().filter(|name| !omit.contains(name)).collect(),
        None => picked,
    }
}

/// Schema of the child at `key`.
///
/// # Errors
///
/// Fails unless `schema` is an object or array schema.
pub fn next_schema(schema: &Value, schema_pointer: &str, key: FieldKey<'_>) -> Result<Value, MatchError> {
    match (schema_type(schema), key) {
        (Some("array"), key) => {
            let positional = match key {
                FieldKey::Index(i) => schema.get("prefixItems").and_then(|p| p.get(i)),
                FieldKey::Name(_) => None,
            };
            Ok(positional
                .or_else(|| schema.get("items"))
                .or_else(|| schema.get("additionalItems"))
                .cloned()
                .unwrap_or_else(|| json!({})))
        }
        (Some("object"), FieldKey::Name(name)) => {
            if let Some(declared) = schema.get("properties").and_then(|p| p.get(name)) {
                return Ok(declared.clone());
            }
            Ok(match schema.get("additionalProperties") {
                Some(additional @ Value::Object(_)) => additional.clone(),
                _ => json!({}),
            })
        }
        _ => Err(MatchError::NotContainerSchema {
            pointer: schema_pointer.to_string(),
        }),
    }
}

/// Join pointer segments, inserting `#/` into a pointer that has no fragment.
pub fn build_json_pointer(pointer: &str, keys: &[&str]) -> String {
    let joined = keys.join("/");
    if pointer.contains('#') {
        format!("{}/{}", pointer, joined)
    } else {
        format!("{}#/{}", pointer, joined)
    }
}

/// Pointer of the child schema at `key`.
///
/// # Errors
///
/// Fails unless `schema` is an object or array schema.
pub fn build_next_schema_pointer(schema: &Value, schema_pointer: &str, key: FieldKey<'_>) -> Result<String, MatchError> {
    match schema_type(schema) {
        Some("array") => match key {
            FieldKey::Index(i) if schema.get("prefixItems").and_then(|p| p.get(i)).is_some() => {
                Ok(build_json_pointer(schema_pointer, &["prefixItems", &i.to_string()]))
            }
            _ => Ok(build_json_pointer(schema_pointer, &["items"])),
        },
        Some("object") => {
            let name = key.segment();
            let declared = schema.get("properties").and_then(|p| p.get(&name)).is_some();
            if declared {
                Ok(build_json_pointer(schema_pointer, &["properties", &escape_segment(&name)]))
            } else {
                Ok(build_json_pointer(schema_pointer, &["additionalProperties"]))
            }
        }
        _ => Err(MatchError::NotContainerSchema {
            pointer: schema_pointer.to_string(),
        }),
    }
}

/// Props for every visible field of an object node.
pub fn auto_fields_props(props: &AutoViewProps) -> Result<Vec<AutoViewProps>, MatchError> {
    let fields = all_fields(&props.schema, &props.schema_pointer, props.data.as_deref())?;
    let fields = filter_and_order_fields(fields, props.pick.as_deref(), props.omit.as_deref());
    fields.iter().map(|field| auto_field_props(field, props)).collect()
}

/// Props for one field of an object node.
pub fn auto_field_props(field: &str, props: &AutoViewProps) -> Result<AutoViewProps, MatchError> {
    let schema = next_schema(&props.schema, &props.schema_pointer, FieldKey::Name(field))?;
    let schema_pointer = build_next_schema_pointer(&props.schema, &props.schema_pointer, FieldKey::Name(field))?;
    let field_data = props.data.as_ref().and_then(|d| d.get(field)).cloned();
    let required = props
        .schema
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|names| names.iter().any(|n| n.as_str() == Some(field)));

    let on_change = match (&field_data, &props.on_change) {
        (None, Some(upstream)) => Some(missing_field_handler(
            field.to_string(),
            props.data.clone(),
            props.ids.clone(),
            props.schema_pointer.clone(),
            upstream.clone(),
        )),
        _ => props.on_change.clone(),
    };

    Ok(AutoViewProps {
        schema,
        schema_pointer,
        data_id: field_data.as_ref().map_or_else(|| NEW_TEMP_ID.to_string(), |d| d.id.clone()),
        data: field_data,
        field: Some(field.to_string()),
        required,
        depth: props.depth + 1,
        pick: None,
        omit: None,
        validation: false,
        repository_name: props.repository_name.clone(),
        on_change,
        ids: props.ids.clone(),
    })
}

/// Props for the elements of an array node.
///
/// Without array data, one placeholder per `prefixItems` slot.
pub fn auto_items_props(props: &AutoViewProps) -> Result<Vec<AutoViewProps>, MatchError> {
    let items: Vec<Option<Arc<ExpandedData>>> = match props.data.as_ref().and_then(|d| d.value.as_array()) {
        Some(items) => items.iter().cloned().map(Some).collect(),
        None => {
            let slots = props
                .schema
                .get("prefixItems")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            vec![None; slots]
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            Ok(AutoViewProps {
                schema: next_schema(&props.schema, &props.schema_pointer, FieldKey::Index(i))?,
                schema_pointer: build_next_schema_pointer(&props.schema, &props.schema_pointer, FieldKey::Index(i))?,
                data_id: item.as_ref().map_or_else(|| NEW_TEMP_ID.to_string(), |d| d.id.clone()),
                data: item,
                field: None,
                required: false,
                depth: props.depth + 1,
                pick: None,
                omit: None,
                validation: false,
                repository_name: props.repository_name.clone(),
                on_change: props.on_change.clone(),
                ids: props.ids.clone(),
            })
        })
        .collect()
}

fn missing_field_handler(
    field: String,
    parent: Option<Arc<ExpandedData>>,
    ids: Arc<dyn IdGenerator>,
    schema_pointer: String,
    upstream: ChangeHandler,
) -> ChangeHandler {
    Arc::new(move |event: &AutoChangeEvent| {
        let patch = rewrite_missing_field(&field, parent.as_ref(), ids.as_ref(), &event.patch);
        upstream(&AutoChangeEvent {
            schema_pointer: schema_pointer.clone(),
            patch,
        });
    })
}

/// Rewrite a child patch so it lands in the parent object.
pub fn rewrite_missing_field(
    field: &str,
    parent: Option<&Arc<ExpandedData>>,
    ids: &dyn IdGenerator,
    patch: &[AutoChange],
) -> Vec<AutoChange> {
    let object = parent.cloned().unwrap_or_else(|| expand(&json!({}), ids));
    let parent_id = object.id.clone();

    let mut rewritten: Vec<AutoChange> = patch
        .iter()
        .map(|step| match step {
            AutoChange::SetNew(SetNew {
                params: SetNewParams::SetNew { new_value },
                ..
            }) => set_property(&parent_id, field, new_value.clone()),
            AutoChange::Apply(Change {
                target,
                op: ChangeOp::Set { new_value },
            }) if target == NEW_TEMP_ID => set_property(
                &parent_id,
                field,
                Arc::new(ExpandedData::new(ids.next_id(), new_value.clone())),
            ),
            AutoChange::Apply(change) if change.target == NEW_TEMP_ID => {
                AutoChange::Apply(Change::new(parent_id.clone(), change.op.clone()))
            }
            other => other.clone(),
        })
        .collect();

    if parent.map_or(true, |p| p.value.is_undefined()) {
        rewritten.insert(0, AutoChange::set_new(NEW_TEMP_ID, object));
    }
    rewritten
}

fn set_property(target: &str, field: &str, new_value: Arc<ExpandedData>) -> AutoChange {
    AutoChange::Apply(Change::new(
        target,
        ChangeOp::SetProperty {
            property_name: field.to_string(),
            new_value,
        },
    ))
}
