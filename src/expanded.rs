//! Id-annotated ("expanded") data.
//!
//! Every value in an editable page is wrapped as `{ id, value }` so changes can
//! target any node by id. Children are held behind [`Arc`] so a reduce can hand
//! back untouched subtrees by identity.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::ids::IdGenerator;
use crate::types::{BLOCK_TYPE_ALIAS, NOCO_TYPE_KEY, PROPS_KEY};

/// Data id carried by fields that have no data yet.
pub const NEW_TEMP_ID: &str = "__noco__new__";

/// One node of expanded data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedData {
    pub id: String,
    #[serde(default, skip_serializing_if = "ExpandedValue::is_undefined")]
    pub value: ExpandedValue,
}

/// Value of an [`ExpandedData`] node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpandedValue {
    #[default]
    #[serde(skip)]
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Arc<ExpandedData>>),
    Object(IndexMap<String, Arc<ExpandedData>>),
}

impl ExpandedValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, ExpandedValue::Undefined)
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Arc<ExpandedData>>> {
        match self {
            ExpandedValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Arc<ExpandedData>]> {
        match self {
            ExpandedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExpandedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ExpandedValue {
    fn from(s: &str) -> Self {
        ExpandedValue::String(s.to_string())
    }
}

impl From<bool> for ExpandedValue {
    fn from(b: bool) -> Self {
        ExpandedValue::Bool(b)
    }
}

impl From<i64> for ExpandedValue {
    fn from(n: i64) -> Self {
        ExpandedValue::Number(n.into())
    }
}

/// A block: an object node with a component type and a `props` object.
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a> {
    pub id: &'a str,
    pub component_type: &'a str,
    pub props: &'a IndexMap<String, Arc<ExpandedData>>,
}

impl ExpandedData {
    pub fn new(id: impl Into<String>, value: ExpandedValue) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    /// Object member by key.
    pub fn get(&self, key: &str) -> Option<&Arc<ExpandedData>> {
        self.value.as_object().and_then(|map| map.get(key))
    }

    /// Depth-first lookup by id.
    pub fn find(self: &Arc<Self>, id: &str) -> Option<Arc<ExpandedData>> {
        if self.id == id {
            return Some(self.clone());
        }
        match &self.value {
            ExpandedValue::Array(items) => items.iter().find_map(|item| item.find(id)),
            ExpandedValue::Object(map) => map.values().find_map(|item| item.find(id)),
            _ => None,
        }
    }

    /// View this node as a block, if it has the block shape.
    ///
    /// The component type is read from `__noco__type__`, falling back to `type`.
    pub fn as_block(&self) -> Option<BlockView<'_>> {
        let map = self.value.as_object()?;
        let component_type = map
            .get(NOCO_TYPE_KEY)
            .or_else(|| map.get(BLOCK_TYPE_ALIAS))
            .and_then(|t| t.value.as_str())?;
        let props = map.get(PROPS_KEY).and_then(|p| p.value.as_object())?;
        Some(BlockView {
            id: &self.id,
            component_type,
            props,
        })
    }
}

/// Wrap plain JSON as expanded data, giving every node a fresh id.
pub fn expand(raw: &Value, ids: &dyn IdGenerator) -> Arc<ExpandedData> {
    let value = match raw {
        Value::Null => ExpandedValue::Null,
        Value::Bool(b) => ExpandedValue::Bool(*b),
        Value::Number(n) => ExpandedValue::Number(n.clone()),
        Value::String(s) => ExpandedValue::String(s.clone()),
        Value::Array(items) => ExpandedValue::Array(items.iter().map(|item| expand(item, ids)).collect()),
        Value::Object(map) => ExpandedValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand(v, ids)))
                .collect(),
        ),
    };
    Arc::new(ExpandedData::new(ids.next_id(), value))
}

/// Strip ids, recovering plain JSON. `undefined` becomes `null`.
pub fn shrink(data: &ExpandedData) -> Value {
    match &data.value {
        ExpandedValue::Undefined | ExpandedValue::Null => Value::Null,
        ExpandedValue::Bool(b) => Value::Bool(*b),
        ExpandedValue::Number(n) => Value::Number(n.clone()),
        ExpandedValue::String(s) => Value::String(s.clone()),
        ExpandedValue::Array(items) => Value::Array(items.iter().map(|item| shrink(item)).collect()),
        ExpandedValue::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), shrink(v));
            }
            Value::Object(out)
        }
    }
}
