//! Change records applied to expanded data.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expanded::{ExpandedData, ExpandedValue};

/// One targeted edit: `{ "target", "kind", "params" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub target: String,
    #[serde(flatten)]
    pub op: ChangeOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ChangeOp {
    /// Replace the target's value.
    Set {
        #[serde(default, skip_serializing_if = "ExpandedValue::is_undefined")]
        new_value: ExpandedValue,
    },
    SetProperty {
        property_name: String,
        new_value: Arc<ExpandedData>,
    },
    RemoveProperty {
        property_name: String,
    },
    /// Insert before `before_item_id`, or append when it is absent.
    AddItem {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before_item_id: Option<String>,
        new_value: Arc<ExpandedData>,
    },
    RemoveItem {
        item_id: String,
    },
}

impl Change {
    pub fn new(target: impl Into<String>, op: ChangeOp) -> Self {
        Self {
            target: target.into(),
            op,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.op {
            ChangeOp::Set { .. } => "set",
            ChangeOp::SetProperty { .. } => "setProperty",
            ChangeOp::RemoveProperty { .. } => "removeProperty",
            ChangeOp::AddItem { .. } => "addItem",
            ChangeOp::RemoveItem { .. } => "removeItem",
        }
    }
}

/// A step emitted by auto views: a real change, or `set-new`, which creates
/// data that does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutoChange {
    SetNew(SetNew),
    Apply(Change),
}

/// `{ "target", "kind": "set-new", "params": { "newValue" } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetNew {
    pub target: String,
    #[serde(flatten)]
    pub params: SetNewParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params")]
pub enum SetNewParams {
    #[serde(rename = "set-new", rename_all = "camelCase")]
    SetNew { new_value: Arc<ExpandedData> },
}

impl AutoChange {
    pub fn set_new(target: impl Into<String>, new_value: Arc<ExpandedData>) -> Self {
        AutoChange::SetNew(SetNew {
            target: target.into(),
            params: SetNewParams::SetNew { new_value },
        })
    }

    pub fn target(&self) -> &str {
        match self {
            AutoChange::SetNew(step) => &step.target,
            AutoChange::Apply(change) => &change.target,
        }
    }
}

impl From<Change> for AutoChange {
    fn from(change: Change) -> Self {
        AutoChange::Apply(change)
    }
}
