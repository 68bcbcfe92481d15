//! Structural-sharing reducer over expanded data.

use std::ops::ControlFlow;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::change::{AutoChange, Change, ChangeOp, SetNewParams};
use crate::expanded::{ExpandedData, ExpandedValue, NEW_TEMP_ID};

/// Rewrite a tree top-down.
///
/// The visitor sees each node (pre-order) with its ancestor chain, root first,
/// and returns the node to keep. `Continue` descends into the returned node's
/// children; `Break` stops the whole traversal. Subtrees that come back
/// unchanged keep their identity.
pub fn visit_and_break<F>(root: &Arc<ExpandedData>, mut visitor: F) -> Arc<ExpandedData>
where
    F: FnMut(&Arc<ExpandedData>, &[Arc<ExpandedData>]) -> ControlFlow<Arc<ExpandedData>, Arc<ExpandedData>>,
{
    let mut parents = Vec::new();
    visit(root, &mut parents, &mut visitor).0
}

fn visit<F>(
    node: &Arc<ExpandedData>,
    parents: &mut Vec<Arc<ExpandedData>>,
    visitor: &mut F,
) -> (Arc<ExpandedData>, bool)
where
    F: FnMut(&Arc<ExpandedData>, &[Arc<ExpandedData>]) -> ControlFlow<Arc<ExpandedData>, Arc<ExpandedData>>,
{
    let current = match visitor(node, parents) {
        ControlFlow::Break(replacement) => return (replacement, true),
        ControlFlow::Continue(kept) => kept,
    };

    let mut stopped = false;
    let mut changed = false;
    parents.push(current.clone());
    let rebuilt = match &current.value {
        ExpandedValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if stopped {
                    out.push(item.clone());
                    continue;
                }
                let (next, stop) = visit(item, parents, visitor);
                changed |= !Arc::ptr_eq(&next, item);
                stopped = stop;
                out.push(next);
            }
            ExpandedValue::Array(out)
        }
        ExpandedValue::Object(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (key, item) in map {
                if stopped {
                    out.insert(key.clone(), item.clone());
                    continue;
                }
                let (next, stop) = visit(item, parents, visitor);
                changed |= !Arc::ptr_eq(&next, item);
                stopped = stop;
                out.insert(key.clone(), next);
            }
            ExpandedValue::Object(out)
        }
        _ => ExpandedValue::Undefined,
    };
    parents.pop();

    if changed {
        (Arc::new(ExpandedData::new(current.id.clone(), rebuilt)), stopped)
    } else {
        (current, stopped)
    }
}

/// Apply one change. The first node whose id matches is rewritten; when nothing
/// matches, or the target has the wrong shape, `root` comes back unchanged.
pub fn reduce(root: &Arc<ExpandedData>, change: &Change) -> Arc<ExpandedData> {
    visit_and_break(root, |node, _| {
        if node.id == change.target {
            ControlFlow::Break(apply_op(node, &change.op))
        } else {
            ControlFlow::Continue(node.clone())
        }
    })
}

fn apply_op(node: &Arc<ExpandedData>, op: &ChangeOp) -> Arc<ExpandedData> {
    let value = match (op, &node.value) {
        (ChangeOp::Set { new_value }, _) => new_value.clone(),
        (
            ChangeOp::SetProperty {
                property_name,
                new_value,
            },
            ExpandedValue::Object(map),
        ) => {
            let mut map = map.clone();
            map.insert(property_name.clone(), new_value.clone());
            ExpandedValue::Object(map)
        }
        (ChangeOp::RemoveProperty { property_name }, ExpandedValue::Object(map)) => {
            let mut map = map.clone();
            map.shift_remove(property_name);
            ExpandedValue::Object(map)
        }
        (
            ChangeOp::AddItem {
                before_item_id,
                new_value,
            },
            ExpandedValue::Array(items),
        ) => {
            let index = match before_item_id {
                None => items.len(),
                Some(before) => match items.iter().position(|item| &item.id == before) {
                    Some(index) => index,
                    None => return node.clone(),
                },
            };
            let mut items = items.clone();
            items.insert(index, new_value.clone());
            ExpandedValue::Array(items)
        }
        (ChangeOp::RemoveItem { item_id }, ExpandedValue::Array(items)) => {
            let Some(index) = items.iter().position(|item| &item.id == item_id) else {
                return node.clone();
            };
            let mut items = items.clone();
            items.remove(index);
            ExpandedValue::Array(items)
        }
        _ => return node.clone(),
    };
    Arc::new(ExpandedData::new(node.id.clone(), value))
}

/// Apply an auto-change sequence in order.
///
/// A `set-new` on the temporary id becomes the root when there is none yet;
/// changes against a missing root are skipped.
pub fn apply_patch(root: Option<Arc<ExpandedData>>, steps: &[AutoChange]) -> Option<Arc<ExpandedData>> {
    steps.iter().fold(root, |root, step| match (step, root) {
        (AutoChange::SetNew(set_new), None) if set_new.target == NEW_TEMP_ID => {
            let SetNewParams::SetNew { new_value } = &set_new.params;
            debug!(id = %new_value.id, "set-new creates root");
            Some(new_value.clone())
        }
        (AutoChange::SetNew(_), root) => root,
        (AutoChange::Apply(change), Some(root)) => {
            debug!(change_target = %change.target, kind = change.kind(), "applying change");
            Some(reduce(&root, change))
        }
        (AutoChange::Apply(change), None) => {
            debug!(change_target = %change.target, "no data to apply change to");
            None
        }
    })
}
