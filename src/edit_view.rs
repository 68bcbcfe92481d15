//! Projection of a page into a render tree for the editor.
//!
//! Blocks (`{ __noco__type__, props }`) become component nodes once their
//! component is loaded. Until then, or after a failed load, they become error
//! views carrying the reason.

use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::cache::LoadState;
use crate::error::RegistryError;
use crate::expanded::{shrink, ExpandedData, ExpandedValue};
use crate::registry::{ComponentRegistry, ErrorViewCause};

/// One node of the projected page.
#[derive(Debug, Clone, PartialEq)]
pub enum EditNode<C> {
    Block {
        id: String,
        component: C,
        props: IndexMap<String, EditNode<C>>,
        is_root: bool,
    },
    ErrorView {
        id: String,
        component: C,
        message: String,
        is_root: bool,
    },
    Array(Vec<EditNode<C>>),
    Object(IndexMap<String, EditNode<C>>),
    Value(Value),
}

/// Component ids used by the blocks of `page`, in order of first use.
pub fn collect_dependencies(page: &ExpandedData) -> Vec<String> {
    let mut ids = Vec::new();
    collect_into(page, &mut ids);
    ids
}

fn collect_into(data: &ExpandedData, ids: &mut Vec<String>) {
    if let Some(block) = data.as_block() {
        if !ids.iter().any(|id| id == block.component_type) {
            ids.push(block.component_type.to_string());
        }
        for prop in block.props.values() {
            collect_into(prop, ids);
        }
        return;
    }
    match &data.value {
        ExpandedValue::Array(items) => items.iter().for_each(|item| collect_into(item, ids)),
        ExpandedValue::Object(map) => map.values().for_each(|item| collect_into(item, ids)),
        _ => {}
    }
}

/// Load every component `page` depends on, concurrently.
///
/// Results are in dependency order; failures stay cached in the registry.
pub async fn preload<C>(registry: &ComponentRegistry<C>, page: &ExpandedData) -> Vec<Result<C, RegistryError>>
where
    C: Clone + Send + Sync + 'static,
{
    let dependencies = collect_dependencies(page);
    debug!(count = dependencies.len(), "preloading page components");
    join_all(dependencies.iter().map(|id| registry.load_component_by_id(id))).await
}

/// Project `page` with whatever components are loaded right now.
///
/// # Errors
///
/// `RegistryError::ErrorViewMissing` when a block needs an error view and none
/// is registered.
pub fn project<C>(registry: &ComponentRegistry<C>, page: &ExpandedData) -> Result<EditNode<C>, RegistryError>
where
    C: Clone + Send + Sync + 'static,
{
    project_node(registry, page, &page.id)
}

/// Load the page's components, then project it.
pub async fn render_page<C>(registry: &ComponentRegistry<C>, page: &ExpandedData) -> Result<EditNode<C>, RegistryError>
where
    C: Clone + Send + Sync + 'static,
{
    preload(registry, page).await;
    project(registry, page)
}

fn project_node<C>(registry: &ComponentRegistry<C>, data: &ExpandedData, root_id: &str) -> Result<EditNode<C>, RegistryError>
where
    C: Clone + Send + Sync + 'static,
{
    if let Some(block) = data.as_block() {
        let id = block.id.to_string();
        let is_root = block.id == root_id;
        let component_id = block.component_type;
        let cause = match registry.driver_state(component_id) {
            LoadState::Loaded(component) => {
                let props = block
                    .props
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), project_node(registry, value, root_id)?)))
                    .collect::<Result<IndexMap<_, _>, RegistryError>>()?;
                return Ok(EditNode::Block {
                    id,
                    component,
                    props,
                    is_root,
                });
            }
            LoadState::Failed(error) => ErrorViewCause::LoadFailed {
                id: component_id.to_string(),
                error,
            },
            LoadState::NotStarted if !registry.contains(component_id) => ErrorViewCause::UnknownId {
                id: component_id.to_string(),
            },
            LoadState::NotStarted | LoadState::Loading => ErrorViewCause::Loading {
                id: component_id.to_string(),
            },
        };
        return Ok(EditNode::ErrorView {
            id,
            component: registry.error_view_for(&cause)?,
            message: cause.message(),
            is_root,
        });
    }

    Ok(match &data.value {
        ExpandedValue::Array(items) => EditNode::Array(
            items
                .iter()
                .map(|item| project_node(registry, item, root_id))
                .collect::<Result<_, _>>()?,
        ),
        ExpandedValue::Object(map) => EditNode::Object(
            map.iter()
                .map(|(key, value)| Ok((key.clone(), project_node(registry, value, root_id)?)))
                .collect::<Result<_, RegistryError>>()?,
        ),
        _ => EditNode::Value(shrink(data)),
    })
}
