//! Noco page authoring engine
//!
//! Document model, change reducer and schema-driven component resolution for
//! Noco pages.
//!
//! - [`NocoDoc`] is the stored page tree: tagged nodes with attributes,
//!   listeners and a JSON round-trip.
//! - [`ExpandedData`] wraps plain JSON with ids so [`Change`]s can target any
//!   node; [`reduce`] and [`apply_patch`] apply them with structural sharing.
//! - [`ComponentRegistry`] loads components lazily, once per id.
//! - [`resolve_schema`] turns a schema node (`$ref`, `oneOf`, type unions) into
//!   candidates, and [`AutoViewContext::plan`] picks what renders each one.
//!
//! # Example
//!
//! ```
//! use noco::{apply_patch, expand, shrink, AutoChange, Change, ChangeOp, ExpandedValue, SequentialIds};
//! use serde_json::json;
//!
//! let ids = SequentialIds::new("d");
//! let data = expand(&json!({"title": "Hi"}), &ids);
//! let title = data.get("title").unwrap().id.clone();
//!
//! let change = Change::new(title, ChangeOp::Set { new_value: ExpandedValue::from("Hello") });
//! let next = apply_patch(Some(data), &[AutoChange::from(change)]).unwrap();
//!
//! assert_eq!(shrink(&next), json!({"title": "Hello"}));
//! ```
//!
//! # Stored documents
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `id` | Unique node id |
//! | `__noco__type__` | Literal tag (`"#component"`) or a nested tag node |
//! | `value` | Tag payload (component id, element name, text) |
//! | `props` | Attributes, each a stored node |

mod auto_fields;
mod auto_view;
mod cache;
mod change;
mod components;
mod document;
mod edit_view;
mod enum_options;
mod error;
mod expanded;
mod ids;
mod loader;
mod pages;
mod reducer;
mod registry;
mod resolver;
mod schema_client;
mod types;
mod validator;

pub use auto_fields::{
    all_fields, auto_field_props, auto_fields_props, auto_items_props, build_json_pointer,
    build_next_schema_pointer, filter_and_order_fields, next_schema, rewrite_missing_field, FieldKey,
};
pub use auto_view::{AutoChangeEvent, AutoViewContext, AutoViewProps, ChangeHandler, ViewPlan};
pub use cache::{LoadCache, LoadState};
pub use change::{AutoChange, Change, ChangeOp, SetNew, SetNewParams};
pub use components::{
    ComponentRecord, ComponentsRepo, GetNodeType, Predicate, UnionPredicate, UnionSelectorRecord,
    WrapperRecord,
};
pub use document::{
    AttrFilter, ListenerId, Mutation, NocoDoc, NodeChange, NodeKey, NodeRef, NodeValue, RenderElement,
    RenderTarget, Renderable, Tag, TagKind, WalkOptions, DEFAULT_PAGE_COMPONENT,
};
pub use edit_view::{collect_dependencies, preload, project, render_page, EditNode};
pub use enum_options::{enum_kind, enum_options, option_index, EnumKind};
pub use error::{
    AutoViewError, DocumentError, LoadError, MatchError, PointerError, RegistryError, ResolveError,
    SchemaError, ValidateError,
};
pub use expanded::{expand, shrink, BlockView, ExpandedData, ExpandedValue, NEW_TEMP_ID};
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use loader::{
    escape_segment, load_schema, load_schema_str, navigate_fragment, resolve_pointer, split_ref,
    unescape_segment, DirFetcher, MapFetcher, SchemaFetcher,
};
pub use pages::{home_page_id, EditingDataManager, PageProvider, StaticPages};
pub use reducer::{apply_patch, reduce, visit_and_break};
pub use registry::{ComponentDriver, ComponentLoader, ComponentRegistry, ErrorViewCause, ErrorViewFactory};
pub use resolver::{resolve_schema, Resolution, SchemaCandidate};
pub use schema_client::{SchemaClient, SchemaUpdate};
pub use types::{json_type_name, ResolveOptions, NOCO_TYPE_KEY, PROPS_KEY};
pub use validator::{validate_against_schema, SchemaValidator};

#[cfg(feature = "remote")]
pub use loader::HttpFetcher;
