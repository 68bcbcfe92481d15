//! Auto views: choose what renders a schema node.
//!
//! Planning resolves the node's schema, selects a candidate, matches a
//! component in the [`ComponentsRepo`] and layers wrappers, a union selector
//! and an external-document boundary around it. The result is a [`ViewPlan`]
//! the UI layer turns into real widgets.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::auto_fields::{auto_fields_props, auto_items_props};
use crate::change::AutoChange;
use crate::components::ComponentsRepo;
use crate::error::{AutoViewError, MatchError, SchemaError};
use crate::expanded::{shrink, ExpandedData, NEW_TEMP_ID};
use crate::ids::{IdGenerator, RandomIds};
use crate::resolver::{resolve_schema, SchemaCandidate};
use crate::schema_client::SchemaClient;
use crate::types::ResolveOptions;
use crate::validator::SchemaValidator;

/// Patch emitted by an auto view.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoChangeEvent {
    pub schema_pointer: String,
    pub patch: Vec<AutoChange>,
}

pub type ChangeHandler = Arc<dyn Fn(&AutoChangeEvent) + Send + Sync>;

/// Everything an auto view needs to render one schema node.
#[derive(Clone)]
pub struct AutoViewProps {
    pub schema: Value,
    pub schema_pointer: String,
    pub data: Option<Arc<ExpandedData>>,
    /// Id of `data`, or the temporary id when there is no data yet.
    pub data_id: String,
    pub field: Option<String>,
    pub required: bool,
    pub depth: usize,
    pub pick: Option<Vec<String>>,
    pub omit: Option<Vec<String>>,
    pub validation: bool,
    pub repository_name: Option<String>,
    pub on_change: Option<ChangeHandler>,
    pub ids: Arc<dyn IdGenerator>,
}

impl fmt::Debug for AutoViewProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoViewProps")
            .field("schema_pointer", &self.schema_pointer)
            .field("data_id", &self.data_id)
            .field("field", &self.field)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl AutoViewProps {
    pub fn new(schema: Value, schema_pointer: impl Into<String>) -> Self {
        Self {
            schema,
            schema_pointer: schema_pointer.into(),
            data: None,
            data_id: NEW_TEMP_ID.to_string(),
            field: None,
            required: false,
            depth: 0,
            pick: None,
            omit: None,
            validation: false,
            repository_name: None,
            on_change: None,
            ids: Arc::new(RandomIds),
        }
    }

    pub fn with_data(mut self, data: Arc<ExpandedData>) -> Self {
        self.data_id = data.id.clone();
        self.data = Some(data);
        self
    }

    pub fn with_on_change<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AutoChangeEvent) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(handler));
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn pick(mut self, fields: Vec<String>) -> Self {
        self.pick = Some(fields);
        self
    }

    pub fn omit(mut self, fields: Vec<String>) -> Self {
        self.omit = Some(fields);
        self
    }

    /// Send a patch to the change handler, if any.
    pub fn emit(&self, patch: Vec<AutoChange>) {
        if let Some(handler) = &self.on_change {
            handler(&AutoChangeEvent {
                schema_pointer: self.schema_pointer.clone(),
                patch,
            });
        }
    }

    /// Plain JSON of the current data.
    pub fn data_json(&self) -> Option<Value> {
        self.data.as_deref().map(shrink)
    }
}

/// Layered description of what to render.
#[derive(Debug, Clone)]
pub enum ViewPlan<C> {
    Component {
        component: C,
        props: AutoViewProps,
        /// First validation error when `props.validation` is on.
        error: Option<SchemaError>,
    },
    Wrapped {
        wrapper: C,
        inner: Box<ViewPlan<C>>,
    },
    UnionSelector {
        selector: C,
        candidates: Vec<SchemaCandidate>,
        selected: String,
        inner: Box<ViewPlan<C>>,
    },
    /// Children below this point resolve against `schema_id`.
    ExternalRoot {
        schema_id: String,
        inner: Box<ViewPlan<C>>,
    },
}

impl<C> ViewPlan<C> {
    /// Props of the innermost component.
    pub fn props(&self) -> &AutoViewProps {
        match self {
            ViewPlan::Component { props, .. } => props,
            ViewPlan::Wrapped { inner, .. }
            | ViewPlan::UnionSelector { inner, .. }
            | ViewPlan::ExternalRoot { inner, .. } => inner.props(),
        }
    }

    pub fn component(&self) -> &C {
        match self {
            ViewPlan::Component { component, .. } => component,
            ViewPlan::Wrapped { inner, .. }
            | ViewPlan::UnionSelector { inner, .. }
            | ViewPlan::ExternalRoot { inner, .. } => inner.component(),
        }
    }
}

/// Collaborators for planning, passed explicitly.
pub struct AutoViewContext<C> {
    pub repo: Arc<ComponentsRepo<C>>,
    pub client: Arc<SchemaClient>,
    pub validator: Arc<SchemaValidator>,
    pub options: ResolveOptions,
}

impl<C> Clone for AutoViewContext<C> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            client: self.client.clone(),
            validator: self.validator.clone(),
            options: self.options.clone(),
        }
    }
}

impl<C> fmt::Debug for AutoViewContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoViewContext")
            .field("repo", &self.repo.name())
            .field("options", &self.options)
            .finish()
    }
}

impl<C> AutoViewContext<C>
where
    C: Clone + Send + Sync,
{
    pub fn new(repo: Arc<ComponentsRepo<C>>, client: Arc<SchemaClient>, options: ResolveOptions) -> Self {
        Self {
            repo,
            client,
            validator: Arc::new(SchemaValidator::new()),
            options,
        }
    }

    /// Context for planning inside another schema document.
    pub fn for_document(&self, schema_id: &str) -> Self {
        let mut nested = self.clone();
        nested.options.root_id = schema_id.to_string();
        nested
    }

    /// Plan the view for `props`. `selected` is a user's union choice, by pointer.
    ///
    /// # Errors
    ///
    /// Fails when the schema does not resolve or no component matches.
    pub async fn plan(&self, props: &AutoViewProps, selected: Option<&str>) -> Result<ViewPlan<C>, AutoViewError> {
        let resolution = resolve_schema(&self.client, &self.options, &props.schema, &props.schema_pointer).await?;
        let data = props.data_json();
        let chosen = resolution
            .select(data.as_ref(), &self.validator, selected)
            .ok_or_else(|| MatchError::NoComponent {
                pointer: props.schema_pointer.clone(),
            })?
            .clone();

        let mut child = props.clone();
        child.schema = chosen.schema.clone();
        child.schema_pointer = chosen.schema_pointer.clone();

        let record = self.repo.resolve(&child)?;
        debug!(pointer = %child.schema_pointer, component = %record.name, "matched component");

        let error = if child.validation {
            let data = data.clone().unwrap_or(Value::Null);
            self.validator.first_error(&child.schema, &data).ok().flatten()
        } else {
            None
        };

        let wrappers = self.repo.get_wrappers(&child);
        let mut view = ViewPlan::Component {
            component: record.component.clone(),
            props: child.clone(),
            error,
        };
        for wrapper in wrappers.into_iter().rev() {
            view = ViewPlan::Wrapped {
                wrapper,
                inner: Box::new(view),
            };
        }

        if resolution.is_union() {
            if let Some(selector) = self.repo.get_union_selectors(&child, &resolution.schemas).pop() {
                view = ViewPlan::UnionSelector {
                    selector,
                    candidates: resolution.schemas.clone(),
                    selected: chosen.schema_pointer.clone(),
                    inner: Box::new(view),
                };
            }
        }

        if let Some(schema_id) = chosen.document_id() {
            view = ViewPlan::ExternalRoot {
                schema_id: schema_id.to_string(),
                inner: Box::new(view),
            };
        }
        Ok(view)
    }

    /// Plan every field (objects) or element (arrays) below a planned node.
    ///
    /// Children of an external candidate are planned against its document.
    pub async fn plan_children(&self, plan: &ViewPlan<C>) -> Result<Vec<ViewPlan<C>>, AutoViewError> {
        let external = find_external(plan);
        let ctx = match external {
            Some(id) => self.for_document(id),
            None => self.clone(),
        };
        let props = plan.props();
        let children = match props.schema.get("type").and_then(Value::as_str) {
            Some("object") => auto_fields_props(props)?,
            Some("array") => auto_items_props(props)?,
            _ => return Ok(Vec::new()),
        };
        let mut plans = Vec::with_capacity(children.len());
        for child in &children {
            plans.push(ctx.plan(child, None).await?);
        }
        Ok(plans)
    }
}

fn find_external<C>(plan: &ViewPlan<C>) -> Option<&str> {
    match plan {
        ViewPlan::ExternalRoot { schema_id, .. } => Some(schema_id),
        ViewPlan::Wrapped { inner, .. } | ViewPlan::UnionSelector { inner, .. } => find_external(inner),
        ViewPlan::Component { .. } => None,
    }
}
