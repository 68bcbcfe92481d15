//! Predicate-ranked repository of editor components.
//!
//! Records are matched against [`AutoViewProps`] in registration order and the
//! consumer takes the last match, so later registrations override earlier
//! ones. Wrappers decorate the chosen component; union selectors let the user
//! pick among several schema candidates.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::auto_view::AutoViewProps;
use crate::error::MatchError;
use crate::resolver::SchemaCandidate;

pub type Predicate = Arc<dyn Fn(&AutoViewProps) -> bool + Send + Sync>;

pub type UnionPredicate = Arc<dyn Fn(&AutoViewProps, &[SchemaCandidate]) -> bool + Send + Sync>;

/// Maps a schema to the node type predicates compare against.
pub type GetNodeType = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct ComponentRecord<C> {
    pub name: String,
    pub predicate: Predicate,
    pub component: C,
}

impl<C> ComponentRecord<C> {
    pub fn new<P>(name: impl Into<String>, predicate: P, component: C) -> Self
    where
        P: Fn(&AutoViewProps) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            component,
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for ComponentRecord<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRecord")
            .field("name", &self.name)
            .field("component", &self.component)
            .finish()
    }
}

#[derive(Clone)]
pub struct WrapperRecord<C> {
    pub name: String,
    /// No predicate wraps everything.
    pub predicate: Option<Predicate>,
    pub component: C,
}

impl<C> WrapperRecord<C> {
    pub fn new(name: impl Into<String>, component: C) -> Self {
        Self {
            name: name.into(),
            predicate: None,
            component,
        }
    }

    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&AutoViewProps) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

#[derive(Clone)]
pub struct UnionSelectorRecord<C> {
    pub name: String,
    pub predicate: UnionPredicate,
    pub component: C,
}

impl<C> UnionSelectorRecord<C> {
    pub fn new<P>(name: impl Into<String>, predicate: P, component: C) -> Self
    where
        P: Fn(&AutoViewProps, &[SchemaCandidate]) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            component,
        }
    }
}

/// Named repository of component records, wrappers and union selectors.
#[derive(Clone)]
pub struct ComponentsRepo<C> {
    name: String,
    get_node_type: GetNodeType,
    records: IndexMap<String, ComponentRecord<C>>,
    wrappers: Vec<WrapperRecord<C>>,
    union_selectors: Vec<UnionSelectorRecord<C>>,
}

impl<C> fmt::Debug for ComponentsRepo<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentsRepo")
            .field("name", &self.name)
            .field("records", &self.records.keys().collect::<Vec<_>>())
            .field("wrappers", &self.wrappers.len())
            .field("union_selectors", &self.union_selectors.len())
            .finish()
    }
}

fn schema_type(schema: &Value) -> Option<String> {
    schema.get("type").and_then(Value::as_str).map(str::to_string)
}

impl<C> ComponentsRepo<C> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<C: Clone> ComponentsRepo<C> {
    /// Repository whose node type is the schema's `type` keyword.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_node_type(name, Arc::new(schema_type))
    }

    pub fn with_node_type(name: impl Into<String>, get_node_type: GetNodeType) -> Self {
        Self {
            name: name.into(),
            get_node_type,
            records: IndexMap::new(),
            wrappers: Vec::new(),
            union_selectors: Vec::new(),
        }
    }

    pub fn node_type(&self, schema: &Value) -> Option<String> {
        (self.get_node_type)(schema)
    }

    /// Add a record.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::DuplicateName` when the name is taken.
    pub fn register(&mut self, record: ComponentRecord<C>) -> Result<&mut Self, MatchError> {
        if self.records.contains_key(&record.name) {
            return Err(MatchError::DuplicateName {
                repo: self.name.clone(),
                name: record.name,
            });
        }
        self.records.insert(record.name.clone(), record);
        Ok(self)
    }

    /// Register a record matching schemas of one node type.
    pub fn register_for_type(
        &mut self,
        name: impl Into<String>,
        node_type: &str,
        component: C,
    ) -> Result<&mut Self, MatchError> {
        let get_node_type = self.get_node_type.clone();
        let node_type = node_type.to_string();
        let predicate = move |props: &AutoViewProps| get_node_type(&props.schema).as_deref() == Some(node_type.as_str());
        self.register(ComponentRecord::new(name, predicate, component))
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.records.shift_remove(name);
        self
    }

    /// Rewrite a record in place. Unknown names are ignored.
    pub fn replace<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: FnOnce(ComponentRecord<C>) -> ComponentRecord<C>,
    {
        if let Some(slot) = self.records.get_mut(name) {
            let mut record = f(slot.clone());
            record.name = name.to_string();
            *slot = record;
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ComponentRecord<C>> {
        self.records.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Every record whose predicate accepts `props`, in registration order.
    pub fn get_matched(&self, props: &AutoViewProps) -> Vec<&ComponentRecord<C>> {
        self.records.values().filter(|record| (record.predicate)(props)).collect()
    }

    /// The last matching record.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::NoComponent` when nothing matches.
    pub fn resolve(&self, props: &AutoViewProps) -> Result<&ComponentRecord<C>, MatchError> {
        self.get_matched(props)
            .pop()
            .ok_or_else(|| MatchError::NoComponent {
                pointer: props.schema_pointer.clone(),
            })
    }

    pub fn add_wrapper(&mut self, record: WrapperRecord<C>) -> &mut Self {
        self.wrappers.push(record);
        self
    }

    /// Wrappers applying to `props`, in registration order.
    pub fn get_wrappers(&self, props: &AutoViewProps) -> Vec<C> {
        self.wrappers
            .iter()
            .filter(|w| w.predicate.as_ref().map_or(true, |p| p(props)))
            .map(|w| w.component.clone())
            .collect()
    }

    pub fn add_union_selector(&mut self, record: UnionSelectorRecord<C>) -> &mut Self {
        self.union_selectors.push(record);
        self
    }

    pub fn get_union_selectors(&self, props: &AutoViewProps, candidates: &[SchemaCandidate]) -> Vec<C> {
        self.union_selectors
            .iter()
            .filter(|s| (s.predicate)(props, candidates))
            .map(|s| s.component.clone())
            .collect()
    }

    /// Independent copy under a new name.
    pub fn clone_as(&self, name: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.name = name.into();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(schema: Value) -> AutoViewProps {
        AutoViewProps::new(schema, "#")
    }

    fn repo() -> ComponentsRepo<&'static str> {
        let mut repo = ComponentsRepo::new("default");
        repo.register_for_type("string", "string", "StringInput").unwrap();
        repo.register(ComponentRecord::new("any", |_: &AutoViewProps| true, "AnyData"))
            .unwrap();
        repo.register(ComponentRecord::new(
            "enum",
            |p: &AutoViewProps| p.schema.get("enum").is_some(),
            "EnumInput",
        ))
        .unwrap();
        repo
    }

    #[test]
    fn last_match_wins() {
        let repo = repo();
        let p = props(json!({"type": "string", "enum": ["a"]}));
        let matched: Vec<_> = repo.get_matched(&p).iter().map(|r| r.name.as_str()).collect();
        assert_eq!(matched, vec!["string", "any", "enum"]);
        assert_eq!(repo.resolve(&p).unwrap().component, "EnumInput");
        assert_eq!(repo.resolve(&props(json!({"type": "number"}))).unwrap().component, "AnyData");
    }

    #[test]
    fn no_match_names_the_pointer() {
        let mut repo = ComponentsRepo::<&str>::new("empty");
        repo.register_for_type("string", "string", "StringInput").unwrap();
        let err = repo.resolve(&props(json!({"type": "number"}))).unwrap_err();
        assert_eq!(err.to_string(), "cannot resolve component for \"#\"");
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut repo = repo();
        let err = repo
            .register(ComponentRecord::new("any", |_: &AutoViewProps| true, "Other"))
            .unwrap_err();
        assert_eq!(
            err,
            MatchError::DuplicateName {
                repo: "default".into(),
                name: "any".into()
            }
        );
    }

    #[test]
    fn remove_and_replace() {
        let mut repo = repo();
        repo.remove("enum");
        assert_eq!(repo.names(), vec!["string", "any"]);
        repo.replace("any", |record| ComponentRecord {
            component: "Fallback",
            ..record
        });
        assert_eq!(repo.get("any").unwrap().component, "Fallback");
        repo.replace("missing", |record| record);
        assert_eq!(repo.names().len(), 2);
    }

    #[test]
    fn wrappers_filter_by_predicate() {
        let mut repo = repo();
        repo.add_wrapper(WrapperRecord::new("field", "FieldWrapper"));
        repo.add_wrapper(
            WrapperRecord::new("object", "ObjectWrapper").when(|p: &AutoViewProps| p.schema["type"] == "object"),
        );
        assert_eq!(repo.get_wrappers(&props(json!({"type": "string"}))), vec!["FieldWrapper"]);
        assert_eq!(
            repo.get_wrappers(&props(json!({"type": "object"}))),
            vec!["FieldWrapper", "ObjectWrapper"]
        );
    }

    #[test]
    fn union_selectors_see_candidates() {
        let mut repo = repo();
        repo.add_union_selector(UnionSelectorRecord::new(
            "tabs",
            |_: &AutoViewProps, candidates: &[SchemaCandidate]| candidates.len() > 1,
            "Tabs",
        ));
        let candidate = SchemaCandidate {
            schema: json!({}),
            schema_pointer: "#".into(),
            is_external: false,
        };
        let p = props(json!({}));
        assert!(repo.get_union_selectors(&p, &[candidate.clone()]).is_empty());
        assert_eq!(repo.get_union_selectors(&p, &[candidate.clone(), candidate]), vec!["Tabs"]);
    }

    #[test]
    fn clone_as_is_independent() {
        let mut original = repo();
        original.add_wrapper(WrapperRecord::new("field", "FieldWrapper"));
        let mut copy = original.clone_as("custom");
        copy.remove("any");

        assert_eq!(copy.name(), "custom");
        assert_eq!(copy.get_wrappers(&props(json!({}))), vec!["FieldWrapper"]);
        assert!(original.get("any").is_some());
        assert!(copy.get("any").is_none());
    }

    #[test]
    fn custom_node_type() {
        let mut repo = ComponentsRepo::<&str>::with_node_type(
            "formats",
            Arc::new(|schema: &Value| schema.get("format").and_then(Value::as_str).map(str::to_string)),
        );
        repo.register_for_type("date", "date", "DatePicker").unwrap();
        assert_eq!(repo.node_type(&json!({"format": "date"})).as_deref(), Some("date"));
        assert_eq!(
            repo.resolve(&props(json!({"type": "string", "format": "date"})))
                .unwrap()
                .component,
            "DatePicker"
        );
    }
}
