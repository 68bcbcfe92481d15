//! The Noco document tree.
//!
//! A [`NocoDoc`] owns every node in an arena; [`NodeKey`] is a handle into it.
//! Ownership is strictly top-down from the root. Parent pointers are a derived
//! index maintained by every attach and detach, and a detached subtree is
//! released from the arena.
//!
//! A node's tag is either a literal [`TagKind`] or another node (a "tag node")
//! whose own literal kind is `component`, `element` or `text` and whose value is
//! the component id, element name or text.
//!
//! # Stored form
//!
//! ```json
//! {
//!   "id": "page",
//!   "__noco__type__": { "id": "t1", "__noco__type__": "#component", "value": "pageTemplates/default" },
//!   "props": {
//!     "title": { "id": "title", "__noco__type__": "#string", "value": "Home" }
//!   }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::DocumentError;
use crate::ids::{IdGenerator, RandomIds};
use crate::types::{json_type_name, NOCO_TYPE_KEY, PROPS_KEY};

/// Component a fresh document starts with.
pub const DEFAULT_PAGE_COMPONENT: &str = "noco/default-page";

/// Closed vocabulary of literal tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Component,
    Element,
    Text,
    Array,
    String,
    Boolean,
    Number,
    Object,
    Null,
    Undefined,
}

impl TagKind {
    /// Stored spelling (`#component`, `#string`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Component => "#component",
            TagKind::Element => "#element",
            TagKind::Text => "#text",
            TagKind::Array => "#array",
            TagKind::String => "#string",
            TagKind::Boolean => "#boolean",
            TagKind::Number => "#number",
            TagKind::Object => "#object",
            TagKind::Null => "#null",
            TagKind::Undefined => "#undefined",
        }
    }

    /// Parse a stored tag; only the `#`-prefixed spelling is accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s.strip_prefix('#')? {
            "component" => Some(TagKind::Component),
            "element" => Some(TagKind::Element),
            "text" => Some(TagKind::Text),
            "array" => Some(TagKind::Array),
            "string" => Some(TagKind::String),
            "boolean" => Some(TagKind::Boolean),
            "number" => Some(TagKind::Number),
            "object" => Some(TagKind::Object),
            "null" => Some(TagKind::Null),
            "undefined" => Some(TagKind::Undefined),
            _ => None,
        }
    }

    /// True for tags that describe something to render rather than a boxed value.
    pub fn is_render_kind(&self) -> bool {
        matches!(self, TagKind::Component | TagKind::Element | TagKind::Text)
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a node slot inside one [`NocoDoc`].
///
/// Slots are reused after a node is released; the generation tells a stale
/// handle from the slot's current occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    index: usize,
    generation: u32,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}.{}", self.index, self.generation)
    }
}

/// A node's type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Literal(TagKind),
    Dynamic(NodeKey),
}

/// Recursively typed node value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodeValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Node(NodeKey),
    Array(Vec<NodeValue>),
    Object(IndexMap<String, NodeValue>),
}

impl NodeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, NodeValue::Undefined)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NodeValue::Undefined => "undefined",
            NodeValue::Null => "null",
            NodeValue::Bool(_) => "boolean",
            NodeValue::Number(_) => "number",
            NodeValue::String(_) => "string",
            NodeValue::Node(_) => "node",
            NodeValue::Array(_) => "array",
            NodeValue::Object(_) => "object",
        }
    }

    /// Nodes held directly by this value, in order. Does not descend into nodes.
    pub fn child_keys(&self) -> Vec<NodeKey> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys(&self, out: &mut Vec<NodeKey>) {
        match self {
            NodeValue::Node(key) => out.push(*key),
            NodeValue::Array(items) => items.iter().for_each(|item| item.collect_keys(out)),
            NodeValue::Object(map) => map.values().for_each(|item| item.collect_keys(out)),
            _ => {}
        }
    }
}

impl From<&str> for NodeValue {
    fn from(s: &str) -> Self {
        NodeValue::String(s.to_string())
    }
}

impl From<String> for NodeValue {
    fn from(s: String) -> Self {
        NodeValue::String(s)
    }
}

impl From<bool> for NodeValue {
    fn from(b: bool) -> Self {
        NodeValue::Bool(b)
    }
}

impl From<i64> for NodeValue {
    fn from(n: i64) -> Self {
        NodeValue::Number(n.into())
    }
}

impl From<NodeKey> for NodeValue {
    fn from(key: NodeKey) -> Self {
        NodeValue::Node(key)
    }
}

impl From<Vec<NodeValue>> for NodeValue {
    fn from(items: Vec<NodeValue>) -> Self {
        NodeValue::Array(items)
    }
}

/// Render tree produced by [`NodeRef::to_renderable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Renderable<C> {
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Renderable<C>>),
    Object(IndexMap<String, Renderable<C>>),
    Element(RenderElement<C>),
}

/// An invocable render node: a component or a plain element.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderElement<C> {
    pub key: String,
    pub target: RenderTarget<C>,
    pub props: IndexMap<String, Renderable<C>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderTarget<C> {
    /// Literal render-target name such as `div`.
    Element(String),
    /// Whatever the caller's resolver returned for the component id.
    Component(C),
}

/// Which attributes a walk descends into.
#[derive(Debug, Clone, Default)]
pub enum AttrFilter {
    #[default]
    All,
    None,
    /// Only attributes whose name matches.
    Matching(Regex),
}

impl AttrFilter {
    fn includes(&self, name: &str) -> bool {
        match self {
            AttrFilter::All => true,
            AttrFilter::None => false,
            AttrFilter::Matching(re) => re.is_match(name),
        }
    }
}

/// Options for [`NocoDoc::walk`].
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub attr: AttrFilter,
    pub value: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            attr: AttrFilter::All,
            value: true,
        }
    }
}

impl WalkOptions {
    pub fn attributes(mut self, attr: AttrFilter) -> Self {
        self.attr = attr;
        self
    }

    pub fn values(mut self, value: bool) -> Self {
        self.value = value;
        self
    }
}

/// What a mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetValue,
    SetAttribute { name: String },
    RemoveAttribute { name: String },
}

/// Notification delivered to document listeners after each mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeChange {
    pub node: NodeKey,
    pub node_id: String,
    pub change: Mutation,
    /// Stored form of the new value; `null` for removals.
    pub value: Value,
}

/// Handle returned by [`NocoDoc::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&NodeChange) + Send>;

#[derive(Debug, Clone)]
struct NodeData {
    id: String,
    tag: Tag,
    attributes: Option<IndexMap<String, NodeKey>>,
    value: NodeValue,
    parent: Option<NodeKey>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

/// A Noco document: the arena, its root and the change signal.
pub struct NocoDoc {
    nodes: Vec<Slot>,
    free: Vec<usize>,
    ids: HashMap<String, NodeKey>,
    root: NodeKey,
    id_gen: Arc<dyn IdGenerator>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl fmt::Debug for NocoDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NocoDoc")
            .field("root", &self.root)
            .field("nodes", &self.ids.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for NocoDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl NocoDoc {
    /// Empty document rooted at [`DEFAULT_PAGE_COMPONENT`], using random ids.
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(RandomIds))
    }

    pub fn with_id_generator(id_gen: Arc<dyn IdGenerator>) -> Self {
        let mut doc = Self::empty(id_gen);
        doc.root = doc.create_component(DEFAULT_PAGE_COMPONENT);
        doc
    }

    fn empty(id_gen: Arc<dyn IdGenerator>) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            ids: HashMap::new(),
            root: NodeKey { index: 0, generation: 0 },
            id_gen,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Parse a stored document.
    ///
    /// # Errors
    ///
    /// Fails on malformed nodes, unknown tags, duplicate ids, or when the
    /// top-level node is not a component.
    pub fn from_json(stored: &Value) -> Result<Self, DocumentError> {
        Self::from_json_with(stored, Arc::new(RandomIds))
    }

    /// Parse a stored document, generating missing ids with `id_gen`.
    pub fn from_json_with(
        stored: &Value,
        id_gen: Arc<dyn IdGenerator>,
    ) -> Result<Self, DocumentError> {
        if !stored.is_object() {
            return Err(DocumentError::NotAnObject {
                path: String::new(),
                actual: json_type_name(stored).to_string(),
            });
        }
        let mut doc = Self::empty(id_gen);
        let root = doc.parse_node(stored, "")?;
        let tag = doc.get_tag(root)?;
        if tag != TagKind::Component {
            return Err(DocumentError::RootNotComponent {
                tag: tag.to_string(),
            });
        }
        doc.root = root;
        debug!(nodes = doc.ids.len(), "parsed noco document");
        Ok(doc)
    }

    /// Stored form of the whole document.
    pub fn to_json(&self) -> Result<Value, DocumentError> {
        self.node(self.root)?.to_json()
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Replace the root with an unattached component node.
    pub fn set_root(&mut self, key: NodeKey) -> Result<(), DocumentError> {
        let data = self.data(key)?;
        if let Some(parent) = data.parent {
            return Err(DocumentError::AlreadyAttached {
                id: data.id.clone(),
                parent: self.describe(parent),
            });
        }
        let tag = self.get_tag(key)?;
        if tag != TagKind::Component {
            return Err(DocumentError::RootNotComponent {
                tag: tag.to_string(),
            });
        }
        let old = std::mem::replace(&mut self.root, key);
        if old != key {
            self.release(old);
        }
        Ok(())
    }

    /// Read-only view of a node.
    pub fn node(&self, key: NodeKey) -> Result<NodeRef<'_>, DocumentError> {
        let data = self.data(key)?;
        Ok(NodeRef {
            doc: self,
            key,
            data,
        })
    }

    pub fn node_by_id(&self, id: &str) -> Option<NodeRef<'_>> {
        self.ids.get(id).and_then(|key| self.node(*key).ok())
    }

    /// Number of live nodes, tag nodes and unattached nodes included.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    // --- Construction helpers ---

    pub fn create_component(&mut self, component_id: &str) -> NodeKey {
        self.create_render_node(TagKind::Component, NodeValue::from(component_id))
    }

    pub fn create_element(&mut self, tag_name: &str) -> NodeKey {
        self.create_render_node(TagKind::Element, NodeValue::from(tag_name))
    }

    /// Text node. The text may be a string or a node.
    ///
    /// # Errors
    ///
    /// Fails when the text is a node that is already attached or released.
    pub fn create_text(&mut self, text: impl Into<NodeValue>) -> Result<NodeKey, DocumentError> {
        let text = text.into();
        let tag_node = self.fresh(Tag::Literal(TagKind::Text), None, NodeValue::Undefined);
        if let Err(err) = self.assign_value(tag_node, text) {
            self.release(tag_node);
            return Err(err);
        }
        let key = self.fresh(Tag::Dynamic(tag_node), Some(IndexMap::new()), NodeValue::Undefined);
        self.set_parent(tag_node, Some(key));
        Ok(key)
    }

    /// Box a raw JSON value into value nodes.
    pub fn create_value(&mut self, raw: &Value) -> NodeKey {
        let (kind, value) = match raw {
            Value::Null => (TagKind::Null, NodeValue::Null),
            Value::Bool(b) => (TagKind::Boolean, NodeValue::Bool(*b)),
            Value::Number(n) => (TagKind::Number, NodeValue::Number(n.clone())),
            Value::String(s) => (TagKind::String, NodeValue::String(s.clone())),
            Value::Array(items) => {
                let children = items
                    .iter()
                    .map(|item| NodeValue::Node(self.create_value(item)))
                    .collect();
                (TagKind::Array, NodeValue::Array(children))
            }
            Value::Object(map) => {
                let children = map
                    .iter()
                    .map(|(k, v)| (k.clone(), NodeValue::Node(self.create_value(v))))
                    .collect();
                (TagKind::Object, NodeValue::Object(children))
            }
        };
        let key = self.fresh(Tag::Literal(kind), None, value);
        self.adopt_value_children(key);
        key
    }

    /// Value node with the `undefined` tag.
    pub fn create_undefined(&mut self) -> NodeKey {
        self.fresh(Tag::Literal(TagKind::Undefined), None, NodeValue::Undefined)
    }

    fn create_render_node(&mut self, kind: TagKind, value: NodeValue) -> NodeKey {
        let tag_node = self.fresh(Tag::Literal(kind), None, value);
        let key = self.fresh(Tag::Dynamic(tag_node), Some(IndexMap::new()), NodeValue::Undefined);
        self.set_parent(tag_node, Some(key));
        key
    }

    // --- Tag queries ---

    /// Literal kind of a node's tag, following dynamic tags.
    pub fn get_tag(&self, key: NodeKey) -> Result<TagKind, DocumentError> {
        match self.data(key)?.tag {
            Tag::Literal(kind) => Ok(kind),
            Tag::Dynamic(tag_node) => self.get_tag(tag_node),
        }
    }

    pub fn is_component(&self, key: NodeKey) -> bool {
        matches!(self.get_tag(key), Ok(TagKind::Component))
    }

    /// The value a render tag carries: the tag node's value for dynamic tags,
    /// the node's own value for literal ones.
    pub fn tag_payload(&self, key: NodeKey) -> Result<&NodeValue, DocumentError> {
        let data = self.data(key)?;
        match data.tag {
            Tag::Literal(_) => Ok(&data.value),
            Tag::Dynamic(tag_node) => self.tag_payload(tag_node),
        }
    }

    pub fn component_id(&self, key: NodeKey) -> Option<&str> {
        if !self.is_component(key) {
            return None;
        }
        self.tag_payload(key).ok().and_then(NodeValue::as_str)
    }

    /// Keys of `key`'s ancestors, nearest first.
    pub fn ancestors(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut current = self.data(key).ok().and_then(|d| d.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.data(parent).ok().and_then(|d| d.parent);
        }
        out
    }

    // --- Traversal ---

    /// Pre-order walk: the node, then its attributes, then nodes in its value.
    pub fn walk<F>(&self, start: NodeKey, options: &WalkOptions, mut visitor: F) -> Result<(), DocumentError>
    where
        F: FnMut(NodeRef<'_>),
    {
        self.walk_inner(start, options, &mut visitor)
    }

    fn walk_inner<F>(&self, key: NodeKey, options: &WalkOptions, visitor: &mut F) -> Result<(), DocumentError>
    where
        F: FnMut(NodeRef<'_>),
    {
        let node = self.node(key)?;
        visitor(node);
        let data = self.data(key)?;
        if let Some(attrs) = &data.attributes {
            for (name, child) in attrs {
                if options.attr.includes(name) {
                    self.walk_inner(*child, options, visitor)?;
                }
            }
        }
        if options.value {
            for child in data.value.child_keys() {
                self.walk_inner(child, options, visitor)?;
            }
        }
        Ok(())
    }

    // --- Mutation API ---

    /// Register a change listener.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&NodeChange) + Send + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        before != self.listeners.len()
    }

    /// Replace a node's value. Nodes no longer referenced are released.
    pub fn set_value(&mut self, key: NodeKey, value: NodeValue) -> Result<(), DocumentError> {
        self.assign_value(key, value)?;
        let stored = {
            let node = self.node(key)?;
            node.value_to_json(node.value())?
        };
        self.notify(key, Mutation::SetValue, stored)
    }

    /// Attach `child` as attribute `name`, replacing (and releasing) any previous one.
    pub fn set_attribute(&mut self, key: NodeKey, name: &str, child: NodeKey) -> Result<(), DocumentError> {
        let previous = self
            .data(key)?
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(name).copied());
        let reattaching = previous == Some(child);
        self.check_attachable(key, child, reattaching)?;

        if let Some(node) = self.data_mut(key) {
            node.attributes
                .get_or_insert_with(IndexMap::new)
                .insert(name.to_string(), child);
        }
        self.set_parent(child, Some(key));
        if let Some(old) = previous.filter(|old| *old != child) {
            self.release(old);
        }

        let stored = self.node(child)?.to_json()?;
        self.notify(
            key,
            Mutation::SetAttribute {
                name: name.to_string(),
            },
            stored,
        )
    }

    /// Remove attribute `name`. Returns whether it existed.
    pub fn remove_attribute(&mut self, key: NodeKey, name: &str) -> Result<bool, DocumentError> {
        self.data(key)?;
        let removed = self
            .data_mut(key)
            .and_then(|node| node.attributes.as_mut())
            .and_then(|attrs| attrs.shift_remove(name));
        let Some(old) = removed else {
            return Ok(false);
        };
        self.release(old);
        self.notify(
            key,
            Mutation::RemoveAttribute {
                name: name.to_string(),
            },
            Value::Null,
        )?;
        Ok(true)
    }

    fn notify(&mut self, key: NodeKey, change: Mutation, value: Value) -> Result<(), DocumentError> {
        let event = NodeChange {
            node: key,
            node_id: self.data(key)?.id.clone(),
            change,
            value,
        };
        debug!(node = %event.node_id, change = ?event.change, "noco document mutation");
        let mut listeners = std::mem::take(&mut self.listeners);
        for (_, listener) in listeners.iter_mut() {
            listener(&event);
        }
        // Listeners subscribed during dispatch are kept after the existing ones.
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
        Ok(())
    }

    /// Set a value without notifying; shared by `set_value` and the helpers.
    fn assign_value(&mut self, key: NodeKey, value: NodeValue) -> Result<(), DocumentError> {
        let old_children: HashSet<NodeKey> = self.data(key)?.value.child_keys().into_iter().collect();
        let new_children = value.child_keys();
        let mut seen = HashSet::new();
        for child in &new_children {
            if !seen.insert(*child) {
                return Err(DocumentError::AlreadyAttached {
                    id: self.describe(*child),
                    parent: self.describe(key),
                });
            }
            self.check_attachable(key, *child, old_children.contains(child))?;
        }

        if let Some(node) = self.data_mut(key) {
            node.value = value;
        }
        for child in &new_children {
            self.set_parent(*child, Some(key));
        }
        for old in old_children.into_iter().filter(|c| !seen.contains(c)) {
            self.release(old);
        }
        Ok(())
    }

    fn check_attachable(&self, parent: NodeKey, child: NodeKey, reattaching: bool) -> Result<(), DocumentError> {
        let data = self.data(child)?;
        if child == self.root || child == parent || self.ancestors(parent).contains(&child) {
            return Err(DocumentError::Cycle {
                child: data.id.clone(),
                parent: self.describe(parent),
            });
        }
        match data.parent {
            Some(existing) if !(reattaching && existing == parent) => Err(DocumentError::AlreadyAttached {
                id: data.id.clone(),
                parent: self.describe(existing),
            }),
            _ => Ok(()),
        }
    }

    // --- Arena internals ---

    fn data(&self, key: NodeKey) -> Result<&NodeData, DocumentError> {
        self.nodes
            .get(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.data.as_ref())
            .ok_or_else(|| DocumentError::UnknownNode { key: key.to_string() })
    }

    fn data_mut(&mut self, key: NodeKey) -> Option<&mut NodeData> {
        self.nodes
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.data.as_mut())
    }

    fn describe(&self, key: NodeKey) -> String {
        self.data(key)
            .map(|d| d.id.clone())
            .unwrap_or_else(|_| key.to_string())
    }

    fn set_parent(&mut self, key: NodeKey, parent: Option<NodeKey>) {
        if let Some(node) = self.data_mut(key) {
            node.parent = parent;
        }
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = self.id_gen.next_id();
            if !self.ids.contains_key(&id) {
                return id;
            }
        }
    }

    /// Allocate a node with a generated id and no children.
    fn fresh(&mut self, tag: Tag, attributes: Option<IndexMap<String, NodeKey>>, value: NodeValue) -> NodeKey {
        let id = self.fresh_id();
        self.push(id, tag, attributes, value)
    }

    fn push(&mut self, id: String, tag: Tag, attributes: Option<IndexMap<String, NodeKey>>, value: NodeValue) -> NodeKey {
        let data = NodeData {
            id: id.clone(),
            tag,
            attributes,
            value,
            parent: None,
        };
        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.nodes[index];
                slot.data = Some(data);
                NodeKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.nodes.push(Slot {
                    generation: 0,
                    data: Some(data),
                });
                NodeKey {
                    index: self.nodes.len() - 1,
                    generation: 0,
                }
            }
        };
        self.ids.insert(id, key);
        key
    }

    fn adopt_value_children(&mut self, key: NodeKey) {
        let children = self.data(key).map(|d| d.value.child_keys()).unwrap_or_default();
        for child in children {
            self.set_parent(child, Some(key));
        }
    }

    /// Drop a subtree (tag nodes included) from the arena.
    fn release(&mut self, key: NodeKey) {
        let Some(slot) = self.nodes.get_mut(key.index).filter(|slot| slot.generation == key.generation) else {
            return;
        };
        let Some(data) = slot.data.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.ids.remove(&data.id);
        if let Tag::Dynamic(tag_node) = data.tag {
            self.release(tag_node);
        }
        if let Some(attrs) = data.attributes {
            for child in attrs.into_values() {
                self.release(child);
            }
        }
        for child in data.value.child_keys() {
            self.release(child);
        }
    }

    // --- Parsing ---

    fn parse_node(&mut self, stored: &Value, path: &str) -> Result<NodeKey, DocumentError> {
        let Value::Object(map) = stored else {
            return Err(DocumentError::NotAnObject {
                path: path.to_string(),
                actual: json_type_name(stored).to_string(),
            });
        };
        let id = parse_id(map, path)?;
        let tag_value = map.get(NOCO_TYPE_KEY).ok_or_else(|| DocumentError::MissingTag {
            path: path.to_string(),
        })?;
        let tag_path = format!("{}/{}", path, NOCO_TYPE_KEY);
        let tag = match tag_value {
            Value::String(s) => Tag::Literal(parse_kind(s, &tag_path)?),
            Value::Object(descriptor) => Tag::Dynamic(self.parse_descriptor(descriptor, &tag_path)?),
            other => {
                return Err(DocumentError::InvalidTagDescriptor {
                    path: tag_path,
                    message: format!("expected string or object, got {}", json_type_name(other)),
                })
            }
        };

        let attributes = match map.get(PROPS_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Object(props)) => {
                let mut attrs = IndexMap::with_capacity(props.len());
                for (name, child) in props {
                    let child_path = format!("{}/{}/{}", path, PROPS_KEY, name);
                    attrs.insert(name.clone(), self.parse_node(child, &child_path)?);
                }
                Some(attrs)
            }
            Some(other) => {
                return Err(DocumentError::InvalidField {
                    path: path.to_string(),
                    field: "props",
                    actual: json_type_name(other).to_string(),
                })
            }
        };

        let value = match map.get("value") {
            None => NodeValue::Undefined,
            Some(v) => self.parse_value(v, &format!("{}/value", path))?,
        };

        let key = self.alloc(id, tag, attributes, value)?;
        if let Tag::Dynamic(tag_node) = tag {
            self.set_parent(tag_node, Some(key));
        }
        Ok(key)
    }

    fn parse_descriptor(&mut self, descriptor: &Map<String, Value>, path: &str) -> Result<NodeKey, DocumentError> {
        let id = parse_id(descriptor, path)?;
        let kind = match descriptor.get(NOCO_TYPE_KEY) {
            Some(Value::String(s)) => parse_kind(s, path)?,
            Some(other) => {
                return Err(DocumentError::InvalidTagDescriptor {
                    path: path.to_string(),
                    message: format!("nested tag must be a string, got {}", json_type_name(other)),
                })
            }
            None => {
                return Err(DocumentError::InvalidTagDescriptor {
                    path: path.to_string(),
                    message: "missing __noco__type__".to_string(),
                })
            }
        };
        let value = match descriptor.get("value") {
            None => NodeValue::Undefined,
            Some(v) => self.parse_value(v, &format!("{}/value", path))?,
        };
        self.alloc(id, Tag::Literal(kind), None, value)
    }

    fn parse_value(&mut self, stored: &Value, path: &str) -> Result<NodeValue, DocumentError> {
        Ok(match stored {
            Value::Null => NodeValue::Null,
            Value::Bool(b) => NodeValue::Bool(*b),
            Value::Number(n) => NodeValue::Number(n.clone()),
            Value::String(s) => NodeValue::String(s.clone()),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.parse_value(item, &format!("{}/{}", path, i))?);
                }
                NodeValue::Array(out)
            }
            Value::Object(map) if map.contains_key(NOCO_TYPE_KEY) => NodeValue::Node(self.parse_node(stored, path)?),
            Value::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.parse_value(v, &format!("{}/{}", path, k))?);
                }
                NodeValue::Object(out)
            }
        })
    }

    /// Allocate a parsed node, keeping a stored id when present.
    fn alloc(
        &mut self,
        id: Option<String>,
        tag: Tag,
        attributes: Option<IndexMap<String, NodeKey>>,
        value: NodeValue,
    ) -> Result<NodeKey, DocumentError> {
        let id = match id {
            Some(id) if self.ids.contains_key(&id) => return Err(DocumentError::DuplicateId { id }),
            Some(id) => id,
            None => self.fresh_id(),
        };
        let attr_children: Vec<NodeKey> = attributes
            .as_ref()
            .map(|attrs| attrs.values().copied().collect())
            .unwrap_or_default();
        let key = self.push(id, tag, attributes, value);
        for child in attr_children {
            self.set_parent(child, Some(key));
        }
        self.adopt_value_children(key);
        Ok(key)
    }
}

impl std::str::FromStr for NocoDoc {
    type Err = DocumentError;

    /// Parse a stored document from a JSON string.
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let stored: Value =
            serde_json::from_str(content).map_err(|source| DocumentError::InvalidJson { source })?;
        Self::from_json(&stored)
    }
}

fn parse_id(map: &Map<String, Value>, path: &str) -> Result<Option<String>, DocumentError> {
    match map.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DocumentError::InvalidField {
            path: path.to_string(),
            field: "id",
            actual: json_type_name(other).to_string(),
        }),
    }
}

fn parse_kind(s: &str, path: &str) -> Result<TagKind, DocumentError> {
    TagKind::parse(s).ok_or_else(|| DocumentError::UnknownTag {
        path: path.to_string(),
        tag: s.to_string(),
    })
}

/// Borrowed view of one node.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a NocoDoc,
    key: NodeKey,
    data: &'a NodeData,
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("key", &self.key)
            .field("id", &self.data.id)
            .field("tag", &self.data.tag)
            .finish()
    }
}

impl<'a> NodeRef<'a> {
    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn id(&self) -> &'a str {
        &self.data.id
    }

    pub fn tag(&self) -> Tag {
        self.data.tag
    }

    pub fn get_tag(&self) -> Result<TagKind, DocumentError> {
        self.doc.get_tag(self.key)
    }

    pub fn is_component(&self) -> bool {
        self.doc.is_component(self.key)
    }

    pub fn component_id(&self) -> Option<&'a str> {
        self.doc.component_id(self.key)
    }

    pub fn value(&self) -> &'a NodeValue {
        &self.data.value
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.data.parent.and_then(|p| self.doc.node(p).ok())
    }

    pub fn attribute(&self, name: &str) -> Option<NodeRef<'a>> {
        self.data
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(name))
            .and_then(|key| self.doc.node(*key).ok())
    }

    /// Attribute names in insertion order.
    pub fn attribute_names(&self) -> Vec<&'a str> {
        self.data
            .attributes
            .as_ref()
            .map(|attrs| attrs.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_attributes(&self) -> bool {
        self.data.attributes.is_some()
    }

    /// Stored form of this node and its subtree.
    pub fn to_json(&self) -> Result<Value, DocumentError> {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.data.id.clone()));
        let tag = match self.data.tag {
            Tag::Literal(kind) => Value::String(kind.as_str().to_string()),
            Tag::Dynamic(tag_node) => self.doc.node(tag_node)?.descriptor_to_json()?,
        };
        out.insert(NOCO_TYPE_KEY.to_string(), tag);
        if !self.data.value.is_undefined() {
            out.insert("value".to_string(), self.value_to_json(&self.data.value)?);
        }
        if let Some(attrs) = &self.data.attributes {
            let mut props = Map::new();
            for (name, child) in attrs {
                props.insert(name.clone(), self.doc.node(*child)?.to_json()?);
            }
            out.insert(PROPS_KEY.to_string(), Value::Object(props));
        }
        Ok(Value::Object(out))
    }

    fn descriptor_to_json(&self) -> Result<Value, DocumentError> {
        let Tag::Literal(kind) = self.data.tag else {
            return Err(DocumentError::InvalidTagDescriptor {
                path: self.data.id.clone(),
                message: "tag node must carry a literal tag".to_string(),
            });
        };
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.data.id.clone()));
        out.insert(NOCO_TYPE_KEY.to_string(), Value::String(kind.as_str().to_string()));
        if !self.data.value.is_undefined() {
            out.insert("value".to_string(), self.value_to_json(&self.data.value)?);
        }
        Ok(Value::Object(out))
    }

    fn value_to_json(&self, value: &NodeValue) -> Result<Value, DocumentError> {
        Ok(match value {
            NodeValue::Undefined | NodeValue::Null => Value::Null,
            NodeValue::Bool(b) => Value::Bool(*b),
            NodeValue::Number(n) => Value::Number(n.clone()),
            NodeValue::String(s) => Value::String(s.clone()),
            NodeValue::Node(key) => self.doc.node(*key)?.to_json()?,
            NodeValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.value_to_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            NodeValue::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.value_to_json(v)?);
                }
                Value::Object(out)
            }
        })
    }

    /// Project the subtree into a render tree.
    ///
    /// `get_component` maps a component id to whatever the UI runtime invokes.
    pub fn to_renderable<C, F>(&self, get_component: &mut F) -> Result<Renderable<C>, DocumentError>
    where
        F: FnMut(&str) -> C,
    {
        let kind = self.get_tag()?;
        if !kind.is_render_kind() {
            if let Tag::Dynamic(_) = self.data.tag {
                return Err(DocumentError::UnrenderableTag {
                    id: self.data.id.clone(),
                    tag: kind.to_string(),
                });
            }
            return self.renderable_value(&self.data.value, get_component);
        }

        let payload = self.doc.tag_payload(self.key)?;
        let Some(name) = payload.as_str() else {
            return Err(DocumentError::InvalidTagValue {
                id: self.data.id.clone(),
                tag: kind.as_str(),
                actual: payload.type_name().to_string(),
            });
        };
        let target = match kind {
            TagKind::Text => return Ok(Renderable::String(name.to_string())),
            TagKind::Element => RenderTarget::Element(name.to_string()),
            _ => RenderTarget::Component(get_component(name)),
        };

        let mut props = IndexMap::new();
        if let Some(attrs) = &self.data.attributes {
            for (name, child) in attrs {
                props.insert(name.clone(), self.doc.node(*child)?.to_renderable(get_component)?);
            }
        }
        Ok(Renderable::Element(RenderElement {
            key: self.data.id.clone(),
            target,
            props,
        }))
    }

    fn renderable_value<C, F>(&self, value: &NodeValue, get_component: &mut F) -> Result<Renderable<C>, DocumentError>
    where
        F: FnMut(&str) -> C,
    {
        Ok(match value {
            NodeValue::Undefined => Renderable::Undefined,
            NodeValue::Null => Renderable::Null,
            NodeValue::Bool(b) => Renderable::Bool(*b),
            NodeValue::Number(n) => Renderable::Number(n.clone()),
            NodeValue::String(s) => Renderable::String(s.clone()),
            NodeValue::Node(key) => self.doc.node(*key)?.to_renderable(get_component)?,
            NodeValue::Array(items) => Renderable::Array(
                items
                    .iter()
                    .map(|item| self.renderable_value(item, get_component))
                    .collect::<Result<_, _>>()?,
            ),
            NodeValue::Object(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.renderable_value(v, get_component)?);
                }
                Renderable::Object(out)
            }
        })
    }
}
