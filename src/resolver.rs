//! Schema resolution: turns a schema node into the concrete candidates an
//! editor can render.
//!
//! `$ref` chains are followed through the [`SchemaClient`], `oneOf`
//! alternatives are resolved concurrently and flattened, and array-valued
//! `type` unions are split per type. Every candidate remembers the pointer it
//! came from and whether it lives outside the root document.

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ResolveError;
use crate::loader::{resolve_pointer, split_ref};
use crate::schema_client::SchemaClient;
use crate::types::ResolveOptions;
use crate::validator::SchemaValidator;

/// Keywords a literal alternative may carry besides `enum`/`const`.
const LITERAL_ANNOTATIONS: &[&str] = &["type", "title", "description", "default", "examples", "$comment"];

/// One concrete schema a node may follow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCandidate {
    pub schema: Value,
    /// Where the schema came from, as `"<documentId>#<path>"` once a `$ref`
    /// has been followed, otherwise the caller's pointer extended by keyword.
    pub schema_pointer: String,
    pub is_external: bool,
}

impl SchemaCandidate {
    /// Document the candidate lives in, for external candidates.
    pub fn document_id(&self) -> Option<&str> {
        if !self.is_external {
            return None;
        }
        let (id, _) = split_ref(&self.schema_pointer);
        (!id.is_empty()).then_some(id)
    }
}

/// Result of resolving one schema node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub schemas: Vec<SchemaCandidate>,
}

impl Resolution {
    /// Pick the candidate to render.
    ///
    /// An explicit selection (by pointer) wins. Otherwise, with more than one
    /// candidate, the first one that validates `data` is chosen; the first
    /// candidate is the fallback.
    pub fn select(
        &self,
        data: Option<&Value>,
        validator: &SchemaValidator,
        selected: Option<&str>,
    ) -> Option<&SchemaCandidate> {
        if let Some(pointer) = selected {
            if let Some(candidate) = self.schemas.iter().find(|c| c.schema_pointer == pointer) {
                return Some(candidate);
            }
        }
        if self.schemas.len() > 1 {
            if let Some(data) = data {
                if let Some(candidate) = self.schemas.iter().find(|c| validator.is_valid(&c.schema, data)) {
                    return Some(candidate);
                }
            }
        }
        self.schemas.first()
    }

    pub fn is_union(&self) -> bool {
        self.schemas.len() > 1
    }
}

/// Resolve `schema`, found at `schema_pointer`, into its candidates.
///
/// A pointer of the form `"<documentId>#<path>"` makes `documentId` the
/// current document; otherwise the current document is `options.root_id`.
///
/// # Errors
///
/// Fails when a referenced document cannot be loaded or does not exist, when
/// a reference path does not resolve, and on reference cycles.
pub async fn resolve_schema(
    client: &SchemaClient,
    options: &ResolveOptions,
    schema: &Value,
    schema_pointer: &str,
) -> Result<Resolution, ResolveError> {
    let current = match split_ref(schema_pointer) {
        (id, _) if schema_pointer.contains('#') && !id.is_empty() => id.to_string(),
        _ => options.root_id.clone(),
    };
    let ctx = Context { client, options };
    let schemas = ctx
        .resolve(schema.clone(), schema_pointer.to_string(), current, Vec::new())
        .await?;
    debug!(pointer = schema_pointer, candidates = schemas.len(), "resolved schema");
    Ok(Resolution { schemas })
}

struct Context<'a> {
    client: &'a SchemaClient,
    options: &'a ResolveOptions,
}

impl<'a> Context<'a> {
    fn resolve(
        &'a self,
        schema: Value,
        pointer: String,
        document: String,
        chain: Vec<String>,
    ) -> BoxFuture<'a, Result<Vec<SchemaCandidate>, ResolveError>> {
        async move {
            if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
                return self.follow_ref(reference, &document, chain).await;
            }

            if let Some(Value::Array(alternatives)) = schema.get("oneOf") {
                let resolving = alternatives.iter().enumerate().map(|(i, alternative)| {
                    self.resolve(
                        alternative.clone(),
                        format!("{}/oneOf/{}", pointer, i),
                        document.clone(),
                        chain.clone(),
                    )
                });
                let resolved: Vec<SchemaCandidate> = try_join_all(resolving).await?.into_iter().flatten().collect();
                if !self.options.merge_literals {
                    return Ok(resolved);
                }
                return Ok(merge_literals(resolved, &pointer, self.is_external(&document)));
            }

            if let Some(Value::Array(types)) = schema.get("type") {
                let is_external = self.is_external(&document);
                return Ok(types
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| {
                        let mut single = schema.clone();
                        if let Value::Object(map) = &mut single {
                            map.insert("type".to_string(), ty.clone());
                        }
                        SchemaCandidate {
                            schema: single,
                            schema_pointer: format!("{}/{}", pointer, i),
                            is_external,
                        }
                    })
                    .collect());
            }

            let is_external = self.is_external(&document);
            Ok(vec![SchemaCandidate {
                schema,
                schema_pointer: pointer,
                is_external,
            }])
        }
        .boxed()
    }

    async fn follow_ref(
        &'a self,
        reference: &str,
        document: &str,
        mut chain: Vec<String>,
    ) -> Result<Vec<SchemaCandidate>, ResolveError> {
        let (ref_document, path) = split_ref(reference);
        let target_document = if ref_document.is_empty() {
            document.to_string()
        } else {
            ref_document.to_string()
        };
        let full = format!("{}#{}", target_document, path);

        if chain.contains(&full) || chain.len() >= self.options.max_ref_depth {
            return Err(ResolveError::CircularReference { reference: full });
        }

        let loaded = match self.client.get_root_schema(&target_document) {
            Some(loaded) => loaded,
            None => self
                .client
                .load_schema(&target_document)
                .await?
                .ok_or_else(|| ResolveError::DocumentNotFound {
                    id: target_document.clone(),
                })?,
        };
        let target = resolve_pointer(&loaded, path)
            .map_err(|source| ResolveError::Pointer {
                reference: full.clone(),
                source,
            })?
            .clone();
        debug!(reference = %full, "followed $ref");

        chain.push(full.clone());
        self.resolve(target, full, target_document, chain).await
    }

    fn is_external(&self, document: &str) -> bool {
        document != self.options.root_id
    }
}

/// Values a pure `enum`/`const` schema allows, or `None` for any other schema.
fn literal_values(schema: &Value) -> Option<Vec<Value>> {
    let map = schema.as_object()?;
    let values = match (map.get("enum"), map.get("const")) {
        (Some(Value::Array(values)), None) => values.clone(),
        (None, Some(value)) => vec![value.clone()],
        _ => return None,
    };
    let pure = map
        .keys()
        .all(|k| k == "enum" || k == "const" || LITERAL_ANNOTATIONS.contains(&k.as_str()));
    pure.then_some(values)
}

/// Collapse literal candidates into one enum candidate placed where the first
/// literal appeared.
fn merge_literals(candidates: Vec<SchemaCandidate>, owner_pointer: &str, is_external: bool) -> Vec<SchemaCandidate> {
    let literal_count = candidates.iter().filter(|c| literal_values(&c.schema).is_some()).count();
    if literal_count == 0 {
        return candidates;
    }

    let mut values: Vec<Value> = Vec::new();
    let mut slot = None;
    let mut out = Vec::with_capacity(candidates.len() - literal_count + 1);
    for candidate in candidates {
        match literal_values(&candidate.schema) {
            Some(literals) => {
                for value in literals {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                if slot.is_none() {
                    slot = Some(out.len());
                    out.push(candidate);
                }
            }
            None => out.push(candidate),
        }
    }

    if let Some(index) = slot {
        let mut merged = Map::new();
        merged.insert("enum".to_string(), Value::Array(values));
        out[index] = SchemaCandidate {
            schema: Value::Object(merged),
            schema_pointer: owner_pointer.to_string(),
            is_external,
        };
    }
    out
}
