//! Integration tests for schema resolution and auto-view planning.

use std::sync::Arc;

use noco::{
    expand, resolve_schema, AutoViewContext, AutoViewProps, ComponentRecord, ComponentsRepo, MapFetcher,
    ResolveError, ResolveOptions, SchemaCandidate, SchemaClient, SequentialIds, UnionSelectorRecord, ViewPlan,
    WrapperRecord,
};
use serde_json::{json, Value};

fn client(root: Value) -> SchemaClient {
    SchemaClient::with_documents([("page", root)])
}

fn options() -> ResolveOptions {
    ResolveOptions::new("page")
}

mod references {
    use super::*;

    #[tokio::test]
    async fn local_ref_is_followed() {
        let client = client(json!({"definitions": {"Foo": {"type": "string"}}}));
        let res = resolve_schema(&client, &options(), &json!({"$ref": "#/definitions/Foo"}), "#")
            .await
            .unwrap();
        assert_eq!(res.schemas.len(), 1);
        assert_eq!(res.schemas[0].schema, json!({"type": "string"}));
        assert_eq!(res.schemas[0].schema_pointer, "page#/definitions/Foo");
        assert!(!res.schemas[0].is_external);
    }

    #[tokio::test]
    async fn ref_chains_are_followed() {
        let client = client(json!({
            "definitions": {
                "A": {"$ref": "#/definitions/B"},
                "B": {"type": "number"}
            }
        }));
        let res = resolve_schema(&client, &options(), &json!({"$ref": "#/definitions/A"}), "#")
            .await
            .unwrap();
        assert_eq!(res.schemas[0].schema, json!({"type": "number"}));
    }

    #[tokio::test]
    async fn external_documents_are_fetched_once() {
        let fetcher = MapFetcher::new().with_document("shared", json!({"$defs": {"Link": {"type": "string"}}}));
        let client = client(json!({})).with_fetcher(Arc::new(fetcher));
        let schema = json!({"oneOf": [
            {"$ref": "shared#/$defs/Link"},
            {"$ref": "shared#/$defs/Link"}
        ]});
        let res = resolve_schema(&client, &options().merge_literals(false), &schema, "#")
            .await
            .unwrap();
        assert_eq!(res.schemas.len(), 2);
        assert!(res.schemas.iter().all(|c| c.is_external));
        assert_eq!(res.schemas[0].document_id(), Some("shared"));
        assert!(client.get_root_schema("shared").is_some());
    }

    #[tokio::test]
    async fn refs_inside_external_documents_stay_there() {
        let client = SchemaClient::with_documents([
            ("page", json!({})),
            (
                "shared",
                json!({"$defs": {"Outer": {"$ref": "#/$defs/Inner"}, "Inner": {"type": "boolean"}}}),
            ),
        ]);
        let res = resolve_schema(&client, &options(), &json!({"$ref": "shared#/$defs/Outer"}), "#")
            .await
            .unwrap();
        assert_eq!(res.schemas[0].schema_pointer, "shared#/$defs/Inner");
        assert!(res.schemas[0].is_external);
    }

    #[tokio::test]
    async fn missing_document_fails() {
        let client = client(json!({}));
        let err = resolve_schema(&client, &options(), &json!({"$ref": "nowhere#/a"}), "#")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::DocumentNotFound { ref id } if id == "nowhere"));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn bad_path_fails() {
        let client = client(json!({"definitions": {"list": [1]}}));
        let err = resolve_schema(&client, &options(), &json!({"$ref": "#/definitions/list/4"}), "#")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Pointer { .. }));
    }

    #[tokio::test]
    async fn cycles_are_detected() {
        let client = client(json!({"definitions": {"A": {"$ref": "#/definitions/A"}}}));
        let err = resolve_schema(&client, &options(), &json!({"$ref": "#/definitions/A"}), "#")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::CircularReference { .. }));
    }
}

mod unions {
    use super::*;

    #[tokio::test]
    async fn literals_merge_into_one_enum() {
        let client = client(json!({}));
        let schema = json!({"oneOf": [
            {"enum": ["a", "b"]},
            {"const": "c"},
            {"type": "object", "properties": {"x": {"type": "string"}}}
        ]});
        let res = resolve_schema(&client, &options(), &schema, "#").await.unwrap();
        assert_eq!(res.schemas.len(), 2);
        assert_eq!(res.schemas[0].schema, json!({"enum": ["a", "b", "c"]}));
        assert_eq!(res.schemas[1].schema["type"], "object");
        assert_eq!(res.schemas[1].schema_pointer, "#/oneOf/2");
    }

    #[tokio::test]
    async fn consts_become_enum() {
        let client = client(json!({}));
        let schema = json!({"oneOf": [{"const": "x"}, {"const": "y"}]});
        let res = resolve_schema(&client, &options(), &schema, "#").await.unwrap();
        assert_eq!(res.schemas.len(), 1);
        assert_eq!(res.schemas[0].schema, json!({"enum": ["x", "y"]}));
        assert!(!res.is_union());
    }

    #[tokio::test]
    async fn lone_const_still_becomes_enum() {
        let client = client(json!({}));
        let schema = json!({"oneOf": [{"const": "c"}, {"type": "object"}]});
        let res = resolve_schema(&client, &options(), &schema, "#").await.unwrap();
        assert_eq!(res.schemas.len(), 2);
        assert_eq!(res.schemas[0].schema, json!({"enum": ["c"]}));
        assert_eq!(res.schemas[0].schema_pointer, "#");
        assert_eq!(res.schemas[1].schema, json!({"type": "object"}));
    }

    #[tokio::test]
    async fn merging_can_be_disabled() {
        let client = client(json!({}));
        let schema = json!({"oneOf": [{"const": "x"}, {"const": "y"}]});
        let res = resolve_schema(&client, &options().merge_literals(false), &schema, "#")
            .await
            .unwrap();
        assert_eq!(res.schemas.len(), 2);
    }

    #[tokio::test]
    async fn nested_one_of_flattens() {
        let client = client(json!({"definitions": {"Either": {"oneOf": [{"type": "string"}, {"type": "number"}]}}}));
        let schema = json!({"oneOf": [{"$ref": "#/definitions/Either"}, {"type": "boolean"}]});
        let res = resolve_schema(&client, &options(), &schema, "#").await.unwrap();
        let pointers: Vec<_> = res.schemas.iter().map(|c| c.schema_pointer.as_str()).collect();
        assert_eq!(
            pointers,
            vec!["page#/definitions/Either/oneOf/0", "page#/definitions/Either/oneOf/1", "#/oneOf/1"]
        );
    }

    #[tokio::test]
    async fn candidates_serialize_camel_case() {
        let client = client(json!({}));
        let res = resolve_schema(&client, &options(), &json!({"type": ["string", "null"]}), "#")
            .await
            .unwrap();
        let out = serde_json::to_value(&res).unwrap();
        assert_eq!(out["schemas"][1]["schemaPointer"], "#/1");
        assert_eq!(out["schemas"][1]["isExternal"], false);
    }
}

mod planning {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum View {
        Text,
        Number,
        Enum,
        Fields,
        FieldFrame,
        Picker,
    }

    fn repo() -> ComponentsRepo<View> {
        let mut repo = ComponentsRepo::new("default");
        repo.register_for_type("string", "string", View::Text).unwrap();
        repo.register_for_type("number", "number", View::Number).unwrap();
        repo.register_for_type("object", "object", View::Fields).unwrap();
        repo.register(ComponentRecord::new(
            "enum",
            |p: &AutoViewProps| p.schema.get("enum").is_some(),
            View::Enum,
        ))
        .unwrap();
        repo.add_wrapper(WrapperRecord::new("field", View::FieldFrame).when(|p: &AutoViewProps| p.field.is_some()));
        repo.add_union_selector(UnionSelectorRecord::new(
            "picker",
            |_: &AutoViewProps, candidates: &[SchemaCandidate]| candidates.len() > 1,
            View::Picker,
        ));
        repo
    }

    fn context(root: Value) -> AutoViewContext<View> {
        AutoViewContext::new(Arc::new(repo()), Arc::new(client(root)), options())
    }

    #[tokio::test]
    async fn literal_union_plans_enum_without_picker() {
        let ctx = context(json!({}));
        let props = AutoViewProps::new(json!({"oneOf": [{"const": "x"}, {"const": "y"}]}), "#");
        let plan = ctx.plan(&props, None).await.unwrap();
        assert!(matches!(plan, ViewPlan::Component { component: View::Enum, .. }));
    }

    #[tokio::test]
    async fn lone_const_branch_plans_enum() {
        let ctx = context(json!({}));
        let data = expand(&json!("c"), &SequentialIds::new("d"));
        let props = AutoViewProps::new(json!({"oneOf": [{"const": "c"}, {"type": "object"}]}), "#").with_data(data);
        let plan = ctx.plan(&props, None).await.unwrap();
        let ViewPlan::UnionSelector { selected, .. } = &plan else {
            panic!("two candidates should offer a picker");
        };
        assert_eq!(selected, "#");
        assert_eq!(*plan.component(), View::Enum);
    }

    #[tokio::test]
    async fn object_fields_get_wrapped() {
        let root = json!({
            "definitions": {
                "Hero": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "size": {"oneOf": [{"type": "number"}, {"type": "string"}]}
                    }
                }
            }
        });
        let ctx = context(root);
        let data = expand(&json!({"title": "Hi", "size": "large"}), &SequentialIds::new("d"));
        let props = AutoViewProps::new(json!({"$ref": "#/definitions/Hero"}), "#").with_data(data);

        let plan = ctx.plan(&props, None).await.unwrap();
        assert_eq!(*plan.component(), View::Fields);
        assert_eq!(plan.props().schema_pointer, "page#/definitions/Hero");

        let children = ctx.plan_children(&plan).await.unwrap();
        assert_eq!(children.len(), 2);
        let ViewPlan::Wrapped { wrapper, .. } = &children[0] else {
            panic!("fields should be wrapped");
        };
        assert_eq!(*wrapper, View::FieldFrame);
        assert_eq!(*children[0].component(), View::Text);

        // "large" only validates against the string branch
        let ViewPlan::UnionSelector { selector, selected, .. } = &children[1] else {
            panic!("size should offer a picker");
        };
        assert_eq!(*selector, View::Picker);
        assert_eq!(selected, "page#/definitions/Hero/properties/size/oneOf/1");
        assert_eq!(*children[1].component(), View::Text);
    }
}
