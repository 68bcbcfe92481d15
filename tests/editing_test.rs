//! Integration tests for the editing side: registry, field writes, pages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use noco::{
    apply_patch, auto_field_props, expand, render_page, shrink, AutoChange, AutoChangeEvent, AutoViewProps, Change,
    ChangeOp, ComponentDriver, ComponentLoader, ComponentRegistry, EditNode, EditingDataManager, ErrorViewCause,
    ExpandedValue, LoadError, LoadState, RegistryError, SequentialIds, StaticPages, NEW_TEMP_ID,
};
use serde_json::json;

fn error_views(registry: &ComponentRegistry<Arc<str>>) {
    registry.set_error_view(|cause: &ErrorViewCause| Arc::from(format!("error: {}", cause.message())));
}

mod registry {
    use super::*;

    #[tokio::test]
    async fn concurrent_loads_share_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = ComponentRegistry::new();
        registry
            .register(ComponentDriver::new("sections/hero", "sections", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, LoadError>(Arc::<str>::from("Hero"))
                }
            }))
            .unwrap();

        assert!(registry.get_component_by_id("sections/hero").is_none());
        let (a, b) = tokio::join!(
            registry.load_component_by_id("sections/hero"),
            registry.load_component_by_id("sections/hero")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.get_component_by_id("sections/hero").is_some());
    }

    #[tokio::test]
    async fn dropped_request_still_finishes_the_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry: ComponentRegistry<Arc<str>> = ComponentRegistry::new();
        registry
            .register(ComponentDriver::new("sections/hero", "sections", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, LoadError>(Arc::<str>::from("Hero"))
                }
            }))
            .unwrap();

        let gave_up = tokio::time::timeout(
            Duration::from_millis(2),
            registry.load_component_by_id("sections/hero"),
        )
        .await;
        assert!(gave_up.is_err());
        assert_eq!(registry.driver_state("sections/hero"), LoadState::Loading);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            registry.get_component_by_id("sections/hero").as_deref(),
            Some("Hero")
        );
        let hero = registry.load_component_by_id("sections/hero").await.unwrap();
        assert_eq!(&*hero, "Hero");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_cached_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry: ComponentRegistry<Arc<str>> = ComponentRegistry::new();
        error_views(&registry);
        registry
            .register(ComponentDriver::new("sections/broken", "sections", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<Arc<str>, _>(LoadError::new("network down")) }
            }))
            .unwrap();

        for _ in 0..2 {
            let err = registry.load_component_by_id("sections/broken").await.unwrap_err();
            assert!(matches!(err, RegistryError::LoadFailed { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(registry.driver_state("sections/broken"), LoadState::Failed(_)));

        let view = registry.load_component("sections", "broken").await.unwrap();
        assert_eq!(&*view, "error: Component sections/broken failed to load");
    }

    #[tokio::test]
    async fn misses_fall_back_to_error_view() {
        let registry: ComponentRegistry<Arc<str>> = ComponentRegistry::new();
        assert!(matches!(registry.get_error_view(), Err(RegistryError::ErrorViewMissing)));
        error_views(&registry);

        let mut category: IndexMap<String, ComponentLoader<Arc<str>>> = IndexMap::new();
        category.insert(
            "card".to_string(),
            Arc::new(|| async { Ok::<_, LoadError>(Arc::<str>::from("Card")) }.boxed()),
        );
        registry.add_registry("blocks", category).unwrap();

        assert_eq!(&*registry.load_component("blocks", "card").await.unwrap(), "Card");
        assert_eq!(
            &*registry.load_component("nope", "card").await.unwrap(),
            "error: Category nope not found"
        );
        let a = registry.load_component("blocks", "missing").await.unwrap();
        let b = registry.load_component("blocks", "missing").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.driver_ids_by_type("blocks"), vec!["blocks/card"]);
    }

    #[test]
    fn duplicate_ids_fail() {
        let registry: ComponentRegistry<Arc<str>> = ComponentRegistry::new();
        let driver = || ComponentDriver::new("x", "t", || async { Ok::<_, LoadError>(Arc::<str>::from("X")) });
        registry.register(driver()).unwrap();
        assert!(matches!(
            registry.register(driver()),
            Err(RegistryError::DuplicateId { ref id }) if id == "x"
        ));
    }
}

mod field_writes {
    use super::*;

    #[test]
    fn missing_field_write_creates_the_parent() {
        let events: Arc<Mutex<Vec<AutoChangeEvent>>> = Arc::default();
        let sink = events.clone();
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let parent = AutoViewProps::new(schema, "#")
            .with_ids(Arc::new(SequentialIds::new("new")))
            .with_on_change(move |event| sink.lock().unwrap().push(event.clone()));

        let name = auto_field_props("name", &parent).unwrap();
        assert_eq!(name.data_id, NEW_TEMP_ID);
        name.emit(vec![AutoChange::from(Change::new(
            name.data_id.clone(),
            ChangeOp::Set {
                new_value: ExpandedValue::from("Ann"),
            },
        ))]);

        let events = events.lock().unwrap();
        let patch = &events[0].patch;
        assert!(matches!(&patch[0], AutoChange::SetNew(_)));
        let AutoChange::Apply(Change {
            op: ChangeOp::SetProperty {
                property_name,
                new_value,
            },
            ..
        }) = &patch[1]
        else {
            panic!("second step should set the property");
        };
        assert_eq!(property_name, "name");
        assert_eq!(new_value.value, ExpandedValue::from("Ann"));

        let data = apply_patch(None, patch).unwrap();
        assert_eq!(shrink(&data), json!({"name": "Ann"}));
        let boxed = serde_json::to_value(&*data).unwrap();
        assert_eq!(boxed["value"]["name"]["value"], "Ann");
    }

    #[test]
    fn existing_field_keeps_its_handler() {
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let data = expand(&json!({"name": "Bo"}), &SequentialIds::new("d"));
        let events: Arc<Mutex<Vec<AutoChangeEvent>>> = Arc::default();
        let sink = events.clone();
        let parent = AutoViewProps::new(schema, "#")
            .with_data(data.clone())
            .with_on_change(move |event| sink.lock().unwrap().push(event.clone()));

        let name = auto_field_props("name", &parent).unwrap();
        let step = AutoChange::from(Change::new(
            name.data_id.clone(),
            ChangeOp::Set {
                new_value: ExpandedValue::from("Cy"),
            },
        ));
        name.emit(vec![step.clone()]);

        let events = events.lock().unwrap();
        assert_eq!(events[0].patch, vec![step]);
        let next = apply_patch(Some(data), &events[0].patch).unwrap();
        assert_eq!(shrink(&next), json!({"name": "Cy"}));
    }
}

mod pages {
    use super::*;

    #[tokio::test]
    async fn home_page_renders_through_registry() {
        let ids = SequentialIds::new("p");
        let list = expand(&json!({"pages": [{"slug": "/", "pageID": "home"}]}), &ids);
        let home = expand(
            &json!({
                "__noco__type__": "pages/home",
                "props": {"hero": {"__noco__type__": "sections/hero", "props": {"title": "Hi"}}}
            }),
            &ids,
        );
        let manager = EditingDataManager::new(Arc::new(StaticPages::new(list).with_page("home", home)));

        let registry: ComponentRegistry<Arc<str>> = ComponentRegistry::new();
        error_views(&registry);
        registry
            .register(ComponentDriver::new("pages/home", "pages", || async {
                Ok::<_, LoadError>(Arc::<str>::from("Home"))
            }))
            .unwrap();

        manager.get_page_list().await.unwrap();
        let home_id = manager.home_page_id().unwrap();
        let page = manager.get_page(&home_id).await.unwrap();

        let EditNode::Block { component, props, .. } = render_page(&registry, &page).await.unwrap() else {
            panic!("home page should render");
        };
        assert_eq!(&*component, "Home");
        assert!(matches!(
            &props["hero"],
            EditNode::ErrorView { message, .. } if message == "Component sections/hero not found"
        ));
    }
}
