//! Component registry with lazy, coalesced loading.
//!
//! Components are registered as drivers: an id, a type (category) and an async
//! loader. Loading is memoized per id through [`LoadCache`]. Lookups that miss
//! never fail; they fall back to an error view synthesized by the registered
//! factory and cached per cause.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::cache::{LoadCache, LoadState};
use crate::error::{LoadError, RegistryError};

pub type ComponentLoader<C> = Arc<dyn Fn() -> BoxFuture<'static, Result<C, LoadError>> + Send + Sync>;

pub type ErrorViewFactory<C> = Arc<dyn Fn(&ErrorViewCause) -> C + Send + Sync>;

/// One registrable renderer.
#[derive(Clone)]
pub struct ComponentDriver<C> {
    pub id: String,
    /// Category the driver belongs to, e.g. `sections`.
    pub kind: String,
    loader: ComponentLoader<C>,
}

impl<C> fmt::Debug for ComponentDriver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDriver")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<C: 'static> ComponentDriver<C> {
    pub fn new<F, Fut>(id: impl Into<String>, kind: impl Into<String>, load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, LoadError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            kind: kind.into(),
            loader: Arc::new(move || load().boxed()),
        }
    }

    pub fn from_loader(id: impl Into<String>, kind: impl Into<String>, loader: ComponentLoader<C>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            loader,
        }
    }
}

/// Why an error view is shown in place of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorViewCause {
    CategoryNotFound { category: String, name: String },
    ComponentNotFound { category: String, name: String },
    UnknownId { id: String },
    LoadFailed { id: String, error: LoadError },
    Loading { id: String },
}

impl ErrorViewCause {
    /// Text the error view displays.
    pub fn message(&self) -> String {
        match self {
            ErrorViewCause::CategoryNotFound { category, .. } => format!("Category {} not found", category),
            ErrorViewCause::ComponentNotFound { category, name } => {
                format!("Component {} not found in category {}", name, category)
            }
            ErrorViewCause::UnknownId { id } => format!("Component {} not found", id),
            ErrorViewCause::LoadFailed { id, .. } => format!("Component {} failed to load", id),
            ErrorViewCause::Loading { .. } => "Loading".to_string(),
        }
    }

    fn cache_key(&self) -> String {
        match self {
            ErrorViewCause::CategoryNotFound { category, name } => format!("category\u{0}{}\u{0}{}", category, name),
            ErrorViewCause::ComponentNotFound { category, name } => format!("name\u{0}{}\u{0}{}", category, name),
            ErrorViewCause::UnknownId { id } => format!("id\u{0}{}", id),
            ErrorViewCause::LoadFailed { id, .. } => format!("failed\u{0}{}", id),
            ErrorViewCause::Loading { id } => format!("loading\u{0}{}", id),
        }
    }
}

/// Registry of component drivers, generic over the component handle `C`.
pub struct ComponentRegistry<C> {
    drivers: Mutex<IndexMap<String, ComponentDriver<C>>>,
    categories: Mutex<HashMap<String, IndexMap<String, String>>>,
    loads: LoadCache<String, C>,
    error_view: Mutex<Option<ErrorViewFactory<C>>>,
    error_views: Mutex<HashMap<String, C>>,
}

impl<C> fmt::Debug for ComponentRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let drivers = self.drivers.lock().map(|d| d.len()).unwrap_or_default();
        f.debug_struct("ComponentRegistry").field("drivers", &drivers).finish()
    }
}

impl<C> Default for ComponentRegistry<C> {
    fn default() -> Self {
        Self {
            drivers: Mutex::new(IndexMap::new()),
            categories: Mutex::new(HashMap::new()),
            loads: LoadCache::default(),
            error_view: Mutex::new(None),
            error_views: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> ComponentRegistry<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateId` if the id is taken.
    pub fn register(&self, driver: ComponentDriver<C>) -> Result<(), RegistryError> {
        let mut drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        if drivers.contains_key(&driver.id) {
            return Err(RegistryError::DuplicateId { id: driver.id });
        }
        debug!(id = %driver.id, kind = %driver.kind, "registered component driver");
        drivers.insert(driver.id.clone(), driver);
        Ok(())
    }

    pub fn register_all(&self, drivers: impl IntoIterator<Item = ComponentDriver<C>>) -> Result<(), RegistryError> {
        drivers.into_iter().try_for_each(|driver| self.register(driver))
    }

    /// Register a category of loaders keyed by name. Each becomes a driver with
    /// id `{category}/{name}`.
    pub fn add_registry(
        &self,
        category: &str,
        loaders: IndexMap<String, ComponentLoader<C>>,
    ) -> Result<(), RegistryError> {
        for (name, loader) in loaders {
            let id = format!("{}/{}", category, name);
            self.register(ComponentDriver::from_loader(id.clone(), category, loader))?;
            let mut categories = self.categories.lock().unwrap_or_else(|e| e.into_inner());
            categories.entry(category.to_string()).or_default().insert(name, id);
        }
        Ok(())
    }

    /// Driver ids of one type, in registration order.
    pub fn driver_ids_by_type(&self, kind: &str) -> Vec<String> {
        let drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers
            .values()
            .filter(|driver| driver.kind == kind)
            .map(|driver| driver.id.clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        let drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers.contains_key(id)
    }

    fn driver(&self, id: &str) -> Option<ComponentDriver<C>> {
        let drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers.get(id).cloned()
    }

    /// Load a component by driver id.
    ///
    /// Unknown ids resolve to the error view.
    ///
    /// # Errors
    ///
    /// `RegistryError::LoadFailed` when the loader failed (now or earlier),
    /// `RegistryError::ErrorViewMissing` for an unknown id without an error view.
    pub async fn load_component_by_id(&self, id: &str) -> Result<C, RegistryError> {
        let Some(driver) = self.driver(id) else {
            warn!(id, "no component driver registered");
            return self.error_view_for(&ErrorViewCause::UnknownId { id: id.to_string() });
        };
        let key = id.to_string();
        let result = self
            .loads
            .get_or_load(&key, || {
                debug!(id, "loading component");
                (driver.loader)()
            })
            .await;
        result.map_err(|source| {
            warn!(id, error = %source, "component failed to load");
            RegistryError::LoadFailed {
                id: key,
                source,
            }
        })
    }

    /// Load `name` from `category`. Every miss or failure yields the error view.
    pub async fn load_component(&self, category: &str, name: &str) -> Result<C, RegistryError> {
        let id = {
            let categories = self.categories.lock().unwrap_or_else(|e| e.into_inner());
            match categories.get(category) {
                None => Err(ErrorViewCause::CategoryNotFound {
                    category: category.to_string(),
                    name: name.to_string(),
                }),
                Some(names) => names.get(name).cloned().ok_or_else(|| ErrorViewCause::ComponentNotFound {
                    category: category.to_string(),
                    name: name.to_string(),
                }),
            }
        };
        let id = match id {
            Ok(id) => id,
            Err(cause) => {
                warn!(category, name, "{}", cause.message());
                return self.error_view_for(&cause);
            }
        };
        match self.load_component_by_id(&id).await {
            Err(RegistryError::LoadFailed { id, source }) => {
                self.error_view_for(&ErrorViewCause::LoadFailed { id, error: source })
            }
            other => other,
        }
    }

    /// Loaded component, without starting a load.
    pub fn get_component_by_id(&self, id: &str) -> Option<C> {
        self.loads.value(&id.to_string())
    }

    pub fn driver_state(&self, id: &str) -> LoadState<C> {
        self.loads.state(&id.to_string())
    }

    /// Register the factory that builds error views.
    pub fn set_error_view<F>(&self, factory: F)
    where
        F: Fn(&ErrorViewCause) -> C + Send + Sync + 'static,
    {
        let mut slot = self.error_view.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(factory));
        self.error_views.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// The registered error-view factory.
    pub fn get_error_view(&self) -> Result<ErrorViewFactory<C>, RegistryError> {
        let slot = self.error_view.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone().ok_or(RegistryError::ErrorViewMissing)
    }

    /// Error view for `cause`, built once per cause and cached.
    pub fn error_view_for(&self, cause: &ErrorViewCause) -> Result<C, RegistryError> {
        let key = cause.cache_key();
        if let Some(view) = self.error_views.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(view.clone());
        }
        let factory = self.get_error_view()?;
        let view = factory(cause);
        let mut views = self.error_views.lock().unwrap_or_else(|e| e.into_inner());
        Ok(views.entry(key).or_insert(view).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry() -> ComponentRegistry<String> {
        let registry = ComponentRegistry::new();
        registry.set_error_view(|cause: &ErrorViewCause| format!("error: {}", cause.message()));
        registry
    }

    fn counting_driver(id: &str, calls: Arc<AtomicUsize>) -> ComponentDriver<String> {
        let name = id.to_string();
        ComponentDriver::new(id, "sections", move || {
            let calls = calls.clone();
            let name = name.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(format!("<{}>", name))
            }
        })
    }

    #[test]
    fn duplicate_ids_rejected() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(counting_driver("hero", calls.clone())).unwrap();
        let err = registry.register(counting_driver("hero", calls)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId { id } if id == "hero"));
    }

    #[tokio::test]
    async fn concurrent_loads_run_loader_once() {
        let registry = Arc::new(registry());
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(counting_driver("hero", calls.clone())).unwrap();
        assert_eq!(registry.driver_state("hero"), LoadState::NotStarted);

        let loads = (0..4).map(|_| {
            let registry = registry.clone();
            async move { registry.load_component_by_id("hero").await }
        });
        let results = futures::future::join_all(loads).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref().ok() == Some("<hero>")));
        assert_eq!(registry.get_component_by_id("hero").as_deref(), Some("<hero>"));
        assert_eq!(registry.driver_state("hero"), LoadState::Loaded("<hero>".to_string()));
    }

    #[tokio::test]
    async fn failures_are_cached_and_not_retried() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register(ComponentDriver::new("broken", "sections", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(LoadError::new("chunk missing")) }
            }))
            .unwrap();

        for _ in 0..2 {
            let err = registry.load_component_by_id("broken").await.unwrap_err();
            assert!(matches!(err, RegistryError::LoadFailed { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(registry.driver_state("broken"), LoadState::Failed(_)));
        assert!(registry.get_component_by_id("broken").is_none());
    }

    #[tokio::test]
    async fn unknown_id_yields_error_view() {
        let registry = registry();
        let view = registry.load_component_by_id("ghost").await.unwrap();
        assert_eq!(view, "error: Component ghost not found");
    }

    #[tokio::test]
    async fn category_misses_fall_back() {
        let registry = registry();
        let mut loaders: IndexMap<String, ComponentLoader<String>> = IndexMap::new();
        loaders.insert("hero".into(), Arc::new(|| async { Ok::<_, LoadError>("<hero>".to_string()) }.boxed()));
        loaders.insert("broken".into(), Arc::new(|| async { Err::<String, _>(LoadError::new("x")) }.boxed()));
        registry.add_registry("sections", loaders).unwrap();

        assert_eq!(registry.driver_ids_by_type("sections"), vec!["sections/hero", "sections/broken"]);
        assert_eq!(registry.load_component("sections", "hero").await.unwrap(), "<hero>");
        assert_eq!(
            registry.load_component("pages", "home").await.unwrap(),
            "error: Category pages not found"
        );
        assert_eq!(
            registry.load_component("sections", "gallery").await.unwrap(),
            "error: Component gallery not found in category sections"
        );
        assert_eq!(
            registry.load_component("sections", "broken").await.unwrap(),
            "error: Component sections/broken failed to load"
        );
    }

    #[test]
    fn error_views_are_cached_per_cause() {
        let registry: ComponentRegistry<Arc<String>> = ComponentRegistry::new();
        registry.set_error_view(|cause: &ErrorViewCause| Arc::new(cause.message()));
        let cause = ErrorViewCause::UnknownId { id: "x".into() };
        let a = registry.error_view_for(&cause).unwrap();
        let b = registry.error_view_for(&cause).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn missing_error_view_is_an_error() {
        let registry: ComponentRegistry<String> = ComponentRegistry::new();
        assert!(matches!(registry.get_error_view(), Err(RegistryError::ErrorViewMissing)));
        let err = registry.load_component_by_id("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::ErrorViewMissing));
    }
}
