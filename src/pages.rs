//! Page data for the editor.
//!
//! [`EditingDataManager`] fronts a [`PageProvider`]: the page list and each
//! page are fetched at most once, concurrent requests share the fetch, and
//! settled values can be read synchronously.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use crate::cache::{LoadCache, LoadState};
use crate::error::LoadError;
use crate::expanded::ExpandedData;

/// Source of page data.
#[async_trait]
pub trait PageProvider: Send + Sync {
    async fn fetch_page_list(&self) -> Result<Arc<ExpandedData>, LoadError>;

    async fn fetch_page(&self, id: &str) -> Result<Arc<ExpandedData>, LoadError>;
}

/// In-memory pages.
#[derive(Debug, Clone)]
pub struct StaticPages {
    list: Arc<ExpandedData>,
    pages: IndexMap<String, Arc<ExpandedData>>,
}

impl StaticPages {
    pub fn new(list: Arc<ExpandedData>) -> Self {
        Self {
            list,
            pages: IndexMap::new(),
        }
    }

    pub fn with_page(mut self, id: impl Into<String>, page: Arc<ExpandedData>) -> Self {
        self.pages.insert(id.into(), page);
        self
    }
}

#[async_trait]
impl PageProvider for StaticPages {
    async fn fetch_page_list(&self) -> Result<Arc<ExpandedData>, LoadError> {
        Ok(self.list.clone())
    }

    async fn fetch_page(&self, id: &str) -> Result<Arc<ExpandedData>, LoadError> {
        self.pages
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::new(format!("page {} not found", id)))
    }
}

pub struct EditingDataManager {
    provider: Arc<dyn PageProvider>,
    list: LoadCache<(), Arc<ExpandedData>>,
    pages: LoadCache<String, Arc<ExpandedData>>,
}

impl fmt::Debug for EditingDataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditingDataManager")
            .field("pages", &self.pages.loaded_keys())
            .finish_non_exhaustive()
    }
}

impl EditingDataManager {
    pub fn new(provider: Arc<dyn PageProvider>) -> Self {
        Self {
            provider,
            list: LoadCache::new(),
            pages: LoadCache::new(),
        }
    }

    pub async fn get_page_list(&self) -> Result<Arc<ExpandedData>, LoadError> {
        let provider = self.provider.clone();
        self.list
            .get_or_load(&(), move || async move {
                debug!("fetching page list");
                provider.fetch_page_list().await
            })
            .await
    }

    /// The page list, once fetched.
    pub fn get_loaded_page_list(&self) -> Option<Arc<ExpandedData>> {
        self.list.value(&())
    }

    pub async fn get_page(&self, id: &str) -> Result<Arc<ExpandedData>, LoadError> {
        let key = id.to_string();
        let provider = self.provider.clone();
        let page_id = key.clone();
        self.pages
            .get_or_load(&key, move || async move {
                debug!(id = %page_id, "fetching page");
                provider.fetch_page(&page_id).await
            })
            .await
    }

    /// A page, once fetched.
    pub fn get_loaded_page(&self, id: &str) -> Option<Arc<ExpandedData>> {
        self.pages.value(&id.to_string())
    }

    pub fn page_state(&self, id: &str) -> LoadState<Arc<ExpandedData>> {
        self.pages.state(&id.to_string())
    }

    /// Id of the page whose slug is `/`, from the loaded page list.
    pub fn home_page_id(&self) -> Option<String> {
        self.get_loaded_page_list().and_then(|list| home_page_id(&list))
    }
}

/// Find the page with slug `/` in a list shaped `{ pages: [{ slug, pageID }] }`.
pub fn home_page_id(list: &ExpandedData) -> Option<String> {
    list.get("pages")?
        .value
        .as_array()?
        .iter()
        .find(|page| page.get("slug").and_then(|s| s.value.as_str()) == Some("/"))?
        .get("pageID")?
        .value
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expanded::{expand, shrink};
    use crate::ids::SequentialIds;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowPages {
        inner: StaticPages,
        list_calls: AtomicUsize,
        page_calls: AtomicUsize,
    }

    #[async_trait]
    impl PageProvider for SlowPages {
        async fn fetch_page_list(&self) -> Result<Arc<ExpandedData>, LoadError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.inner.fetch_page_list().await
        }

        async fn fetch_page(&self, id: &str) -> Result<Arc<ExpandedData>, LoadError> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.inner.fetch_page(id).await
        }
    }

    fn provider() -> Arc<SlowPages> {
        let ids = SequentialIds::new("p");
        let list = expand(
            &json!({"pages": [
                {"slug": "/about", "pageID": "about"},
                {"slug": "/", "pageID": "home"}
            ]}),
            &ids,
        );
        let home = expand(&json!({"__noco__type__": "pages/home", "props": {}}), &ids);
        Arc::new(SlowPages {
            inner: StaticPages::new(list).with_page("home", home),
            list_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn page_list_is_fetched_once() {
        let provider = provider();
        let manager = EditingDataManager::new(provider.clone());
        assert!(manager.get_loaded_page_list().is_none());

        let (a, b) = tokio::join!(manager.get_page_list(), manager.get_page_list());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);
        assert!(manager.get_loaded_page_list().is_some());
        assert_eq!(manager.home_page_id().as_deref(), Some("home"));
    }

    #[tokio::test]
    async fn pages_are_coalesced_and_failures_cached() {
        let provider = provider();
        let manager = EditingDataManager::new(provider.clone());

        let (a, b) = tokio::join!(manager.get_page("home"), manager.get_page("home"));
        assert_eq!(shrink(&a.unwrap()), shrink(&b.unwrap()));
        assert_eq!(provider.page_calls.load(Ordering::SeqCst), 1);
        assert!(manager.get_loaded_page("home").is_some());

        let err = manager.get_page("missing").await.unwrap_err();
        assert_eq!(err.message, "page missing not found");
        assert!(manager.get_page("missing").await.is_err());
        assert_eq!(provider.page_calls.load(Ordering::SeqCst), 2);
        assert!(matches!(manager.page_state("missing"), LoadState::Failed(_)));
        assert!(manager.get_loaded_page("missing").is_none());
    }
}
