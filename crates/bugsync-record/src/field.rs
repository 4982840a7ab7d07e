//! Field cells and on-demand placeholders
//!
//! A record field is either resolved data or a deferred computation. The
//! deferred form ([`OnDemand`]) runs its loader on first read only; the
//! record then replaces the cell with the result.

use crate::error::FetchError;
use crate::path::FieldPath;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Deferred computation backing an on-demand field
pub trait FieldLoader: Send + Sync {
    /// Produce the raw value (before selection)
    ///
    /// # Errors
    /// Returns the backend failure; the caller scopes it to the field.
    fn load(&self) -> Result<Value, FetchError>;
}

impl<F> FieldLoader for F
where
    F: Fn() -> Result<Value, FetchError> + Send + Sync,
{
    fn load(&self) -> Result<Value, FetchError> {
        self()
    }
}

/// Single-resource fetch offered by a source backend
///
/// Placeholders installed by enrichers call this to load e.g. issue details
/// or comments for one record.
pub trait ResourceFetcher: Send + Sync {
    /// Fetch the resource at `uri`
    ///
    /// # Errors
    /// Returns [`FetchError`] on transport or backend failure.
    fn fetch_resource(&self, uri: &str) -> Result<Value, FetchError>;
}

/// Loader that fetches one uri through a [`ResourceFetcher`]
#[derive(Clone)]
pub struct UriLoader {
    fetcher: Arc<dyn ResourceFetcher>,
    uri: String,
}

impl UriLoader {
    /// Create loader for `uri`
    #[inline]
    #[must_use]
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, uri: impl Into<String>) -> Self {
        Self {
            fetcher,
            uri: uri.into(),
        }
    }

    /// Target uri
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl FieldLoader for UriLoader {
    fn load(&self) -> Result<Value, FetchError> {
        tracing::debug!(uri = %self.uri, "fetching on-demand resource");
        self.fetcher.fetch_resource(&self.uri)
    }
}

impl fmt::Debug for UriLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriLoader").field("uri", &self.uri).finish()
    }
}

/// On-demand placeholder
///
/// # Structure
/// - `loader`: the deferred fetch
/// - `cache_key`: shared key; placeholders of one record with the same key
///   reuse a single fetched response
/// - `select`: optional path into the fetched response
#[derive(Clone)]
pub struct OnDemand {
    loader: Arc<dyn FieldLoader>,
    cache_key: Option<String>,
    select: Option<Vec<String>>,
}

impl OnDemand {
    /// Create placeholder around a loader
    #[inline]
    #[must_use]
    pub fn new(loader: impl FieldLoader + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            cache_key: None,
            select: None,
        }
    }

    /// Create placeholder around a closure
    #[inline]
    #[must_use]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<Value, FetchError> + Send + Sync + 'static,
    {
        Self::new(f)
    }

    /// Create placeholder around a shared loader
    #[inline]
    #[must_use]
    pub fn from_arc(loader: Arc<dyn FieldLoader>) -> Self {
        Self {
            loader,
            cache_key: None,
            select: None,
        }
    }

    /// Placeholder fetching `uri` through `fetcher`
    ///
    /// When `cacheable` is set the uri doubles as the shared cache key.
    #[must_use]
    pub fn for_uri(fetcher: Arc<dyn ResourceFetcher>, uri: impl Into<String>, cacheable: bool) -> Self {
        let loader = UriLoader::new(fetcher, uri);
        let cache_key = cacheable.then(|| loader.uri().to_string());
        Self {
            loader: Arc::new(loader),
            cache_key,
            select: None,
        }
    }

    /// With shared cache key
    #[inline]
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// With selection path into the loaded value
    #[inline]
    #[must_use]
    pub fn with_select(mut self, path: &FieldPath) -> Self {
        self.select = Some(path.segments().to_vec());
        self
    }

    /// Shared cache key, if any
    #[inline]
    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    /// Run the loader
    pub(crate) fn load(&self) -> Result<Value, FetchError> {
        self.loader.load()
    }

    /// Pick the selected part of a loaded response
    pub(crate) fn select_from(&self, response: &Value) -> Value {
        match &self.select {
            Some(segments) => FieldPath::walk(response, segments)
                .cloned()
                .unwrap_or(Value::Null),
            None => response.clone(),
        }
    }
}

impl fmt::Debug for OnDemand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemand")
            .field("cache_key", &self.cache_key)
            .field("select", &self.select)
            .finish_non_exhaustive()
    }
}

/// Storage cell for one record field
#[derive(Debug, Clone)]
pub enum FieldCell {
    /// Concrete value
    Resolved(Value),
    /// Not yet loaded
    Unresolved(OnDemand),
    /// Load attempted and failed; the error is replayed on later reads
    Failed(FetchError),
}

impl FieldCell {
    /// Check if the cell holds concrete data
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Resolved value, if any
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for FieldCell {
    fn from(value: Value) -> Self {
        Self::Resolved(value)
    }
}

impl From<OnDemand> for FieldCell {
    fn from(on_demand: OnDemand) -> Self {
        Self::Unresolved(on_demand)
    }
}
