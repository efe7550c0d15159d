//! Filter metadata and its per-page cache.
//!
//! Filterable fields of a list page are discovered by running the filter
//! interaction once and walking the returned form for controls bound to a
//! table column (`ColumnBinder.Name`).

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::Result;
use crate::protocol::{Control, ControlPath, FormNode, Handler};

// ============================================================================
// Constants
// ============================================================================

/// Control path tag used for child segments.
const CHILD_TAG: &str = "c";

// ============================================================================
// FilterField
// ============================================================================

/// One filterable column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterField {
    /// Column binder name.
    pub id: String,
    /// Display caption, falling back to the design name.
    pub caption: Option<String>,
    /// Path of the bound control inside the filter form.
    pub control_path: String,
}

// ============================================================================
// FilterMetadata
// ============================================================================

/// Filterable fields of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterMetadata {
    /// Fields in form order.
    pub fields: Vec<FilterField>,
}

impl FilterMetadata {
    /// Collects column-bound controls from every `FormToShow` handler.
    #[must_use]
    pub fn from_handlers(handlers: &[Handler]) -> Self {
        let mut fields = Vec::new();

        for handler in handlers {
            if let Handler::FormToShow(form) = handler
                && let Some(children) = form.children()
            {
                collect_fields(children, &ControlPath::root(), &mut fields);
            }
        }

        Self { fields }
    }

    /// Finds a field by column id.
    #[must_use]
    pub fn field(&self, id: &str) -> Option<&FilterField> {
        self.fields.iter().find(|field| field.id == id)
    }

    /// Returns `true` if no fields were found.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn collect_fields(children: &[Control], parent: &ControlPath, out: &mut Vec<FilterField>) {
    for (index, control) in children.iter().enumerate() {
        let path = parent.clone().child(CHILD_TAG, index);

        if let Some(id) = column_name(control) {
            out.push(FilterField {
                id: id.to_string(),
                caption: control
                    .property_str("Caption")
                    .or_else(|| control.design_name())
                    .map(str::to_string),
                control_path: path.to_string(),
            });
        }

        if let Some(grandchildren) = control.children() {
            collect_fields(grandchildren, &path, out);
        }
    }
}

fn column_name(control: &Control) -> Option<&str> {
    control
        .properties()
        .get("ColumnBinder")
        .and_then(|binder| binder.get("Name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

// ============================================================================
// FilterMetadataCache
// ============================================================================

/// Filter metadata keyed by page id.
#[derive(Debug, Default)]
pub struct FilterMetadataCache {
    entries: Mutex<FxHashMap<String, Arc<FilterMetadata>>>,
}

impl FilterMetadataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns cached metadata.
    #[must_use]
    pub fn get(&self, page_id: &str) -> Option<Arc<FilterMetadata>> {
        self.entries.lock().get(page_id).cloned()
    }

    /// Stores metadata, replacing any previous entry.
    pub fn insert(&self, page_id: impl Into<String>, metadata: FilterMetadata) -> Arc<FilterMetadata> {
        let metadata = Arc::new(metadata);
        self.entries
            .lock()
            .insert(page_id.into(), Arc::clone(&metadata));
        metadata
    }

    /// Returns cached metadata, or runs `fetch` and caches its result.
    ///
    /// A hit never calls `fetch`. A failed fetch caches nothing.
    ///
    /// # Errors
    ///
    /// Returns whatever `fetch` returns.
    pub async fn get_or_fetch<F, Fut>(&self, page_id: &str, fetch: F) -> Result<Arc<FilterMetadata>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FilterMetadata>>,
    {
        if let Some(hit) = self.get(page_id) {
            trace!(page_id, "Filter metadata cache hit");
            return Ok(hit);
        }

        debug!(page_id, "Fetching filter metadata");
        let metadata = fetch().await?;
        Ok(self.insert(page_id, metadata))
    }

    /// Drops one entry.
    pub fn invalidate(&self, page_id: &str) -> bool {
        self.entries.lock().remove(page_id).is_some()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
