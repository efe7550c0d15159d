//! Page contexts over an open session.
//!
//! Each opened page gets a [`PageContextId`] of the form
//! `<sessionId>:page:<pageId>:<timestampMillis>` and a snapshot of the
//! logical form the server returned for it.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::{PageContextId, SubscriptionId};
use crate::protocol::interaction::OPEN_FORM_INTERACTION;
use crate::protocol::{Control, Handler, LogicalForm, resolve_control};

use super::adapter::{InvokeOptions, ProtocolAdapter};
use super::filters::FilterMetadataCache;

// ============================================================================
// Types
// ============================================================================

type PageMap = FxHashMap<PageContextId, PageContext>;

// ============================================================================
// PageContext
// ============================================================================

/// An open page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContext {
    /// Context identifier.
    pub id: PageContextId,
    /// Session the page was opened in.
    pub session_id: String,
    /// Page id as requested.
    pub page_id: String,
    /// Server form id.
    pub form_id: String,
    /// Form tree as returned when the page opened.
    pub form: LogicalForm,
    /// Open time.
    pub opened_at: SystemTime,
}

// ============================================================================
// OpenPageOptions
// ============================================================================

/// Options for [`SessionManager::open_page`].
#[derive(Debug, Clone, Default)]
pub struct OpenPageOptions {
    /// Company to open the page in.
    pub company: Option<String>,
    /// Response timeout override.
    pub timeout: Option<Duration>,
    /// Cancellation token.
    pub cancel: Option<CancellationToken>,
}

impl OpenPageOptions {
    /// Sets the company.
    #[inline]
    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// Sets the response timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

// ============================================================================
// SessionManager
// ============================================================================

/// Tracks open pages and keeps them consistent with server events.
pub struct SessionManager {
    adapter: Arc<ProtocolAdapter>,
    filters: Arc<FilterMetadataCache>,
    pages: Arc<Mutex<PageMap>>,
    subscription: SubscriptionId,
}

impl SessionManager {
    /// Creates a manager and subscribes it to the adapter's form closures.
    #[must_use]
    pub fn new(adapter: Arc<ProtocolAdapter>, filters: Arc<FilterMetadataCache>) -> Self {
        let pages: Arc<Mutex<PageMap>> = Arc::default();

        let weak_pages: Weak<Mutex<PageMap>> = Arc::downgrade(&pages);
        let weak_filters = Arc::downgrade(&filters);
        let subscription = adapter.on_form_closed(move |form_id| {
            let Some(pages) = weak_pages.upgrade() else {
                return;
            };
            let dropped = drop_form(&pages, form_id);
            if let Some(filters) = weak_filters.upgrade() {
                for page_id in &dropped {
                    filters.invalidate(page_id);
                }
            }
            if !dropped.is_empty() {
                debug!(form_id = %form_id, count = dropped.len(), "Form closed");
            }
        });

        Self {
            adapter,
            filters,
            pages,
            subscription,
        }
    }

    /// Opens a page and records its context.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPageContextId`] if the page id is empty or contains
    ///   `:`, before anything is sent
    /// - [`Error::Protocol`] if the response contains no form
    /// - errors from [`ProtocolAdapter::invoke`]
    pub async fn open_page(&self, page_id: &str, options: OpenPageOptions) -> Result<PageContext> {
        PageContextId::check_page_id(page_id)?;

        let mut query = format!("page={}", urlencoding::encode(page_id));
        if let Some(company) = &options.company {
            query.push_str("&company=");
            query.push_str(&urlencoding::encode(company));
        }

        let mut invoke = InvokeOptions::new(OPEN_FORM_INTERACTION, json!({ "query": query }));
        invoke.timeout = options.timeout;
        invoke.cancel = options.cancel;

        let handlers = self.adapter.invoke(invoke).await?;

        let form = handlers
            .into_iter()
            .find_map(|handler| match handler {
                Handler::FormToShow(form) => Some(form),
                _ => None,
            })
            .ok_or_else(|| Error::protocol(format!("opening page {page_id} returned no form")))?;
        let form_id = form
            .form_id()
            .ok_or_else(|| Error::protocol(format!("form for page {page_id} has no ServerId")))?
            .to_string();

        let session_id = self.adapter.session_id();
        let opened_at = SystemTime::now();
        let mut timestamp = opened_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let context = {
            let mut pages = self.pages.lock();
            let mut id = PageContextId::build(&session_id, page_id, timestamp)?;
            while pages.contains_key(&id) {
                timestamp += 1;
                id = PageContextId::build(&session_id, page_id, timestamp)?;
            }

            let context = PageContext {
                id: id.clone(),
                session_id,
                page_id: page_id.to_string(),
                form_id,
                form,
                opened_at,
            };
            pages.insert(id, context.clone());
            context
        };

        info!(page_context_id = %context.id, form_id = %context.form_id, "Page opened");
        Ok(context)
    }

    /// Closes a page.
    ///
    /// # Errors
    ///
    /// - [`Error::PageNotFound`] if `id` is not an open page
    /// - errors from [`ProtocolAdapter::close_form`]
    pub async fn close_page(&self, id: &PageContextId) -> Result<()> {
        let (form_id, page_id) = {
            let pages = self.pages.lock();
            let context = pages
                .get(id)
                .ok_or_else(|| Error::page_not_found(id.as_str()))?;
            (context.form_id.clone(), context.page_id.clone())
        };

        self.adapter.close_form(&form_id).await?;

        self.pages.lock().remove(id);
        self.filters.invalidate(&page_id);
        info!(page_context_id = %id, "Page closed");
        Ok(())
    }

    /// Returns a page context.
    #[must_use]
    pub fn get(&self, id: &PageContextId) -> Option<PageContext> {
        self.pages.lock().get(id).cloned()
    }

    /// Returns all open page contexts.
    #[must_use]
    pub fn contexts(&self) -> Vec<PageContext> {
        self.pages.lock().values().cloned().collect()
    }

    /// Returns the ids of forms currently open in the session.
    #[must_use]
    pub fn open_form_ids(&self) -> Vec<String> {
        self.adapter.open_form_ids()
    }

    /// Resolves a control path inside a page's form.
    ///
    /// Returns `Ok(None)` if the path does not address a control.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageNotFound`] if `id` is not an open page.
    pub fn resolve_control(&self, id: &PageContextId, path: &str) -> Result<Option<Control>> {
        let pages = self.pages.lock();
        let context = pages
            .get(id)
            .ok_or_else(|| Error::page_not_found(id.as_str()))?;
        Ok(resolve_control(&context.form, path).cloned())
    }

    /// Drops every page context.
    pub fn invalidate_all(&self) {
        let count = {
            let mut pages = self.pages.lock();
            let count = pages.len();
            pages.clear();
            count
        };
        if count > 0 {
            debug!(count, "Page contexts invalidated");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.adapter.unsubscribe_form_closed(self.subscription);
    }
}

/// Removes contexts showing `form_id` and returns their page ids.
fn drop_form(pages: &Mutex<PageMap>, form_id: &str) -> Vec<String> {
    let mut pages = pages.lock();
    let mut dropped = Vec::new();
    pages.retain(|_, context| {
        if context.form_id == form_id {
            dropped.push(context.page_id.clone());
            false
        } else {
            true
        }
    });
    dropped
}

// ============================================================================
// Tests
// ============================================================================
