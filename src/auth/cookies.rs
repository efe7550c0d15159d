//! Ordered cookie jar.
//!
//! Cookies keep the order of their first appearance. A repeated name
//! replaces the value in place.

// ============================================================================
// CookieJar
// ============================================================================

/// Session cookies as `(name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: Vec<(String, String)>,
}

impl CookieJar {
    /// Creates an empty jar.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Sets a cookie, replacing an existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Merges one `Set-Cookie` header value.
    ///
    /// Only the leading `name=value` pair is kept. Returns `false` if the
    /// header has no `=` or an empty name.
    pub fn merge_set_cookie(&mut self, header: &str) -> bool {
        let pair = header.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else {
            return false;
        };

        let name = name.trim();
        if name.is_empty() {
            return false;
        }

        self.set(name, value.trim());
        true
    }

    /// Returns the value of a cookie.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first cookie whose name contains `fragment`.
    #[must_use]
    pub fn find_containing(&self, fragment: &str) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|(n, _)| n.contains(fragment))
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns cookies as `name=value` strings.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect()
    }

    /// Returns the `Cookie` header value, `None` when empty.
    #[must_use]
    pub fn header(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries().join("; "))
    }

    /// Returns the number of cookies.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the jar is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
