//! Control path parsing and positional resolution.
//!
//! A control path addresses one node of a [`LogicalForm`] by child index:
//!
//! ```text
//! ["server" [":"]] segment ("/" segment)*
//! segment = letters "[" digits "]"
//! ```
//!
//! `server:c[0]/gc[1]/sc[2]` means: first top-level control, its second
//! child, that node's third child. The letter tag names the control kind for
//! readability and is discarded. `""`, `"server"` and `"server:"` address
//! the root form.
//!
//! Resolution is strictly positional. Sibling controls regularly share a
//! design name (two fields captioned `No.`), so names are never consulted.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::form::{Control, LogicalForm, NodeRef};

// ============================================================================
// Constants
// ============================================================================

/// Prefix for server-generated paths.
const SERVER_PREFIX: &str = "server";

/// One path segment: a letter tag and a bracketed index.
static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+)\[(\d+)\]$").unwrap_or_else(|e| panic!("segment pattern: {e}"))
});

// ============================================================================
// PathSegment
// ============================================================================

/// One step of a control path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// Control kind tag as written (`c`, `gc`, ...).
    pub tag: String,
    /// Child index.
    pub index: usize,
}

// ============================================================================
// ControlPath
// ============================================================================

/// A parsed control path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ControlPath {
    segments: Vec<PathSegment>,
}

impl ControlPath {
    /// The path of the root form.
    #[inline]
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses a path string.
    ///
    /// Returns `None` if any segment does not match the grammar or its
    /// index does not fit in `usize`.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path
            .strip_prefix(SERVER_PREFIX)
            .map(|rest| rest.strip_prefix(':').unwrap_or(rest))
            .unwrap_or(path)
            .trim_end_matches('/');

        if rest.is_empty() {
            return Some(Self::root());
        }

        rest.split('/')
            .map(|segment| {
                let captures = SEGMENT.captures(segment)?;
                let index = captures[2].parse::<usize>().ok()?;
                Some(PathSegment {
                    tag: captures[1].to_string(),
                    index,
                })
            })
            .collect::<Option<Vec<_>>>()
            .map(|segments| Self { segments })
    }

    /// Appends a segment.
    #[must_use]
    pub fn child(mut self, tag: impl Into<String>, index: usize) -> Self {
        self.segments.push(PathSegment {
            tag: tag.into(),
            index,
        });
        self
    }

    /// Returns `true` for the root path.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the segments in order.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns the child indices in order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.segments.iter().map(|s| s.index)
    }

    /// Walks `root` by index.
    ///
    /// Returns `None` if an index is out of bounds or a leaf is asked to
    /// descend.
    #[must_use]
    pub fn resolve_in<'a>(&self, root: &'a LogicalForm) -> Option<NodeRef<'a>> {
        let mut node = NodeRef::Form(root);
        for index in self.indices() {
            let child: &'a Control = node.children()?.get(index)?;
            node = NodeRef::Control(child);
        }
        Some(node)
    }
}

impl fmt::Display for ControlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SERVER_PREFIX}:")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}[{}]", segment.tag, segment.index)?;
        }
        Ok(())
    }
}

// ============================================================================
// resolve
// ============================================================================

/// Resolves `path` against `root`.
///
/// Returns the root for an empty path, the addressed control otherwise, or
/// `None` if the path is malformed, an index is out of bounds, or a leaf is
/// asked to descend.
///
/// # Example
///
/// ```ignore
/// let node = resolve(&form, "server:c[0]/c[1]").expect("control exists");
/// ```
#[must_use]
pub fn resolve<'a>(root: &'a LogicalForm, path: &str) -> Option<NodeRef<'a>> {
    ControlPath::parse(path)?.resolve_in(root)
}

/// Resolves `path` and returns the control, or `None` for the root or a
/// failed resolution.
#[inline]
#[must_use]
pub fn resolve_control<'a>(root: &'a LogicalForm, path: &str) -> Option<&'a Control> {
    resolve(root, path)?.as_control()
}

// ============================================================================
// Tests
// ============================================================================
