//! Path label strategies.
//!
//! The path label must be a route template, never the raw URI, or
//! every distinct id in a URL would become its own series.

use axum::extract::MatchedPath;
use axum::http::{Extensions, Uri};

use crate::domain::labels::NOT_MATCHED;

/// Derives the `path` label of an inbound request.
///
/// Any `Fn(&Uri, &Extensions) -> String` closure is a `PathLabel`.
pub trait PathLabel: Send + Sync + 'static {
    /// Label value for this request.
    fn path_label(&self, uri: &Uri, extensions: &Extensions) -> String;
}

impl<F> PathLabel for F
where
    F: Fn(&Uri, &Extensions) -> String + Send + Sync + 'static,
{
    fn path_label(&self, uri: &Uri, extensions: &Extensions) -> String {
        self(uri, extensions)
    }
}

/// Uses axum's [`MatchedPath`] (e.g. `/users/:id`).
///
/// Requests that matched no route, including those answered by the
/// fallback, get the `unmatched` label.
#[derive(Debug, Clone)]
pub struct MatchedPathLabel {
    unmatched: String,
}

impl MatchedPathLabel {
    pub fn new(unmatched: impl Into<String>) -> Self {
        Self {
            unmatched: unmatched.into(),
        }
    }
}

impl Default for MatchedPathLabel {
    fn default() -> Self {
        Self::new(NOT_MATCHED)
    }
}

impl PathLabel for MatchedPathLabel {
    fn path_label(&self, _uri: &Uri, extensions: &Extensions) -> String {
        extensions
            .get::<MatchedPath>()
            .map_or_else(|| self.unmatched.clone(), |p| p.as_str().to_owned())
    }
}
