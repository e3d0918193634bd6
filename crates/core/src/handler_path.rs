//! Handler path resolution.
//!
//! A job names its unit of work by a path string. The path is a security boundary:
//! after lexical normalization it must land strictly inside a single allowed root,
//! otherwise the job is rejected before anything is looked up.
//!
//! Normalization is purely lexical (no filesystem access):
//! - `\` is treated as `/`
//! - empty and `.` segments are dropped
//! - `..` removes the previous segment and is clamped at `/`
//! - relative paths are resolved against the root, absolute paths stand alone
//!
//! The resolved [`HandlerPath`] is the remainder below the root, joined with `/`.
//! That canonical form is the key handlers are registered under.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Default root handler paths are resolved against.
pub const DEFAULT_HANDLER_ROOT: &str = "/handlers";

/// The single directory-like namespace handlers must live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRoot {
    segments: Vec<String>,
}

impl HandlerRoot {
    /// Build a root from an absolute path such as `/srv/app/handlers`.
    ///
    /// The root itself must be absolute and must not normalize to `/`: a root of `/`
    /// would admit every path and defeat the boundary.
    pub fn new(root: &str) -> DomainResult<Self> {
        let root = root.trim();
        if !is_absolute(root) {
            return Err(DomainError::validation(format!(
                "handler root must be absolute: {root:?}"
            )));
        }
        let segments = normalize(Vec::new(), root)?;
        if segments.is_empty() {
            return Err(DomainError::validation("handler root cannot be `/`"));
        }
        Ok(Self { segments })
    }

    /// Resolve a raw handler path against this root.
    pub fn resolve(&self, raw: &str) -> DomainResult<HandlerPath> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DomainError::invalid_handler_path("empty path"));
        }

        let base = if is_absolute(raw) {
            Vec::new()
        } else {
            self.segments.clone()
        };
        let resolved = normalize(base, raw)?;

        if resolved.len() <= self.segments.len() || !resolved.starts_with(&self.segments) {
            return Err(DomainError::invalid_handler_path(format!(
                "{raw:?} resolves outside {}",
                self
            )));
        }

        Ok(HandlerPath(resolved[self.segments.len()..].join("/")))
    }
}

impl Default for HandlerRoot {
    fn default() -> Self {
        Self {
            segments: vec![DEFAULT_HANDLER_ROOT.trim_start_matches('/').to_string()],
        }
    }
}

impl core::fmt::Display for HandlerRoot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// A handler path that has been normalized and proven to sit inside a [`HandlerRoot`].
///
/// Only obtainable through [`HandlerRoot::resolve`] (or deserialization of an already
/// canonical value), so holding one is evidence the boundary check ran.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerPath(String);

impl HandlerPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for HandlerPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HandlerPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || path.starts_with('\\')
}

fn normalize(mut segments: Vec<String>, raw: &str) -> DomainResult<Vec<String>> {
    if raw.contains('\0') {
        return Err(DomainError::invalid_handler_path("path contains a NUL byte"));
    }

    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}
