//! Paths inside the mounted tree.

use std::{
    fmt::{self, Debug, Display},
    str::FromStr,
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid path component {0:?}")]
pub struct InvalidComponent(pub String);

/// Checks a single name is usable as a path component.
fn validate_component(name: &str) -> Result<(), InvalidComponent> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(InvalidComponent(name.to_string()));
    }
    Ok(())
}

/// Represents a path in the mounted tree, relative to the mountpoint.
///
/// Components are separated by slashes, and are never empty, `.` or `..`.
/// The root is the path without any components. It's displayed with a
/// leading slash.
#[derive(Clone, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VfsPath {
    inner: String,
}

impl VfsPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn parent(&self) -> Option<VfsPath> {
        if self.is_root() {
            return None;
        }

        Some(match self.inner.rsplit_once('/') {
            Some((parent, _file_name)) => VfsPath {
                inner: parent.to_string(),
            },
            None => VfsPath::root(),
        })
    }

    pub fn join(&self, name: &str) -> Result<VfsPath, InvalidComponent> {
        validate_component(name)?;

        let mut inner = self.inner.clone();
        if !inner.is_empty() {
            inner.push('/');
        }
        inner.push_str(name);

        Ok(VfsPath { inner })
    }

    /// Produces an iterator over the components of the path.
    /// In case the path is the root, an empty iterator is returned.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|c| !c.is_empty())
    }

    /// Returns the final component of the path, if there is one.
    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }
}

impl FromStr for VfsPath {
    type Err = InvalidComponent;

    /// Accepts paths with or without a leading slash. `/` and the empty
    /// string are the root.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('/').unwrap_or(s);
        if s.is_empty() {
            return Ok(VfsPath::root());
        }

        for component in s.split('/') {
            validate_component(component)?;
        }

        Ok(VfsPath {
            inner: s.to_string(),
        })
    }
}

impl Debug for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.to_string(), f)
    }
}

impl Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "/{}", self.inner)
    }
}
