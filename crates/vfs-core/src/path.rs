//! Reference-counted path handles.
//!
//! [`VfsPath`] wraps a [`Utf8PathBuf`] in an [`Arc`] so that the same path can
//! be shared between a caller, a watch handle and an in-flight notification
//! without copying. Cloning a `VfsPath` takes a new reference.
//!
//! # Examples
//!
//! ```
//! use vfs_core::VfsPath;
//!
//! let dir = VfsPath::new("/home/user/docs");
//! let file = dir.relative("notes.txt");
//!
//! assert_eq!(file.as_str(), "/home/user/docs/notes.txt");
//! assert_eq!(file.parent(), Some(dir));
//! assert_eq!(file.name(), Some("notes.txt"));
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::{FromPathBufError, Utf8Path, Utf8PathBuf};

/// A cheap, shareable, UTF-8 filesystem path.
///
/// Equality and hashing follow [`Utf8Path`] component comparison, so
/// `/a/b/` and `/a/b` are the same path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsPath(Arc<Utf8PathBuf>);

impl VfsPath {
    /// Creates a new path reference.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(Arc::new(path.into()))
    }

    /// Returns the underlying path.
    #[inline]
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    /// Returns the path as a standard library [`Path`].
    #[inline]
    #[must_use]
    pub fn as_std_path(&self) -> &Path {
        self.0.as_std_path()
    }

    /// Returns the path as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns `true` if this path has no parent.
    ///
    /// # Examples
    ///
    /// ```
    /// use vfs_core::VfsPath;
    ///
    /// assert!(VfsPath::new("/").is_root());
    /// assert!(!VfsPath::new("/tmp").is_root());
    /// ```
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.parent().is_none_or(|p| p.as_str().is_empty())
    }

    /// Returns the parent directory, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .map(Self::new)
    }

    /// Returns the last path component.
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Constructs the path of the child `name` below this path.
    #[must_use]
    pub fn relative(&self, name: &str) -> Self {
        Self::new(self.0.join(name))
    }

    /// Returns the number of live references to this path.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<Utf8Path> for VfsPath {
    fn as_ref(&self) -> &Utf8Path {
        &self.0
    }
}

impl From<&str> for VfsPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&Utf8Path> for VfsPath {
    fn from(path: &Utf8Path) -> Self {
        Self::new(path)
    }
}

impl From<Utf8PathBuf> for VfsPath {
    fn from(path: Utf8PathBuf) -> Self {
        Self::new(path)
    }
}

impl TryFrom<PathBuf> for VfsPath {
    type Error = FromPathBufError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Utf8PathBuf::try_from(path).map(Self::new)
    }
}
