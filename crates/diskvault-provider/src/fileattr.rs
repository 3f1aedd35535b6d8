//! Contract for filesystem immutability attributes.
//!
//! The keystore container and every keyfile are pinned immutable outside the
//! narrow windows where they must change.

use std::error::Error;
use std::path::Path;

/// Abstraction over the host's file-attribute tooling.
pub trait FileAttributes {
    type Error: Error + Send + Sync + 'static;

    /// Set or clear the immutable attribute on `path`.
    fn set_immutable(&self, path: &Path, on: bool) -> Result<(), Self::Error>;

    /// Whether `path` currently carries the immutable attribute.
    fn is_immutable(&self, path: &Path) -> Result<bool, Self::Error>;
}
