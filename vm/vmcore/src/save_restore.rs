// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Traits and types for save/restore support.
//!
//! To implement save/restore for your device:
//!
//! 1. Define a saved state type. This type needs to be stable across
//!    releases, so you should not share types with your implementation even if
//!    they are currently identical.
//!
//! 2. Derive `Serialize` and `Deserialize` on it, and implement
//!    [`SavedStateRoot`] on the root type. The root's `PACKAGE` tag and
//!    `VERSION` are stored in the blob and checked on restore, so neither can
//!    change without breaking existing saved states. Bump `VERSION` (and
//!    possibly `MIN_VERSION`) when the layout changes.
//!
//! 3. Implement [`SaveRestore`], which specifies the associated saved state
//!    type and the `save` and `restore` methods acting on it.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Implemented by objects which can be saved/restored
pub trait SaveRestore {
    /// The concrete saved state type.
    type SavedState;

    /// Saves the object's state.
    fn save(&mut self) -> Result<Self::SavedState, SaveError>;
    /// Restores the object's state.
    fn restore(&mut self, state: Self::SavedState) -> Result<(), RestoreError>;
}

/// Implemented by "root" saved state types, the ones that get wrapped into a
/// [`SavedStateBlob`].
pub trait SavedStateRoot: Serialize + DeserializeOwned {
    /// Tag identifying the saved state type. Part of the serialized state.
    const PACKAGE: &'static str;
    /// The version written by [`SavedStateBlob::new`].
    const VERSION: u32;
    /// The oldest version [`SavedStateBlob::parse`] accepts.
    const MIN_VERSION: u32 = Self::VERSION;
}

/// An opaque, versioned saved state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedStateBlob {
    package: String,
    version: u32,
    payload: serde_json::Value,
}

impl SavedStateBlob {
    /// Encodes `data` into a blob tagged with its package and version.
    pub fn new<T: SavedStateRoot>(data: T) -> Result<Self, SaveError> {
        Ok(Self {
            package: T::PACKAGE.to_owned(),
            version: T::VERSION,
            payload: serde_json::to_value(data).map_err(|e| SaveError::Other(e.into()))?,
        })
    }

    /// The package tag this blob was saved with.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The version this blob was saved with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Decodes the blob into `T`, checking the package tag and version.
    pub fn parse<T: SavedStateRoot>(&self) -> Result<T, RestoreError> {
        if self.package != T::PACKAGE {
            return Err(RestoreError::PackageMismatch {
                expected: T::PACKAGE,
                found: self.package.clone(),
            });
        }
        if !(T::MIN_VERSION..=T::VERSION).contains(&self.version) {
            return Err(RestoreError::UnsupportedVersion {
                package: T::PACKAGE,
                version: self.version,
                min: T::MIN_VERSION,
                max: T::VERSION,
            });
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| RestoreError::InvalidSavedState(e.into()))
    }
}

/// A restore error.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// the blob belongs to a different saved state type
    #[error("saved state package mismatch: expected {expected}, found {found}")]
    PackageMismatch {
        /// The package the restoring object understands.
        expected: &'static str,
        /// The package found in the blob.
        found: String,
    },
    /// the blob's version is outside the supported range
    #[error("unsupported {package} saved state version {version} (supported {min}..={max})")]
    UnsupportedVersion {
        /// The package being restored.
        package: &'static str,
        /// The version found in the blob.
        version: u32,
        /// Oldest supported version.
        min: u32,
        /// Newest supported version.
        max: u32,
    },
    /// custom saved state corruption error
    #[error("saved state is invalid")]
    InvalidSavedState(#[source] anyhow::Error),
}

/// A save error.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// Save failed due to some other error.
    #[error(transparent)]
    Other(anyhow::Error),
}
