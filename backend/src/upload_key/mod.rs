//! Storage key allocation for direct uploads
//!
//! Keys look like `uploads/<uuid-v4><extension>`. Allocation is pure: it touches neither
//! object storage nor the ledger.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Prefix every upload key is namespaced under
pub const UPLOAD_PREFIX: &str = "uploads/";

/// Errors raised while allocating or parsing storage keys
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The file extension is not on the allow-list
    #[error("file extension {0:?} is not supported for upload")]
    UnsupportedType(String),

    /// A client-supplied key is not a well-formed upload key
    #[error("invalid upload key {0:?}")]
    InvalidKey(String),
}

/// Image types accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    /// JPEG image
    Jpeg,
}

impl ImageType {
    /// Every supported type
    pub const ALL: [Self; 1] = [Self::Jpeg];

    /// Looks up a type by its file extension, leading dot included
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.extension() == extension)
    }

    /// File extension, leading dot included
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpeg",
        }
    }

    /// MIME type objects of this type must be written with
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// Identifier of one logical upload in object storage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    key: String,
    image_type: ImageType,
}

impl StorageKey {
    /// Parses a key previously handed out by [`KeyAllocator::allocate`]
    ///
    /// The key must live under [`UPLOAD_PREFIX`], have a non-empty single-segment stem and
    /// end in a supported extension. Whether it was actually allocated is not checked here.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKey` if the key does not have that shape
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let invalid = || KeyError::InvalidKey(raw.to_string());

        let name = raw.strip_prefix(UPLOAD_PREFIX).ok_or_else(invalid)?;
        let image_type = ImageType::ALL
            .into_iter()
            .find(|t| name.ends_with(t.extension()))
            .ok_or_else(invalid)?;
        let stem = &name[..name.len() - image_type.extension().len()];

        if stem.is_empty() || stem.contains('/') || stem.chars().any(char::is_control) {
            return Err(invalid());
        }

        Ok(Self {
            key: raw.to_string(),
            image_type,
        })
    }

    /// The key as stored in the bucket
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Image type implied by the key's extension
    #[must_use]
    pub const fn image_type(&self) -> ImageType {
        self.image_type
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl Serialize for StorageKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

/// Mints fresh storage keys for requested uploads
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyAllocator;

impl KeyAllocator {
    /// Allocates a new key for an upload with the given file extension
    ///
    /// The random component is a UUID v4 (122 bits from the OS RNG).
    ///
    /// # Errors
    ///
    /// Returns `KeyError::UnsupportedType` if the extension is not on the allow-list. No key
    /// is generated in that case.
    pub fn allocate(&self, extension: &str) -> Result<StorageKey, KeyError> {
        let image_type = ImageType::from_extension(extension)
            .ok_or_else(|| KeyError::UnsupportedType(extension.to_string()))?;

        Ok(StorageKey {
            key: format!("{UPLOAD_PREFIX}{}{}", Uuid::new_v4(), image_type.extension()),
            image_type,
        })
    }
}
