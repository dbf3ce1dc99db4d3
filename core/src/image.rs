//! Image references and the delete/keep/replace transition applied on update.
//!
//! An event points at most one image record. Image bytes live with the
//! external image collaborator; this module only decides which reference an
//! event ends up with and which record becomes unreferenced.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a stored image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    /// Creates a new random `ImageId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `ImageId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An image record: identifier plus storage path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Image identifier
    pub id: ImageId,
    /// Path understood by the image collaborator
    pub path: String,
}

impl ImageRef {
    /// Create an image reference.
    #[must_use]
    pub fn new(id: ImageId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }
}

/// Requested change to an event's image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageChange {
    /// Leave the current image untouched
    Keep,
    /// Remove the current image
    Delete,
    /// Point the event at a new image
    Replace(ImageRef),
}

impl ImageChange {
    /// Interpret an update request. Deletion wins over a supplied image.
    ///
    /// # Examples
    ///
    /// ```
    /// use treffly_core::image::{ImageChange, ImageId, ImageRef};
    ///
    /// let upload = ImageRef::new(ImageId::new(), "events/a.png");
    /// assert_eq!(ImageChange::from_request(Some(upload.clone()), true), ImageChange::Delete);
    /// assert_eq!(ImageChange::from_request(None, false), ImageChange::Keep);
    /// assert_eq!(
    ///     ImageChange::from_request(Some(upload.clone()), false),
    ///     ImageChange::Replace(upload)
    /// );
    /// ```
    #[must_use]
    pub fn from_request(new_image: Option<ImageRef>, delete_image: bool) -> Self {
        match (delete_image, new_image) {
            (true, _) => Self::Delete,
            (false, None) => Self::Keep,
            (false, Some(image)) => Self::Replace(image),
        }
    }

    /// Resolve against the event's current image.
    ///
    /// Replacing an image with the same identifier keeps the current record.
    #[must_use]
    pub fn resolve(self, current: Option<ImageRef>) -> ImageTransition {
        match self {
            Self::Keep => ImageTransition {
                effective: current,
                inserted: None,
                released: None,
            },
            Self::Delete => ImageTransition {
                effective: None,
                inserted: None,
                released: current,
            },
            Self::Replace(image) if current.as_ref().is_some_and(|c| c.id == image.id) => {
                ImageTransition {
                    effective: current,
                    inserted: None,
                    released: None,
                }
            }
            Self::Replace(image) => ImageTransition {
                effective: Some(image.clone()),
                inserted: Some(image),
                released: current,
            },
        }
    }
}

/// Effective image reference plus the records to write and release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageTransition {
    /// Reference the event holds after the update
    pub effective: Option<ImageRef>,
    /// Record to insert before repointing the event
    pub inserted: Option<ImageRef>,
    /// Record no longer referenced after the update
    pub released: Option<ImageRef>,
}

impl ImageTransition {
    /// Whether the update leaves the image reference as it was.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        self.inserted.is_none() && self.released.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn image(path: &str) -> ImageRef {
        ImageRef::new(ImageId::new(), path)
    }

    #[test]
    fn test_keep_retains_current() {
        let current = image("events/old.png");
        let transition = ImageChange::Keep.resolve(Some(current.clone()));

        assert_eq!(transition.effective, Some(current));
        assert!(transition.is_unchanged());
    }

    #[test]
    fn test_delete_releases_current() {
        let current = image("events/old.png");
        let transition = ImageChange::Delete.resolve(Some(current.clone()));

        assert_eq!(transition.effective, None);
        assert_eq!(transition.inserted, None);
        assert_eq!(transition.released, Some(current));
    }

    #[test]
    fn test_replace_swaps_and_releases_old() {
        let current = image("events/old.png");
        let upload = image("events/new.png");
        let transition = ImageChange::Replace(upload.clone()).resolve(Some(current.clone()));

        assert_eq!(transition.effective, Some(upload.clone()));
        assert_eq!(transition.inserted, Some(upload));
        assert_eq!(transition.released, Some(current));
    }

    #[test]
    fn test_replace_without_current_releases_nothing() {
        let upload = image("events/new.png");
        let transition = ImageChange::Replace(upload.clone()).resolve(None);

        assert_eq!(transition.effective, Some(upload));
        assert_eq!(transition.released, None);
    }

    #[test]
    fn test_replace_with_same_id_is_noop() {
        let current = image("events/old.png");
        let transition = ImageChange::Replace(current.clone()).resolve(Some(current.clone()));

        assert_eq!(transition.effective, Some(current));
        assert!(transition.is_unchanged());
    }

    fn arb_image() -> impl Strategy<Value = Option<ImageRef>> {
        proptest::option::of(
            (any::<u128>(), "[a-z]{1,12}").prop_map(|(bits, name)| {
                ImageRef::new(ImageId::from_uuid(Uuid::from_u128(bits)), format!("events/{name}.png"))
            }),
        )
    }

    proptest! {
        #[test]
        fn prop_delete_flag_always_clears_image(current in arb_image(), upload in arb_image()) {
            let transition = ImageChange::from_request(upload, true).resolve(current);
            prop_assert_eq!(transition.effective, None);
            prop_assert_eq!(transition.inserted, None);
        }

        #[test]
        fn prop_no_upload_preserves_image(current in arb_image()) {
            let transition = ImageChange::from_request(None, false).resolve(current.clone());
            prop_assert_eq!(&transition.effective, &current);
            prop_assert!(transition.is_unchanged());
        }

        #[test]
        fn prop_released_never_equals_effective(current in arb_image(), upload in arb_image(), delete in any::<bool>()) {
            let transition = ImageChange::from_request(upload, delete).resolve(current);
            if let (Some(released), Some(effective)) = (&transition.released, &transition.effective) {
                prop_assert_ne!(released.id, effective.id);
            }
        }
    }
}
