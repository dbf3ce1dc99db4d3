//! Builders for event requests used across test suites.

#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use treffly_core::image::{ImageId, ImageRef};
use treffly_core::types::{
    Capacity, Coordinates, CreateEvent, EventDetails, EventView, TagId, UpdateEvent, UserId,
};

/// Coordinates from decimal literals, e.g. `point("51.6683", "39.1919")`.
#[must_use]
pub fn point(latitude: &str, longitude: &str) -> Coordinates {
    Coordinates::new(latitude.parse::<Decimal>().unwrap(), longitude.parse::<Decimal>().unwrap())
        .unwrap()
}

/// A fresh image reference under `events/`.
#[must_use]
pub fn image(name: &str) -> ImageRef {
    ImageRef::new(ImageId::new(), format!("events/{name}.png"))
}

/// Fluent builder for [`CreateEvent`].
///
/// Defaults: public, unlimited capacity, no tags, located at
/// `point("51.6683", "39.1919")`.
#[derive(Clone, Debug)]
pub struct EventBuilder {
    details: EventDetails,
    tags: BTreeSet<TagId>,
    owner: UserId,
    image: ImageRef,
}

impl EventBuilder {
    /// Start an event owned by `owner` taking place at `date`.
    #[must_use]
    pub fn new(owner: UserId, date: DateTime<Utc>) -> Self {
        Self {
            details: EventDetails {
                name: "Board games night".to_string(),
                description: "Bring your favourite game".to_string(),
                capacity: Capacity::Unlimited,
                location: point("51.6683", "39.1919"),
                address: "Plekhanovskaya 10".to_string(),
                date,
                is_private: false,
            },
            tags: BTreeSet::new(),
            owner,
            image: image("cover"),
        }
    }

    /// Set the name.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.details.name = name.to_string();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn described(mut self, description: &str) -> Self {
        self.details.description = description.to_string();
        self
    }

    /// Set the raw capacity (`0` = unlimited).
    #[must_use]
    pub fn capacity(mut self, capacity: i32) -> Self {
        self.details.capacity = Capacity::from_raw(capacity).unwrap();
        self
    }

    /// Set the location.
    #[must_use]
    pub const fn at(mut self, location: Coordinates) -> Self {
        self.details.location = location;
        self
    }

    /// Make the event private.
    #[must_use]
    pub const fn private(mut self) -> Self {
        self.details.is_private = true;
        self
    }

    /// Set the tag set.
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = i32>) -> Self {
        self.tags = tags.into_iter().map(TagId::new).collect();
        self
    }

    /// Set the image.
    #[must_use]
    pub fn image(mut self, image: ImageRef) -> Self {
        self.image = image;
        self
    }

    /// Finish the create request.
    #[must_use]
    pub fn build(self) -> CreateEvent {
        CreateEvent {
            details: self.details,
            tags: self.tags,
            owner: self.owner,
            image: self.image,
        }
    }
}

/// Update request that rewrites `event` unchanged on behalf of `editor`.
///
/// Callers adjust the fields they want to change.
#[must_use]
pub fn update_of(event: &EventView, editor: UserId) -> UpdateEvent {
    UpdateEvent {
        event_id: event.id,
        editor,
        details: event.details.clone(),
        tags: event.tags.iter().map(|tag| tag.id).collect(),
        new_image: None,
        delete_image: false,
    }
}
