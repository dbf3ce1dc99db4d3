//! Home feed assembly.
//!
//! The feed combines four independently fetched lists. Each list arrives
//! already ordered by its own source query:
//!
//! | List | Order |
//! |---|---|
//! | premium | date ascending |
//! | recommended | tag affinity then distance (users), distance (guests) |
//! | latest | creation time descending |
//! | popular | participant count descending |
//!
//! Assembly preserves each list's order and performs no cross-list
//! re-ranking or deduplication.

use crate::types::{Coordinates, EventView, UserId};
use serde::{Deserialize, Serialize};

/// The structured home feed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeFeed {
    /// Events with featured placement
    pub premium: Vec<EventView>,
    /// Events recommended for the viewer
    pub recommended: Vec<EventView>,
    /// Most recently created events
    pub latest: Vec<EventView>,
    /// Events with the most participants
    pub popular: Vec<EventView>,
}

impl HomeFeed {
    /// Combine four pre-ordered lists.
    #[must_use]
    pub const fn assemble(
        premium: Vec<EventView>,
        recommended: Vec<EventView>,
        latest: Vec<EventView>,
        popular: Vec<EventView>,
    ) -> Self {
        Self {
            premium,
            recommended,
            latest,
            popular,
        }
    }

    /// Total number of entries across all lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.premium.len() + self.recommended.len() + self.latest.len() + self.popular.len()
    }

    /// Whether every list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where the "recommended" list comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecommendationSource {
    /// Personalized for an identified user near a location
    User {
        /// Viewer
        user: UserId,
        /// Viewer location
        near: Coordinates,
    },
    /// Location only
    Guest {
        /// Viewer location
        near: Coordinates,
    },
}

impl RecommendationSource {
    /// Pick the source from the caller identity: no identity means guest.
    #[must_use]
    pub const fn for_viewer(viewer: Option<UserId>, near: Coordinates) -> Self {
        match viewer {
            Some(user) => Self::User { user, near },
            None => Self::Guest { near },
        }
    }
}
