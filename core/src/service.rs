//! Event service: orchestration of repository transactions.
//!
//! The service enforces the rules that are not storage constraints:
//!
//! - only the owner may update or delete an event (administrators bypass this
//!   through [`EventService::admin_delete`])
//! - owners cannot subscribe to their own event
//! - a full event rejects subscribers with [`EventError::EventFull`]
//! - `is_owner` / `is_participant` are derived per request
//!
//! Every public operation runs under the configured request deadline. When the
//! deadline expires the in-flight future is dropped, which rolls back any open
//! transaction, and [`EventError::Timeout`] is returned. No retries happen here.

use crate::config::ServiceConfig;
use crate::environment::Clock;
use crate::error::{EventError, Result};
use crate::feed::{HomeFeed, RecommendationSource};
use crate::image::ImageChange;
use crate::repository::{Admission, EventRepository, OwnedLookup};
use crate::types::{
    Coordinates, CreateEvent, EventDetails, EventId, EventRecord, EventRewrite, EventView,
    InviteToken, ListFilter, NewEvent, NewPremiumOrder, OrderId, PremiumOrder, Tag, UpdateEvent,
    UserId,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

/// Orchestrates event lifecycle, subscriptions, the home feed and premium
/// orders on top of an injected [`EventRepository`].
#[derive(Clone)]
pub struct EventService {
    repository: Arc<dyn EventRepository>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
}

impl EventService {
    /// Create a new event service.
    ///
    /// # Arguments
    ///
    /// * `repository` - Transactional event store
    /// * `clock` - Time source for creation timestamps and "upcoming" checks
    /// * `config` - Deadline and feed settings
    #[must_use]
    pub fn new(
        repository: Arc<dyn EventRepository>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
        }
    }

    /// Run `operation` under the request deadline.
    async fn within_deadline<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis(), "Operation abandoned at deadline");
                Err(EventError::Timeout(timeout))
            }
        }
    }

    fn ensure_upcoming(&self, details: &EventDetails) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        if details.date <= now {
            return Err(EventError::EventDateInPast);
        }
        Ok(now)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an event together with its image and tags.
    ///
    /// The creator owns the event and is not subscribed to it. Private events
    /// receive a fresh invitation token.
    ///
    /// # Errors
    ///
    /// - `EventDateInPast`: date is not in the future
    /// - `Storage`: the create transaction failed; nothing was written
    #[tracing::instrument(skip(self, request), fields(owner = %request.owner))]
    pub async fn create(&self, request: CreateEvent) -> Result<EventView> {
        self.within_deadline(async {
            let now = self.ensure_upcoming(&request.details)?;
            let invite_token = request.details.is_private.then(InviteToken::generate);

            let record = self
                .repository
                .create_event_tx(NewEvent {
                    details: request.details,
                    tags: request.tags,
                    owner: request.owner,
                    image: request.image,
                    invite_token,
                    created_at: now,
                })
                .await?;

            tracing::info!(event_id = %record.id, "Event created");
            Ok(EventView::new(record, true, false))
        })
        .await
    }

    /// Update an event owned by the caller.
    ///
    /// The image reference is resolved inside the write transaction:
    /// `delete_image` removes it, no upload keeps it, an upload replaces it.
    ///
    /// # Errors
    ///
    /// - `NotFoundOrForbidden`: event missing or not owned by the caller
    /// - `EventDateInPast`: new date is not in the future
    /// - `Storage`: the update transaction failed; nothing was written
    #[tracing::instrument(skip(self, request), fields(event_id = %request.event_id, editor = %request.editor))]
    pub async fn update(&self, request: UpdateEvent) -> Result<EventView> {
        self.within_deadline(async {
            let event_id = request.event_id;
            let current = match self.repository.find_owned_event(event_id, request.editor).await? {
                OwnedLookup::Found(record) => record,
                OwnedLookup::NotFoundOrUnauthorized => {
                    return Err(EventError::NotFoundOrForbidden(event_id));
                }
            };
            self.ensure_upcoming(&request.details)?;

            let image = ImageChange::from_request(request.new_image, request.delete_image);
            let invite_token = request
                .details
                .is_private
                .then(|| current.invite_token.unwrap_or_else(InviteToken::generate));

            let transition = self
                .repository
                .update_event_tx(EventRewrite {
                    event_id,
                    details: request.details,
                    tags: request.tags,
                    image,
                    invite_token,
                })
                .await?;

            if let Some(image) = transition.released {
                tracing::info!(
                    event_id = %event_id,
                    image_id = %image.id,
                    path = %image.path,
                    "Image reference released"
                );
            }
            tracing::info!(event_id = %event_id, "Event updated");

            // Re-read for the response; the write above has already committed.
            let record = self
                .repository
                .get_event(event_id, Some(request.editor), None)
                .await?;
            Ok(EventView::new(record, true, false))
        })
        .await
    }

    /// Delete an event owned by the caller.
    ///
    /// # Errors
    ///
    /// - `Forbidden`: caller does not own the event (or it does not exist)
    /// - `Storage`: the delete transaction failed
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, event_id: EventId, caller: UserId) -> Result<()> {
        self.within_deadline(async {
            match self.repository.find_owned_event(event_id, caller).await? {
                OwnedLookup::Found(_) => {}
                OwnedLookup::NotFoundOrUnauthorized => {
                    return Err(EventError::forbidden(event_id, caller));
                }
            }

            self.repository.delete_event(event_id).await?;
            tracing::info!(event_id = %event_id, "Event deleted by owner");
            Ok(())
        })
        .await
    }

    /// Delete any event, bypassing the ownership check.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    #[tracing::instrument(skip(self))]
    pub async fn admin_delete(&self, event_id: EventId) -> Result<()> {
        self.within_deadline(async {
            self.repository.delete_event(event_id).await?;
            tracing::info!(event_id = %event_id, "Event deleted by administrator");
            Ok(())
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reading
    // ═══════════════════════════════════════════════════════════════════════

    /// Load an event for a viewer (`None` = guest).
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `InviteTokenMismatch`: private event and no access
    #[tracing::instrument(skip(self, token))]
    pub async fn get_event(
        &self,
        event_id: EventId,
        viewer: Option<UserId>,
        token: Option<InviteToken>,
    ) -> Result<EventView> {
        self.within_deadline(self.load_view(event_id, viewer, token.as_ref()))
            .await
    }

    async fn load_view(
        &self,
        event_id: EventId,
        viewer: Option<UserId>,
        token: Option<&InviteToken>,
    ) -> Result<EventView> {
        let record = self.repository.get_event(event_id, viewer, token).await?;
        let is_participant = match viewer {
            Some(user) => self.repository.is_participant(event_id, user).await?,
            None => false,
        };
        let is_owner = viewer.is_some_and(|user| record.is_owned_by(user));
        Ok(EventView::new(record, is_owner, is_participant))
    }

    /// Events among `ids` that `viewer` has joined; empty for guests.
    async fn joined(&self, viewer: Option<UserId>, ids: Vec<EventId>) -> Result<BTreeSet<EventId>> {
        match viewer {
            Some(user) if !ids.is_empty() => self.repository.joined_events(user, &ids).await,
            _ => Ok(BTreeSet::new()),
        }
    }

    /// Public upcoming events matching `filter`.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    #[tracing::instrument(skip(self, filter))]
    pub async fn list(&self, filter: ListFilter, viewer: Option<UserId>) -> Result<Vec<EventView>> {
        self.within_deadline(async {
            let records = self.repository.list_events(&filter, self.clock.now()).await?;
            let ids = records.iter().map(|record| record.id).collect();
            let joined = self.joined(viewer, ids).await?;
            Ok(present(records, viewer, |id| joined.contains(&id)))
        })
        .await
    }

    /// Every event matching `filter`, including private and past ones.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    #[tracing::instrument(skip(self, filter))]
    pub async fn list_all(&self, filter: ListFilter) -> Result<Vec<EventView>> {
        self.within_deadline(async {
            let records = self
                .repository
                .list_all_events(&filter, self.clock.now())
                .await?;
            Ok(present(records, None, |_| false))
        })
        .await
    }

    /// Upcoming events the user joined.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    #[tracing::instrument(skip(self))]
    pub async fn upcoming_user_events(&self, user: UserId) -> Result<Vec<EventView>> {
        self.within_deadline(async {
            let records = self
                .repository
                .upcoming_user_events(user, self.clock.now())
                .await?;
            Ok(present(records, Some(user), |_| true))
        })
        .await
    }

    /// Past events the user joined.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    #[tracing::instrument(skip(self))]
    pub async fn past_user_events(&self, user: UserId) -> Result<Vec<EventView>> {
        self.within_deadline(async {
            let records = self
                .repository
                .past_user_events(user, self.clock.now())
                .await?;
            Ok(present(records, Some(user), |_| true))
        })
        .await
    }

    /// Events the user owns.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    #[tracing::instrument(skip(self))]
    pub async fn owned_user_events(&self, user: UserId) -> Result<Vec<EventView>> {
        self.within_deadline(async {
            let records = self.repository.owned_user_events(user).await?;
            Ok(present(records, Some(user), |_| false))
        })
        .await
    }

    /// The tag vocabulary.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    pub async fn tags(&self) -> Result<Vec<Tag>> {
        self.within_deadline(self.repository.list_tags()).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ═══════════════════════════════════════════════════════════════════════

    /// Join an event.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `InviteTokenMismatch`: private event and token does not match
    /// - `OwnerCannotSubscribe`: caller owns the event
    /// - `EventFull`: no slot left at commit time
    #[tracing::instrument(skip(self, token))]
    pub async fn subscribe(
        &self,
        event_id: EventId,
        user: UserId,
        token: Option<InviteToken>,
    ) -> Result<EventView> {
        self.within_deadline(async {
            let record = self
                .repository
                .get_event(event_id, Some(user), token.as_ref())
                .await?;
            if record.is_owned_by(user) {
                return Err(EventError::OwnerCannotSubscribe(event_id));
            }

            match self.repository.subscribe(event_id, user, token.as_ref()).await? {
                Admission::Full => {
                    tracing::warn!(event_id = %event_id, user = %user, "Subscription rejected: event is full");
                    return Err(EventError::EventFull(event_id));
                }
                Admission::Admitted => {
                    tracing::info!(event_id = %event_id, user = %user, "User subscribed");
                }
                Admission::AlreadyParticipant => {
                    tracing::debug!(event_id = %event_id, user = %user, "User already subscribed");
                }
            }

            self.load_view(event_id, Some(user), token.as_ref()).await
        })
        .await
    }

    /// Leave an event. Leaving an event the user never joined succeeds.
    ///
    /// Access is checked before the membership is removed, so a member leaving
    /// a private event without its token still receives the refreshed view.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `InviteTokenMismatch`: private event not visible to the user
    #[tracing::instrument(skip(self, token))]
    pub async fn unsubscribe(
        &self,
        event_id: EventId,
        user: UserId,
        token: Option<InviteToken>,
    ) -> Result<EventView> {
        self.within_deadline(async {
            let record = self
                .repository
                .get_event(event_id, Some(user), token.as_ref())
                .await?;

            self.repository.unsubscribe(event_id, user).await?;
            tracing::info!(event_id = %event_id, user = %user, "User unsubscribed");

            // Read through the owner's access; the caller was admitted above.
            let refreshed = self
                .repository
                .get_event(event_id, Some(record.owner.id), None)
                .await?;
            let is_owner = refreshed.is_owned_by(user);
            Ok(EventView::new(refreshed, is_owner, false))
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Home Feed
    // ═══════════════════════════════════════════════════════════════════════

    /// Home feed for a signed-in user.
    ///
    /// # Errors
    ///
    /// - `Storage`: any of the four source queries failed
    pub async fn home_for_user(&self, user: UserId, near: Coordinates) -> Result<HomeFeed> {
        self.home(Some(user), near).await
    }

    /// Home feed for a guest.
    ///
    /// # Errors
    ///
    /// - `Storage`: any of the four source queries failed
    pub async fn home_for_guest(&self, near: Coordinates) -> Result<HomeFeed> {
        self.home(None, near).await
    }

    /// Home feed; the presence of a viewer identity selects personalized
    /// recommendations.
    ///
    /// # Errors
    ///
    /// - `Storage`: any of the four source queries failed
    #[tracing::instrument(skip(self, near))]
    pub async fn home(&self, viewer: Option<UserId>, near: Coordinates) -> Result<HomeFeed> {
        self.within_deadline(async {
            let now = self.clock.now();
            let limit = self.config.home_feed_limit;
            let repository = &self.repository;

            let recommended = async {
                match RecommendationSource::for_viewer(viewer, near) {
                    RecommendationSource::User { user, near } => {
                        repository
                            .user_recommended_events(user, near, now, limit)
                            .await
                    }
                    RecommendationSource::Guest { near } => {
                        repository.guest_recommended_events(near, now, limit).await
                    }
                }
            };

            let (premium, recommended, latest, popular) = futures::try_join!(
                repository.premium_events(now, limit),
                recommended,
                repository.latest_events(now, limit),
                repository.popular_events(now, limit),
            )?;

            let shown = [&premium, &recommended, &latest, &popular]
                .into_iter()
                .flatten()
                .map(|record| record.id)
                .collect();
            let joined = self.joined(viewer, shown).await?;
            let is_participant = |id: EventId| joined.contains(&id);

            Ok(HomeFeed::assemble(
                present(premium, viewer, is_participant),
                present(recommended, viewer, is_participant),
                present(latest, viewer, is_participant),
                present(popular, viewer, is_participant),
            ))
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Premium Orders
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a pending premium order.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: referenced event does not exist
    #[tracing::instrument(skip(self, order), fields(event_id = %order.event_id, user = %order.user_id))]
    pub async fn create_premium_order(&self, order: NewPremiumOrder) -> Result<PremiumOrder> {
        self.within_deadline(async {
            let order = self
                .repository
                .create_premium_order(order, self.clock.now())
                .await?;
            tracing::info!(order_id = %order.id, "Premium order created");
            Ok(order)
        })
        .await
    }

    /// Load a premium order.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`: no such order
    #[tracing::instrument(skip(self))]
    pub async fn get_premium_order(&self, order_id: OrderId) -> Result<PremiumOrder> {
        self.within_deadline(self.repository.get_premium_order(order_id))
            .await
    }

    /// Complete a premium order, the only way an event becomes premium.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`: no such order
    #[tracing::instrument(skip(self))]
    pub async fn complete_premium_order(&self, order_id: OrderId) -> Result<()> {
        self.within_deadline(async {
            self.repository.complete_premium_order(order_id).await?;
            tracing::info!(order_id = %order_id, "Premium order completed");
            Ok(())
        })
        .await
    }
}

fn present(
    records: Vec<EventRecord>,
    viewer: Option<UserId>,
    is_participant: impl Fn(EventId) -> bool,
) -> Vec<EventView> {
    records
        .into_iter()
        .map(|record| {
            let joined = is_participant(record.id);
            EventView::listed(record, viewer, joined)
        })
        .collect()
}
