//! Repository trait for the transactional event store.
//!
//! This module defines the storage contract the event service relies on. Every
//! operation that writes more than one row is a single transaction: it either
//! commits completely or leaves no trace.
//!
//! # Implementations
//!
//! - `PostgresEventRepository` (in `treffly-postgres`): production implementation
//! - `InMemoryEventRepository` (in `treffly-testing`): fast, deterministic testing
//!
//! # Ordering contract
//!
//! Feed and listing queries only return public events dated after `now`
//! (except [`EventRepository::list_all_events`]) and order results as follows:
//!
//! - `premium_events`: premium only, date ascending, then id
//! - `latest_events`: creation time descending, then id descending
//! - `popular_events`: participant count descending, date ascending, then id
//! - `guest_recommended_events`: distance ascending, then id
//! - `user_recommended_events`: excludes events the user owns or joined; tag
//!   affinity descending, distance ascending, then id
//! - `list_events`: distance ascending when `near` is set, otherwise date
//!   ascending, then id
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] instead of using `async fn` so the service can
//! hold an `Arc<dyn EventRepository>` injected at construction.

use crate::error::Result;
use crate::image::ImageTransition;
use crate::types::{
    Coordinates, EventId, EventRecord, EventRewrite, InviteToken, ListFilter, NewEvent,
    NewPremiumOrder, OrderId, PremiumOrder, Tag, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future returned by repository methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Result of a lookup scoped by event and expected owner.
///
/// A miss does not say whether the event exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnedLookup {
    /// Event exists and is owned by the caller
    Found(EventRecord),
    /// Event is missing or owned by someone else
    NotFoundOrUnauthorized,
}

/// Outcome of the capacity-checked join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Participant edge created
    Admitted,
    /// Edge already existed; nothing written
    AlreadyParticipant,
    /// Event was full at commit time; nothing written
    Full,
}

impl Admission {
    /// Whether the user is a participant after the join.
    #[must_use]
    pub const fn allowed(self) -> bool {
        !matches!(self, Self::Full)
    }
}

/// Transactional store for events, tags, participants, images and premium
/// orders.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; each call is self-contained and no
/// lock outlives the returned future.
pub trait EventRepository: Send + Sync {
    /// Insert image record, event record and tag links in one transaction.
    ///
    /// # Returns
    ///
    /// The fully joined event (owner username, image path, tags).
    ///
    /// # Errors
    ///
    /// - `Storage`: any insert failed (unknown owner or tag, duplicate image);
    ///   nothing was written
    fn create_event_tx(&self, event: NewEvent) -> BoxFuture<'_, EventRecord>;

    /// Rewrite scalar fields, replace the tag set and swap the image reference
    /// in one transaction.
    ///
    /// Ownership is checked by the caller. The requested [`ImageChange`](crate::image::ImageChange) is
    /// resolved against the image the event holds inside the transaction, so
    /// concurrent rewrites never release a record another rewrite still
    /// points at. Readers observe the event either fully old or fully new.
    ///
    /// # Returns
    ///
    /// The applied [`ImageTransition`].
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: event vanished before the write
    /// - `Storage`: transaction failed; nothing was written
    fn update_event_tx(&self, rewrite: EventRewrite) -> BoxFuture<'_, ImageTransition>;

    /// Load an event as seen by `viewer`.
    ///
    /// Private events are visible to their owner, their participants, and
    /// anyone presenting the matching invitation token.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `InviteTokenMismatch`: private event and no access
    fn get_event<'a>(
        &'a self,
        event_id: EventId,
        viewer: Option<UserId>,
        token: Option<&'a InviteToken>,
    ) -> BoxFuture<'a, EventRecord>;

    /// Load an event only if `owner` owns it.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn find_owned_event(&self, event_id: EventId, owner: UserId) -> BoxFuture<'_, OwnedLookup>;

    /// Delete an event with its participant edges, tag links and image record.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    fn delete_event(&self, event_id: EventId) -> BoxFuture<'_, ()>;

    /// Public upcoming events matching `filter`.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn list_events<'a>(
        &'a self,
        filter: &'a ListFilter,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Vec<EventRecord>>;

    /// Every event matching `filter`'s search, tags and date range, including
    /// private and past events, newest first.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn list_all_events<'a>(
        &'a self,
        filter: &'a ListFilter,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Vec<EventRecord>>;

    /// Capacity-checked join.
    ///
    /// Checking the roster size and inserting the edge happen atomically:
    /// concurrent subscribers racing for the last slot never both succeed.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `InviteTokenMismatch`: private event and token does not match
    fn subscribe<'a>(
        &'a self,
        event_id: EventId,
        user: UserId,
        token: Option<&'a InviteToken>,
    ) -> BoxFuture<'a, Admission>;

    /// Remove a participant edge. Removing a missing edge succeeds.
    ///
    /// # Errors
    ///
    /// - `Storage`: delete failed
    fn unsubscribe(&self, event_id: EventId, user: UserId) -> BoxFuture<'_, ()>;

    /// Whether `user` is in the participant roster.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn is_participant(&self, event_id: EventId, user: UserId) -> BoxFuture<'_, bool>;

    /// The subset of `events` whose roster contains `user`.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn joined_events<'a>(
        &'a self,
        user: UserId,
        events: &'a [EventId],
    ) -> BoxFuture<'a, BTreeSet<EventId>>;

    /// Upcoming premium events.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn premium_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Most recently created upcoming events.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn latest_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Upcoming events with the most participants.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn popular_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Upcoming events recommended for `user` near `near`.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn user_recommended_events(
        &self,
        user: UserId,
        near: Coordinates,
        now: DateTime<Utc>,
        limit: u32,
    ) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Upcoming events closest to `near`.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn guest_recommended_events(
        &self,
        near: Coordinates,
        now: DateTime<Utc>,
        limit: u32,
    ) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Upcoming events `user` joined, soonest first.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn upcoming_user_events(&self, user: UserId, now: DateTime<Utc>) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Past events `user` joined, most recent first.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn past_user_events(&self, user: UserId, now: DateTime<Utc>) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Events owned by `user`, soonest first.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn owned_user_events(&self, user: UserId) -> BoxFuture<'_, Vec<EventRecord>>;

    /// Record a pending premium order.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: the referenced event does not exist
    fn create_premium_order(
        &self,
        order: NewPremiumOrder,
        created_at: DateTime<Utc>,
    ) -> BoxFuture<'_, PremiumOrder>;

    /// Load a premium order.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`: no such order
    fn get_premium_order(&self, order_id: OrderId) -> BoxFuture<'_, PremiumOrder>;

    /// Mark the order completed and set the linked event's premium flag, in
    /// one transaction. No other event field changes.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`: no such order
    fn complete_premium_order(&self, order_id: OrderId) -> BoxFuture<'_, ()>;

    /// The tag vocabulary, ordered by id.
    ///
    /// # Errors
    ///
    /// - `Storage`: query failed
    fn list_tags(&self) -> BoxFuture<'_, Vec<Tag>>;
}
