//! Fan-out cache invalidation.
//!
//! Each entity kind maps to a fixed set of keys and patterns that must be
//! dropped together when that entity changes. The sets are pure functions of
//! the ids so they can be inspected and tested without a store. Cached HTTP
//! responses under the default prefix are dropped alongside the data keys
//! they render. Every invalidation is best-effort and idempotent.

use crate::keys::{self, patterns};
use crate::safe::SafeCache;
use std::fmt::Display;
use tracing::info;

/// Keys and patterns to drop for one change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Exact keys, deleted in one round trip.
    pub keys: Vec<String>,
    /// Glob patterns, each deleted by cursor scan.
    pub patterns: Vec<String>,
}

/// Fan-out of a listing change.
#[must_use]
pub fn listing_fan_out(listing_id: impl Display) -> FanOut {
    let id = listing_id.to_string();
    FanOut {
        keys: vec![
            keys::listing(&id),
            keys::reviews(&id),
            keys::review_stats(&id),
            keys::listing_stats(&id),
            keys::listing_bookings(&id),
        ],
        patterns: [vec![patterns::all_listings()], http(patterns::http_collection("listings"))].concat(),
    }
}

/// Fan-out of a user change.
#[must_use]
pub fn user_fan_out(user_id: impl Display) -> FanOut {
    let id = user_id.to_string();
    FanOut {
        keys: vec![
            keys::user(&id),
            keys::user_profile(&id),
            keys::user_bookings(&id),
            keys::listings_by_owner(&id),
            keys::user_reviews(&id),
            keys::dashboard_stats(&id),
            keys::favorites(&id),
            keys::notifications(&id),
            keys::unread_notifications(&id),
            keys::unread_messages(&id),
        ],
        patterns: http(patterns::http_resource("users", &id)),
    }
}

/// Fan-out of a booking change.
#[must_use]
pub fn booking_fan_out(
    booking_id: impl Display,
    user_id: impl Display,
    listing_id: impl Display,
) -> FanOut {
    let booking_id = booking_id.to_string();
    let user_id = user_id.to_string();
    let listing_id = listing_id.to_string();
    FanOut {
        keys: vec![
            keys::booking(&booking_id),
            keys::user_bookings(&user_id),
            keys::listing_bookings(&listing_id),
            keys::dashboard_stats(&user_id),
        ],
        patterns: [
            vec![patterns::listing_availability(&listing_id)],
            http(patterns::http_resource("bookings", &booking_id)),
            http(patterns::http_resource("users", &user_id)),
            http(patterns::http_resource("listings", &listing_id)),
        ]
        .concat(),
    }
}

/// Fan-out of a review change.
#[must_use]
pub fn review_fan_out(listing_id: impl Display, user_id: Option<&str>) -> FanOut {
    let id = listing_id.to_string();
    let mut keys = vec![keys::reviews(&id), keys::review_stats(&id), keys::listing(&id)];
    if let Some(user_id) = user_id {
        keys.push(keys::user_reviews(user_id));
    }
    FanOut {
        keys,
        patterns: http(patterns::http_resource("listings", &id)),
    }
}

fn http(patterns: [String; 3]) -> Vec<String> {
    patterns.to_vec()
}

/// Invalidation service over the safe cache facade.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    cache: SafeCache,
}

impl CacheInvalidator {
    /// Creates an invalidator sharing the given cache.
    #[must_use]
    pub const fn new(cache: SafeCache) -> Self {
        Self { cache }
    }

    /// Applies a fan-out. Returns the number of keys removed.
    pub async fn apply(&self, fan_out: &FanOut) -> u64 {
        let mut deleted = self.cache.del_many(&fan_out.keys).await;
        for pattern in &fan_out.patterns {
            deleted += self.cache.del_pattern(pattern).await;
        }
        deleted
    }

    /// A listing changed.
    pub async fn listing(&self, listing_id: impl Display) -> u64 {
        let deleted = self.apply(&listing_fan_out(&listing_id)).await;
        info!(listing_id = %listing_id, deleted, "Invalidated listing cache");
        deleted
    }

    /// A user changed.
    pub async fn user(&self, user_id: impl Display) -> u64 {
        let deleted = self.apply(&user_fan_out(&user_id)).await;
        info!(user_id = %user_id, deleted, "Invalidated user cache");
        deleted
    }

    /// A booking changed.
    pub async fn booking(
        &self,
        booking_id: impl Display,
        user_id: impl Display,
        listing_id: impl Display,
    ) -> u64 {
        let deleted = self
            .apply(&booking_fan_out(&booking_id, user_id, listing_id))
            .await;
        info!(booking_id = %booking_id, deleted, "Invalidated booking cache");
        deleted
    }

    /// A review changed. The author's review list is dropped too when known.
    pub async fn review(&self, listing_id: impl Display, user_id: Option<&str>) -> u64 {
        let deleted = self.apply(&review_fan_out(&listing_id, user_id)).await;
        info!(listing_id = %listing_id, deleted, "Invalidated review cache");
        deleted
    }

    /// Search results are stale.
    pub async fn search(&self) -> u64 {
        let deleted = self
            .apply(&FanOut {
                keys: Vec::new(),
                patterns: [
                    vec![patterns::all_search(), patterns::listing_searches()],
                    http(patterns::http_collection("search")),
                    http(patterns::http_resource("listings", "search")),
                ]
                .concat(),
            })
            .await;
        info!(deleted, "Invalidated search cache");
        deleted
    }

    /// The amenity catalogue changed.
    pub async fn amenities(&self) -> u64 {
        let deleted = self
            .apply(&FanOut {
                keys: vec![keys::amenities()],
                patterns: [
                    vec![patterns::all_amenities()],
                    http(patterns::http_collection("amenities")),
                ]
                .concat(),
            })
            .await;
        info!(deleted, "Invalidated amenities cache");
        deleted
    }

    /// Statistics are stale: one user's dashboard, or every stats entry.
    pub async fn stats(&self, user_id: Option<&str>) -> u64 {
        let deleted = match user_id {
            Some(user_id) => self.cache.del(&keys::dashboard_stats(user_id)).await,
            None => self.cache.del_pattern(&patterns::all_stats()).await,
        };
        info!(deleted, "Invalidated stats cache");
        deleted
    }

    /// A user's favorites changed.
    pub async fn favorites(&self, user_id: impl Display) -> u64 {
        let deleted = self.cache.del(&keys::favorites(&user_id)).await;
        info!(user_id = %user_id, deleted, "Invalidated favorites cache");
        deleted
    }

    /// A user's notifications changed.
    pub async fn notifications(&self, user_id: impl Display) -> u64 {
        let deleted = self
            .cache
            .del_many(&[
                keys::notifications(&user_id),
                keys::unread_notifications(&user_id),
            ])
            .await;
        info!(user_id = %user_id, deleted, "Invalidated notifications cache");
        deleted
    }

    /// Drops every key that mentions `id` as a segment, whatever its kind.
    pub async fn referencing(&self, id: impl Display) -> u64 {
        let deleted = self
            .apply(&FanOut {
                keys: Vec::new(),
                patterns: patterns::referencing(&id).to_vec(),
            })
            .await;
        info!(id = %id, deleted, "Invalidated keys referencing id");
        deleted
    }

    /// Escape hatch: wipes the whole store database.
    pub async fn all(&self) -> bool {
        let flushed = self.cache.flush_all().await;
        info!(flushed, "Invalidated all cache");
        flushed
    }
}
