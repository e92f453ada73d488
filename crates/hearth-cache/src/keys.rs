//! Cache key generators for consistent key naming.
//!
//! Every cached value is stored under a key produced here. Identifier
//! segments are escaped so that distinct ids never produce the same key and
//! never act as wildcards inside invalidation patterns.

use std::borrow::Cow;
use std::fmt::Display;

/// TTL tiers, in seconds.
pub mod ttl {
    use std::time::Duration;

    /// One minute.
    pub const SHORT: Duration = Duration::from_secs(60);
    /// Five minutes.
    pub const MEDIUM: Duration = Duration::from_secs(300);
    /// One hour.
    pub const LONG: Duration = Duration::from_secs(3_600);
    /// One day.
    pub const VERY_LONG: Duration = Duration::from_secs(86_400);
    /// One week.
    pub const WEEK: Duration = Duration::from_secs(604_800);
}

/// Percent-escapes the separator, the escape character and glob
/// metacharacters in one key segment.
#[must_use]
pub fn escape_segment(segment: &str) -> Cow<'_, str> {
    const RESERVED: &[char] = &[':', '%', '*', '?', '[', ']', '\\'];

    if !segment.contains(RESERVED) {
        return Cow::Borrowed(segment);
    }

    let mut escaped = String::with_capacity(segment.len() + 8);
    for c in segment.chars() {
        if RESERVED.contains(&c) {
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

fn key(kind: &str, id: impl Display) -> String {
    format!("{}:{}", kind, escape_segment(&id.to_string()))
}

// ============ Listings ============

/// A single listing.
#[must_use]
pub fn listing(id: impl Display) -> String {
    key("listing", id)
}

/// Aggregated statistics of a listing.
#[must_use]
pub fn listing_stats(id: impl Display) -> String {
    key("listing-stats", id)
}

/// The full listing collection.
#[must_use]
pub fn listings_all() -> String {
    "listings:all".to_string()
}

/// Listings owned by a user.
#[must_use]
pub fn listings_by_owner(owner_id: impl Display) -> String {
    key("listings:owner", owner_id)
}

/// A listing search result page.
#[must_use]
pub fn listings_search(query: &str) -> String {
    key("listings:search", query)
}

// ============ Reviews ============

/// Reviews of a listing.
#[must_use]
pub fn reviews(listing_id: impl Display) -> String {
    key("reviews:listing", listing_id)
}

/// Review statistics of a listing.
#[must_use]
pub fn review_stats(listing_id: impl Display) -> String {
    key("reviews:stats", listing_id)
}

/// Reviews authored by a user.
#[must_use]
pub fn user_reviews(user_id: impl Display) -> String {
    key("reviews:user", user_id)
}

// ============ Bookings ============

/// A single booking.
#[must_use]
pub fn booking(id: impl Display) -> String {
    key("booking", id)
}

/// Bookings made by a user.
#[must_use]
pub fn user_bookings(user_id: impl Display) -> String {
    key("bookings:user", user_id)
}

/// Bookings of a listing.
#[must_use]
pub fn listing_bookings(listing_id: impl Display) -> String {
    key("bookings:listing", listing_id)
}

/// Availability of a listing on one date.
#[must_use]
pub fn booking_availability(listing_id: impl Display, date: impl Display) -> String {
    format!(
        "{}:{}",
        key("bookings:availability", listing_id),
        escape_segment(&date.to_string())
    )
}

// ============ Users ============

/// A single user.
#[must_use]
pub fn user(id: impl Display) -> String {
    key("user", id)
}

/// Public profile of a user.
#[must_use]
pub fn user_profile(id: impl Display) -> String {
    key("user-profile", id)
}

/// Dashboard statistics of a user.
#[must_use]
pub fn dashboard_stats(user_id: impl Display) -> String {
    key("stats:dashboard", user_id)
}

/// Favorite listings of a user.
#[must_use]
pub fn favorites(user_id: impl Display) -> String {
    key("favorites", user_id)
}

/// Notifications of a user.
#[must_use]
pub fn notifications(user_id: impl Display) -> String {
    key("notifications", user_id)
}

/// Unread notification count of a user.
#[must_use]
pub fn unread_notifications(user_id: impl Display) -> String {
    key("notifications:unread", user_id)
}

/// Unread message count of a user.
#[must_use]
pub fn unread_messages(user_id: impl Display) -> String {
    key("messages:unread", user_id)
}

// ============ Reference data ============

/// The amenity catalogue.
#[must_use]
pub fn amenities() -> String {
    "amenities:all".to_string()
}

/// A global search result page.
#[must_use]
pub fn search(query: &str) -> String {
    key("search", query)
}

// ============ Infrastructure ============

/// Default prefix of cached HTTP responses.
pub const HTTP_PREFIX: &str = "http:";

/// A cached HTTP response. The query string, when present, is kept verbatim
/// after `?` so different parameters produce different keys.
#[must_use]
pub fn http_response(prefix: &str, method: &str, path: &str, query: Option<&str>) -> String {
    let mut out = format!(
        "{}{}:{}",
        prefix,
        escape_segment(method),
        escape_segment(path)
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(&escape_segment(query));
    }
    out
}

/// Fixed-window counter of a client on a resource.
#[must_use]
pub fn rate_limit(client: &str, resource: &str) -> String {
    format!(
        "ratelimit:{}:{}",
        escape_segment(client),
        escape_segment(resource)
    )
}

/// Sliding-window log of a client on a resource.
#[must_use]
pub fn rate_limit_log(client: &str, resource: &str) -> String {
    format!(
        "ratelimit-log:{}:{}",
        escape_segment(client),
        escape_segment(resource)
    )
}

/// Wildcard patterns used by invalidation.
pub mod patterns {
    use super::escape_segment;
    use std::fmt::Display;

    /// Every listing collection (all, per owner, search pages).
    #[must_use]
    pub fn all_listings() -> String {
        "listings:*".to_string()
    }

    /// Every listing search page.
    #[must_use]
    pub fn listing_searches() -> String {
        "listings:search:*".to_string()
    }

    /// Every global search page.
    #[must_use]
    pub fn all_search() -> String {
        "search:*".to_string()
    }

    /// Every amenity entry.
    #[must_use]
    pub fn all_amenities() -> String {
        "amenities:*".to_string()
    }

    /// Every statistics entry.
    #[must_use]
    pub fn all_stats() -> String {
        "stats:*".to_string()
    }

    /// Availability of one listing on every date.
    #[must_use]
    pub fn listing_availability(listing_id: impl Display) -> String {
        format!(
            "bookings:availability:{}:*",
            escape_segment(&listing_id.to_string())
        )
    }

    /// Cached HTTP responses for a collection path and everything below it.
    #[must_use]
    pub fn http_collection(collection: &str) -> [String; 3] {
        let root = format!("{}*/{}", super::HTTP_PREFIX, collection);
        [root.clone(), format!("{}/*", root), format!("{}\\?*", root)]
    }

    /// Cached HTTP responses for one resource of a collection, its
    /// sub-resources and its query variants.
    #[must_use]
    pub fn http_resource(collection: &str, id: impl Display) -> [String; 3] {
        let root = format!(
            "{}*/{}/{}",
            super::HTTP_PREFIX,
            collection,
            escape_segment(&id.to_string())
        );
        [root.clone(), format!("{}/*", root), format!("{}\\?*", root)]
    }

    /// Every key whose last segment, or any inner segment, is `id`.
    #[must_use]
    pub fn referencing(id: impl Display) -> [String; 2] {
        let id = escape_segment(&id.to_string()).into_owned();
        [format!("*:{}", id), format!("*:{}:*", id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_entity_keys() {
        assert_eq!(listing("123"), "listing:123");
        assert_eq!(user(456), "user:456");
        assert_eq!(user_bookings("789"), "bookings:user:789");
        assert_eq!(reviews(1), "reviews:listing:1");
        assert_eq!(review_stats(1), "reviews:stats:1");
        assert_eq!(listings_all(), "listings:all");
        assert_eq!(amenities(), "amenities:all");
        assert_eq!(booking_availability(7, "2024-06-01"), "bookings:availability:7:2024-06-01");
    }

    #[test]
    fn test_rate_limit_key() {
        assert_eq!(rate_limit("127.0.0.1", "/api/test"), "ratelimit:127.0.0.1:/api/test");
        assert_eq!(rate_limit_log("127.0.0.1", "/api/test"), "ratelimit-log:127.0.0.1:/api/test");
    }

    #[test]
    fn test_separator_is_escaped() {
        // Without escaping both would read "ratelimit:a:b:c"
        assert_ne!(rate_limit("a:b", "c"), rate_limit("a", "b:c"));
        assert_eq!(rate_limit("::1", "/"), "ratelimit:%3A%3A1:/");
    }

    #[test]
    fn test_glob_metacharacters_are_escaped() {
        assert_eq!(search("a*b?"), "search:a%2Ab%3F");
        assert_eq!(escape_segment("100%"), "100%25");
        assert!(matches!(escape_segment("plain-id"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_kinds_never_collide() {
        let keys: HashSet<String> = [
            listing(1),
            listing_stats(1),
            user(1),
            user_profile(1),
            booking(1),
            user_bookings(1),
            listing_bookings(1),
            reviews(1),
            review_stats(1),
            user_reviews(1),
            dashboard_stats(1),
            favorites(1),
            notifications(1),
            unread_notifications(1),
            unread_messages(1),
            listings_by_owner(1),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 16);
    }

    #[test]
    fn test_http_response_key() {
        assert_eq!(http_response("http:", "GET", "/api/listings", None), "http:GET:/api/listings");
        assert_eq!(
            http_response("http:", "GET", "/api/listings", Some("page=2")),
            "http:GET:/api/listings?page=2"
        );
        assert_eq!(http_response("http:", "GET", "/", Some("")), "http:GET:/");
    }

    #[test]
    fn test_patterns() {
        assert_eq!(patterns::listing_availability(9), "bookings:availability:9:*");
        assert_eq!(patterns::referencing(5), ["*:5".to_string(), "*:5:*".to_string()]);
        assert_eq!(patterns::referencing("x*"), ["*:x%2A".to_string(), "*:x%2A:*".to_string()]);
        assert_eq!(
            patterns::http_resource("listings", 1),
            [
                "http:*/listings/1".to_string(),
                "http:*/listings/1/*".to_string(),
                "http:*/listings/1\\?*".to_string(),
            ]
        );
    }

    #[test]
    fn test_http_patterns_match_response_keys() {
        use crate::memory::glob_match;

        let [exact, nested, query] = patterns::http_resource("listings", 1);
        let matches = |key: &str| [&exact, &nested, &query].iter().any(|p| glob_match(p, key));
        assert!(matches(&http_response(HTTP_PREFIX, "GET", "/api/v1/listings/1", None)));
        assert!(matches(&http_response(HTTP_PREFIX, "GET", "/api/v1/listings/1/reviews", None)));
        assert!(matches(&http_response(HTTP_PREFIX, "GET", "/api/v1/listings/1", Some("lang=en"))));
        assert!(!matches(&http_response(HTTP_PREFIX, "GET", "/api/v1/listings/10", None)));
        assert!(!matches(&http_response(HTTP_PREFIX, "GET", "/api/v1/listings/10", Some("a=1"))));

        let collection = patterns::http_collection("search");
        assert!(collection
            .iter()
            .any(|p| glob_match(p, &http_response(HTTP_PREFIX, "GET", "/api/search", Some("q=lake")))));
        assert!(!collection
            .iter()
            .any(|p| glob_match(p, &http_response(HTTP_PREFIX, "GET", "/api/searches", None))));
    }

    #[test]
    fn test_ttl_tiers() {
        assert_eq!(ttl::SHORT.as_secs(), 60);
        assert_eq!(ttl::MEDIUM.as_secs(), 300);
        assert_eq!(ttl::LONG.as_secs(), 3_600);
        assert_eq!(ttl::VERY_LONG.as_secs(), 86_400);
        assert_eq!(ttl::WEEK.as_secs(), 604_800);
    }
}
