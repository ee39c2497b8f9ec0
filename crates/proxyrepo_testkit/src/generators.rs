//! Property-based test generators using proptest.

use proptest::prelude::*;
use proxyrepo_core::{AggregatorConfig, FeedKey};

/// Strategy for feed keys drawn from a small pool, so feeds repeat.
pub fn feed_key_strategy() -> impl Strategy<Value = FeedKey> {
    (
        prop::sample::select(vec!["ALPHA", "BRAVO", "CHARLIE"]),
        prop::sample::select(vec!["Raw Events", "Events"]),
    )
        .prop_map(|(name, type_name)| FeedKey::new(name, type_name))
}

/// Strategy for item sizes, with the occasional item far above the rest.
pub fn item_size_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        9 => 1u64..512,
        1 => 4_096u64..16_384,
    ]
}

/// Strategy for a source: its items as `(feed, size)` pairs.
pub fn source_items_strategy() -> impl Strategy<Value = Vec<(FeedKey, u64)>> {
    prop::collection::vec((feed_key_strategy(), item_size_strategy()), 0..12)
}

/// Strategy for valid aggregation limits.
pub fn limits_strategy() -> impl Strategy<Value = AggregatorConfig> {
    (1u32..10, 256u64..4_096, 1u64..10_000).prop_map(|(items, bytes, age)| AggregatorConfig {
        max_items_per_aggregate: items,
        max_uncompressed_byte_size: bytes,
        max_aggregate_age_ms: age,
    })
}
