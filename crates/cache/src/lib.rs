#![warn(clippy::unwrap_used)]

pub mod client;
pub mod counter;
pub mod listing;
pub mod local;

pub use client::RedisCache;
pub use counter::{MemoryRateCounter, RateCounter, RedisRateCounter};
pub use listing::{HttpListingProvider, ListingCache, ListingProvider, StaticListingProvider};
pub use local::LocalCache;
