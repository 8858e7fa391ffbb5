#![warn(clippy::unwrap_used)]

pub mod ads_rest;
pub mod campaign_rest;
pub mod rest;
pub mod server;
pub mod wallet_rest;

pub use rest::AppState;
pub use server::{router, ApiServer};
