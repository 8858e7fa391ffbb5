//! Tracking and billing of served ads: token check, anti-fraud, per-event
//! charges, event persistence, daily rollups and fraud reclassification.

pub mod orchestrator;

pub use orchestrator::{Reclassification, TrackOutcome, TrackRequest, TrackingOrchestrator};
