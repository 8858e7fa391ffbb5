//! Anti-Fraud Engine: short-window heuristics over impression, click and
//! lead signals.

pub mod engine;

pub use engine::{FraudContext, FraudEngine, FraudReason, Verdict};
