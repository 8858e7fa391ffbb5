//! Ranking Engine: composite bid x quality x relevance scoring.

pub mod engine;
pub mod signals;

pub use engine::{Candidate, CandidateSignals, RankedCandidate, RankingEngine, ScoreBreakdown};
pub use signals::SignalLoader;
