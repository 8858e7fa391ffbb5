//! Ad serving for Motorads: eligibility, ranking, frequency caps, owner
//! diversity, signed tracking tokens and render payloads.

pub mod orchestrator;
pub mod render;
pub mod token;

pub use orchestrator::{ServedAd, ServingOrchestrator};
pub use render::RenderedAd;
pub use token::{TokenError, TokenPayload, TokenSigner};
