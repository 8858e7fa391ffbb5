//! Campaign lifecycle management: creation with targeting validation,
//! draft-only edits, creative review and the guarded status transitions.

pub mod models;
pub mod service;

pub use models::{
    CreateCampaignRequest, CreateCreativeRequest, UpdateCampaignRequest, UpdateCreativeRequest,
};
pub use service::CampaignService;
