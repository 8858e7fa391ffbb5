//! Campaign status state machine.

use crate::error::{AdsError, AdsResult};
use crate::types::CampaignStatus;

impl CampaignStatus {
    /// Statuses reachable from `self` in a single step.
    pub fn allowed_next(self) -> &'static [CampaignStatus] {
        use CampaignStatus::*;
        match self {
            Draft => &[Pending, Ended],
            Pending => &[Active, Rejected, Ended],
            Active => &[Paused, BudgetExhausted, Rejected, Ended],
            Paused => &[Active, Ended],
            BudgetExhausted => &[Active, Ended],
            Rejected | Ended => &[],
        }
    }

    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Only drafts accept edits to budget, schedule or targeting.
    pub fn is_editable(self) -> bool {
        self == CampaignStatus::Draft
    }
}

/// Check a transition, returning the target status when allowed.
pub fn transition(from: CampaignStatus, to: CampaignStatus) -> AdsResult<CampaignStatus> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(AdsError::InvalidTransition { from, to })
    }
}
