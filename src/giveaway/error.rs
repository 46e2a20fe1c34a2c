use super::types::GiveawayId;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GiveawayError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("giveaway {0} not found")]
    NotFound(GiveawayId),

    #[error("giveaway {0} has already ended")]
    AlreadyEnded(GiveawayId),

    #[error("giveaway {0} has not ended yet")]
    NotEnded(GiveawayId),

    #[error("giveaway {0} is not paused")]
    NotPaused(GiveawayId),

    #[error("giveaway {0} is already paused")]
    AlreadyPaused(GiveawayId),

    #[error("giveaway {id} is a drop, {operation} is not supported")]
    DropUnsupported { id: GiveawayId, operation: &'static str },

    /// Lookup failed but may succeed later; any tentative change was rolled back
    #[error("transient lookup failure for giveaway {id}: {reason}")]
    TransientFetch { id: GiveawayId, reason: String },

    /// The giveaway message is gone; the record has been purged
    #[error("giveaway {id} message is gone: {reason}")]
    PermanentFetch { id: GiveawayId, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl GiveawayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GiveawayError::Validation(msg.into())
    }

    /// Safe to retry on a later tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GiveawayError::TransientFetch { .. } | GiveawayError::Storage(_)
        )
    }
}
