//! Chat host lookups consumed by the engine
//!
//! The engine never talks to a chat API itself. It asks the host whether a
//! giveaway message still exists and whether an entrant is still a member;
//! entrants themselves are pushed in through the manager's join/leave hook.

use super::types::{EntrantId, GiveawayRecord, Snowflake};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Lookup failed for a possibly recoverable reason (rate limit, outage)
    Transient(String),
    /// Target confirmed gone
    Gone(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient(reason) => write!(f, "transient: {}", reason),
            FetchError::Gone(reason) => write!(f, "gone: {}", reason),
        }
    }
}

impl std::error::Error for FetchError {}

#[async_trait]
pub trait ChatHost: Send + Sync {
    /// Confirm the giveaway message is still reachable
    async fn message_exists(&self, giveaway: &GiveawayRecord) -> Result<(), FetchError>;

    /// Whether `entrant` is still a member of `guild_id`
    async fn is_member(&self, guild_id: Snowflake, entrant: EntrantId) -> Result<bool, FetchError>;
}

/// Host that confirms every message and every membership
///
/// Used by the standalone runtime, where no chat platform is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveHost;

#[async_trait]
impl ChatHost for PermissiveHost {
    async fn message_exists(&self, _giveaway: &GiveawayRecord) -> Result<(), FetchError> {
        Ok(())
    }

    async fn is_member(&self, _guild_id: Snowflake, _entrant: EntrantId) -> Result<bool, FetchError> {
        Ok(true)
    }
}
