//! Giveaway lifecycle engine
//!
//! Time-boxed draws anchored to a chat message: entrants register interest,
//! and at the deadline (or, for drops, once enough valid entrants exist)
//! winners are drawn with bonus-entry weighting.
//!
//! - `giveaway` - records, lifecycle operations, winner selection, scheduler
//! - `storage` - persistence contract and the JSON / SQLite / memory backends

pub mod giveaway;
pub mod storage;

pub use giveaway::{
    config::ManagerConfig,
    error::GiveawayError,
    events::{EventBus, GiveawayEvent},
    manager::{GiveawayManager, ManagerBuilder},
    types::{GiveawayRecord, Snowflake},
};
pub use storage::PersistenceGateway;
