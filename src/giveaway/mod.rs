//! # Giveaway engine
//!
//! ## Architecture
//!
//! ```text
//! host (commands, entrant join/leave)
//!     ↓
//! GiveawayManager (lifecycle operations)
//!     ↓                        ↑
//! record collection  ←  scheduler tick + one-shot timers
//!     ↓
//! PersistenceGateway (full-collection write-through)
//!     ↓
//! EventBus (ended, rerolled, deleted, entrants, refresh)
//! ```
//!
//! All mutations go through the manager's single collection. Locks on it are
//! only held for synchronous sections; host lookups, rules and persistence
//! run with the collection unlocked, so a slow lookup for one giveaway never
//! stalls the others.
//!
//! ## Module Organization
//!
//! - `types` - GiveawayRecord and operation option structs
//! - `lifecycle` - state transitions enforced on a single record
//! - `selector` - bonus weighting and the weighted no-replacement draw
//! - `capabilities` - keyed bonus / exemption rule registry
//! - `host` - chat host lookups consumed by the engine
//! - `events` - notification channel
//! - `manager` - async lifecycle operations over the collection
//! - `scheduler` - reconciliation tick and precise timers
//! - `config` - runtime configuration
//! - `clock` - wall-clock source

pub mod capabilities;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod lifecycle;
pub mod manager;
pub mod scheduler;
pub mod selector;
pub mod types;

pub use capabilities::{BonusRule, CapabilityRegistry, ExemptionRule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ManagerConfig, StoreBackend};
pub use error::GiveawayError;
pub use events::{EventBus, GiveawayEvent};
pub use host::{ChatHost, FetchError, PermissiveHost};
pub use manager::{GiveawayManager, ManagerBuilder};
pub use scheduler::Reconciliation;
pub use types::{
    BonusEntry, EditPatch, EntrantId, GiveawayId, GiveawayRecord, GiveawayState, GiveawayTarget,
    LastChance, PauseOptions, PauseState, RerollOptions, Snowflake, StartOptions,
};
