//! Core data structures for the giveaway engine
//!
//! `GiveawayRecord` is the persisted entity. Timestamps are Unix milliseconds;
//! `end_at = None` stands for "no deadline" (paused indefinitely, or a drop).

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// 64-bit platform id (message, channel, guild or user)
///
/// Serialized as a decimal string so JSON consumers that parse numbers as
/// doubles never see a rounded id. Plain integers are still accepted on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snowflake(pub u64);

pub type GiveawayId = Snowflake;
pub type EntrantId = Snowflake;

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Snowflake(value)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Snowflake)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = Snowflake;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a snowflake id as a decimal string or unsigned integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Snowflake, E> {
        v.parse().map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Snowflake, E> {
        Ok(Snowflake(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Snowflake, E> {
        u64::try_from(v)
            .map(Snowflake)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

/// Where a giveaway lives on the chat platform
///
/// The host posts the message before calling `start`; its id becomes the
/// giveaway id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GiveawayTarget {
    pub message_id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Snowflake,
}

/// A bonus-entry source, resolved through the capability registry by `key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusEntry {
    pub key: String,
    #[serde(default)]
    pub cumulative: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PauseState {
    pub is_paused: bool,
    /// Absolute auto-unpause instant (ms)
    #[serde(default)]
    pub unpause_at: Option<i64>,
    /// Time left on the clock when the pause began (ms)
    #[serde(default)]
    pub remaining_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastChance {
    pub enabled: bool,
    pub threshold_ms: i64,
}

impl Default for LastChance {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_ms: 5_000,
        }
    }
}

/// Lifecycle state derived from a record's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveawayState {
    Scheduled,
    Paused,
    Ended,
}

impl GiveawayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GiveawayState::Scheduled => "SCHEDULED",
            GiveawayState::Paused => "PAUSED",
            GiveawayState::Ended => "ENDED",
        }
    }
}

/// Persisted giveaway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiveawayRecord {
    /// Id of the giveaway message
    pub id: GiveawayId,
    pub channel_id: Snowflake,
    pub guild_id: Snowflake,

    pub start_at: i64,
    /// `None` = no deadline
    pub end_at: Option<i64>,

    pub winner_count: u32,
    #[serde(default)]
    pub ended: bool,
    /// Winners in draw order, set by end and replaced by reroll
    #[serde(default)]
    pub winner_ids: Vec<EntrantId>,

    pub prize: String,
    /// Host message templates, passed through untouched
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
    #[serde(default)]
    pub hosted_by: Option<Snowflake>,

    #[serde(default)]
    pub bonus_entries: Vec<BonusEntry>,
    /// Exemption rule key; the rule returns true to disqualify
    #[serde(default)]
    pub exemption: Option<String>,
    #[serde(default)]
    pub exempt_members: BTreeSet<EntrantId>,

    #[serde(default)]
    pub pause: PauseState,
    #[serde(default)]
    pub is_drop: bool,
    #[serde(default)]
    pub last_chance: LastChance,

    /// Entrants pushed by the host through the join/leave hook
    #[serde(default)]
    pub entrants: BTreeSet<EntrantId>,

    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
}

impl GiveawayRecord {
    pub fn state(&self) -> GiveawayState {
        if self.ended {
            GiveawayState::Ended
        } else if self.pause.is_paused {
            GiveawayState::Paused
        } else {
            GiveawayState::Scheduled
        }
    }

    /// Milliseconds until the deadline (negative when overdue), `None` without one
    pub fn remaining_ms(&self, now: i64) -> Option<i64> {
        self.end_at.map(|end_at| end_at - now)
    }

    /// Display-only phase: live, unpaused and within the last-chance threshold
    pub fn is_last_chance(&self, now: i64) -> bool {
        if !self.last_chance.enabled || self.state() != GiveawayState::Scheduled {
            return false;
        }
        match self.remaining_ms(now) {
            Some(remaining) => remaining > 0 && remaining <= self.last_chance.threshold_ms,
            None => false,
        }
    }
}

/// Options for `start`
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub prize: String,
    /// Required unless `is_drop` (drops default to one winner)
    pub winner_count: Option<u32>,
    /// Required unless `is_drop`
    pub duration_ms: Option<i64>,
    pub is_drop: bool,
    pub hosted_by: Option<Snowflake>,
    pub messages: BTreeMap<String, String>,
    pub bonus_entries: Vec<BonusEntry>,
    pub exemption: Option<String>,
    pub exempt_members: BTreeSet<EntrantId>,
    /// Falls back to the configured default threshold, disabled
    pub last_chance: Option<LastChance>,
    pub extra_data: Option<serde_json::Value>,
}

/// Partial update for `edit`; only `Some` fields are applied
#[derive(Debug, Clone, Default)]
pub struct EditPatch {
    pub winner_count: Option<u32>,
    pub prize: Option<String>,
    /// Added to the deadline
    pub add_time_ms: Option<i64>,
    /// Absolute deadline (ms)
    pub set_end_at: Option<i64>,
    pub messages: Option<BTreeMap<String, String>>,
    pub bonus_entries: Option<Vec<BonusEntry>>,
    /// `Some(None)` clears the exemption rule
    pub exemption: Option<Option<String>>,
    pub exempt_members: Option<BTreeSet<EntrantId>>,
    pub last_chance: Option<LastChance>,
    pub extra_data: Option<serde_json::Value>,
}

impl EditPatch {
    pub fn touches_timing(&self) -> bool {
        self.add_time_ms.is_some() || self.set_end_at.is_some()
    }
}

/// Options for `pause`; at most one of the two fields may be set
#[derive(Debug, Clone, Copy, Default)]
pub struct PauseOptions {
    /// Auto-unpause after this many milliseconds
    pub unpause_after_ms: Option<i64>,
    /// Auto-unpause at this absolute instant (ms)
    pub unpause_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RerollOptions {
    /// Overrides the giveaway's winner count for this draw
    pub winner_count: Option<u32>,
    pub exclude_previous_winners: bool,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_record(now: i64) -> GiveawayRecord {
        GiveawayRecord {
            id: Snowflake(1_200_000_000_000_000_001),
            channel_id: Snowflake(10),
            guild_id: Snowflake(20),
            start_at: now,
            end_at: Some(now + 60_000),
            winner_count: 1,
            ended: false,
            winner_ids: Vec::new(),
            prize: "Nitro".to_string(),
            messages: BTreeMap::new(),
            hosted_by: None,
            bonus_entries: Vec::new(),
            exemption: None,
            exempt_members: BTreeSet::new(),
            pause: PauseState::default(),
            is_drop: false,
            last_chance: LastChance::default(),
            entrants: BTreeSet::new(),
            extra_data: None,
        }
    }

    #[test]
    fn test_snowflake_serialized_as_string() {
        // 2^63 + 1 cannot be represented exactly as an f64
        let id = Snowflake(9_223_372_036_854_775_809);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"9223372036854775809\"");

        let back: Snowflake = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_snowflake_accepts_integer() {
        let id: Snowflake = serde_json::from_str("1234567890123").unwrap();
        assert_eq!(id, Snowflake(1_234_567_890_123));
        assert!(serde_json::from_str::<Snowflake>("-5").is_err());
        assert!(serde_json::from_str::<Snowflake>("\"abc\"").is_err());
    }

    #[test]
    fn test_remaining_time_decreases() {
        let record = sample_record(1_000);
        let earlier = record.remaining_ms(2_000).unwrap();
        let later = record.remaining_ms(2_001).unwrap();
        assert!(later < earlier);
        assert_eq!(record.remaining_ms(61_000), Some(0));
    }

    #[test]
    fn test_last_chance_window() {
        let mut record = sample_record(0);
        record.last_chance = LastChance {
            enabled: true,
            threshold_ms: 10_000,
        };
        assert!(!record.is_last_chance(40_000));
        assert!(record.is_last_chance(50_000));
        assert!(record.is_last_chance(59_999));
        assert!(!record.is_last_chance(60_000));

        record.pause.is_paused = true;
        assert!(!record.is_last_chance(55_000));
    }

    #[test]
    fn test_record_defaults_on_sparse_json() {
        let json = r#"{
            "id": "42", "channel_id": "7", "guild_id": "8",
            "start_at": 0, "end_at": null, "winner_count": 2, "prize": "Key"
        }"#;
        let record: GiveawayRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, Snowflake(42));
        assert_eq!(record.end_at, None);
        assert!(!record.ended);
        assert!(record.entrants.is_empty());
        assert_eq!(record.state(), GiveawayState::Scheduled);
    }
}
