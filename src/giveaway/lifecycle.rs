//! State transitions on a single record
//!
//! Every transition validates first and mutates only on success, so a
//! rejected operation leaves the record untouched. The async side (timers,
//! persistence, draws) lives in `manager`.

use super::config::ManagerConfig;
use super::error::GiveawayError;
use super::types::{
    EditPatch, EntrantId, GiveawayRecord, GiveawayTarget, LastChance, PauseOptions, PauseState,
    StartOptions,
};

fn validate_prize(prize: &str, max_len: usize) -> Result<(), GiveawayError> {
    if prize.trim().is_empty() {
        return Err(GiveawayError::validation("prize cannot be empty"));
    }
    let len = prize.chars().count();
    if len > max_len {
        return Err(GiveawayError::validation(format!(
            "prize must be at most {} characters, got {}",
            max_len, len
        )));
    }
    Ok(())
}

fn validate_winner_count(count: u32) -> Result<(), GiveawayError> {
    if count == 0 {
        return Err(GiveawayError::validation("winner count must be a positive integer"));
    }
    Ok(())
}

/// `base + delta`, rejected as invalid input when it leaves the i64 range
fn offset(base: i64, delta: i64, what: &str) -> Result<i64, GiveawayError> {
    base.checked_add(delta)
        .ok_or_else(|| GiveawayError::validation(format!("{} is out of range", what)))
}

fn validate_last_chance(last_chance: &LastChance) -> Result<(), GiveawayError> {
    if last_chance.threshold_ms < 0 {
        return Err(GiveawayError::validation("last chance threshold cannot be negative"));
    }
    Ok(())
}

impl GiveawayRecord {
    /// Build a new record from `start` options
    pub fn from_start(
        target: GiveawayTarget,
        options: StartOptions,
        now: i64,
        config: &ManagerConfig,
    ) -> Result<Self, GiveawayError> {
        validate_prize(&options.prize, config.max_prize_len)?;

        let winner_count = match (options.winner_count, options.is_drop) {
            (Some(count), _) => count,
            (None, true) => 1,
            (None, false) => return Err(GiveawayError::validation("winner count is required")),
        };
        validate_winner_count(winner_count)?;

        let end_at = if options.is_drop {
            if options.duration_ms.is_some() {
                return Err(GiveawayError::validation("drops have no duration"));
            }
            None
        } else {
            match options.duration_ms {
                Some(duration) if duration > 0 => Some(offset(now, duration, "duration")?),
                Some(_) => return Err(GiveawayError::validation("duration must be positive")),
                None => return Err(GiveawayError::validation("duration is required")),
            }
        };

        let last_chance = options.last_chance.unwrap_or(LastChance {
            enabled: false,
            threshold_ms: config.default_last_chance_threshold_ms,
        });
        validate_last_chance(&last_chance)?;

        Ok(Self {
            id: target.message_id,
            channel_id: target.channel_id,
            guild_id: target.guild_id,
            start_at: now,
            end_at,
            winner_count,
            ended: false,
            winner_ids: Vec::new(),
            prize: options.prize,
            messages: options.messages,
            hosted_by: options.hosted_by,
            bonus_entries: options.bonus_entries,
            exemption: options.exemption,
            exempt_members: options.exempt_members,
            pause: PauseState::default(),
            is_drop: options.is_drop,
            last_chance,
            entrants: Default::default(),
            extra_data: options.extra_data,
        })
    }

    /// Apply a partial update; returns whether the deadline changed
    pub fn apply_edit(
        &mut self,
        patch: EditPatch,
        config: &ManagerConfig,
    ) -> Result<bool, GiveawayError> {
        if self.ended {
            return Err(GiveawayError::AlreadyEnded(self.id));
        }
        if self.is_drop && patch.touches_timing() {
            return Err(GiveawayError::DropUnsupported {
                id: self.id,
                operation: "timing edit",
            });
        }

        let mut next = self.clone();

        if let Some(count) = patch.winner_count {
            validate_winner_count(count)?;
            next.winner_count = count;
        }
        if let Some(prize) = patch.prize {
            validate_prize(&prize, config.max_prize_len)?;
            next.prize = prize;
        }

        if let Some(end_at) = patch.set_end_at {
            if next.pause.is_paused {
                return Err(GiveawayError::validation(
                    "cannot set an absolute end on a paused giveaway",
                ));
            }
            next.end_at = Some(end_at);
        }
        if let Some(extra) = patch.add_time_ms {
            if next.pause.is_paused {
                let snapshot = next.pause.remaining_ms.unwrap_or(0);
                let remaining = offset(snapshot, extra, "added time")?;
                if remaining < 0 {
                    return Err(GiveawayError::validation(
                        "added time would leave negative remaining time",
                    ));
                }
                next.pause.remaining_ms = Some(remaining);
                next.end_at = next
                    .pause
                    .unpause_at
                    .map(|at| offset(at, remaining, "added time"))
                    .transpose()?;
            } else {
                next.end_at = next
                    .end_at
                    .map(|end_at| offset(end_at, extra, "added time"))
                    .transpose()?;
            }
        }
        if let Some(end_at) = next.end_at {
            if end_at < next.start_at {
                return Err(GiveawayError::validation("end cannot be before start"));
            }
        }

        if let Some(messages) = patch.messages {
            next.messages = messages;
        }
        if let Some(entries) = patch.bonus_entries {
            next.bonus_entries = entries;
        }
        if let Some(exemption) = patch.exemption {
            next.exemption = exemption;
        }
        if let Some(members) = patch.exempt_members {
            next.exempt_members = members;
        }
        if let Some(last_chance) = patch.last_chance {
            validate_last_chance(&last_chance)?;
            next.last_chance = last_chance;
        }
        if let Some(extra_data) = patch.extra_data {
            next.extra_data = Some(extra_data);
        }

        let timing_changed = next.end_at != self.end_at;
        *self = next;
        Ok(timing_changed)
    }

    pub fn apply_pause(&mut self, options: PauseOptions, now: i64) -> Result<(), GiveawayError> {
        if self.ended {
            return Err(GiveawayError::AlreadyEnded(self.id));
        }
        if self.is_drop {
            return Err(GiveawayError::DropUnsupported {
                id: self.id,
                operation: "pause",
            });
        }
        if self.pause.is_paused {
            return Err(GiveawayError::AlreadyPaused(self.id));
        }

        let unpause_at = match (options.unpause_after_ms, options.unpause_at) {
            (Some(_), Some(_)) => {
                return Err(GiveawayError::validation(
                    "give either unpause_after_ms or unpause_at, not both",
                ))
            }
            (Some(after), None) if after <= 0 => {
                return Err(GiveawayError::validation("unpause_after_ms must be positive"))
            }
            (Some(after), None) => Some(offset(now, after, "unpause_after_ms")?),
            (None, Some(at)) if at <= now => {
                return Err(GiveawayError::validation("unpause_at must be in the future"))
            }
            (None, at) => at,
        };

        let remaining = self.remaining_ms(now).unwrap_or(0).max(0);
        let end_at = unpause_at
            .map(|at| offset(at, remaining, "unpause instant"))
            .transpose()?;

        self.pause = PauseState {
            is_paused: true,
            unpause_at,
            remaining_ms: Some(remaining),
        };
        self.end_at = end_at;
        Ok(())
    }

    pub fn apply_unpause(&mut self, now: i64) -> Result<(), GiveawayError> {
        if self.ended {
            return Err(GiveawayError::AlreadyEnded(self.id));
        }
        if !self.pause.is_paused {
            return Err(GiveawayError::NotPaused(self.id));
        }

        // With an unpause instant the deadline was already derived at pause time
        if self.pause.unpause_at.is_none() || self.end_at.is_none() {
            let remaining = self.pause.remaining_ms.unwrap_or(0);
            self.end_at = Some(offset(now, remaining, "remaining time")?);
        }
        self.pause = PauseState::default();
        Ok(())
    }

    /// Check-and-set of the `ended` flag; the first caller wins
    pub fn begin_end(&mut self) -> Result<(), GiveawayError> {
        if self.ended {
            return Err(GiveawayError::AlreadyEnded(self.id));
        }
        self.ended = true;
        Ok(())
    }

    /// Undo `begin_end` when the end could not be carried out
    pub fn rollback_end(&mut self) {
        self.ended = false;
    }

    /// Record the outcome of an end; the deadline becomes the actual end instant
    pub fn complete_end(&mut self, winners: Vec<EntrantId>, now: i64) {
        self.ended = true;
        self.winner_ids = winners;
        self.pause = PauseState::default();
        self.end_at = Some(now.max(self.start_at));
    }

    pub fn ensure_rerollable(&self) -> Result<(), GiveawayError> {
        if self.is_drop {
            return Err(GiveawayError::DropUnsupported {
                id: self.id,
                operation: "reroll",
            });
        }
        if !self.ended {
            return Err(GiveawayError::NotEnded(self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::giveaway::types::{GiveawayState, Snowflake};

    fn target() -> GiveawayTarget {
        GiveawayTarget {
            message_id: Snowflake(100),
            channel_id: Snowflake(200),
            guild_id: Snowflake(300),
        }
    }

    fn options(duration_ms: i64) -> StartOptions {
        StartOptions {
            prize: "Steam key".to_string(),
            winner_count: Some(1),
            duration_ms: Some(duration_ms),
            ..Default::default()
        }
    }

    fn live_record(now: i64) -> GiveawayRecord {
        GiveawayRecord::from_start(target(), options(60_000), now, &ManagerConfig::default())
            .unwrap()
    }

    #[test]
    fn test_start_validation() {
        let config = ManagerConfig::default();

        let mut empty_prize = options(1_000);
        empty_prize.prize = "   ".to_string();
        assert!(matches!(
            GiveawayRecord::from_start(target(), empty_prize, 0, &config),
            Err(GiveawayError::Validation(_))
        ));

        let mut long_prize = options(1_000);
        long_prize.prize = "x".repeat(config.max_prize_len + 1);
        assert!(GiveawayRecord::from_start(target(), long_prize, 0, &config).is_err());

        let mut zero_winners = options(1_000);
        zero_winners.winner_count = Some(0);
        assert!(GiveawayRecord::from_start(target(), zero_winners, 0, &config).is_err());

        assert!(GiveawayRecord::from_start(target(), options(0), 0, &config).is_err());

        let mut no_duration = options(1_000);
        no_duration.duration_ms = None;
        assert!(GiveawayRecord::from_start(target(), no_duration, 0, &config).is_err());
    }

    #[test]
    fn test_drop_start_has_no_deadline() {
        let drop = StartOptions {
            prize: "Role".to_string(),
            is_drop: true,
            ..Default::default()
        };
        let record =
            GiveawayRecord::from_start(target(), drop, 5_000, &ManagerConfig::default()).unwrap();
        assert_eq!(record.end_at, None);
        assert_eq!(record.winner_count, 1);
        assert_eq!(record.start_at, 5_000);
    }

    #[test]
    fn test_pause_then_unpause_preserves_remaining() {
        let mut record = live_record(0);
        record.apply_pause(PauseOptions::default(), 20_000).unwrap();
        assert_eq!(record.state(), GiveawayState::Paused);
        assert_eq!(record.end_at, None);
        assert_eq!(record.pause.remaining_ms, Some(40_000));

        record.apply_unpause(20_005).unwrap();
        assert_eq!(record.state(), GiveawayState::Scheduled);
        assert_eq!(record.remaining_ms(20_005), Some(40_000));
    }

    #[test]
    fn test_pause_with_unpause_after_derives_deadline() {
        let mut record = live_record(0);
        let opts = PauseOptions {
            unpause_after_ms: Some(30_000),
            ..Default::default()
        };
        record.apply_pause(opts, 10_000).unwrap();
        assert_eq!(record.pause.unpause_at, Some(40_000));
        assert_eq!(record.end_at, Some(90_000));

        record.apply_unpause(40_000).unwrap();
        assert_eq!(record.end_at, Some(90_000));
        assert!(!record.pause.is_paused);
    }

    #[test]
    fn test_pause_rejections() {
        let mut record = live_record(0);
        let both = PauseOptions {
            unpause_after_ms: Some(1),
            unpause_at: Some(10),
        };
        assert!(matches!(record.apply_pause(both, 0), Err(GiveawayError::Validation(_))));

        let past = PauseOptions {
            unpause_at: Some(5),
            ..Default::default()
        };
        assert!(record.apply_pause(past, 10).is_err());

        record.apply_pause(PauseOptions::default(), 0).unwrap();
        assert!(matches!(
            record.apply_pause(PauseOptions::default(), 0),
            Err(GiveawayError::AlreadyPaused(_))
        ));

        let mut live = live_record(0);
        assert!(matches!(live.apply_unpause(0), Err(GiveawayError::NotPaused(_))));
    }

    #[test]
    fn test_drop_rejects_pause_and_timing_edits() {
        let drop = StartOptions {
            prize: "Role".to_string(),
            is_drop: true,
            ..Default::default()
        };
        let mut record =
            GiveawayRecord::from_start(target(), drop, 0, &ManagerConfig::default()).unwrap();

        assert!(matches!(
            record.apply_pause(PauseOptions::default(), 0),
            Err(GiveawayError::DropUnsupported { .. })
        ));
        let patch = EditPatch {
            add_time_ms: Some(1_000),
            ..Default::default()
        };
        assert!(matches!(
            record.apply_edit(patch, &ManagerConfig::default()),
            Err(GiveawayError::DropUnsupported { .. })
        ));

        let patch = EditPatch {
            winner_count: Some(3),
            ..Default::default()
        };
        assert!(!record.apply_edit(patch, &ManagerConfig::default()).unwrap());
        assert_eq!(record.winner_count, 3);
    }

    #[test]
    fn test_edit_partial_and_timing() {
        let config = ManagerConfig::default();
        let mut record = live_record(0);

        let patch = EditPatch {
            prize: Some("Two keys".to_string()),
            add_time_ms: Some(5_000),
            ..Default::default()
        };
        assert!(record.apply_edit(patch, &config).unwrap());
        assert_eq!(record.prize, "Two keys");
        assert_eq!(record.end_at, Some(65_000));
        assert_eq!(record.winner_count, 1);

        let patch = EditPatch {
            set_end_at: Some(30_000),
            ..Default::default()
        };
        assert!(record.apply_edit(patch, &config).unwrap());
        assert_eq!(record.end_at, Some(30_000));

        let before = record.clone();
        let patch = EditPatch {
            prize: Some("ignored".to_string()),
            set_end_at: Some(-1),
            ..Default::default()
        };
        assert!(record.apply_edit(patch, &config).is_err());
        assert_eq!(record, before);
    }

    #[test]
    fn test_add_time_while_paused_extends_snapshot() {
        let config = ManagerConfig::default();
        let mut record = live_record(0);
        record.apply_pause(PauseOptions::default(), 50_000).unwrap();

        let patch = EditPatch {
            add_time_ms: Some(15_000),
            ..Default::default()
        };
        record.apply_edit(patch, &config).unwrap();
        assert_eq!(record.pause.remaining_ms, Some(25_000));
        assert_eq!(record.end_at, None);
    }

    #[test]
    fn test_out_of_range_timing_is_rejected_unchanged() {
        let config = ManagerConfig::default();
        assert!(matches!(
            GiveawayRecord::from_start(target(), options(i64::MAX), 1_000, &config),
            Err(GiveawayError::Validation(_))
        ));

        let mut record = live_record(1_000);
        let before = record.clone();
        let far = PauseOptions {
            unpause_after_ms: Some(i64::MAX),
            ..Default::default()
        };
        assert!(matches!(record.apply_pause(far, 2_000), Err(GiveawayError::Validation(_))));
        assert_eq!(record, before);
        assert_eq!(record.state(), GiveawayState::Scheduled);

        let huge = EditPatch {
            add_time_ms: Some(i64::MAX),
            ..Default::default()
        };
        assert!(matches!(
            record.apply_edit(huge.clone(), &config),
            Err(GiveawayError::Validation(_))
        ));
        assert_eq!(record, before);

        // Indefinite pause: the snapshot may grow, resuming must not overflow
        record.apply_pause(PauseOptions::default(), 2_000).unwrap();
        let near_max = EditPatch {
            add_time_ms: Some(i64::MAX - 60_000),
            ..Default::default()
        };
        record.apply_edit(near_max, &config).unwrap();
        let paused = record.clone();
        assert!(matches!(record.apply_unpause(3_000), Err(GiveawayError::Validation(_))));
        assert_eq!(record, paused);
        assert!(matches!(record.apply_edit(huge, &config), Err(GiveawayError::Validation(_))));
        assert_eq!(record, paused);
    }

    #[test]
    fn test_edit_after_end_rejected_unchanged() {
        let mut record = live_record(0);
        record.begin_end().unwrap();
        record.complete_end(vec![Snowflake(7)], 1_000);
        let before = record.clone();

        let patch = EditPatch {
            prize: Some("new".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            record.apply_edit(patch, &ManagerConfig::default()),
            Err(GiveawayError::AlreadyEnded(_))
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn test_end_check_and_set() {
        let mut record = live_record(0);
        record.begin_end().unwrap();
        assert!(matches!(record.begin_end(), Err(GiveawayError::AlreadyEnded(_))));

        record.rollback_end();
        assert!(!record.ended);
        assert!(matches!(record.ensure_rerollable(), Err(GiveawayError::NotEnded(_))));

        record.begin_end().unwrap();
        record.complete_end(Vec::new(), 10_000);
        assert_eq!(record.end_at, Some(10_000));
        assert!(record.ensure_rerollable().is_ok());
    }
}
