//! Lifecycle notifications for the host
//!
//! Delivered over a tokio broadcast channel: every subscriber sees every
//! event emitted after it subscribed. Slow subscribers may observe
//! `RecvError::Lagged` and should resync from `GiveawayManager::all()`.

use super::types::{EntrantId, GiveawayRecord};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum GiveawayEvent {
    Ended {
        giveaway: GiveawayRecord,
        winners: Vec<EntrantId>,
    },
    /// End produced no valid winner
    NoWinner {
        giveaway: GiveawayRecord,
        message: Option<String>,
    },
    /// Fresh draw on an ended giveaway; `winners` may be empty
    Rerolled {
        giveaway: GiveawayRecord,
        winners: Vec<EntrantId>,
    },
    Deleted {
        giveaway: GiveawayRecord,
    },
    EntrantJoined {
        giveaway: GiveawayRecord,
        entrant: EntrantId,
    },
    EntrantLeft {
        giveaway: GiveawayRecord,
        entrant: EntrantId,
    },
    /// Someone tried to enter an ended giveaway
    JoinedAfterEnd {
        giveaway: GiveawayRecord,
        entrant: EntrantId,
    },
    /// Remaining time crossed the last-chance threshold
    LastChance {
        giveaway: GiveawayRecord,
    },
    /// Displayable state may have changed
    Refresh {
        giveaway: GiveawayRecord,
    },
}

impl GiveawayEvent {
    pub fn giveaway(&self) -> &GiveawayRecord {
        match self {
            GiveawayEvent::Ended { giveaway, .. }
            | GiveawayEvent::NoWinner { giveaway, .. }
            | GiveawayEvent::Rerolled { giveaway, .. }
            | GiveawayEvent::Deleted { giveaway }
            | GiveawayEvent::EntrantJoined { giveaway, .. }
            | GiveawayEvent::EntrantLeft { giveaway, .. }
            | GiveawayEvent::JoinedAfterEnd { giveaway, .. }
            | GiveawayEvent::LastChance { giveaway }
            | GiveawayEvent::Refresh { giveaway } => giveaway,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GiveawayEvent::Ended { .. } => "ENDED",
            GiveawayEvent::NoWinner { .. } => "NO_WINNER",
            GiveawayEvent::Rerolled { .. } => "REROLLED",
            GiveawayEvent::Deleted { .. } => "DELETED",
            GiveawayEvent::EntrantJoined { .. } => "ENTRANT_JOINED",
            GiveawayEvent::EntrantLeft { .. } => "ENTRANT_LEFT",
            GiveawayEvent::JoinedAfterEnd { .. } => "JOINED_AFTER_END",
            GiveawayEvent::LastChance { .. } => "LAST_CHANCE",
            GiveawayEvent::Refresh { .. } => "REFRESH",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GiveawayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GiveawayEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: GiveawayEvent) {
        let kind = event.kind();
        let id = event.giveaway().id;
        // Err only means nobody is subscribed
        if self.tx.send(event).is_err() {
            log::trace!("No subscribers for {} event on giveaway {}", kind, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::giveaway::types::tests::sample_record;
    use crate::giveaway::types::Snowflake;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        bus.emit(GiveawayEvent::Ended {
            giveaway: sample_record(0),
            winners: vec![Snowflake(9)],
        });

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                GiveawayEvent::Ended { winners, .. } => assert_eq!(winners, vec![Snowflake(9)]),
                other => panic!("unexpected event {}", other.kind()),
            }
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(GiveawayEvent::Refresh {
            giveaway: sample_record(0),
        });
    }
}
