//! Reconciliation scheduler - periodic tick plus precise one-shot timers
//!
//! Every tick evaluates each record independently on a `JoinSet`, so a slow
//! host lookup for one giveaway delays only that giveaway. Per record, in order:
//!
//! 1. Retention purge of ended records
//! 2. Drop watch (purge when abandoned, end on enough valid entrants)
//! 3. Pause auto-expiry, otherwise a refresh of the paused display
//! 4. Overdue end
//! 5. End timer arming when the deadline falls inside the next tick
//! 6. Last-chance announcement, immediate once inside the threshold
//! 7. Display refresh
//!
//! Timers live in a table keyed by `(giveaway, kind)`. `edit`, `pause`, `end`
//! and `delete` cancel a giveaway's timers before the state they were armed
//! against is superseded. Each last-chance period is announced once: the table
//! remembers announced giveaways until an edit moves them back out of it.

use super::error::GiveawayError;
use super::events::GiveawayEvent;
use super::manager::GiveawayManager;
use super::types::{GiveawayId, GiveawayRecord, GiveawayState};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

/// What a tick did for one giveaway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Removed from the collection before its turn
    Missing,
    /// Nothing due
    Idle,
    /// Scheduled, paused or drop still running, refresh emitted
    Refreshed,
    Ended,
    Unpaused,
    Purged,
    /// A lifecycle call failed; retried on the next tick
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    End,
    LastChance,
}

impl TimerKind {
    fn as_str(&self) -> &'static str {
        match self {
            TimerKind::End => "end",
            TimerKind::LastChance => "last-chance",
        }
    }
}

/// Armed one-shot timers, at most one per `(giveaway, kind)`
#[derive(Default)]
pub(crate) struct TimerTable {
    handles: HashMap<(GiveawayId, TimerKind), JoinHandle<()>>,
    /// Last chance armed or emitted for the current period
    announced: HashSet<GiveawayId>,
}

impl TimerTable {
    pub(crate) fn is_armed(&self, id: GiveawayId, kind: TimerKind) -> bool {
        self.handles
            .get(&(id, kind))
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Store a timer, aborting the one it supersedes
    pub(crate) fn insert(&mut self, id: GiveawayId, kind: TimerKind, handle: JoinHandle<()>) {
        if let Some(previous) = self.handles.insert((id, kind), handle) {
            previous.abort();
        }
    }

    /// Forget a timer that has fired, without aborting it
    pub(crate) fn release(&mut self, id: GiveawayId, kind: TimerKind) {
        self.handles.remove(&(id, kind));
    }

    /// Abort every timer of one giveaway, returns how many were armed
    ///
    /// A last chance that was armed but never fired may be announced again.
    pub(crate) fn cancel(&mut self, id: GiveawayId) -> usize {
        let mut cancelled = 0;
        for kind in [TimerKind::End, TimerKind::LastChance] {
            if let Some(handle) = self.handles.remove(&(id, kind)) {
                handle.abort();
                if kind == TimerKind::LastChance {
                    self.announced.remove(&id);
                }
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel and drop every trace of a removed giveaway
    pub(crate) fn forget(&mut self, id: GiveawayId) -> usize {
        let cancelled = self.cancel(id);
        self.announced.remove(&id);
        cancelled
    }

    pub(crate) fn is_announced(&self, id: GiveawayId) -> bool {
        self.announced.contains(&id)
    }

    pub(crate) fn mark_announced(&mut self, id: GiveawayId) {
        self.announced.insert(id);
    }

    pub(crate) fn clear_announced(&mut self, id: GiveawayId) {
        self.announced.remove(&id);
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
        self.announced.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }
}

impl GiveawayManager {
    /// Spawn the tick loop on the current runtime
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.run_scheduler().await })
    }

    /// Tick forever at `tick_interval_ms`; the first tick runs immediately
    pub async fn run_scheduler(self) {
        let tick_ms = self.config().tick_interval_ms;
        log::info!("⏰ Starting giveaway scheduler (interval: {}ms)", tick_ms);

        let mut timer = interval(Duration::from_millis(tick_ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            self.tick().await;
        }
    }

    /// Run one reconciliation pass over every giveaway
    pub async fn tick(&self) -> Vec<(GiveawayId, Reconciliation)> {
        let tick_start = Instant::now();

        if self.needs_persist() {
            log::info!("🔄 Retrying giveaway persist after earlier failure");
            if self.persist().await.is_ok() {
                log::info!("✅ Giveaway collection persisted");
            }
        }

        let mut tasks = JoinSet::new();
        for id in self.ids() {
            let manager = self.clone();
            tasks.spawn(async move { (id, manager.reconcile(id).await) });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(outcome))) => outcomes.push((id, outcome)),
                Ok((id, Err(GiveawayError::AlreadyEnded(_)))) => {
                    log::debug!("Giveaway {} ended concurrently during tick", id);
                    outcomes.push((id, Reconciliation::Idle));
                }
                Ok((id, Err(e))) => {
                    if e.is_retryable() {
                        log::warn!("⚠️  Reconcile of giveaway {} deferred: {}", id, e);
                    } else {
                        log::error!("❌ Reconcile of giveaway {} failed: {}", id, e);
                    }
                    outcomes.push((id, Reconciliation::Failed));
                }
                Err(e) => log::error!("❌ Reconcile task aborted: {}", e),
            }
        }

        let changed = outcomes
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o,
                    Reconciliation::Ended | Reconciliation::Unpaused | Reconciliation::Purged
                )
            })
            .count();
        log::debug!(
            "📊 Tick: {} giveaways | {} changed | {} timers armed | {}ms",
            outcomes.len(),
            changed,
            self.lock_timers().len(),
            tick_start.elapsed().as_millis()
        );

        outcomes
    }

    /// Bring one giveaway in line with the clock
    pub async fn reconcile(&self, id: GiveawayId) -> Result<Reconciliation, GiveawayError> {
        let Some(record) = self.get(id) else {
            return Ok(Reconciliation::Missing);
        };
        let now = self.now();
        let config = self.config();

        if record.ended {
            if let Some(retention_ms) = config.retention_ms {
                let ended_at = record.end_at.unwrap_or(record.start_at);
                if now - ended_at >= retention_ms {
                    self.purge(id, "retention elapsed").await;
                    return Ok(Reconciliation::Purged);
                }
            }
            return Ok(Reconciliation::Idle);
        }

        if record.is_drop {
            if now - record.start_at >= config.drop_max_age_ms {
                self.purge(id, "drop abandoned").await;
                return Ok(Reconciliation::Purged);
            }
            let needed = record.winner_count as usize;
            if self.count_valid_entrants(&record, needed).await >= needed {
                self.end(id, None).await?;
                return Ok(Reconciliation::Ended);
            }
            self.emit(GiveawayEvent::Refresh { giveaway: record });
            return Ok(Reconciliation::Refreshed);
        }

        if record.pause.is_paused {
            return match record.pause.unpause_at {
                Some(unpause_at) if unpause_at <= now => {
                    self.unpause(id).await?;
                    Ok(Reconciliation::Unpaused)
                }
                _ => {
                    self.emit(GiveawayEvent::Refresh { giveaway: record });
                    Ok(Reconciliation::Refreshed)
                }
            };
        }

        if record.remaining_ms(now).map_or(false, |remaining| remaining <= 0) {
            self.end(id, None).await?;
            return Ok(Reconciliation::Ended);
        }

        self.arm_timers(&record, now);
        self.emit(GiveawayEvent::Refresh { giveaway: record });
        Ok(Reconciliation::Refreshed)
    }

    /// Arm the end and last-chance timers that fall due before the next tick
    ///
    /// A record already inside its last-chance period that has not been
    /// announced gets the `LastChance` event right away.
    pub(crate) fn arm_timers(&self, record: &GiveawayRecord, now: i64) {
        if record.state() != GiveawayState::Scheduled || record.is_drop {
            return;
        }
        let Some(remaining) = record.remaining_ms(now) else {
            return;
        };
        let window = self.config().tick_interval_ms as i64;

        let mut timers = self.lock_timers();

        if remaining < window && !timers.is_armed(record.id, TimerKind::End) {
            let delay = remaining.max(0) as u64;
            let handle = self.spawn_timer(record, TimerKind::End, delay);
            timers.insert(record.id, TimerKind::End, handle);
            log::debug!("⏰ Armed end timer for giveaway {} in {}ms", record.id, delay);
        }

        if record.last_chance.enabled && remaining > 0 && !timers.is_announced(record.id) {
            let until = remaining.saturating_sub(record.last_chance.threshold_ms);
            if until <= 0 {
                timers.mark_announced(record.id);
                log::debug!("📣 Giveaway {} is in its last chance", record.id);
                self.emit(GiveawayEvent::LastChance {
                    giveaway: record.clone(),
                });
            } else if until < window {
                let handle = self.spawn_timer(record, TimerKind::LastChance, until as u64);
                timers.insert(record.id, TimerKind::LastChance, handle);
                timers.mark_announced(record.id);
                log::debug!(
                    "⏰ Armed last-chance timer for giveaway {} in {}ms",
                    record.id,
                    until
                );
            }
        }
    }

    fn spawn_timer(
        &self,
        armed: &GiveawayRecord,
        kind: TimerKind,
        delay_ms: u64,
    ) -> JoinHandle<()> {
        // Weak so a pending timer never keeps a dropped manager alive
        let inner = Arc::downgrade(&self.inner);
        let id = armed.id;
        let armed_timing = (armed.end_at, armed.last_chance);

        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            let manager = GiveawayManager { inner };
            // Released before acting so `end` cancelling timers cannot abort this task
            manager.lock_timers().release(id, kind);
            log::debug!("⏰ {} timer fired for giveaway {}", kind.as_str(), id);

            match kind {
                TimerKind::End => match manager.end(id, None).await {
                    Ok(_) => {}
                    Err(GiveawayError::AlreadyEnded(_)) | Err(GiveawayError::NotFound(_)) => {}
                    Err(e) => log::warn!("⚠️  Timed end of giveaway {} failed: {}", id, e),
                },
                TimerKind::LastChance => {
                    let Some(record) = manager.get(id) else {
                        return;
                    };
                    let current = (record.end_at, record.last_chance);
                    if record.state() == GiveawayState::Scheduled
                        && record.last_chance.enabled
                        && current == armed_timing
                    {
                        manager.emit(GiveawayEvent::LastChance { giveaway: record });
                    } else {
                        log::debug!("Stale last-chance timer for giveaway {} skipped", id);
                    }
                }
            }
        })
    }

    /// Cancel every timer and write the collection a final time
    pub async fn shutdown(&self) -> Result<(), GiveawayError> {
        self.lock_timers().cancel_all();
        log::info!("🛑 Giveaway timers cancelled, persisting {} giveaways", self.len());
        self.persist().await
    }
}
