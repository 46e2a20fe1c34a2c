//! Giveaway manager - lifecycle operations over the shared collection
//!
//! ## Locking
//!
//! The record collection sits behind a std `Mutex` that is only held for
//! synchronous sections (validate + mutate + clone), never across an await.
//! Host lookups, rules and store writes run unlocked:
//!
//! ```text
//! lock → transition → clone → unlock
//!     ↓
//! await host / rules / store
//!     ↓
//! emit event
//! ```
//!
//! `end` relies on the check-and-set of `ended` inside the first locked
//! section, so a second concurrent `end` fails fast with `AlreadyEnded`.
//!
//! ## Persistence
//!
//! Every mutating operation writes the whole collection before returning.
//! A failed write is reported to the caller but the in-memory change stays;
//! the collection is flagged dirty and the scheduler retries on each tick.

use super::capabilities::CapabilityRegistry;
use super::clock::{Clock, SystemClock};
use super::config::ManagerConfig;
use super::error::GiveawayError;
use super::events::{EventBus, GiveawayEvent};
use super::host::{ChatHost, FetchError};
use super::scheduler::TimerTable;
use super::selector::{self, WeightedPool};
use super::types::{
    EditPatch, EntrantId, GiveawayId, GiveawayRecord, GiveawayState, GiveawayTarget,
    PauseOptions, RerollOptions, StartOptions,
};
use crate::storage::PersistenceGateway;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

pub struct ManagerBuilder {
    config: ManagerConfig,
    store: Arc<dyn PersistenceGateway>,
    host: Arc<dyn ChatHost>,
    capabilities: CapabilityRegistry,
    clock: Arc<dyn Clock>,
}

impl ManagerBuilder {
    pub fn capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build an empty manager; call `load` to seed it from the store
    pub fn build(self) -> GiveawayManager {
        let events = EventBus::new(self.config.event_buffer);
        GiveawayManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                records: Mutex::new(Vec::new()),
                timers: Mutex::new(TimerTable::default()),
                store: self.store,
                host: self.host,
                capabilities: self.capabilities,
                events,
                clock: self.clock,
                persist_lock: tokio::sync::Mutex::new(()),
                dirty: AtomicBool::new(false),
            }),
        }
    }
}

pub(crate) struct ManagerInner {
    pub(crate) config: ManagerConfig,
    records: Mutex<Vec<GiveawayRecord>>,
    pub(crate) timers: Mutex<TimerTable>,
    store: Arc<dyn PersistenceGateway>,
    host: Arc<dyn ChatHost>,
    capabilities: CapabilityRegistry,
    events: EventBus,
    clock: Arc<dyn Clock>,
    /// Serializes full-collection writes so a newer snapshot is never overtaken
    persist_lock: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
}

/// Owner of the active giveaway collection
///
/// Cheap to clone; all clones share the same collection, timers and store.
#[derive(Clone)]
pub struct GiveawayManager {
    pub(crate) inner: Arc<ManagerInner>,
}

enum EntrantChange {
    Changed(GiveawayRecord),
    AfterEnd(GiveawayRecord),
    Unchanged,
}

impl GiveawayManager {
    pub fn builder(
        config: ManagerConfig,
        store: Arc<dyn PersistenceGateway>,
        host: Arc<dyn ChatHost>,
    ) -> ManagerBuilder {
        ManagerBuilder {
            config,
            store,
            host,
            capabilities: CapabilityRegistry::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Seed the collection from the store, replacing anything held in memory
    pub async fn load(&self) -> Result<usize, GiveawayError> {
        let loaded = self.inner.store.get_all().await?;

        for record in &loaded {
            let missing = self.inner.capabilities.missing_keys(record);
            if !missing.is_empty() {
                log::warn!(
                    "⚠️  Giveaway {} references unregistered rules: {:?}",
                    record.id,
                    missing
                );
            }
        }

        let count = loaded.len();
        *self.lock_records() = loaded;
        log::info!(
            "📂 Loaded {} giveaways from {} store",
            count,
            self.inner.store.backend_type()
        );
        Ok(count)
    }

    // ---- lifecycle operations ----

    pub async fn start(
        &self,
        target: GiveawayTarget,
        options: StartOptions,
    ) -> Result<GiveawayRecord, GiveawayError> {
        let now = self.now();
        let record = GiveawayRecord::from_start(target, options, now, &self.inner.config)?;
        self.check_capabilities(&record)?;

        {
            let mut records = self.lock_records();
            if records.iter().any(|r| r.id == record.id) {
                return Err(GiveawayError::validation(format!(
                    "giveaway {} already exists",
                    record.id
                )));
            }
            records.push(record.clone());
        }

        match record.end_at {
            Some(end_at) => log::info!(
                "🎉 Started giveaway {} ({}): {} winner(s), ends in {}ms",
                record.id,
                record.prize,
                record.winner_count,
                end_at - now
            ),
            None => log::info!(
                "🎉 Started drop {} ({}): {} winner(s)",
                record.id,
                record.prize,
                record.winner_count
            ),
        }

        let persisted = self.persist().await;
        self.arm_timers(&record, now);
        persisted?;
        Ok(record)
    }

    pub async fn edit(
        &self,
        id: GiveawayId,
        patch: EditPatch,
    ) -> Result<GiveawayRecord, GiveawayError> {
        self.check_patch_capabilities(&patch)?;

        let config = &self.inner.config;
        let (record, timing_changed) = self.with_record(id, |r| {
            let changed = r.apply_edit(patch, config)?;
            Ok((r.clone(), changed))
        })?;

        let now = self.now();
        self.cancel_timers(id);
        if !record.is_last_chance(now) {
            self.lock_timers().clear_announced(id);
        }
        self.arm_timers(&record, now);
        log::info!("✏️  Edited giveaway {} (timing changed: {})", id, timing_changed);

        let persisted = self.persist().await;
        self.inner.events.emit(GiveawayEvent::Refresh {
            giveaway: record.clone(),
        });
        persisted?;
        Ok(record)
    }

    pub async fn pause(
        &self,
        id: GiveawayId,
        options: PauseOptions,
    ) -> Result<GiveawayRecord, GiveawayError> {
        let now = self.now();
        let record = self.with_record(id, |r| {
            r.apply_pause(options, now)?;
            Ok(r.clone())
        })?;
        self.cancel_timers(id);

        log::info!(
            "⏸️  Paused giveaway {} ({}ms left, auto-unpause: {:?})",
            id,
            record.pause.remaining_ms.unwrap_or(0),
            record.pause.unpause_at
        );

        let persisted = self.persist().await;
        self.inner.events.emit(GiveawayEvent::Refresh {
            giveaway: record.clone(),
        });
        persisted?;
        Ok(record)
    }

    pub async fn unpause(&self, id: GiveawayId) -> Result<GiveawayRecord, GiveawayError> {
        let now = self.now();
        let record = self.with_record(id, |r| {
            r.apply_unpause(now)?;
            Ok(r.clone())
        })?;
        self.arm_timers(&record, now);

        log::info!("▶️  Unpaused giveaway {}", id);

        let persisted = self.persist().await;
        self.inner.events.emit(GiveawayEvent::Refresh {
            giveaway: record.clone(),
        });
        persisted?;
        Ok(record)
    }

    /// End a giveaway and draw its winners
    ///
    /// An empty winner list is a normal outcome, announced as `NoWinner`
    /// carrying `no_winner_message`.
    pub async fn end(
        &self,
        id: GiveawayId,
        no_winner_message: Option<String>,
    ) -> Result<Vec<EntrantId>, GiveawayError> {
        let record = self.with_record(id, |r| {
            r.begin_end()?;
            Ok(r.clone())
        })?;
        self.cancel_timers(id);

        match self.inner.host.message_exists(&record).await {
            Ok(()) => {}
            Err(FetchError::Transient(reason)) => {
                let rolled_back = self.with_record(id, |r| {
                    r.rollback_end();
                    Ok(())
                });
                if rolled_back.is_err() {
                    log::debug!("Giveaway {} removed while its end was rolled back", id);
                }
                log::warn!("⚠️  End of giveaway {} deferred: {}", id, reason);
                return Err(GiveawayError::TransientFetch { id, reason });
            }
            Err(FetchError::Gone(reason)) => {
                self.purge(id, "message gone").await;
                return Err(GiveawayError::PermanentFetch { id, reason });
            }
        }

        let winners = self
            .roll(&record, record.winner_count as usize, &[])
            .await;
        let now = self.now();
        let ended = self.with_record(id, |r| {
            r.complete_end(winners.clone(), now);
            Ok(r.clone())
        })?;

        log::info!(
            "🏁 Giveaway {} ended: {} winner(s) from {} entrant(s)",
            id,
            winners.len(),
            ended.entrants.len()
        );

        let persisted = self.persist().await;
        if winners.is_empty() {
            self.inner.events.emit(GiveawayEvent::NoWinner {
                giveaway: ended,
                message: no_winner_message,
            });
        } else {
            self.inner.events.emit(GiveawayEvent::Ended {
                giveaway: ended,
                winners: winners.clone(),
            });
        }
        persisted?;
        Ok(winners)
    }

    /// Fresh draw on an ended giveaway against the live entrant set
    pub async fn reroll(
        &self,
        id: GiveawayId,
        options: RerollOptions,
    ) -> Result<Vec<EntrantId>, GiveawayError> {
        let record = self.with_record(id, |r| {
            r.ensure_rerollable()?;
            Ok(r.clone())
        })?;
        let winner_count = options.winner_count.unwrap_or(record.winner_count);
        if winner_count == 0 {
            return Err(GiveawayError::validation("winner count must be a positive integer"));
        }

        match self.inner.host.message_exists(&record).await {
            Ok(()) => {}
            Err(FetchError::Transient(reason)) => {
                return Err(GiveawayError::TransientFetch { id, reason })
            }
            Err(FetchError::Gone(reason)) => {
                self.purge(id, "message gone").await;
                return Err(GiveawayError::PermanentFetch { id, reason });
            }
        }

        let exclude = if options.exclude_previous_winners {
            record.winner_ids.clone()
        } else {
            Vec::new()
        };
        let winners = self.roll(&record, winner_count as usize, &exclude).await;
        let updated = self.with_record(id, |r| {
            r.winner_ids = winners.clone();
            Ok(r.clone())
        })?;

        log::info!("🔁 Rerolled giveaway {}: {} winner(s)", id, winners.len());

        let persisted = self.persist().await;
        self.inner.events.emit(GiveawayEvent::Rerolled {
            giveaway: updated,
            winners: winners.clone(),
        });
        persisted?;
        Ok(winners)
    }

    /// Remove a giveaway regardless of state; the chat message is left to the host
    pub async fn delete(&self, id: GiveawayId) -> Result<GiveawayRecord, GiveawayError> {
        let record = self.remove_record(id).ok_or(GiveawayError::NotFound(id))?;
        self.forget_timers(id);

        log::info!("🗑️  Deleted giveaway {}", id);

        let persisted = self.persist().await;
        self.inner.events.emit(GiveawayEvent::Deleted {
            giveaway: record.clone(),
        });
        persisted?;
        Ok(record)
    }

    // ---- entrant discovery hook ----

    /// Host push: `entrant` registered interest in giveaway `id`
    pub async fn entrant_joined(
        &self,
        id: GiveawayId,
        entrant: EntrantId,
    ) -> Result<(), GiveawayError> {
        let change = self.with_record(id, |r| {
            if r.ended {
                Ok(EntrantChange::AfterEnd(r.clone()))
            } else if r.entrants.insert(entrant) {
                Ok(EntrantChange::Changed(r.clone()))
            } else {
                Ok(EntrantChange::Unchanged)
            }
        })?;

        match change {
            EntrantChange::Unchanged => Ok(()),
            EntrantChange::AfterEnd(giveaway) => {
                log::debug!("Entrant {} joined ended giveaway {}", entrant, id);
                self.inner
                    .events
                    .emit(GiveawayEvent::JoinedAfterEnd { giveaway, entrant });
                Ok(())
            }
            EntrantChange::Changed(giveaway) => {
                log::debug!("➕ Entrant {} joined giveaway {}", entrant, id);
                let persisted = self.persist().await;
                self.inner
                    .events
                    .emit(GiveawayEvent::EntrantJoined { giveaway, entrant });
                persisted
            }
        }
    }

    /// Host push: `entrant` withdrew from giveaway `id`
    ///
    /// Ignored once the giveaway has ended.
    pub async fn entrant_left(
        &self,
        id: GiveawayId,
        entrant: EntrantId,
    ) -> Result<(), GiveawayError> {
        let change = self.with_record(id, |r| {
            if !r.ended && r.entrants.remove(&entrant) {
                Ok(EntrantChange::Changed(r.clone()))
            } else {
                Ok(EntrantChange::Unchanged)
            }
        })?;

        match change {
            EntrantChange::Changed(giveaway) => {
                log::debug!("➖ Entrant {} left giveaway {}", entrant, id);
                let persisted = self.persist().await;
                self.inner
                    .events
                    .emit(GiveawayEvent::EntrantLeft { giveaway, entrant });
                persisted
            }
            _ => Ok(()),
        }
    }

    // ---- queries ----

    pub fn get(&self, id: GiveawayId) -> Option<GiveawayRecord> {
        self.lock_records().iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot of the collection, in stored order
    pub fn all(&self) -> Vec<GiveawayRecord> {
        self.lock_records().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    pub fn state(&self, id: GiveawayId) -> Option<GiveawayState> {
        self.get(id).map(|r| r.state())
    }

    pub fn remaining_ms(&self, id: GiveawayId) -> Option<i64> {
        let now = self.now();
        self.get(id).and_then(|r| r.remaining_ms(now))
    }

    pub fn is_last_chance(&self, id: GiveawayId) -> bool {
        let now = self.now();
        self.get(id).map(|r| r.is_last_chance(now)).unwrap_or(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GiveawayEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn now(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// True while the last store write failed and has not been retried yet
    pub fn needs_persist(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    // ---- internals shared with the scheduler ----

    fn lock_records(&self) -> MutexGuard<'_, Vec<GiveawayRecord>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_record<T>(
        &self,
        id: GiveawayId,
        f: impl FnOnce(&mut GiveawayRecord) -> Result<T, GiveawayError>,
    ) -> Result<T, GiveawayError> {
        let mut records = self.lock_records();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(GiveawayError::NotFound(id))?;
        f(record)
    }

    fn remove_record(&self, id: GiveawayId) -> Option<GiveawayRecord> {
        let mut records = self.lock_records();
        let idx = records.iter().position(|r| r.id == id)?;
        Some(records.remove(idx))
    }

    pub(crate) fn ids(&self) -> Vec<GiveawayId> {
        self.lock_records().iter().map(|r| r.id).collect()
    }

    /// Write the whole collection through to the store
    pub(crate) async fn persist(&self) -> Result<(), GiveawayError> {
        let _guard = self.inner.persist_lock.lock().await;
        // Snapshot taken under the write lock so later writes carry newer state
        let snapshot = self.all();

        match self.inner.store.persist_all(&snapshot).await {
            Ok(()) => {
                self.inner.dirty.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.inner.dirty.store(true, Ordering::SeqCst);
                log::error!(
                    "❌ Failed to persist {} giveaways to {} store: {}",
                    snapshot.len(),
                    self.inner.store.backend_type(),
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Remove a record without a caller to report to (retention, abandoned drop, gone message)
    pub(crate) async fn purge(&self, id: GiveawayId, reason: &str) -> Option<GiveawayRecord> {
        let record = self.remove_record(id)?;
        self.forget_timers(id);

        log::info!("🧹 Purged giveaway {} ({})", id, reason);

        if self.persist().await.is_err() {
            log::warn!("⚠️  Purge of {} not yet persisted, retrying next tick", id);
        }
        self.inner.events.emit(GiveawayEvent::Deleted {
            giveaway: record.clone(),
        });
        Some(record)
    }

    pub(crate) fn emit(&self, event: GiveawayEvent) {
        self.inner.events.emit(event);
    }

    pub(crate) fn lock_timers(&self) -> MutexGuard<'_, TimerTable> {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn cancel_timers(&self, id: GiveawayId) {
        let cancelled = self.lock_timers().cancel(id);
        if cancelled > 0 {
            log::debug!("Cancelled {} timer(s) for giveaway {}", cancelled, id);
        }
    }

    fn forget_timers(&self, id: GiveawayId) {
        let cancelled = self.lock_timers().forget(id);
        if cancelled > 0 {
            log::debug!("Cancelled {} timer(s) for removed giveaway {}", cancelled, id);
        }
    }

    fn check_capabilities(&self, record: &GiveawayRecord) -> Result<(), GiveawayError> {
        let missing = self.inner.capabilities.missing_keys(record);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GiveawayError::validation(format!(
                "unregistered rule keys: {}",
                missing.join(", ")
            )))
        }
    }

    fn check_patch_capabilities(&self, patch: &EditPatch) -> Result<(), GiveawayError> {
        let caps = &self.inner.capabilities;
        let mut missing: Vec<&str> = Vec::new();
        if let Some(entries) = &patch.bonus_entries {
            missing.extend(
                entries
                    .iter()
                    .filter(|e| caps.bonus(&e.key).is_none())
                    .map(|e| e.key.as_str()),
            );
        }
        if let Some(Some(key)) = &patch.exemption {
            if caps.exemption(key).is_none() {
                missing.push(key.as_str());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GiveawayError::validation(format!(
                "unregistered rule keys: {}",
                missing.join(", ")
            )))
        }
    }

    // ---- draw support ----

    async fn multiplicity(&self, record: &GiveawayRecord, entrant: EntrantId) -> u32 {
        let mut bonuses = Vec::with_capacity(record.bonus_entries.len());
        for entry in &record.bonus_entries {
            match self.inner.capabilities.bonus(&entry.key) {
                Some(rule) => bonuses.push((rule.bonus(record, entrant).await, entry.cumulative)),
                None => log::debug!("Bonus rule '{}' not registered, skipped", entry.key),
            }
        }
        selector::multiplicity(bonuses)
    }

    /// Draw-time validity: not exempt, still a member, not disqualified by rule
    pub(crate) async fn is_valid_entrant(&self, record: &GiveawayRecord, entrant: EntrantId) -> bool {
        if record.exempt_members.contains(&entrant) {
            return false;
        }

        match self.inner.host.is_member(record.guild_id, entrant).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                log::debug!("Membership lookup for {} failed ({}), treated as invalid", entrant, e);
                return false;
            }
        }

        if let Some(key) = &record.exemption {
            match self.inner.capabilities.exemption(key) {
                Some(rule) => {
                    if rule.is_exempt(record, entrant).await {
                        return false;
                    }
                }
                None => log::debug!("Exemption rule '{}' not registered, skipped", key),
            }
        }
        true
    }

    /// Count valid entrants, stopping once `needed` are found
    pub(crate) async fn count_valid_entrants(&self, record: &GiveawayRecord, needed: usize) -> usize {
        if record.entrants.len() < needed {
            return 0;
        }
        let mut valid = 0;
        for entrant in &record.entrants {
            if self.is_valid_entrant(record, *entrant).await {
                valid += 1;
                if valid >= needed {
                    break;
                }
            }
        }
        valid
    }

    async fn roll(
        &self,
        record: &GiveawayRecord,
        winner_count: usize,
        exclude: &[EntrantId],
    ) -> Vec<EntrantId> {
        let mut weighted = Vec::with_capacity(record.entrants.len());
        for entrant in &record.entrants {
            if exclude.contains(entrant) {
                continue;
            }
            weighted.push((*entrant, self.multiplicity(record, *entrant).await));
        }

        let pool = WeightedPool::new(&weighted);
        let mut rng = StdRng::from_entropy();
        selector::draw(pool, winner_count, &mut rng, |entrant| {
            self.is_valid_entrant(record, entrant)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::giveaway::clock::ManualClock;
    use crate::giveaway::host::PermissiveHost;
    use crate::giveaway::types::tests::sample_record;
    use crate::giveaway::types::{BonusEntry, Snowflake};
    use crate::storage::MemoryStore;

    fn manager_with(store: Arc<MemoryStore>, capabilities: CapabilityRegistry) -> GiveawayManager {
        GiveawayManager::builder(ManagerConfig::default(), store, Arc::new(PermissiveHost))
            .capabilities(capabilities)
            .clock(Arc::new(ManualClock::new(0)))
            .build()
    }

    fn bonus(key: &str, cumulative: bool) -> BonusEntry {
        BonusEntry {
            key: key.to_string(),
            cumulative,
        }
    }

    #[tokio::test]
    async fn test_load_keeps_store_order_and_unknown_rules() {
        let first = sample_record(0);
        let mut second = sample_record(0);
        second.id = Snowflake(2);
        second.bonus_entries = vec![bonus("retired-rule", false)];

        let store = Arc::new(MemoryStore::with_records(vec![first.clone(), second.clone()]));
        let manager = manager_with(store.clone(), CapabilityRegistry::new());

        assert_eq!(manager.load().await.unwrap(), 2);
        assert_eq!(manager.ids(), vec![first.id, second.id]);

        // Records loaded with a stale rule key stay operable
        manager.entrant_joined(second.id, Snowflake(5)).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_multiplicity_resolves_bonuses_by_key() {
        let mut capabilities = CapabilityRegistry::new();
        capabilities.register_bonus("booster", |_: &GiveawayRecord, _: EntrantId| 5u32);
        capabilities.register_bonus("level", |_: &GiveawayRecord, e: EntrantId| e.0 as u32);
        capabilities.register_bonus("invites", |_: &GiveawayRecord, _: EntrantId| 2u32);
        let manager = manager_with(Arc::new(MemoryStore::new()), capabilities);

        let mut record = sample_record(0);
        record.bonus_entries = vec![
            bonus("booster", false),
            bonus("level", true),
            bonus("invites", true),
            bonus("unregistered", false),
        ];

        // cumulative 1 + 2 loses to the booster's 5
        assert_eq!(manager.multiplicity(&record, Snowflake(1)).await, 6);
        // cumulative 7 + 2 beats it
        assert_eq!(manager.multiplicity(&record, Snowflake(7)).await, 10);
    }

    #[tokio::test]
    async fn test_count_valid_entrants_skips_exempt_members() {
        let manager = manager_with(Arc::new(MemoryStore::new()), CapabilityRegistry::new());

        let mut record = sample_record(0);
        record.entrants = (1..=5).map(Snowflake).collect();
        record.exempt_members = [Snowflake(1)].into_iter().collect();

        assert_eq!(manager.count_valid_entrants(&record, 2).await, 2);
        assert_eq!(manager.count_valid_entrants(&record, 5).await, 4);
        assert_eq!(manager.count_valid_entrants(&record, 6).await, 0);
    }
}
