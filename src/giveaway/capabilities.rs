//! Host-supplied bonus and exemption rules
//!
//! Records only persist a rule's key; the code behind it is compiled into
//! the host and registered here at startup.
//!
//! Resolution:
//! - key registered: the rule is consulted at draw time
//! - key missing on a loaded record: logged, treated as no bonus / not exempt
//! - key missing on `start` / `edit`: rejected as invalid input

use super::types::{EntrantId, GiveawayRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Extra draw weight granted to an entrant
#[async_trait]
pub trait BonusRule: Send + Sync {
    async fn bonus(&self, giveaway: &GiveawayRecord, entrant: EntrantId) -> u32;
}

/// Returns true to disqualify an entrant
#[async_trait]
pub trait ExemptionRule: Send + Sync {
    async fn is_exempt(&self, giveaway: &GiveawayRecord, entrant: EntrantId) -> bool;
}

#[async_trait]
impl<F> BonusRule for F
where
    F: Fn(&GiveawayRecord, EntrantId) -> u32 + Send + Sync,
{
    async fn bonus(&self, giveaway: &GiveawayRecord, entrant: EntrantId) -> u32 {
        self(giveaway, entrant)
    }
}

#[async_trait]
impl<F> ExemptionRule for F
where
    F: Fn(&GiveawayRecord, EntrantId) -> bool + Send + Sync,
{
    async fn is_exempt(&self, giveaway: &GiveawayRecord, entrant: EntrantId) -> bool {
        self(giveaway, entrant)
    }
}

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    bonuses: HashMap<String, Arc<dyn BonusRule>>,
    exemptions: HashMap<String, Arc<dyn ExemptionRule>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_bonus(&mut self, key: impl Into<String>, rule: impl BonusRule + 'static) {
        self.bonuses.insert(key.into(), Arc::new(rule));
    }

    pub fn register_exemption(
        &mut self,
        key: impl Into<String>,
        rule: impl ExemptionRule + 'static,
    ) {
        self.exemptions.insert(key.into(), Arc::new(rule));
    }

    pub fn bonus(&self, key: &str) -> Option<Arc<dyn BonusRule>> {
        self.bonuses.get(key).cloned()
    }

    pub fn exemption(&self, key: &str) -> Option<Arc<dyn ExemptionRule>> {
        self.exemptions.get(key).cloned()
    }

    /// Keys referenced by `record` that are not registered
    pub fn missing_keys(&self, record: &GiveawayRecord) -> Vec<String> {
        let mut missing: Vec<String> = record
            .bonus_entries
            .iter()
            .filter(|entry| !self.bonuses.contains_key(&entry.key))
            .map(|entry| entry.key.clone())
            .collect();
        if let Some(key) = &record.exemption {
            if !self.exemptions.contains_key(key) {
                missing.push(key.clone());
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::giveaway::types::tests::sample_record;
    use crate::giveaway::types::{BonusEntry, Snowflake};

    struct BoosterBonus;

    #[async_trait]
    impl BonusRule for BoosterBonus {
        async fn bonus(&self, _giveaway: &GiveawayRecord, entrant: EntrantId) -> u32 {
            if entrant.0 % 2 == 0 {
                2
            } else {
                0
            }
        }
    }

    #[tokio::test]
    async fn test_registered_rules_resolve_by_key() {
        let mut registry = CapabilityRegistry::new();
        registry.register_bonus("booster", BoosterBonus);
        registry.register_bonus("flat", |_: &GiveawayRecord, _: EntrantId| 3u32);
        registry.register_exemption("no-alts", |_: &GiveawayRecord, e: EntrantId| e.0 > 1_000);

        let record = sample_record(0);
        let booster = registry.bonus("booster").unwrap();
        assert_eq!(booster.bonus(&record, Snowflake(4)).await, 2);
        assert_eq!(booster.bonus(&record, Snowflake(5)).await, 0);
        assert_eq!(registry.bonus("flat").unwrap().bonus(&record, Snowflake(1)).await, 3);

        let exemption = registry.exemption("no-alts").unwrap();
        assert!(exemption.is_exempt(&record, Snowflake(5_000)).await);
        assert!(!exemption.is_exempt(&record, Snowflake(5)).await);
        assert!(registry.bonus("unknown").is_none());
    }

    #[test]
    fn test_missing_keys() {
        let mut registry = CapabilityRegistry::new();
        registry.register_bonus("booster", BoosterBonus);

        let mut record = sample_record(0);
        record.bonus_entries = vec![
            BonusEntry {
                key: "booster".to_string(),
                cumulative: false,
            },
            BonusEntry {
                key: "level".to_string(),
                cumulative: true,
            },
        ];
        record.exemption = Some("staff".to_string());

        assert_eq!(registry.missing_keys(&record), vec!["level", "staff"]);
    }
}
