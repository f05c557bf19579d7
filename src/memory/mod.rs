//! Tiered memory: a three-tier key-value store with access-weighted
//! importance scoring driving automatic promotion, demotion, and eviction.
//!
//! Keys live in exactly one tier at a time. The working tier holds hot,
//! short-lived entries; episodic holds recent context; persistent entries
//! are written through the injected [`DurableStore`] and survive restart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SwarmError;
use crate::events::{EventBus, SwarmEvent};
use crate::persistence::{DurableStore, KIND_MEMORY};

/// Promotion score at or above which a retrieved entry moves up one tier.
pub const PROMOTION_THRESHOLD: f64 = 0.7;
/// Demotion score below which maintenance moves an entry down one tier.
pub const DEMOTION_THRESHOLD: f64 = 0.3;
/// Demotion score below which a working-tier entry is deleted outright.
pub const DELETION_FLOOR: f64 = 0.1;
/// Decay rate applied when none is configured.
pub const DEFAULT_DECAY_RATE: f64 = 0.1;
/// Importance multiplier applied on promotion.
pub const PROMOTE_IMPORTANCE_FACTOR: f64 = 1.2;
/// Importance multiplier applied on demotion.
pub const DEMOTE_IMPORTANCE_FACTOR: f64 = 0.8;

/// Memory tier, ordered bottom (working) to top (persistent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Transient context for in-flight work. TTL on the order of minutes.
    Working,
    /// Recent history. TTL around one day.
    Episodic,
    /// Durable knowledge, written through the durable store. TTL about a year.
    Persistent,
}

impl MemoryTier {
    /// Default time-to-live for entries stored in this tier.
    pub fn default_ttl(&self) -> Duration {
        match self {
            MemoryTier::Working => Duration::minutes(30),
            MemoryTier::Episodic => Duration::hours(24),
            MemoryTier::Persistent => Duration::days(365),
        }
    }

    /// The tier one step up, if any.
    pub fn above(&self) -> Option<MemoryTier> {
        match self {
            MemoryTier::Working => Some(MemoryTier::Episodic),
            MemoryTier::Episodic => Some(MemoryTier::Persistent),
            MemoryTier::Persistent => None,
        }
    }

    /// The tier one step down, if any.
    pub fn below(&self) -> Option<MemoryTier> {
        match self {
            MemoryTier::Working => None,
            MemoryTier::Episodic => Some(MemoryTier::Working),
            MemoryTier::Persistent => Some(MemoryTier::Episodic),
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryTier::Working => "working",
            MemoryTier::Episodic => "episodic",
            MemoryTier::Persistent => "persistent",
        };
        write!(f, "{}", s)
    }
}

/// One stored entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Key, unique within the whole store (a key exists in one tier only).
    pub key: String,
    /// Arbitrary payload.
    pub value: Value,
    /// Owning tier.
    pub tier: MemoryTier,
    /// Category tag, e.g. `"task_context"` or `"knowledge"`.
    pub category: String,
    /// Optional owner (agent name or caller id).
    pub owner: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Number of retrievals.
    pub access_count: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last retrieval timestamp.
    pub last_accessed_at: DateTime<Utc>,
    /// Importance in [0, 1].
    pub importance: f64,
    /// Per-day decay applied to the demotion score.
    pub decay_rate: f64,
    /// Derived promotion score.
    pub promotion_score: f64,
    /// Derived demotion score.
    pub demotion_score: f64,
    /// Pinned entries are exempt from automatic demotion and eviction.
    pub pinned: bool,
    /// Expiry; entries past it are removed by maintenance.
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    /// Hours since creation, floored at one minute to keep the access-rate
    /// term finite for fresh entries.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds().max(0) as f64 / 3_600_000.0).max(1.0 / 60.0)
    }

    /// Hours since the last access.
    pub fn hours_since_access(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed_at).num_milliseconds().max(0) as f64 / 3_600_000.0
    }

    /// Recompute both derived scores.
    ///
    /// `promotion = 0.5*importance + 0.3*(accesses/ageHours) + 0.2*(1/(1+hoursSinceAccess))`
    /// with the access-rate term capped at 1;
    /// `demotion = max(0, importance - (hoursSinceAccess/24)*decayRate)`.
    pub fn recompute_scores(&mut self, now: DateTime<Utc>) {
        let access_rate = (self.access_count as f64 / self.age_hours(now)).min(1.0);
        let recency = 1.0 / (1.0 + self.hours_since_access(now));
        self.promotion_score = 0.5 * self.importance + 0.3 * access_rate + 0.2 * recency;
        self.demotion_score =
            (self.importance - (self.hours_since_access(now) / 24.0) * self.decay_rate).max(0.0);
    }

    /// Whether the entry is past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }
}

/// Options for [`TieredMemory::store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Category tag.
    pub category: String,
    /// Optional owner.
    pub owner: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Importance in [0, 1].
    pub importance: f64,
    /// Time-to-live override; the tier default applies when absent.
    pub ttl: Option<Duration>,
    /// Exempt from automatic demotion and eviction.
    pub pinned: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            category: "general".to_string(),
            owner: None,
            tags: Vec::new(),
            importance: 0.5,
            ttl: None,
            pinned: false,
        }
    }
}

/// Filter for [`TieredMemory::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Restrict to one tier.
    pub tier: Option<MemoryTier>,
    /// Exact category match.
    pub category: Option<String>,
    /// Exact owner match.
    pub owner: Option<String>,
    /// Entries must carry every listed tag.
    pub tags: Vec<String>,
    /// Minimum importance.
    pub min_importance: Option<f64>,
}

/// Summary of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Entries removed because their TTL passed.
    pub expired: usize,
    /// Entries moved down one tier.
    pub demoted: usize,
    /// Working-tier entries deleted outright.
    pub deleted: usize,
}

/// The three-tier store.
pub struct TieredMemory {
    working: HashMap<String, MemoryEntry>,
    episodic: HashMap<String, MemoryEntry>,
    persistent: HashMap<String, MemoryEntry>,
    working_capacity: usize,
    episodic_capacity: usize,
    persistent_capacity: usize,
    store: Option<Arc<dyn DurableStore>>,
    events: EventBus,
}

impl TieredMemory {
    /// Create a store with the given per-tier capacities. Passing a durable
    /// store makes the persistent tier survive restarts.
    pub fn new(
        working_capacity: usize,
        episodic_capacity: usize,
        persistent_capacity: usize,
        store: Option<Arc<dyn DurableStore>>,
        events: EventBus,
    ) -> Self {
        Self {
            working: HashMap::new(),
            episodic: HashMap::new(),
            persistent: HashMap::new(),
            working_capacity,
            episodic_capacity,
            persistent_capacity,
            store,
            events,
        }
    }

    fn tier_map(&self, tier: MemoryTier) -> &HashMap<String, MemoryEntry> {
        match tier {
            MemoryTier::Working => &self.working,
            MemoryTier::Episodic => &self.episodic,
            MemoryTier::Persistent => &self.persistent,
        }
    }

    fn tier_map_mut(&mut self, tier: MemoryTier) -> &mut HashMap<String, MemoryEntry> {
        match tier {
            MemoryTier::Working => &mut self.working,
            MemoryTier::Episodic => &mut self.episodic,
            MemoryTier::Persistent => &mut self.persistent,
        }
    }

    fn capacity(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::Working => self.working_capacity,
            MemoryTier::Episodic => self.episodic_capacity,
            MemoryTier::Persistent => self.persistent_capacity,
        }
    }

    /// Persist or un-persist an entry as it crosses the persistent boundary.
    fn write_through(&self, entry: &MemoryEntry) {
        if entry.tier != MemoryTier::Persistent {
            return;
        }
        if let Some(store) = &self.store {
            match serde_json::to_value(entry) {
                Ok(payload) => {
                    if let Err(err) = store.save(KIND_MEMORY, &entry.key, &payload) {
                        log::error!("failed to persist memory entry {}: {}", entry.key, err);
                    }
                }
                Err(err) => log::error!("failed to serialize memory entry {}: {}", entry.key, err),
            }
        }
    }

    fn erase_durable(&self, key: &str) {
        if let Some(store) = &self.store {
            if let Err(err) = store.delete(KIND_MEMORY, key) {
                log::error!("failed to delete persisted memory entry {}: {}", key, err);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Store an entry in the given tier, replacing any previous entry under
    /// the same key in any tier. Exceeding the tier capacity immediately
    /// evicts the lowest-demotion-score unpinned entry.
    pub fn store(
        &mut self,
        key: impl Into<String>,
        value: Value,
        tier: MemoryTier,
        options: StoreOptions,
    ) -> Result<(), SwarmError> {
        let key = key.into();
        if key.is_empty() {
            return Err(SwarmError::Validation("memory key must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&options.importance) {
            return Err(SwarmError::Validation(format!(
                "importance {} outside [0, 1]",
                options.importance
            )));
        }

        // A key lives in exactly one tier.
        self.remove_entry(&key);

        let now = Utc::now();
        let ttl = options.ttl.unwrap_or_else(|| tier.default_ttl());
        let mut entry = MemoryEntry {
            key: key.clone(),
            value,
            tier,
            category: options.category,
            owner: options.owner,
            tags: options.tags,
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
            importance: options.importance,
            decay_rate: DEFAULT_DECAY_RATE,
            promotion_score: 0.0,
            demotion_score: 0.0,
            pinned: options.pinned,
            expires_at: Some(now + ttl),
        };
        entry.recompute_scores(now);

        self.write_through(&entry);
        self.tier_map_mut(tier).insert(key, entry);
        self.evict_if_over_capacity(tier);
        Ok(())
    }

    /// Retrieve a value, searching the named tier or all tiers from working
    /// to persistent. Bumps the access count, recomputes scores, and
    /// auto-promotes the entry when its promotion score crosses
    /// [`PROMOTION_THRESHOLD`].
    pub fn retrieve(&mut self, key: &str, tier: Option<MemoryTier>) -> Option<Value> {
        let tiers: Vec<MemoryTier> = match tier {
            Some(t) => vec![t],
            None => vec![MemoryTier::Working, MemoryTier::Episodic, MemoryTier::Persistent],
        };
        for t in tiers {
            let now = Utc::now();
            let (value, should_promote) = {
                let Some(entry) = self.tier_map_mut(t).get_mut(key) else {
                    continue;
                };
                entry.access_count += 1;
                entry.last_accessed_at = now;
                entry.recompute_scores(now);
                // Auto-promotion lifts hot working entries into episodic;
                // entering the persistent tier stays an explicit decision.
                (
                    entry.value.clone(),
                    t == MemoryTier::Working && entry.promotion_score >= PROMOTION_THRESHOLD,
                )
            };
            if t == MemoryTier::Persistent {
                // Keep the durable copy's access statistics current.
                if let Some(entry) = self.persistent.get(key) {
                    let entry = entry.clone();
                    self.write_through(&entry);
                }
            }
            if should_promote {
                if let Err(err) = self.promote(key) {
                    log::warn!("auto-promotion of {} failed: {}", key, err);
                }
            }
            return Some(value);
        }
        None
    }

    /// Snapshot of an entry, wherever it lives.
    pub fn entry(&self, key: &str) -> Option<&MemoryEntry> {
        self.working
            .get(key)
            .or_else(|| self.episodic.get(key))
            .or_else(|| self.persistent.get(key))
    }

    /// Search entries across tiers, ranked by
    /// `0.7*importance + 0.3*min(1, access_count/100)` descending.
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<MemoryEntry> {
        let tiers: Vec<MemoryTier> = match criteria.tier {
            Some(t) => vec![t],
            None => vec![MemoryTier::Working, MemoryTier::Episodic, MemoryTier::Persistent],
        };
        let mut results: Vec<MemoryEntry> = Vec::new();
        for t in tiers {
            for entry in self.tier_map(t).values() {
                if let Some(category) = &criteria.category {
                    if &entry.category != category {
                        continue;
                    }
                }
                if let Some(owner) = &criteria.owner {
                    if entry.owner.as_ref() != Some(owner) {
                        continue;
                    }
                }
                if !criteria.tags.iter().all(|tag| entry.tags.contains(tag)) {
                    continue;
                }
                if let Some(min) = criteria.min_importance {
                    if entry.importance < min {
                        continue;
                    }
                }
                results.push(entry.clone());
            }
        }
        results.sort_by(|a, b| {
            relevance(b)
                .partial_cmp(&relevance(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        results
    }

    /// Move an entry one tier up, scaling importance by
    /// [`PROMOTE_IMPORTANCE_FACTOR`].
    pub fn promote(&mut self, key: &str) -> Result<MemoryTier, SwarmError> {
        let from = self
            .entry(key)
            .map(|e| e.tier)
            .ok_or_else(|| SwarmError::NotFound { kind: "memory entry", id: key.to_string() })?;
        let to = from.above().ok_or_else(|| {
            SwarmError::Validation(format!("{} is already in the persistent tier", key))
        })?;

        let mut entry = self
            .tier_map_mut(from)
            .remove(key)
            .expect("entry located above");
        entry.tier = to;
        entry.importance = (entry.importance * PROMOTE_IMPORTANCE_FACTOR).min(1.0);
        entry.recompute_scores(Utc::now());
        self.write_through(&entry);
        self.tier_map_mut(to).insert(key.to_string(), entry);
        self.evict_if_over_capacity(to);
        self.events.emit(SwarmEvent::MemoryPromoted { key: key.to_string(), from, to });
        log::debug!("promoted memory entry {} from {} to {}", key, from, to);
        Ok(to)
    }

    /// Move an entry one tier down, scaling importance by
    /// [`DEMOTE_IMPORTANCE_FACTOR`]. Demoting an unpinned working-tier
    /// entry whose demotion score is under [`DELETION_FLOOR`] deletes it.
    /// Pinned entries cannot be demoted.
    pub fn demote(&mut self, key: &str) -> Result<Option<MemoryTier>, SwarmError> {
        let (from, pinned, score) = self
            .entry(key)
            .map(|e| (e.tier, e.pinned, e.demotion_score))
            .ok_or_else(|| SwarmError::NotFound { kind: "memory entry", id: key.to_string() })?;
        if pinned {
            return Err(SwarmError::Validation(format!("{} is pinned", key)));
        }

        match from.below() {
            Some(to) => {
                let mut entry = self
                    .tier_map_mut(from)
                    .remove(key)
                    .expect("entry located above");
                if from == MemoryTier::Persistent {
                    self.erase_durable(key);
                }
                entry.tier = to;
                entry.importance *= DEMOTE_IMPORTANCE_FACTOR;
                entry.recompute_scores(Utc::now());
                self.tier_map_mut(to).insert(key.to_string(), entry);
                self.evict_if_over_capacity(to);
                Ok(Some(to))
            }
            None => {
                // Below the lowest tier there is nothing to hold the entry.
                if score < DELETION_FLOOR {
                    self.working.remove(key);
                    self.events.emit(SwarmEvent::MemoryEvicted {
                        key: key.to_string(),
                        tier: MemoryTier::Working,
                    });
                    Ok(None)
                } else {
                    Ok(Some(MemoryTier::Working))
                }
            }
        }
    }

    /// Remove an entry from whichever tier holds it. Returns whether one
    /// was removed.
    pub fn remove_entry(&mut self, key: &str) -> bool {
        for tier in [MemoryTier::Working, MemoryTier::Episodic, MemoryTier::Persistent] {
            if self.tier_map_mut(tier).remove(key).is_some() {
                if tier == MemoryTier::Persistent {
                    self.erase_durable(key);
                }
                return true;
            }
        }
        false
    }

    /// Periodic sweep: recompute every entry's scores, expire entries past
    /// their TTL, and demote entries whose demotion score fell under
    /// [`DEMOTION_THRESHOLD`]. This is the only path that downgrades an
    /// entry that is not being actively accessed. Pinned entries are never
    /// touched.
    pub fn run_maintenance(&mut self) -> MaintenanceReport {
        let now = Utc::now();
        let mut report = MaintenanceReport::default();

        for tier in [MemoryTier::Persistent, MemoryTier::Episodic, MemoryTier::Working] {
            let mut expired_keys = Vec::new();
            let mut demote_keys = Vec::new();
            for entry in self.tier_map_mut(tier).values_mut() {
                entry.recompute_scores(now);
                if entry.pinned {
                    continue;
                }
                if entry.is_expired(now) {
                    expired_keys.push(entry.key.clone());
                } else if entry.demotion_score < DEMOTION_THRESHOLD {
                    demote_keys.push(entry.key.clone());
                }
            }

            for key in expired_keys {
                self.tier_map_mut(tier).remove(&key);
                if tier == MemoryTier::Persistent {
                    self.erase_durable(&key);
                }
                self.events.emit(SwarmEvent::MemoryEvicted { key, tier });
                report.expired += 1;
            }
            for key in demote_keys {
                match self.demote(&key) {
                    Ok(None) => report.deleted += 1,
                    Ok(Some(_)) => report.demoted += 1,
                    Err(err) => log::warn!("maintenance demotion of {} failed: {}", key, err),
                }
            }
        }
        report
    }

    /// Restore the persistent tier from the durable store. Returns how many
    /// entries were loaded.
    pub fn load_persistent(&mut self) -> Result<usize, SwarmError> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };
        let mut loaded = 0;
        for payload in store.list(KIND_MEMORY)? {
            match serde_json::from_value::<MemoryEntry>(payload) {
                Ok(entry) if entry.tier == MemoryTier::Persistent => {
                    self.persistent.insert(entry.key.clone(), entry);
                    loaded += 1;
                }
                Ok(entry) => {
                    log::warn!("skipping persisted entry {} with tier {}", entry.key, entry.tier)
                }
                Err(err) => log::warn!("skipping unreadable persisted memory entry: {}", err),
            }
        }
        Ok(loaded)
    }

    /// Number of entries in one tier.
    pub fn tier_len(&self, tier: MemoryTier) -> usize {
        self.tier_map(tier).len()
    }

    /// Total entries across all tiers.
    pub fn len(&self) -> usize {
        self.working.len() + self.episodic.len() + self.persistent.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict the lowest-demotion-score unpinned entry while the tier is
    /// over capacity.
    fn evict_if_over_capacity(&mut self, tier: MemoryTier) {
        while self.tier_map(tier).len() > self.capacity(tier) {
            let victim = self
                .tier_map(tier)
                .values()
                .filter(|e| !e.pinned)
                .min_by(|a, b| {
                    a.demotion_score
                        .partial_cmp(&b.demotion_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.key.cmp(&b.key))
                })
                .map(|e| e.key.clone());
            let Some(key) = victim else {
                log::warn!("{} tier over capacity but every entry is pinned", tier);
                break;
            };
            self.tier_map_mut(tier).remove(&key);
            if tier == MemoryTier::Persistent {
                self.erase_durable(&key);
            }
            log::debug!("evicted memory entry {} from {} tier", key, tier);
            self.events.emit(SwarmEvent::MemoryEvicted { key, tier });
        }
    }
}

/// Search ranking: `0.7*importance + 0.3*min(1, access_count/100)`.
fn relevance(entry: &MemoryEntry) -> f64 {
    0.7 * entry.importance + 0.3 * (entry.access_count as f64 / 100.0).min(1.0)
}
