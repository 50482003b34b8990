//! Day-scoped usage ledger with immediate write-through.

use std::collections::HashMap;

use chrono::NaiveDate;
use tabwarden_storage::Store;

/// Per-hostname accumulated active milliseconds for one local day.
///
/// The in-memory map is authoritative; every mutation is written
/// through to the store immediately, and a failed write is repaired by
/// the next successful one for the same hostname. The hosting process
/// may be killed between events at any time, so mutations are never
/// batched.
pub struct UsageLedger {
    day: NaiveDate,
    usage: HashMap<String, u64>,
}

impl UsageLedger {
    /// Load the ledger for `today`, resetting the persisted map exactly
    /// once if the stored date differs. Blocklists and settings are
    /// untouched by the reset.
    pub fn load(store: &Store, today: NaiveDate) -> Self {
        let stored_date = store.last_reset_date().unwrap_or_else(|e| {
            log::warn!("failed to read last reset date: {e}");
            None
        });

        if stored_date.as_deref() == Some(today.to_string().as_str()) {
            let usage = store.load_usage().unwrap_or_else(|e| {
                log::warn!("failed to load usage map, starting empty: {e}");
                HashMap::new()
            });
            return Self { day: today, usage };
        }

        log::info!(
            "usage ledger reset: stored date {stored_date:?}, today {today}"
        );
        Self::reset_store(store, today);
        Self {
            day: today,
            usage: HashMap::new(),
        }
    }

    /// Credit `ms` of active time to `hostname`, rolling the day over
    /// first if `today` no longer matches the ledger's day.
    pub fn credit(&mut self, store: &Store, hostname: &str, ms: u64, today: NaiveDate) {
        self.rollover_if_needed(store, today);
        if ms == 0 {
            return;
        }

        let total = self.usage.entry(hostname.to_string()).or_insert(0);
        *total += ms;
        let total = *total;

        if let Err(e) = store.upsert_usage(hostname, total) {
            log::warn!("usage write-through failed for {hostname}: {e}");
        }
    }

    /// Accumulated (flushed) milliseconds for a hostname today.
    #[must_use]
    pub fn total(&self, hostname: &str) -> u64 {
        self.usage.get(hostname).copied().unwrap_or(0)
    }

    /// The full flushed map for today.
    #[must_use]
    pub fn snapshot(&self) -> &HashMap<String, u64> {
        &self.usage
    }

    /// The local day this ledger is scoped to.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    fn rollover_if_needed(&mut self, store: &Store, today: NaiveDate) {
        if today == self.day {
            return;
        }
        log::info!("day changed {} -> {today}, resetting usage ledger", self.day);
        self.day = today;
        self.usage.clear();
        Self::reset_store(store, today);
    }

    fn reset_store(store: &Store, today: NaiveDate) {
        if let Err(e) = store.clear_usage() {
            log::warn!("failed to clear persisted usage: {e}");
        }
        if let Err(e) = store.set_last_reset_date(&today.to_string()) {
            log::warn!("failed to persist reset date: {e}");
        }
    }
}
