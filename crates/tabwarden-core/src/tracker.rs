//! Per-tab tracking sessions gated by the global idle state.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tabwarden_storage::Store;
use uuid::Uuid;

use crate::events::{IdleSignal, TabId};
use crate::ledger::UsageLedger;

/// Process-wide idle state. While idle, no session exists and no time
/// accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    Idle,
}

impl From<IdleSignal> for IdleState {
    fn from(signal: IdleSignal) -> Self {
        match signal {
            IdleSignal::Active => Self::Active,
            IdleSignal::Idle | IdleSignal::Locked => Self::Idle,
        }
    }
}

/// Outcome of feeding an idle signal into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
    BecameIdle,
    BecameActive,
    Unchanged,
}

/// An open attribution interval: this tab has been showing `hostname`
/// since `started_at`.
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub id: Uuid,
    pub tab_id: TabId,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
}

/// Tracks at most one in-progress session per tab and flushes elapsed
/// intervals into the usage ledger on every terminating event.
pub struct ActivityTracker {
    sessions: HashMap<TabId, TrackedSession>,
    idle: IdleState,
    ledger: UsageLedger,
}

impl ActivityTracker {
    #[must_use]
    pub fn new(ledger: UsageLedger) -> Self {
        Self {
            sessions: HashMap::new(),
            idle: IdleState::Active,
            ledger,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.idle == IdleState::Active
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.sessions.len()
    }

    /// Begin tracking `hostname` on a tab. No-op while idle. If the tab
    /// already holds a session, its elapsed time is credited before the
    /// new session replaces it; overwriting without crediting would
    /// silently lose the interval.
    pub fn start(&mut self, store: &Store, tab_id: TabId, hostname: String, now: DateTime<Utc>) {
        if self.idle == IdleState::Idle {
            log::debug!("ignoring start for tab {tab_id} while idle");
            return;
        }

        if let Some(previous) = self.sessions.remove(&tab_id) {
            self.flush(store, previous, now);
        }

        let session = TrackedSession {
            id: Uuid::new_v4(),
            tab_id,
            hostname,
            started_at: now,
        };
        log::debug!(
            "session {} started: tab {tab_id} on {}",
            session.id,
            session.hostname
        );
        self.sessions.insert(tab_id, session);
    }

    /// Flush and remove the session for a tab, if any.
    pub fn stop(&mut self, store: &Store, tab_id: TabId, now: DateTime<Utc>) {
        if let Some(session) = self.sessions.remove(&tab_id) {
            self.flush(store, session, now);
        }
    }

    /// Flush and remove every session (window focus loss, shutdown).
    pub fn stop_all(&mut self, store: &Store, now: DateTime<Utc>) {
        let sessions: Vec<TrackedSession> = self.sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            self.flush(store, session, now);
        }
    }

    /// Feed an idle signal. Going idle flushes every session in one
    /// step; returning to activity is reported to the caller, which is
    /// responsible for restarting tracking on the active tab.
    pub fn set_idle(
        &mut self,
        store: &Store,
        signal: IdleSignal,
        now: DateTime<Utc>,
    ) -> IdleTransition {
        let next = IdleState::from(signal);
        match (self.idle, next) {
            (IdleState::Active, IdleState::Idle) => {
                self.idle = IdleState::Idle;
                log::info!("user went idle, suspending {} session(s)", self.sessions.len());
                self.stop_all(store, now);
                IdleTransition::BecameIdle
            }
            (IdleState::Idle, IdleState::Active) => {
                self.idle = IdleState::Active;
                log::info!("user is active again");
                IdleTransition::BecameActive
            }
            _ => IdleTransition::Unchanged,
        }
    }

    /// Flushed plus live milliseconds for a hostname. The live
    /// component only counts while active; an idle gap must not appear
    /// as elapsed time.
    #[must_use]
    pub fn elapsed(&self, hostname: &str, now: DateTime<Utc>) -> u64 {
        let mut total = self.ledger.total(hostname);
        if self.idle == IdleState::Active {
            total += self
                .sessions
                .values()
                .filter(|s| s.hostname == hostname)
                .map(|s| interval_ms(s.started_at, now))
                .sum::<u64>();
        }
        total
    }

    /// Today's total across all hostnames, live components included.
    #[must_use]
    pub fn today_total(&self, now: DateTime<Utc>) -> u64 {
        self.usage_today(now).into_iter().map(|(_, ms)| ms).sum()
    }

    /// Today's per-hostname usage, live components included, sorted by
    /// descending milliseconds.
    #[must_use]
    pub fn usage_today(&self, now: DateTime<Utc>) -> Vec<(String, u64)> {
        let mut usage = self.ledger.snapshot().clone();
        if self.idle == IdleState::Active {
            for session in self.sessions.values() {
                *usage.entry(session.hostname.clone()).or_insert(0) +=
                    interval_ms(session.started_at, now);
            }
        }
        let mut rows: Vec<(String, u64)> = usage.into_iter().collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    fn flush(&mut self, store: &Store, session: TrackedSession, now: DateTime<Utc>) {
        let elapsed = interval_ms(session.started_at, now);
        log::debug!(
            "session {} flushed: {elapsed}ms to {} (tab {})",
            session.id,
            session.hostname,
            session.tab_id
        );
        self.ledger
            .credit(store, &session.hostname, elapsed, local_day(now));
    }
}

/// Milliseconds between two instants, clamped at zero so a stepped
/// host clock can never shrink a ledger value.
fn interval_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from(end.signed_duration_since(start).num_milliseconds()).unwrap_or(0)
}

/// The local calendar day an instant falls on; the ledger is scoped to
/// local days.
fn local_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Local).date_naive()
}
