//! Boundary contracts with the host environment.
//!
//! The core never talks to a currency plugin, a chat system or a map
//! renderer directly. It calls these traits, and the host plugs in whatever
//! backs them. Simple implementations are bundled for tests, tools and
//! single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use chrono::{Local, NaiveDateTime, TimeDelta, Utc};

use crate::cell::CellKey;
use crate::ids::PlayerId;

/// External currency accounts for players.
///
/// Calls are synchronous. A caller that pre-authorizes a charge and then
/// fails refunds it with [`Currency::deposit`].
pub trait Currency: Send + Sync {
    /// Whether `who` can afford `amount`.
    fn has(&self, who: PlayerId, amount: f64) -> bool;
    /// Debit `amount`; returns `false` if the account cannot cover it.
    fn withdraw(&self, who: PlayerId, amount: f64) -> bool;
    /// Credit `amount`.
    fn deposit(&self, who: PlayerId, amount: f64);
    /// Human-readable rendering of an amount.
    fn format(&self, amount: f64) -> String {
        format!("{amount:.2}")
    }
}

/// Accrued playtime, used only to size claim quotas.
pub trait Playtime: Send + Sync {
    /// Hours `who` has played.
    fn hours_played(&self, who: PlayerId) -> f64;
}

/// Best-effort player messaging.
///
/// Implementations must swallow their own failures.
pub trait Notifier: Send + Sync {
    /// Whether `who` is currently online.
    fn is_online(&self, who: PlayerId) -> bool;
    /// Deliver `message` to `who` if they are online.
    fn notify(&self, who: PlayerId, message: &str);
}

/// Fire-and-forget notice that cells changed hands, for map renderers.
pub trait MapInvalidation: Send + Sync {
    /// The given cells in `world` changed ownership.
    fn cells_changed(&self, world: &str, cells: &[CellKey]);
}

/// Capability check for the wilderness bypass.
pub trait BypassPolicy: Send + Sync {
    /// Whether `who` may build and break in protected wilderness.
    fn bypasses_wilderness(&self, who: PlayerId) -> bool;
}

/// Wall clock.
///
/// `now` is server-local time and drives the daily upkeep calendar;
/// `now_millis` drives short TTLs and record timestamps.
pub trait Clock: Send + Sync {
    /// Current server-local date and time.
    fn now(&self) -> NaiveDateTime;

    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now().and_utc().timestamp_millis()
    }
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    /// Start the clock at `start`.
    #[must_use]
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward (or backward, for negative deltas).
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory currency accounts.
#[derive(Debug, Default)]
pub struct MemoryBank {
    balances: Mutex<HashMap<PlayerId, f64>>,
}

impl MemoryBank {
    /// Create an empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of `who` (zero if unknown).
    #[must_use]
    pub fn balance(&self, who: PlayerId) -> f64 {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&who)
            .copied()
            .unwrap_or(0.0)
    }

    /// Overwrite the balance of `who`.
    pub fn set_balance(&self, who: PlayerId, amount: f64) {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(who, amount);
    }
}

impl Currency for MemoryBank {
    fn has(&self, who: PlayerId, amount: f64) -> bool {
        self.balance(who) >= amount
    }

    fn withdraw(&self, who: PlayerId, amount: f64) -> bool {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry(who).or_insert(0.0);
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        true
    }

    fn deposit(&self, who: PlayerId, amount: f64) {
        *self
            .balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(who)
            .or_insert(0.0) += amount;
    }
}

/// Playtime lookup from a fixed table.
#[derive(Debug, Default)]
pub struct FixedPlaytime {
    hours: Mutex<HashMap<PlayerId, f64>>,
}

impl FixedPlaytime {
    /// Create an empty table (everyone has zero hours).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hours played by `who`.
    pub fn set_hours(&self, who: PlayerId, hours: f64) {
        self.hours
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(who, hours);
    }
}

impl Playtime for FixedPlaytime {
    fn hours_played(&self, who: PlayerId) -> f64 {
        self.hours
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&who)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Notifier that writes every message to the log. Nobody is online.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn is_online(&self, _who: PlayerId) -> bool {
        false
    }

    fn notify(&self, who: PlayerId, message: &str) {
        tracing::info!(player = %who, "{message}");
    }
}

/// Notifier that keeps every message, with a configurable online set.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    online: Mutex<HashSet<PlayerId>>,
    messages: Mutex<Vec<(PlayerId, String)>>,
}

impl RecordingNotifier {
    /// Create a notifier with nobody online.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `who` as online or offline.
    pub fn set_online(&self, who: PlayerId, online: bool) {
        let mut set = self.online.lock().unwrap_or_else(PoisonError::into_inner);
        if online {
            set.insert(who);
        } else {
            set.remove(&who);
        }
    }

    /// Every message delivered so far.
    #[must_use]
    pub fn messages(&self) -> Vec<(PlayerId, String)> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages delivered to `who`.
    #[must_use]
    pub fn messages_for(&self, who: PlayerId) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(to, _)| *to == who)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn is_online(&self, who: PlayerId) -> bool {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&who)
    }

    fn notify(&self, who: PlayerId, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((who, message.to_string()));
    }
}

/// Map sink that ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMapSink;

impl MapInvalidation for NoMapSink {
    fn cells_changed(&self, _world: &str, _cells: &[CellKey]) {}
}

/// Map sink that keeps every changed cell.
#[derive(Debug, Default)]
pub struct RecordingMapSink {
    changed: Mutex<Vec<CellKey>>,
}

impl RecordingMapSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every cell reported so far, in order.
    #[must_use]
    pub fn changed(&self) -> Vec<CellKey> {
        self.changed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MapInvalidation for RecordingMapSink {
    fn cells_changed(&self, _world: &str, cells: &[CellKey]) {
        self.changed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(cells);
    }
}

/// Nobody bypasses wilderness protection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBypass;

impl BypassPolicy for NoBypass {
    fn bypasses_wilderness(&self, _who: PlayerId) -> bool {
        false
    }
}

/// An explicit set of players holding the wilderness bypass.
#[derive(Debug, Default)]
pub struct BypassSet {
    players: Mutex<HashSet<PlayerId>>,
}

impl BypassSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant or revoke the bypass for `who`.
    pub fn set(&self, who: PlayerId, allowed: bool) {
        let mut players = self.players.lock().unwrap_or_else(PoisonError::into_inner);
        if allowed {
            players.insert(who);
        } else {
            players.remove(&who);
        }
    }
}

impl BypassPolicy for BypassSet {
    fn bypasses_wilderness(&self, who: PlayerId) -> bool {
        self.players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&who)
    }
}
