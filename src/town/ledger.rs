//! Bounded transaction ledger.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// Entries kept per town. The oldest entry is evicted first.
pub const LEDGER_CAPACITY: usize = 100;

/// Kind of auditable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// The town was founded.
    Founded,
    /// The town was renamed.
    Renamed,
    /// Money paid into the bank.
    Deposit,
    /// Money taken out of the bank.
    Withdraw,
    /// Daily upkeep collected (or charged as debt).
    Upkeep,
    /// A chunk was claimed.
    Claim,
    /// A chunk was released.
    Unclaim,
    /// A player joined.
    Join,
    /// A player left.
    Leave,
    /// A player was kicked.
    Kick,
    /// A member became an officer.
    Promote,
    /// An officer became a member.
    Demote,
    /// Leadership changed hands.
    Transfer,
    /// A town-wide setting changed.
    Settings,
    /// A plot override changed.
    Plot,
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// What happened.
    pub kind: LedgerKind,
    /// When, in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Who did it; `None` for server-driven events such as upkeep.
    pub actor: Option<PlayerId>,
    /// Display name of the actor at the time.
    pub actor_name: String,
    /// Money moved, or zero.
    pub amount: f64,
    /// Free-text detail.
    pub detail: String,
}

/// Ring of the most recent [`LEDGER_CAPACITY`] entries, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<LedgerEntry>", into = "Vec<LedgerEntry>")]
pub struct Ledger {
    entries: VecDeque<LedgerEntry>,
}

impl Ledger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest once full.
    pub fn push(&mut self, entry: LedgerEntry) {
        while self.entries.len() >= LEDGER_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    /// The `n` most recent entries, newest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<&LedgerEntry> {
        self.entries.iter().rev().take(n).collect()
    }
}

impl From<Vec<LedgerEntry>> for Ledger {
    fn from(entries: Vec<LedgerEntry>) -> Self {
        let skip = entries.len().saturating_sub(LEDGER_CAPACITY);
        Self {
            entries: entries.into_iter().skip(skip).collect(),
        }
    }
}

impl From<Ledger> for Vec<LedgerEntry> {
    fn from(ledger: Ledger) -> Self {
        ledger.entries.into()
    }
}
