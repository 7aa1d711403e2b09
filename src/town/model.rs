//! The town record.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::cell::CellKey;
use crate::error::TownError;
use crate::ids::{PlayerId, TownId};
use crate::town::ledger::{Ledger, LedgerEntry, LedgerKind};
use crate::town::settings::{Plot, Toggle, TownSettings};

/// Shortest allowed town name.
pub const NAME_MIN_LEN: usize = 3;
/// Longest allowed town name.
pub const NAME_MAX_LEN: usize = 24;

/// Rank within a town. Ordered `Member < Officer < Leader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    /// Ordinary member.
    Member,
    /// Trusted with territory, invites and settings.
    Officer,
    /// Owns the town.
    Leader,
}

/// Check a proposed town name.
///
/// # Errors
///
/// Returns [`TownError::InvalidName`] if the name is not 3–24 characters of
/// `[a-zA-Z0-9_-]`.
pub fn validate_town_name(name: &str) -> Result<(), TownError> {
    let len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(TownError::InvalidName(format!(
            "must be {NAME_MIN_LEN}-{NAME_MAX_LEN} characters, got {len}"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(TownError::InvalidName(format!(
            "character {bad:?} is not allowed"
        )));
    }
    Ok(())
}

/// A town: governance, territory, economy and settings in one record.
///
/// This is the unit of persistence; every change rewrites the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Town {
    /// Stable identifier.
    pub id: TownId,
    /// Display name, unique case-insensitively.
    pub name: String,
    /// Founding time, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// The leader. Always present in `members`.
    pub leader: PlayerId,
    /// Officers (the leader is implicitly one and is not listed).
    #[serde(default)]
    pub officers: BTreeSet<PlayerId>,
    /// Every member with their last known display name.
    pub members: BTreeMap<PlayerId, String>,
    /// Owned chunks.
    #[serde(default)]
    pub territory: BTreeSet<CellKey>,
    /// Bank balance; negative means debt.
    #[serde(default)]
    pub balance: f64,
    /// Recent auditable events.
    #[serde(default)]
    pub ledger: Ledger,
    /// Town-wide defaults.
    #[serde(default)]
    pub settings: TownSettings,
    /// Per-cell owners and overrides.
    #[serde(default)]
    pub plots: BTreeMap<CellKey, Plot>,
    /// Last upkeep collection, milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_upkeep_at: Option<i64>,
    /// Consecutive days upkeep could not be paid.
    #[serde(default)]
    pub missed_upkeep_days: u32,
}

impl Town {
    /// A freshly founded town with the founder as leader and no land.
    #[must_use]
    pub fn found(name: &str, founder: PlayerId, founder_name: &str, now_ms: i64) -> Self {
        let mut members = BTreeMap::new();
        members.insert(founder, founder_name.to_string());
        let mut town = Self {
            id: TownId::generate(),
            name: name.to_string(),
            created_at: now_ms,
            leader: founder,
            officers: BTreeSet::new(),
            members,
            territory: BTreeSet::new(),
            balance: 0.0,
            ledger: Ledger::new(),
            settings: TownSettings::default(),
            plots: BTreeMap::new(),
            last_upkeep_at: None,
            missed_upkeep_days: 0,
        };
        town.record(
            LedgerKind::Founded,
            now_ms,
            Some(founder),
            0.0,
            format!("founded {name}"),
        );
        town
    }

    /// Rank of `who`, or `None` if not a member.
    #[must_use]
    pub fn rank_of(&self, who: PlayerId) -> Option<Rank> {
        if who == self.leader {
            Some(Rank::Leader)
        } else if self.officers.contains(&who) {
            Some(Rank::Officer)
        } else if self.members.contains_key(&who) {
            Some(Rank::Member)
        } else {
            None
        }
    }

    /// Whether `who` belongs to the town.
    #[must_use]
    pub fn is_member(&self, who: PlayerId) -> bool {
        self.members.contains_key(&who)
    }

    /// Require `who` to hold at least `required`.
    ///
    /// # Errors
    ///
    /// [`TownError::NotMember`] for outsiders, [`TownError::InsufficientRank`]
    /// for members below `required`.
    pub fn require_rank(&self, who: PlayerId, required: Rank) -> Result<Rank, TownError> {
        match self.rank_of(who) {
            None => Err(TownError::NotMember),
            Some(rank) if rank < required => Err(TownError::InsufficientRank { required }),
            Some(rank) => Ok(rank),
        }
    }

    /// Display name of a member, falling back to the id.
    #[must_use]
    pub fn display_name(&self, who: PlayerId) -> String {
        self.members
            .get(&who)
            .cloned()
            .unwrap_or_else(|| who.to_string())
    }

    /// Whether `cell` may be added under the adjacency rule.
    ///
    /// The first cell is always accepted; afterwards the cell must share an
    /// edge with existing territory.
    #[must_use]
    pub fn accepts_adjacent(&self, cell: &CellKey) -> bool {
        self.territory.is_empty()
            || cell
                .face_neighbors()
                .iter()
                .any(|n| self.territory.contains(n))
    }

    /// Effective value of a toggle on `cell`: plot override, else default.
    #[must_use]
    pub fn effective_toggle(&self, cell: &CellKey, toggle: Toggle) -> bool {
        let inherited = self.settings.toggle(toggle);
        self.plots
            .get(cell)
            .and_then(|plot| plot.settings.as_ref())
            .map_or(inherited, |s| s.toggle(toggle).resolve(inherited))
    }

    /// Whether `who` may open containers on `cell`.
    ///
    /// Outsiders never may. With owner protection off every member may; with
    /// it on only officers, the plot owner and the allow-list.
    #[must_use]
    pub fn can_use_container(&self, who: PlayerId, cell: &CellKey) -> bool {
        let Some(rank) = self.rank_of(who) else {
            return false;
        };
        let Some(plot) = self.plots.get(cell) else {
            return true;
        };
        let Some(settings) = plot.settings.as_ref().filter(|s| s.owner_protection) else {
            return true;
        };
        rank >= Rank::Officer || plot.owner == Some(who) || settings.container_allow.contains(&who)
    }

    /// Whether `who` owns the plot at `cell`.
    #[must_use]
    pub fn owns_plot(&self, who: PlayerId, cell: &CellKey) -> bool {
        self.plots.get(cell).is_some_and(|p| p.owner == Some(who))
    }

    /// Append a ledger entry, naming the actor from the member list.
    pub fn record(
        &mut self,
        kind: LedgerKind,
        now_ms: i64,
        actor: Option<PlayerId>,
        amount: f64,
        detail: impl Into<String>,
    ) {
        let actor_name = actor.map_or_else(|| "server".to_string(), |a| self.display_name(a));
        self.ledger.push(LedgerEntry {
            kind,
            timestamp: now_ms,
            actor,
            actor_name,
            amount,
            detail: detail.into(),
        });
    }
}
