//! Canonical store of towns and their derived indices.
//!
//! All state sits behind one `RwLock`. Every mutation, whether it comes from
//! gameplay or from the upkeep thread, holds the write lock for the whole
//! clone → modify → persist → commit sequence, so two writers can never
//! interleave on a record and the derived indices are never observed stale.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::cell::CellKey;
use crate::config::Config;
use crate::error::{ClaimError, StorageError, TownError};
use crate::ids::{PlayerId, TownId};
use crate::services::Clock;
use crate::storage::{INVITES_FILE, Storage};
use crate::town::ledger::LedgerKind;
use crate::town::model::{Rank, Town, validate_town_name};

/// Pending invites, persisted as one shared document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteBook {
    /// Towns each player has been invited to.
    #[serde(default)]
    pub pending: BTreeMap<PlayerId, BTreeSet<TownId>>,
}

/// Outcome of one day's upkeep charge against a town.
#[derive(Debug, Clone, PartialEq)]
pub struct UpkeepCharge {
    /// Town charged.
    pub town: TownId,
    /// Town name at the time.
    pub name: String,
    /// Amount owed for the day.
    pub owed: f64,
    /// Whether the balance covered it.
    pub paid: bool,
    /// Consecutive unpaid days after this charge.
    pub missed_days: u32,
    /// Balance after the charge.
    pub balance: f64,
    /// Current leader.
    pub leader: PlayerId,
    /// Every member, leader included.
    pub members: Vec<PlayerId>,
}

/// Read-only copy of the derived indices, for consistency checks.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    /// Lowercased name → town.
    pub by_name: HashMap<String, TownId>,
    /// Cell → town.
    pub by_cell: HashMap<CellKey, TownId>,
    /// Member → town.
    pub by_member: HashMap<PlayerId, TownId>,
}

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) towns: HashMap<TownId, Town>,
    by_name: HashMap<String, TownId>,
    by_cell: HashMap<CellKey, TownId>,
    by_member: HashMap<PlayerId, TownId>,
    pub(crate) invites: InviteBook,
}

impl RegistryState {
    pub(crate) fn id_by_name(&self, name: &str) -> Result<TownId, TownError> {
        self.by_name
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| TownError::NotFound(name.to_string()))
    }

    pub(crate) fn town_of(&self, player: PlayerId) -> Option<TownId> {
        self.by_member.get(&player).copied()
    }

    fn index(&mut self, town: &Town) {
        self.by_name.insert(town.name.to_lowercase(), town.id);
        for cell in &town.territory {
            self.by_cell.insert(cell.clone(), town.id);
        }
        for member in town.members.keys() {
            self.by_member.insert(*member, town.id);
        }
    }

    fn unindex(&mut self, town: &Town) {
        self.by_name.remove(&town.name.to_lowercase());
        for cell in &town.territory {
            self.by_cell.remove(cell);
        }
        for member in town.members.keys() {
            if self.by_member.get(member) == Some(&town.id) {
                self.by_member.remove(member);
            }
        }
    }

    fn commit(&mut self, town: Town) {
        if let Some(old) = self.towns.remove(&town.id) {
            self.unindex(&old);
        }
        self.index(&town);
        self.towns.insert(town.id, town);
    }

    fn remove(&mut self, id: TownId) -> Option<Town> {
        let town = self.towns.remove(&id)?;
        self.unindex(&town);
        Some(town)
    }
}

/// The town store.
pub struct TownRegistry {
    storage: Storage,
    clock: Arc<dyn Clock>,
    state: RwLock<RegistryState>,
}

impl std::fmt::Debug for TownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TownRegistry")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl TownRegistry {
    /// Load every town and the invite book from `storage`.
    ///
    /// Records that collide with an already-loaded town (same name or an
    /// overlapping cell) are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the towns directory or invite book cannot be read.
    pub fn open(storage: Storage, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let mut state = RegistryState::default();
        for town in storage.load_towns()? {
            if state.by_name.contains_key(&town.name.to_lowercase()) {
                tracing::warn!(town = %town.name, "duplicate town name on disk, skipping");
                continue;
            }
            if let Some(cell) = town.territory.iter().find(|c| state.by_cell.contains_key(*c)) {
                tracing::warn!(town = %town.name, %cell, "overlapping territory on disk, skipping");
                continue;
            }
            state.commit(town);
        }

        let mut invites: InviteBook = storage.load_document(INVITES_FILE)?;
        for towns in invites.pending.values_mut() {
            towns.retain(|id| state.towns.contains_key(id));
        }
        invites.pending.retain(|_, towns| !towns.is_empty());
        state.invites = invites;

        tracing::info!(towns = state.towns.len(), "town registry loaded");
        Ok(Self {
            storage,
            clock,
            state: RwLock::new(state),
        })
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Apply `f` to a draft of the named town, persist it, then commit.
    pub(crate) fn update<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Town) -> Result<T, TownError>,
    ) -> Result<T, TownError> {
        let mut state = self.write();
        let id = state.id_by_name(name)?;
        self.update_locked(&mut state, id, f)
    }

    /// Same as [`TownRegistry::update`] with the lock already held.
    pub(crate) fn update_locked<T>(
        &self,
        state: &mut RegistryState,
        id: TownId,
        f: impl FnOnce(&mut Town) -> Result<T, TownError>,
    ) -> Result<T, TownError> {
        let current = state
            .towns
            .get(&id)
            .ok_or_else(|| TownError::NotFound(id.to_string()))?;
        let old_path = self.storage.town_path(&current.name);
        let mut draft = current.clone();
        let out = f(&mut draft)?;

        if let Err(e) = self.storage.save_town(&draft) {
            tracing::error!(town = %draft.name, "cannot persist town, change discarded: {e}");
            return Err(e.into());
        }
        if self.storage.town_path(&draft.name) != old_path {
            if let Err(e) = std::fs::remove_file(&old_path) {
                tracing::warn!(path = %old_path.display(), "cannot remove renamed record: {e}");
            }
        }
        state.commit(draft);
        Ok(out)
    }

    /// Persist the invite book as it would look after `edit`, then apply it.
    pub(crate) fn update_invites(
        &self,
        state: &mut RegistryState,
        edit: impl FnOnce(&mut InviteBook),
    ) -> Result<(), StorageError> {
        let mut draft = state.invites.clone();
        edit(&mut draft);
        if draft == state.invites {
            return Ok(());
        }
        if let Err(e) = self.storage.save_document(INVITES_FILE, &draft) {
            tracing::error!("cannot persist invites, change discarded: {e}");
            return Err(e);
        }
        state.invites = draft;
        Ok(())
    }

    /// Check that `name` is well-formed and free, before any money moves.
    ///
    /// # Errors
    ///
    /// [`TownError::InvalidName`] or [`TownError::NameTaken`].
    pub fn check_name_available(&self, name: &str) -> Result<(), TownError> {
        validate_town_name(name)?;
        if self.read().by_name.contains_key(&name.to_lowercase()) {
            return Err(TownError::NameTaken(name.to_string()));
        }
        Ok(())
    }

    /// Found a town led by `founder`.
    ///
    /// Charging the creation fee is the caller's job; call
    /// [`TownRegistry::check_name_available`] first and refund on failure.
    ///
    /// # Errors
    ///
    /// [`TownError::InvalidName`], [`TownError::NameTaken`],
    /// [`TownError::AlreadyInTown`] or [`TownError::Storage`].
    pub fn create(
        &self,
        name: &str,
        founder: PlayerId,
        founder_name: &str,
    ) -> Result<Town, TownError> {
        validate_town_name(name)?;
        let mut state = self.write();
        if state.by_name.contains_key(&name.to_lowercase()) {
            return Err(TownError::NameTaken(name.to_string()));
        }
        if state.town_of(founder).is_some() {
            return Err(TownError::AlreadyInTown);
        }

        let town = Town::found(name, founder, founder_name, self.now_ms());
        if let Err(e) = self.storage.save_town(&town) {
            tracing::error!(town = %name, "cannot persist new town: {e}");
            return Err(e.into());
        }
        state.commit(town.clone());
        if let Err(e) = self.update_invites(&mut state, |book| {
            book.pending.remove(&founder);
        }) {
            tracing::warn!("stale invites left for founder: {e}");
        }
        tracing::info!(town = %name, founder = %founder, "town founded");
        Ok(town)
    }

    /// Rename a town. Leader only.
    ///
    /// # Errors
    ///
    /// [`TownError::InvalidName`], [`TownError::NameTaken`],
    /// [`TownError::InsufficientRank`], [`TownError::NotFound`] or
    /// [`TownError::Storage`].
    pub fn rename(&self, name: &str, actor: PlayerId, new_name: &str) -> Result<(), TownError> {
        validate_town_name(new_name)?;
        let mut state = self.write();
        let id = state.id_by_name(name)?;
        if let Some(other) = state.by_name.get(&new_name.to_lowercase()) {
            if *other != id {
                return Err(TownError::NameTaken(new_name.to_string()));
            }
        }
        let now = self.now_ms();
        self.update_locked(&mut state, id, |town| {
            town.require_rank(actor, Rank::Leader)?;
            let old = std::mem::replace(&mut town.name, new_name.to_string());
            town.record(
                LedgerKind::Renamed,
                now,
                Some(actor),
                0.0,
                format!("renamed from {old}"),
            );
            Ok(())
        })
    }

    /// Delete a town. Leader only.
    ///
    /// Returns the removed record so the caller can release its cells.
    ///
    /// # Errors
    ///
    /// [`TownError::NotFound`], [`TownError::NotMember`],
    /// [`TownError::InsufficientRank`] or [`TownError::Storage`].
    pub fn delete(&self, name: &str, actor: PlayerId) -> Result<Town, TownError> {
        let mut state = self.write();
        let id = state.id_by_name(name)?;
        if let Some(town) = state.towns.get(&id) {
            town.require_rank(actor, Rank::Leader)?;
        }
        self.remove_locked(&mut state, id)
    }

    /// Delete a town without authorization. Used by upkeep dissolution.
    ///
    /// # Errors
    ///
    /// [`TownError::NotFound`] or [`TownError::Storage`].
    pub fn dissolve(&self, id: TownId) -> Result<Town, TownError> {
        let mut state = self.write();
        self.remove_locked(&mut state, id)
    }

    fn remove_locked(&self, state: &mut RegistryState, id: TownId) -> Result<Town, TownError> {
        let name = state
            .towns
            .get(&id)
            .map(|t| t.name.clone())
            .ok_or_else(|| TownError::NotFound(id.to_string()))?;
        if let Err(e) = self.storage.remove_town(&name) {
            tracing::error!(town = %name, "cannot delete town record: {e}");
            return Err(e.into());
        }
        let town = state
            .remove(id)
            .ok_or_else(|| TownError::NotFound(name.clone()))?;
        if let Err(e) = self.update_invites(state, |book| {
            for towns in book.pending.values_mut() {
                towns.remove(&id);
            }
            book.pending.retain(|_, towns| !towns.is_empty());
        }) {
            tracing::warn!("stale invites left for deleted town: {e}");
        }
        tracing::info!(town = %name, "town deleted");
        Ok(town)
    }

    /// Add `cell` to a town's territory, debiting `cost` from its bank.
    ///
    /// Does not consult individual claims; callers that also hold a
    /// [`crate::claims::ClaimIndex`] must check it first.
    ///
    /// # Errors
    ///
    /// [`ClaimError::AlreadyOwned`], [`ClaimError::OwnedByOtherTown`],
    /// [`ClaimError::LimitReached`], [`ClaimError::NotAdjacent`] (all wrapped
    /// in [`TownError::Claim`]), [`TownError::InsufficientFunds`], rank and
    /// storage errors.
    pub fn claim_cell(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
        limit: u32,
        cost: f64,
    ) -> Result<TownId, TownError> {
        let mut state = self.write();
        let id = state.id_by_name(name)?;
        if let Some(town) = state.towns.get(&id) {
            town.require_rank(actor, Rank::Officer)?;
        }
        match state.by_cell.get(cell) {
            Some(holder) if *holder == id => return Err(ClaimError::AlreadyOwned.into()),
            Some(_) => return Err(ClaimError::OwnedByOtherTown.into()),
            None => {}
        }
        let now = self.now_ms();
        self.update_locked(&mut state, id, |town| {
            if town.territory.len() >= limit as usize {
                return Err(ClaimError::LimitReached { limit }.into());
            }
            if !town.accepts_adjacent(cell) {
                return Err(ClaimError::NotAdjacent.into());
            }
            if town.balance < cost {
                return Err(TownError::InsufficientFunds {
                    needed: cost,
                    available: town.balance,
                });
            }
            town.balance -= cost;
            town.territory.insert(cell.clone());
            town.record(LedgerKind::Claim, now, Some(actor), cost, cell.to_string());
            Ok(town.id)
        })
    }

    /// Remove `cell` from a town's territory, dropping any plot override.
    ///
    /// # Errors
    ///
    /// [`TownError::NotInTerritory`], rank and storage errors.
    pub fn unclaim_cell(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
    ) -> Result<TownId, TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Officer)?;
            if !town.territory.remove(cell) {
                return Err(TownError::NotInTerritory);
            }
            town.plots.remove(cell);
            town.record(LedgerKind::Unclaim, now, Some(actor), 0.0, cell.to_string());
            Ok(town.id)
        })
    }

    /// Undo a [`TownRegistry::claim_cell`] whose cell could not be taken
    /// elsewhere, refunding `cost`.
    ///
    /// # Errors
    ///
    /// [`TownError::NotFound`], [`TownError::NotInTerritory`] or storage
    /// errors.
    pub(crate) fn revert_claim(
        &self,
        id: TownId,
        cell: &CellKey,
        cost: f64,
    ) -> Result<(), TownError> {
        let now = self.now_ms();
        let mut state = self.write();
        self.update_locked(&mut state, id, |town| {
            if !town.territory.remove(cell) {
                return Err(TownError::NotInTerritory);
            }
            town.plots.remove(cell);
            town.balance += cost;
            let detail = format!("{cell} reverted");
            town.record(LedgerKind::Unclaim, now, None, cost, detail);
            Ok(())
        })
    }

    /// Pay into the town bank. Any member may deposit.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// [`TownError::InvalidAmount`], [`TownError::NotMember`] and storage
    /// errors.
    pub fn deposit(&self, name: &str, actor: PlayerId, amount: f64) -> Result<f64, TownError> {
        check_amount(amount)?;
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Member)?;
            town.balance += amount;
            town.record(LedgerKind::Deposit, now, Some(actor), amount, "");
            Ok(town.balance)
        })
    }

    /// Take money out of the town bank. Officer or above.
    ///
    /// Fails closed rather than letting the balance go negative.
    ///
    /// # Errors
    ///
    /// [`TownError::InvalidAmount`], [`TownError::InsufficientFunds`], rank
    /// and storage errors.
    pub fn withdraw(&self, name: &str, actor: PlayerId, amount: f64) -> Result<f64, TownError> {
        check_amount(amount)?;
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Officer)?;
            if town.balance - amount < 0.0 {
                return Err(TownError::InsufficientFunds {
                    needed: amount,
                    available: town.balance,
                });
            }
            town.balance -= amount;
            town.record(LedgerKind::Withdraw, now, Some(actor), amount, "");
            Ok(town.balance)
        })
    }

    /// Charge one day of upkeep: `base + per_cell × cells`.
    ///
    /// If the balance covers it the missed-day counter resets. Otherwise the
    /// amount is charged anyway, pushing the balance into debt, and the
    /// counter goes up. This is the only path allowed to go negative.
    ///
    /// # Errors
    ///
    /// [`TownError::NotFound`] or [`TownError::Storage`].
    pub fn apply_upkeep(&self, id: TownId, config: &Config) -> Result<UpkeepCharge, TownError> {
        let now = self.now_ms();
        let mut state = self.write();
        self.update_locked(&mut state, id, |town| {
            let owed = config.upkeep_for(town.territory.len());
            let paid = town.balance >= owed;
            town.balance -= owed;
            town.last_upkeep_at = Some(now);
            let detail = if paid {
                town.missed_upkeep_days = 0;
                format!("upkeep for {} chunk(s)", town.territory.len())
            } else {
                town.missed_upkeep_days += 1;
                format!("unpaid upkeep, {} day(s) missed", town.missed_upkeep_days)
            };
            town.record(LedgerKind::Upkeep, now, None, owed, detail);
            Ok(UpkeepCharge {
                town: town.id,
                name: town.name.clone(),
                owed,
                paid,
                missed_days: town.missed_upkeep_days,
                balance: town.balance,
                leader: town.leader,
                members: town.members.keys().copied().collect(),
            })
        })
    }

    /// A copy of the named town.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Town> {
        let state = self.read();
        let id = state.id_by_name(name).ok()?;
        state.towns.get(&id).cloned()
    }

    /// A copy of the town with this id.
    #[must_use]
    pub fn get_by_id(&self, id: TownId) -> Option<Town> {
        self.read().towns.get(&id).cloned()
    }

    /// Town holding `cell`.
    #[must_use]
    pub fn town_at(&self, cell: &CellKey) -> Option<TownId> {
        self.read().by_cell.get(cell).copied()
    }

    /// Run `f` against the town holding `cell` without cloning it.
    pub fn with_town_at<R>(&self, cell: &CellKey, f: impl FnOnce(&Town) -> R) -> Option<R> {
        let state = self.read();
        let id = state.by_cell.get(cell)?;
        state.towns.get(id).map(f)
    }

    /// Town `player` belongs to.
    #[must_use]
    pub fn town_of(&self, player: PlayerId) -> Option<TownId> {
        self.read().town_of(player)
    }

    /// Name of the town `player` belongs to.
    #[must_use]
    pub fn town_name_of(&self, player: PlayerId) -> Option<String> {
        let state = self.read();
        let id = state.town_of(player)?;
        state.towns.get(&id).map(|t| t.name.clone())
    }

    /// Every town id.
    #[must_use]
    pub fn ids(&self) -> Vec<TownId> {
        let mut ids: Vec<TownId> = self.read().towns.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Copies of every town, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<Town> {
        let mut towns: Vec<Town> = self.read().towns.values().cloned().collect();
        towns.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        towns
    }

    /// Number of towns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().towns.len()
    }

    /// Whether there are no towns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().towns.is_empty()
    }

    /// Copy of the derived indices.
    #[must_use]
    pub fn index_snapshot(&self) -> IndexSnapshot {
        let state = self.read();
        IndexSnapshot {
            by_name: state.by_name.clone(),
            by_cell: state.by_cell.clone(),
            by_member: state.by_member.clone(),
        }
    }
}

fn check_amount(amount: f64) -> Result<(), TownError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(TownError::InvalidAmount(amount))
    }
}
