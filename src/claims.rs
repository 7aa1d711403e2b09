//! Spatial claim index.
//!
//! One map from [`CellKey`] to the [`Claim`] holding it, so a cell can only
//! ever have one holder, individual or town. A per-owner cell set backs
//! quota checks and cascades.
//!
//! Individual claims and trust grants persist to `claims.json`. Town cells
//! are mirrored here from the town records and are not written again.

mod trust;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::cell::CellKey;
use crate::error::{ClaimError, StorageError};
use crate::ids::{ClaimOwner, PlayerId, TownId};
use crate::services::MapInvalidation;
use crate::storage::{CLAIMS_FILE, Storage};

pub use trust::{ParseTrustTierError, TrustTier};

/// A held cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// The cell.
    pub cell: CellKey,
    /// Who holds it.
    pub owner: ClaimOwner,
    /// When it was claimed, milliseconds since the Unix epoch.
    pub claimed_at: i64,
}

/// On-disk form of the individual claims.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ClaimsDocument {
    #[serde(default)]
    claims: Vec<Claim>,
    #[serde(default)]
    trust: BTreeMap<PlayerId, BTreeMap<PlayerId, TrustTier>>,
}

#[derive(Debug, Default)]
struct IndexState {
    cells: HashMap<CellKey, Claim>,
    by_owner: HashMap<ClaimOwner, BTreeSet<CellKey>>,
    trust: BTreeMap<PlayerId, BTreeMap<PlayerId, TrustTier>>,
}

impl IndexState {
    fn insert(&mut self, claim: Claim) {
        self.by_owner
            .entry(claim.owner)
            .or_default()
            .insert(claim.cell.clone());
        self.cells.insert(claim.cell.clone(), claim);
    }

    fn remove(&mut self, cell: &CellKey) -> Option<Claim> {
        let claim = self.cells.remove(cell)?;
        if let Some(set) = self.by_owner.get_mut(&claim.owner) {
            set.remove(cell);
            if set.is_empty() {
                self.by_owner.remove(&claim.owner);
            }
        }
        Some(claim)
    }

    fn count_of(&self, owner: ClaimOwner) -> usize {
        self.by_owner.get(&owner).map_or(0, BTreeSet::len)
    }

    fn document(&self) -> ClaimsDocument {
        let mut claims: Vec<Claim> = self
            .cells
            .values()
            .filter(|c| matches!(c.owner, ClaimOwner::Player(_)))
            .cloned()
            .collect();
        claims.sort_by(|a, b| a.cell.cmp(&b.cell));
        ClaimsDocument {
            claims,
            trust: self.trust.clone(),
        }
    }
}

/// The claim index.
pub struct ClaimIndex {
    storage: Option<Storage>,
    map: Arc<dyn MapInvalidation>,
    state: RwLock<IndexState>,
}

impl std::fmt::Debug for ClaimIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimIndex")
            .field("storage", &self.storage)
            .field("cells", &self.len())
            .finish_non_exhaustive()
    }
}

impl ClaimIndex {
    /// An empty index that never touches disk.
    #[must_use]
    pub fn in_memory(map: Arc<dyn MapInvalidation>) -> Self {
        Self {
            storage: None,
            map,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Load individual claims and trust grants from `storage`.
    ///
    /// A cell listed twice keeps its first holder.
    ///
    /// # Errors
    ///
    /// Returns an error if `claims.json` exists but cannot be read.
    pub fn open(storage: Storage, map: Arc<dyn MapInvalidation>) -> Result<Self, StorageError> {
        let doc: ClaimsDocument = storage.load_document(CLAIMS_FILE)?;
        let mut state = IndexState {
            trust: doc.trust,
            ..IndexState::default()
        };
        for claim in doc.claims {
            if state.cells.contains_key(&claim.cell) {
                tracing::warn!(cell = %claim.cell, "duplicate claim on disk, skipping");
                continue;
            }
            state.insert(claim);
        }
        tracing::info!(claims = state.cells.len(), "claim index loaded");
        Ok(Self {
            storage: Some(storage),
            map,
            state: RwLock::new(state),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &IndexState) -> Result<(), StorageError> {
        match &self.storage {
            Some(storage) => storage.save_document(CLAIMS_FILE, &state.document()),
            None => Ok(()),
        }
    }

    /// Tell the map sink about changed cells, one call per world.
    fn announce(&self, cells: &[CellKey]) {
        let mut by_world: BTreeMap<&str, Vec<CellKey>> = BTreeMap::new();
        for cell in cells {
            by_world.entry(cell.world.as_str()).or_default().push(cell.clone());
        }
        for (world, cells) in by_world {
            self.map.cells_changed(world, &cells);
        }
    }

    /// Individual owner of the block column at (`block_x`, `block_z`).
    #[must_use]
    pub fn owner_at(&self, world: &str, block_x: i32, block_z: i32) -> Option<PlayerId> {
        let cell = CellKey::from_block(world, block_x, block_z);
        self.holder_at(&cell).and_then(ClaimOwner::player)
    }

    /// Holder of `cell`, individual or town.
    #[must_use]
    pub fn holder_at(&self, cell: &CellKey) -> Option<ClaimOwner> {
        self.read().cells.get(cell).map(|c| c.owner)
    }

    /// The full claim on `cell`.
    #[must_use]
    pub fn claim_at(&self, cell: &CellKey) -> Option<Claim> {
        self.read().cells.get(cell).cloned()
    }

    /// Claim `cell` for `owner`.
    ///
    /// `quota` caps how many cells the owner may hold. `buffer` is a
    /// Chebyshev radius in chunks that must be free of every other holder.
    ///
    /// # Errors
    ///
    /// [`ClaimError::AlreadyOwned`], [`ClaimError::OwnedByOther`],
    /// [`ClaimError::LimitReached`], [`ClaimError::TooCloseToOtherClaim`],
    /// or [`ClaimError::Storage`] (in which case nothing changed).
    pub fn claim_cell(
        &self,
        owner: PlayerId,
        cell: &CellKey,
        quota: u32,
        buffer: u32,
        now_ms: i64,
    ) -> Result<Claim, ClaimError> {
        let holder = ClaimOwner::Player(owner);
        let claim = {
            let mut state = self.write();
            match state.cells.get(cell) {
                Some(c) if c.owner == holder => return Err(ClaimError::AlreadyOwned),
                Some(_) => return Err(ClaimError::OwnedByOther),
                None => {}
            }
            if state.count_of(holder) >= quota as usize {
                return Err(ClaimError::LimitReached { limit: quota });
            }
            let radius = i32::try_from(buffer).unwrap_or(i32::MAX);
            let crowded = cell.surrounding(radius).any(|near| {
                state
                    .cells
                    .get(&near)
                    .is_some_and(|c| c.owner != holder)
            });
            if crowded {
                return Err(ClaimError::TooCloseToOtherClaim);
            }

            let claim = Claim {
                cell: cell.clone(),
                owner: holder,
                claimed_at: now_ms,
            };
            state.insert(claim.clone());
            if let Err(e) = self.persist(&state) {
                state.remove(cell);
                tracing::error!(%cell, "cannot persist claim, rolled back: {e}");
                return Err(e.into());
            }
            claim
        };
        tracing::debug!(%cell, %owner, "cell claimed");
        self.announce(std::slice::from_ref(cell));
        Ok(claim)
    }

    /// Release `owner`'s claim on `cell`.
    ///
    /// Returns whether a claim was removed. Releasing a cell the owner does
    /// not hold is a no-op.
    ///
    /// # Errors
    ///
    /// [`ClaimError::Storage`] if the change could not be persisted; the
    /// claim is then kept.
    pub fn release_cell(&self, owner: PlayerId, cell: &CellKey) -> Result<bool, ClaimError> {
        {
            let mut state = self.write();
            if state.cells.get(cell).map(|c| c.owner) != Some(ClaimOwner::Player(owner)) {
                return Ok(false);
            }
            let Some(removed) = state.remove(cell) else {
                return Ok(false);
            };
            if let Err(e) = self.persist(&state) {
                state.insert(removed);
                tracing::error!(%cell, "cannot persist release, rolled back: {e}");
                return Err(e.into());
            }
        }
        tracing::debug!(%cell, %owner, "cell released");
        self.announce(std::slice::from_ref(cell));
        Ok(true)
    }

    /// Record `cell` as territory of `town`.
    ///
    /// # Errors
    ///
    /// [`ClaimError::AlreadyOwned`] if the town already holds it,
    /// [`ClaimError::OwnedByOther`] for an individual claim,
    /// [`ClaimError::OwnedByOtherTown`] for another town.
    pub fn assign_town_cell(
        &self,
        town: TownId,
        cell: &CellKey,
        now_ms: i64,
    ) -> Result<(), ClaimError> {
        {
            let mut state = self.write();
            match state.cells.get(cell).map(|c| c.owner) {
                Some(ClaimOwner::Town(id)) if id == town => return Err(ClaimError::AlreadyOwned),
                Some(ClaimOwner::Town(_)) => return Err(ClaimError::OwnedByOtherTown),
                Some(ClaimOwner::Player(_)) => return Err(ClaimError::OwnedByOther),
                None => {}
            }
            state.insert(Claim {
                cell: cell.clone(),
                owner: ClaimOwner::Town(town),
                claimed_at: now_ms,
            });
        }
        self.announce(std::slice::from_ref(cell));
        Ok(())
    }

    /// Load a town's territory at startup without announcing it.
    ///
    /// Returns the cells that were already held by someone else.
    pub(crate) fn mirror_town<'c>(
        &self,
        town: TownId,
        cells: impl IntoIterator<Item = &'c CellKey>,
        claimed_at: i64,
    ) -> Vec<CellKey> {
        let mut state = self.write();
        let mut conflicts = Vec::new();
        for cell in cells {
            match state.cells.get(cell) {
                Some(c) if c.owner == ClaimOwner::Town(town) => {}
                Some(_) => conflicts.push(cell.clone()),
                None => state.insert(Claim {
                    cell: cell.clone(),
                    owner: ClaimOwner::Town(town),
                    claimed_at,
                }),
            }
        }
        conflicts
    }

    /// Drop `cell` from `town`'s territory. Returns whether it was held.
    pub fn release_town_cell(&self, town: TownId, cell: &CellKey) -> bool {
        let removed = {
            let mut state = self.write();
            if state.cells.get(cell).map(|c| c.owner) == Some(ClaimOwner::Town(town)) {
                state.remove(cell).is_some()
            } else {
                false
            }
        };
        if removed {
            self.announce(std::slice::from_ref(cell));
        }
        removed
    }

    /// Release every cell held by `owner`, returning the released cells.
    ///
    /// Best-effort: for an individual owner a failed write is logged and
    /// the cells stay released in memory.
    pub fn release_owner(&self, owner: ClaimOwner) -> Vec<CellKey> {
        let released: Vec<CellKey> = {
            let mut state = self.write();
            let cells: Vec<CellKey> = state
                .by_owner
                .get(&owner)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            let released: Vec<CellKey> = cells
                .into_iter()
                .filter(|cell| state.remove(cell).is_some())
                .collect();
            if matches!(owner, ClaimOwner::Player(_)) && !released.is_empty() {
                if let Err(e) = self.persist(&state) {
                    tracing::warn!(?owner, "cannot persist cascade release: {e}");
                }
            }
            released
        };
        if !released.is_empty() {
            tracing::debug!(?owner, cells = released.len(), "owner released");
            self.announce(&released);
        }
        released
    }

    /// Cells held by `owner`, in key order.
    #[must_use]
    pub fn cells_of(&self, owner: ClaimOwner) -> Vec<CellKey> {
        self.read()
            .by_owner
            .get(&owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of cells held by `owner`.
    #[must_use]
    pub fn count_of(&self, owner: ClaimOwner) -> usize {
        self.read().count_of(owner)
    }

    /// Every claim, in cell order.
    #[must_use]
    pub fn claims(&self) -> Vec<Claim> {
        let mut claims: Vec<Claim> = self.read().cells.values().cloned().collect();
        claims.sort_by(|a, b| a.cell.cmp(&b.cell));
        claims
    }

    /// Number of held cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().cells.len()
    }

    /// Whether no cell is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().cells.is_empty()
    }

    /// Give `trustee` trust on all of `owner`'s claims, replacing any
    /// earlier grant.
    ///
    /// # Errors
    ///
    /// [`ClaimError::Storage`]; the previous grant is then kept.
    pub fn grant_trust(
        &self,
        owner: PlayerId,
        trustee: PlayerId,
        tier: TrustTier,
    ) -> Result<(), ClaimError> {
        let mut state = self.write();
        let previous = state.trust.entry(owner).or_default().insert(trustee, tier);
        if let Err(e) = self.persist(&state) {
            restore_grant(&mut state, owner, trustee, previous);
            tracing::error!(%owner, %trustee, "cannot persist trust, rolled back: {e}");
            return Err(e.into());
        }
        tracing::debug!(%owner, %trustee, %tier, "trust granted");
        Ok(())
    }

    /// Withdraw any trust `owner` gave `trustee`. Returns whether there was
    /// a grant.
    ///
    /// # Errors
    ///
    /// [`ClaimError::Storage`]; the grant is then kept.
    pub fn revoke_trust(&self, owner: PlayerId, trustee: PlayerId) -> Result<bool, ClaimError> {
        let mut state = self.write();
        let previous = state
            .trust
            .get_mut(&owner)
            .and_then(|grants| grants.remove(&trustee));
        if previous.is_none() {
            return Ok(false);
        }
        if state.trust.get(&owner).is_some_and(BTreeMap::is_empty) {
            state.trust.remove(&owner);
        }
        if let Err(e) = self.persist(&state) {
            restore_grant(&mut state, owner, trustee, previous);
            tracing::error!(%owner, %trustee, "cannot persist trust, rolled back: {e}");
            return Err(e.into());
        }
        Ok(true)
    }

    /// Tier `owner` has granted `trustee`, if any.
    #[must_use]
    pub fn trust_of(&self, owner: PlayerId, trustee: PlayerId) -> Option<TrustTier> {
        self.read()
            .trust
            .get(&owner)
            .and_then(|grants| grants.get(&trustee))
            .copied()
    }

    /// Every grant made by `owner`.
    #[must_use]
    pub fn trusted_by(&self, owner: PlayerId) -> Vec<(PlayerId, TrustTier)> {
        self.read()
            .trust
            .get(&owner)
            .map(|grants| grants.iter().map(|(p, t)| (*p, *t)).collect())
            .unwrap_or_default()
    }
}

fn restore_grant(
    state: &mut IndexState,
    owner: PlayerId,
    trustee: PlayerId,
    previous: Option<TrustTier>,
) {
    let grants = state.trust.entry(owner).or_default();
    match previous {
        Some(tier) => {
            grants.insert(trustee, tier);
        }
        None => {
            grants.remove(&trustee);
        }
    }
    if grants.is_empty() {
        state.trust.remove(&owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RecordingMapSink;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn index() -> (ClaimIndex, Arc<RecordingMapSink>) {
        let sink = Arc::new(RecordingMapSink::new());
        (ClaimIndex::in_memory(sink.clone()), sink)
    }

    #[test]
    fn test_claim_and_lookup_by_block() {
        let (index, sink) = index();
        let alice = Uuid::new_v4();
        index
            .claim_cell(alice, &CellKey::new("w", -1, 0), 4, 0, 10)
            .unwrap();
        assert_eq!(index.owner_at("w", -1, 5), Some(alice));
        assert_eq!(index.owner_at("w", 0, 5), None);
        assert_eq!(index.owner_at("nether", -1, 5), None);
        assert_eq!(sink.changed(), vec![CellKey::new("w", -1, 0)]);
    }

    #[test]
    fn test_claim_outcomes() {
        let (index, _) = index();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let cell = CellKey::new("w", 0, 0);
        index.claim_cell(alice, &cell, 2, 0, 0).unwrap();
        assert!(matches!(
            index.claim_cell(alice, &cell, 2, 0, 0),
            Err(ClaimError::AlreadyOwned)
        ));
        assert!(matches!(
            index.claim_cell(bob, &cell, 2, 0, 0),
            Err(ClaimError::OwnedByOther)
        ));
        index
            .claim_cell(alice, &CellKey::new("w", 5, 5), 2, 0, 0)
            .unwrap();
        assert!(matches!(
            index.claim_cell(alice, &CellKey::new("w", 9, 9), 2, 0, 0),
            Err(ClaimError::LimitReached { limit: 2 })
        ));
    }

    #[test]
    fn test_buffer_zone() {
        let (index, _) = index();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        index
            .claim_cell(alice, &CellKey::new("w", 0, 0), 10, 2, 0)
            .unwrap();
        // Own cells never crowd each other.
        index
            .claim_cell(alice, &CellKey::new("w", 1, 1), 10, 2, 0)
            .unwrap();
        assert!(matches!(
            index.claim_cell(bob, &CellKey::new("w", 3, 3), 10, 2, 0),
            Err(ClaimError::TooCloseToOtherClaim)
        ));
        index
            .claim_cell(bob, &CellKey::new("w", 4, 4), 10, 2, 0)
            .unwrap();
        index
            .claim_cell(bob, &CellKey::new("end", 0, 1), 10, 2, 0)
            .unwrap();
    }

    #[test]
    fn test_town_cells_exclude_players() {
        let (index, _) = index();
        let alice = Uuid::new_v4();
        let town = TownId::generate();
        let cell = CellKey::new("w", 0, 0);
        index.assign_town_cell(town, &cell, 0).unwrap();
        assert!(matches!(
            index.claim_cell(alice, &cell, 4, 0, 0),
            Err(ClaimError::OwnedByOther)
        ));
        assert!(matches!(
            index.assign_town_cell(TownId::generate(), &cell, 0),
            Err(ClaimError::OwnedByOtherTown)
        ));
        assert_eq!(index.owner_at("w", 0, 0), None);
        assert_eq!(index.holder_at(&cell), Some(ClaimOwner::Town(town)));
    }

    #[test]
    fn test_release_is_idempotent_and_scoped() {
        let (index, _) = index();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let cell = CellKey::new("w", 0, 0);
        index.claim_cell(alice, &cell, 4, 0, 0).unwrap();
        assert!(!index.release_cell(bob, &cell).unwrap());
        assert!(index.release_cell(alice, &cell).unwrap());
        assert!(!index.release_cell(alice, &cell).unwrap());
        assert!(index.is_empty());
    }

    #[test]
    fn test_release_owner_cascade_touches_only_owner() {
        let (index, sink) = index();
        let alice = Uuid::new_v4();
        let town = TownId::generate();
        index.claim_cell(alice, &CellKey::new("w", 9, 9), 4, 0, 0).unwrap();
        for x in 0..3 {
            index
                .assign_town_cell(town, &CellKey::new("w", x, 0), 0)
                .unwrap();
        }
        let released = index.release_owner(ClaimOwner::Town(town));
        assert_eq!(released.len(), 3);
        assert_eq!(index.len(), 1);
        assert_eq!(index.count_of(ClaimOwner::Player(alice)), 1);
        assert_eq!(sink.changed().len(), 7);
    }

    #[test]
    fn test_trust_grants() {
        let (index, _) = index();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        index.grant_trust(alice, bob, TrustTier::Container).unwrap();
        assert_eq!(index.trust_of(alice, bob), Some(TrustTier::Container));
        assert_eq!(index.trust_of(bob, alice), None);
        index.grant_trust(alice, bob, TrustTier::Build).unwrap();
        assert_eq!(index.trusted_by(alice), vec![(bob, TrustTier::Build)]);
        assert!(index.revoke_trust(alice, bob).unwrap());
        assert!(!index.revoke_trust(alice, bob).unwrap());
        assert_eq!(index.trust_of(alice, bob), None);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        {
            let index = ClaimIndex::open(
                Storage::open(dir.path()).unwrap(),
                Arc::new(RecordingMapSink::new()),
            )
            .unwrap();
            index.claim_cell(alice, &CellKey::new("w", 2, -3), 4, 0, 77).unwrap();
            index
                .assign_town_cell(TownId::generate(), &CellKey::new("w", 20, 20), 0)
                .unwrap();
            index.grant_trust(alice, bob, TrustTier::Access).unwrap();
        }
        let index =
            ClaimIndex::open(Storage::open(dir.path()).unwrap(), Arc::new(RecordingMapSink::new()))
                .unwrap();
        // Town cells come back from the town records, not from here.
        assert_eq!(index.len(), 1);
        let claim = index.claim_at(&CellKey::new("w", 2, -3)).unwrap();
        assert_eq!(claim.owner, ClaimOwner::Player(alice));
        assert_eq!(claim.claimed_at, 77);
        assert_eq!(index.trust_of(alice, bob), Some(TrustTier::Access));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = tempdir().unwrap();
        let index =
            ClaimIndex::open(Storage::open(dir.path()).unwrap(), Arc::new(RecordingMapSink::new()))
                .unwrap();
        // A directory where the document should go makes every save fail.
        std::fs::create_dir_all(dir.path().join(CLAIMS_FILE)).unwrap();
        let alice = Uuid::new_v4();
        let cell = CellKey::new("w", 0, 0);
        assert!(matches!(
            index.claim_cell(alice, &cell, 4, 0, 0),
            Err(ClaimError::Storage(_))
        ));
        assert!(index.holder_at(&cell).is_none());
        assert!(index.grant_trust(alice, Uuid::new_v4(), TrustTier::Build).is_err());
        assert!(index.trusted_by(alice).is_empty());
    }
}
