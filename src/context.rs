//! The process-wide composition root.
//!
//! [`LandContext`] owns every component plus the state that used to be
//! ambient: debug flags, service handles, the upkeep thread. Hosts create
//! one with [`LandContext::open`] and pass it by reference; nothing here is
//! static.
//!
//! Operations that touch money or two components at once live here, so the
//! components themselves stay unaware of each other:
//!
//! - player and town claims are serialized through one claim gate, keeping
//!   a cell from being taken by both at once
//! - money taken from a player before a town operation is refunded if the
//!   operation fails

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cell::{BlockPos, CellKey};
use crate::claims::{Claim, ClaimIndex};
use crate::config::Config;
use crate::correlator::InteractionCorrelator;
use crate::error::{ClaimError, OpenError, TownError};
use crate::ids::{ClaimOwner, PlayerId, TownId};
use crate::permission::{Action, Decision, PermissionResolver};
use crate::services::{
    BypassPolicy, Clock, Currency, LogNotifier, MapInvalidation, MemoryBank, NoBypass, NoMapSink,
    Notifier, Playtime, SystemClock,
};
use crate::storage::Storage;
use crate::town::{Toggle, Town, TownRegistry};
use crate::upkeep::{UpkeepHandle, UpkeepScheduler};

/// Host services the core calls out to.
#[derive(Clone)]
pub struct Services {
    /// Player accounts.
    pub currency: Arc<dyn Currency>,
    /// Playtime, for claim quotas.
    pub playtime: Arc<dyn Playtime>,
    /// Player messaging.
    pub notifier: Arc<dyn Notifier>,
    /// Map renderer hook.
    pub map: Arc<dyn MapInvalidation>,
    /// Wilderness bypass.
    pub bypass: Arc<dyn BypassPolicy>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Services for tools running outside a live server: an empty bank,
    /// zero playtime, log-only messages, no map, no bypass, the real clock.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            currency: Arc::new(MemoryBank::new()),
            playtime: Arc::new(crate::services::FixedPlaytime::new()),
            notifier: Arc::new(LogNotifier),
            map: Arc::new(NoMapSink),
            bypass: Arc::new(NoBypass),
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Everything the land system needs, owned in one place.
pub struct LandContext {
    config: Config,
    storage: Storage,
    services: Services,
    claims: Arc<ClaimIndex>,
    towns: Arc<TownRegistry>,
    correlator: InteractionCorrelator,
    upkeep: Arc<UpkeepScheduler>,
    upkeep_thread: Mutex<Option<UpkeepHandle>>,
    debug: Mutex<HashSet<PlayerId>>,
    claim_gate: Arc<Mutex<()>>,
}

impl std::fmt::Debug for LandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LandContext")
            .field("storage", &self.storage)
            .field("claims", &self.claims)
            .field("towns", &self.towns)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LandContext {
    /// Open the data directory and load all state.
    ///
    /// Town territory is mirrored into the claim index; a town cell that
    /// overlaps an individual claim is logged and left for
    /// [`crate::invariants::check_invariants`] to report.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is out of range or saved state cannot
    /// be read.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        config: Config,
        services: Services,
    ) -> Result<Self, OpenError> {
        config.validate()?;
        let storage = Storage::open(data_dir)?;
        let claims = Arc::new(ClaimIndex::open(storage.clone(), services.map.clone())?);
        let towns = Arc::new(TownRegistry::open(
            storage.clone(),
            services.clock.clone(),
        )?);
        for town in towns.list() {
            for cell in claims.mirror_town(town.id, &town.territory, town.created_at) {
                tracing::warn!(town = %town.name, %cell, "town cell overlaps another claim");
            }
        }
        let claim_gate = Arc::new(Mutex::new(()));
        let upkeep = Arc::new(UpkeepScheduler::new(
            config.clone(),
            storage.clone(),
            towns.clone(),
            claims.clone(),
            services.notifier.clone(),
            services.clock.clone(),
            claim_gate.clone(),
        )?);
        tracing::info!(
            root = %storage.root().display(),
            towns = towns.len(),
            claims = claims.len(),
            "land context opened"
        );
        Ok(Self {
            correlator: InteractionCorrelator::new(services.clock.clone()),
            config,
            storage,
            services,
            claims,
            towns,
            upkeep,
            upkeep_thread: Mutex::new(None),
            debug: Mutex::new(HashSet::new()),
            claim_gate,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Data directory handle.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Host services.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The claim index.
    #[must_use]
    pub fn claims(&self) -> &ClaimIndex {
        &self.claims
    }

    /// The town registry.
    #[must_use]
    pub fn towns(&self) -> &TownRegistry {
        &self.towns
    }

    /// The interaction correlator.
    #[must_use]
    pub fn correlator(&self) -> &InteractionCorrelator {
        &self.correlator
    }

    /// The upkeep scheduler.
    #[must_use]
    pub fn upkeep(&self) -> &Arc<UpkeepScheduler> {
        &self.upkeep
    }

    /// Claim quota of `player` given their playtime.
    #[must_use]
    pub fn claim_quota(&self, player: PlayerId) -> u32 {
        self.config
            .claim_quota(self.services.playtime.hours_played(player))
    }

    /// Claim `cell` for `player`, within their quota and the buffer rule.
    ///
    /// # Errors
    ///
    /// See [`ClaimIndex::claim_cell`]. Town territory reports
    /// [`ClaimError::OwnedByOther`].
    pub fn claim_for_player(&self, player: PlayerId, cell: &CellKey) -> Result<Claim, ClaimError> {
        let quota = self.claim_quota(player);
        let _gate = lock(&self.claim_gate);
        if self.towns.town_at(cell).is_some() {
            return Err(ClaimError::OwnedByOther);
        }
        self.claims.claim_cell(
            player,
            cell,
            quota,
            self.config.claim_buffer_size,
            self.services.clock.now_millis(),
        )
    }

    /// Release `player`'s claim on `cell`.
    ///
    /// # Errors
    ///
    /// [`ClaimError::Storage`] if the release could not be persisted.
    pub fn unclaim_for_player(&self, player: PlayerId, cell: &CellKey) -> Result<bool, ClaimError> {
        self.claims.release_cell(player, cell)
    }

    /// Found a town, charging the founder `townCreationCost`.
    ///
    /// The fee is refunded if founding fails after it was taken.
    ///
    /// # Errors
    ///
    /// [`TownError::InvalidName`], [`TownError::NameTaken`],
    /// [`TownError::AlreadyInTown`], [`TownError::CannotAfford`] or
    /// [`TownError::Storage`].
    pub fn found_town(
        &self,
        founder: PlayerId,
        founder_name: &str,
        name: &str,
    ) -> Result<Town, TownError> {
        self.towns.check_name_available(name)?;
        if self.towns.town_of(founder).is_some() {
            return Err(TownError::AlreadyInTown);
        }
        let cost = self.config.town_creation_cost;
        if !self.services.currency.withdraw(founder, cost) {
            return Err(TownError::CannotAfford { needed: cost });
        }
        match self.towns.create(name, founder, founder_name) {
            Ok(town) => Ok(town),
            Err(e) => {
                self.services.currency.deposit(founder, cost);
                tracing::debug!(%founder, "founding failed, fee refunded: {e}");
                Err(e)
            }
        }
    }

    /// Claim `cell` for a town, paying `townClaimCost` from its bank.
    ///
    /// # Errors
    ///
    /// See [`TownRegistry::claim_cell`]; an individual claim on the cell
    /// reports [`ClaimError::OwnedByOther`]. If the claim index refuses the
    /// cell, the registry claim is reverted and the fee refunded.
    pub fn claim_for_town(
        &self,
        actor: PlayerId,
        town: &str,
        cell: &CellKey,
    ) -> Result<TownId, TownError> {
        let _gate = lock(&self.claim_gate);
        if let Some(ClaimOwner::Player(_)) = self.claims.holder_at(cell) {
            return Err(ClaimError::OwnedByOther.into());
        }
        let id = self.towns.claim_cell(
            town,
            actor,
            cell,
            self.config.max_town_claims,
            self.config.town_claim_cost,
        )?;
        if let Err(e) = self
            .claims
            .assign_town_cell(id, cell, self.services.clock.now_millis())
        {
            tracing::error!(%cell, town = %id, "claim index refused town cell: {e}");
            if let Err(revert) = self
                .towns
                .revert_claim(id, cell, self.config.town_claim_cost)
            {
                tracing::error!(%cell, town = %id, "cannot revert town claim: {revert}");
            }
            return Err(e.into());
        }
        Ok(id)
    }

    /// Release a town cell.
    ///
    /// # Errors
    ///
    /// See [`TownRegistry::unclaim_cell`].
    pub fn unclaim_for_town(
        &self,
        actor: PlayerId,
        town: &str,
        cell: &CellKey,
    ) -> Result<TownId, TownError> {
        let _gate = lock(&self.claim_gate);
        let id = self.towns.unclaim_cell(town, actor, cell)?;
        self.claims.release_town_cell(id, cell);
        Ok(id)
    }

    /// Delete a town and release all of its cells. Leader only.
    ///
    /// # Errors
    ///
    /// See [`TownRegistry::delete`].
    pub fn delete_town(&self, actor: PlayerId, town: &str) -> Result<Town, TownError> {
        let _gate = lock(&self.claim_gate);
        let removed = self.towns.delete(town, actor)?;
        let released = self.claims.release_owner(ClaimOwner::Town(removed.id));
        tracing::info!(town = %removed.name, cells = released.len(), "town deleted by leader");
        Ok(removed)
    }

    /// Move money from `actor`'s account into the town bank.
    ///
    /// # Errors
    ///
    /// [`TownError::InvalidAmount`], [`TownError::CannotAfford`], or any
    /// error from [`TownRegistry::deposit`] (after which the money is
    /// refunded).
    pub fn deposit_to_town(
        &self,
        actor: PlayerId,
        town: &str,
        amount: f64,
    ) -> Result<f64, TownError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(TownError::InvalidAmount(amount));
        }
        if !self.services.currency.withdraw(actor, amount) {
            return Err(TownError::CannotAfford { needed: amount });
        }
        self.towns.deposit(town, actor, amount).inspect_err(|_| {
            self.services.currency.deposit(actor, amount);
        })
    }

    /// Move money from the town bank into `actor`'s account.
    ///
    /// # Errors
    ///
    /// See [`TownRegistry::withdraw`].
    pub fn withdraw_from_town(
        &self,
        actor: PlayerId,
        town: &str,
        amount: f64,
    ) -> Result<f64, TownError> {
        let balance = self.towns.withdraw(town, actor, amount)?;
        self.services.currency.deposit(actor, amount);
        Ok(balance)
    }

    /// A resolver over the current state.
    #[must_use]
    pub fn resolver(&self) -> PermissionResolver<'_> {
        PermissionResolver::new(
            &self.claims,
            &self.towns,
            &self.config,
            self.services.bypass.as_ref(),
        )
    }

    /// Decide an action, logging the decision for players in debug mode.
    #[must_use]
    pub fn check(&self, actor: PlayerId, world: &str, pos: BlockPos, action: Action) -> Decision {
        let decision = self.resolver().resolve(actor, world, pos, action);
        if self.is_debug(actor) {
            tracing::info!(%actor, world, ?pos, ?action, ?decision, "permission decision");
        }
        decision
    }

    /// Whether an environmental effect may happen at `pos`.
    #[must_use]
    pub fn check_environment(&self, world: &str, pos: BlockPos, toggle: Toggle) -> bool {
        self.resolver().resolve_environment(world, pos, toggle)
    }

    /// Remember that `actor` just interacted with `pos`.
    pub fn record_intent(&self, actor: PlayerId, world: &str, pos: BlockPos) {
        self.correlator.record(actor, world, pos);
    }

    /// Attribute a mutation at `pos` to the player who recently interacted
    /// there (or next to it), and decide it on their behalf.
    ///
    /// Returns `None` when nobody can be held responsible. The intent is
    /// used up by the decision.
    #[must_use]
    pub fn attribute_and_check(
        &self,
        world: &str,
        pos: BlockPos,
        action: Action,
    ) -> Option<(PlayerId, Decision)> {
        let intent = self.correlator.lookup(world, pos)?;
        let decision = self.check(intent.actor, world, pos, action);
        self.correlator.consume(&intent.world, intent.pos);
        Some((intent.actor, decision))
    }

    /// Turn per-player decision logging on or off.
    pub fn set_debug(&self, player: PlayerId, enabled: bool) {
        let mut debug = lock(&self.debug);
        if enabled {
            debug.insert(player);
        } else {
            debug.remove(&player);
        }
    }

    /// Whether `player` has decision logging on.
    #[must_use]
    pub fn is_debug(&self, player: PlayerId) -> bool {
        lock(&self.debug).contains(&player)
    }

    /// Start the background upkeep thread, replacing any running one.
    ///
    /// Hosts without their own timer pass
    /// [`crate::upkeep::DEFAULT_TICK_INTERVAL`].
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start_upkeep(&self, interval: Duration) -> std::io::Result<()> {
        let handle = self.upkeep.clone().spawn(interval)?;
        if let Some(previous) = lock(&self.upkeep_thread).replace(handle) {
            previous.shutdown();
        }
        Ok(())
    }

    /// Stop background work. State is already on disk.
    pub fn shutdown(self) {
        if let Some(handle) = lock(&self.upkeep_thread).take() {
            handle.shutdown();
        }
        tracing::info!("land context shut down");
    }
}
