//! Layered permission resolution.
//!
//! A decision walks down three layers and stops at the first that applies:
//!
//! 1. town territory: plot overrides, then town defaults
//! 2. individual claims: the owner and anyone they trust
//! 3. wilderness: the configured protection band
//!
//! Resolution only reads shared state. It never fails and never panics; an
//! unknown situation resolves to a decision like any other.

use std::fmt;

use crate::cell::{BlockPos, CellKey};
use crate::claims::{ClaimIndex, TrustTier};
use crate::config::Config;
use crate::ids::{ClaimOwner, PlayerId, TownId};
use crate::services::BypassPolicy;
use crate::town::{ActionFlag, Rank, Toggle, Town, TownRegistry};

/// Something a player tries to do at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Place a block.
    Build,
    /// Break a block.
    Destroy,
    /// Use a door, button, lever or similar.
    Switch,
    /// Use an item against the world.
    ItemUse,
    /// Open a container.
    Container,
    /// Attack another player standing here.
    Pvp,
}

impl Action {
    /// Every action.
    pub const ALL: [Action; 6] = [
        Action::Build,
        Action::Destroy,
        Action::Switch,
        Action::ItemUse,
        Action::Container,
        Action::Pvp,
    ];

    /// Trust needed on someone else's claim, or `None` if trust is not
    /// consulted.
    #[must_use]
    pub const fn required_tier(self) -> Option<TrustTier> {
        match self {
            Action::Switch | Action::ItemUse => Some(TrustTier::Access),
            Action::Container => Some(TrustTier::Container),
            Action::Build | Action::Destroy => Some(TrustTier::Build),
            Action::Pvp => None,
        }
    }

    /// The town flag gating this action, if any.
    #[must_use]
    pub const fn flag(self) -> Option<ActionFlag> {
        match self {
            Action::Build => Some(ActionFlag::Build),
            Action::Destroy => Some(ActionFlag::Destroy),
            Action::Switch => Some(ActionFlag::Switch),
            Action::ItemUse => Some(ActionFlag::ItemUse),
            Action::Container | Action::Pvp => None,
        }
    }
}

/// Why an action was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The town does not let outsiders do this.
    TownOutsider(TownId),
    /// An owner-protected plot the actor neither owns nor is listed on.
    PlotProtected(TownId),
    /// Containers here are closed to the actor.
    ContainerLocked(TownId),
    /// Someone else's claim, with no sufficient trust.
    Claimed(PlayerId),
    /// Protected wilderness.
    Wilderness,
    /// PvP is off here.
    PvpDisabled,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::TownOutsider(_) => f.write_str("this land belongs to a town"),
            DenyReason::PlotProtected(_) => f.write_str("this plot is protected by its owner"),
            DenyReason::ContainerLocked(_) => f.write_str("you may not open containers here"),
            DenyReason::Claimed(_) => f.write_str("this land is claimed"),
            DenyReason::Wilderness => f.write_str("the wilderness is protected"),
            DenyReason::PvpDisabled => f.write_str("PvP is disabled here"),
        }
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Go ahead.
    Allow,
    /// Cancel, for this reason.
    Deny(DenyReason),
}

impl Decision {
    /// Whether the action may proceed.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }

    const fn from_bool(allowed: bool, reason: DenyReason) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny(reason)
        }
    }
}

/// Borrowing view over the state a decision needs.
#[derive(Clone, Copy)]
pub struct PermissionResolver<'a> {
    claims: &'a ClaimIndex,
    towns: &'a TownRegistry,
    config: &'a Config,
    bypass: &'a dyn BypassPolicy,
}

impl fmt::Debug for PermissionResolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionResolver").finish_non_exhaustive()
    }
}

impl<'a> PermissionResolver<'a> {
    /// Build a resolver over the given state.
    #[must_use]
    pub fn new(
        claims: &'a ClaimIndex,
        towns: &'a TownRegistry,
        config: &'a Config,
        bypass: &'a dyn BypassPolicy,
    ) -> Self {
        Self {
            claims,
            towns,
            config,
            bypass,
        }
    }

    /// Decide whether `actor` may perform `action` at `pos` in `world`.
    #[must_use]
    pub fn resolve(&self, actor: PlayerId, world: &str, pos: BlockPos, action: Action) -> Decision {
        let cell = pos.cell(world);
        if let Some(decision) = self
            .towns
            .with_town_at(&cell, |town| town_decision(town, actor, &cell, action))
        {
            return decision;
        }
        match self.claims.holder_at(&cell) {
            Some(ClaimOwner::Player(owner)) => self.claim_decision(owner, actor, action),
            Some(ClaimOwner::Town(id)) => {
                // Index and registry disagree; the registry is authoritative.
                tracing::warn!(
                    %cell,
                    town = %id,
                    "claim index holds a town cell the registry does not"
                );
                self.wild_decision(actor, pos, action)
            }
            None => self.wild_decision(actor, pos, action),
        }
    }

    /// Whether an environmental effect may happen at `pos`.
    ///
    /// Town territory follows the effective toggle. Individual claims block
    /// explosions and fire spread but allow mobs and PvP. The wilderness
    /// allows everything.
    #[must_use]
    pub fn resolve_environment(&self, world: &str, pos: BlockPos, toggle: Toggle) -> bool {
        let cell = pos.cell(world);
        if let Some(allowed) = self
            .towns
            .with_town_at(&cell, |town| town.effective_toggle(&cell, toggle))
        {
            return allowed;
        }
        match self.claims.holder_at(&cell) {
            Some(ClaimOwner::Player(_)) => match toggle {
                Toggle::Explosions | Toggle::FireSpread => false,
                Toggle::Pvp | Toggle::MobSpawning => true,
            },
            Some(ClaimOwner::Town(_)) | None => true,
        }
    }

    fn claim_decision(&self, owner: PlayerId, actor: PlayerId, action: Action) -> Decision {
        if owner == actor {
            return Decision::Allow;
        }
        let Some(required) = action.required_tier() else {
            return Decision::Allow;
        };
        let trusted = self
            .claims
            .trust_of(owner, actor)
            .is_some_and(|tier| tier.covers(required));
        Decision::from_bool(trusted, DenyReason::Claimed(owner))
    }

    fn wild_decision(&self, actor: PlayerId, pos: BlockPos, action: Action) -> Decision {
        if !self.config.wild_protection_enabled {
            return Decision::Allow;
        }
        let allowed = match action {
            Action::Build | Action::Destroy if pos.y >= self.config.wild_protection_min_y => {
                self.bypass.bypasses_wilderness(actor)
            }
            Action::Build => self.config.wild_build_below_allowed,
            Action::Destroy => self.config.wild_destroy_below_allowed,
            Action::Switch | Action::ItemUse | Action::Container | Action::Pvp => true,
        };
        Decision::from_bool(allowed, DenyReason::Wilderness)
    }
}

fn town_decision(town: &Town, actor: PlayerId, cell: &CellKey, action: Action) -> Decision {
    match action {
        Action::Pvp => Decision::from_bool(
            town.effective_toggle(cell, Toggle::Pvp),
            DenyReason::PvpDisabled,
        ),
        Action::Container => Decision::from_bool(
            town.can_use_container(actor, cell),
            DenyReason::ContainerLocked(town.id),
        ),
        Action::Build | Action::Destroy | Action::Switch | Action::ItemUse => {
            let Some(flag) = action.flag() else {
                return Decision::Allow;
            };
            match town.rank_of(actor) {
                None => Decision::from_bool(
                    town.settings.outsider.get(flag),
                    DenyReason::TownOutsider(town.id),
                ),
                Some(Rank::Member) if locked_out_of_plot(town, actor, cell) => {
                    Decision::from_bool(
                        town.settings.member.get(flag),
                        DenyReason::PlotProtected(town.id),
                    )
                }
                Some(_) => Decision::Allow,
            }
        }
    }
}

/// An owner-protected plot that `actor` neither owns nor is listed on.
fn locked_out_of_plot(town: &Town, actor: PlayerId, cell: &CellKey) -> bool {
    let Some(plot) = town.plots.get(cell) else {
        return false;
    };
    let Some(settings) = plot.settings.as_ref().filter(|s| s.owner_protection) else {
        return false;
    };
    plot.owner != Some(actor) && !settings.container_allow.contains(&actor)
}
