//! Town-wide settings and per-plot overrides.

use crate::cell::CellKey;
use crate::error::TownError;
use crate::ids::PlayerId;
use crate::town::Town;
use crate::town::ledger::LedgerKind;
use crate::town::model::Rank;
use crate::town::registry::TownRegistry;
use crate::town::settings::{ActionFlag, Audience, Plot, PlotSettings, Toggle, TriState};

impl TownRegistry {
    /// Change a town-wide toggle. Officer or above.
    ///
    /// # Errors
    ///
    /// Rank and storage errors.
    pub fn set_toggle(
        &self,
        name: &str,
        actor: PlayerId,
        toggle: Toggle,
        value: bool,
    ) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Officer)?;
            town.settings.set_toggle(toggle, value);
            town.record(
                LedgerKind::Settings,
                now,
                Some(actor),
                0.0,
                format!("{toggle:?} = {value}"),
            );
            Ok(())
        })
    }

    /// Change an outsider or member action flag. Officer or above.
    ///
    /// # Errors
    ///
    /// Rank and storage errors.
    pub fn set_action_flag(
        &self,
        name: &str,
        actor: PlayerId,
        audience: Audience,
        flag: ActionFlag,
        value: bool,
    ) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Officer)?;
            town.settings.flags_mut(audience).set(flag, value);
            town.record(
                LedgerKind::Settings,
                now,
                Some(actor),
                0.0,
                format!("{audience:?} {flag:?} = {value}"),
            );
            Ok(())
        })
    }

    /// Assign a plot to a member, or clear the assignment with `None`.
    /// Officer or above.
    ///
    /// # Errors
    ///
    /// [`TownError::NotInTerritory`], [`TownError::NotMember`] if the new
    /// owner does not belong to the town, rank and storage errors.
    pub fn set_plot_owner(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
        owner: Option<PlayerId>,
    ) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Officer)?;
            require_territory(town, cell)?;
            if let Some(owner) = owner {
                if !town.is_member(owner) {
                    return Err(TownError::NotMember);
                }
            }
            town.plots.entry(cell.clone()).or_default().owner = owner;
            let detail = match owner {
                Some(owner) => format!("{cell} assigned to {}", town.display_name(owner)),
                None => format!("{cell} unassigned"),
            };
            tidy(town, cell);
            town.record(LedgerKind::Plot, now, Some(actor), 0.0, detail);
            Ok(())
        })
    }

    /// Override a toggle on one plot. Officer or above, or the plot owner.
    ///
    /// # Errors
    ///
    /// [`TownError::NotInTerritory`], rank and storage errors.
    pub fn set_plot_toggle(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
        toggle: Toggle,
        value: TriState,
    ) -> Result<(), TownError> {
        self.edit_plot(name, actor, cell, format!("{cell} {toggle:?} = {value:?}"), |s| {
            s.set_toggle(toggle, value);
        })
    }

    /// Turn owner protection on or off for one plot. Officer or above, or
    /// the plot owner.
    ///
    /// # Errors
    ///
    /// [`TownError::NotInTerritory`], rank and storage errors.
    pub fn set_owner_protection(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
        enabled: bool,
    ) -> Result<(), TownError> {
        self.edit_plot(
            name,
            actor,
            cell,
            format!("{cell} owner protection = {enabled}"),
            |s| s.owner_protection = enabled,
        )
    }

    /// Add `who` to a plot's container allow-list. Officer or above, or the
    /// plot owner. Only members benefit from the list.
    ///
    /// # Errors
    ///
    /// [`TownError::NotInTerritory`], rank and storage errors.
    pub fn allow_container(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
        who: PlayerId,
    ) -> Result<(), TownError> {
        self.edit_plot(name, actor, cell, format!("{cell} containers +{who}"), |s| {
            s.container_allow.insert(who);
        })
    }

    /// Remove `who` from a plot's container allow-list.
    ///
    /// # Errors
    ///
    /// [`TownError::NotInTerritory`], rank and storage errors.
    pub fn disallow_container(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
        who: PlayerId,
    ) -> Result<(), TownError> {
        self.edit_plot(name, actor, cell, format!("{cell} containers -{who}"), |s| {
            s.container_allow.remove(&who);
        })
    }

    /// Drop every override and the owner assignment of a plot. Officer or
    /// above.
    ///
    /// # Errors
    ///
    /// [`TownError::NotInTerritory`], rank and storage errors.
    pub fn clear_plot(&self, name: &str, actor: PlayerId, cell: &CellKey) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Officer)?;
            require_territory(town, cell)?;
            if town.plots.remove(cell).is_some() {
                town.record(LedgerKind::Plot, now, Some(actor), 0.0, format!("{cell} cleared"));
            }
            Ok(())
        })
    }

    fn edit_plot(
        &self,
        name: &str,
        actor: PlayerId,
        cell: &CellKey,
        detail: String,
        edit: impl FnOnce(&mut PlotSettings),
    ) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            require_territory(town, cell)?;
            if !town.owns_plot(actor, cell) {
                town.require_rank(actor, Rank::Officer)?;
            }
            let plot: &mut Plot = town.plots.entry(cell.clone()).or_default();
            edit(plot.settings.get_or_insert_with(PlotSettings::default));
            tidy(town, cell);
            town.record(LedgerKind::Plot, now, Some(actor), 0.0, detail);
            Ok(())
        })
    }
}

fn require_territory(town: &Town, cell: &CellKey) -> Result<(), TownError> {
    if town.territory.contains(cell) {
        Ok(())
    } else {
        Err(TownError::NotInTerritory)
    }
}

/// Drop a plot entry once it no longer overrides anything.
fn tidy(town: &mut Town, cell: &CellKey) {
    if town.plots.get(cell).is_some_and(Plot::is_empty) {
        town.plots.remove(cell);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::{TempDir, tempdir};
    use uuid::Uuid;

    use crate::cell::CellKey;
    use crate::error::TownError;
    use crate::ids::PlayerId;
    use crate::services::SystemClock;
    use crate::storage::Storage;
    use crate::town::registry::TownRegistry;
    use crate::town::settings::{ActionFlag, Audience, Toggle, TriState};

    fn setup() -> (TempDir, TownRegistry, PlayerId, PlayerId, CellKey) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let registry = TownRegistry::open(storage, Arc::new(SystemClock)).unwrap();
        let leader = Uuid::new_v4();
        let member = Uuid::new_v4();
        registry.create("Alpha", leader, "Ann").unwrap();
        registry.invite("Alpha", leader, member).unwrap();
        registry.join("Alpha", member, "Bob").unwrap();
        let cell = CellKey::new("w", 0, 0);
        registry.claim_cell("Alpha", leader, &cell, 10, 0.0).unwrap();
        (dir, registry, leader, member, cell)
    }

    #[test]
    fn test_plot_toggle_override_leaves_default() {
        let (_dir, registry, leader, _member, cell) = setup();
        registry
            .set_plot_toggle("Alpha", leader, &cell, Toggle::Pvp, TriState::On)
            .unwrap();
        let town = registry.get("Alpha").unwrap();
        assert!(town.effective_toggle(&cell, Toggle::Pvp));
        assert!(!town.settings.pvp);

        registry
            .set_plot_toggle("Alpha", leader, &cell, Toggle::Pvp, TriState::Inherit)
            .unwrap();
        assert!(registry.get("Alpha").unwrap().plots.is_empty());
    }

    #[test]
    fn test_plot_owner_can_edit_own_plot() {
        let (_dir, registry, leader, member, cell) = setup();
        assert!(matches!(
            registry.set_owner_protection("Alpha", member, &cell, true),
            Err(TownError::InsufficientRank { .. })
        ));
        registry
            .set_plot_owner("Alpha", leader, &cell, Some(member))
            .unwrap();
        registry
            .set_owner_protection("Alpha", member, &cell, true)
            .unwrap();
        let town = registry.get("Alpha").unwrap();
        assert!(town.plots[&cell].is_protected());
    }

    #[test]
    fn test_plot_outside_territory() {
        let (_dir, registry, leader, _member, _cell) = setup();
        assert!(matches!(
            registry.set_owner_protection("Alpha", leader, &CellKey::new("w", 9, 9), true),
            Err(TownError::NotInTerritory)
        ));
    }

    #[test]
    fn test_plot_owner_must_be_member() {
        let (_dir, registry, leader, _member, cell) = setup();
        assert!(matches!(
            registry.set_plot_owner("Alpha", leader, &cell, Some(Uuid::new_v4())),
            Err(TownError::NotMember)
        ));
    }

    #[test]
    fn test_flags_and_toggles() {
        let (_dir, registry, leader, member, _cell) = setup();
        registry
            .set_action_flag("Alpha", leader, Audience::Outsider, ActionFlag::Switch, true)
            .unwrap();
        registry.set_toggle("Alpha", leader, Toggle::Pvp, true).unwrap();
        assert!(registry.set_toggle("Alpha", member, Toggle::Pvp, false).is_err());
        let town = registry.get("Alpha").unwrap();
        assert!(town.settings.outsider.switch);
        assert!(town.settings.pvp);
    }

    #[test]
    fn test_unclaim_drops_plot() {
        let (_dir, registry, leader, member, cell) = setup();
        registry
            .set_plot_owner("Alpha", leader, &cell, Some(member))
            .unwrap();
        registry.unclaim_cell("Alpha", leader, &cell).unwrap();
        let town = registry.get("Alpha").unwrap();
        assert!(town.plots.is_empty());
        assert!(town.territory.is_empty());
        registry.clear_plot("Alpha", leader, &cell).unwrap_err();
    }
}
