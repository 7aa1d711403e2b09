//! Membership and rank changes.
//!
//! Leader-only: promote, demote, transfer. Officer or above: invite, kick.
//! An actor may only kick someone of strictly lower rank.

use crate::error::TownError;
use crate::ids::PlayerId;
use crate::town::ledger::LedgerKind;
use crate::town::model::Rank;
use crate::town::registry::TownRegistry;

impl TownRegistry {
    /// Invite `target` to the named town.
    ///
    /// # Errors
    ///
    /// [`TownError::AlreadyInTown`] if the target already has a town, rank
    /// and storage errors.
    pub fn invite(&self, name: &str, actor: PlayerId, target: PlayerId) -> Result<(), TownError> {
        let mut state = self.write();
        let id = state.id_by_name(name)?;
        if let Some(town) = state.towns.get(&id) {
            town.require_rank(actor, Rank::Officer)?;
        }
        if state.town_of(target).is_some() {
            return Err(TownError::AlreadyInTown);
        }
        self.update_invites(&mut state, |book| {
            book.pending.entry(target).or_default().insert(id);
        })?;
        tracing::debug!(town = %name, %target, "invite issued");
        Ok(())
    }

    /// Withdraw a pending invite. Officer or above.
    ///
    /// # Errors
    ///
    /// [`TownError::NoInvite`] if none was pending, rank and storage errors.
    pub fn revoke_invite(
        &self,
        name: &str,
        actor: PlayerId,
        target: PlayerId,
    ) -> Result<(), TownError> {
        let mut state = self.write();
        let id = state.id_by_name(name)?;
        if let Some(town) = state.towns.get(&id) {
            town.require_rank(actor, Rank::Officer)?;
        }
        let pending = state
            .invites
            .pending
            .get(&target)
            .is_some_and(|towns| towns.contains(&id));
        if !pending {
            return Err(TownError::NoInvite);
        }
        self.update_invites(&mut state, |book| {
            if let Some(towns) = book.pending.get_mut(&target) {
                towns.remove(&id);
                if towns.is_empty() {
                    book.pending.remove(&target);
                }
            }
        })?;
        Ok(())
    }

    /// Names of the towns that have invited `player`.
    #[must_use]
    pub fn pending_invites(&self, player: PlayerId) -> Vec<String> {
        let state = self.read();
        let mut names: Vec<String> = state
            .invites
            .pending
            .get(&player)
            .into_iter()
            .flatten()
            .filter_map(|id| state.towns.get(id).map(|t| t.name.clone()))
            .collect();
        names.sort();
        names
    }

    /// Accept an invite. Clears every other pending invite for `player`.
    ///
    /// # Errors
    ///
    /// [`TownError::NoInvite`], [`TownError::AlreadyInTown`] and storage
    /// errors.
    pub fn join(&self, name: &str, player: PlayerId, display_name: &str) -> Result<(), TownError> {
        let mut state = self.write();
        let id = state.id_by_name(name)?;
        if state.town_of(player).is_some() {
            return Err(TownError::AlreadyInTown);
        }
        let invited = state
            .invites
            .pending
            .get(&player)
            .is_some_and(|towns| towns.contains(&id));
        if !invited {
            return Err(TownError::NoInvite);
        }

        let now = self.now_ms();
        self.update_locked(&mut state, id, |town| {
            town.members.insert(player, display_name.to_string());
            town.record(LedgerKind::Join, now, Some(player), 0.0, "");
            Ok(())
        })?;
        if let Err(e) = self.update_invites(&mut state, |book| {
            book.pending.remove(&player);
        }) {
            tracing::warn!(%player, "joined but stale invites remain: {e}");
        }
        tracing::info!(town = %name, %player, "member joined");
        Ok(())
    }

    /// Remove `target` from the town. The actor must outrank the target.
    ///
    /// # Errors
    ///
    /// [`TownError::NotMember`] if the target is not a member,
    /// [`TownError::InsufficientRank`] if the actor does not outrank them,
    /// storage errors.
    pub fn kick(&self, name: &str, actor: PlayerId, target: PlayerId) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            let actor_rank = town.require_rank(actor, Rank::Officer)?;
            let target_rank = town.rank_of(target).ok_or(TownError::NotMember)?;
            if target_rank >= actor_rank {
                return Err(TownError::InsufficientRank {
                    required: higher(target_rank),
                });
            }
            let target_name = town.display_name(target);
            town.officers.remove(&target);
            town.members.remove(&target);
            drop_plot_ownership(town, target);
            town.record(LedgerKind::Kick, now, Some(actor), 0.0, target_name);
            Ok(())
        })
    }

    /// Leave the town. The leader must transfer leadership first.
    ///
    /// # Errors
    ///
    /// [`TownError::LeaderCannotLeave`], [`TownError::NotMember`] and
    /// storage errors.
    pub fn leave(&self, name: &str, player: PlayerId) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            match town.rank_of(player) {
                None => return Err(TownError::NotMember),
                Some(Rank::Leader) => return Err(TownError::LeaderCannotLeave),
                Some(_) => {}
            }
            town.record(LedgerKind::Leave, now, Some(player), 0.0, "");
            town.officers.remove(&player);
            town.members.remove(&player);
            drop_plot_ownership(town, player);
            Ok(())
        })
    }

    /// Make a member an officer. Leader only.
    ///
    /// # Errors
    ///
    /// [`TownError::NotMember`], [`TownError::InsufficientRank`] (also when
    /// the target already is an officer) and storage errors.
    pub fn promote(&self, name: &str, actor: PlayerId, target: PlayerId) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Leader)?;
            match town.rank_of(target) {
                None => return Err(TownError::NotMember),
                Some(Rank::Member) => {}
                Some(_) => {
                    return Err(TownError::InsufficientRank {
                        required: Rank::Member,
                    });
                }
            }
            town.officers.insert(target);
            let target_name = town.display_name(target);
            town.record(LedgerKind::Promote, now, Some(actor), 0.0, target_name);
            Ok(())
        })
    }

    /// Make an officer an ordinary member. Leader only.
    ///
    /// # Errors
    ///
    /// [`TownError::NotMember`], [`TownError::InsufficientRank`] (also when
    /// the target is not an officer) and storage errors.
    pub fn demote(&self, name: &str, actor: PlayerId, target: PlayerId) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Leader)?;
            match town.rank_of(target) {
                None => return Err(TownError::NotMember),
                Some(Rank::Officer) => {}
                Some(_) => {
                    return Err(TownError::InsufficientRank {
                        required: Rank::Officer,
                    });
                }
            }
            town.officers.remove(&target);
            let target_name = town.display_name(target);
            town.record(LedgerKind::Demote, now, Some(actor), 0.0, target_name);
            Ok(())
        })
    }

    /// Hand leadership to another member. The old leader stays on as an
    /// officer. Leader only.
    ///
    /// # Errors
    ///
    /// [`TownError::NotMember`], [`TownError::InsufficientRank`] and storage
    /// errors.
    pub fn transfer_leadership(
        &self,
        name: &str,
        actor: PlayerId,
        target: PlayerId,
    ) -> Result<(), TownError> {
        let now = self.now_ms();
        self.update(name, |town| {
            town.require_rank(actor, Rank::Leader)?;
            if !town.is_member(target) {
                return Err(TownError::NotMember);
            }
            if target == actor {
                return Ok(());
            }
            town.officers.remove(&target);
            town.officers.insert(actor);
            town.leader = target;
            let target_name = town.display_name(target);
            town.record(LedgerKind::Transfer, now, Some(actor), 0.0, target_name);
            Ok(())
        })?;
        tracing::info!(town = %name, new_leader = %target, "leadership transferred");
        Ok(())
    }

    /// Refresh a member's display-name shadow copy.
    ///
    /// # Errors
    ///
    /// [`TownError::NotMember`] and storage errors.
    pub fn update_display_name(
        &self,
        name: &str,
        player: PlayerId,
        display_name: &str,
    ) -> Result<(), TownError> {
        self.update(name, |town| {
            let slot = town.members.get_mut(&player).ok_or(TownError::NotMember)?;
            display_name.clone_into(slot);
            Ok(())
        })
    }
}

fn higher(rank: Rank) -> Rank {
    match rank {
        Rank::Member => Rank::Officer,
        Rank::Officer | Rank::Leader => Rank::Leader,
    }
}

fn drop_plot_ownership(town: &mut crate::town::Town, player: PlayerId) {
    for plot in town.plots.values_mut() {
        if plot.owner == Some(player) {
            plot.owner = None;
        }
        if let Some(settings) = plot.settings.as_mut() {
            settings.container_allow.remove(&player);
        }
    }
    town.plots.retain(|_, plot| !plot.is_empty());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::{TempDir, tempdir};
    use uuid::Uuid;

    use crate::error::TownError;
    use crate::ids::PlayerId;
    use crate::services::SystemClock;
    use crate::storage::Storage;
    use crate::town::ledger::LedgerKind;
    use crate::town::model::Rank;
    use crate::town::registry::TownRegistry;

    fn setup() -> (TempDir, TownRegistry, PlayerId) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let registry = TownRegistry::open(storage, Arc::new(SystemClock)).unwrap();
        let leader = Uuid::new_v4();
        registry.create("Alpha", leader, "Ann").unwrap();
        (dir, registry, leader)
    }

    fn add_member(registry: &TownRegistry, leader: PlayerId, name: &str) -> PlayerId {
        let who = Uuid::new_v4();
        registry.invite("Alpha", leader, who).unwrap();
        registry.join("Alpha", who, name).unwrap();
        who
    }

    #[test]
    fn test_join_requires_invite() {
        let (_dir, registry, leader) = setup();
        let who = Uuid::new_v4();
        assert!(matches!(
            registry.join("Alpha", who, "Bob"),
            Err(TownError::NoInvite)
        ));
        registry.invite("Alpha", leader, who).unwrap();
        assert_eq!(registry.pending_invites(who), vec!["Alpha".to_string()]);
        registry.join("Alpha", who, "Bob").unwrap();
        assert!(registry.pending_invites(who).is_empty());
        let town = registry.get("Alpha").unwrap();
        assert_eq!(town.rank_of(who), Some(Rank::Member));
        assert_eq!(town.ledger.iter().last().unwrap().kind, LedgerKind::Join);
    }

    #[test]
    fn test_display_name_follows_player() {
        let (dir, registry, leader) = setup();
        let bob = add_member(&registry, leader, "Bob");
        registry.update_display_name("alpha", bob, "Robert").unwrap();
        assert_eq!(registry.get("Alpha").unwrap().members[&bob], "Robert");
        assert!(matches!(
            registry.update_display_name("Alpha", Uuid::new_v4(), "Eve"),
            Err(TownError::NotMember)
        ));
        drop(registry);

        let storage = Storage::open(dir.path()).unwrap();
        let reopened = TownRegistry::open(storage, Arc::new(SystemClock)).unwrap();
        let town = reopened.get("Alpha").unwrap();
        assert_eq!(town.members[&bob], "Robert");
        assert_eq!(town.members[&leader], "Ann");
    }

    #[test]
    fn test_member_cannot_invite() {
        let (_dir, registry, leader) = setup();
        let bob = add_member(&registry, leader, "Bob");
        assert!(matches!(
            registry.invite("Alpha", bob, Uuid::new_v4()),
            Err(TownError::InsufficientRank {
                required: Rank::Officer
            })
        ));
    }

    #[test]
    fn test_invites_survive_reopen() {
        let (dir, registry, leader) = setup();
        let who = Uuid::new_v4();
        registry.invite("Alpha", leader, who).unwrap();
        drop(registry);
        let storage = Storage::open(dir.path()).unwrap();
        let registry = TownRegistry::open(storage, Arc::new(SystemClock)).unwrap();
        assert_eq!(registry.pending_invites(who), vec!["Alpha".to_string()]);
        registry.revoke_invite("Alpha", leader, who).unwrap();
        assert!(matches!(
            registry.join("Alpha", who, "Bob"),
            Err(TownError::NoInvite)
        ));
    }

    #[test]
    fn test_kick_needs_higher_rank() {
        let (_dir, registry, leader) = setup();
        let bob = add_member(&registry, leader, "Bob");
        let cat = add_member(&registry, leader, "Cat");
        registry.promote("Alpha", leader, bob).unwrap();
        registry.promote("Alpha", leader, cat).unwrap();

        assert!(matches!(
            registry.kick("Alpha", bob, cat),
            Err(TownError::InsufficientRank { .. })
        ));
        assert!(matches!(
            registry.kick("Alpha", bob, leader),
            Err(TownError::InsufficientRank { .. })
        ));
        registry.demote("Alpha", leader, cat).unwrap();
        registry.kick("Alpha", bob, cat).unwrap();
        assert_eq!(registry.town_of(cat), None);
    }

    #[test]
    fn test_leader_cannot_leave() {
        let (_dir, registry, leader) = setup();
        assert!(matches!(
            registry.leave("Alpha", leader),
            Err(TownError::LeaderCannotLeave)
        ));
        let bob = add_member(&registry, leader, "Bob");
        registry.leave("Alpha", bob).unwrap();
        assert_eq!(registry.town_of(bob), None);
    }

    #[test]
    fn test_transfer_leadership() {
        let (_dir, registry, leader) = setup();
        let bob = add_member(&registry, leader, "Bob");
        assert!(matches!(
            registry.transfer_leadership("Alpha", bob, bob),
            Err(TownError::InsufficientRank {
                required: Rank::Leader
            })
        ));
        registry.transfer_leadership("Alpha", leader, bob).unwrap();
        let town = registry.get("Alpha").unwrap();
        assert_eq!(town.leader, bob);
        assert_eq!(town.rank_of(leader), Some(Rank::Officer));
        registry.leave("Alpha", leader).unwrap();
    }

    #[test]
    fn test_promote_twice_rejected() {
        let (_dir, registry, leader) = setup();
        let bob = add_member(&registry, leader, "Bob");
        registry.promote("Alpha", leader, bob).unwrap();
        assert!(registry.promote("Alpha", leader, bob).is_err());
        assert!(registry.demote("Alpha", leader, leader).is_err());
    }
}
