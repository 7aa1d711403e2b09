//! Town-wide settings and per-plot overrides.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// Environmental toggles a town (or a plot) controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Toggle {
    /// Player-versus-player combat.
    Pvp,
    /// Explosion block damage.
    Explosions,
    /// Fire spreading between blocks.
    FireSpread,
    /// Natural hostile mob spawning.
    MobSpawning,
}

impl Toggle {
    /// Every toggle, in display order.
    pub const ALL: [Toggle; 4] = [
        Toggle::Pvp,
        Toggle::Explosions,
        Toggle::FireSpread,
        Toggle::MobSpawning,
    ];
}

/// Explicit three-way override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    /// Use the town default.
    #[default]
    Inherit,
    /// Force on.
    On,
    /// Force off.
    Off,
}

impl TriState {
    /// Resolve against the inherited value.
    #[must_use]
    pub const fn resolve(self, inherited: bool) -> bool {
        match self {
            TriState::Inherit => inherited,
            TriState::On => true,
            TriState::Off => false,
        }
    }

    /// Whether this override is set.
    #[must_use]
    pub const fn is_set(self) -> bool {
        !matches!(self, TriState::Inherit)
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { TriState::On } else { TriState::Off }
    }
}

/// Who an action flag applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Players who do not belong to the town.
    Outsider,
    /// Ordinary members (rank Member).
    Member,
}

/// Block interactions gated by flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFlag {
    /// Placing blocks.
    Build,
    /// Breaking blocks.
    Destroy,
    /// Doors, buttons, levers and the like.
    Switch,
    /// Using items against the world.
    ItemUse,
}

/// One on/off per [`ActionFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ActionFlags {
    /// Placing blocks.
    pub build: bool,
    /// Breaking blocks.
    pub destroy: bool,
    /// Switch use.
    pub switch: bool,
    /// Item use.
    pub item_use: bool,
}

impl ActionFlags {
    /// Every flag set to `value`.
    #[must_use]
    pub const fn all(value: bool) -> Self {
        Self {
            build: value,
            destroy: value,
            switch: value,
            item_use: value,
        }
    }

    /// Read one flag.
    #[must_use]
    pub const fn get(&self, flag: ActionFlag) -> bool {
        match flag {
            ActionFlag::Build => self.build,
            ActionFlag::Destroy => self.destroy,
            ActionFlag::Switch => self.switch,
            ActionFlag::ItemUse => self.item_use,
        }
    }

    /// Write one flag.
    pub fn set(&mut self, flag: ActionFlag, value: bool) {
        match flag {
            ActionFlag::Build => self.build = value,
            ActionFlag::Destroy => self.destroy = value,
            ActionFlag::Switch => self.switch = value,
            ActionFlag::ItemUse => self.item_use = value,
        }
    }
}

/// Town-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct TownSettings {
    /// PvP allowed in town territory.
    pub pvp: bool,
    /// Explosions damage blocks.
    pub explosions: bool,
    /// Fire spreads.
    pub fire_spread: bool,
    /// Hostile mobs spawn.
    pub mob_spawning: bool,
    /// What outsiders may do.
    pub outsider: ActionFlags,
    /// What ordinary members may do on protected plots they do not own.
    pub member: ActionFlags,
}

impl Default for TownSettings {
    fn default() -> Self {
        Self {
            pvp: false,
            explosions: false,
            fire_spread: false,
            mob_spawning: true,
            outsider: ActionFlags::all(false),
            member: ActionFlags::all(true),
        }
    }
}

impl TownSettings {
    /// Read a toggle.
    #[must_use]
    pub const fn toggle(&self, toggle: Toggle) -> bool {
        match toggle {
            Toggle::Pvp => self.pvp,
            Toggle::Explosions => self.explosions,
            Toggle::FireSpread => self.fire_spread,
            Toggle::MobSpawning => self.mob_spawning,
        }
    }

    /// Write a toggle.
    pub fn set_toggle(&mut self, toggle: Toggle, value: bool) {
        match toggle {
            Toggle::Pvp => self.pvp = value,
            Toggle::Explosions => self.explosions = value,
            Toggle::FireSpread => self.fire_spread = value,
            Toggle::MobSpawning => self.mob_spawning = value,
        }
    }

    /// Flags for an audience.
    #[must_use]
    pub const fn flags(&self, audience: Audience) -> &ActionFlags {
        match audience {
            Audience::Outsider => &self.outsider,
            Audience::Member => &self.member,
        }
    }

    /// Mutable flags for an audience.
    pub fn flags_mut(&mut self, audience: Audience) -> &mut ActionFlags {
        match audience {
            Audience::Outsider => &mut self.outsider,
            Audience::Member => &mut self.member,
        }
    }
}

/// Per-plot override record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    /// PvP override.
    pub pvp: TriState,
    /// Explosion override.
    pub explosions: TriState,
    /// Fire-spread override.
    pub fire_spread: TriState,
    /// Mob-spawning override.
    pub mob_spawning: TriState,
    /// Restrict containers to officers, the plot owner and the allow-list.
    pub owner_protection: bool,
    /// Members allowed to use containers while owner protection is on.
    pub container_allow: BTreeSet<PlayerId>,
}

impl PlotSettings {
    /// Read a toggle override.
    #[must_use]
    pub const fn toggle(&self, toggle: Toggle) -> TriState {
        match toggle {
            Toggle::Pvp => self.pvp,
            Toggle::Explosions => self.explosions,
            Toggle::FireSpread => self.fire_spread,
            Toggle::MobSpawning => self.mob_spawning,
        }
    }

    /// Write a toggle override.
    pub fn set_toggle(&mut self, toggle: Toggle, value: TriState) {
        match toggle {
            Toggle::Pvp => self.pvp = value,
            Toggle::Explosions => self.explosions = value,
            Toggle::FireSpread => self.fire_spread = value,
            Toggle::MobSpawning => self.mob_spawning = value,
        }
    }

    /// Whether this record overrides nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Toggle::ALL.iter().all(|t| !self.toggle(*t).is_set())
            && !self.owner_protection
            && self.container_allow.is_empty()
    }
}

/// A town cell with an assigned owner and/or overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plot {
    /// Member the plot is assigned to.
    pub owner: Option<PlayerId>,
    /// Override settings.
    pub settings: Option<PlotSettings>,
}

impl Plot {
    /// Whether the plot carries no information and can be dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.settings.as_ref().is_none_or(PlotSettings::is_empty)
    }

    /// Whether owner protection is active.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.owner_protection)
    }
}
