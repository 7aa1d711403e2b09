//! Identity types shared by every component.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a player.
pub type PlayerId = Uuid;

/// Stable identifier for a town.
///
/// Generated once at founding and never reused, so renaming a town does not
/// disturb anything keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TownId(pub Uuid);

impl TownId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TownId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The entity holding a cell.
///
/// A town holds its cells through its own identity, so cascading a town's
/// deletion only touches cells attributed to that town.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ClaimOwner {
    /// An individual player's claim.
    Player(PlayerId),
    /// Territory of a town.
    Town(TownId),
}

impl ClaimOwner {
    /// The player behind this owner, if it is an individual claim.
    #[must_use]
    pub const fn player(self) -> Option<PlayerId> {
        match self {
            Self::Player(id) => Some(id),
            Self::Town(_) => None,
        }
    }

    /// The town behind this owner, if it is town territory.
    #[must_use]
    pub const fn town(self) -> Option<TownId> {
        match self {
            Self::Town(id) => Some(id),
            Self::Player(_) => None,
        }
    }
}
