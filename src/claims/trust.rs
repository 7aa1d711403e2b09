//! Trust tiers an individual claim owner can grant to other players.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How far an owner trusts another player on their claims.
///
/// Ordered `Access < Container < Build < Manage`; a grant covers every
/// tier below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Doors, buttons, levers and item use.
    Access,
    /// Chests and other containers.
    Container,
    /// Placing and breaking blocks.
    Build,
    /// Full trust.
    Manage,
}

impl TrustTier {
    /// Every tier, lowest first.
    pub const ALL: [TrustTier; 4] = [
        TrustTier::Access,
        TrustTier::Container,
        TrustTier::Build,
        TrustTier::Manage,
    ];

    /// Whether a grant at this tier covers `required`.
    #[must_use]
    pub fn covers(self, required: TrustTier) -> bool {
        self >= required
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TrustTier::Access => "access",
            TrustTier::Container => "container",
            TrustTier::Build => "build",
            TrustTier::Manage => "manage",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown tier name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trust tier {0:?}")]
pub struct ParseTrustTierError(pub String);

impl FromStr for TrustTier {
    type Err = ParseTrustTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrustTier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseTrustTierError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_order() {
        assert!(TrustTier::Manage.covers(TrustTier::Build));
        assert!(TrustTier::Build.covers(TrustTier::Build));
        assert!(!TrustTier::Container.covers(TrustTier::Build));
        assert!(TrustTier::Container.covers(TrustTier::Access));
    }

    #[test]
    fn test_parse() {
        assert_eq!("BUILD".parse::<TrustTier>().unwrap(), TrustTier::Build);
        assert!("owner".parse::<TrustTier>().is_err());
    }
}
