//! Configuration surface.
//!
//! Loaded from a TOML file with camelCase keys. Every key is optional and
//! falls back to its default; unknown keys are rejected so typos surface at
//! startup instead of silently running with defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest accepted `claimBufferSize`, in chunks.
pub const MAX_CLAIM_BUFFER: u32 = 32;

/// All recognized configuration keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools, missing_copy_implementations)]
pub struct Config {
    /// Claims every player starts with.
    pub starting_claims: u32,
    /// Extra claims earned per hour played.
    pub claims_per_hour: u32,
    /// Hard cap on a player's claim quota.
    pub max_claims: u32,
    /// Chebyshev radius, in chunks, kept clear around other owners' claims.
    pub claim_buffer_size: u32,
    /// One-time fee for founding a town.
    pub town_creation_cost: f64,
    /// Fee debited from the town bank for each claimed chunk.
    pub town_claim_cost: f64,
    /// Maximum chunks a single town may hold.
    pub max_town_claims: u32,
    /// Flat daily upkeep per town.
    pub town_upkeep_base: f64,
    /// Daily upkeep per claimed chunk.
    pub town_upkeep_per_claim: f64,
    /// Hour of day (0-23) at which upkeep is collected.
    pub town_upkeep_hour: u32,
    /// Whether unclaimed land is protected at all.
    pub wild_protection_enabled: bool,
    /// Lowest Y level at which wilderness protection applies.
    pub wild_protection_min_y: i32,
    /// Whether breaking blocks below the protected band is allowed.
    pub wild_destroy_below_allowed: bool,
    /// Whether placing blocks below the protected band is allowed.
    pub wild_build_below_allowed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            starting_claims: 4,
            claims_per_hour: 2,
            max_claims: 50,
            claim_buffer_size: 2,
            town_creation_cost: 1000.0,
            town_claim_cost: 50.0,
            max_town_claims: 100,
            town_upkeep_base: 100.0,
            town_upkeep_per_claim: 50.0,
            town_upkeep_hour: 12,
            wild_protection_enabled: true,
            wild_protection_min_y: 0,
            wild_destroy_below_allowed: true,
            wild_build_below_allowed: false,
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed, names an unknown key,
    /// or holds an out-of-range value.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails [`Config::from_toml`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.town_upkeep_hour > 23 {
            return Err(ConfigError::Invalid {
                key: "townUpkeepHour",
                reason: format!("{} is not an hour of day", self.town_upkeep_hour),
            });
        }
        if self.max_claims < self.starting_claims {
            return Err(ConfigError::Invalid {
                key: "maxClaims",
                reason: format!(
                    "{} is below startingClaims ({})",
                    self.max_claims, self.starting_claims
                ),
            });
        }
        if self.claim_buffer_size > MAX_CLAIM_BUFFER {
            return Err(ConfigError::Invalid {
                key: "claimBufferSize",
                reason: format!("{} exceeds {MAX_CLAIM_BUFFER}", self.claim_buffer_size),
            });
        }
        let money = [
            ("townCreationCost", self.town_creation_cost),
            ("townClaimCost", self.town_claim_cost),
            ("townUpkeepBase", self.town_upkeep_base),
            ("townUpkeepPerClaim", self.town_upkeep_per_claim),
        ];
        for (key, value) in money {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{value} must be a non-negative number"),
                });
            }
        }
        Ok(())
    }

    /// Claim quota for a player with `hours` of accrued playtime.
    ///
    /// `starting_claims + floor(hours * claims_per_hour)`, capped at
    /// `max_claims`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn claim_quota(&self, hours: f64) -> u32 {
        let hours = if hours.is_finite() { hours.max(0.0) } else { 0.0 };
        let earned = (hours * f64::from(self.claims_per_hour)).floor();
        // Saturating float-to-int cast; anything past the cap is clamped below.
        let earned = earned.min(f64::from(u32::MAX)) as u32;
        self.starting_claims
            .saturating_add(earned)
            .min(self.max_claims)
    }

    /// Daily upkeep owed by a town holding `cells` chunks.
    #[must_use]
    pub fn upkeep_for(&self, cells: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let cells = cells as f64;
        self.town_upkeep_base + self.town_upkeep_per_claim * cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.starting_claims, 4);
        assert_eq!(config.claims_per_hour, 2);
        assert_eq!(config.max_claims, 50);
        assert_eq!(config.claim_buffer_size, 2);
        assert!((config.town_creation_cost - 1000.0).abs() < f64::EPSILON);
        assert!((config.town_claim_cost - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.max_town_claims, 100);
        assert_eq!(config.town_upkeep_hour, 12);
        assert!(config.wild_protection_enabled);
        assert_eq!(config.wild_protection_min_y, 0);
        assert!(config.wild_destroy_below_allowed);
        assert!(!config.wild_build_below_allowed);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("maxClaims = 80\ntownUpkeepHour = 3\n").unwrap();
        assert_eq!(config.max_claims, 80);
        assert_eq!(config.town_upkeep_hour, 3);
        assert_eq!(config.starting_claims, 4);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = Config::from_toml("maxClaim = 80\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_bad_hour_rejected() {
        let result = Config::from_toml("townUpkeepHour = 24\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "townUpkeepHour",
                ..
            })
        ));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let result = Config::from_toml("townClaimCost = -5.0\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "townClaimCost",
                ..
            })
        ));
    }

    #[test]
    fn test_claim_quota() {
        let config = Config::default();
        assert_eq!(config.claim_quota(0.0), 4);
        assert_eq!(config.claim_quota(1.9), 7);
        assert_eq!(config.claim_quota(10.0), 24);
        assert_eq!(config.claim_quota(1000.0), 50);
        assert_eq!(config.claim_quota(-3.0), 4);
        assert_eq!(config.claim_quota(f64::NAN), 4);
    }

    #[test]
    fn test_upkeep_for() {
        let config = Config::default();
        assert!((config.upkeep_for(3) - 250.0).abs() < f64::EPSILON);
        assert!((config.upkeep_for(0) - 100.0).abs() < f64::EPSILON);
    }
}
