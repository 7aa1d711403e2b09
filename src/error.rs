//! Error types for claims, towns, storage and configuration.
//!
//! Every fallible operation returns one of these closed enums. Nothing in the
//! core panics on a refused request; a refusal is just another outcome.

use std::path::PathBuf;

use thiserror::Error;

use crate::town::Rank;

/// Failure reading or writing on-disk state.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A record could not be encoded or decoded.
    #[error("JSON error on {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Why a cell could not be claimed.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The requester already holds this cell.
    #[error("you already own this chunk")]
    AlreadyOwned,
    /// Another player, or a town, holds this cell.
    #[error("this chunk is owned by someone else")]
    OwnedByOther,
    /// A different town holds this cell.
    #[error("this chunk belongs to another town")]
    OwnedByOtherTown,
    /// The owner's claim quota is used up.
    #[error("claim limit of {limit} reached")]
    LimitReached {
        /// The quota that was hit.
        limit: u32,
    },
    /// The cell lies inside another owner's buffer zone.
    #[error("too close to another claim")]
    TooCloseToOtherClaim,
    /// The cell does not share an edge with existing town territory.
    #[error("town claims must share an edge with existing territory")]
    NotAdjacent,
    /// The claim could not be persisted.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a town operation was refused.
#[derive(Debug, Error)]
pub enum TownError {
    /// No town by that name.
    #[error("town {0:?} not found")]
    NotFound(String),
    /// The actor's rank is below what the operation needs.
    #[error("requires rank {required:?}")]
    InsufficientRank {
        /// Lowest rank allowed to perform the operation.
        required: Rank,
    },
    /// Another town already uses that name (case-insensitive).
    #[error("a town named {0:?} already exists")]
    NameTaken(String),
    /// The name breaks the length or character rules.
    #[error("invalid town name: {0}")]
    InvalidName(String),
    /// The balance cannot cover the amount.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Amount required.
        needed: f64,
        /// Amount available.
        available: f64,
    },
    /// Amounts must be positive and finite.
    #[error("amount must be positive, got {0}")]
    InvalidAmount(f64),
    /// The target is not a member of the town.
    #[error("not a member of this town")]
    NotMember,
    /// The player already belongs to a town.
    #[error("already a member of a town")]
    AlreadyInTown,
    /// The player holds no invite from this town.
    #[error("no pending invite")]
    NoInvite,
    /// The leader must transfer leadership or delete the town instead.
    #[error("the leader cannot leave the town")]
    LeaderCannotLeave,
    /// The cell is not part of this town's territory.
    #[error("chunk is not town territory")]
    NotInTerritory,
    /// The player's own account cannot cover the amount.
    #[error("you cannot afford {needed}")]
    CannotAfford {
        /// Amount required.
        needed: f64,
    },
    /// A territory change was refused.
    #[error(transparent)]
    Claim(#[from] ClaimError),
    /// The change could not be persisted; nothing was applied.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a configuration file was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or has unknown keys.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Why a [`crate::context::LandContext`] could not be opened.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The configuration is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Saved state could not be loaded.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
