// Allow unwrap and unreadable literals in tests (test code is not production)
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::unreadable_literal))]
//! landclaim: land governance for a shared persistent world.
//!
//! This crate tracks who owns each chunk of a block world and decides who
//! may act there:
//! - Individual claims with playtime-based quotas and buffer zones
//! - Towns with ranks, a bank, contiguous territory and per-plot settings
//! - Layered permission resolution (town, claim, wilderness)
//! - Daily upkeep that dissolves towns left unpaid for too long
//! - Attribution of indirect world changes to the player behind them
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     LandContext                      │
//! ├──────────────────┬──────────────────┬────────────────┤
//! │PermissionResolver│ UpkeepScheduler  │   Correlator   │
//! ├──────────────────┴────────┬─────────┴────────────────┤
//! │         ClaimIndex        │       TownRegistry       │
//! ├───────────────────────────┴──────────────────────────┤
//! │         Storage (JSON files) + host Services         │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod cell;
pub mod claims;
pub mod config;
pub mod context;
pub mod correlator;
pub mod error;
pub mod ids;
pub mod invariants;
pub mod permission;
pub mod services;
pub mod storage;
pub mod town;
pub mod upkeep;

pub use cell::{BlockPos, CellKey};
pub use claims::{Claim, ClaimIndex, TrustTier};
pub use config::Config;
pub use context::{LandContext, Services};
pub use correlator::{CorrelatedInteraction, InteractionCorrelator};
pub use error::{ClaimError, ConfigError, OpenError, StorageError, TownError};
pub use ids::{ClaimOwner, PlayerId, TownId};
pub use permission::{Action, Decision, DenyReason, PermissionResolver};
pub use town::{Rank, Town, TownRegistry};
pub use upkeep::{UpkeepScheduler, UpkeepState};
