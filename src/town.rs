//! Towns: named collectives with ranks, a bank, contiguous territory and
//! configurable protection.
//!
//! - [`Town`] is the persisted record
//! - [`TownRegistry`] owns every town plus the name, cell and member indices
//! - membership, rank and plot operations are methods on the registry

mod governance;
mod ledger;
mod model;
mod plots;
mod registry;
mod settings;

pub use ledger::{LEDGER_CAPACITY, Ledger, LedgerEntry, LedgerKind};
pub use model::{NAME_MAX_LEN, NAME_MIN_LEN, Rank, Town, validate_town_name};
pub use registry::{IndexSnapshot, InviteBook, TownRegistry, UpkeepCharge};
pub use settings::{
    ActionFlag, ActionFlags, Audience, Plot, PlotSettings, Toggle, TownSettings, TriState,
};
