//! Snapshot listing command implementation.

use super::CliError;
use landclaim::LandContext;
use landclaim::storage::BACKUP_RETENTION;

/// Execute the backups command.
///
/// # Errors
///
/// Returns an error if the backups directory cannot be read.
pub(crate) fn execute(ctx: &LandContext) -> Result<(), CliError> {
    let snapshots = ctx.storage().list_snapshots()?;
    if snapshots.is_empty() {
        println!("No snapshots yet. One is taken before every upkeep run.");
        return Ok(());
    }
    println!("Snapshots (newest {BACKUP_RETENTION} kept):");
    println!();
    for (date, path) in snapshots.iter().rev() {
        println!("  {date}  {}", path.display());
    }
    Ok(())
}
